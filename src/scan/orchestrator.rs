//! Concurrent scan orchestration
//!
//! Jobs iterate the (targets × probes) matrix with a bounded worker pool.
//! Workers share one HTTP client and one rate limiter per job; cancellation
//! propagates through a watch channel checked between pairs and raced
//! against every in-flight request.

use crate::error::{Result, VigilError};
use crate::http::{HttpClient, HttpExchange};
use crate::matcher;
use crate::models::{JobState, Probe, ScanOptions, ScanResult, ScanStatus};
use crate::probe::parser::{self, RequestSpec};
use crate::scan::job::Job;
use crate::scan::rate_limit::RateLimiter;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Stored response evidence is clipped to this many bytes.
const EVIDENCE_RESPONSE_BYTES: usize = 2048;

/// Owns every scan job for the process lifetime
pub struct Orchestrator {
    jobs: RwLock<HashMap<String, Arc<Job>>>,
    next_id: AtomicU64,
}

impl Orchestrator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Registers a job over the given targets and probes and begins executing
    /// it. Returns the job id immediately; progress is observed via
    /// [`Orchestrator::status`].
    pub fn start(
        self: &Arc<Self>,
        targets: Vec<String>,
        probes: Vec<Probe>,
        options: ScanOptions,
    ) -> Result<String> {
        if targets.is_empty() {
            return Err(VigilError::InvalidArgument("no targets given".into()));
        }
        if probes.is_empty() {
            return Err(VigilError::InvalidArgument("no valid probes given".into()));
        }

        let job_id = format!("scan_{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let probe_ids: Vec<String> = probes.iter().map(|p| p.id.clone()).collect();
        let total = targets.len() * probes.len();

        let job = Arc::new(Job::new(
            job_id.clone(),
            targets.clone(),
            probe_ids,
            total,
        ));

        self.jobs
            .write()
            .expect("orchestrator lock poisoned")
            .insert(job_id.clone(), Arc::clone(&job));

        info!(
            "job {job_id} started: {} targets x {} probes",
            targets.len(),
            probes.len()
        );

        tokio::spawn(run_job(job, targets, probes, options));

        Ok(job_id)
    }

    /// Fires the job's cancellation token and transitions it to Stopped.
    /// Already-terminal jobs are left untouched.
    pub fn stop(&self, job_id: &str) -> Result<()> {
        let job = self.lookup(job_id)?;
        job.cancel();
        info!("job {job_id} stopped");
        Ok(())
    }

    pub fn status(&self, job_id: &str) -> Result<ScanStatus> {
        Ok(self.lookup(job_id)?.status())
    }

    pub fn results(&self, job_id: &str) -> Result<Vec<ScanResult>> {
        Ok(self.lookup(job_id)?.results())
    }

    pub fn jobs(&self) -> Vec<ScanStatus> {
        self.jobs
            .read()
            .expect("orchestrator lock poisoned")
            .values()
            .map(|j| j.status())
            .collect()
    }

    /// Cancels every running job. Called on process shutdown.
    pub fn shutdown(&self) {
        let jobs = self.jobs.read().expect("orchestrator lock poisoned");
        for job in jobs.values() {
            if !job.status().state.is_terminal() {
                job.cancel();
            }
        }
    }

    fn lookup(&self, job_id: &str) -> Result<Arc<Job>> {
        self.jobs
            .read()
            .expect("orchestrator lock poisoned")
            .get(job_id)
            .cloned()
            .ok_or_else(|| VigilError::NotFound(format!("scan job {job_id}")))
    }
}

/// Drives one job to a terminal state.
async fn run_job(job: Arc<Job>, targets: Vec<String>, probes: Vec<Probe>, options: ScanOptions) {
    let client = match HttpClient::build(options.timeout, options.proxy_url.as_deref()) {
        Ok(client) => client,
        Err(e) => {
            job.finish(JobState::Failed, Some(format!("cannot build HTTP client: {e}")));
            return;
        }
    };

    let limiter = Arc::new(RateLimiter::new(options.rate_limit));
    let probes = Arc::new(probes);

    // Queue chunked by bulk_size target batches. Ordering only; workers
    // drain the whole queue either way.
    let bulk = options.bulk_size.max(1);
    let mut pairs: VecDeque<(String, usize)> = VecDeque::with_capacity(targets.len() * probes.len());
    for chunk in targets.chunks(bulk) {
        for target in chunk {
            for probe_index in 0..probes.len() {
                pairs.push_back((target.clone(), probe_index));
            }
        }
    }
    let queue = Arc::new(Mutex::new(pairs));

    let worker_count = options.concurrency.max(1).min(queue.lock().expect("queue lock").len().max(1));
    let mut workers = JoinSet::new();

    for _ in 0..worker_count {
        let job = Arc::clone(&job);
        let queue = Arc::clone(&queue);
        let probes = Arc::clone(&probes);
        let client = client.clone();
        let limiter = Arc::clone(&limiter);
        let mut cancel_rx = job.cancel_receiver();

        workers.spawn(async move {
            loop {
                if *cancel_rx.borrow() {
                    break;
                }

                let pair = queue.lock().expect("queue lock").pop_front();
                let Some((target, probe_index)) = pair else {
                    break;
                };
                let probe = &probes[probe_index];

                match execute_probe(&client, &limiter, &mut cancel_rx, &job.id, &target, probe)
                    .await
                {
                    Ok(result) => job.record_pair(result),
                    Err(VigilError::Cancelled) => break,
                    Err(e) => {
                        // Containment boundary: a bad pair never fails the job.
                        warn!("job {}: {target} x {}: {e}", job.id, probe.id);
                        job.record_pair(None);
                    }
                }
            }
        });
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                job.finish(JobState::Failed, Some(format!("scan worker panicked: {e}")));
            }
        }
    }

    job.finish(JobState::Completed, None);
    let status = job.status();
    info!(
        "job {} finished: state={} completed={}/{} found={}",
        job.id, status.state, status.completed, status.total, status.found
    );
}

/// Runs every request of one probe against one target. Returns the first
/// matching result, `Ok(None)` when nothing matched or a recoverable error
/// occurred, and `Err(Cancelled)` when the job was cancelled mid-pair.
async fn execute_probe(
    client: &HttpClient,
    limiter: &RateLimiter,
    cancel_rx: &mut watch::Receiver<bool>,
    job_id: &str,
    target: &str,
    probe: &Probe,
) -> Result<Option<ScanResult>> {
    let content = if probe.content.is_empty() {
        if probe.file_path.as_os_str().is_empty() {
            return Ok(None);
        }
        match std::fs::read_to_string(&probe.file_path) {
            Ok(content) => content,
            Err(e) => {
                debug!("cannot read probe {}: {e}", probe.id);
                return Ok(None);
            }
        }
    } else {
        probe.content.clone()
    };

    let parsed = match parser::parse(&content) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("probe {} does not parse: {e}", probe.id);
            return Ok(None);
        }
    };

    let base = normalize_target(target);
    let hostname = extract_hostname(&base);

    for spec in &parsed.requests {
        for request in materialize_requests(spec, &base, &hostname) {
            if *cancel_rx.borrow() {
                return Err(VigilError::Cancelled);
            }

            tokio::select! {
                _ = limiter.acquire() => {}
                _ = cancel_rx.changed() => return Err(VigilError::Cancelled),
            }

            let exchange = tokio::select! {
                outcome = client.dispatch(
                    &request.method,
                    &request.url,
                    &request.headers,
                    request.body.as_deref(),
                ) => outcome,
                _ = cancel_rx.changed() => return Err(VigilError::Cancelled),
            };

            let exchange = match exchange {
                Ok(exchange) => exchange,
                Err(e) => {
                    debug!("job {job_id}: {} {} failed: {e}", request.method, request.url);
                    continue;
                }
            };

            let outcome = matcher::evaluate_matchers(
                &spec.matchers,
                spec.matchers_condition,
                &exchange.response,
            );

            if outcome.matched {
                return Ok(Some(build_result(
                    job_id, probe, &base, &request, &exchange, outcome.evidence,
                )));
            }
        }
    }

    Ok(None)
}

/// A fully substituted request, ready to send
struct MaterializedRequest {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

fn materialize_requests(
    spec: &RequestSpec,
    base: &str,
    hostname: &str,
) -> Vec<MaterializedRequest> {
    if let Some(raw) = &spec.raw {
        return parse_raw_request(&substitute(raw, base, hostname), base)
            .into_iter()
            .collect();
    }

    spec.paths
        .iter()
        .map(|path| {
            let path = substitute(path, base, hostname);
            let url = if path.starts_with("http://") || path.starts_with("https://") {
                path
            } else {
                format!("{}/{}", base, path.trim_start_matches('/'))
            };

            let headers = spec
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), substitute(v, base, hostname)))
                .collect();

            MaterializedRequest {
                method: spec.method.clone(),
                url,
                headers,
                body: spec.body.as_ref().map(|b| substitute(b, base, hostname)),
            }
        })
        .collect()
}

/// Parses a verbatim request template: request line, header lines, blank
/// line, body.
fn parse_raw_request(raw: &str, base: &str) -> Option<MaterializedRequest> {
    let mut lines = raw.lines();

    let request_line = lines.find(|l| !l.trim().is_empty())?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_uppercase();
    let path = parts.next()?;

    let url = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    };

    let mut headers = Vec::new();
    let mut body = String::new();
    let mut in_body = false;
    for line in lines {
        if in_body {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(line);
        } else if line.trim().is_empty() {
            in_body = true;
        } else if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    Some(MaterializedRequest {
        method,
        url,
        headers,
        body: if body.is_empty() { None } else { Some(body) },
    })
}

fn build_result(
    job_id: &str,
    probe: &Probe,
    base: &str,
    request: &MaterializedRequest,
    exchange: &HttpExchange,
    evidence: String,
) -> ScanResult {
    ScanResult {
        id: uuid::Uuid::new_v4().to_string(),
        job_id: job_id.to_string(),
        probe_id: probe.id.clone(),
        probe_name: probe.name.clone(),
        severity: probe.severity,
        host: base.to_string(),
        matched: evidence,
        extracted_data: HashMap::new(),
        timestamp: Utc::now(),
        request: format_request(request),
        response: format_response(exchange),
    }
}

fn format_request(request: &MaterializedRequest) -> String {
    let mut out = String::new();
    let path = url::Url::parse(&request.url)
        .map(|u| {
            let mut p = u.path().to_string();
            if let Some(q) = u.query() {
                p.push('?');
                p.push_str(q);
            }
            p
        })
        .unwrap_or_else(|_| request.url.clone());

    out.push_str(&format!("{} {} HTTP/1.1\n", request.method, path));
    if let Ok(u) = url::Url::parse(&request.url) {
        if let Some(host) = u.host_str() {
            out.push_str(&format!("Host: {host}\n"));
        }
    }
    for (key, value) in &request.headers {
        out.push_str(&format!("{key}: {value}\n"));
    }
    if let Some(body) = &request.body {
        out.push('\n');
        out.push_str(body);
    }
    out
}

/// Response rendered for evidence storage; the body is clipped so result
/// logs stay small.
fn format_response(exchange: &HttpExchange) -> String {
    let mut out = String::new();
    out.push_str(&exchange.status_line);
    out.push('\n');
    for (key, value) in &exchange.response.headers {
        out.push_str(&format!("{key}: {value}\n"));
    }
    out.push('\n');

    let body = exchange.response.body_text();
    if body.len() > EVIDENCE_RESPONSE_BYTES {
        let mut cut = EVIDENCE_RESPONSE_BYTES;
        while cut > 0 && !body.is_char_boundary(cut) {
            cut -= 1;
        }
        out.push_str(&body[..cut]);
        out.push_str("\n... (truncated)");
    } else {
        out.push_str(&body);
    }
    out
}

fn normalize_target(target: &str) -> String {
    let target = target.trim();
    let with_scheme = if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("http://{target}")
    };
    with_scheme.trim_end_matches('/').to_string()
}

fn extract_hostname(base: &str) -> String {
    match url::Url::parse(base) {
        Ok(u) => {
            let host = u.host_str().unwrap_or_default().to_string();
            match u.port() {
                Some(port) => format!("{host}:{port}"),
                None => host,
            }
        }
        Err(_) => base
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

fn substitute(input: &str, base: &str, hostname: &str) -> String {
    input
        .replace("{{BaseURL}}", base)
        .replace("{{RootURL}}", base)
        .replace("{{Hostname}}", hostname)
}
