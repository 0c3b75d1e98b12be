//! Scan job state and cancellation handle

use crate::models::{JobState, ScanResult, ScanStatus};
use chrono::Utc;
use std::sync::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::warn;

/// Upper bound on retained results per job; `found` keeps counting past it.
const MAX_RESULTS_PER_JOB: usize = 10_000;

/// One scan job: frozen input snapshot, live counters, result log, and the
/// cancellation channel observed by its workers.
pub struct Job {
    pub id: String,
    status: RwLock<ScanStatus>,
    results: Mutex<Vec<ScanResult>>,
    cancel_tx: watch::Sender<bool>,
}

impl Job {
    pub fn new(id: String, targets: Vec<String>, probe_ids: Vec<String>, total: usize) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        let status = ScanStatus {
            id: id.clone(),
            state: JobState::Running,
            progress: 0.0,
            total,
            completed: 0,
            found: 0,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            targets,
            probe_ids,
        };
        Self {
            id,
            status: RwLock::new(status),
            results: Mutex::new(Vec::new()),
            cancel_tx,
        }
    }

    pub fn status(&self) -> ScanStatus {
        self.status.read().expect("job status lock poisoned").clone()
    }

    pub fn results(&self) -> Vec<ScanResult> {
        self.results.lock().expect("job results lock poisoned").clone()
    }

    /// Each worker holds its own receiver; `changed()` wakes in-flight
    /// requests promptly.
    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Records the outcome of one (target, probe) pair. No-op once the job
    /// is terminal, so a late worker cannot mutate a frozen job.
    pub fn record_pair(&self, result: Option<ScanResult>) {
        let mut status = self.status.write().expect("job status lock poisoned");
        if status.state.is_terminal() {
            return;
        }

        status.completed += 1;
        if status.total > 0 {
            status.progress = status.completed as f64 / status.total as f64 * 100.0;
        }

        if let Some(result) = result {
            status.found += 1;
            drop(status);
            let mut results = self.results.lock().expect("job results lock poisoned");
            if results.len() < MAX_RESULTS_PER_JOB {
                results.push(result);
                if results.len() == MAX_RESULTS_PER_JOB {
                    warn!("job {}: result log capped at {MAX_RESULTS_PER_JOB}", self.id);
                }
            }
        }
    }

    /// Transitions to a terminal state. The first transition wins; later
    /// calls are no-ops.
    pub fn finish(&self, state: JobState, error: Option<String>) {
        debug_assert!(state.is_terminal());
        let mut status = self.status.write().expect("job status lock poisoned");
        if status.state.is_terminal() {
            return;
        }
        status.state = state;
        status.error = error;
        status.completed_at = Some(Utc::now());
        if state == JobState::Completed {
            status.progress = 100.0;
        }
    }

    /// Fires the cancellation signal and moves the job to Stopped.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
        self.finish(JobState::Stopped, None);
    }
}
