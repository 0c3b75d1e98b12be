//! Core data models for the probe library and scan engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Severity level of a probe or finding
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ();

    /// Unknown severity strings degrade to `Info` rather than failing the
    /// probe; `Err` is never returned.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Info,
        })
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

/// A detection probe. The library keeps metadata only; `content` is loaded
/// from `file_path` on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Probe {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Slash-delimited category path, up to three segments. Empty means
    /// uncategorized. Mirrors the on-disk directory layout.
    #[serde(default)]
    pub category: String,
    /// Raw YAML text; empty until loaded from disk.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Probe {
    /// Category as rendered in listings ("uncategorized" for the empty path).
    pub fn display_category(&self) -> &str {
        if self.category.is_empty() {
            crate::probe::UNCATEGORIZED
        } else {
            &self.category
        }
    }
}

/// Options governing one scan job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    pub concurrency: usize,
    /// Per-request timeout in seconds
    pub timeout: u64,
    /// Max outgoing requests per second; 0 disables limiting
    pub rate_limit: u32,
    /// Targets processed per dispatch batch (queue chunking advisory)
    pub bulk_size: usize,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            timeout: 30,
            rate_limit: 100,
            bulk_size: 25,
            proxy_url: None,
        }
    }
}

/// Lifecycle state of a scan job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobState {
    /// Terminal jobs are frozen; no further transitions or counter updates.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Stopped
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of a scan job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStatus {
    pub id: String,
    pub state: JobState,
    /// Percentage in [0, 100]
    pub progress: f64,
    pub total: usize,
    pub completed: usize,
    pub found: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Frozen snapshot taken at submission
    pub targets: Vec<String>,
    pub probe_ids: Vec<String>,
}

/// One finding produced by a (target, probe) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: String,
    pub job_id: String,
    pub probe_id: String,
    pub probe_name: String,
    pub severity: Severity,
    pub host: String,
    /// Human-readable summary of the matchers that fired
    pub matched: String,
    #[serde(default)]
    pub extracted_data: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub request: String,
    pub response: String,
}

/// Library and scan statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub total_probes: usize,
    pub total_scans: usize,
    pub by_category: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
}

/// Persisted application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub concurrency: usize,
    pub timeout: u64,
    pub rate_limit: u32,
    pub bulk_size: usize,
    pub templates_dir: PathBuf,
    #[serde(default)]
    pub proxy_url: String,
    #[serde(default)]
    pub headless: bool,
}

impl Settings {
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            concurrency: self.concurrency,
            timeout: self.timeout,
            rate_limit: self.rate_limit,
            bulk_size: self.bulk_size,
            proxy_url: if self.proxy_url.is_empty() {
                None
            } else {
                Some(self.proxy_url.clone())
            },
        }
    }
}
