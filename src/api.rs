//! Operator API façade
//!
//! A concrete, typed surface over the probe library and the scan
//! orchestrator. Both collaborators are injected so tests can run against
//! throwaway directories and engines.

use crate::error::{Result, VigilError};
use crate::models::{Probe, ScanOptions, ScanResult, ScanStatus, Settings, Severity, Stats};
use crate::probe::{import, parser, Library};
use crate::scan::Orchestrator;
use crate::settings;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// One page of probe listings
#[derive(Debug, Clone, Serialize)]
pub struct ProbePage {
    pub probes: Vec<Probe>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Application façade consumed by the operator UI
pub struct App {
    library: RwLock<Arc<Library>>,
    orchestrator: Arc<Orchestrator>,
}

impl App {
    pub fn new(library: Arc<Library>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            library: RwLock::new(library),
            orchestrator,
        }
    }

    /// Builds an App rooted at the settings' templates directory.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            Library::new(&settings.templates_dir)?,
            Orchestrator::new(),
        ))
    }

    fn library(&self) -> Arc<Library> {
        Arc::clone(&self.library.read().expect("app library lock poisoned"))
    }

    // ---- probes ----

    pub fn list_all(&self) -> Vec<Probe> {
        self.library().get_all()
    }

    pub fn probe_count(&self) -> usize {
        self.library().count()
    }

    pub fn list_paginated(&self, page: usize, page_size: usize) -> ProbePage {
        let (probes, total) = self.library().get_paginated(page, page_size);
        ProbePage {
            probes,
            total,
            page,
            page_size,
        }
    }

    pub fn get(&self, id: &str) -> Result<Probe> {
        self.library().get_by_id(id)
    }

    /// Creates a new probe: assigns a fresh id and timestamps, validates any
    /// provided body, and writes it under the probe's category.
    pub fn create(&self, mut probe: Probe) -> Result<Probe> {
        probe.id = uuid::Uuid::new_v4().to_string();
        probe.created_at = Utc::now();
        probe.updated_at = probe.created_at;
        probe.file_path = PathBuf::new();

        if !probe.content.is_empty() {
            probe.content = parser::rewrite_identity(&probe.content, Some(&probe.id), None)?;
            sync_metadata_from_content(&mut probe)?;
        }

        self.library().save(probe)
    }

    /// Rewrites an existing probe in place. Unknown ids are refused.
    pub fn update(&self, mut probe: Probe) -> Result<Probe> {
        let library = self.library();
        let existing = library.get_by_id(&probe.id)?;

        if !probe.content.is_empty() {
            // The stored document must carry the library id, whatever the
            // editor left in the text.
            probe.content = parser::rewrite_identity(&probe.content, Some(&probe.id), None)?;
            sync_metadata_from_content(&mut probe)?;
        }

        probe.created_at = existing.created_at;
        if probe.file_path.as_os_str().is_empty() {
            probe.file_path = existing.file_path;
            probe.category = existing.category;
        }
        library.save(probe)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.library().delete(id)
    }

    pub fn import(&self, content: &str, category: Option<&str>) -> Result<Probe> {
        import::import_probe(&self.library(), content, category)
    }

    pub fn import_folder(&self, folder: &Path) -> Result<import::ImportReport> {
        import::import_folder(&self.library(), folder)
    }

    /// Exports a probe as YAML text.
    pub fn export(&self, id: &str) -> Result<String> {
        let probe = self.library().get_by_id(id)?;
        parser::to_yaml(&probe)
    }

    /// Case-insensitive search over name, description, and id, with optional
    /// category and severity filters.
    pub fn search(
        &self,
        query: &str,
        category: Option<&str>,
        severity: Option<Severity>,
    ) -> Vec<Probe> {
        let query = query.to_lowercase();
        self.library()
            .get_all()
            .into_iter()
            .filter(|p| category.map_or(true, |c| p.display_category() == c))
            .filter(|p| severity.map_or(true, |s| p.severity == s))
            .filter(|p| {
                query.is_empty()
                    || p.name.to_lowercase().contains(&query)
                    || p.description.to_lowercase().contains(&query)
                    || p.id.to_lowercase().contains(&query)
            })
            .collect()
    }

    /// Checks probe text without storing anything.
    pub fn validate(&self, content: &str) -> Result<()> {
        parser::parse(content).map(|_| ())
    }

    // ---- categories ----

    pub fn categories_with_counts(&self) -> HashMap<String, usize> {
        self.library().categories_with_counts()
    }

    pub fn create_category(&self, path: &str) -> Result<()> {
        self.library().create_category(path)
    }

    pub fn delete_category(&self, path: &str) -> Result<()> {
        self.library().delete_category(path)
    }

    pub fn rename_category(&self, old: &str, new: &str) -> Result<()> {
        self.library().rename_category(old, new)
    }

    pub fn list_by_category(&self, category: &str) -> Vec<Probe> {
        self.library().get_by_category(category)
    }

    pub fn list_by_severity(&self, severity: Severity) -> Vec<Probe> {
        self.library().get_by_severity(severity)
    }

    // ---- scans ----

    /// Resolves probe ids (silently dropping the unresolvable), then submits
    /// a job. Fails when no probe survives resolution.
    pub fn start_scan(
        &self,
        targets: Vec<String>,
        probe_ids: &[String],
        options: ScanOptions,
    ) -> Result<String> {
        let library = self.library();
        let mut probes = Vec::with_capacity(probe_ids.len());
        for id in probe_ids {
            match library.get_by_id(id) {
                Ok(probe) => probes.push(probe),
                Err(e) => debug!("dropping probe {id} from scan: {e}"),
            }
        }

        if probes.is_empty() {
            return Err(VigilError::InvalidArgument(
                "no valid probes selected".into(),
            ));
        }

        self.orchestrator.start(targets, probes, options)
    }

    pub fn stop_scan(&self, job_id: &str) -> Result<()> {
        self.orchestrator.stop(job_id)
    }

    pub fn scan_status(&self, job_id: &str) -> Result<ScanStatus> {
        self.orchestrator.status(job_id)
    }

    pub fn scan_results(&self, job_id: &str) -> Result<Vec<ScanResult>> {
        self.orchestrator.results(job_id)
    }

    pub fn list_scans(&self) -> Vec<ScanStatus> {
        self.orchestrator.jobs()
    }

    /// Cancels all running jobs. Called on process exit.
    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
    }

    // ---- settings ----

    pub fn load_settings(&self) -> Result<Settings> {
        settings::load()
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        settings::save(settings)
    }

    /// Points the app at a different templates directory, replacing the
    /// library. The directory must already exist.
    pub fn reload_templates(&self, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            return Err(VigilError::NotFound(format!(
                "directory {}",
                dir.display()
            )));
        }
        let fresh = Library::new(dir)?;
        *self.library.write().expect("app library lock poisoned") = fresh;
        Ok(())
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.library().templates_dir().to_path_buf()
    }

    pub fn is_library_loaded(&self) -> bool {
        self.library().is_loaded()
    }

    // ---- stats ----

    pub fn stats(&self) -> Stats {
        let library = self.library();
        let probes = library.get_all();

        let mut by_severity: HashMap<String, usize> = HashMap::new();
        for probe in &probes {
            *by_severity
                .entry(probe.severity.as_str().to_string())
                .or_default() += 1;
        }

        let by_category = library
            .categories_with_counts()
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .collect();

        Stats {
            total_probes: probes.len(),
            total_scans: self.orchestrator.jobs().len(),
            by_category,
            by_severity,
        }
    }
}

/// Re-derives indexable metadata from the probe body so the index never
/// disagrees with what is on disk. Fails on unparseable bodies.
fn sync_metadata_from_content(probe: &mut Probe) -> Result<()> {
    let parsed = parser::parse(&probe.content)?;
    if !parsed.name.is_empty() {
        probe.name = parsed.name;
    }
    if !parsed.author.is_empty() {
        probe.author = parsed.author;
    }
    probe.severity = parsed.severity;
    if !parsed.description.is_empty() {
        probe.description = parsed.description;
    }
    if !parsed.references.is_empty() {
        probe.references = parsed.references;
    }
    if !parsed.tags.is_empty() {
        probe.tags = parsed.tags;
    }
    Ok(())
}

// Re-exported so UI-facing callers need only the façade module.
pub use crate::probe::UNCATEGORIZED;
