//! Filesystem-backed probe library
//!
//! Keeps an in-memory metadata index of every probe under a root directory.
//! Probe bodies stay on disk and are read on demand; the initial index is
//! built by a background task so construction returns immediately.

use crate::error::{Result, VigilError};
use crate::models::{Probe, Severity};
use crate::probe::{
    parser, validate_category_path, MAX_CATEGORY_DEPTH, UNCATEGORIZED,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Lines read from the head of each file during indexing. Enough for the
/// id/info block of any reasonable probe.
const METADATA_HEAD_LINES: usize = 100;

#[derive(Default)]
struct Index {
    probes: HashMap<String, Probe>,
    by_category: HashMap<String, Vec<String>>,
    by_severity: HashMap<String, Vec<String>>,
}

impl Index {
    fn insert(&mut self, probe: Probe) {
        self.remove(&probe.id);
        let category = probe.display_category().to_string();
        let severity = probe.severity.as_str().to_string();
        self.by_category
            .entry(category)
            .or_default()
            .push(probe.id.clone());
        self.by_severity
            .entry(severity)
            .or_default()
            .push(probe.id.clone());
        self.probes.insert(probe.id.clone(), probe);
    }

    fn remove(&mut self, id: &str) -> Option<Probe> {
        let probe = self.probes.remove(id)?;
        remove_from_bucket(&mut self.by_category, probe.display_category(), id);
        remove_from_bucket(&mut self.by_severity, probe.severity.as_str(), id);
        Some(probe)
    }
}

fn remove_from_bucket(buckets: &mut HashMap<String, Vec<String>>, key: &str, id: &str) {
    if let Some(ids) = buckets.get_mut(key) {
        ids.retain(|existing| existing != id);
    }
}

/// Indexed, lazily-loaded probe store
pub struct Library {
    root: PathBuf,
    index: RwLock<Index>,
    loaded: AtomicBool,
}

impl Library {
    /// Opens a library rooted at `root`, creating the directory if needed,
    /// and kicks off the background index build. Queries before the build
    /// finishes see a partial view; check [`Library::is_loaded`]. Outside a
    /// tokio runtime the index is built inline instead.
    pub fn new(root: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let library = Arc::new(Self {
            root,
            index: RwLock::new(Index::default()),
            loaded: AtomicBool::new(false),
        });

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let background = Arc::clone(&library);
                handle.spawn_blocking(move || {
                    if let Err(e) = background.reload() {
                        warn!("background library load failed: {e}");
                    }
                });
            }
            Err(_) => library.reload()?,
        }

        Ok(library)
    }

    /// Opens a library and builds the index before returning. Used by tests
    /// and by callers that cannot tolerate a partial view.
    pub fn open_eager(root: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let library = Arc::new(Self {
            root,
            index: RwLock::new(Index::default()),
            loaded: AtomicBool::new(false),
        });
        library.reload()?;
        Ok(library)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn templates_dir(&self) -> &Path {
        &self.root
    }

    /// Walks the tree and rebuilds the whole index. The write lock is held
    /// only while swapping in the finished index, not during the walk.
    pub fn reload(&self) -> Result<()> {
        let mut fresh = Index::default();
        self.walk_dir(&self.root, &mut fresh)?;

        // Empty directories still define categories.
        self.collect_category_dirs(&self.root, 0, String::new(), &mut fresh)?;

        let count = fresh.probes.len();
        *self.index.write().expect("library index lock poisoned") = fresh;
        self.loaded.store(true, Ordering::Release);
        info!("indexed {count} probes under {}", self.root.display());
        Ok(())
    }

    fn walk_dir(&self, dir: &Path, index: &mut Index) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot read {}: {e}", dir.display());
                return Ok(());
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.walk_dir(&path, index)?;
            } else if is_probe_file(&path) {
                match self.index_file(&path) {
                    Ok(probe) => index.insert(probe),
                    Err(e) => debug!("skipping {}: {e}", path.display()),
                }
            }
        }
        Ok(())
    }

    fn collect_category_dirs(
        &self,
        dir: &Path,
        depth: usize,
        prefix: String,
        index: &mut Index,
    ) -> Result<()> {
        if depth >= MAX_CATEGORY_DEPTH {
            return Ok(());
        }
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let category = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}/{name}")
            };
            index.by_category.entry(category.clone()).or_default();
            self.collect_category_dirs(&path, depth + 1, category, index)?;
        }
        Ok(())
    }

    /// Reads the head of a file and extracts metadata. Files whose head does
    /// not parse are still indexed under their file stem so the operator can
    /// see and fix them.
    fn index_file(&self, path: &Path) -> Result<Probe> {
        let head = read_head(path, METADATA_HEAD_LINES)?;

        let meta = parser::parse_metadata(&head).unwrap_or_else(|e| {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unnamed")
                .to_string();
            debug!("metadata fallback for {}: {e}", path.display());
            parser::ParsedProbe {
                id: stem.clone(),
                name: stem,
                author: String::new(),
                severity: Severity::Info,
                description: String::new(),
                references: Vec::new(),
                tags: Vec::new(),
                requests: Vec::new(),
            }
        });

        let mtime = file_mtime(path);

        Ok(Probe {
            id: meta.id,
            name: meta.name,
            author: meta.author,
            severity: meta.severity,
            description: meta.description,
            references: meta.references,
            tags: meta.tags,
            category: self.category_from_path(path),
            content: String::new(),
            file_path: path.to_path_buf(),
            created_at: mtime,
            updated_at: mtime,
        })
    }

    /// Derives the category from the relative directory path, taking at most
    /// three segments. A file directly under the root has an empty category.
    fn category_from_path(&self, path: &Path) -> String {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return String::new();
        };
        let segments: Vec<&str> = rel
            .parent()
            .map(|p| {
                p.iter()
                    .filter_map(|s| s.to_str())
                    .take(MAX_CATEGORY_DEPTH)
                    .collect()
            })
            .unwrap_or_default();
        segments.join("/")
    }

    pub fn get_all(&self) -> Vec<Probe> {
        let index = self.index.read().expect("library index lock poisoned");
        let mut probes: Vec<Probe> = index.probes.values().cloned().collect();
        probes.sort_by(|a, b| a.id.cmp(&b.id));
        probes
    }

    pub fn count(&self) -> usize {
        self.index
            .read()
            .expect("library index lock poisoned")
            .probes
            .len()
    }

    /// Zero-indexed page over the id-sorted probe list, plus the total count.
    pub fn get_paginated(&self, page: usize, page_size: usize) -> (Vec<Probe>, usize) {
        let all = self.get_all();
        let total = all.len();
        let slice = all
            .into_iter()
            .skip(page.saturating_mul(page_size))
            .take(page_size)
            .collect();
        (slice, total)
    }

    /// Looks up a probe and loads its content from disk.
    pub fn get_by_id(&self, id: &str) -> Result<Probe> {
        let mut probe = {
            let index = self.index.read().expect("library index lock poisoned");
            index
                .probes
                .get(id)
                .cloned()
                .ok_or_else(|| VigilError::NotFound(format!("probe {id}")))?
        };

        if probe.content.is_empty() && !probe.file_path.as_os_str().is_empty() {
            probe.content = fs::read_to_string(&probe.file_path)?;
        }
        Ok(probe)
    }

    pub fn get_by_category(&self, category: &str) -> Vec<Probe> {
        let index = self.index.read().expect("library index lock poisoned");
        index
            .by_category
            .get(category)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| index.probes.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_by_severity(&self, severity: Severity) -> Vec<Probe> {
        let index = self.index.read().expect("library index lock poisoned");
        index
            .by_severity
            .get(severity.as_str())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| index.probes.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn categories_with_counts(&self) -> HashMap<String, usize> {
        let index = self.index.read().expect("library index lock poisoned");
        index
            .by_category
            .iter()
            .map(|(cat, ids)| (cat.clone(), ids.len()))
            .collect()
    }

    /// Writes a probe to disk and updates the index. The file write happens
    /// first; on IO failure the in-memory state is untouched.
    pub fn save(&self, mut probe: Probe) -> Result<Probe> {
        if !probe.category.is_empty() {
            validate_category_path(&probe.category)?;
        }

        if probe.file_path.as_os_str().is_empty() {
            let category_dir = if probe.category.is_empty() {
                crate::probe::DEFAULT_CATEGORY.to_string()
            } else {
                probe.category.clone()
            };
            let dir = self.root.join(&category_dir);
            fs::create_dir_all(&dir)?;
            probe.file_path = dir.join(format!("{}.yaml", probe.id));
            if probe.category.is_empty() {
                probe.category = category_dir;
            }
        }

        if probe.content.is_empty() {
            probe.content = parser::to_yaml(&probe)?;
        }

        probe.updated_at = Utc::now();

        let mut cached = probe.clone();
        cached.content = String::new();

        // Lock spans the file write and the index update; on IO failure the
        // index is untouched.
        let mut index = self.index.write().expect("library index lock poisoned");
        write_atomic(&probe.file_path, probe.content.as_bytes())?;
        index.insert(cached);
        Ok(probe)
    }

    /// Unlinks the probe file and drops it from the index.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut index = self.index.write().expect("library index lock poisoned");
        let probe = index
            .probes
            .get(id)
            .ok_or_else(|| VigilError::NotFound(format!("probe {id}")))?;

        if !probe.file_path.as_os_str().is_empty() {
            match fs::remove_file(&probe.file_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        index.remove(id);
        Ok(())
    }

    /// Creates an empty category directory and registers its index bucket.
    pub fn create_category(&self, path: &str) -> Result<()> {
        validate_category_path(path)?;

        let dir = self.root.join(path);
        if dir.exists() {
            return Err(VigilError::Conflict(format!("category {path} already exists")));
        }
        fs::create_dir_all(&dir)?;

        let mut index = self.index.write().expect("library index lock poisoned");
        index.by_category.entry(path.to_string()).or_default();
        Ok(())
    }

    /// Removes an empty category. The reserved uncategorized bucket and
    /// non-empty categories are refused.
    pub fn delete_category(&self, path: &str) -> Result<()> {
        if path.is_empty() || path == UNCATEGORIZED {
            return Err(VigilError::InvalidArgument(
                "this category cannot be deleted".into(),
            ));
        }

        let mut index = self.index.write().expect("library index lock poisoned");
        if index.by_category.get(path).map_or(false, |ids| !ids.is_empty()) {
            return Err(VigilError::Conflict(format!("category {path} is not empty")));
        }

        let dir = self.root.join(path);
        if dir.exists() {
            fs::remove_dir(&dir)?;
        }
        index.by_category.remove(path);
        Ok(())
    }

    /// Renames a category directory and rewrites every affected probe's
    /// category and file path in place.
    pub fn rename_category(&self, old: &str, new: &str) -> Result<()> {
        if old.is_empty() || old == UNCATEGORIZED {
            return Err(VigilError::InvalidArgument(
                "this category cannot be renamed".into(),
            ));
        }
        validate_category_path(new)?;

        let mut index = self.index.write().expect("library index lock poisoned");

        let old_dir = self.root.join(old);
        let new_dir = self.root.join(new);
        if !old_dir.exists() {
            return Err(VigilError::NotFound(format!("category {old}")));
        }
        if new_dir.exists() {
            return Err(VigilError::Conflict(format!("category {new} already exists")));
        }

        if let Some(parent) = new_dir.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&old_dir, &new_dir)?;

        if let Some(ids) = index.by_category.remove(old) {
            for id in &ids {
                if let Some(probe) = index.probes.get_mut(id) {
                    probe.category = new.to_string();
                    if let Ok(rel) = probe.file_path.strip_prefix(&old_dir) {
                        probe.file_path = new_dir.join(rel);
                    }
                }
            }
            index.by_category.insert(new.to_string(), ids);
        }

        // Nested buckets under the renamed path move with it.
        let nested: Vec<String> = index
            .by_category
            .keys()
            .filter(|k| k.starts_with(&format!("{old}/")))
            .cloned()
            .collect();
        for key in nested {
            let renamed = format!("{new}{}", &key[old.len()..]);
            if let Some(ids) = index.by_category.remove(&key) {
                for id in &ids {
                    if let Some(probe) = index.probes.get_mut(id) {
                        probe.category = renamed.clone();
                        if let Ok(rel) = probe.file_path.strip_prefix(&old_dir) {
                            probe.file_path = new_dir.join(rel);
                        }
                    }
                }
                index.by_category.insert(renamed, ids);
            }
        }

        Ok(())
    }

    /// Returns `name` if unused within the category, otherwise the first free
    /// `name_1` … `name_999` variant, falling back to a timestamp suffix.
    pub fn unique_name(&self, category: &str, name: &str) -> String {
        if !self.has_name(category, name) {
            return name.to_string();
        }

        for i in 1..1000 {
            let candidate = format!("{name}_{i}");
            if !self.has_name(category, &candidate) {
                return candidate;
            }
        }

        format!("{name}_{}", Utc::now().timestamp())
    }

    fn has_name(&self, category: &str, name: &str) -> bool {
        let key = if category.is_empty() {
            UNCATEGORIZED
        } else {
            category
        };
        let index = self.index.read().expect("library index lock poisoned");
        index
            .by_category
            .get(key)
            .map_or(false, |ids| {
                ids.iter()
                    .filter_map(|id| index.probes.get(id))
                    .any(|p| p.name == name)
            })
    }
}

fn is_probe_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn read_head(path: &Path, max_lines: usize) -> Result<String> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = Vec::with_capacity(max_lines);
    for line in reader.lines().take(max_lines) {
        lines.push(line?);
    }
    Ok(lines.join("\n"))
}

fn file_mtime(path: &Path) -> DateTime<Utc> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

/// Write-then-rename so readers never observe a half-written probe.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let mut tmp_name = std::ffi::OsString::from(".");
            tmp_name.push(name);
            tmp_name.push(".tmp");
            parent.join(tmp_name)
        }
        _ => {
            return Err(VigilError::InvalidArgument(format!(
                "bad probe path: {}",
                path.display()
            )))
        }
    };

    fs::write(&tmp, bytes)?;
    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e.into())
        }
    }
}
