//! Probe import: single documents and folder batches

use crate::error::{Result, VigilError};
use crate::models::Probe;
use crate::probe::{parser, sanitize_segment, Library, DEFAULT_CATEGORY, MAX_CATEGORY_DEPTH};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outcome of a folder import; failures never abort the batch.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ImportReport {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Imports one probe document into the library.
///
/// Category resolution: explicit parameter, then the probe's own category,
/// then [`DEFAULT_CATEGORY`]. Name collisions within the category are
/// resolved by renaming, and the stored text is rewritten so the on-disk
/// document reflects both the new name and the freshly assigned id.
pub fn import_probe(library: &Library, content: &str, category: Option<&str>) -> Result<Probe> {
    let parsed = parser::parse(content)?;

    let category = match category {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => DEFAULT_CATEGORY.to_string(),
    };

    let id = uuid::Uuid::new_v4().to_string();

    let name = if parsed.name.is_empty() {
        parsed.id.clone()
    } else {
        parsed.name.clone()
    };
    let unique = library.unique_name(&category, &name);
    if unique != name {
        info!("renaming imported probe {name:?} to {unique:?}");
    }

    let content = parser::rewrite_identity(content, Some(&id), Some(&unique))?;

    let now = Utc::now();
    let probe = Probe {
        id,
        name: unique,
        author: parsed.author,
        severity: parsed.severity,
        description: parsed.description,
        references: parsed.references,
        tags: parsed.tags,
        category,
        content,
        file_path: PathBuf::new(),
        created_at: now,
        updated_at: now,
    };

    library.save(probe)
}

/// Recursively imports every `.yaml`/`.yml` under `folder`, deriving each
/// probe's category from its sub-path relative to the import root. Files
/// directly under the root land in a category named after the folder itself.
pub fn import_folder(library: &Library, folder: &Path) -> Result<ImportReport> {
    let meta = fs::metadata(folder)
        .map_err(|_| VigilError::NotFound(format!("folder {}", folder.display())))?;
    if !meta.is_dir() {
        return Err(VigilError::InvalidArgument(format!(
            "{} is not a folder",
            folder.display()
        )));
    }

    let mut report = ImportReport::default();
    import_dir(library, folder, folder, &mut report);
    info!(
        "folder import finished: {} imported, {} failed",
        report.success, report.failed
    );
    Ok(report)
}

fn import_dir(library: &Library, root: &Path, dir: &Path, report: &mut ImportReport) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cannot read {}: {e}", dir.display());
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            import_dir(library, root, &path, report);
            continue;
        }

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);
        if !is_yaml {
            continue;
        }

        let file_label = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("<unnamed>")
            .to_string();

        let category = category_for(root, &path);
        if let Err(e) = library.create_category(&category) {
            // An existing category is fine; anything else fails the file.
            if !matches!(e, VigilError::Conflict(_)) {
                report.failed += 1;
                report.errors.push(format!("{file_label}: {e}"));
                continue;
            }
        }

        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                report.failed += 1;
                report.errors.push(format!("{file_label}: {e}"));
                continue;
            }
        };

        match import_probe(library, &content, Some(&category)) {
            Ok(_) => report.success += 1,
            Err(e) => {
                report.failed += 1;
                report.errors.push(format!("{file_label}: {e}"));
            }
        }
    }
}

/// Category for an imported file: its sanitized sub-path under the import
/// root, or the root folder's own basename for top-level files.
fn category_for(root: &Path, file: &Path) -> String {
    let fallback = || {
        sanitize_segment(
            root.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("imported"),
        )
    };

    let Ok(rel) = file.strip_prefix(root) else {
        return fallback();
    };

    let segments: Vec<String> = rel
        .parent()
        .map(|p| {
            p.iter()
                .filter_map(|s| s.to_str())
                .map(sanitize_segment)
                .filter(|s| !s.is_empty())
                .take(MAX_CATEGORY_DEPTH)
                .collect()
        })
        .unwrap_or_default();

    if segments.is_empty() {
        let name = fallback();
        if name.is_empty() {
            "imported".to_string()
        } else {
            name
        }
    } else {
        segments.join("/")
    }
}
