//! Probe model, parser, and filesystem-backed library

pub mod import;
pub mod library;
pub mod parser;

pub use import::{import_folder, import_probe, ImportReport};
pub use library::Library;
pub use parser::{parse, parse_metadata, to_yaml, Matcher, MatcherKind, ParsedProbe, RequestSpec};

use crate::error::{Result, VigilError};

/// Reserved category for probes directly under the library root.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Category assigned when neither the caller nor the probe names one.
pub const DEFAULT_CATEGORY: &str = "custom";

/// Maximum number of slash-delimited category segments.
pub const MAX_CATEGORY_DEPTH: usize = 3;

const INVALID_SEGMENT_CHARS: &[char] = &['\\', ':', '*', '?', '"', '<', '>', '|'];

/// Validates a slash-delimited category path: at most three segments, each
/// non-empty and free of filesystem-hostile characters.
pub fn validate_category_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(VigilError::InvalidArgument(
            "category name must not be empty".into(),
        ));
    }

    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() > MAX_CATEGORY_DEPTH {
        return Err(VigilError::InvalidArgument(format!(
            "category supports at most {} levels, got {}",
            MAX_CATEGORY_DEPTH,
            segments.len()
        )));
    }

    for (i, segment) in segments.iter().enumerate() {
        let trimmed = segment.trim();
        if trimmed.is_empty() {
            return Err(VigilError::InvalidArgument(format!(
                "category segment {} is empty",
                i + 1
            )));
        }
        if trimmed.contains(INVALID_SEGMENT_CHARS) {
            return Err(VigilError::InvalidArgument(format!(
                "category segment {} contains an invalid character (one of \\ : * ? \" < > |)",
                i + 1
            )));
        }
    }

    Ok(())
}

/// Replaces filesystem-hostile characters in a single segment with `_`.
/// Used by folder import, which accepts arbitrary directory names.
pub fn sanitize_segment(segment: &str) -> String {
    segment
        .trim()
        .chars()
        .map(|c| {
            if INVALID_SEGMENT_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}
