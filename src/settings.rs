//! Application settings persistence
//!
//! A small JSON document at `<home>/.vigil/settings.json`. A missing file
//! yields defaults; saving creates the directory.

use crate::error::Result;
use crate::models::Settings;
use directories::UserDirs;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = ".vigil";
const SETTINGS_FILE: &str = "settings.json";

/// Per-user application directory, `<home>/.vigil`.
pub fn app_dir() -> PathBuf {
    UserDirs::new()
        .map(|dirs| dirs.home_dir().join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(APP_DIR))
}

pub fn settings_path() -> PathBuf {
    app_dir().join(SETTINGS_FILE)
}

pub fn default_templates_dir() -> PathBuf {
    app_dir().join("templates")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            timeout: 30,
            rate_limit: 100,
            bulk_size: 25,
            templates_dir: default_templates_dir(),
            proxy_url: String::new(),
            headless: false,
        }
    }
}

/// Loads settings from the well-known location.
pub fn load() -> Result<Settings> {
    load_from(&settings_path())
}

/// Loads settings from an explicit path; absence yields defaults.
pub fn load_from(path: &Path) -> Result<Settings> {
    match fs::read_to_string(path) {
        Ok(data) => Ok(serde_json::from_str(&data)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
        Err(e) => Err(e.into()),
    }
}

/// Persists settings to the well-known location.
pub fn save(settings: &Settings) -> Result<()> {
    save_to(settings, &settings_path())
}

pub fn save_to(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}
