//! Integration tests for the probe library

use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use vigil::models::{Probe, Severity};
use vigil::probe::Library;

fn probe_yaml(id: &str, name: &str, severity: &str) -> String {
    format!(
        r#"id: {id}
info:
  name: {name}
  author: tester
  severity: {severity}
  tags: test

http:
  - method: GET
    path:
      - "{{{{BaseURL}}}}/"
    matchers:
      - type: status
        status:
          - 200
"#
    )
}

fn seed_file(root: &std::path::Path, rel_dir: &str, id: &str, severity: &str) {
    let dir = if rel_dir.is_empty() {
        root.to_path_buf()
    } else {
        root.join(rel_dir)
    };
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(format!("{id}.yaml")),
        probe_yaml(id, &format!("Probe {id}"), severity),
    )
    .unwrap();
}

fn open(root: &std::path::Path) -> Arc<Library> {
    Library::open_eager(root).expect("library open failed")
}

#[test]
fn indexes_probes_with_categories_from_paths() {
    let dir = TempDir::new().unwrap();
    seed_file(dir.path(), "", "root-probe", "info");
    seed_file(dir.path(), "web/sqli", "sqli-probe", "high");
    seed_file(dir.path(), "web/sqli/union", "union-probe", "critical");

    let library = open(dir.path());
    assert!(library.is_loaded());
    assert_eq!(library.count(), 3);

    let root_probe = library.get_by_id("root-probe").unwrap();
    assert_eq!(root_probe.category, "");
    assert_eq!(root_probe.display_category(), "uncategorized");

    let sqli = library.get_by_id("sqli-probe").unwrap();
    assert_eq!(sqli.category, "web/sqli");
    assert_eq!(sqli.severity, Severity::High);

    assert_eq!(library.get_by_category("web/sqli").len(), 1);
    assert_eq!(library.get_by_category("web/sqli/union").len(), 1);
    assert_eq!(library.get_by_severity(Severity::Critical).len(), 1);
}

#[test]
fn metadata_cache_stays_light_and_content_loads_on_demand() {
    let dir = TempDir::new().unwrap();
    seed_file(dir.path(), "web", "lazy-probe", "low");

    let library = open(dir.path());
    let listed = &library.get_all()[0];
    assert!(listed.content.is_empty(), "listing must not carry content");

    let loaded = library.get_by_id("lazy-probe").unwrap();
    assert!(loaded.content.contains("id: lazy-probe"));
    assert!(loaded.file_path.exists());
}

#[test]
fn unparseable_head_falls_back_to_file_stem() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("broken.yaml"), ": not yaml at all [").unwrap();

    let library = open(dir.path());
    let probe = library.get_by_id("broken").unwrap();
    assert_eq!(probe.name, "broken");
    assert_eq!(probe.severity, Severity::Info);
}

#[test]
fn save_writes_file_and_keeps_indices_consistent() {
    let dir = TempDir::new().unwrap();
    let library = open(dir.path());

    let now = chrono::Utc::now();
    let probe = Probe {
        id: "saved-probe".into(),
        name: "Saved".into(),
        author: "tester".into(),
        severity: Severity::Medium,
        description: String::new(),
        references: vec![],
        tags: vec![],
        category: "web/auth".into(),
        content: probe_yaml("saved-probe", "Saved", "medium"),
        file_path: Default::default(),
        created_at: now,
        updated_at: now,
    };

    let saved = library.save(probe).unwrap();
    assert!(saved.file_path.ends_with("web/auth/saved-probe.yaml"));
    assert!(saved.file_path.exists());

    assert_eq!(library.get_by_category("web/auth").len(), 1);
    assert_eq!(library.get_by_severity(Severity::Medium).len(), 1);

    // Severity change moves the severity bucket.
    let mut updated = library.get_by_id("saved-probe").unwrap();
    updated.severity = Severity::High;
    updated.content = probe_yaml("saved-probe", "Saved", "high");
    library.save(updated).unwrap();

    assert!(library.get_by_severity(Severity::Medium).is_empty());
    assert_eq!(library.get_by_severity(Severity::High).len(), 1);
    assert_eq!(library.count(), 1);
}

#[test]
fn save_without_category_defaults_to_custom() {
    let dir = TempDir::new().unwrap();
    let library = open(dir.path());

    let now = chrono::Utc::now();
    let probe = Probe {
        id: "floating".into(),
        name: "Floating".into(),
        author: String::new(),
        severity: Severity::Info,
        description: String::new(),
        references: vec![],
        tags: vec![],
        category: String::new(),
        content: String::new(),
        file_path: Default::default(),
        created_at: now,
        updated_at: now,
    };

    let saved = library.save(probe).unwrap();
    assert_eq!(saved.category, "custom");
    assert!(saved.file_path.ends_with("custom/floating.yaml"));
    // Generated content must itself parse back to the same probe.
    let reparsed = vigil::probe::parse(&saved.content).unwrap();
    assert_eq!(reparsed.id, "floating");
}

#[test]
fn delete_removes_file_and_index_entries() {
    let dir = TempDir::new().unwrap();
    seed_file(dir.path(), "web", "doomed", "low");

    let library = open(dir.path());
    let path = library.get_by_id("doomed").unwrap().file_path;

    library.delete("doomed").unwrap();
    assert!(!path.exists());
    assert!(library.get_by_id("doomed").is_err());
    assert!(library.get_by_category("web").is_empty());
    assert!(library.get_by_severity(Severity::Low).is_empty());

    assert!(library.delete("doomed").is_err());
}

#[test]
fn category_lifecycle() {
    let dir = TempDir::new().unwrap();
    let library = open(dir.path());

    library.create_category("web/sqli").unwrap();
    assert!(dir.path().join("web/sqli").is_dir());
    assert!(library.categories_with_counts().contains_key("web/sqli"));

    // Duplicate creation conflicts; invalid paths are rejected.
    assert!(library.create_category("web/sqli").is_err());
    assert!(library.create_category("a/b/c/d").is_err());
    assert!(library.create_category("bad:name").is_err());

    library.delete_category("web/sqli").unwrap();
    assert!(!dir.path().join("web/sqli").exists());
    assert!(!library.categories_with_counts().contains_key("web/sqli"));
}

#[test]
fn delete_category_refuses_non_empty_and_reserved() {
    let dir = TempDir::new().unwrap();
    seed_file(dir.path(), "web", "occupant", "info");

    let library = open(dir.path());
    assert!(library.delete_category("web").is_err());
    assert!(library.delete_category("uncategorized").is_err());

    library.delete("occupant").unwrap();
    library.delete_category("web").unwrap();
}

#[test]
fn rename_category_moves_directory_and_rewrites_probes() {
    let dir = TempDir::new().unwrap();
    seed_file(dir.path(), "web/sqli", "mover", "high");

    let library = open(dir.path());
    library
        .rename_category("web/sqli", "webapp/sql-injection")
        .unwrap();

    assert!(library.get_by_category("web/sqli").is_empty());
    let moved = library.get_by_category("webapp/sql-injection");
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].id, "mover");

    let probe = library.get_by_id("mover").unwrap();
    assert_eq!(probe.category, "webapp/sql-injection");
    assert!(probe
        .file_path
        .starts_with(dir.path().join("webapp/sql-injection")));
    assert!(probe.file_path.exists());

    // Renaming back restores the original state.
    library
        .rename_category("webapp/sql-injection", "web/sqli")
        .unwrap();
    let back = library.get_by_id("mover").unwrap();
    assert_eq!(back.category, "web/sqli");
    assert!(back.file_path.exists());
}

#[test]
fn rename_category_conflicts_and_missing_sources_fail() {
    let dir = TempDir::new().unwrap();
    let library = open(dir.path());
    library.create_category("a").unwrap();
    library.create_category("b").unwrap();

    assert!(library.rename_category("a", "b").is_err());
    assert!(library.rename_category("ghost", "c").is_err());
    assert!(library.rename_category("a", "x/y/z/w").is_err());
}

#[test]
fn unique_name_appends_numeric_suffixes() {
    let dir = TempDir::new().unwrap();
    seed_file(dir.path(), "c1", "p1", "info");

    let library = open(dir.path());
    // Seeded file's name is "Probe p1".
    assert_eq!(library.unique_name("c1", "Probe p1"), "Probe p1_1");
    assert_eq!(library.unique_name("c1", "Fresh"), "Fresh");
    assert_eq!(library.unique_name("empty-cat", "Probe p1"), "Probe p1");
}

#[test]
fn pagination_slices_the_sorted_listing() {
    let dir = TempDir::new().unwrap();
    for i in 0..7 {
        seed_file(dir.path(), "bulk", &format!("probe-{i}"), "info");
    }

    let library = open(dir.path());
    let (page0, total) = library.get_paginated(0, 3);
    assert_eq!(total, 7);
    assert_eq!(page0.len(), 3);
    assert_eq!(page0[0].id, "probe-0");

    let (page2, _) = library.get_paginated(2, 3);
    assert_eq!(page2.len(), 1);

    let (beyond, _) = library.get_paginated(9, 3);
    assert!(beyond.is_empty());
}

#[tokio::test]
async fn background_load_publishes_eventually() {
    let dir = TempDir::new().unwrap();
    seed_file(dir.path(), "web", "bg-probe", "info");

    let library = Library::new(dir.path()).unwrap();
    for _ in 0..100 {
        if library.is_loaded() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(library.is_loaded());
    assert_eq!(library.count(), 1);
}

#[tokio::test]
async fn concurrent_saves_and_deletes_keep_indices_consistent() {
    let dir = TempDir::new().unwrap();
    seed_file(dir.path(), "old", "stale-0", "info");
    seed_file(dir.path(), "old", "stale-1", "info");

    let library = open(dir.path());
    let mut handles = Vec::new();

    for i in 0..8 {
        let library = Arc::clone(&library);
        handles.push(tokio::task::spawn_blocking(move || {
            let now = chrono::Utc::now();
            library
                .save(Probe {
                    id: format!("fresh-{i}"),
                    name: format!("Fresh {i}"),
                    author: String::new(),
                    severity: Severity::Info,
                    description: String::new(),
                    references: vec![],
                    tags: vec![],
                    category: "new".into(),
                    content: String::new(),
                    file_path: Default::default(),
                    created_at: now,
                    updated_at: now,
                })
                .unwrap();
        }));
    }
    for i in 0..2 {
        let library = Arc::clone(&library);
        handles.push(tokio::task::spawn_blocking(move || {
            library.delete(&format!("stale-{i}")).unwrap();
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    // 2 initial + 8 created - 2 deleted
    assert_eq!(library.count(), 8);
    assert_eq!(library.get_by_category("new").len(), 8);
    assert!(library.get_by_category("old").is_empty());

    // Index agrees with a fresh walk of the directory tree.
    let reopened = open(dir.path());
    assert_eq!(reopened.count(), 8);
}
