//! Integration tests for the operator façade

use tempfile::TempDir;
use vigil::api::App;
use vigil::models::{Probe, Settings, Severity};
use vigil::probe::Library;
use vigil::scan::Orchestrator;

fn fresh_app() -> (App, TempDir) {
    let dir = TempDir::new().unwrap();
    let app = App::new(
        Library::open_eager(dir.path()).unwrap(),
        Orchestrator::new(),
    );
    (app, dir)
}

fn draft_probe(name: &str, category: &str, severity: Severity) -> Probe {
    let now = chrono::Utc::now();
    Probe {
        id: String::new(),
        name: name.into(),
        author: "tester".into(),
        severity,
        description: "a draft".into(),
        references: vec!["https://example.com/ref".into()],
        tags: vec!["draft".into()],
        category: category.into(),
        content: String::new(),
        file_path: Default::default(),
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn create_get_update_delete_cycle() {
    let (app, _dir) = fresh_app();

    let created = app
        .create(draft_probe("Cycle", "web", Severity::Medium))
        .unwrap();
    assert!(!created.id.is_empty());
    assert!(created.file_path.exists());

    let fetched = app.get(&created.id).unwrap();
    assert_eq!(fetched.name, "Cycle");
    assert!(!fetched.content.is_empty());

    let mut edit = fetched.clone();
    edit.description = "updated".into();
    app.update(edit).unwrap();

    assert!(app
        .update(draft_probe("Ghost", "web", Severity::Low))
        .is_err());

    app.delete(&created.id).unwrap();
    assert!(app.get(&created.id).is_err());
}

#[test]
fn create_validates_and_reidentifies_provided_content() {
    let (app, _dir) = fresh_app();

    let mut draft = draft_probe("WithBody", "web", Severity::High);
    draft.content = r#"id: wire-id
info:
  name: WithBody
  severity: high

http:
  - method: GET
    path:
      - "{{BaseURL}}/x"
    matchers:
      - type: status
        status: [200]
"#
    .to_string();

    let created = app.create(draft).unwrap();
    let parsed = vigil::probe::parse(&created.content).unwrap();
    assert_eq!(parsed.id, created.id);

    let mut invalid = draft_probe("Bad", "web", Severity::Low);
    invalid.content = "id: bad\nhttp:\n  - matchers:\n      - type: nope\n".into();
    assert!(app.create(invalid).is_err());
}

#[test]
fn export_round_trips_through_import() {
    let (app, _dir) = fresh_app();

    let created = app
        .create(draft_probe("Exportable", "c1", Severity::Low))
        .unwrap();
    let text = app.export(&created.id).unwrap();

    let imported = app.import(&text, Some("c1")).unwrap();
    assert_ne!(imported.id, created.id);
    // Same category plus an existing "Exportable" forces the _1 suffix.
    assert_eq!(imported.name, "Exportable_1");
    assert_eq!(imported.severity, created.severity);

    let elsewhere = app.import(&text, Some("c2")).unwrap();
    assert_eq!(elsewhere.name, "Exportable");
}

#[test]
fn search_filters_by_query_category_and_severity() {
    let (app, _dir) = fresh_app();
    app.create(draft_probe("Apache RCE", "web", Severity::Critical))
        .unwrap();
    app.create(draft_probe("Nginx Disclosure", "web", Severity::Low))
        .unwrap();
    app.create(draft_probe("Redis Probe", "services", Severity::Critical))
        .unwrap();

    assert_eq!(app.search("apache", None, None).len(), 1);
    assert_eq!(app.search("", Some("web"), None).len(), 2);
    assert_eq!(app.search("", None, Some(Severity::Critical)).len(), 2);
    assert_eq!(
        app.search("redis", Some("services"), Some(Severity::Critical))
            .len(),
        1
    );
    assert!(app.search("nothing-here", None, None).is_empty());
}

#[test]
fn validate_reports_diagnostics_without_storing() {
    let (app, _dir) = fresh_app();

    assert!(app.validate("id: ok\ninfo:\n  name: Ok\n").is_ok());
    let err = app.validate("info:\n  name: missing\n").unwrap_err();
    assert!(err.to_string().contains("id"));
    assert_eq!(app.probe_count(), 0);
}

#[test]
fn stats_aggregate_categories_and_severities() {
    let (app, _dir) = fresh_app();
    app.create(draft_probe("One", "web", Severity::High)).unwrap();
    app.create(draft_probe("Two", "web", Severity::High)).unwrap();
    app.create(draft_probe("Three", "services", Severity::Info))
        .unwrap();

    let stats = app.stats();
    assert_eq!(stats.total_probes, 3);
    assert_eq!(stats.total_scans, 0);
    assert_eq!(stats.by_category.get("web"), Some(&2));
    assert_eq!(stats.by_category.get("services"), Some(&1));
    assert_eq!(stats.by_severity.get("high"), Some(&2));
    assert_eq!(stats.by_severity.get("info"), Some(&1));
}

#[test]
fn reload_templates_swaps_the_library() {
    let (app, _dir) = fresh_app();
    app.create(draft_probe("Old", "web", Severity::Low)).unwrap();
    assert_eq!(app.probe_count(), 1);

    let other = TempDir::new().unwrap();
    app.reload_templates(other.path()).unwrap();
    assert_eq!(app.templates_dir(), other.path());

    assert!(app
        .reload_templates(std::path::Path::new("/no/such/dir"))
        .is_err());
}

#[test]
fn settings_defaults_match_documented_values() {
    let settings = Settings::default();
    assert_eq!(settings.concurrency, 10);
    assert_eq!(settings.timeout, 30);
    assert_eq!(settings.rate_limit, 100);
    assert_eq!(settings.bulk_size, 25);
    assert!(settings.templates_dir.ends_with(".vigil/templates"));

    let options = settings.scan_options();
    assert_eq!(options.concurrency, 10);
    assert!(options.proxy_url.is_none());
}
