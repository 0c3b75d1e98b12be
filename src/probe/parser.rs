//! Declarative probe parser
//!
//! Parses Nuclei-compatible YAML probes into a typed model. The same parse
//! feeds both the library (metadata indexing) and the scan engine (request
//! specs), so there is exactly one YAML reader in the codebase.
//!
//! Supports: id, info block, http/requests protocol with structured or raw
//! requests, and status/word/regex/binary/dsl matchers.
//! Does NOT support: extractor chains, workflows, dns/tcp/code protocols.

use crate::error::{Result, VigilError};
use crate::models::Severity;
use serde::{Deserialize, Serialize};

/// Combination rule for matcher value lists and matcher lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    And,
    Or,
}

impl Condition {
    fn from_opt(s: Option<&str>) -> Condition {
        match s {
            Some(v) if v.eq_ignore_ascii_case("and") => Condition::And,
            _ => Condition::Or,
        }
    }
}

/// Response slice a matcher inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    StatusCode,
    Header,
    Body,
    All,
}

impl Part {
    fn from_opt(s: Option<&str>, default: Part) -> Result<Part> {
        match s {
            None => Ok(default),
            Some("status_code") => Ok(Part::StatusCode),
            Some("header") => Ok(Part::Header),
            Some("body") => Ok(Part::Body),
            Some("all") => Ok(Part::All),
            Some(other) => Err(VigilError::Parse(format!("unknown matcher part: {other}"))),
        }
    }
}

/// The tagged variant of a matcher, with its value list
#[derive(Debug, Clone)]
pub enum MatcherKind {
    Status(Vec<u16>),
    Word(Vec<String>),
    Regex(Vec<String>),
    Binary(Vec<String>),
    Dsl(Vec<String>),
}

/// A boolean predicate over an HTTP response
#[derive(Debug, Clone)]
pub struct Matcher {
    pub kind: MatcherKind,
    pub part: Part,
    pub condition: Condition,
    /// Inverts the final per-matcher verdict
    pub negative: bool,
}

/// One HTTP request inside a probe
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: String,
    /// Templated paths; placeholders `{{BaseURL}}`, `{{RootURL}}`,
    /// `{{Hostname}}` are substituted at dispatch time.
    pub paths: Vec<String>,
    /// Ordered, as written in the probe
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Verbatim request template; when present the structured fields above
    /// are ignored.
    pub raw: Option<String>,
    pub matchers: Vec<Matcher>,
    pub matchers_condition: Condition,
}

/// Fully parsed probe document
#[derive(Debug, Clone)]
pub struct ParsedProbe {
    pub id: String,
    pub name: String,
    pub author: String,
    pub severity: Severity,
    pub description: String,
    pub references: Vec<String>,
    pub tags: Vec<String>,
    pub requests: Vec<RequestSpec>,
}

/// A YAML scalar that may be a single string or a list of strings
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    Single(String),
    List(Vec<String>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::Single(s) => vec![s],
            StringOrList::List(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawProbe {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    info: RawInfo,
    #[serde(default)]
    http: Option<Vec<RawRequest>>,
    /// Legacy alias for `http`
    #[serde(default)]
    requests: Option<Vec<RawRequest>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    reference: Option<StringOrList>,
    #[serde(default)]
    tags: Option<StringOrList>,
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    path: Option<StringOrList>,
    #[serde(default)]
    raw: Option<StringOrList>,
    #[serde(default)]
    headers: Option<serde_yaml::Mapping>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    matchers: Option<Vec<RawMatcher>>,
    #[serde(default, rename = "matchers-condition")]
    matchers_condition: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMatcher {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    part: Option<String>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    negative: bool,
    #[serde(default)]
    words: Option<Vec<String>>,
    #[serde(default)]
    status: Option<Vec<u16>>,
    #[serde(default)]
    regex: Option<Vec<String>>,
    #[serde(default)]
    binary: Option<Vec<String>>,
    #[serde(default)]
    dsl: Option<Vec<String>>,
}

/// Parses a complete probe document, including request specs and matchers.
/// Pure; performs no I/O.
pub fn parse(content: &str) -> Result<ParsedProbe> {
    let raw: RawProbe =
        serde_yaml::from_str(content).map_err(|e| VigilError::Parse(format!("invalid YAML: {e}")))?;

    let mut probe = metadata_from_raw(raw.id, raw.info)?;

    let entries = raw.http.or(raw.requests).unwrap_or_default();
    probe.requests = entries
        .into_iter()
        .map(convert_request)
        .collect::<Result<Vec<_>>>()?;

    Ok(probe)
}

/// Parses only `id` and the `info` block, ignoring the request section
/// entirely. Used by the library's background indexer, which reads just the
/// head of each file.
pub fn parse_metadata(content: &str) -> Result<ParsedProbe> {
    #[derive(Deserialize)]
    struct MetaOnly {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        info: RawInfo,
    }

    let raw: MetaOnly =
        serde_yaml::from_str(content).map_err(|e| VigilError::Parse(format!("invalid YAML: {e}")))?;
    metadata_from_raw(raw.id, raw.info)
}

fn metadata_from_raw(id: Option<String>, info: RawInfo) -> Result<ParsedProbe> {
    let id = match id {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            return Err(VigilError::Parse(
                "probe is missing the required id field".into(),
            ))
        }
    };

    let severity = info
        .severity
        .as_deref()
        .map(|s| s.parse().unwrap_or_default())
        .unwrap_or_default();

    Ok(ParsedProbe {
        id,
        name: info.name,
        author: info.author,
        severity,
        description: info.description,
        references: info.reference.map(StringOrList::into_vec).unwrap_or_default(),
        tags: normalize_tags(info.tags),
        requests: Vec::new(),
    })
}

/// Flattens a comma-delimited scalar or a list into a trimmed, de-duplicated
/// set of non-empty tags.
fn normalize_tags(tags: Option<StringOrList>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let items = match tags {
        None => return out,
        Some(t) => t.into_vec(),
    };
    for item in items {
        for tag in item.split(',') {
            let tag = tag.trim();
            if !tag.is_empty() && !out.iter().any(|t| t == tag) {
                out.push(tag.to_string());
            }
        }
    }
    out
}

fn convert_request(raw: RawRequest) -> Result<RequestSpec> {
    let matchers = raw
        .matchers
        .unwrap_or_default()
        .into_iter()
        .map(convert_matcher)
        .collect::<Result<Vec<_>>>()?;

    let matchers_condition = Condition::from_opt(raw.matchers_condition.as_deref());

    if let Some(raw_block) = raw.raw {
        return Ok(RequestSpec {
            method: String::new(),
            paths: Vec::new(),
            headers: Vec::new(),
            body: None,
            raw: Some(raw_block.into_vec().join("\n")),
            matchers,
            matchers_condition,
        });
    }

    let method = raw
        .method
        .map(|m| m.trim().to_uppercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "GET".to_string());

    let mut paths = raw.path.map(StringOrList::into_vec).unwrap_or_default();
    if paths.is_empty() {
        paths.push("/".to_string());
    }

    let headers = raw
        .headers
        .map(|m| {
            m.into_iter()
                .filter_map(|(k, v)| {
                    let key = k.as_str()?.to_string();
                    let value = yaml_scalar_to_string(&v)?;
                    Some((key, value))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(RequestSpec {
        method,
        paths,
        headers,
        body: raw.body,
        raw: None,
        matchers,
        matchers_condition,
    })
}

fn yaml_scalar_to_string(v: &serde_yaml::Value) -> Option<String> {
    match v {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn convert_matcher(raw: RawMatcher) -> Result<Matcher> {
    let (kind, default_part) = match raw.kind.as_str() {
        "status" => (
            MatcherKind::Status(raw.status.ok_or_else(|| {
                VigilError::Parse("status matcher is missing the status list".into())
            })?),
            Part::StatusCode,
        ),
        "word" => (
            MatcherKind::Word(raw.words.ok_or_else(|| {
                VigilError::Parse("word matcher is missing the words list".into())
            })?),
            Part::Body,
        ),
        "regex" => (
            MatcherKind::Regex(raw.regex.ok_or_else(|| {
                VigilError::Parse("regex matcher is missing the regex list".into())
            })?),
            Part::Body,
        ),
        "binary" => (
            MatcherKind::Binary(raw.binary.ok_or_else(|| {
                VigilError::Parse("binary matcher is missing the binary list".into())
            })?),
            Part::Body,
        ),
        "dsl" => (
            MatcherKind::Dsl(raw.dsl.ok_or_else(|| {
                VigilError::Parse("dsl matcher is missing the dsl list".into())
            })?),
            Part::All,
        ),
        other => {
            return Err(VigilError::Parse(format!(
                "unknown matcher type: {other}"
            )))
        }
    };

    Ok(Matcher {
        kind,
        part: Part::from_opt(raw.part.as_deref(), default_part)?,
        condition: Condition::from_opt(raw.condition.as_deref()),
        negative: raw.negative,
    })
}

#[derive(Serialize)]
struct DocOut<'a> {
    id: &'a str,
    info: InfoOut<'a>,
}

#[derive(Serialize)]
struct InfoOut<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    author: &'a str,
    severity: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'a str,
    #[serde(skip_serializing_if = "String::is_empty")]
    tags: String,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    reference: &'a [String],
}

/// Serializes probe metadata back to YAML. When the probe already carries
/// raw content, that content is authoritative and returned unchanged.
pub fn to_yaml(probe: &crate::models::Probe) -> Result<String> {
    if !probe.content.is_empty() {
        return Ok(probe.content.clone());
    }

    let doc = DocOut {
        id: &probe.id,
        info: InfoOut {
            name: &probe.name,
            author: &probe.author,
            severity: probe.severity.as_str(),
            description: &probe.description,
            tags: probe.tags.join(","),
            reference: &probe.references,
        },
    };

    Ok(serde_yaml::to_string(&doc)?)
}

/// Rewrites `id` and/or `info.name` inside existing probe text, preserving
/// every other field. Formatting may change; semantics do not.
pub fn rewrite_identity(content: &str, id: Option<&str>, name: Option<&str>) -> Result<String> {
    let mut doc: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| VigilError::Parse(format!("invalid YAML: {e}")))?;

    let mapping = doc
        .as_mapping_mut()
        .ok_or_else(|| VigilError::Parse("probe document is not a mapping".into()))?;

    if let Some(id) = id {
        mapping.insert("id".into(), serde_yaml::Value::String(id.to_string()));
    }

    if let Some(name) = name {
        let info = mapping
            .entry("info".into())
            .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
        if let Some(info) = info.as_mapping_mut() {
            info.insert("name".into(), serde_yaml::Value::String(name.to_string()));
        }
    }

    Ok(serde_yaml::to_string(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
id: exposed-panel
info:
  name: Exposed Admin Panel
  author: vigil
  severity: high
  description: Detects an exposed admin panel
  reference:
    - https://example.com/advisory
  tags: panel,exposure

http:
  - method: GET
    path:
      - "{{BaseURL}}/admin"
      - "{{BaseURL}}/admin/login"
    headers:
      X-Probe: "1"
    matchers-condition: and
    matchers:
      - type: status
        status:
          - 200
      - type: word
        part: body
        condition: and
        words:
          - "Admin"
          - "Login"
"#;

    #[test]
    fn parses_full_probe() {
        let probe = parse(SAMPLE).expect("parse failed");
        assert_eq!(probe.id, "exposed-panel");
        assert_eq!(probe.name, "Exposed Admin Panel");
        assert_eq!(probe.severity, Severity::High);
        assert_eq!(probe.tags, vec!["panel", "exposure"]);
        assert_eq!(probe.references.len(), 1);
        assert_eq!(probe.requests.len(), 1);

        let req = &probe.requests[0];
        assert_eq!(req.method, "GET");
        assert_eq!(req.paths.len(), 2);
        assert_eq!(req.headers, vec![("X-Probe".to_string(), "1".to_string())]);
        assert_eq!(req.matchers_condition, Condition::And);
        assert_eq!(req.matchers.len(), 2);
        assert!(matches!(req.matchers[0].kind, MatcherKind::Status(_)));
        assert_eq!(req.matchers[1].condition, Condition::And);
    }

    #[test]
    fn missing_id_is_a_hard_failure() {
        let err = parse("info:\n  name: nameless\n").unwrap_err();
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn unknown_matcher_type_fails_with_diagnostic() {
        let doc = r#"
id: t
http:
  - method: GET
    matchers:
      - type: xpath
        words: ["x"]
"#;
        let err = parse(doc).unwrap_err();
        assert!(err.to_string().contains("xpath"));
    }

    #[test]
    fn matcher_missing_value_list_fails() {
        let doc = r#"
id: t
http:
  - method: GET
    matchers:
      - type: word
"#;
        let err = parse(doc).unwrap_err();
        assert!(err.to_string().contains("words"));
    }

    #[test]
    fn tags_accept_scalar_or_list() {
        let scalar = parse("id: a\ninfo:\n  tags: \"x, y ,x,\"\n").unwrap();
        assert_eq!(scalar.tags, vec!["x", "y"]);

        let list = parse("id: a\ninfo:\n  tags:\n    - x\n    - \"y,z\"\n").unwrap();
        assert_eq!(list.tags, vec!["x", "y", "z"]);
    }

    #[test]
    fn severity_defaults_to_info() {
        let probe = parse("id: a\n").unwrap();
        assert_eq!(probe.severity, Severity::Info);

        let odd = parse("id: a\ninfo:\n  severity: catastrophic\n").unwrap();
        assert_eq!(odd.severity, Severity::Info);
    }

    #[test]
    fn legacy_requests_key_is_accepted() {
        let doc = r#"
id: legacy
requests:
  - method: POST
    path: "{{BaseURL}}/x"
    body: "a=1"
"#;
        let probe = parse(doc).unwrap();
        assert_eq!(probe.requests.len(), 1);
        assert_eq!(probe.requests[0].method, "POST");
        assert_eq!(probe.requests[0].body.as_deref(), Some("a=1"));
    }

    #[test]
    fn raw_block_short_circuits_structured_fields() {
        let doc = r#"
id: raw-probe
http:
  - raw:
      - |
        GET /secret HTTP/1.1
        Host: {{Hostname}}
    matchers:
      - type: status
        status: [200]
"#;
        let probe = parse(doc).unwrap();
        let req = &probe.requests[0];
        assert!(req.raw.as_deref().unwrap().contains("GET /secret"));
        assert!(req.paths.is_empty());
    }

    #[test]
    fn metadata_parse_ignores_broken_request_section() {
        let doc = r#"
id: meta-only
info:
  name: Meta
  severity: low
http:
  - matchers:
      - type: nonsense
"#;
        // Full parse rejects the unknown matcher; metadata parse does not look.
        assert!(parse(doc).is_err());
        let meta = parse_metadata(doc).unwrap();
        assert_eq!(meta.id, "meta-only");
        assert_eq!(meta.severity, Severity::Low);
    }

    #[test]
    fn serialize_then_parse_preserves_metadata() {
        let probe = crate::models::Probe {
            id: "round-trip".into(),
            name: "Round Trip".into(),
            author: "vigil".into(),
            severity: Severity::Medium,
            description: "desc".into(),
            references: vec!["https://example.com".into()],
            tags: vec!["a".into(), "b".into()],
            category: String::new(),
            content: String::new(),
            file_path: Default::default(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let text = to_yaml(&probe).unwrap();
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed.id, probe.id);
        assert_eq!(parsed.name, probe.name);
        assert_eq!(parsed.author, probe.author);
        assert_eq!(parsed.severity, probe.severity);
        assert_eq!(parsed.description, probe.description);
        assert_eq!(parsed.references, probe.references);
        assert_eq!(parsed.tags, probe.tags);
    }

    #[test]
    fn rewrite_identity_keeps_other_fields() {
        let out = rewrite_identity(SAMPLE, Some("new-id"), Some("New Name")).unwrap();
        let probe = parse(&out).unwrap();
        assert_eq!(probe.id, "new-id");
        assert_eq!(probe.name, "New Name");
        assert_eq!(probe.severity, Severity::High);
        assert_eq!(probe.requests.len(), 1);
        assert_eq!(probe.requests[0].paths.len(), 2);
    }
}
