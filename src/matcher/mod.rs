//! Matcher evaluation against HTTP exchanges

pub mod dsl;

use crate::probe::parser::{Condition, Matcher, MatcherKind, Part};
use regex::Regex;
use std::borrow::Cow;
use tracing::debug;

/// Response bytes retained for matching; anything beyond is discarded at
/// read time.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// The slice of an HTTP exchange that matchers evaluate
#[derive(Debug, Clone)]
pub struct ResponseData {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Raw body, already capped at [`MAX_BODY_BYTES`]
    pub body: Vec<u8>,
}

impl ResponseData {
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn header_text(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.headers {
            out.push_str(k);
            out.push_str(": ");
            out.push_str(v);
            out.push('\n');
        }
        out
    }

    fn part_text(&self, part: Part) -> String {
        match part {
            Part::StatusCode => self.status.to_string(),
            Part::Header => self.header_text(),
            Part::Body => self.body_text().into_owned(),
            Part::All => format!("{}\n{}", self.header_text(), self.body_text()),
        }
    }
}

/// Verdict plus a human-readable explanation of what fired
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub matched: bool,
    pub evidence: String,
}

impl MatchOutcome {
    fn miss() -> Self {
        Self {
            matched: false,
            evidence: String::new(),
        }
    }

    fn hit(evidence: String) -> Self {
        Self {
            matched: true,
            evidence,
        }
    }
}

/// Evaluates a matcher list against a response under the given aggregation
/// condition. An empty list falls back to "status is 200", so a probe with
/// no matchers does not fire on every response.
pub fn evaluate_matchers(
    matchers: &[Matcher],
    condition: Condition,
    response: &ResponseData,
) -> MatchOutcome {
    if matchers.is_empty() {
        if response.status == 200 {
            return MatchOutcome::hit(format!("Status: {}", response.status));
        }
        return MatchOutcome::miss();
    }

    let outcomes: Vec<MatchOutcome> = matchers
        .iter()
        .map(|m| evaluate_matcher(m, response))
        .collect();

    let matched = match condition {
        Condition::And => outcomes.iter().all(|o| o.matched),
        Condition::Or => outcomes.iter().any(|o| o.matched),
    };

    let evidence: Vec<&str> = outcomes
        .iter()
        .filter(|o| o.matched && !o.evidence.is_empty())
        .map(|o| o.evidence.as_str())
        .collect();

    MatchOutcome {
        matched,
        evidence: evidence.join("; "),
    }
}

/// Evaluates one matcher, applying the `negative` inversion last.
pub fn evaluate_matcher(matcher: &Matcher, response: &ResponseData) -> MatchOutcome {
    let outcome = match &matcher.kind {
        MatcherKind::Status(codes) => evaluate_status(codes, response.status),
        MatcherKind::Word(words) => {
            evaluate_words(words, matcher.condition, &response.part_text(matcher.part))
        }
        MatcherKind::Regex(patterns) => {
            evaluate_regex(patterns, matcher.condition, &response.part_text(matcher.part))
        }
        MatcherKind::Binary(needles) => evaluate_binary(needles, matcher.condition, &response.body),
        MatcherKind::Dsl(expressions) => evaluate_dsl(expressions, matcher.condition, response),
    };

    if !matcher.negative {
        return outcome;
    }

    if outcome.matched {
        MatchOutcome::miss()
    } else {
        MatchOutcome::hit(format!("Negative: {}", kind_label(&matcher.kind)))
    }
}

fn kind_label(kind: &MatcherKind) -> &'static str {
    match kind {
        MatcherKind::Status(_) => "status",
        MatcherKind::Word(_) => "word",
        MatcherKind::Regex(_) => "regex",
        MatcherKind::Binary(_) => "binary",
        MatcherKind::Dsl(_) => "dsl",
    }
}

fn evaluate_status(codes: &[u16], status: u16) -> MatchOutcome {
    if codes.contains(&status) {
        MatchOutcome::hit(format!("Status: {status}"))
    } else {
        MatchOutcome::miss()
    }
}

fn evaluate_words(words: &[String], condition: Condition, content: &str) -> MatchOutcome {
    match condition {
        Condition::And => {
            if words.iter().all(|w| content.contains(w.as_str())) {
                MatchOutcome::hit(format!("Words matched: {}", words.join(", ")))
            } else {
                MatchOutcome::miss()
            }
        }
        Condition::Or => {
            for word in words {
                if content.contains(word.as_str()) {
                    return MatchOutcome::hit(format!("Word: {word}"));
                }
            }
            MatchOutcome::miss()
        }
    }
}

fn evaluate_regex(patterns: &[String], condition: Condition, content: &str) -> MatchOutcome {
    let mut hits = Vec::new();

    for pattern in patterns {
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                debug!("skipping invalid regex pattern {pattern:?}: {e}");
                if condition == Condition::And {
                    return MatchOutcome::miss();
                }
                continue;
            }
        };

        if re.is_match(content) {
            hits.push(pattern.as_str());
            if condition == Condition::Or {
                return MatchOutcome::hit(format!("Regex: {pattern}"));
            }
        } else if condition == Condition::And {
            return MatchOutcome::miss();
        }
    }

    if condition == Condition::And && hits.len() == patterns.len() && !patterns.is_empty() {
        return MatchOutcome::hit(format!("Regex matched: {}", hits.join(", ")));
    }

    MatchOutcome::miss()
}

fn evaluate_binary(needles: &[String], condition: Condition, body: &[u8]) -> MatchOutcome {
    let mut hits = Vec::new();

    for needle_hex in needles {
        let cleaned: String = needle_hex.chars().filter(|c| !c.is_whitespace()).collect();
        let needle = match hex::decode(&cleaned) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) | Err(_) => {
                debug!("skipping undecodable binary needle {needle_hex:?}");
                if condition == Condition::And {
                    return MatchOutcome::miss();
                }
                continue;
            }
        };

        let found = body.windows(needle.len()).any(|w| w == needle.as_slice());
        if found {
            hits.push(needle_hex.as_str());
            if condition == Condition::Or {
                return MatchOutcome::hit(format!("Binary: {needle_hex}"));
            }
        } else if condition == Condition::And {
            return MatchOutcome::miss();
        }
    }

    if condition == Condition::And && hits.len() == needles.len() && !needles.is_empty() {
        return MatchOutcome::hit(format!("Binary matched: {}", hits.join(", ")));
    }

    MatchOutcome::miss()
}

fn evaluate_dsl(
    expressions: &[String],
    condition: Condition,
    response: &ResponseData,
) -> MatchOutcome {
    let body = response.body_text();
    let ctx = dsl::DslContext {
        status_code: response.status,
        body: &body,
        headers: &response.headers,
    };

    let mut hits = Vec::new();

    for expr in expressions {
        let passed = match dsl::evaluate(expr, &ctx) {
            Ok(v) => v,
            Err(e) => {
                debug!("dsl expression {expr:?} failed: {e}");
                false
            }
        };

        if passed {
            hits.push(expr.as_str());
            if condition == Condition::Or {
                return MatchOutcome::hit(format!("DSL: {expr}"));
            }
        } else if condition == Condition::And {
            return MatchOutcome::miss();
        }
    }

    if condition == Condition::And && hits.len() == expressions.len() && !expressions.is_empty() {
        return MatchOutcome::hit(format!("DSL matched: {}", hits.join("; ")));
    }

    MatchOutcome::miss()
}
