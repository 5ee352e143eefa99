//! Query router
//!
//! Classifies a question as SIMPLE (one guardrailed query) or COMPLEX
//! (bounded investigation) from weighted lexical signals. Routing is
//! stateless, does no I/O, and must stay cheap relative to any model or
//! database call. The signal tables are configuration, not module globals,
//! so alternate policies can coexist and tests can substitute their own.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One weighted lexical signal.
#[derive(Debug, Clone)]
pub struct Signal {
    pub id: &'static str,
    pub pattern: Regex,
    pub weight: f64,
}

impl Signal {
    fn new(id: &'static str, pattern: &str, weight: f64) -> Self {
        Self {
            id,
            pattern: Regex::new(pattern).unwrap(),
            weight,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterPolicy {
    pub simple_signals: Vec<Signal>,
    pub complex_signals: Vec<Signal>,
    /// Normalized score at or above which the question leans COMPLEX.
    pub complex_threshold: f64,
    /// Minimum confidence required to commit to COMPLEX; below it the
    /// decision falls back to SIMPLE, the cheaper path.
    pub confidence_floor: f64,
    /// Weight span that maps the raw lean onto [0, 1].
    pub score_span: f64,
}

impl Default for RouterPolicy {
    fn default() -> Self {
        Self {
            simple_signals: vec![
                Signal::new("direct_request", r"\b(show|list|display|get)\b", 1.0),
                Signal::new("top_n", r"\b(top|bottom|first|last)\s+\d+", 1.5),
                Signal::new("how_many", r"\bhow\s+many\b", 1.5),
                Signal::new("count", r"\bcount\b", 1.0),
                Signal::new(
                    "aggregate",
                    r"\b(sum|total|average|avg|max(imum)?|min(imum)?)\b",
                    1.0,
                ),
                Signal::new(
                    "lookup",
                    r"\b(which|who|when|where)\s+(is|are|was|did|has|won)\b",
                    1.0,
                ),
                Signal::new("latest", r"\b(latest|most\s+recent)\b", 0.5),
            ],
            complex_signals: vec![
                Signal::new("why", r"\bwhy\s+(did|is|are|has|have|do|does)\b", 1.5),
                Signal::new(
                    "root_cause",
                    r"\b(root\s+cause|what\s+(caused|drove|contributed|led\s+to))\b",
                    1.5,
                ),
                Signal::new(
                    "investigate",
                    r"\b(analy[sz]e|investigate|examine|explore)\b",
                    1.5,
                ),
                Signal::new(
                    "patterns",
                    r"\b(pattern|trend|insight|anomal|surprising|unexpected)\w*",
                    1.0,
                ),
                Signal::new(
                    "open_ended",
                    r"\b(should\s+i\s+know|tell\s+me\s+about|explain|anything\s+(else|interesting))\b",
                    1.0,
                ),
                Signal::new(
                    "drivers",
                    r"\bwhat\s+(drives|affects|influences|impacts|factors)\b",
                    1.0,
                ),
                Signal::new(
                    "relationship",
                    r"\b(relationship\s+between|correlat\w+|impact\s+of)\b",
                    1.0,
                ),
                Signal::new(
                    "strategy",
                    r"\b(optimi[sz]e|strategy|strategic|improve|forecast|predict)\b",
                    1.0,
                ),
                Signal::new("why_bare", r"\bwhy\b", 1.0),
            ],
            complex_threshold: 0.5,
            confidence_floor: 0.7,
            score_span: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    Simple,
    Complex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub category: QueryCategory,
    /// Self-reported certainty in [0, 1].
    pub confidence: f64,
    /// Ids of the signals that matched, in table order.
    pub matched: Vec<String>,
}

/// Classify a question.
///
/// Scoring: `lean = complex_total - simple_total`, normalized as
/// `score = clamp01(0.5 + lean / (2 * span))` and
/// `confidence = clamp01(|lean| / span)`. COMPLEX requires both
/// `score >= complex_threshold` and `confidence >= confidence_floor`;
/// ties and low-signal questions fall to SIMPLE.
pub fn route(question: &str, policy: &RouterPolicy) -> RoutingDecision {
    let question = question.to_lowercase();
    let mut matched = Vec::new();

    let mut simple_total = 0.0;
    for signal in &policy.simple_signals {
        if signal.pattern.is_match(&question) {
            simple_total += signal.weight;
            matched.push(signal.id.to_string());
        }
    }

    let mut complex_total = 0.0;
    for signal in &policy.complex_signals {
        if signal.pattern.is_match(&question) {
            complex_total += signal.weight;
            matched.push(signal.id.to_string());
        }
    }

    let lean = complex_total - simple_total;
    let score = clamp01(0.5 + lean / (2.0 * policy.score_span));
    let confidence = clamp01(lean.abs() / policy.score_span);

    let category = if score >= policy.complex_threshold && confidence >= policy.confidence_floor {
        QueryCategory::Complex
    } else {
        QueryCategory::Simple
    };

    RoutingDecision {
        category,
        confidence,
        matched,
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}
