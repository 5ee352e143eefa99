//! Catalog focus matching
//!
//! Ranks tables (and the column that matched, if any) by lexical overlap
//! between question tokens and catalog names. The investigator uses the top
//! candidate as its initial focus and walks down the list when it pivots.

use crate::catalog::SchemaCatalog;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "what", "why", "how", "did", "are", "was",
    "were", "has", "have", "show", "list", "me", "our", "their", "from", "last", "per", "about",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusCandidate {
    pub table: String,
    pub column: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct FocusMatcher {
    /// Similarity at or above which a name counts as a direct hit.
    pub similarity_threshold: f64,
}

impl Default for FocusMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.84,
        }
    }
}

impl FocusMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            similarity_threshold: threshold,
        }
    }

    /// All catalog tables ranked by best token/name similarity, descending.
    /// Every table appears once, so pivoting always has a next candidate.
    pub fn derive_focus(&self, question: &str, catalog: &SchemaCatalog) -> Vec<FocusCandidate> {
        let tokens = tokenize(question);

        let mut candidates: Vec<FocusCandidate> = catalog
            .tables()
            .map(|table| {
                let mut best = best_similarity(&tokens, &table.name);
                let mut column = None;
                for col in table.column_names() {
                    // column hits count slightly less than a table-name hit
                    let score = best_similarity(&tokens, col) * 0.95;
                    if score > best {
                        best = score;
                        column = Some(col.to_string());
                    }
                }
                FocusCandidate {
                    table: table.name.clone(),
                    column,
                    score: best,
                }
            })
            .collect();

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates
    }

    /// Candidates that clear the similarity threshold.
    pub fn strong_matches(&self, question: &str, catalog: &SchemaCatalog) -> Vec<FocusCandidate> {
        self.derive_focus(question, catalog)
            .into_iter()
            .filter(|c| c.score >= self.similarity_threshold)
            .collect()
    }
}

fn tokenize(question: &str) -> Vec<String> {
    question
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .unique()
        .collect()
}

fn best_similarity(tokens: &[String], name: &str) -> f64 {
    let name = name.to_lowercase();
    tokens
        .iter()
        .map(|token| {
            let score = jaro_winkler(token, &name);
            // substring containment (order_id vs "orders") is a strong signal
            // jaro-winkler alone can underrate
            if name.contains(token.as_str()) || token.contains(&name) {
                score.max(0.92)
            } else {
                score
            }
        })
        .fold(0.0, f64::max)
}
