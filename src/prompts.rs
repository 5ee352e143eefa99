//! Prompt builders
//!
//! All model-facing text lives here, one builder per call site. Builders are
//! pure string assembly; response parsing stays with the callers.

use crate::focus::FocusCandidate;
use crate::investigator::Round;
use itertools::Itertools;

/// Single-shot SQL generation for the simple path.
pub fn sql_generation(question: &str, schema_summary: &str) -> String {
    format!(
        "You are a strict SQLite SQL generator. Always respond with ONLY a valid SQLite \
         SELECT statement (no explanations, no markdown fences). Use the provided schema. \
         Avoid DDL/DML; only read data.\n\nSCHEMA:\n{schema_summary}\n\nQuestion: {question}\nSQL:"
    )
}

/// One corrective attempt after a guardrail rejection.
pub fn corrective_sql(question: &str, schema_summary: &str, rejected_sql: &str, reason: &str) -> String {
    format!(
        "Your previous SQL was rejected by a safety check.\n\
         Rejected SQL: {rejected_sql}\nRejection reason: {reason}\n\n\
         Write a corrected SQLite SELECT statement for the same question. Respond with ONLY \
         the SQL, no explanations.\n\nSCHEMA:\n{schema_summary}\n\nQuestion: {question}\nSQL:"
    )
}

/// REASONING stage: a short framing of the problem, no database access.
pub fn reasoning(question: &str, schema_summary: &str, focus: &[FocusCandidate]) -> String {
    format!(
        "You are a data analyst planning an investigation.\n\nQuestion: {question}\n\n\
         SCHEMA:\n{schema_summary}\n\nMost relevant tables by name overlap:\n{}\n\n\
         In 2-3 sentences, state what the question is really asking and which tables and \
         columns are most likely to answer it. Plain text only.",
        render_focus(focus)
    )
}

/// HYPOTHESIZING stage: a testable hypothesis plus the first candidate query.
pub fn hypothesis(question: &str, schema_summary: &str, reasoning: &str) -> String {
    format!(
        "Question: {question}\n\nAnalyst framing:\n{reasoning}\n\nSCHEMA:\n{schema_summary}\n\n\
         Produce an initial testable hypothesis and one SQLite SELECT query that tests it.\n\
         Return JSON in this exact format:\n\
         {{\"hypothesis\": \"...\", \"sql\": \"SELECT ...\"}}\n\
         Only return the JSON, no other text."
    )
}

/// ITERATING stage: reassess after a round's observation.
pub fn reassess(
    question: &str,
    schema_summary: &str,
    hypothesis: &str,
    sql: &str,
    observation: &str,
    alternatives: &[FocusCandidate],
) -> String {
    format!(
        "You are iterating on a data investigation.\n\nQuestion: {question}\n\
         Current hypothesis: {hypothesis}\nQuery just run: {sql}\nObservation: {observation}\n\n\
         SCHEMA:\n{schema_summary}\n\nUnexplored tables, by relevance:\n{}\n\n\
         Decide the next move. Return JSON in this exact format:\n\
         {{\"assessment\": \"what the observation means\",\n \
           \"action\": \"continue\" | \"pivot\" | \"stop\",\n \
           \"hypothesis\": \"updated hypothesis\",\n \
           \"next_sql\": \"SELECT ...\" or null}}\n\
         Use \"pivot\" when the current focus is a dead end. Only return the JSON.",
        render_focus(alternatives)
    )
}

/// SYNTHESIZING stage: business-facing answer from the round history.
/// Raw row samples are only included while the round count is small enough
/// to keep the prompt bounded.
pub fn synthesis(
    question: &str,
    schema_summary: &str,
    rounds: &[Round],
    include_row_samples: bool,
) -> String {
    let history = rounds
        .iter()
        .enumerate()
        .map(|(i, round)| {
            let mut entry = format!(
                "Round {}:\nSQL: {}\nObservation: {}",
                i + 1,
                round.sql,
                round.observation
            );
            if include_row_samples {
                if let Some(row) = round.rows.first() {
                    entry.push_str(&format!(
                        "\nFirst row: {}",
                        serde_json::Value::Object(row.clone())
                    ));
                }
            }
            entry
        })
        .join("\n\n");

    format!(
        "You are presenting the result of a data investigation to a business audience.\n\n\
         Original question: {question}\n\nCATALOG:\n{schema_summary}\n\n\
         Evidence gathered, in order:\n{history}\n\n\
         Write a clear, direct answer to the original question based only on this evidence. \
         State what was found, how confident the evidence is, and anything worth a follow-up. \
         Plain text, 3-6 sentences."
    )
}

fn render_focus(focus: &[FocusCandidate]) -> String {
    if focus.is_empty() {
        return "(no obvious candidates)".to_string();
    }
    focus
        .iter()
        .take(5)
        .map(|c| match &c.column {
            Some(col) => format!("- {} (column {})", c.table, col),
            None => format!("- {}", c.table),
        })
        .join("\n")
}
