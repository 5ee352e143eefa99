//! Agentic investigator
//!
//! Bounded hypothesis -> query -> observe -> reassess loop for COMPLEX
//! questions. Every candidate query passes the guardrail before it may
//! execute. All stopping decisions are rule-driven (confidence target,
//! round cap, consecutive empty rounds), so the state machine is
//! deterministic given the sequence of model and database responses; the
//! model only supplies text, hypotheses, and candidate SQL.

use crate::catalog::SchemaCatalog;
use crate::focus::{FocusCandidate, FocusMatcher};
use crate::guardrail::{self, GuardrailPolicy, GuardrailVerdict};
use crate::llm::{clean_sql_response, extract_json};
use crate::ports::{ExecutionError, ExecutionPort, ModelError, ModelPort, Row};
use crate::prompts;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigatorConfig {
    /// Hard cap on rounds (1-5).
    pub max_rounds: usize,
    /// Confidence at which the loop may stop early.
    pub confidence_target: f64,
    /// Non-empty rounds required before `confidence_reached` may fire.
    pub min_supported_rounds: usize,
    /// Consecutive empty/failed rounds that end the loop as `low_evidence`.
    pub max_consecutive_empty: usize,
    /// Bounded confidence delta granted per round with non-empty results.
    pub gain_per_supported_round: f64,
    /// Above this many rounds, synthesis prompts exclude raw row samples.
    pub synthesis_row_sample_cap: usize,
    /// Token budget per model call.
    pub model_max_tokens: u32,
}

impl Default for InvestigatorConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            confidence_target: 0.85,
            min_supported_rounds: 2,
            max_consecutive_empty: 3,
            gain_per_supported_round: 0.30,
            synthesis_row_sample_cap: 10,
            model_max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    ConfidenceReached,
    RoundCap,
    LowEvidence,
}

/// One completed hypothesis->query->observation cycle. Immutable once
/// appended to the state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub hypothesis: String,
    pub sql: String,
    pub verdict: GuardrailVerdict,
    pub rows: Vec<Row>,
    pub observation: String,
    pub confidence_delta: f64,
    pub started_at: String,
}

impl Round {
    pub fn supported(&self) -> bool {
        !self.rows.is_empty()
    }
}

/// Mutable record owned exclusively by one investigation run; never shared
/// across requests and discarded after synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationState {
    pub id: String,
    pub question: String,
    pub rounds: Vec<Round>,
    pub hypothesis: String,
    pub confidence: f64,
    pub termination: Option<TerminationReason>,
}

impl InvestigationState {
    fn new(question: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            question: question.to_string(),
            rounds: Vec::new(),
            hypothesis: String::new(),
            confidence: 0.0,
            termination: None,
        }
    }

    fn supported_rounds(&self) -> usize {
        self.rounds.iter().filter(|r| r.supported()).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InvestigationOutcome {
    Completed {
        answer: String,
        reason: TerminationReason,
    },
    /// Terminal failure (data source unavailable, model gone). The round
    /// history up to the failure is preserved for the caller.
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationReport {
    pub id: String,
    pub question: String,
    pub rounds: Vec<Round>,
    pub confidence: f64,
    pub outcome: InvestigationOutcome,
}

#[derive(Debug, Deserialize)]
struct HypothesisReply {
    hypothesis: String,
    sql: String,
}

#[derive(Debug, Deserialize)]
struct ReassessReply {
    #[serde(default)]
    assessment: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    hypothesis: String,
    #[serde(default)]
    next_sql: Option<String>,
}

pub struct Investigator<'a> {
    model: &'a dyn ModelPort,
    executor: &'a dyn ExecutionPort,
    catalog: &'a SchemaCatalog,
    guardrail_policy: GuardrailPolicy,
    config: InvestigatorConfig,
    focus: FocusMatcher,
}

impl<'a> Investigator<'a> {
    pub fn new(
        model: &'a dyn ModelPort,
        executor: &'a dyn ExecutionPort,
        catalog: &'a SchemaCatalog,
        guardrail_policy: GuardrailPolicy,
        config: InvestigatorConfig,
    ) -> Self {
        Self {
            model,
            executor,
            catalog,
            guardrail_policy,
            config,
            focus: FocusMatcher::default(),
        }
    }

    /// Run the full state machine. Always returns a report; terminal
    /// failures carry the partial round history.
    pub async fn investigate(&self, question: &str) -> InvestigationReport {
        let mut state = InvestigationState::new(question);
        let round_cap = self.config.max_rounds.clamp(1, 5);
        let schema_summary = self.catalog.summary();
        info!(id = %state.id, question, "starting investigation");

        // REASONING: catalog signals + one short framing call, no db access
        let focus_list = self.focus.derive_focus(question, self.catalog);
        let reasoning = match self
            .complete_with_retry(&prompts::reasoning(question, &schema_summary, &focus_list))
            .await
        {
            Ok(text) => text,
            Err(e) => return self.fail(state, format!("reasoning stage failed: {e}")),
        };
        debug!(reasoning = %reasoning.trim(), "reasoning stage complete");

        // HYPOTHESIZING: initial hypothesis + first candidate query
        let mut next_sql = match self
            .complete_with_retry(&prompts::hypothesis(question, &schema_summary, &reasoning))
            .await
            .map_err(|e| e.to_string())
            .and_then(|text| {
                serde_json::from_str::<HypothesisReply>(extract_json(&text))
                    .map_err(|e| format!("unparseable hypothesis reply: {e}"))
            }) {
            Ok(reply) => {
                state.hypothesis = reply.hypothesis;
                Some(reply.sql)
            }
            Err(e) => return self.fail(state, format!("hypothesizing stage failed: {e}")),
        };
        info!(hypothesis = %state.hypothesis, "initial hypothesis formed");

        // ITERATING
        let mut focus_idx = 0usize;
        let mut consecutive_empty = 0usize;
        while state.termination.is_none() {
            if state.rounds.len() >= round_cap {
                state.termination = Some(TerminationReason::RoundCap);
                break;
            }
            // a caller-side cancellation check belongs here, between rounds

            let sql = match next_sql.take() {
                Some(sql) => sql,
                None => {
                    // model declined to propose a query; regenerate from the
                    // current (possibly pivoted) focus
                    let hint = pivot_hint(&reasoning, &focus_list, focus_idx);
                    match self
                        .complete_with_retry(&prompts::hypothesis(
                            question,
                            &schema_summary,
                            &hint,
                        ))
                        .await
                        .map_err(|e| e.to_string())
                        .and_then(|text| {
                            serde_json::from_str::<HypothesisReply>(extract_json(&text))
                                .map_err(|e| e.to_string())
                        }) {
                        Ok(reply) => {
                            if !reply.hypothesis.is_empty() {
                                state.hypothesis = reply.hypothesis;
                            }
                            reply.sql
                        }
                        Err(e) => {
                            warn!(error = %e, "query regeneration failed; recording failed round");
                            self.push_round(
                                &mut state,
                                String::new(),
                                GuardrailVerdict::Reject {
                                    reason: guardrail::RejectReason::EmptySql,
                                    fragment: String::new(),
                                },
                                Vec::new(),
                                format!("no query produced: {e}"),
                            );
                            consecutive_empty += 1;
                            if consecutive_empty >= self.config.max_consecutive_empty {
                                state.termination = Some(TerminationReason::LowEvidence);
                            }
                            continue;
                        }
                    }
                }
            };

            let round_no = state.rounds.len() + 1;
            info!(round = round_no, sql = %sql, "round start");

            // guardrail first; one corrective attempt on rejection
            let (sql, verdict) = self.validate_with_correction(question, &schema_summary, sql).await;

            let rows = match &verdict {
                GuardrailVerdict::Reject { reason, fragment } => {
                    warn!(round = round_no, reason = %reason, fragment = %fragment, "round rejected by guardrail");
                    self.push_round(
                        &mut state,
                        sql,
                        verdict.clone(),
                        Vec::new(),
                        format!("query rejected by guardrail: {reason}"),
                    );
                    consecutive_empty += 1;
                    if consecutive_empty >= self.config.max_consecutive_empty {
                        state.termination = Some(TerminationReason::LowEvidence);
                        break;
                    }
                    next_sql = None;
                    continue;
                }
                GuardrailVerdict::Accept { sql: approved, .. } => {
                    match self.execute_with_retry(approved).await {
                        Ok(rows) => rows,
                        Err(ExecutionError::Unavailable(msg)) => {
                            self.push_round(
                                &mut state,
                                sql,
                                verdict.clone(),
                                Vec::new(),
                                format!("data source unavailable: {msg}"),
                            );
                            return self.fail(state, format!("data source unavailable: {msg}"));
                        }
                        Err(ExecutionError::Query(msg)) => {
                            warn!(round = round_no, error = %msg, "query failed after retry");
                            self.push_round(
                                &mut state,
                                sql,
                                verdict.clone(),
                                Vec::new(),
                                format!("query failed: {msg}"),
                            );
                            consecutive_empty += 1;
                            if consecutive_empty >= self.config.max_consecutive_empty {
                                state.termination = Some(TerminationReason::LowEvidence);
                                break;
                            }
                            next_sql = None;
                            continue;
                        }
                    }
                }
            };

            let observation = summarize_rows(&rows);
            let supported = !rows.is_empty();
            info!(round = round_no, observation = %observation, "round observed");
            self.push_round(&mut state, sql.clone(), verdict, rows, observation.clone());

            if supported {
                consecutive_empty = 0;
            } else {
                consecutive_empty += 1;
            }

            // rule-driven termination checks
            if consecutive_empty >= self.config.max_consecutive_empty {
                state.termination = Some(TerminationReason::LowEvidence);
                break;
            }
            if state.confidence >= self.config.confidence_target
                && state.supported_rounds() >= self.config.min_supported_rounds
            {
                state.termination = Some(TerminationReason::ConfidenceReached);
                break;
            }
            if state.rounds.len() >= round_cap {
                state.termination = Some(TerminationReason::RoundCap);
                break;
            }

            // reassess: updated hypothesis, optional pivot, next candidate
            let alternatives: Vec<FocusCandidate> =
                focus_list.iter().skip(focus_idx + 1).cloned().collect();
            match self
                .complete_with_retry(&prompts::reassess(
                    question,
                    &schema_summary,
                    &state.hypothesis,
                    &sql,
                    &observation,
                    &alternatives,
                ))
                .await
            {
                Ok(text) => match serde_json::from_str::<ReassessReply>(extract_json(&text)) {
                    Ok(reply) => {
                        debug!(assessment = %reply.assessment, action = %reply.action, "reassessed");
                        if !reply.hypothesis.is_empty() {
                            state.hypothesis = reply.hypothesis;
                        }
                        if reply.action == "pivot" {
                            focus_idx = (focus_idx + 1).min(focus_list.len().saturating_sub(1));
                            info!(
                                focus = %focus_list.get(focus_idx).map(|c| c.table.as_str()).unwrap_or("-"),
                                "pivoting hypothesis focus"
                            );
                        }
                        next_sql = reply.next_sql.filter(|s| !s.trim().is_empty());
                    }
                    Err(e) => {
                        warn!(error = %e, "unparseable reassessment; regenerating next round");
                        next_sql = None;
                    }
                },
                Err(e) => {
                    warn!(error = %e, "reassessment stage failed; regenerating next round");
                    next_sql = None;
                }
            }
        }

        let reason = state
            .termination
            .unwrap_or(TerminationReason::RoundCap);
        info!(id = %state.id, ?reason, rounds = state.rounds.len(), "iterating complete; synthesizing");

        // SYNTHESIZING
        let include_samples = state.rounds.len() <= self.config.synthesis_row_sample_cap;
        let answer = match self
            .complete_with_retry(&prompts::synthesis(
                question,
                &schema_summary,
                &state.rounds,
                include_samples,
            ))
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => return self.fail(state, format!("synthesis stage failed: {e}")),
        };

        InvestigationReport {
            id: state.id,
            question: state.question,
            rounds: state.rounds,
            confidence: state.confidence,
            outcome: InvestigationOutcome::Completed { answer, reason },
        }
    }

    /// Guardrail check with at most one corrective model attempt per round.
    async fn validate_with_correction(
        &self,
        question: &str,
        schema_summary: &str,
        sql: String,
    ) -> (String, GuardrailVerdict) {
        let sql = clean_sql_response(&sql);
        let verdict = guardrail::validate(&sql, self.catalog, &self.guardrail_policy);
        let GuardrailVerdict::Reject { reason, .. } = &verdict else {
            return (sql, verdict);
        };

        debug!(reason = %reason, "attempting one guardrail correction");
        match self
            .complete_with_retry(&prompts::corrective_sql(
                question,
                schema_summary,
                &sql,
                reason.code(),
            ))
            .await
        {
            Ok(corrected) => {
                let corrected = clean_sql_response(&corrected);
                let second = guardrail::validate(&corrected, self.catalog, &self.guardrail_policy);
                if second.is_accept() {
                    (corrected, second)
                } else {
                    (sql, verdict)
                }
            }
            Err(_) => (sql, verdict),
        }
    }

    async fn complete_with_retry(&self, prompt: &str) -> Result<String, ModelError> {
        match self.model.complete(prompt, self.config.model_max_tokens).await {
            Err(ModelError::Transient(msg)) => {
                warn!(error = %msg, "transient model failure; retrying once");
                self.model.complete(prompt, self.config.model_max_tokens).await
            }
            other => other,
        }
    }

    async fn execute_with_retry(&self, sql: &str) -> Result<Vec<Row>, ExecutionError> {
        match self.executor.execute(sql).await {
            Err(e) => {
                warn!(error = %e, "execution failed; retrying once");
                self.executor.execute(sql).await
            }
            ok => ok,
        }
    }

    fn push_round(
        &self,
        state: &mut InvestigationState,
        sql: String,
        verdict: GuardrailVerdict,
        rows: Vec<Row>,
        observation: String,
    ) {
        let supported = !rows.is_empty();
        let delta = if supported {
            self.config.gain_per_supported_round
        } else {
            0.0
        };
        state.confidence = (state.confidence + delta).min(1.0);
        state.rounds.push(Round {
            hypothesis: state.hypothesis.clone(),
            sql,
            verdict,
            rows,
            observation,
            confidence_delta: delta,
            started_at: chrono::Utc::now().to_rfc3339(),
        });
    }

    fn fail(&self, state: InvestigationState, error: String) -> InvestigationReport {
        warn!(id = %state.id, error = %error, rounds = state.rounds.len(), "investigation failed");
        InvestigationReport {
            id: state.id,
            question: state.question,
            rounds: state.rounds,
            confidence: state.confidence,
            outcome: InvestigationOutcome::Failed { error },
        }
    }
}

fn pivot_hint(reasoning: &str, focus_list: &[FocusCandidate], focus_idx: usize) -> String {
    match focus_list.get(focus_idx) {
        Some(candidate) => format!(
            "{reasoning}\nThe previous focus was a dead end. Focus on table `{}` next.",
            candidate.table
        ),
        None => reasoning.to_string(),
    }
}

/// Derive a compact observation from result rows: row count plus min/max/sum
/// for the first few numeric columns.
pub fn summarize_rows(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "0 rows".to_string();
    }

    let mut parts = vec![format!("{} rows", rows.len())];
    let columns: Vec<&String> = rows[0].keys().collect();
    parts.push(format!(
        "columns: {}",
        columns.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
    ));

    let mut numeric_reported = 0;
    for column in &columns {
        if numeric_reported >= 3 {
            break;
        }
        let values: Vec<f64> = rows
            .iter()
            .filter_map(|row| row.get(column.as_str()).and_then(|v| v.as_f64()))
            .collect();
        if values.is_empty() {
            continue;
        }
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let sum: f64 = values.iter().sum();
        parts.push(format!("{column}: min {min}, max {max}, sum {sum}"));
        numeric_reported += 1;
    }

    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
        let mut row = Row::new();
        for (k, v) in pairs {
            row.insert(k.to_string(), v.clone());
        }
        row
    }

    #[test]
    fn empty_result_observation() {
        assert_eq!(summarize_rows(&[]), "0 rows");
    }

    #[test]
    fn numeric_signals_are_summarized() {
        let rows = vec![
            row(&[("customer_id", json!(1)), ("amount", json!(10.0))]),
            row(&[("customer_id", json!(2)), ("amount", json!(30.0))]),
        ];
        let summary = summarize_rows(&rows);
        assert!(summary.starts_with("2 rows"));
        assert!(summary.contains("amount: min 10, max 30, sum 40"));
    }

    #[test]
    fn non_numeric_columns_are_listed_but_not_aggregated() {
        let rows = vec![row(&[("name", json!("acme"))])];
        let summary = summarize_rows(&rows);
        assert!(summary.contains("columns: name"));
        assert!(!summary.contains("min"));
    }
}
