//! Data assistant
//!
//! Orchestrates one question end to end: route, then either the simple
//! single-query path or a full investigation. Owns the degrade policy from
//! the error-handling design: guardrail rejections get one correction,
//! execution gets one retry, and what reaches the user is always one of the
//! short failure messages, never raw engine text.

use crate::catalog::SchemaCatalog;
use crate::error::{AskDbError, Result};
use crate::guardrail::{self, GuardrailPolicy, GuardrailVerdict};
use crate::investigator::{
    InvestigationOutcome, InvestigationReport, Investigator, InvestigatorConfig,
};
use crate::llm::clean_sql_response;
use crate::ports::{ExecutionError, ExecutionPort, ModelError, ModelPort, Row};
use crate::prompts;
use crate::router::{self, QueryCategory, RouterPolicy, RoutingDecision};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    Simple,
    Investigation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub mode: AnswerMode,
    pub routing: RoutingDecision,
    /// The guardrail-approved SQL that ran (simple path).
    pub sql: Option<String>,
    /// Row limit the guardrail put in effect (simple path).
    pub limit: Option<u64>,
    pub rows: Vec<Row>,
    /// Synthesized business answer (investigation path).
    pub answer: Option<String>,
    /// Full round history for auditability (investigation path).
    pub report: Option<InvestigationReport>,
}

pub struct DataAssistant<'a> {
    model: &'a dyn ModelPort,
    executor: &'a dyn ExecutionPort,
    catalog: SchemaCatalog,
    guardrail_policy: GuardrailPolicy,
    router_policy: RouterPolicy,
    investigator_config: InvestigatorConfig,
}

impl<'a> DataAssistant<'a> {
    pub fn new(
        model: &'a dyn ModelPort,
        executor: &'a dyn ExecutionPort,
        catalog: SchemaCatalog,
        guardrail_policy: GuardrailPolicy,
        router_policy: RouterPolicy,
        investigator_config: InvestigatorConfig,
    ) -> Self {
        Self {
            model,
            executor,
            catalog,
            guardrail_policy,
            router_policy,
            investigator_config,
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Answer one question. Routing decides the path; a routing decision can
    /// be overridden by the caller via `force_mode`.
    pub async fn answer(&self, question: &str, force_mode: Option<AnswerMode>) -> Result<AssistantResponse> {
        let routing = router::route(question, &self.router_policy);
        info!(
            category = ?routing.category,
            confidence = routing.confidence,
            matched = ?routing.matched,
            "question routed"
        );

        let mode = force_mode.unwrap_or(match routing.category {
            QueryCategory::Simple => AnswerMode::Simple,
            QueryCategory::Complex => AnswerMode::Investigation,
        });

        match mode {
            AnswerMode::Simple => self.answer_simple(question, routing).await,
            AnswerMode::Investigation => self.answer_investigation(question, routing).await,
        }
    }

    /// One model call -> guardrail -> execution.
    async fn answer_simple(&self, question: &str, routing: RoutingDecision) -> Result<AssistantResponse> {
        let schema_summary = self.catalog.summary();
        let raw = self
            .complete_with_retry(&prompts::sql_generation(question, &schema_summary))
            .await?;
        let sql = clean_sql_response(&raw);

        let verdict = guardrail::validate(&sql, &self.catalog, &self.guardrail_policy);
        let (sql, limit) = match verdict {
            GuardrailVerdict::Accept { sql, limit } => (sql, limit),
            GuardrailVerdict::Reject { reason, fragment } => {
                warn!(reason = %reason, fragment = %fragment, "generated SQL rejected; attempting one correction");
                let corrected = self
                    .complete_with_retry(&prompts::corrective_sql(
                        question,
                        &schema_summary,
                        &sql,
                        reason.code(),
                    ))
                    .await?;
                let corrected = clean_sql_response(&corrected);
                match guardrail::validate(&corrected, &self.catalog, &self.guardrail_policy) {
                    GuardrailVerdict::Accept { sql, limit } => (sql, limit),
                    GuardrailVerdict::Reject { reason, .. } => {
                        return Err(AskDbError::UnsafeQuery(reason.code().to_string()));
                    }
                }
            }
        };

        info!(sql = %sql, limit, "executing simple-path query");
        let rows = match self.executor.execute(&sql).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "simple-path execution failed; retrying once");
                self.executor
                    .execute(&sql)
                    .await
                    .map_err(|e| AskDbError::DataSource(short_exec_message(&e)))?
            }
        };

        Ok(AssistantResponse {
            mode: AnswerMode::Simple,
            routing,
            sql: Some(sql),
            limit: Some(limit),
            rows,
            answer: None,
            report: None,
        })
    }

    async fn answer_investigation(
        &self,
        question: &str,
        routing: RoutingDecision,
    ) -> Result<AssistantResponse> {
        let investigator = Investigator::new(
            self.model,
            self.executor,
            &self.catalog,
            self.guardrail_policy.clone(),
            self.investigator_config.clone(),
        );
        let report = investigator.investigate(question).await;

        match report.outcome.clone() {
            InvestigationOutcome::Completed { answer, .. } => Ok(AssistantResponse {
                mode: AnswerMode::Investigation,
                routing,
                sql: None,
                limit: None,
                rows: Vec::new(),
                answer: Some(answer),
                report: Some(report),
            }),
            InvestigationOutcome::Failed { error } => {
                // partial evidence is still worth presenting; a run that
                // produced nothing is reported as inconclusive
                if report.rounds.iter().any(|r| r.supported()) {
                    warn!(error = %error, "investigation failed with partial evidence");
                    Ok(AssistantResponse {
                        mode: AnswerMode::Investigation,
                        routing,
                        sql: None,
                        limit: None,
                        rows: Vec::new(),
                        answer: None,
                        report: Some(report),
                    })
                } else {
                    Err(AskDbError::Inconclusive(error))
                }
            }
        }
    }

    async fn complete_with_retry(&self, prompt: &str) -> Result<String> {
        let max_tokens = self.investigator_config.model_max_tokens;
        match self.model.complete(prompt, max_tokens).await {
            Err(ModelError::Transient(msg)) => {
                warn!(error = %msg, "transient model failure; retrying once");
                Ok(self.model.complete(prompt, max_tokens).await?)
            }
            other => Ok(other?),
        }
    }
}

fn short_exec_message(e: &ExecutionError) -> String {
    match e {
        ExecutionError::Query(_) => "the query failed to execute".to_string(),
        ExecutionError::Unavailable(_) => "the database is unreachable".to_string(),
    }
}
