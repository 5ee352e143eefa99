//! Investigator state-machine tests with scripted collaborators.
//!
//! The guardrail and router are pure, so given a fixed sequence of model and
//! executor responses the whole loop is deterministic and every termination
//! rule can be pinned down exactly.

use askdb::catalog::{build_catalog, SchemaCatalog};
use askdb::guardrail::{GuardrailPolicy, GuardrailVerdict};
use askdb::investigator::{
    InvestigationOutcome, Investigator, InvestigatorConfig, TerminationReason,
};
use askdb::ports::{ExecutionError, ExecutionPort, ModelError, ModelPort, Row};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

const QUESTION: &str = "why did revenue drop last quarter";
const GOOD_SQL: &str = "SELECT customer_id, SUM(amount) FROM orders GROUP BY customer_id";

fn catalog() -> SchemaCatalog {
    build_catalog("CREATE TABLE orders (id INTEGER, customer_id INTEGER, amount REAL, created_at TEXT);")
        .unwrap()
}

/// Answers each stage by recognizing its prompt, so tests don't depend on
/// exact call counts.
struct StubModel {
    sql: &'static str,
}

#[async_trait]
impl ModelPort for StubModel {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String, ModelError> {
        if prompt.contains("planning an investigation") {
            Ok("The question is about order revenue over time.".to_string())
        } else if prompt.contains("rejected by a safety check") {
            Ok(self.sql.to_string())
        } else if prompt.contains("initial testable hypothesis") {
            Ok(format!(
                "{{\"hypothesis\": \"order volume fell\", \"sql\": \"{}\"}}",
                self.sql
            ))
        } else if prompt.contains("iterating on a data investigation") {
            Ok(format!(
                "{{\"assessment\": \"supports the hypothesis\", \"action\": \"continue\", \
                  \"hypothesis\": \"order volume fell\", \"next_sql\": \"{}\"}}",
                self.sql
            ))
        } else if prompt.contains("presenting the result") {
            Ok("Revenue fell because order volume fell.".to_string())
        } else {
            Err(ModelError::Fatal(format!("unexpected prompt: {prompt}")))
        }
    }
}

struct StaticExecutor {
    rows: Vec<Row>,
    calls: AtomicUsize,
}

impl StaticExecutor {
    fn returning(rows: Vec<Row>) -> Self {
        Self {
            rows,
            calls: AtomicUsize::new(0),
        }
    }

    fn empty() -> Self {
        Self::returning(Vec::new())
    }
}

#[async_trait]
impl ExecutionPort for StaticExecutor {
    async fn execute(&self, _sql: &str) -> Result<Vec<Row>, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.clone())
    }
}

struct UnavailableExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl ExecutionPort for UnavailableExecutor {
    async fn execute(&self, _sql: &str) -> Result<Vec<Row>, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ExecutionError::Unavailable("connection refused".to_string()))
    }
}

fn sample_rows() -> Vec<Row> {
    let value = serde_json::json!({"customer_id": 7, "SUM(amount)": 120.5});
    match value {
        serde_json::Value::Object(map) => vec![map],
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn supported_rounds_reach_confidence() {
    let model = StubModel { sql: GOOD_SQL };
    let executor = StaticExecutor::returning(sample_rows());
    let catalog = catalog();
    let investigator = Investigator::new(
        &model,
        &executor,
        &catalog,
        GuardrailPolicy::default(),
        InvestigatorConfig::default(),
    );

    let report = investigator.investigate(QUESTION).await;
    match report.outcome {
        InvestigationOutcome::Completed { answer, reason } => {
            assert_eq!(reason, TerminationReason::ConfidenceReached);
            assert!(!answer.is_empty());
        }
        other => panic!("expected completion, got {other:?}"),
    }
    // 0.30 per supported round: third round crosses 0.85
    assert_eq!(report.rounds.len(), 3);
    assert!(report.confidence >= 0.85);
    assert!(report.rounds.iter().filter(|r| r.supported()).count() >= 2);
}

#[tokio::test]
async fn round_cap_is_never_exceeded() {
    let model = StubModel { sql: GOOD_SQL };
    let executor = StaticExecutor::returning(sample_rows());
    let catalog = catalog();
    let config = InvestigatorConfig {
        // too little gain to ever reach the target
        gain_per_supported_round: 0.1,
        ..InvestigatorConfig::default()
    };
    let investigator = Investigator::new(
        &model,
        &executor,
        &catalog,
        GuardrailPolicy::default(),
        config.clone(),
    );

    let report = investigator.investigate(QUESTION).await;
    match report.outcome {
        InvestigationOutcome::Completed { reason, .. } => {
            assert_eq!(reason, TerminationReason::RoundCap);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(report.rounds.len(), config.max_rounds);
}

#[tokio::test]
async fn three_empty_rounds_end_as_low_evidence() {
    let model = StubModel { sql: GOOD_SQL };
    let executor = StaticExecutor::empty();
    let catalog = catalog();
    let investigator = Investigator::new(
        &model,
        &executor,
        &catalog,
        GuardrailPolicy::default(),
        InvestigatorConfig::default(),
    );

    let report = investigator.investigate(QUESTION).await;
    match report.outcome {
        InvestigationOutcome::Completed { reason, .. } => {
            assert_eq!(reason, TerminationReason::LowEvidence);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(report.rounds.len(), 3);
    assert_eq!(report.confidence, 0.0);
}

#[tokio::test]
async fn confidence_only_grows_on_supported_rounds() {
    let model = StubModel { sql: GOOD_SQL };
    let executor = StaticExecutor::empty();
    let catalog = catalog();
    let investigator = Investigator::new(
        &model,
        &executor,
        &catalog,
        GuardrailPolicy::default(),
        InvestigatorConfig::default(),
    );

    let report = investigator.investigate(QUESTION).await;
    for round in &report.rounds {
        assert!(!round.supported());
        assert_eq!(round.confidence_delta, 0.0);
    }
}

#[tokio::test]
async fn unsafe_queries_never_reach_the_executor() {
    let model = StubModel {
        sql: "DROP TABLE orders",
    };
    let executor = StaticExecutor::returning(sample_rows());
    let catalog = catalog();
    let investigator = Investigator::new(
        &model,
        &executor,
        &catalog,
        GuardrailPolicy::default(),
        InvestigatorConfig::default(),
    );

    let report = investigator.investigate(QUESTION).await;
    match report.outcome {
        InvestigationOutcome::Completed { reason, .. } => {
            assert_eq!(reason, TerminationReason::LowEvidence);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    assert!(report
        .rounds
        .iter()
        .all(|r| matches!(r.verdict, GuardrailVerdict::Reject { .. })));
}

#[tokio::test]
async fn unavailable_data_source_fails_with_partial_history() {
    let model = StubModel { sql: GOOD_SQL };
    let executor = UnavailableExecutor {
        calls: AtomicUsize::new(0),
    };
    let catalog = catalog();
    let investigator = Investigator::new(
        &model,
        &executor,
        &catalog,
        GuardrailPolicy::default(),
        InvestigatorConfig::default(),
    );

    let report = investigator.investigate(QUESTION).await;
    match report.outcome {
        InvestigationOutcome::Failed { error } => {
            assert!(error.contains("unavailable"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    // one immediate retry, then the investigation fails
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.rounds.len(), 1);
}

#[tokio::test]
async fn every_executed_statement_carries_a_limit() {
    let model = StubModel { sql: GOOD_SQL };
    let executor = StaticExecutor::returning(sample_rows());
    let catalog = catalog();
    let investigator = Investigator::new(
        &model,
        &executor,
        &catalog,
        GuardrailPolicy::default(),
        InvestigatorConfig::default(),
    );

    let report = investigator.investigate(QUESTION).await;
    for round in &report.rounds {
        match &round.verdict {
            GuardrailVerdict::Accept { sql, limit } => {
                assert!(*limit >= 1);
                assert!(*limit <= GuardrailPolicy::default().max_row_limit);
                assert!(sql.to_uppercase().contains("LIMIT"));
            }
            GuardrailVerdict::Reject { .. } => panic!("all rounds should have been accepted"),
        }
    }
}
