//! End-to-end assistant tests: routing, the simple path's degrade policy,
//! and the investigation path, all with scripted collaborators.

use askdb::assistant::{AnswerMode, DataAssistant};
use askdb::catalog::{build_catalog, SchemaCatalog};
use askdb::error::AskDbError;
use askdb::guardrail::GuardrailPolicy;
use askdb::investigator::InvestigatorConfig;
use askdb::ports::{ExecutionError, ExecutionPort, ModelError, ModelPort, Row};
use askdb::router::RouterPolicy;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

const GOOD_SQL: &str = "SELECT customer_id, SUM(amount) FROM orders GROUP BY customer_id";

fn catalog() -> SchemaCatalog {
    build_catalog("CREATE TABLE orders (id INTEGER, customer_id INTEGER, amount REAL, created_at TEXT);")
        .unwrap()
}

fn sample_rows() -> Vec<Row> {
    let value = serde_json::json!({"customer_id": 7, "SUM(amount)": 120.5});
    match value {
        serde_json::Value::Object(map) => vec![map],
        _ => unreachable!(),
    }
}

struct StubModel {
    sql: &'static str,
    calls: AtomicUsize,
    transient_failures: usize,
}

impl StubModel {
    fn new(sql: &'static str) -> Self {
        Self {
            sql,
            calls: AtomicUsize::new(0),
            transient_failures: 0,
        }
    }

    fn flaky(sql: &'static str, transient_failures: usize) -> Self {
        Self {
            sql,
            calls: AtomicUsize::new(0),
            transient_failures,
        }
    }
}

#[async_trait]
impl ModelPort for StubModel {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String, ModelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.transient_failures {
            return Err(ModelError::Transient("connection reset".to_string()));
        }
        if prompt.contains("planning an investigation") {
            Ok("Order revenue is the subject.".to_string())
        } else if prompt.contains("rejected by a safety check") {
            Ok(self.sql.to_string())
        } else if prompt.contains("initial testable hypothesis") {
            Ok(format!(
                "{{\"hypothesis\": \"volume fell\", \"sql\": \"{}\"}}",
                self.sql
            ))
        } else if prompt.contains("iterating on a data investigation") {
            Ok(format!(
                "{{\"assessment\": \"consistent\", \"action\": \"continue\", \
                  \"hypothesis\": \"volume fell\", \"next_sql\": \"{}\"}}",
                self.sql
            ))
        } else if prompt.contains("presenting the result") {
            Ok("Order volume fell sharply in Q2.".to_string())
        } else {
            // the simple path's SQL generation prompt
            Ok(self.sql.to_string())
        }
    }
}

struct StaticExecutor {
    rows: Vec<Row>,
}

#[async_trait]
impl ExecutionPort for StaticExecutor {
    async fn execute(&self, _sql: &str) -> Result<Vec<Row>, ExecutionError> {
        Ok(self.rows.clone())
    }
}

struct BrokenExecutor;

#[async_trait]
impl ExecutionPort for BrokenExecutor {
    async fn execute(&self, _sql: &str) -> Result<Vec<Row>, ExecutionError> {
        Err(ExecutionError::Query("no such column: fiscal_q".to_string()))
    }
}

fn assistant<'a>(
    model: &'a dyn ModelPort,
    executor: &'a dyn ExecutionPort,
) -> DataAssistant<'a> {
    DataAssistant::new(
        model,
        executor,
        catalog(),
        GuardrailPolicy::default(),
        RouterPolicy::default(),
        InvestigatorConfig::default(),
    )
}

#[tokio::test]
async fn simple_question_runs_one_guardrailed_query() {
    let model = StubModel::new(GOOD_SQL);
    let executor = StaticExecutor {
        rows: sample_rows(),
    };
    let assistant = assistant(&model, &executor);

    let response = assistant
        .answer("show me top 5 customers", None)
        .await
        .unwrap();
    assert_eq!(response.mode, AnswerMode::Simple);
    assert_eq!(response.limit, Some(500));
    assert!(response.sql.unwrap().ends_with("LIMIT 500"));
    assert_eq!(response.rows.len(), 1);
    // one generation call, no investigation stages
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_model_failure_is_retried_once() {
    let model = StubModel::flaky(GOOD_SQL, 1);
    let executor = StaticExecutor {
        rows: sample_rows(),
    };
    let assistant = assistant(&model, &executor);

    let response = assistant
        .answer("show me top 5 customers", None)
        .await
        .unwrap();
    assert_eq!(response.rows.len(), 1);
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn uncorrectable_sql_degrades_to_unsafe_query_error() {
    let model = StubModel::new("DELETE FROM orders");
    let executor = StaticExecutor {
        rows: sample_rows(),
    };
    let assistant = assistant(&model, &executor);

    let err = assistant
        .answer("show me top 5 customers", None)
        .await
        .unwrap_err();
    match err {
        AskDbError::UnsafeQuery(reason) => assert_eq!(reason, "non_select"),
        other => panic!("expected UnsafeQuery, got {other}"),
    }
}

#[tokio::test]
async fn failing_simple_query_reports_a_short_message() {
    let model = StubModel::new(GOOD_SQL);
    let executor = BrokenExecutor;
    let assistant = assistant(&model, &executor);

    let err = assistant
        .answer("show me top 5 customers", None)
        .await
        .unwrap_err();
    match err {
        AskDbError::DataSource(message) => {
            // the engine's own text never reaches the user
            assert!(!message.contains("fiscal_q"));
        }
        other => panic!("expected DataSource, got {other}"),
    }
}

#[tokio::test]
async fn complex_question_is_investigated_and_synthesized() {
    let model = StubModel::new(GOOD_SQL);
    let executor = StaticExecutor {
        rows: sample_rows(),
    };
    let assistant = assistant(&model, &executor);

    let response = assistant
        .answer("why did revenue drop last quarter", None)
        .await
        .unwrap();
    assert_eq!(response.mode, AnswerMode::Investigation);
    assert_eq!(response.answer.as_deref(), Some("Order volume fell sharply in Q2."));
    let report = response.report.unwrap();
    assert!(!report.rounds.is_empty());
    assert!(report.rounds.len() <= InvestigatorConfig::default().max_rounds);
}

#[tokio::test]
async fn forced_mode_overrides_routing() {
    let model = StubModel::new(GOOD_SQL);
    let executor = StaticExecutor {
        rows: sample_rows(),
    };
    let assistant = assistant(&model, &executor);

    let response = assistant
        .answer("why did revenue drop last quarter", Some(AnswerMode::Simple))
        .await
        .unwrap();
    assert_eq!(response.mode, AnswerMode::Simple);
    assert!(response.answer.is_none());
}
