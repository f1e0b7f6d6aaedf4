//! Binding and execution helpers shared by every stage.

use serde::Serialize;
use std::time::Instant;
use tally_backends::StatementExecutor;
use tally_common::template::{Params, Statement, Template};
use tally_common::{BackendError, SummaryError};
use tracing::{debug, info};

/// Statements run and time spent by one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    pub statements: usize,
    pub elapsed_ms: u128,
}

/// Logs stage start/finish and counts statements.
pub struct StageTimer {
    stage: &'static str,
    started: Instant,
    statements: usize,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        info!(stage, "stage started");
        Self {
            stage,
            started: Instant::now(),
            statements: 0,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn count(&mut self, statements: usize) {
        self.statements += statements;
    }

    pub fn finish(self) -> StageReport {
        let elapsed_ms = self.started.elapsed().as_millis();
        info!(
            stage = self.stage,
            statements = self.statements,
            elapsed_ms,
            "stage finished"
        );
        StageReport {
            stage: self.stage,
            statements: self.statements,
            elapsed_ms,
        }
    }
}

/// Validate `params` against `template`. A bad parameter set is a statement error of `stage`.
pub fn bind(stage: &str, template: &Template, params: Params) -> Result<Statement, SummaryError> {
    let context = params.to_json();
    template
        .bind(params)
        .map_err(|err| SummaryError::statement(stage, context, err))
}

fn check_backend<E>(executor: &E, stage: &str, statement: &Statement) -> Result<(), SummaryError>
where
    E: StatementExecutor + ?Sized,
{
    if executor.backend() != statement.backend {
        return Err(SummaryError::Configuration(format!(
            "stage {}: template {} targets the {} backend, not {}",
            stage,
            statement.template,
            statement.backend,
            executor.backend()
        )));
    }
    Ok(())
}

pub async fn execute<E>(executor: &E, stage: &str, statement: &Statement) -> Result<(), SummaryError>
where
    E: StatementExecutor + ?Sized,
{
    check_backend(executor, stage, statement)?;
    debug!(stage, template = statement.template, "executing statement");
    executor
        .execute(statement)
        .await
        .map_err(|err| SummaryError::from_backend(stage, statement.context(), err, 1))
}

/// Run `statements` as one unit (a single transaction on the transactional backend).
pub async fn execute_batch<E>(
    executor: &E,
    stage: &str,
    statements: &[Statement],
) -> Result<(), SummaryError>
where
    E: StatementExecutor + ?Sized,
{
    for statement in statements {
        check_backend(executor, stage, statement)?;
    }
    executor.execute_batch(statements).await.map_err(|err| {
        let context = serde_json::Value::Array(statements.iter().map(Statement::context).collect());
        SummaryError::from_backend(stage, context, err, 1)
    })
}

pub async fn fetch<E>(
    executor: &E,
    stage: &str,
    statement: &Statement,
) -> Result<Vec<serde_json::Value>, SummaryError>
where
    E: StatementExecutor + ?Sized,
{
    check_backend(executor, stage, statement)?;
    executor
        .fetch(statement)
        .await
        .map_err(|err| SummaryError::from_backend(stage, statement.context(), err, 1))
}

/// A row that does not decode into the expected shape.
pub fn malformed_row(
    stage: &str,
    statement: &Statement,
    err: impl std::fmt::Display,
) -> SummaryError {
    SummaryError::statement(
        stage,
        statement.context(),
        BackendError::execution(statement.backend, format!("malformed row: {}", err)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_backends::mock::MockEngine;
    use tally_common::template::{Backend, ParamKind, ParamSpec, ParamValue};
    use tally_common::error::HIVE_METASTORE_ERROR;
    use tally_common::ExecutionCause;

    const PING: Template = Template {
        name: "ping",
        backend: Backend::Distributed,
        body: "SELECT 1 FROM {{schema}}.t",
        params: &[ParamSpec::new("schema", ParamKind::Identifier)],
    };

    fn ping() -> Statement {
        bind("test", &PING, Params::new().with("schema", ParamValue::ident("acct1"))).unwrap()
    }

    #[test]
    fn bad_params_are_statement_errors() {
        let err = bind("daily_summary", &PING, Params::new()).unwrap_err();
        match err {
            SummaryError::StatementExecution { stage, cause, .. } => {
                assert_eq!(stage, "daily_summary");
                assert!(matches!(cause, ExecutionCause::Parameters(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_backend_is_rejected_before_running() {
        let engine = MockEngine::transactional();
        let err = execute(&engine, "test", &ping()).await.unwrap_err();
        assert!(matches!(err, SummaryError::Configuration(_)));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn transient_errors_outside_retry_loops_escalate() {
        let engine = MockEngine::distributed();
        engine.fail(
            "ping",
            BackendError::from_engine(Backend::Distributed, Some(HIVE_METASTORE_ERROR), "busy"),
            1,
        );
        let err = execute(&engine, "test", &ping()).await.unwrap_err();
        assert!(matches!(err, SummaryError::TransientBackend { attempts: 1, .. }));
        assert_eq!(engine.attempts("ping"), 1);
    }
}
