//! Markup propagation.
//!
//! Every markup column is recomputed from its base column (`markup = base * rate`), so running the
//! propagator again with the same rate changes nothing and a new rate simply replaces the old one.

use chrono::NaiveDate;
use tally_backends::StatementExecutor;
use tally_common::template::{ParamValue, Params, Statement};
use tally_common::{MarkupRate, SummaryError};
use tracing::info;
use uuid::Uuid;

use crate::sql;
use crate::stage::{self, StageReport, StageTimer};
use crate::tables::{MarkupScope, MarkupTarget, TableRegistry};

const STAGE: &str = "markup";

/// What to recompute: one provider's bills inside a date window.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkupScopeArgs<'a> {
    pub provider_uuid: Uuid,
    pub bill_ids: &'a [i64],
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rate: &'a MarkupRate,
}

pub struct MarkupPropagator<'a, T: StatementExecutor + ?Sized> {
    transactional: &'a T,
    registry: &'static TableRegistry,
    schema: &'a str,
}

impl<'a, T: StatementExecutor + ?Sized> MarkupPropagator<'a, T> {
    pub fn new(transactional: &'a T, registry: &'static TableRegistry, schema: &'a str) -> Self {
        Self {
            transactional,
            registry,
            schema,
        }
    }

    /// Statements of one markup epoch, in target order.
    pub fn statements(&self, args: &MarkupScopeArgs<'_>) -> Result<Vec<Statement>, SummaryError> {
        let mut statements = Vec::new();
        for target in self.registry.markup_targets() {
            if target.scope == MarkupScope::Bill && args.bill_ids.is_empty() {
                continue;
            }
            statements.push(self.bind_target(&target, args)?);
        }
        Ok(statements)
    }

    /// Overwrite every markup column derived from this provider's cost. One transaction.
    pub async fn propagate(&self, args: &MarkupScopeArgs<'_>) -> Result<StageReport, SummaryError> {
        let mut timer = StageTimer::start(STAGE);
        let statements = self.statements(args)?;
        info!(
            schema = self.schema,
            provider_uuid = %args.provider_uuid,
            rate = %args.rate,
            bill_ids = ?args.bill_ids,
            start_date = %args.start_date,
            end_date = %args.end_date,
            tables = statements.len(),
            "updating markup"
        );
        stage::execute_batch(self.transactional, STAGE, &statements).await?;
        timer.count(statements.len());
        Ok(timer.finish())
    }

    fn bind_target(
        &self,
        target: &MarkupTarget,
        args: &MarkupScopeArgs<'_>,
    ) -> Result<Statement, SummaryError> {
        let params = Params::new()
            .with("schema", ParamValue::ident(self.schema))
            .with("table", ParamValue::ident(target.table))
            .with("base_column", ParamValue::ident(target.base_column))
            .with("markup_column", ParamValue::ident(target.markup_column))
            .with("markup", args.rate.as_decimal().clone())
            .with("start_date", args.start_date)
            .with("end_date", args.end_date);
        match target.scope {
            MarkupScope::Bill => stage::bind(
                STAGE,
                &sql::MARKUP_BY_BILL,
                params.with("bill_ids", args.bill_ids.to_vec()),
            ),
            MarkupScope::Source => stage::bind(
                STAGE,
                &sql::MARKUP_BY_SOURCE,
                params.with("source_uuid", args.provider_uuid),
            ),
            MarkupScope::SourceType(source_type) => stage::bind(
                STAGE,
                &sql::MARKUP_BY_SOURCE_TYPE,
                params
                    .with("source_uuid", args.provider_uuid)
                    .with("source_type", source_type),
            ),
        }
    }
}
