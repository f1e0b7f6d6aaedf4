//! Partition deletes on the distributed engine.
//!
//! The engine has no cross-statement transactions, so re-population is made idempotent by deleting
//! the target partitions first. Deletes are retried only on metastore contention; each day is its
//! own unit, so a failure on one day leaves earlier days deleted.

use chrono::{Datelike, NaiveDate};
use std::time::Duration;
use tally_backends::DistributedEngine;
use tally_common::template::{ParamValue, Params, Statement};
use tally_common::{BillingPeriod, SummaryError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::sql;
use crate::stage;

const STAGE: &str = "partition_delete";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per delete, first one included.
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_ATTEMPTS: u32 = 5;

    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ATTEMPTS, Duration::ZERO)
    }
}

/// One side of a day partition key: the partition column and the source it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceKey<'a> {
    pub column: &'a str,
    pub source: Uuid,
}

impl<'a> SourceKey<'a> {
    pub fn new(column: &'a str, source: Uuid) -> Self {
        Self { column, source }
    }
}

pub struct PartitionManager<'a, E: DistributedEngine + ?Sized> {
    engine: &'a E,
    schema: &'a str,
    policy: RetryPolicy,
}

impl<'a, E: DistributedEngine + ?Sized> PartitionManager<'a, E> {
    pub fn new(engine: &'a E, schema: &'a str, policy: RetryPolicy) -> Self {
        Self {
            engine,
            schema,
            policy,
        }
    }

    /// Delete one source's month partition of `table`. Returns the number of deletes run.
    pub async fn delete_partition_by_month(
        &self,
        table: &str,
        source_column: &str,
        source: Uuid,
        period: BillingPeriod,
    ) -> Result<usize, SummaryError> {
        if !self.target_exists(table).await? {
            return Ok(0);
        }
        let params = Params::new()
            .with("schema", ParamValue::ident(self.schema))
            .with("table", ParamValue::ident(table))
            .with("source_column", ParamValue::ident(source_column))
            .with("source", source)
            .with("year", period.year_str())
            .with("month", period.month_str())
            .with("month_unpadded", period.month.to_string());
        let statement = stage::bind(STAGE, &sql::DELETE_PARTITION_BY_MONTH, params)?;
        self.execute_with_retry(&statement).await?;
        Ok(1)
    }

    /// Delete the day partitions of `table` keyed by a pair of sources, one day at a time.
    pub async fn delete_partition_by_day(
        &self,
        table: &str,
        source_a: SourceKey<'_>,
        source_b: SourceKey<'_>,
        days: &[NaiveDate],
    ) -> Result<usize, SummaryError> {
        if days.is_empty() || !self.target_exists(table).await? {
            return Ok(0);
        }
        let mut deleted = 0;
        for day in days {
            let period = BillingPeriod::from_date(*day);
            let params = Params::new()
                .with("schema", ParamValue::ident(self.schema))
                .with("table", ParamValue::ident(table))
                .with("source_a_column", ParamValue::ident(source_a.column))
                .with("source_a", source_a.source)
                .with("source_b_column", ParamValue::ident(source_b.column))
                .with("source_b", source_b.source)
                .with("year", period.year_str())
                .with("month", period.month_str())
                .with("month_unpadded", period.month.to_string())
                .with("day", day.day().to_string());
            let statement = stage::bind(STAGE, &sql::DELETE_PARTITION_BY_DAY, params)?;
            self.execute_with_retry(&statement).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    async fn target_exists(&self, table: &str) -> Result<bool, SummaryError> {
        let probe_context = || serde_json::json!({ "schema": self.schema, "table": table });

        let schema_exists = self
            .engine
            .schema_exists(self.schema)
            .await
            .map_err(|err| SummaryError::from_backend(STAGE, probe_context(), err, 1))?;
        if !schema_exists {
            info!(schema = self.schema, table, "schema does not exist, skipping partition delete");
            return Ok(false);
        }

        let table_exists = self
            .engine
            .table_exists(self.schema, table)
            .await
            .map_err(|err| SummaryError::from_backend(STAGE, probe_context(), err, 1))?;
        if !table_exists {
            info!(schema = self.schema, table, "table does not exist, skipping partition delete");
        }
        Ok(table_exists)
    }

    async fn execute_with_retry(&self, statement: &Statement) -> Result<(), SummaryError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.engine.execute(statement).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.policy.attempts => {
                    let attempts_left = self.policy.attempts - attempt;
                    warn!(
                        schema = self.schema,
                        template = statement.template,
                        context = %statement.context(),
                        attempts_left,
                        error = %err,
                        "partition delete hit metastore contention, retrying"
                    );
                    if !self.policy.delay.is_zero() {
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
                Err(err) => {
                    return Err(SummaryError::from_backend(
                        STAGE,
                        statement.context(),
                        err,
                        attempt,
                    ))
                }
            }
        }
    }
}
