use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use tally_common::template::{Backend, Statement};
use tally_common::{BackendError, Manifest, ProviderType};
use uuid::Uuid;

pub mod postgres;
pub mod trino;

#[cfg(feature = "mock")]
pub mod mock;

pub type BackendResult<T> = Result<T, BackendError>;

/// Runs bound statements against one backend.
///
/// Read statements return one JSON value per row (the first column); backends decode JSON text
/// columns so callers always see structured values.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    fn backend(&self) -> Backend;

    /// Run every part of the statement. The transactional backend wraps the parts in one
    /// transaction; the distributed engine runs them in order and stops at the first failure.
    async fn execute(&self, statement: &Statement) -> BackendResult<()>;

    async fn fetch(&self, statement: &Statement) -> BackendResult<Vec<serde_json::Value>>;

    /// Run several statements as one unit. Default: sequentially, stop at first failure.
    async fn execute_batch(&self, statements: &[Statement]) -> BackendResult<()> {
        for statement in statements {
            self.execute(statement).await?;
        }
        Ok(())
    }
}

/// Existence checks against the distributed engine's catalog.
#[async_trait]
pub trait CatalogProbe: Send + Sync {
    async fn schema_exists(&self, schema: &str) -> BackendResult<bool>;
    async fn table_exists(&self, schema: &str, table: &str) -> BackendResult<bool>;
}

/// The distributed query engine: statements plus catalog lookups.
pub trait DistributedEngine: StatementExecutor + CatalogProbe {}

impl<T: StatementExecutor + CatalogProbe> DistributedEngine for T {}

/// Read-only view of ingestion manifests.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn manifest(&self, manifest_id: i64) -> BackendResult<Option<Manifest>>;

    /// All manifests of one provider for the billing period starting on `billing_period_start`.
    async fn manifests_for_period(
        &self,
        provider_uuid: Uuid,
        billing_period_start: NaiveDate,
    ) -> BackendResult<Vec<Manifest>>;
}

/// Read-only view of sources and their cost models.
#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn provider_type(&self, provider_uuid: Uuid) -> BackendResult<Option<ProviderType>>;

    /// Markup percentage from the provider's cost model, if it has one.
    async fn markup_percent(
        &self,
        schema: &str,
        provider_uuid: Uuid,
    ) -> BackendResult<Option<BigDecimal>>;
}
