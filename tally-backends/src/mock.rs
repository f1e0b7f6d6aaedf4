//! In-memory collaborators for tests: nothing here touches a network.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tally_common::template::{Backend, Statement};
use tally_common::{BackendError, Manifest, ProviderType};
use uuid::Uuid;

use crate::{BackendResult, CatalogProbe, ManifestStore, ProviderStore, StatementExecutor};

#[derive(Default)]
struct EngineState {
    calls: Vec<Statement>,
    executed: Vec<Statement>,
    failures: HashMap<String, VecDeque<BackendError>>,
    responses: HashMap<String, Vec<Value>>,
    schemas: HashSet<String>,
    tables: HashSet<(String, String)>,
}

/// Records statements instead of running them.
///
/// Failures are scripted per template name and consumed one per call. The transactional flavour
/// applies `execute_batch` atomically: a failing batch records nothing.
pub struct MockEngine {
    backend: Backend,
    state: Mutex<EngineState>,
}

impl MockEngine {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn transactional() -> Self {
        Self::new(Backend::Transactional)
    }

    pub fn distributed() -> Self {
        Self::new(Backend::Distributed)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        // A panicking test thread must not hide the recorded calls from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The next `times` calls of `template` fail with `err`.
    pub fn fail(&self, template: &str, err: BackendError, times: usize) {
        let mut state = self.state();
        let queue = state.failures.entry(template.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(err.clone());
        }
    }

    /// Rows returned by `fetch` for `template`.
    pub fn respond(&self, template: &str, rows: Vec<Value>) {
        self.state().responses.insert(template.to_string(), rows);
    }

    pub fn with_schema(self, schema: &str) -> Self {
        self.state().schemas.insert(schema.to_string());
        self
    }

    pub fn with_table(self, schema: &str, table: &str) -> Self {
        {
            let mut state = self.state();
            state.schemas.insert(schema.to_string());
            state.tables.insert((schema.to_string(), table.to_string()));
        }
        self
    }

    /// Statements that completed, in order.
    pub fn executed(&self) -> Vec<Statement> {
        self.state().executed.clone()
    }

    pub fn executed_templates(&self) -> Vec<&'static str> {
        self.state().executed.iter().map(|s| s.template).collect()
    }

    /// Every attempt, failed ones included.
    pub fn calls(&self) -> Vec<Statement> {
        self.state().calls.clone()
    }

    pub fn attempts(&self, template: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|s| s.template == template)
            .count()
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.calls.clear();
        state.executed.clear();
    }

    fn attempt(&self, statement: &Statement) -> BackendResult<()> {
        let mut state = self.state();
        state.calls.push(statement.clone());
        match state
            .failures
            .get_mut(statement.template)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StatementExecutor for MockEngine {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn execute(&self, statement: &Statement) -> BackendResult<()> {
        self.attempt(statement)?;
        self.state().executed.push(statement.clone());
        Ok(())
    }

    async fn fetch(&self, statement: &Statement) -> BackendResult<Vec<Value>> {
        self.attempt(statement)?;
        let mut state = self.state();
        state.executed.push(statement.clone());
        Ok(state
            .responses
            .get(statement.template)
            .cloned()
            .unwrap_or_default())
    }

    async fn execute_batch(&self, statements: &[Statement]) -> BackendResult<()> {
        if self.backend == Backend::Distributed {
            for statement in statements {
                self.execute(statement).await?;
            }
            return Ok(());
        }
        for statement in statements {
            self.attempt(statement)?;
        }
        self.state().executed.extend(statements.iter().cloned());
        Ok(())
    }
}

#[async_trait]
impl CatalogProbe for MockEngine {
    async fn schema_exists(&self, schema: &str) -> BackendResult<bool> {
        Ok(self.state().schemas.contains(schema))
    }

    async fn table_exists(&self, schema: &str, table: &str) -> BackendResult<bool> {
        Ok(self
            .state()
            .tables
            .contains(&(schema.to_string(), table.to_string())))
    }
}

#[derive(Default)]
pub struct InMemoryManifests {
    manifests: Vec<Manifest>,
}

impl InMemoryManifests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, manifest: Manifest) -> Self {
        self.manifests.push(manifest);
        self
    }
}

#[async_trait]
impl ManifestStore for InMemoryManifests {
    async fn manifest(&self, manifest_id: i64) -> BackendResult<Option<Manifest>> {
        Ok(self.manifests.iter().find(|m| m.id == manifest_id).cloned())
    }

    async fn manifests_for_period(
        &self,
        provider_uuid: Uuid,
        billing_period_start: NaiveDate,
    ) -> BackendResult<Vec<Manifest>> {
        Ok(self
            .manifests
            .iter()
            .filter(|m| {
                m.provider_uuid == provider_uuid && m.billing_period_start == billing_period_start
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct StaticProviders {
    types: HashMap<Uuid, ProviderType>,
    markups: HashMap<(String, Uuid), BigDecimal>,
}

impl StaticProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, provider_uuid: Uuid, provider_type: ProviderType) -> Self {
        self.types.insert(provider_uuid, provider_type);
        self
    }

    pub fn with_markup(mut self, schema: &str, provider_uuid: Uuid, percent: BigDecimal) -> Self {
        self.markups.insert((schema.to_string(), provider_uuid), percent);
        self
    }
}

#[async_trait]
impl ProviderStore for StaticProviders {
    async fn provider_type(&self, provider_uuid: Uuid) -> BackendResult<Option<ProviderType>> {
        Ok(self.types.get(&provider_uuid).copied())
    }

    async fn markup_percent(
        &self,
        schema: &str,
        provider_uuid: Uuid,
    ) -> BackendResult<Option<BigDecimal>> {
        Ok(self
            .markups
            .get(&(schema.to_string(), provider_uuid))
            .cloned())
    }
}
