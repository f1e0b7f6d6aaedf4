use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use std::str::FromStr;
use std::time::Instant;
use tally_common::template::{
    is_valid_identifier, render_placeholders, Backend, BindError, ParamValue, Statement,
};
use tally_common::{BackendError, Manifest, ProviderType};
use tracing::debug;
use uuid::Uuid;

use crate::{BackendResult, ManifestStore, ProviderStore, StatementExecutor};

/// Transactional backend on PostgreSQL.
///
/// Uses `sqlx::query()` (not `query!`) so the crate builds without DATABASE_URL.
#[derive(Clone)]
pub struct PgBackend {
    pool: Pool<Postgres>,
}

impl PgBackend {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

fn db_error(err: sqlx::Error) -> BackendError {
    let name = match &err {
        sqlx::Error::Database(db) => db.code().map(|c| c.to_string()),
        _ => None,
    };
    BackendError::Execution {
        backend: Backend::Transactional,
        name,
        message: err.to_string(),
    }
}

fn bind_error(err: BindError) -> BackendError {
    BackendError::execution(Backend::Transactional, err.to_string())
}

/// Render one statement part: identifiers are inlined, every other distinct placeholder becomes `$n`.
pub fn render_postgres(
    part: &str,
    statement: &Statement,
) -> Result<(String, Vec<ParamValue>), BindError> {
    let mut order: Vec<String> = Vec::new();
    let mut binds: Vec<ParamValue> = Vec::new();
    let sql = render_placeholders(part, |name| {
        let value = statement.param(name).ok_or_else(|| BindError::Unbound {
            template: statement.template,
            name: name.to_string(),
        })?;
        match value {
            ParamValue::Identifier(s) => Ok(s.clone()),
            ParamValue::IdentifierList(v) => Ok(v.join(", ")),
            other => {
                let index = match order.iter().position(|n| n == name) {
                    Some(i) => i,
                    None => {
                        order.push(name.to_string());
                        binds.push(other.clone());
                        order.len() - 1
                    }
                };
                Ok(format!("${}", index + 1))
            }
        }
    })?;
    Ok((sql, binds))
}

fn render_all(statement: &Statement) -> BackendResult<Vec<(String, Vec<ParamValue>)>> {
    statement
        .parts()
        .into_iter()
        .map(|part| render_postgres(part, statement).map_err(bind_error))
        .collect()
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &ParamValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        ParamValue::Text(s) => query.bind(s.clone()),
        ParamValue::TextList(v) => query.bind(v.clone()),
        ParamValue::Int(i) => query.bind(*i),
        ParamValue::IntList(v) => query.bind(v.clone()),
        ParamValue::Date(d) => query.bind(*d),
        ParamValue::Decimal(d) => query.bind(d.clone()),
        ParamValue::Uuid(u) => query.bind(*u),
        ParamValue::UuidList(v) => query.bind(v.clone()),
        // inlined during rendering
        ParamValue::Identifier(_) | ParamValue::IdentifierList(_) => query,
    }
}

fn build_query<'q>(sql: &'q str, binds: &[ParamValue]) -> Query<'q, Postgres, PgArguments> {
    binds
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

/// First column of a row as JSON. Text columns holding JSON are decoded.
fn first_column(row: &PgRow) -> BackendResult<Value> {
    if let Ok(v) = row.try_get::<Option<Json<Value>>, _>(0) {
        return Ok(v.map(|j| j.0).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(0) {
        return Ok(v
            .map(|s| serde_json::from_str(&s).unwrap_or(Value::String(s)))
            .unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(0) {
        return Ok(v.map(Value::from).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(0) {
        return Ok(v.map(Value::from).unwrap_or(Value::Null));
    }
    Err(BackendError::execution(
        Backend::Transactional,
        "unsupported result column type (expected json, text, bigint or boolean)",
    ))
}

#[async_trait]
impl StatementExecutor for PgBackend {
    fn backend(&self) -> Backend {
        Backend::Transactional
    }

    async fn execute(&self, statement: &Statement) -> BackendResult<()> {
        self.execute_batch(std::slice::from_ref(statement)).await
    }

    async fn fetch(&self, statement: &Statement) -> BackendResult<Vec<Value>> {
        let rendered = render_all(statement)?;
        let total = rendered.len();
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut rows = Vec::new();
        for (index, (sql, binds)) in rendered.iter().enumerate() {
            rows = build_query(sql, binds)
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| db_error(e).in_part(index, total))?;
        }
        tx.commit().await.map_err(db_error)?;
        rows.iter().map(first_column).collect()
    }

    /// All parts of all statements commit together or not at all.
    async fn execute_batch(&self, statements: &[Statement]) -> BackendResult<()> {
        let start = Instant::now();
        let rendered = statements
            .iter()
            .map(|s| render_all(s).map(|parts| (s.template, parts)))
            .collect::<BackendResult<Vec<_>>>()?;

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        for (template, parts) in &rendered {
            let total = parts.len();
            for (index, (sql, binds)) in parts.iter().enumerate() {
                let res = build_query(sql, binds)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| db_error(e).in_part(index, total))?;
                debug!(
                    template = *template,
                    part = index + 1,
                    rows_affected = res.rows_affected(),
                    "postgres statement done"
                );
            }
        }
        tx.commit().await.map_err(db_error)?;

        debug!(
            statements = statements.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "postgres batch committed"
        );
        Ok(())
    }
}

#[async_trait]
impl ManifestStore for PgBackend {
    async fn manifest(&self, manifest_id: i64) -> BackendResult<Option<Manifest>> {
        let row: Option<(i64, Uuid, NaiveDate, bool)> = sqlx::query_as(
            r#"
            SELECT id::bigint,
                   provider_id,
                   billing_period_start_datetime::date,
                   completed_datetime IS NOT NULL AS ready_for_summary
            FROM reporting_common_costusagereportmanifest
            WHERE id = $1
            "#,
        )
        .bind(manifest_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(|(id, provider_uuid, billing_period_start, ready)| Manifest {
            id,
            provider_uuid,
            billing_period_start,
            ready_for_summary: ready,
        }))
    }

    async fn manifests_for_period(
        &self,
        provider_uuid: Uuid,
        billing_period_start: NaiveDate,
    ) -> BackendResult<Vec<Manifest>> {
        let rows: Vec<(i64, Uuid, NaiveDate, bool)> = sqlx::query_as(
            r#"
            SELECT id::bigint,
                   provider_id,
                   billing_period_start_datetime::date,
                   completed_datetime IS NOT NULL AS ready_for_summary
            FROM reporting_common_costusagereportmanifest
            WHERE provider_id = $1
              AND billing_period_start_datetime::date = $2
            ORDER BY id
            "#,
        )
        .bind(provider_uuid)
        .bind(billing_period_start)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows
            .into_iter()
            .map(|(id, provider_uuid, billing_period_start, ready)| Manifest {
                id,
                provider_uuid,
                billing_period_start,
                ready_for_summary: ready,
            })
            .collect())
    }
}

/// Accepts `12.5`, `"12.5"` or null.
pub fn markup_value(markup: &Value) -> Option<BigDecimal> {
    match markup.get("value")? {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

#[async_trait]
impl ProviderStore for PgBackend {
    async fn provider_type(&self, provider_uuid: Uuid) -> BackendResult<Option<ProviderType>> {
        let raw: Option<String> = sqlx::query_scalar("SELECT type FROM api_provider WHERE uuid = $1")
            .bind(provider_uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(raw.as_deref().and_then(ProviderType::parse))
    }

    async fn markup_percent(
        &self,
        schema: &str,
        provider_uuid: Uuid,
    ) -> BackendResult<Option<BigDecimal>> {
        if !is_valid_identifier(schema) {
            return Err(BackendError::execution(
                Backend::Transactional,
                format!("invalid schema name {:?}", schema),
            ));
        }
        let sql = format!(
            "SELECT cm.markup
             FROM {schema}.cost_model cm
             JOIN {schema}.cost_model_map cmm ON cmm.cost_model_id = cm.uuid
             WHERE cmm.provider_uuid = $1
             LIMIT 1"
        );
        let markup: Option<Option<Json<Value>>> = sqlx::query_scalar(&sql)
            .bind(provider_uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(markup.flatten().and_then(|Json(v)| markup_value(&v)))
    }
}
