use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tally_common::template::{
    is_valid_identifier, render_placeholders, Backend, BindError, ParamValue, Statement,
};
use tally_common::BackendError;
use tracing::debug;

use crate::{BackendResult, CatalogProbe, StatementExecutor};

const SOURCE: &str = "tally-summary";

/// Distributed engine over the Trino REST protocol (`/v1/statement`).
///
/// Each part of a script is submitted on its own; there are no transactions across parts.
pub struct TrinoClient {
    client: Client,
    base_url: String,
    user: String,
    catalog: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResults {
    #[serde(default)]
    next_uri: Option<String>,
    #[serde(default)]
    data: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    error: Option<QueryError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryError {
    message: String,
    #[serde(default)]
    error_name: Option<String>,
}

impl TrinoClient {
    pub fn new(base_url: &str, user: &str, catalog: &str) -> Result<Self> {
        // Status polls are short; long queries keep returning nextUri.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()
            .context("building trino http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            user: user.trim().to_string(),
            catalog: catalog.trim().to_string(),
        })
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    fn headers(&self) -> BackendResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("X-Trino-User", self.user.as_str()),
            ("X-Trino-Catalog", self.catalog.as_str()),
            ("X-Trino-Source", SOURCE),
        ] {
            let value = HeaderValue::from_str(value).map_err(|e| transport(format!("{name}: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Submit one SQL statement and drain all result pages.
    async fn run(&self, sql: &str) -> BackendResult<Vec<Vec<Value>>> {
        let start = Instant::now();
        let resp = self
            .client
            .post(format!("{}/v1/statement", self.base_url))
            .headers(self.headers()?)
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;
        let mut page = decode(resp).await?;

        let mut rows = Vec::new();
        loop {
            if let Some(err) = page.error.take() {
                return Err(BackendError::from_engine(
                    Backend::Distributed,
                    err.error_name.as_deref(),
                    err.message,
                ));
            }
            if let Some(data) = page.data.take() {
                rows.extend(data);
            }
            let Some(next) = page.next_uri.take() else {
                break;
            };
            let resp = self
                .client
                .get(&next)
                .headers(self.headers()?)
                .send()
                .await
                .map_err(|e| transport(e.to_string()))?;
            page = decode(resp).await?;
        }

        debug!(
            rows = rows.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "trino query finished"
        );
        Ok(rows)
    }

    async fn run_statement(&self, statement: &Statement) -> BackendResult<Vec<Vec<Value>>> {
        let parts = statement.parts();
        let total = parts.len();
        let mut rows = Vec::new();
        for (index, part) in parts.into_iter().enumerate() {
            let sql = render_trino(part, statement)
                .map_err(|e| BackendError::execution(Backend::Distributed, e.to_string()))?;
            rows = self
                .run(&sql)
                .await
                .map_err(|e| e.in_part(index, total))?;
            debug!(template = statement.template, part = index + 1, total, "trino part done");
        }
        Ok(rows)
    }

    async fn count(&self, sql: &str) -> BackendResult<i64> {
        let rows = self.run(sql).await?;
        Ok(rows
            .first()
            .and_then(|r| r.first())
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }
}

fn transport(message: String) -> BackendError {
    BackendError::execution(Backend::Distributed, message)
}

async fn decode(resp: reqwest::Response) -> BackendResult<QueryResults> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(transport(format!("http {}: {}", status, body)));
    }
    resp.json::<QueryResults>()
        .await
        .map_err(|e| transport(format!("invalid response: {e}")))
}

/// `'it''s'`
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn join_or_null(items: Vec<String>) -> String {
    if items.is_empty() {
        // `IN (NULL)` matches nothing
        "NULL".to_string()
    } else {
        items.join(", ")
    }
}

/// SQL literal for a bound value. Lists render comma separated, for use inside `IN (...)`.
pub fn trino_literal(value: &ParamValue) -> String {
    match value {
        ParamValue::Identifier(s) => s.clone(),
        ParamValue::IdentifierList(v) => v.join(", "),
        ParamValue::Text(s) => quote_literal(s),
        ParamValue::TextList(v) => join_or_null(v.iter().map(|s| quote_literal(s)).collect()),
        ParamValue::Int(i) => i.to_string(),
        ParamValue::IntList(v) => join_or_null(v.iter().map(|i| i.to_string()).collect()),
        ParamValue::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
        ParamValue::Decimal(d) => format!("DECIMAL '{}'", d),
        ParamValue::Uuid(u) => quote_literal(&u.to_string()),
        ParamValue::UuidList(v) => {
            join_or_null(v.iter().map(|u| quote_literal(&u.to_string())).collect())
        }
    }
}

/// Render one part of a statement with every placeholder inlined as a literal.
pub fn render_trino(part: &str, statement: &Statement) -> Result<String, BindError> {
    render_placeholders(part, |name| {
        statement
            .param(name)
            .map(trino_literal)
            .ok_or_else(|| BindError::Unbound {
                template: statement.template,
                name: name.to_string(),
            })
    })
}

/// Result cells arrive as JSON; varchar cells holding JSON documents are decoded.
fn cell(value: Value) -> Value {
    match value {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(v @ (Value::Object(_) | Value::Array(_))) => v,
            _ => Value::String(s),
        },
        other => other,
    }
}

#[async_trait]
impl StatementExecutor for TrinoClient {
    fn backend(&self) -> Backend {
        Backend::Distributed
    }

    async fn execute(&self, statement: &Statement) -> BackendResult<()> {
        self.run_statement(statement).await.map(|_| ())
    }

    async fn fetch(&self, statement: &Statement) -> BackendResult<Vec<Value>> {
        let rows = self.run_statement(statement).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().next().map(cell).unwrap_or(Value::Null))
            .collect())
    }
}

#[async_trait]
impl CatalogProbe for TrinoClient {
    async fn schema_exists(&self, schema: &str) -> BackendResult<bool> {
        if !is_valid_identifier(schema) {
            return Ok(false);
        }
        let sql = format!(
            "SELECT count(*) FROM {}.information_schema.schemata WHERE schema_name = {}",
            self.catalog,
            quote_literal(schema)
        );
        Ok(self.count(&sql).await? > 0)
    }

    async fn table_exists(&self, schema: &str, table: &str) -> BackendResult<bool> {
        if !is_valid_identifier(schema) || !is_valid_identifier(table) {
            return Ok(false);
        }
        let sql = format!(
            "SELECT count(*) FROM {}.information_schema.tables WHERE table_schema = {} AND table_name = {}",
            self.catalog,
            quote_literal(schema),
            quote_literal(table)
        );
        Ok(self.count(&sql).await? > 0)
    }
}
