#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tally_backends::mock::{InMemoryManifests, MockEngine, StaticProviders};
use tally_common::template::{ParamValue, Statement};
use tally_common::{Manifest, ProviderType};
use tally_summary::partition::RetryPolicy;
use tally_summary::Summarizer;
use uuid::Uuid;

pub const SCHEMA: &str = "acct10001";

pub const AWS_OVERLAY_TABLES: &[&str] = &[
    "aws_openshift_daily_resource_matched_temp",
    "aws_openshift_daily_tag_matched_temp",
    "reporting_ocpawscostlineitem_project_daily_summary_temp",
    "reporting_ocpawscostlineitem_project_daily_summary",
];

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn manifest(id: i64, provider: Uuid, start: NaiveDate, ready: bool) -> Manifest {
    Manifest {
        id,
        provider_uuid: provider,
        billing_period_start: start,
        ready_for_summary: ready,
    }
}

pub fn bill_row(id: i64, provider: Uuid, start: NaiveDate) -> serde_json::Value {
    json!({
        "id": id,
        "provider_uuid": provider,
        "billing_period_start": start.to_string(),
    })
}

pub fn decimal(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

pub struct Harness {
    pub provider: Uuid,
    pub pg: Arc<MockEngine>,
    pub trino: Arc<MockEngine>,
    pub summarizer: Summarizer,
}

pub struct HarnessBuilder {
    provider: Uuid,
    provider_type: ProviderType,
    manifests: InMemoryManifests,
    markup_percent: Option<BigDecimal>,
    retry: RetryPolicy,
    pg: Option<Arc<MockEngine>>,
}

impl HarnessBuilder {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider: Uuid::new_v4(),
            provider_type,
            manifests: InMemoryManifests::new(),
            markup_percent: None,
            retry: RetryPolicy::new(5, Duration::ZERO),
            pg: None,
        }
    }

    pub fn provider(mut self, provider: Uuid) -> Self {
        self.provider = provider;
        self
    }

    pub fn manifest(mut self, manifest: Manifest) -> Self {
        self.manifests = self.manifests.with(manifest);
        self
    }

    pub fn markup(mut self, percent: &str) -> Self {
        self.markup_percent = Some(decimal(percent));
        self
    }

    pub fn retry(mut self, attempts: u32) -> Self {
        self.retry = RetryPolicy::new(attempts, Duration::ZERO);
        self
    }

    /// Reuse a transactional engine from an earlier harness.
    pub fn pg(mut self, pg: Arc<MockEngine>) -> Self {
        self.pg = Some(pg);
        self
    }

    pub fn build(self) -> Harness {
        let pg = self.pg.unwrap_or_else(|| Arc::new(MockEngine::transactional()));
        let trino = AWS_OVERLAY_TABLES
            .iter()
            .fold(MockEngine::distributed().with_schema(SCHEMA), |engine, table| {
                engine.with_table(SCHEMA, table)
            });
        let trino = Arc::new(trino);

        let mut providers = StaticProviders::new().with_type(self.provider, self.provider_type);
        if let Some(percent) = self.markup_percent {
            providers = providers.with_markup(SCHEMA, self.provider, percent);
        }

        let summarizer = Summarizer::new(
            pg.clone(),
            trino.clone(),
            Arc::new(self.manifests),
            Arc::new(providers),
            self.retry,
        );
        Harness {
            provider: self.provider,
            pg,
            trino,
            summarizer,
        }
    }
}

impl Harness {
    /// Answer the bill lookup with one bill for the month of `start`.
    pub fn with_bill(&self, id: i64, start: NaiveDate) {
        self.pg.respond(
            "bills_for_provider_period",
            vec![bill_row(id, self.provider, start)],
        );
    }
}

pub fn executed_named(engine: &MockEngine, template: &str) -> Vec<Statement> {
    engine
        .executed()
        .into_iter()
        .filter(|s| s.template == template)
        .collect()
}

pub fn position(templates: &[&'static str], template: &str) -> usize {
    templates
        .iter()
        .position(|t| *t == template)
        .unwrap_or_else(|| panic!("{template} was not executed: {templates:?}"))
}

pub fn date_param(statement: &Statement, name: &str) -> NaiveDate {
    match statement.param(name) {
        Some(ParamValue::Date(date)) => *date,
        other => panic!("{name} is not a date: {other:?}"),
    }
}
