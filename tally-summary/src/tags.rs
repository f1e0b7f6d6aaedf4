//! Tag matching between a cloud source and the container sources running on it.

use chrono::{Datelike, NaiveDate};
use tally_backends::{DistributedEngine, StatementExecutor};
use tally_common::template::{ParamValue, Params};
use tally_common::{list_days, BillingPeriod, SummaryError, TagMap};
use tracing::debug;
use uuid::Uuid;

use crate::sql;
use crate::stage;
use crate::tables::{TableRegistry, TableRole};

const STAGE: &str = "tag_matching";

pub struct TagReconciler<'a, T, D>
where
    T: StatementExecutor + ?Sized,
    D: DistributedEngine + ?Sized,
{
    transactional: &'a T,
    distributed: &'a D,
    registry: &'static TableRegistry,
    schema: &'a str,
}

impl<'a, T, D> TagReconciler<'a, T, D>
where
    T: StatementExecutor + ?Sized,
    D: DistributedEngine + ?Sized,
{
    pub fn new(
        transactional: &'a T,
        distributed: &'a D,
        registry: &'static TableRegistry,
        schema: &'a str,
    ) -> Self {
        Self {
            transactional,
            distributed,
            registry,
            schema,
        }
    }

    /// True when at least one tag key is enabled for both the cloud provider and the container platform.
    pub async fn has_matching_enabled_keys(&self) -> Result<bool, SummaryError> {
        let params = Params::new()
            .with("schema", ParamValue::ident(self.schema))
            .with(
                "enabled_table",
                ParamValue::ident(self.registry.table(TableRole::EnabledTagKeys)?),
            )
            .with(
                "container_enabled_table",
                ParamValue::ident(self.registry.table(TableRole::ContainerEnabledTagKeys)?),
            );
        let statement = stage::bind(STAGE, &sql::COUNT_MATCHING_ENABLED_KEYS, params)?;
        let rows = stage::fetch(self.transactional, STAGE, &statement).await?;
        let count = match rows.first() {
            None => 0,
            Some(value) => value
                .as_i64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| stage::malformed_row(STAGE, &statement, value))?,
        };
        debug!(schema = self.schema, count, "matching enabled tag keys");
        Ok(count >= 1)
    }

    /// Tag pairs of `bill_id` also carried by container pod labels, from the summary tables.
    ///
    /// Both variants match key and value case-insensitively. Enabled keys are checked up front by
    /// [`has_matching_enabled_keys`](Self::has_matching_enabled_keys).
    pub async fn matched_tags(&self, bill_id: i64) -> Result<Vec<TagMap>, SummaryError> {
        let params = Params::new()
            .with("schema", ParamValue::ident(self.schema))
            .with(
                "tags_table",
                ParamValue::ident(self.registry.table(TableRole::TagsSummary)?),
            )
            .with(
                "container_daily_table",
                ParamValue::ident(self.registry.table(TableRole::ContainerDailySummary)?),
            )
            .with("bill_id", bill_id);
        let statement = stage::bind(STAGE, &sql::MATCHED_TAGS, params)?;
        let rows = stage::fetch(self.transactional, STAGE, &statement).await?;
        decode_tag_rows(&statement, rows)
    }

    /// Same content as [`matched_tags`](Self::matched_tags), scanned from raw partitioned data.
    pub async fn matched_tags_distributed(
        &self,
        cloud_source: Uuid,
        ocp_sources: &[Uuid],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<TagMap>, SummaryError> {
        if ocp_sources.is_empty() {
            return Ok(Vec::new());
        }
        let layout = self.registry.daily_layout();
        let period = BillingPeriod::from_date(start_date);
        let days: Vec<String> = list_days(start_date, end_date)
            .iter()
            .map(|d| d.day().to_string())
            .collect();
        let params = Params::new()
            .with("schema", ParamValue::ident(self.schema))
            .with(
                "line_items_table",
                ParamValue::ident(self.registry.table(TableRole::LineItems)?),
            )
            .with(
                "pod_usage_table",
                ParamValue::ident(self.registry.table(TableRole::ContainerPodUsage)?),
            )
            .with("raw_tags_column", ParamValue::ident(layout.raw_tags_column))
            .with("raw_date_column", ParamValue::ident(layout.raw_date_column))
            .with("cloud_source", cloud_source)
            .with("ocp_sources", ocp_sources.to_vec())
            .with("year", period.year_str())
            .with("month", period.month_str())
            .with("month_unpadded", period.month.to_string())
            .with("days", days)
            .with("start_date", start_date)
            .with("end_date", end_date);
        let statement = stage::bind(STAGE, &sql::MATCHED_TAGS_DISTRIBUTED, params)?;
        let rows = stage::fetch(self.distributed, STAGE, &statement).await?;
        decode_tag_rows(&statement, rows)
    }
}

fn decode_tag_rows(
    statement: &tally_common::template::Statement,
    rows: Vec<serde_json::Value>,
) -> Result<Vec<TagMap>, SummaryError> {
    let mut tags: Vec<TagMap> = Vec::with_capacity(rows.len());
    for row in rows {
        let tag = TagMap::from_json(&row)
            .ok_or_else(|| stage::malformed_row(STAGE, statement, &row))?;
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    Ok(tags)
}

/// `"key": "value"` fragments matched against raw JSON tag text by the overlay query.
pub fn matched_tag_strings(tags: &[TagMap]) -> Vec<String> {
    tags.iter()
        .map(|tag| {
            tag.iter()
                .map(|(k, v)| {
                    format!(
                        "{}: {}",
                        serde_json::Value::from(k.as_str()),
                        serde_json::Value::from(v.as_str())
                    )
                })
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tally_backends::mock::MockEngine;
    use tally_common::ProviderType;

    fn aws() -> &'static TableRegistry {
        TableRegistry::for_provider(ProviderType::Aws).unwrap()
    }

    #[tokio::test]
    async fn enabled_key_overlap() {
        let pg = MockEngine::transactional();
        let trino = MockEngine::distributed();
        let reconciler = TagReconciler::new(&pg, &trino, aws(), "acct1");

        pg.respond("count_matching_enabled_keys", vec![json!(0)]);
        assert!(!reconciler.has_matching_enabled_keys().await.unwrap());

        pg.respond("count_matching_enabled_keys", vec![json!(2)]);
        assert!(reconciler.has_matching_enabled_keys().await.unwrap());

        let executed = pg.executed();
        let statement = &executed[0];
        assert_eq!(
            statement.param("enabled_table"),
            Some(&ParamValue::ident("reporting_awsenabledtagkeys"))
        );
        assert!(trino.calls().is_empty());
    }

    #[tokio::test]
    async fn both_variants_return_structured_maps() {
        let pg = MockEngine::transactional();
        let trino = MockEngine::distributed();
        pg.respond(
            "matched_tags",
            vec![json!({"app": "web"}), json!({"env": "prod"}), json!({"app": "web"})],
        );
        trino.respond(
            "matched_tags_distributed",
            vec![json!("{\"app\":\"web\"}"), json!({"env": "prod"})],
        );
        let reconciler = TagReconciler::new(&pg, &trino, aws(), "acct1");

        let from_summary = reconciler.matched_tags(4).await.unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2023, 7, d).unwrap();
        let from_raw = reconciler
            .matched_tags_distributed(Uuid::new_v4(), &[Uuid::new_v4()], day(1), day(3))
            .await
            .unwrap();

        assert_eq!(from_summary, from_raw);
        assert_eq!(from_summary.len(), 2);
        assert_eq!(from_summary[0].get("APP"), Some("web"));

        let executed = trino.executed();
        let statement = &executed[0];
        assert_eq!(
            statement.param("days"),
            Some(&ParamValue::TextList(vec!["1".into(), "2".into(), "3".into()]))
        );
    }

    #[tokio::test]
    async fn malformed_tag_row_is_an_error() {
        let pg = MockEngine::transactional();
        let trino = MockEngine::distributed();
        pg.respond("matched_tags", vec![json!(42)]);
        let reconciler = TagReconciler::new(&pg, &trino, aws(), "acct1");
        assert!(matches!(
            reconciler.matched_tags(1).await,
            Err(SummaryError::StatementExecution { .. })
        ));
    }

    #[test]
    fn tag_strings_drop_the_braces() {
        let tags: Vec<TagMap> = vec![[("app", "web")].into_iter().collect()];
        assert_eq!(matched_tag_strings(&tags), vec![r#""app": "web""#.to_string()]);
    }
}
