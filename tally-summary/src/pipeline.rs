//! The aggregation stages, run in order for one provider and billing window.
//!
//! 1. daily summary
//! 2. tag summary
//! 3. container overlay summary
//! 4. UI projections
//! 5. enabled tag back-propagation
//! 6. container daily summary back-population
//!
//! Each stage is its own commit boundary. A failing stage stops the run and reports its name and
//! bound parameters so the caller can retry it wholesale.

use chrono::{Datelike, NaiveDate};
use tally_backends::{DistributedEngine, StatementExecutor};
use tally_common::bus::OverlayRequest;
use tally_common::template::{ParamValue, Params, Statement};
use tally_common::{list_days, BillingPeriod, MarkupRate, SummaryError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::partition::{PartitionManager, RetryPolicy, SourceKey};
use crate::sql;
use crate::stage::{self, StageReport, StageTimer};
use crate::tables::{TableRegistry, TableRole, UiProjection};
use crate::tags::{matched_tag_strings, TagReconciler};

pub const DAILY_SUMMARY: &str = "daily_summary";
pub const TAG_SUMMARY: &str = "tag_summary";
pub const OVERLAY_SUMMARY: &str = "overlay_summary";
pub const UI_SUMMARY: &str = "ui_summary";
pub const ENABLED_TAGS: &str = "enabled_tags";
pub const BACK_POPULATE: &str = "back_populate";

/// Partition column holding the container source in overlay tables.
const OCP_SOURCE_COLUMN: &str = "ocp_source";

/// One unit of work: a provider's bills over `[start_date, end_date]`, inside one billing month.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryWindow {
    pub provider_uuid: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub bill_ids: Vec<i64>,
    pub markup: MarkupRate,
    pub overlays: Vec<OverlayRequest>,
}

impl SummaryWindow {
    pub fn period(&self) -> BillingPeriod {
        BillingPeriod::from_date(self.start_date)
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        list_days(self.start_date, self.end_date)
    }

    /// Day partition values, unpadded.
    pub fn day_strings(&self) -> Vec<String> {
        self.days().iter().map(|d| d.day().to_string()).collect()
    }

    fn bill_id(&self) -> Result<i64, SummaryError> {
        self.bill_ids.first().copied().ok_or_else(|| {
            SummaryError::Configuration(format!(
                "no cost entry bill for provider {} in {}",
                self.provider_uuid,
                self.period()
            ))
        })
    }
}

fn with_period(params: Params, period: BillingPeriod) -> Params {
    params
        .with("year", period.year_str())
        .with("month", period.month_str())
        .with("month_unpadded", period.month.to_string())
}

fn ident(name: &str) -> ParamValue {
    ParamValue::ident(name)
}

pub struct Pipeline<'a, T, D>
where
    T: StatementExecutor + ?Sized,
    D: DistributedEngine + ?Sized,
{
    transactional: &'a T,
    distributed: &'a D,
    registry: &'static TableRegistry,
    schema: &'a str,
    retry: RetryPolicy,
}

impl<'a, T, D> Pipeline<'a, T, D>
where
    T: StatementExecutor + ?Sized,
    D: DistributedEngine + ?Sized,
{
    pub fn new(
        transactional: &'a T,
        distributed: &'a D,
        registry: &'static TableRegistry,
        schema: &'a str,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transactional,
            distributed,
            registry,
            schema,
            retry,
        }
    }

    /// Run stages 1 to 6 in order.
    pub async fn run(&self, window: &SummaryWindow) -> Result<Vec<StageReport>, SummaryError> {
        if window.end_date < window.start_date {
            return Err(SummaryError::Configuration(format!(
                "empty window {}..{}",
                window.start_date, window.end_date
            )));
        }
        if !window.period().contains(window.end_date) {
            return Err(SummaryError::Configuration(format!(
                "window {}..{} spans more than one billing month",
                window.start_date, window.end_date
            )));
        }
        info!(
            schema = self.schema,
            provider_uuid = %window.provider_uuid,
            start_date = %window.start_date,
            end_date = %window.end_date,
            bill_ids = ?window.bill_ids,
            markup = %window.markup,
            "running summary pipeline"
        );

        Ok(vec![
            self.daily_summary(window).await?,
            self.tag_summary(window).await?,
            self.overlay_summary(window).await?,
            self.ui_summary(window).await?,
            self.enabled_tags(window).await?,
            self.back_populate(window).await?,
        ])
    }

    /// Stage 1: clear the window on the transactional side, then aggregate raw line items into it.
    pub async fn daily_summary(&self, window: &SummaryWindow) -> Result<StageReport, SummaryError> {
        let mut timer = StageTimer::start(DAILY_SUMMARY);
        let daily_table = self.registry.table(TableRole::LineItemDailySummary)?;
        let layout = self.registry.daily_layout();

        let delete = stage::bind(
            DAILY_SUMMARY,
            &sql::DELETE_DAILY_SUMMARY_RANGE,
            Params::new()
                .with("schema", ident(self.schema))
                .with("table", ident(daily_table))
                .with("source_uuid", window.provider_uuid)
                .with("start_date", window.start_date)
                .with("end_date", window.end_date),
        )?;
        stage::execute(self.transactional, DAILY_SUMMARY, &delete).await?;
        timer.count(1);

        let params = Params::new()
            .with("schema", ident(self.schema))
            .with("daily_table", ident(daily_table))
            .with("line_items_table", ident(self.registry.table(TableRole::LineItems)?))
            .with("summary_dimensions", ParamValue::idents(layout.summary_dimensions.iter().copied()))
            .with("raw_dimensions", ParamValue::idents(layout.raw_dimensions.iter().copied()))
            .with("raw_date_column", ident(layout.raw_date_column))
            .with("raw_cost_column", ident(layout.raw_cost_column))
            .with("raw_tags_column", ident(layout.raw_tags_column))
            .with("cost_column", ident(self.registry.cost_column()))
            .with("source_uuid", window.provider_uuid)
            .with("bill_id", window.bill_id()?)
            .with("start_date", window.start_date)
            .with("end_date", window.end_date)
            .with("markup", window.markup.as_decimal().clone());
        let populate = stage::bind(
            DAILY_SUMMARY,
            &sql::POPULATE_DAILY_SUMMARY,
            with_period(params, window.period()),
        )?;
        stage::execute(self.distributed, DAILY_SUMMARY, &populate).await?;
        timer.count(1);

        Ok(timer.finish())
    }

    /// Stage 2: tag keys/values seen in the window, and newly seen keys.
    pub async fn tag_summary(&self, window: &SummaryWindow) -> Result<StageReport, SummaryError> {
        let mut timer = StageTimer::start(TAG_SUMMARY);
        let daily_table = self.registry.table(TableRole::LineItemDailySummary)?;
        let scope = || {
            Params::new()
                .with("schema", ident(self.schema))
                .with("daily_table", ident(daily_table))
                .with("bill_ids", window.bill_ids.clone())
                .with("start_date", window.start_date)
                .with("end_date", window.end_date)
        };

        let statements = vec![
            stage::bind(
                TAG_SUMMARY,
                &sql::POPULATE_TAGS_SUMMARY,
                scope().with("tags_table", ident(self.registry.table(TableRole::TagsSummary)?)),
            )?,
            stage::bind(
                TAG_SUMMARY,
                &sql::POPULATE_ENABLED_TAG_KEYS,
                scope().with(
                    "enabled_table",
                    ident(self.registry.table(TableRole::EnabledTagKeys)?),
                ),
            )?,
        ];
        stage::execute_batch(self.transactional, TAG_SUMMARY, &statements).await?;
        timer.count(statements.len());

        Ok(timer.finish())
    }

    /// Stage 3: attribute cloud cost to the container projects running on it.
    pub async fn overlay_summary(&self, window: &SummaryWindow) -> Result<StageReport, SummaryError> {
        let mut timer = StageTimer::start(OVERLAY_SUMMARY);
        if window.overlays.is_empty() {
            return Ok(timer.finish());
        }
        if !self.registry.has_overlay() {
            warn!(
                provider = %self.registry.provider(),
                overlays = window.overlays.len(),
                "provider type has no overlay tables, skipping overlay summary"
            );
            return Ok(timer.finish());
        }

        let reconciler =
            TagReconciler::new(self.transactional, self.distributed, self.registry, self.schema);
        let has_matching_keys = reconciler.has_matching_enabled_keys().await?;
        for overlay in &window.overlays {
            let statements = self
                .overlay_one(window, overlay, &reconciler, has_matching_keys)
                .await?;
            timer.count(statements);
        }

        Ok(timer.finish())
    }

    async fn overlay_one(
        &self,
        window: &SummaryWindow,
        overlay: &OverlayRequest,
        reconciler: &TagReconciler<'_, T, D>,
        has_matching_keys: bool,
    ) -> Result<usize, SummaryError> {
        let cloud = window.provider_uuid;
        let ocp = overlay.ocp_provider_uuid;
        let period = window.period();
        let days = window.days();
        let source_column = self
            .registry
            .overlay_source_column()
            .ok_or_else(|| SummaryError::Configuration("overlay source column".to_string()))?;
        let partitioned = self.registry.table(TableRole::OverlayProjectDailySummaryPartitioned)?;
        let project_table = self.registry.table(TableRole::OverlayProjectDailySummary)?;
        let mut statements = 0;

        info!(
            schema = self.schema,
            cloud_source = %cloud,
            ocp_source = %ocp,
            report_period_id = overlay.report_period_id,
            distribution = ?overlay.distribution,
            "running overlay summary"
        );

        // (a) stale partitions
        let partitions = PartitionManager::new(self.distributed, self.schema, self.retry);
        for temp in self.registry.overlay_temp_tables() {
            statements += partitions
                .delete_partition_by_month(temp, OCP_SOURCE_COLUMN, ocp, period)
                .await
                .map_err(|err| err.within(OVERLAY_SUMMARY))?;
        }
        statements += partitions
            .delete_partition_by_day(
                partitioned,
                SourceKey::new(source_column, cloud),
                SourceKey::new(OCP_SOURCE_COLUMN, ocp),
                &days,
            )
            .await
            .map_err(|err| err.within(OVERLAY_SUMMARY))?;

        let delete = stage::bind(
            OVERLAY_SUMMARY,
            &sql::DELETE_OVERLAY_PROJECT_RANGE,
            Params::new()
                .with("schema", ident(self.schema))
                .with("table", ident(project_table))
                .with("source_uuid", cloud)
                .with("report_period_id", overlay.report_period_id)
                .with("start_date", window.start_date)
                .with("end_date", window.end_date),
        )?;
        stage::execute(self.transactional, OVERLAY_SUMMARY, &delete).await?;
        statements += 1;

        let matched_tags = if has_matching_keys {
            reconciler
                .matched_tags_distributed(cloud, &[ocp], window.start_date, window.end_date)
                .await?
        } else {
            Vec::new()
        };

        // (b) aggregation, (c) markup
        let layout = self.registry.daily_layout();
        let params = Params::new()
            .with("schema", ident(self.schema))
            .with("line_items_table", ident(self.registry.table(TableRole::LineItems)?))
            .with("pod_usage_table", ident(self.registry.table(TableRole::ContainerPodUsage)?))
            .with("resource_temp", ident(self.registry.table(TableRole::OverlayResourceMatchedTemp)?))
            .with("tag_temp", ident(self.registry.table(TableRole::OverlayTagMatchedTemp)?))
            .with("project_temp", ident(self.registry.table(TableRole::OverlayProjectDailySummaryTemp)?))
            .with("project_partitioned", ident(partitioned))
            .with("project_table", ident(project_table))
            .with("raw_date_column", ident(layout.raw_date_column))
            .with("raw_cost_column", ident(layout.raw_cost_column))
            .with("raw_tags_column", ident(layout.raw_tags_column))
            .with("raw_resource_column", ident(layout.raw_resource_column))
            .with("cost_column", ident(self.registry.cost_column()))
            .with("overlay_source_column", ident(source_column))
            .with("pod_column", ident(overlay.distribution.pod_column()))
            .with("node_column", ident(overlay.distribution.node_column()))
            .with("cloud_source", cloud)
            .with("ocp_source", ocp)
            .with("days", window.day_strings())
            .with("start_date", window.start_date)
            .with("end_date", window.end_date)
            .with("report_period_id", overlay.report_period_id)
            .with("bill_id", window.bill_id()?)
            .with("markup", window.markup.as_decimal().clone())
            .with("matched_tag_strs", matched_tag_strings(&matched_tags));
        let populate = stage::bind(
            OVERLAY_SUMMARY,
            &sql::POPULATE_OVERLAY_DAILY_SUMMARY,
            with_period(params, period),
        )?;
        stage::execute(self.distributed, OVERLAY_SUMMARY, &populate).await?;
        statements += 1;

        for projection in self.registry.overlay_ui_projections() {
            let ui = self.overlay_ui_statement(window, overlay, projection, partitioned, source_column)?;
            stage::execute(self.distributed, OVERLAY_SUMMARY, &ui).await?;
            statements += 1;
        }

        let tags = stage::bind(
            OVERLAY_SUMMARY,
            &sql::POPULATE_OVERLAY_TAGS_SUMMARY,
            Params::new()
                .with("schema", ident(self.schema))
                .with("project_table", ident(project_table))
                .with("tags_table", ident(self.registry.table(TableRole::OverlayTagsSummary)?))
                .with("bill_ids", window.bill_ids.clone())
                .with("start_date", window.start_date)
                .with("end_date", window.end_date),
        )?;
        stage::execute(self.transactional, OVERLAY_SUMMARY, &tags).await?;
        statements += 1;

        Ok(statements)
    }

    fn overlay_ui_statement(
        &self,
        window: &SummaryWindow,
        overlay: &OverlayRequest,
        projection: &UiProjection,
        partitioned: &str,
        source_column: &str,
    ) -> Result<Statement, SummaryError> {
        let params = Params::new()
            .with("schema", ident(self.schema))
            .with("ui_table", ident(projection.table))
            .with("project_partitioned", ident(partitioned))
            .with("dimensions", ParamValue::idents(projection.dimensions.iter().copied()))
            .with("cost_column", ident(self.registry.cost_column()))
            .with("overlay_source_column", ident(source_column))
            .with("cloud_source", window.provider_uuid)
            .with("ocp_source", overlay.ocp_provider_uuid)
            .with("days", window.day_strings())
            .with("start_date", window.start_date)
            .with("end_date", window.end_date);
        stage::bind(
            OVERLAY_SUMMARY,
            &sql::POPULATE_OVERLAY_UI_SUMMARY,
            with_period(params, window.period()),
        )
    }

    /// Stage 4: rebuild every UI projection of the window (delete, then insert).
    pub async fn ui_summary(&self, window: &SummaryWindow) -> Result<StageReport, SummaryError> {
        let mut timer = StageTimer::start(UI_SUMMARY);
        let daily_table = self.registry.table(TableRole::LineItemDailySummary)?;

        for projection in self.registry.ui_projections() {
            let params = Params::new()
                .with("schema", ident(self.schema))
                .with("ui_table", ident(projection.table))
                .with("daily_table", ident(daily_table))
                .with("dimensions", ParamValue::idents(projection.dimensions.iter().copied()))
                .with("cost_column", ident(self.registry.cost_column()))
                .with("source_uuid", window.provider_uuid)
                .with("start_date", window.start_date)
                .with("end_date", window.end_date);
            let statement = match &projection.filter {
                None => stage::bind(UI_SUMMARY, &sql::POPULATE_UI_SUMMARY, params)?,
                Some(filter) => stage::bind(
                    UI_SUMMARY,
                    &sql::POPULATE_UI_SUMMARY_FILTERED,
                    params
                        .with("filter_column", ident(filter.column))
                        .with(
                            "filter_patterns",
                            filter.patterns.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
                        ),
                )?,
            };
            stage::execute(self.transactional, UI_SUMMARY, &statement).await?;
            timer.count(1);
        }

        Ok(timer.finish())
    }

    /// Stage 5: strip keys that are not enabled from rows written earlier.
    pub async fn enabled_tags(&self, window: &SummaryWindow) -> Result<StageReport, SummaryError> {
        let mut timer = StageTimer::start(ENABLED_TAGS);
        let scope = |table: &str, enabled_table: &str| {
            Params::new()
                .with("schema", ident(self.schema))
                .with("table", ident(table))
                .with("enabled_table", ident(enabled_table))
                .with("bill_ids", window.bill_ids.clone())
                .with("start_date", window.start_date)
                .with("end_date", window.end_date)
        };

        let mut statements = vec![stage::bind(
            ENABLED_TAGS,
            &sql::UPDATE_ENABLED_TAGS,
            scope(
                self.registry.table(TableRole::LineItemDailySummary)?,
                self.registry.table(TableRole::EnabledTagKeys)?,
            ),
        )?];
        if !window.overlays.is_empty() && self.registry.has_overlay() {
            statements.push(stage::bind(
                ENABLED_TAGS,
                &sql::UPDATE_ENABLED_TAGS,
                scope(
                    self.registry.table(TableRole::OverlayProjectDailySummary)?,
                    self.registry.table(TableRole::ContainerEnabledTagKeys)?,
                ),
            )?);
        }
        stage::execute_batch(self.transactional, ENABLED_TAGS, &statements).await?;
        timer.count(statements.len());

        Ok(timer.finish())
    }

    /// Stage 6: re-derive container daily summary infrastructure cost from the overlay rows.
    pub async fn back_populate(&self, window: &SummaryWindow) -> Result<StageReport, SummaryError> {
        let mut timer = StageTimer::start(BACK_POPULATE);
        if window.overlays.is_empty() || !self.registry.has_overlay() {
            return Ok(timer.finish());
        }

        for overlay in &window.overlays {
            let statement = stage::bind(
                BACK_POPULATE,
                &sql::BACK_POPULATE_CONTAINER_INFRASTRUCTURE,
                Params::new()
                    .with("schema", ident(self.schema))
                    .with(
                        "container_daily_table",
                        ident(self.registry.table(TableRole::ContainerDailySummary)?),
                    )
                    .with(
                        "project_table",
                        ident(self.registry.table(TableRole::OverlayProjectDailySummary)?),
                    )
                    .with("cost_column", ident(self.registry.cost_column()))
                    .with("report_period_id", overlay.report_period_id)
                    .with("source_type", self.registry.source_type())
                    .with("start_date", window.start_date)
                    .with("end_date", window.end_date),
            )?;
            stage::execute(self.transactional, BACK_POPULATE, &statement).await?;
            timer.count(1);
        }

        Ok(timer.finish())
    }
}
