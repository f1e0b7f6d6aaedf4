//! Entry points for one unit of work: a full summary run, or a markup-only refresh.

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tally_backends::{DistributedEngine, ManifestStore, ProviderStore, StatementExecutor};
use tally_common::bus::{MarkupRequest, SummaryRequest};
use tally_common::template::{ParamValue, Params};
use tally_common::{
    BillingPeriod, CostEntryBill, Compression, MarkupRate, ProviderType, SummaryError,
};
use tracing::info;
use uuid::Uuid;

use crate::cutoff::{date_column_filter, CutoffPolicy, DateColumnFilter, RowAdmission};
use crate::markup::{MarkupPropagator, MarkupScopeArgs};
use crate::partition::RetryPolicy;
use crate::pipeline::{Pipeline, SummaryWindow};
use crate::sql;
use crate::stage::{self, StageReport};
use crate::tables::{TableRegistry, TableRole};

const LOOKUP: &str = "lookup";

/// Outcome of [`Summarizer::summarize`].
#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub provider_uuid: Uuid,
    pub provider_type: ProviderType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_full_month: bool,
    pub bill_ids: Vec<i64>,
    /// Cutoff filter on the provider's date column, for callers reading raw rows outside SQL.
    #[serde(skip)]
    pub row_filter: DateColumnFilter,
    /// Per-row form of the same rule. The pipeline itself admits rows through the window start,
    /// which sits on this cutoff for incremental runs.
    #[serde(skip)]
    pub admission: RowAdmission,
    pub stages: Vec<StageReport>,
}

impl SummaryReport {
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.stage).collect()
    }
}

/// Outcome of [`Summarizer::update_markup`].
#[derive(Debug, Clone, Serialize)]
pub struct MarkupReport {
    pub provider_uuid: Uuid,
    pub bill_ids: Vec<i64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub rate: String,
    pub stage: Option<StageReport>,
}

/// Resolve the reprocessing window inside `period`.
///
/// Full month: the whole billing month. Incremental: from the cutoff (never before the 1st) to the
/// end of the month. Explicit request dates narrow either. `None` when nothing is left.
pub fn resolve_window(
    period: BillingPeriod,
    cutoff: NaiveDate,
    full_month: bool,
    requested_start: Option<NaiveDate>,
    requested_end: Option<NaiveDate>,
) -> Option<(NaiveDate, NaiveDate)> {
    let mut start = if full_month {
        period.start()
    } else {
        cutoff.max(period.start())
    };
    let mut end = period.end();
    if let Some(requested) = requested_start {
        start = start.max(requested);
    }
    if let Some(requested) = requested_end {
        end = end.min(requested);
    }
    (start <= end).then_some((start, end))
}

/// Summary orchestrator. Backends are shared so a worker can hand it to spawned tasks.
#[derive(Clone)]
pub struct Summarizer {
    transactional: Arc<dyn StatementExecutor>,
    distributed: Arc<dyn DistributedEngine>,
    manifests: Arc<dyn ManifestStore>,
    providers: Arc<dyn ProviderStore>,
    retry: RetryPolicy,
}

impl Summarizer {
    pub fn new(
        transactional: Arc<dyn StatementExecutor>,
        distributed: Arc<dyn DistributedEngine>,
        manifests: Arc<dyn ManifestStore>,
        providers: Arc<dyn ProviderStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transactional,
            distributed,
            manifests,
            providers,
            retry,
        }
    }

    /// Summarize one provider's billing period as seen on `today`.
    pub async fn summarize(
        &self,
        request: &SummaryRequest,
        today: NaiveDate,
    ) -> Result<SummaryReport, SummaryError> {
        if let Some(compression) = &request.compression {
            Compression::parse(compression)?;
        }
        let provider_type = self.provider_type(request.provider_uuid).await?;
        let registry = TableRegistry::for_provider(provider_type)?;

        let policy = CutoffPolicy::new(self.manifests.as_ref(), today);
        let is_full_month = policy
            .should_process_full_month(request.manifest_id, request.provider_uuid)
            .await
            .map_err(|err| {
                SummaryError::from_backend(LOOKUP, request_context(request), err, 1)
            })?;
        let period = self.billing_period(request, policy.cutoff_date()).await?;

        let mut report = SummaryReport {
            provider_uuid: request.provider_uuid,
            provider_type,
            start_date: period.start(),
            end_date: period.start(),
            is_full_month,
            bill_ids: Vec::new(),
            row_filter: date_column_filter(provider_type, today),
            admission: policy.row_admission(provider_type, is_full_month, request.is_finalized),
            stages: Vec::new(),
        };

        let Some((start_date, end_date)) = resolve_window(
            period,
            policy.cutoff_date(),
            is_full_month || request.is_finalized,
            request.start_date,
            request.end_date,
        ) else {
            info!(
                schema = %request.schema,
                provider_uuid = %request.provider_uuid,
                %period,
                "nothing to summarize in window"
            );
            return Ok(report);
        };
        report.start_date = start_date;
        report.end_date = end_date;

        let bills = self
            .bills_for_provider(&request.schema, registry, request.provider_uuid, Some(start_date))
            .await?;
        if bills.is_empty() {
            info!(
                schema = %request.schema,
                provider_uuid = %request.provider_uuid,
                %period,
                "no cost entry bill for period, skipping summary"
            );
            return Ok(report);
        }
        report.bill_ids = bills.iter().map(|b| b.id).collect();

        let markup = self.markup_rate(&request.schema, request.provider_uuid).await?;
        info!(
            schema = %request.schema,
            provider_uuid = %request.provider_uuid,
            manifest_id = ?request.manifest_id,
            is_full_month,
            is_finalized = request.is_finalized,
            cutoff = %policy.cutoff_date(),
            %start_date,
            %end_date,
            markup = %markup,
            "summarizing"
        );

        let window = SummaryWindow {
            provider_uuid: request.provider_uuid,
            start_date,
            end_date,
            bill_ids: report.bill_ids.clone(),
            markup: markup.clone(),
            overlays: request.overlays.clone(),
        };
        let pipeline = Pipeline::new(
            self.transactional.as_ref(),
            self.distributed.as_ref(),
            registry,
            &request.schema,
            self.retry,
        );
        report.stages = pipeline.run(&window).await?;

        let propagator =
            MarkupPropagator::new(self.transactional.as_ref(), registry, &request.schema);
        report.stages.push(
            propagator
                .propagate(&MarkupScopeArgs {
                    provider_uuid: request.provider_uuid,
                    bill_ids: &report.bill_ids,
                    start_date,
                    end_date,
                    rate: &markup,
                })
                .await?,
        );

        Ok(report)
    }

    /// Recompute markup only, for the requested bills or every bill in the window.
    pub async fn update_markup(&self, request: &MarkupRequest) -> Result<MarkupReport, SummaryError> {
        let provider_type = self.provider_type(request.provider_uuid).await?;
        let registry = TableRegistry::for_provider(provider_type)?;
        let rate = self.markup_rate(&request.schema, request.provider_uuid).await?;

        let dated = request.start_date.is_some() && request.end_date.is_some();
        let bills = if request.bill_ids.is_empty() {
            self.bills_for_provider(&request.schema, registry, request.provider_uuid, request.start_date)
                .await?
        } else if dated {
            Vec::new()
        } else {
            // Named bills without a full date range: their billing months give the span.
            self.bills_for_provider(&request.schema, registry, request.provider_uuid, None)
                .await?
                .into_iter()
                .filter(|b| request.bill_ids.contains(&b.id))
                .collect()
        };
        let bill_ids: Vec<i64> = if request.bill_ids.is_empty() {
            bills.iter().map(|b| b.id).collect()
        } else {
            request.bill_ids.clone()
        };

        let start_date = request.start_date.or_else(|| {
            bills
                .iter()
                .map(|b| b.billing_period_start)
                .min()
                .map(|d| BillingPeriod::from_date(d).start())
        });
        let end_date = request.end_date.or_else(|| {
            bills
                .iter()
                .map(|b| BillingPeriod::from_date(b.billing_period_start).end())
                .max()
        });

        let mut report = MarkupReport {
            provider_uuid: request.provider_uuid,
            bill_ids,
            start_date,
            end_date,
            rate: rate.to_string(),
            stage: None,
        };
        let (Some(start_date), Some(end_date)) = (start_date, end_date) else {
            info!(
                schema = %request.schema,
                provider_uuid = %request.provider_uuid,
                bill_ids = ?report.bill_ids,
                "no bills and no dates, nothing to mark up"
            );
            return Ok(report);
        };

        let propagator = MarkupPropagator::new(self.transactional.as_ref(), registry, &request.schema);
        report.stage = Some(
            propagator
                .propagate(&MarkupScopeArgs {
                    provider_uuid: request.provider_uuid,
                    bill_ids: &report.bill_ids,
                    start_date,
                    end_date,
                    rate: &rate,
                })
                .await?,
        );
        Ok(report)
    }

    /// Cost entry bills of a provider. With `start_date`, only the bill of that billing month.
    pub async fn bills_for_provider(
        &self,
        schema: &str,
        registry: &'static TableRegistry,
        provider_uuid: Uuid,
        start_date: Option<NaiveDate>,
    ) -> Result<Vec<CostEntryBill>, SummaryError> {
        let params = Params::new()
            .with("schema", ParamValue::ident(schema))
            .with("bill_table", ParamValue::ident(registry.table(TableRole::Bill)?))
            .with("provider_uuid", provider_uuid);
        let statement = match start_date {
            Some(date) => stage::bind(
                LOOKUP,
                &sql::BILLS_FOR_PROVIDER_PERIOD,
                params.with("billing_period_start", BillingPeriod::from_date(date).start()),
            )?,
            None => stage::bind(LOOKUP, &sql::BILLS_FOR_PROVIDER, params)?,
        };
        let rows = stage::fetch(self.transactional.as_ref(), LOOKUP, &statement).await?;
        rows.into_iter()
            .map(|row| {
                serde_json::from_value::<CostEntryBill>(row)
                    .map_err(|err| stage::malformed_row(LOOKUP, &statement, err))
            })
            .collect()
    }

    async fn provider_type(&self, provider_uuid: Uuid) -> Result<ProviderType, SummaryError> {
        self.providers
            .provider_type(provider_uuid)
            .await
            .map_err(|err| {
                SummaryError::from_backend(
                    LOOKUP,
                    serde_json::json!({ "provider_uuid": provider_uuid }),
                    err,
                    1,
                )
            })?
            .ok_or_else(|| SummaryError::Configuration(format!("unknown provider {}", provider_uuid)))
    }

    /// Markup of the provider's cost model; zero when there is none.
    async fn markup_rate(&self, schema: &str, provider_uuid: Uuid) -> Result<MarkupRate, SummaryError> {
        let percent = self
            .providers
            .markup_percent(schema, provider_uuid)
            .await
            .map_err(|err| {
                SummaryError::from_backend(
                    LOOKUP,
                    serde_json::json!({ "schema": schema, "provider_uuid": provider_uuid }),
                    err,
                    1,
                )
            })?;
        Ok(percent
            .map(|p| MarkupRate::from_percent(&p))
            .unwrap_or_default())
    }

    /// Requested start month, else the manifest's billing month, else the cutoff's month.
    async fn billing_period(
        &self,
        request: &SummaryRequest,
        cutoff: NaiveDate,
    ) -> Result<BillingPeriod, SummaryError> {
        if let Some(start) = request.start_date {
            return Ok(BillingPeriod::from_date(start));
        }
        let manifest = match request.manifest_id {
            Some(id) => self.manifests.manifest(id).await.map_err(|err| {
                SummaryError::from_backend(LOOKUP, request_context(request), err, 1)
            })?,
            None => None,
        };
        Ok(manifest
            .map(|m| m.billing_period())
            .unwrap_or_else(|| BillingPeriod::from_date(cutoff)))
    }
}

fn request_context(request: &SummaryRequest) -> serde_json::Value {
    serde_json::json!({
        "schema": request.schema,
        "provider_uuid": request.provider_uuid,
        "manifest_id": request.manifest_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    const JULY: BillingPeriod = BillingPeriod { year: 2023, month: 7 };

    #[test]
    fn full_month_window() {
        assert_eq!(
            resolve_window(JULY, d(2023, 7, 18), true, None, None),
            Some((d(2023, 7, 1), d(2023, 7, 31)))
        );
    }

    #[test]
    fn incremental_window_starts_at_cutoff() {
        assert_eq!(
            resolve_window(JULY, d(2023, 7, 18), false, None, None),
            Some((d(2023, 7, 18), d(2023, 7, 31)))
        );
        // cutoff in a later month leaves nothing of July
        assert_eq!(resolve_window(JULY, d(2023, 8, 1), false, None, None), None);
    }

    #[test]
    fn requested_dates_narrow_the_window() {
        assert_eq!(
            resolve_window(JULY, d(2023, 7, 18), true, Some(d(2023, 7, 5)), Some(d(2023, 7, 9))),
            Some((d(2023, 7, 5), d(2023, 7, 9)))
        );
        assert_eq!(
            resolve_window(JULY, d(2023, 7, 18), false, Some(d(2023, 7, 5)), Some(d(2023, 7, 9))),
            None
        );
    }
}
