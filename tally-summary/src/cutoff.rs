//! Which days of a billing period get reprocessed.
//!
//! By default only the last two days before "today" are recomputed, since providers keep
//! amending them. A run falls back to the whole month when nothing for the period has been
//! summarized yet, or when the bill is not the current month's.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use tally_backends::{BackendResult, ManifestStore};
use tally_common::{BillingPeriod, ExecutionCause, ProviderType};
use tracing::{info, warn};
use uuid::Uuid;

/// `today - 2 days`, or the first of `today`'s month when that crosses a month boundary.
pub fn data_cutoff_date(today: NaiveDate) -> NaiveDate {
    let cutoff = today - Duration::days(2);
    if cutoff.month() != today.month() {
        BillingPeriod::from_date(today).start()
    } else {
        cutoff
    }
}

/// Column that carries the usage date in a provider's raw rows.
pub fn date_column(provider: ProviderType) -> &'static str {
    match provider.base() {
        ProviderType::Azure => "usage_date",
        _ => "usage_start",
    }
}

/// `date_column >= cutoff`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateColumnFilter {
    pub column: &'static str,
    pub since: NaiveDate,
}

pub fn date_column_filter(provider: ProviderType, today: NaiveDate) -> DateColumnFilter {
    DateColumnFilter {
        column: date_column(provider),
        since: data_cutoff_date(today),
    }
}

/// Parse the leading ISO-8601 date of a cell (`2023-07-30`, `2023-07-30T04:00:00Z`, ...).
pub fn parse_row_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() == 10 {
        return NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.fZ"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.date())
}

/// Admit a raw row into aggregation input.
///
/// Full-month and finalized runs take every row without looking at it. Otherwise the row's date
/// must be on or after `cutoff`; a missing or unparseable date is an error, never a skip.
pub fn should_process_row(
    row: &HashMap<String, String>,
    date_column: &str,
    cutoff: NaiveDate,
    is_full_month: bool,
    is_finalized: bool,
) -> Result<bool, ExecutionCause> {
    if is_finalized || is_full_month {
        return Ok(true);
    }
    let raw = row.get(date_column).map(String::as_str).unwrap_or("");
    let date = parse_row_date(raw).ok_or_else(|| ExecutionCause::RowDate {
        column: date_column.to_string(),
        value: raw.to_string(),
    })?;
    Ok(date >= cutoff)
}

/// Row admission settings for one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowAdmission {
    pub date_column: &'static str,
    pub cutoff: NaiveDate,
    pub is_full_month: bool,
    pub is_finalized: bool,
}

impl RowAdmission {
    pub fn admit(&self, row: &HashMap<String, String>) -> Result<bool, ExecutionCause> {
        should_process_row(
            row,
            self.date_column,
            self.cutoff,
            self.is_full_month,
            self.is_finalized,
        )
    }
}

/// Cutoff decisions for one "today".
pub struct CutoffPolicy<'a> {
    manifests: &'a dyn ManifestStore,
    cutoff: NaiveDate,
}

impl<'a> CutoffPolicy<'a> {
    pub fn new(manifests: &'a dyn ManifestStore, today: NaiveDate) -> Self {
        Self {
            manifests,
            cutoff: data_cutoff_date(today),
        }
    }

    pub fn cutoff_date(&self) -> NaiveDate {
        self.cutoff
    }

    /// True unless a sibling manifest of the same billing period is already summarized.
    pub async fn should_process_full_month(
        &self,
        manifest_id: Option<i64>,
        provider_uuid: Uuid,
    ) -> BackendResult<bool> {
        let Some(manifest_id) = manifest_id else {
            return Ok(true);
        };
        let Some(manifest) = self.manifests.manifest(manifest_id).await? else {
            warn!(manifest_id, %provider_uuid, "manifest not found, processing full month");
            return Ok(true);
        };

        let bill_period = manifest.billing_period();
        if bill_period != BillingPeriod::from_date(self.cutoff) {
            return Ok(true);
        }

        let siblings = self
            .manifests
            .manifests_for_period(provider_uuid, manifest.billing_period_start)
            .await?;
        if siblings.len() <= 1 {
            // first ingestion for this period
            return Ok(true);
        }
        let summarized = siblings.iter().any(|m| m.ready_for_summary);
        if summarized {
            info!(
                manifest_id,
                %provider_uuid,
                cutoff = %self.cutoff,
                "period already summarized, processing incremental window"
            );
        }
        Ok(!summarized)
    }

    pub fn row_admission(
        &self,
        provider: ProviderType,
        is_full_month: bool,
        is_finalized: bool,
    ) -> RowAdmission {
        RowAdmission {
            date_column: date_column(provider),
            cutoff: self.cutoff,
            is_full_month,
            is_finalized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_backends::mock::InMemoryManifests;
    use tally_common::Manifest;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn manifest(id: i64, provider: Uuid, start: NaiveDate, ready: bool) -> Manifest {
        Manifest {
            id,
            provider_uuid: provider,
            billing_period_start: start,
            ready_for_summary: ready,
        }
    }

    fn row(column: &str, value: &str) -> HashMap<String, String> {
        HashMap::from([(column.to_string(), value.to_string())])
    }

    #[test]
    fn cutoff_resets_on_month_boundary() {
        assert_eq!(data_cutoff_date(d(2023, 8, 1)), d(2023, 8, 1));
        assert_eq!(data_cutoff_date(d(2023, 8, 2)), d(2023, 8, 1));
        assert_eq!(data_cutoff_date(d(2023, 8, 3)), d(2023, 8, 1));
        assert_eq!(data_cutoff_date(d(2023, 8, 17)), d(2023, 8, 15));
        assert_eq!(data_cutoff_date(d(2024, 1, 1)), d(2024, 1, 1));
    }

    #[test]
    fn cutoff_never_after_today_and_stays_in_month() {
        for today in d(2023, 1, 1).iter_days().take(800) {
            let cutoff = data_cutoff_date(today);
            assert!(cutoff <= today);
            assert_eq!(cutoff.month(), today.month());
            if (today - Duration::days(2)).month() != today.month() {
                assert_eq!(cutoff.day(), 1);
            }
        }
    }

    #[test]
    fn azure_filters_on_usage_date() {
        let filter = date_column_filter(ProviderType::AzureLocal, d(2023, 7, 20));
        assert_eq!(filter.column, "usage_date");
        assert_eq!(filter.since, d(2023, 7, 18));
        assert_eq!(date_column(ProviderType::Aws), "usage_start");
        assert_eq!(date_column(ProviderType::Gcp), "usage_start");
    }

    #[test]
    fn rows_before_cutoff_are_dropped_incrementally() {
        let cutoff = d(2023, 7, 18);
        let early = row("usage_start", "2023-07-17T23:00:00Z");
        let late = row("usage_start", "2023-07-18 00:00:00");

        assert!(!should_process_row(&early, "usage_start", cutoff, false, false).unwrap());
        assert!(should_process_row(&late, "usage_start", cutoff, false, false).unwrap());
        assert!(should_process_row(&early, "usage_start", cutoff, true, false).unwrap());
        assert!(should_process_row(&early, "usage_start", cutoff, false, true).unwrap());
    }

    #[test]
    fn malformed_row_date_is_an_error() {
        let cutoff = d(2023, 7, 18);
        let bad = row("usage_start", "07/18/2023");
        assert!(matches!(
            should_process_row(&bad, "usage_start", cutoff, false, false),
            Err(ExecutionCause::RowDate { .. })
        ));
        let missing = row("other", "2023-07-18");
        assert!(should_process_row(&missing, "usage_start", cutoff, false, false).is_err());
        // full month runs never look at the date
        assert!(should_process_row(&bad, "usage_start", cutoff, true, false).unwrap());
    }

    #[tokio::test]
    async fn no_manifest_means_full_month() {
        let store = InMemoryManifests::new();
        let policy = CutoffPolicy::new(&store, d(2023, 7, 20));
        assert!(policy
            .should_process_full_month(None, Uuid::new_v4())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn ready_sibling_means_incremental() {
        let provider = Uuid::new_v4();
        let july = d(2023, 7, 1);
        let store = InMemoryManifests::new()
            .with(manifest(1, provider, july, true))
            .with(manifest(2, provider, july, false));
        let policy = CutoffPolicy::new(&store, d(2023, 7, 20));
        assert!(!policy
            .should_process_full_month(Some(2), provider)
            .await
            .unwrap());

        let admission = policy.row_admission(ProviderType::Aws, false, false);
        assert_eq!(admission.cutoff, d(2023, 7, 18));
        assert!(!admission.admit(&row("usage_start", "2023-07-10")).unwrap());
        assert!(admission.admit(&row("usage_start", "2023-07-19")).unwrap());
    }

    #[tokio::test]
    async fn full_month_cases() {
        let provider = Uuid::new_v4();
        let june = d(2023, 6, 1);
        let july = d(2023, 7, 1);
        let store = InMemoryManifests::new()
            // previous month's bill
            .with(manifest(1, provider, june, true))
            .with(manifest(2, provider, june, false))
            // only manifest of the period
            .with(manifest(3, provider, july, true))
            // two manifests, none summarized
            .with(manifest(10, Uuid::nil(), july, false))
            .with(manifest(11, Uuid::nil(), july, false));
        let policy = CutoffPolicy::new(&store, d(2023, 7, 20));

        assert!(policy.should_process_full_month(Some(2), provider).await.unwrap());
        assert!(policy.should_process_full_month(Some(3), provider).await.unwrap());
        assert!(policy.should_process_full_month(Some(11), Uuid::nil()).await.unwrap());
        assert!(policy.should_process_full_month(Some(99), provider).await.unwrap());
    }
}
