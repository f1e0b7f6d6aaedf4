use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Distribution;

// -----------------------------------------------------------------------------
// Channels
// -----------------------------------------------------------------------------

pub const CHANNEL_SUMMARY_TASKS: &str = "summary_tasks";

// -----------------------------------------------------------------------------
// Tasks (TASK:*)
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum SummaryTaskType {
    #[serde(rename = "TASK:UPDATE_SUMMARY")]
    UpdateSummary,
    #[serde(rename = "TASK:UPDATE_MARKUP")]
    UpdateMarkup,
}

impl SummaryTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryTaskType::UpdateSummary => "TASK:UPDATE_SUMMARY",
            SummaryTaskType::UpdateMarkup => "TASK:UPDATE_MARKUP",
        }
    }
}

/// A container-platform source running on top of the cloud source being summarized.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OverlayRequest {
    pub ocp_provider_uuid: Uuid,
    pub report_period_id: i64,
    #[serde(default)]
    pub distribution: Distribution,
}

/// One unit of work: summarize one provider's billing period.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SummaryRequest {
    pub schema: String,
    pub provider_uuid: Uuid,
    #[serde(default)]
    pub manifest_id: Option<i64>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub compression: Option<String>,
    #[serde(default)]
    pub is_finalized: bool,
    #[serde(default)]
    pub overlays: Vec<OverlayRequest>,
}

impl SummaryRequest {
    pub fn new(schema: impl Into<String>, provider_uuid: Uuid) -> Self {
        Self {
            schema: schema.into(),
            provider_uuid,
            manifest_id: None,
            start_date: None,
            end_date: None,
            compression: None,
            is_finalized: false,
            overlays: Vec::new(),
        }
    }
}

/// Recompute markup only (e.g. after a cost model change).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MarkupRequest {
    pub schema: String,
    pub provider_uuid: Uuid,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub bill_ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SummaryTaskEnvelope {
    pub task_id: Uuid,
    #[serde(rename = "type")]
    pub task_type: SummaryTaskType,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub source: String,
}

impl SummaryTaskEnvelope {
    pub fn new(task_type: SummaryTaskType, payload: serde_json::Value, source: &str) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            task_type,
            occurred_at: Utc::now(),
            payload,
            source: source.to_string(),
        }
    }

    pub fn summary(request: &SummaryRequest, source: &str) -> serde_json::Result<Self> {
        Ok(Self::new(
            SummaryTaskType::UpdateSummary,
            serde_json::to_value(request)?,
            source,
        ))
    }

    pub fn markup(request: &MarkupRequest, source: &str) -> serde_json::Result<Self> {
        Ok(Self::new(
            SummaryTaskType::UpdateMarkup,
            serde_json::to_value(request)?,
            source,
        ))
    }
}
