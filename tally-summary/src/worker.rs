use chrono::{NaiveDate, Utc};
use tally_common::bus::{
    MarkupRequest, SummaryRequest, SummaryTaskEnvelope, SummaryTaskType, CHANNEL_SUMMARY_TASKS,
};
use tally_common::SummaryError;
use tracing::{error, info, warn};

use crate::summarizer::{MarkupReport, Summarizer, SummaryReport};

#[derive(Debug)]
pub enum TaskOutcome {
    /// Not a task we understand; logged and dropped.
    Skipped,
    Summarized(SummaryReport),
    MarkupUpdated(MarkupReport),
}

/// Decode one bus message and run it.
pub async fn handle_message(
    summarizer: &Summarizer,
    payload: &str,
    today: NaiveDate,
) -> Result<TaskOutcome, SummaryError> {
    let envelope = match serde_json::from_str::<SummaryTaskEnvelope>(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("ignoring unparseable summary task: {}", e);
            return Ok(TaskOutcome::Skipped);
        }
    };
    let task_id = envelope.task_id;
    info!(
        %task_id,
        task_type = envelope.task_type.as_str(),
        source = %envelope.source,
        "summary task received"
    );

    match envelope.task_type {
        SummaryTaskType::UpdateSummary => {
            let Ok(request) = serde_json::from_value::<SummaryRequest>(envelope.payload) else {
                warn!(%task_id, "ignoring summary task with invalid payload");
                return Ok(TaskOutcome::Skipped);
            };
            let report = summarizer.summarize(&request, today).await?;
            info!(
                %task_id,
                provider_uuid = %report.provider_uuid,
                start_date = %report.start_date,
                end_date = %report.end_date,
                is_full_month = report.is_full_month,
                stages = report.stages.len(),
                "summary task done"
            );
            Ok(TaskOutcome::Summarized(report))
        }
        SummaryTaskType::UpdateMarkup => {
            let Ok(request) = serde_json::from_value::<MarkupRequest>(envelope.payload) else {
                warn!(%task_id, "ignoring markup task with invalid payload");
                return Ok(TaskOutcome::Skipped);
            };
            let report = summarizer.update_markup(&request).await?;
            info!(
                %task_id,
                provider_uuid = %report.provider_uuid,
                bill_ids = ?report.bill_ids,
                rate = %report.rate,
                "markup task done"
            );
            Ok(TaskOutcome::MarkupUpdated(report))
        }
    }
}

/// Consume `summary_tasks` in order until the subscription ends.
pub async fn run_summary_consumer(redis_url: &str, summarizer: Summarizer) -> anyhow::Result<()> {
    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(CHANNEL_SUMMARY_TASKS).await?;
    info!("Summary worker listening on Redis channel '{}'...", CHANNEL_SUMMARY_TASKS);

    use futures_util::StreamExt;
    let mut stream = pubsub.on_message();

    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!("ignoring non-text message on {}: {:?}", CHANNEL_SUMMARY_TASKS, e);
                continue;
            }
        };

        // The scheduler owns retries: log and move on.
        if let Err(e) = handle_message(&summarizer, &payload, Utc::now().date_naive()).await {
            error!(stage = ?e.stage(), "summary task failed: {}", e);
        }
    }

    Ok(())
}
