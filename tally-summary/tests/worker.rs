mod common;

use common::*;
use tally_common::bus::{MarkupRequest, SummaryRequest, SummaryTaskEnvelope};
use tally_common::{ProviderType, SummaryError};
use tally_summary::worker::{handle_message, TaskOutcome};

#[tokio::test]
async fn garbage_is_skipped() {
    let h = HarnessBuilder::new(ProviderType::Aws).build();

    let outcome = handle_message(&h.summarizer, "not json", d(2023, 7, 20))
        .await
        .unwrap();

    assert!(matches!(outcome, TaskOutcome::Skipped));
    assert!(h.pg.executed().is_empty());
}

#[tokio::test]
async fn payload_of_the_wrong_shape_is_skipped() {
    let h = HarnessBuilder::new(ProviderType::Aws).build();
    let mut envelope = SummaryTaskEnvelope::summary(
        &SummaryRequest::new(SCHEMA, h.provider),
        "scheduler",
    )
    .unwrap();
    envelope.payload = serde_json::json!({"schema": 12});

    let payload = serde_json::to_string(&envelope).unwrap();
    let outcome = handle_message(&h.summarizer, &payload, d(2023, 7, 20))
        .await
        .unwrap();

    assert!(matches!(outcome, TaskOutcome::Skipped));
}

#[tokio::test]
async fn markup_task_is_dispatched() {
    let h = HarnessBuilder::new(ProviderType::Aws).markup("10").build();
    let request = MarkupRequest {
        schema: SCHEMA.to_string(),
        provider_uuid: h.provider,
        start_date: Some(d(2023, 7, 1)),
        end_date: Some(d(2023, 7, 31)),
        bill_ids: vec![3],
    };
    let envelope = SummaryTaskEnvelope::markup(&request, "cost-model").unwrap();

    let payload = serde_json::to_string(&envelope).unwrap();
    let outcome = handle_message(&h.summarizer, &payload, d(2023, 7, 20))
        .await
        .unwrap();

    match outcome {
        TaskOutcome::MarkupUpdated(report) => {
            assert_eq!(report.bill_ids, vec![3]);
            assert_ne!(report.rate, "0");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn bad_compression_fails_the_task() {
    let h = HarnessBuilder::new(ProviderType::Aws).build();
    let mut request = SummaryRequest::new(SCHEMA, h.provider);
    request.compression = Some("zip".to_string());
    let envelope = SummaryTaskEnvelope::summary(&request, "scheduler").unwrap();

    let payload = serde_json::to_string(&envelope).unwrap();
    let err = handle_message(&h.summarizer, &payload, d(2023, 7, 20))
        .await
        .unwrap_err();

    assert!(matches!(err, SummaryError::Configuration(_)));
    assert!(h.pg.executed().is_empty());
}
