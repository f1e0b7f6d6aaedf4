mod common;

use common::*;
use serde_json::json;
use std::collections::HashMap;
use tally_common::bus::{OverlayRequest, SummaryRequest};
use tally_common::error::HIVE_METASTORE_ERROR;
use tally_common::template::{Backend, ParamValue};
use tally_common::{BackendError, Distribution, ExecutionCause, ProviderType, SummaryError};
use tally_summary::tables::TableRegistry;
use uuid::Uuid;

fn request(h: &Harness) -> SummaryRequest {
    SummaryRequest::new(SCHEMA, h.provider)
}

fn overlay(ocp: Uuid) -> OverlayRequest {
    OverlayRequest {
        ocp_provider_uuid: ocp,
        report_period_id: 42,
        distribution: Distribution::Memory,
    }
}

#[tokio::test]
async fn stages_run_in_order() {
    let h = HarnessBuilder::new(ProviderType::Aws).markup("10").build();
    h.with_bill(7, d(2023, 7, 1));
    h.pg.respond("count_matching_enabled_keys", vec![json!(1)]);
    h.trino
        .respond("matched_tags_distributed", vec![json!("{\"app\":\"web\"}")]);

    let mut req = request(&h);
    req.overlays = vec![overlay(Uuid::new_v4())];
    let report = h.summarizer.summarize(&req, d(2023, 7, 20)).await.unwrap();

    assert_eq!(
        report.stage_names(),
        vec![
            "daily_summary",
            "tag_summary",
            "overlay_summary",
            "ui_summary",
            "enabled_tags",
            "back_populate",
            "markup",
        ]
    );
    assert_eq!(report.bill_ids, vec![7]);

    let pg = h.pg.executed_templates();
    let order = [
        "bills_for_provider_period",
        "delete_daily_summary_range",
        "populate_tags_summary",
        "populate_enabled_tag_keys",
        "delete_overlay_project_range",
        "populate_overlay_tags_summary",
        "populate_ui_summary",
        "update_enabled_tags",
        "back_populate_container_infrastructure",
        "markup_by_bill",
    ];
    let positions: Vec<usize> = order.iter().map(|t| position(&pg, t)).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{pg:?}");

    let trino = h.trino.executed_templates();
    assert!(position(&trino, "populate_daily_summary") < position(&trino, "delete_partition_by_day"));
    assert!(
        position(&trino, "delete_partition_by_day")
            < position(&trino, "populate_overlay_daily_summary")
    );
    assert!(
        position(&trino, "populate_overlay_daily_summary")
            < position(&trino, "populate_overlay_ui_summary")
    );
}

#[tokio::test]
async fn overlay_binds_distribution_columns_and_matched_tags() {
    let h = HarnessBuilder::new(ProviderType::Aws).build();
    h.with_bill(7, d(2023, 7, 1));
    h.pg.respond("count_matching_enabled_keys", vec![json!(1)]);
    h.trino
        .respond("matched_tags_distributed", vec![json!({"app": "web"})]);
    let ocp = Uuid::new_v4();

    let mut req = request(&h);
    req.overlays = vec![overlay(ocp)];
    h.summarizer.summarize(&req, d(2023, 7, 20)).await.unwrap();

    let populate = executed_named(&h.trino, "populate_overlay_daily_summary");
    assert_eq!(populate.len(), 1);
    let stmt = &populate[0];
    assert_eq!(
        stmt.param("pod_column"),
        Some(&ParamValue::ident("pod_effective_usage_memory_gigabyte_hours"))
    );
    assert_eq!(
        stmt.param("node_column"),
        Some(&ParamValue::ident("node_capacity_memory_gigabyte_hours"))
    );
    assert_eq!(
        stmt.param("matched_tag_strs"),
        Some(&ParamValue::TextList(vec![r#""app": "web""#.to_string()]))
    );
    assert_eq!(stmt.param("ocp_source"), Some(&ParamValue::Uuid(ocp)));

    // three temp tables cleared for the month, partitioned table cleared per day
    assert_eq!(executed_named(&h.trino, "delete_partition_by_month").len(), 3);
    assert_eq!(executed_named(&h.trino, "delete_partition_by_day").len(), 31);
}

#[tokio::test]
async fn no_enabled_key_overlap_skips_tag_matching() {
    let h = HarnessBuilder::new(ProviderType::Aws).build();
    h.with_bill(7, d(2023, 7, 1));
    h.pg.respond("count_matching_enabled_keys", vec![json!(0)]);

    let mut req = request(&h);
    req.overlays = vec![overlay(Uuid::new_v4())];
    h.summarizer.summarize(&req, d(2023, 7, 20)).await.unwrap();

    assert!(executed_named(&h.trino, "matched_tags_distributed").is_empty());
    let populate = executed_named(&h.trino, "populate_overlay_daily_summary");
    assert_eq!(
        populate[0].param("matched_tag_strs"),
        Some(&ParamValue::TextList(vec![]))
    );
}

#[tokio::test]
async fn first_run_processes_the_whole_month() {
    let h = HarnessBuilder::new(ProviderType::Aws).build();
    h.with_bill(7, d(2023, 7, 1));

    let report = h.summarizer.summarize(&request(&h), d(2023, 7, 20)).await.unwrap();

    assert!(report.is_full_month);
    assert_eq!((report.start_date, report.end_date), (d(2023, 7, 1), d(2023, 7, 31)));
    let delete = executed_named(&h.pg, "delete_daily_summary_range").remove(0);
    assert_eq!(date_param(&delete, "start_date"), d(2023, 7, 1));
    assert_eq!(date_param(&delete, "end_date"), d(2023, 7, 31));
}

#[tokio::test]
async fn summarized_period_reprocesses_only_the_tail() {
    let provider = Uuid::new_v4();
    let july = d(2023, 7, 1);
    let h = HarnessBuilder::new(ProviderType::AzureLocal)
        .provider(provider)
        .manifest(manifest(1, provider, july, true))
        .manifest(manifest(2, provider, july, false))
        .build();
    h.with_bill(9, july);

    let mut req = request(&h);
    req.manifest_id = Some(2);
    let report = h.summarizer.summarize(&req, d(2023, 7, 20)).await.unwrap();

    assert!(!report.is_full_month);
    assert_eq!((report.start_date, report.end_date), (d(2023, 7, 18), d(2023, 7, 31)));
    let populate = executed_named(&h.trino, "populate_daily_summary").remove(0);
    assert_eq!(date_param(&populate, "start_date"), d(2023, 7, 18));
    assert_eq!(populate.param("month"), Some(&ParamValue::Text("07".into())));
    assert_eq!(populate.param("month_unpadded"), Some(&ParamValue::Text("7".into())));

    // row admission follows the same cutoff, on Azure's date column
    assert_eq!(report.row_filter.column, "usage_date");
    assert_eq!(report.row_filter.since, report.start_date);
    assert_eq!(report.admission.cutoff, report.start_date);
    let row = |date: &str| HashMap::from([("usage_date".to_string(), date.to_string())]);
    assert!(!report.admission.admit(&row("2023-07-17")).unwrap());
    assert!(report.admission.admit(&row("2023-07-18")).unwrap());
    assert!(matches!(
        report.admission.admit(&row("July 18")),
        Err(ExecutionCause::RowDate { .. })
    ));
}

#[tokio::test]
async fn previous_month_bill_is_reprocessed_in_full() {
    let provider = Uuid::new_v4();
    let july = d(2023, 7, 1);
    let h = HarnessBuilder::new(ProviderType::Gcp)
        .provider(provider)
        .manifest(manifest(1, provider, july, true))
        .manifest(manifest(2, provider, july, false))
        .build();
    h.with_bill(3, july);

    let mut req = request(&h);
    req.manifest_id = Some(2);
    // cutoff resets to August 1st, July is no longer the current month
    let report = h.summarizer.summarize(&req, d(2023, 8, 1)).await.unwrap();

    assert!(report.is_full_month);
    assert_eq!((report.start_date, report.end_date), (d(2023, 7, 1), d(2023, 7, 31)));
}

#[tokio::test]
async fn finalized_bills_take_every_day() {
    let provider = Uuid::new_v4();
    let july = d(2023, 7, 1);
    let h = HarnessBuilder::new(ProviderType::Aws)
        .provider(provider)
        .manifest(manifest(1, provider, july, true))
        .manifest(manifest(2, provider, july, false))
        .build();
    h.with_bill(3, july);

    let mut req = request(&h);
    req.manifest_id = Some(2);
    req.is_finalized = true;
    let report = h.summarizer.summarize(&req, d(2023, 7, 20)).await.unwrap();

    assert!(!report.is_full_month);
    assert_eq!(report.start_date, d(2023, 7, 1));
    assert!(report.admission.admit(&HashMap::new()).unwrap());
}

#[tokio::test]
async fn unsupported_compression_fails_before_any_statement() {
    let h = HarnessBuilder::new(ProviderType::Aws).build();
    h.with_bill(7, d(2023, 7, 1));

    let mut req = request(&h);
    req.compression = Some("zip".into());
    let err = h.summarizer.summarize(&req, d(2023, 7, 20)).await.unwrap_err();

    assert!(matches!(err, SummaryError::Configuration(_)));
    assert!(h.pg.calls().is_empty());
    assert!(h.trino.calls().is_empty());

    req.compression = Some("gzip".into());
    assert!(h.summarizer.summarize(&req, d(2023, 7, 20)).await.is_ok());
}

#[tokio::test]
async fn container_platform_sources_are_rejected() {
    let h = HarnessBuilder::new(ProviderType::Ocp).build();
    let err = h
        .summarizer
        .summarize(&request(&h), d(2023, 7, 20))
        .await
        .unwrap_err();
    assert!(matches!(err, SummaryError::Configuration(_)));
    assert!(h.pg.calls().is_empty());
}

#[tokio::test]
async fn missing_bill_skips_the_pipeline() {
    let h = HarnessBuilder::new(ProviderType::Aws).build();

    let report = h.summarizer.summarize(&request(&h), d(2023, 7, 20)).await.unwrap();

    assert!(report.stages.is_empty());
    assert_eq!(h.pg.executed_templates(), vec!["bills_for_provider_period"]);
    assert!(h.trino.calls().is_empty());
}

#[tokio::test]
async fn failing_stage_reports_its_parameters_and_stops() {
    let h = HarnessBuilder::new(ProviderType::Aws).build();
    h.with_bill(7, d(2023, 7, 1));
    h.trino.fail(
        "populate_daily_summary",
        BackendError::from_engine(Backend::Distributed, Some("COLUMN_NOT_FOUND"), "no column"),
        1,
    );

    let err = h
        .summarizer
        .summarize(&request(&h), d(2023, 7, 20))
        .await
        .unwrap_err();

    match err {
        SummaryError::StatementExecution { stage, context, .. } => {
            assert_eq!(stage, "daily_summary");
            assert_eq!(context["template"], "populate_daily_summary");
            assert_eq!(context["bill_id"], 7);
            assert_eq!(context["start_date"], "2023-07-01");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(executed_named(&h.pg, "populate_tags_summary").is_empty());
}

#[tokio::test]
async fn metastore_contention_on_partition_delete_is_retried() {
    let h = HarnessBuilder::new(ProviderType::Aws).retry(3).build();
    h.with_bill(7, d(2023, 7, 1));
    h.trino.fail(
        "delete_partition_by_day",
        BackendError::from_engine(Backend::Distributed, Some(HIVE_METASTORE_ERROR), "locked"),
        2,
    );

    let mut req = request(&h);
    req.overlays = vec![overlay(Uuid::new_v4())];
    req.start_date = Some(d(2023, 7, 10));
    req.end_date = Some(d(2023, 7, 11));
    h.summarizer.summarize(&req, d(2023, 7, 20)).await.unwrap();

    assert_eq!(h.trino.attempts("delete_partition_by_day"), 4);
    assert_eq!(executed_named(&h.trino, "delete_partition_by_day").len(), 2);
}

#[tokio::test]
async fn exhausted_retries_abort_the_run() {
    let h = HarnessBuilder::new(ProviderType::Aws).retry(2).build();
    h.with_bill(7, d(2023, 7, 1));
    h.trino.fail(
        "delete_partition_by_month",
        BackendError::from_engine(Backend::Distributed, Some(HIVE_METASTORE_ERROR), "locked"),
        10,
    );

    let mut req = request(&h);
    req.overlays = vec![overlay(Uuid::new_v4())];
    let err = h.summarizer.summarize(&req, d(2023, 7, 20)).await.unwrap_err();

    match &err {
        SummaryError::TransientBackend {
            stage,
            attempts,
            context,
            ..
        } => {
            assert_eq!(stage, "partition_delete");
            assert_eq!(*attempts, 2);
            assert_eq!(context["template"], "delete_partition_by_month");
            assert_eq!(context["pipeline_stage"], "overlay_summary");
            assert_eq!(context["month"], "07");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(executed_named(&h.trino, "populate_overlay_daily_summary").is_empty());
}

#[tokio::test]
async fn exhausted_day_delete_names_the_unfinished_day() {
    let h = HarnessBuilder::new(ProviderType::Aws).retry(2).build();
    h.with_bill(7, d(2023, 7, 1));
    h.trino.fail(
        "delete_partition_by_day",
        BackendError::from_engine(Backend::Distributed, Some(HIVE_METASTORE_ERROR), "locked"),
        10,
    );
    let ocp = Uuid::new_v4();

    let mut req = request(&h);
    req.overlays = vec![overlay(ocp)];
    req.start_date = Some(d(2023, 7, 10));
    req.end_date = Some(d(2023, 7, 11));
    let err = h.summarizer.summarize(&req, d(2023, 7, 20)).await.unwrap_err();

    assert!(matches!(err, SummaryError::TransientBackend { attempts: 2, .. }));
    let context = err.context().unwrap();
    assert_eq!(context["day"], "10");
    assert_eq!(context["year"], "2023");
    assert_eq!(context["source_b"], ocp.to_string());
    assert_eq!(
        context["table"],
        "reporting_ocpawscostlineitem_project_daily_summary"
    );
    assert_eq!(context["pipeline_stage"], "overlay_summary");
    assert!(executed_named(&h.trino, "delete_partition_by_day").is_empty());
}

#[tokio::test]
async fn ui_projection_rerun_is_identical() {
    let h = HarnessBuilder::new(ProviderType::Gcp).markup("5").build();
    h.with_bill(11, d(2023, 7, 1));
    let req = request(&h);

    h.summarizer.summarize(&req, d(2023, 7, 20)).await.unwrap();
    let ui = |h: &Harness| {
        h.pg.executed()
            .into_iter()
            .filter(|s| s.template.starts_with("populate_ui_summary"))
            .collect::<Vec<_>>()
    };
    let first = ui(&h);
    h.pg.clear();
    h.summarizer.summarize(&req, d(2023, 7, 20)).await.unwrap();
    let second = ui(&h);

    let gcp = TableRegistry::for_provider(ProviderType::Gcp).unwrap();
    assert_eq!(first.len(), gcp.ui_projections().len());
    assert_eq!(first, second);
    for statement in &first {
        let parts = statement.parts();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].starts_with("DELETE"));
        assert!(parts[1].starts_with("INSERT"));
    }
}

#[tokio::test]
async fn oci_ignores_overlay_requests() {
    let h = HarnessBuilder::new(ProviderType::Oci).build();
    h.with_bill(5, d(2023, 7, 1));

    let mut req = request(&h);
    req.overlays = vec![overlay(Uuid::new_v4())];
    let report = h.summarizer.summarize(&req, d(2023, 7, 20)).await.unwrap();

    let overlay_stage = report
        .stages
        .iter()
        .find(|s| s.stage == "overlay_summary")
        .unwrap();
    assert_eq!(overlay_stage.statements, 0);
    assert!(executed_named(&h.trino, "populate_overlay_daily_summary").is_empty());
    assert!(executed_named(&h.pg, "back_populate_container_infrastructure").is_empty());
}
