//! End-to-end pipeline runs against a mocked report service
//!
//! ```bash
//! cargo test --test pipeline_e2e
//! ```

mod common;

use common::{
    CountingSink, Faults, MERCHANT_FEED, MockReportService, document_ids, mock_config, products,
};
use feedmatch::{Error, GroupFailurePolicy, Pipeline, parse_feed};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn ids(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("p{i}")).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn five_products_in_groups_of_two() {
    let service = MockReportService::start().await;
    let dir = TempDir::new().unwrap();
    let config = mock_config(&service, &dir, 2, GroupFailurePolicy::Abort);
    let output = config.pipeline.output_path.clone();
    let pipeline = Pipeline::new(config).unwrap();

    let (sink, seals) = CountingSink::create(&output);
    let report = pipeline
        .run(products(5), sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.groups_total, 3);
    assert_eq!(report.groups_completed, 3);
    assert_eq!(report.records, 5);
    assert_eq!(seals.load(Ordering::SeqCst), 1);

    assert_eq!(
        service.submitted(),
        vec![ids(0..2), ids(2..4), ids(4..5)],
        "groups are submitted in feed order"
    );
    assert_eq!(document_ids(&output), ids(0..5));
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        r#"{"matchedProducts":[{"id":"p0"},{"id":"p1"},{"id":"p2"},{"id":"p3"},{"id":"p4"}],"matchingProductErrors":null}"#
    );

    assert_eq!(service.requests("POST").await, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_policy_leaves_no_document() {
    let service = MockReportService::start_with(Faults {
        missing: HashSet::from([1]),
        ..Faults::default()
    })
    .await;
    let dir = TempDir::new().unwrap();
    let config = mock_config(&service, &dir, 2, GroupFailurePolicy::Abort);
    let output = config.pipeline.output_path.clone();
    let pipeline = Pipeline::new(config).unwrap();

    let err = pipeline
        .run_to_file(products(5), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        Error::GroupFailed {
            group,
            job_id,
            source,
        } => {
            assert_eq!(group, 1);
            assert_eq!(job_id.as_deref(), Some("job-1"));
            assert!(matches!(*source, Error::Service { status: 404, .. }));
        }
        other => panic!("expected group failure, got {other:?}"),
    }

    assert!(!output.exists());
    assert!(!dir.path().join("matched-products.json.partial").exists());
    assert_eq!(service.submitted().len(), 2, "no group runs after the failure");
}

#[tokio::test(flavor = "multi_thread")]
async fn skip_policy_records_the_gap() {
    let service = MockReportService::start_with(Faults {
        missing: HashSet::from([1]),
        ..Faults::default()
    })
    .await;
    let dir = TempDir::new().unwrap();
    let config = mock_config(&service, &dir, 2, GroupFailurePolicy::Skip);
    let output = config.pipeline.output_path.clone();
    let pipeline = Pipeline::new(config).unwrap();

    let report = pipeline
        .run_to_file(products(5), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.groups_total, 3);
    assert_eq!(report.groups_completed, 2);
    assert_eq!(report.failed_groups.len(), 1);
    assert_eq!(report.failed_groups[0].index, 1);
    assert_eq!(report.failed_groups[0].job_id.as_deref(), Some("job-1"));
    assert_eq!(report.records, 3);
    assert_eq!(document_ids(&output), vec!["p0", "p1", "p4"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_artifact_is_rolled_back() {
    let service = MockReportService::start_with(Faults {
        truncated: HashSet::from([1]),
        ..Faults::default()
    })
    .await;
    let dir = TempDir::new().unwrap();
    let config = mock_config(&service, &dir, 2, GroupFailurePolicy::Skip);
    let output = config.pipeline.output_path.clone();
    let pipeline = Pipeline::new(config).unwrap();

    let report = pipeline
        .run_to_file(products(5), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed_groups.len(), 1);
    assert!(report.failed_groups[0].error.contains("job-1"));
    assert_eq!(
        document_ids(&output),
        vec!["p0", "p1", "p4"],
        "p2 was appended before the corruption and must be gone"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limited_submission_is_retried() {
    let service = MockReportService::start().await;
    Mock::given(method("POST"))
        .and(path("/reports"))
        .respond_with(ResponseTemplate::new(429).set_body_string("too many requests"))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&service.server)
        .await;
    let dir = TempDir::new().unwrap();
    let config = mock_config(&service, &dir, 5, GroupFailurePolicy::Abort);
    let output = config.pipeline.output_path.clone();
    let pipeline = Pipeline::new(config).unwrap();

    let report = pipeline
        .run_to_file(products(3), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.records, 3);
    assert_eq!(service.requests("POST").await, 3);
    assert_eq!(document_ids(&output), ids(0..3));
}

#[tokio::test(flavor = "multi_thread")]
async fn uploaded_feed_flows_through() {
    let service = MockReportService::start().await;
    let dir = TempDir::new().unwrap();
    let config = mock_config(&service, &dir, 2, GroupFailurePolicy::Abort);
    let output = config.pipeline.output_path.clone();
    let price_difference = config.feed.price_difference;
    let pipeline = Pipeline::new(config).unwrap();

    let products = parse_feed(MERCHANT_FEED.as_bytes(), price_difference).unwrap();
    let report = pipeline
        .run_to_file(products, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.records, 3);
    assert_eq!(document_ids(&output), vec!["p0", "p1", "p2"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_during_pacing_stops_the_run() {
    let service = MockReportService::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = mock_config(&service, &dir, 1, GroupFailurePolicy::Abort);
    config.pipeline.group_delay = std::time::Duration::from_secs(30);
    let output = config.pipeline.output_path.clone();
    let pipeline = Pipeline::new(config).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = pipeline
        .run_to_file(products(3), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert_eq!(service.submitted().len(), 1);
    assert!(!output.exists());
}
