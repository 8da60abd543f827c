// End-to-end tests: discovery, pagination and load against a mock EISA server

use eisa_client::{Credentials, EisaClient};
use eisa_core::destination::{Destination, LoadStatus};
use eisa_core::pipeline::{
    FetchErrorPolicy, LoadProgress, LoadProgressCallback, Pipeline, PipelineConfig, ResourceStatus,
};
use eisa_core::schema::SchemaSnapshot;
use eisa_core::source::eisa_source;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(temp_dir: &TempDir, policy: FetchErrorPolicy) -> PipelineConfig {
    PipelineConfig {
        pipeline_name: "eisa".to_string(),
        dataset_name: "eisa_data".to_string(),
        database: temp_dir.path().join("data").join("eisa_data.db"),
        export_schema_path: Some(temp_dir.path().join("schemas")),
        on_fetch_error: policy,
    }
}

fn client_for(server: &MockServer) -> EisaClient {
    EisaClient::new(&server.uri(), Credentials::Anonymous).unwrap()
}

async fn mount_catalog(server: &MockServer, entries: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/odata/v1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": entries })))
        .mount(server)
        .await;
}

async fn mount_single_page(server: &MockServer, resource: &str, records: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/odata/v1/{}", resource)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": records })))
        .mount(server)
        .await;
}

/// First page succeeds and links to a second page that answers 503.
async fn mount_broken_second_page(server: &MockServer, resource: &str) {
    let uri = server.uri();

    Mock::given(method("GET"))
        .and(path(format!("/odata/v1/{}", resource)))
        .and(query_param("$skiptoken", "2"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/odata/v1/{}", resource)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"ResponseID": "b1"}, {"ResponseID": "b2"}],
            "@odata.nextLink": format!("{}/odata/v1/{}?$skiptoken=2", uri, resource)
        })))
        .mount(server)
        .await;
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_run_loads_flattened_and_merged_records() {
    let server = MockServer::start().await;
    mount_catalog(&server, json!([{"name": "Responses", "url": "Responses"}])).await;
    mount_single_page(
        &server,
        "Responses",
        json!([
            {
                "ResponseID": "r1",
                "environment_peaceful": "No",
                "response_if_no": {"conflict": "Yes", "drought": "", "other": "cattle raids"},
                "site": {"district": "Gulu", "gps": {"lat": 2.77}}
            },
            {
                "ResponseID": "r2",
                "environment_peaceful": "Yes",
                "response_if_no": null,
                "site": {"district": "Lira"}
            }
        ]),
    )
    .await;

    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&server);
    let source = eisa_source(&client).await.unwrap();
    let mut pipeline = Pipeline::new(config(&temp_dir, FetchErrorPolicy::Abort)).unwrap();

    let info = pipeline.run(&client, &source, None).await.unwrap();

    assert_eq!(info.status, LoadStatus::Completed);
    assert_eq!(info.total_records(), 2);
    assert!(!info.has_failures());
    assert!(temp_dir.path().join("data").join("eisa_data.db").exists());

    let destination = pipeline.destination();
    assert_eq!(destination.row_count("Responses").unwrap(), 2);
    assert_eq!(
        destination.load_status(&info.load_id).unwrap().as_deref(),
        Some("completed")
    );

    let r1 = destination
        .fetch_row("Responses", "ResponseID", "r1")
        .unwrap()
        .unwrap();
    assert_eq!(r1["environment_peaceful"], json!("No"));
    assert_eq!(
        r1["response_if_no"],
        json!("conflict: Yes\\other: cattle raids")
    );
    assert_eq!(r1["site__district"], json!("Gulu"));
    assert_eq!(r1["site__gps__lat"], json!(2.77));
    assert!(!r1.contains_key("response_if_no__conflict"));

    let r2 = destination
        .fetch_row("Responses", "ResponseID", "r2")
        .unwrap()
        .unwrap();
    assert_eq!(r2["environment_peaceful"], json!("Yes"));
    assert_eq!(r2["response_if_no"], json!(null));
    assert_eq!(r2["site__gps__lat"], json!(null));
}

#[tokio::test]
async fn test_rerun_merges_instead_of_duplicating() {
    let server = MockServer::start().await;
    mount_catalog(&server, json!([{"name": "Responses", "url": "Responses"}])).await;
    mount_single_page(
        &server,
        "Responses",
        json!([{"ResponseID": "r1"}, {"ResponseID": "r2"}]),
    )
    .await;

    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&server);
    let source = eisa_source(&client).await.unwrap();

    let mut pipeline = Pipeline::new(config(&temp_dir, FetchErrorPolicy::Abort)).unwrap();
    let first = pipeline.run(&client, &source, None).await.unwrap();
    let second = pipeline.run(&client, &source, None).await.unwrap();

    assert_ne!(first.load_id, second.load_id);
    assert_eq!(pipeline.destination().row_count("Responses").unwrap(), 2);
    assert_eq!(pipeline.destination().load_count().unwrap(), 2);
}

#[tokio::test]
async fn test_run_exports_schema() {
    let server = MockServer::start().await;
    mount_catalog(
        &server,
        json!([
            {"name": "Responses", "url": "Responses"},
            {"name": "Wellbeing", "url": "Wellbeing"}
        ]),
    )
    .await;
    mount_single_page(
        &server,
        "Responses",
        json!([{"ResponseID": "r1", "age": 40, "site": {"district": "Gulu"}}]),
    )
    .await;
    mount_single_page(&server, "Wellbeing", json!([])).await;

    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&server);
    let source = eisa_source(&client).await.unwrap();
    let mut pipeline = Pipeline::new(config(&temp_dir, FetchErrorPolicy::Abort)).unwrap();

    let info = pipeline.run(&client, &source, None).await.unwrap();

    let schema_path = info.schema_path.clone().unwrap();
    assert_eq!(schema_path, temp_dir.path().join("schemas").join("eisa.schema.json"));

    let text = std::fs::read_to_string(&schema_path).unwrap();
    let snapshot: SchemaSnapshot = serde_json::from_str(&text).unwrap();
    assert_eq!(snapshot.name, "eisa");
    assert!(snapshot.tables.contains_key("Responses"));
    // An empty resource never creates its table
    assert!(!snapshot.tables.contains_key("Wellbeing"));
    assert_eq!(
        snapshot.data_columns("Responses"),
        vec!["ResponseID", "age", "site__district"]
    );
}

#[tokio::test]
async fn test_progress_events() {
    let server = MockServer::start().await;
    mount_catalog(&server, json!([{"name": "Responses", "url": "Responses"}])).await;
    let records: Vec<serde_json::Value> = (0..120)
        .map(|i| json!({"ResponseID": format!("r{}", i)}))
        .collect();
    mount_single_page(&server, "Responses", json!(records)).await;

    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&server);
    let source = eisa_source(&client).await.unwrap();
    let mut pipeline = Pipeline::new(config(&temp_dir, FetchErrorPolicy::Abort)).unwrap();

    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback: LoadProgressCallback = Arc::new(move |event: &LoadProgress| {
        let line = match event {
            LoadProgress::ResourceStarted { resource } => format!("start {}", resource),
            LoadProgress::RecordsLoaded { records, .. } => format!("loaded {}", records),
            LoadProgress::ResourceFinished(load) => format!("done {} {}", load.name, load.records),
        };
        sink.lock().unwrap().push(line);
    });

    pipeline.run(&client, &source, Some(callback)).await.unwrap();

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            "start Responses",
            "loaded 50",
            "loaded 100",
            "done Responses 120"
        ]
    );
}

// ============================================================================
// Failure Handling
// ============================================================================

#[tokio::test]
async fn test_discovery_failure_fetches_nothing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/odata/v1/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/odata/v1/Responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = eisa_source(&client).await.unwrap_err();
    assert_eq!(err.status_code(), Some(500));
}

#[tokio::test]
async fn test_abort_rolls_back_failed_resource_only() {
    let server = MockServer::start().await;
    mount_catalog(
        &server,
        json!([
            {"name": "Broken", "url": "Broken"},
            {"name": "Responses", "url": "Responses"}
        ]),
    )
    .await;
    mount_broken_second_page(&server, "Broken").await;
    mount_single_page(&server, "Responses", json!([{"ResponseID": "r1"}])).await;

    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&server);
    let source = eisa_source(&client).await.unwrap();
    let mut pipeline = Pipeline::new(config(&temp_dir, FetchErrorPolicy::Abort)).unwrap();

    let info = pipeline.run(&client, &source, None).await.unwrap();

    assert_eq!(info.status, LoadStatus::Partial);
    assert!(info.has_failures());

    let broken = &info.resources[0];
    assert_eq!(broken.name, "Broken");
    assert_eq!(broken.records, 0);
    match broken.status {
        ResourceStatus::Failed { ref reason } => assert!(reason.contains("503")),
        ref other => panic!("expected failure, got {other:?}"),
    }

    let destination = pipeline.destination();
    assert!(!destination.table_exists("Broken").unwrap());
    assert_eq!(destination.row_count("Responses").unwrap(), 1);
}

#[tokio::test]
async fn test_truncate_keeps_fetched_records() {
    let server = MockServer::start().await;
    mount_catalog(&server, json!([{"name": "Broken", "url": "Broken"}])).await;
    mount_broken_second_page(&server, "Broken").await;

    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&server);
    let source = eisa_source(&client).await.unwrap();
    let mut pipeline = Pipeline::new(config(&temp_dir, FetchErrorPolicy::Truncate)).unwrap();

    let info = pipeline.run(&client, &source, None).await.unwrap();

    assert_eq!(info.status, LoadStatus::Partial);
    assert!(!info.has_failures());
    assert_eq!(info.resources[0].records, 2);
    assert!(matches!(
        info.resources[0].status,
        ResourceStatus::Truncated { .. }
    ));
    assert_eq!(pipeline.destination().row_count("Broken").unwrap(), 2);
}

#[tokio::test]
async fn test_record_without_key_fails_resource() {
    let server = MockServer::start().await;
    mount_catalog(&server, json!([{"name": "Responses", "url": "Responses"}])).await;
    mount_single_page(
        &server,
        "Responses",
        json!([{"ResponseID": "r1"}, {"district": "Gulu"}]),
    )
    .await;

    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&server);
    let source = eisa_source(&client).await.unwrap();
    let mut pipeline = Pipeline::new(config(&temp_dir, FetchErrorPolicy::Truncate)).unwrap();

    let info = pipeline.run(&client, &source, None).await.unwrap();

    assert_eq!(info.status, LoadStatus::Failed);
    assert!(info.resources[0].is_failed());
    assert!(!pipeline.destination().table_exists("Responses").unwrap());
}

#[tokio::test]
async fn test_unbuildable_catalog_entry_is_skipped() {
    let server = MockServer::start().await;
    mount_catalog(
        &server,
        json!([
            {"name": "Responses", "url": "Responses"},
            {"name": "Bogus", "url": "http://[::1"}
        ]),
    )
    .await;
    mount_single_page(&server, "Responses", json!([{"ResponseID": "r1"}])).await;

    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&server);
    let source = eisa_source(&client).await.unwrap();

    assert_eq!(source.resource_names(), vec!["Responses"]);
    assert_eq!(source.skipped().len(), 1);
    assert_eq!(source.skipped()[0].name, "Bogus");

    let mut pipeline = Pipeline::new(config(&temp_dir, FetchErrorPolicy::Abort)).unwrap();
    let info = pipeline.run(&client, &source, None).await.unwrap();

    assert_eq!(info.status, LoadStatus::Completed);
    assert_eq!(info.skipped.len(), 1);
}

#[test]
fn test_pipeline_reopens_existing_database() {
    let temp_dir = TempDir::new().unwrap();
    let cfg = config(&temp_dir, FetchErrorPolicy::Abort);

    std::fs::create_dir_all(cfg.database.parent().unwrap()).unwrap();
    let destination = Destination::open(&cfg.database).unwrap();
    destination.begin_load("eisa", "eisa_data").unwrap();
    drop(destination);

    let pipeline = Pipeline::new(cfg).unwrap();
    assert_eq!(pipeline.destination().load_count().unwrap(), 1);
}
