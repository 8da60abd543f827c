use eisa::handlers::*;
use eisa::command_argument_builder;
use eisa_client::{ApiError, Credentials, EisaClient, Record};
use eisa_core::config::{CONFIG_FILE_NAME, Settings};
use eisa_core::pipeline::{FetchErrorPolicy, ResourceLoad, ResourceStatus};
use eisa_core::source::Resource;
use futures::stream;
use serde_json::json;
use std::path::PathBuf;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn run_matches(args: &[&str]) -> clap::ArgMatches {
    let mut argv = vec!["eisa", "run"];
    argv.extend_from_slice(args);
    let matches = command_argument_builder()
        .try_get_matches_from(argv)
        .unwrap();
    let (name, sub) = matches.subcommand().unwrap();
    assert_eq!(name, "run");
    sub.clone()
}

// ============================================================================
// Command Line Tests
// ============================================================================

#[test]
fn test_command_definition_is_valid() {
    command_argument_builder().debug_assert();
}

#[test]
fn test_fetch_requires_resource() {
    let result = command_argument_builder().try_get_matches_from(["eisa", "fetch"]);
    assert!(result.is_err());
}

#[test]
fn test_fetch_limit_parses() {
    let matches = command_argument_builder()
        .try_get_matches_from(["eisa", "fetch", "Responses", "--limit", "5"])
        .unwrap();
    let (_, sub) = matches.subcommand().unwrap();
    assert_eq!(sub.get_one::<String>("RESOURCE").unwrap(), "Responses");
    assert_eq!(sub.get_one::<usize>("limit"), Some(&5));
}

#[test]
fn test_run_rejects_unknown_policy() {
    let result = command_argument_builder().try_get_matches_from([
        "eisa",
        "run",
        "--on-fetch-error",
        "retry",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_run_collects_repeated_resources() {
    let sub = run_matches(&["-r", "Responses", "--resource", "Wellbeing"]);
    let names: Vec<&String> = sub.get_many::<String>("resource").unwrap().collect();
    assert_eq!(names, vec!["Responses", "Wellbeing"]);
}

#[test]
fn test_verbose_is_global() {
    let matches = command_argument_builder()
        .try_get_matches_from(["eisa", "resources", "-v"])
        .unwrap();
    assert!(matches.get_flag("verbose"));
}

// ============================================================================
// Settings Override Tests
// ============================================================================

#[test]
fn test_apply_run_overrides() {
    let sub = run_matches(&[
        "--dataset",
        "wellbeing",
        "--database",
        "/tmp/wellbeing.db",
        "--export-schema",
        "/tmp/schemas",
        "--on-fetch-error",
        "truncate",
    ]);

    let mut settings = Settings::default();
    apply_run_overrides(&mut settings, &sub).unwrap();

    assert_eq!(settings.pipeline.dataset_name, "wellbeing");
    assert_eq!(settings.database_path(), PathBuf::from("/tmp/wellbeing.db"));
    assert_eq!(settings.pipeline.on_fetch_error, FetchErrorPolicy::Truncate);
    assert_eq!(
        settings.pipeline_config().export_schema_path,
        Some(PathBuf::from("/tmp/schemas"))
    );
}

#[test]
fn test_apply_run_overrides_without_flags_keeps_settings() {
    let sub = run_matches(&[]);

    let mut settings = Settings::default();
    settings.pipeline.dataset_name = "from_file".to_string();
    apply_run_overrides(&mut settings, &sub).unwrap();

    assert_eq!(settings.pipeline.dataset_name, "from_file");
    assert_eq!(settings.pipeline.on_fetch_error, FetchErrorPolicy::Abort);
}

#[test]
fn test_load_settings_explicit_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nope.toml");
    assert!(load_settings(Some(&path)).is_err());
}

#[test]
fn test_load_settings_explicit_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "[source]\npage_size = 7\n").unwrap();

    let settings = load_settings(Some(&path)).unwrap();
    assert_eq!(settings.source.page_size, 7);
}

// ============================================================================
// Init Tests
// ============================================================================

#[test]
fn test_write_config_template() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("eisa");

    let path = write_config_template(&dir, false).unwrap().unwrap();
    assert_eq!(path, dir.join(CONFIG_FILE_NAME));

    // The template must parse into the defaults
    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
fn test_write_config_template_keeps_existing_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "# mine\n").unwrap();

    assert!(write_config_template(temp_dir.path(), false).unwrap().is_none());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine\n");

    assert!(write_config_template(temp_dir.path(), true).unwrap().is_some());
    assert_ne!(std::fs::read_to_string(&path).unwrap(), "# mine\n");
}

// ============================================================================
// JSON Lines Tests
// ============================================================================

#[tokio::test]
async fn test_write_json_lines() {
    let records = stream::iter(vec![
        Ok::<Record, ApiError>(record(json!({"ResponseID": "r1", "site__district": "Gulu"}))),
        Ok(record(json!({"ResponseID": "r2"}))),
    ]);

    let mut out = Vec::new();
    let written = write_json_lines(records, &mut out, None).await.unwrap();

    assert_eq!(written, 2);
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            r#"{"ResponseID":"r1","site__district":"Gulu"}"#,
            r#"{"ResponseID":"r2"}"#
        ]
    );
}

#[tokio::test]
async fn test_write_json_lines_limit() {
    let records = stream::iter(
        (0..10).map(|i| Ok::<Record, ApiError>(record(json!({"ResponseID": i})))),
    );

    let mut out = Vec::new();
    let written = write_json_lines(records, &mut out, Some(3)).await.unwrap();

    assert_eq!(written, 3);
    assert_eq!(String::from_utf8(out).unwrap().lines().count(), 3);
}

#[tokio::test]
async fn test_write_json_lines_stops_at_error() {
    let records = stream::iter(vec![
        Ok(record(json!({"ResponseID": "r1"}))),
        Err(ApiError::InvalidUrl("broken".to_string())),
        Ok(record(json!({"ResponseID": "r3"}))),
    ]);

    let mut out = Vec::new();
    let result = write_json_lines(records, &mut out, None).await;

    assert!(result.is_err());
    assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
}

#[tokio::test]
async fn test_write_json_lines_from_resource() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/odata/v1/Responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"ResponseID": "r1", "site": {"district": "Gulu"}}]
        })))
        .mount(&server)
        .await;

    let client = EisaClient::new(&server.uri(), Credentials::Anonymous).unwrap();
    let resource = Resource::new(&client, "Responses", "Responses").unwrap();

    let mut out = Vec::new();
    write_json_lines(resource.records(&client), &mut out, None)
        .await
        .unwrap();

    let line: serde_json::Value =
        serde_json::from_str(String::from_utf8(out).unwrap().trim()).unwrap();
    assert_eq!(line["site__district"], "Gulu");
}

// ============================================================================
// Progress Line Tests
// ============================================================================

fn finished(status: ResourceStatus) -> ResourceLoad {
    ResourceLoad {
        name: "Responses".to_string(),
        records: 12,
        status,
    }
}

#[test]
fn test_finished_line_marks() {
    let loaded = finished_line(&finished(ResourceStatus::Loaded));
    assert!(loaded.contains('✓'));
    assert!(loaded.contains("Responses (12 records)"));

    let truncated = finished_line(&finished(ResourceStatus::Truncated {
        reason: "timeout".to_string(),
    }));
    assert!(truncated.contains('⚠'));
    assert!(!truncated.contains('✓'));
    assert!(truncated.contains("Responses (12 records)"));

    let failed = finished_line(&finished(ResourceStatus::Failed {
        reason: "boom".to_string(),
    }));
    assert!(failed.contains('✗'));
    assert!(!failed.contains('✓'));
}
