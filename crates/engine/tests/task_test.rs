//! End-to-end tests for the task pipeline, driven through fakes.

use async_trait::async_trait;
use backend::testing::FakeDoer;
use common::model::{Event, Measurement};
use engine::task::{Task, TaskDeps};
use nettests::psiphontunnel::runner::{Tunnel, TunnelStarter};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn collect_events(mut task: Task) -> Vec<Event> {
    common::logging::init_logging();
    let mut events = Vec::new();
    while let Some(event) = task.next_event().await {
        events.push(event);
    }
    events
}

fn keys_of(events: &[Event]) -> Vec<&str> {
    events.iter().map(|ev| ev.key.as_str()).collect()
}

fn count_key(events: &[Event], key: &str) -> usize {
    events.iter().filter(|ev| ev.key == key).count()
}

fn offline_settings(name: &str) -> String {
    format!(
        r#"{{
            "name": "{name}",
            "options": {{
                "software_name": "example-app",
                "software_version": "0.1.0",
                "work_dir_path": "/tmp",
                "no_bouncer": true,
                "no_collector": true,
                "no_geolookup": true,
                "no_resolver_lookup": true
            }}
        }}"#
    )
}

#[tokio::test]
async fn test_offline_ndt7_run_emits_the_expected_sequence() {
    // discovery fails, so the experiment records a failure in its test
    // keys, but the pipeline still produces a measurement
    let doer = Arc::new(FakeDoer::new().on_transport_error("policy=geo_options"));
    let deps = TaskDeps {
        http: doer.clone(),
        tunnel_starter: None,
    };
    let task = Task::start_with(&offline_settings("Ndt7"), deps);
    let events = collect_events(task).await;
    let keys = keys_of(&events);

    assert_eq!(keys.first(), Some(&"status.queued"));
    assert_eq!(keys.last(), Some(&"status.end"));
    assert_eq!(count_key(&events, "status.end"), 1);
    assert_eq!(count_key(&events, "measurement"), 1);
    assert_eq!(count_key(&events, "status.measurement_start"), 1);
    assert_eq!(count_key(&events, "status.measurement_done"), 1);
    assert!(count_key(&events, "status.progress") >= 4);

    // skipped stages emit nothing
    assert_eq!(count_key(&events, "status.available_collectors"), 0);
    assert_eq!(count_key(&events, "status.geoip_lookup"), 0);
    assert_eq!(count_key(&events, "status.resolver_lookup"), 0);
    assert_eq!(count_key(&events, "status.report_create"), 0);
    assert_eq!(count_key(&events, "status.measurement_submission"), 0);
    assert_eq!(count_key(&events, "failure.measurement_submission"), 0);

    // ordering: start before measurement before done before end
    let pos = |key: &str| keys.iter().position(|k| *k == key).unwrap();
    assert!(pos("status.measurement_start") < pos("measurement"));
    assert!(pos("measurement") < pos("status.measurement_done"));
    assert!(pos("status.measurement_done") < pos("status.end"));

    // the emitted measurement deserializes and names the experiment
    let measurement_event = events.iter().find(|ev| ev.key == "measurement").unwrap();
    let json_str = measurement_event.value["json_str"].as_str().unwrap();
    let measurement: Measurement = serde_json::from_str(json_str).unwrap();
    assert_eq!(measurement.test_name, "ndt7");
    assert_eq!(measurement.software_name, "example-app");
    assert!(!measurement.test_keys["failure"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_full_pipeline_with_bouncer_and_collector() {
    let doer = Arc::new(
        FakeDoer::new()
            .on(
                "/api/v1/collectors",
                br#"[{"type": "https", "address": "https://collector.example"}]"#.to_vec(),
            )
            .on("/api/v1/test-helpers", b"{}".to_vec())
            .on("/report/rid-1/close", b"{}".to_vec())
            .on("/report/rid-1", br#"{"measurement_id": "mid-1"}"#.to_vec())
            .on(
                "collector.example/report",
                br#"{"report_id": "rid-1"}"#.to_vec(),
            )
            .on("policy=geo_options", b"[]".to_vec()),
    );
    let deps = TaskDeps {
        http: doer.clone(),
        tunnel_starter: None,
    };
    let settings = r#"{
        "name": "Ndt7",
        "options": {
            "software_name": "example-app",
            "software_version": "0.1.0",
            "work_dir_path": "/tmp",
            "no_geolookup": true,
            "no_resolver_lookup": true
        }
    }"#;
    let task = Task::start_with(settings, deps);
    let events = collect_events(task).await;

    assert_eq!(count_key(&events, "status.available_collectors"), 1);
    assert_eq!(count_key(&events, "status.available_test_helpers"), 1);
    assert_eq!(count_key(&events, "status.report_create"), 1);
    assert_eq!(count_key(&events, "status.measurement_submission"), 1);
    assert_eq!(count_key(&events, "status.end"), 1);

    let report_create = events
        .iter()
        .find(|ev| ev.key == "status.report_create")
        .unwrap();
    assert_eq!(report_create.value["report_id"], "rid-1");

    // the submitted measurement carried the report id
    let submitted = doer
        .requests()
        .into_iter()
        .find(|request| request.url.ends_with("/report/rid-1"))
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&submitted.body).unwrap();
    assert_eq!(body["content"]["report_id"], "rid-1");

    // report closed at the end of the run
    assert!(doer
        .requests()
        .iter()
        .any(|request| request.url.ends_with("/report/rid-1/close")));
}

#[tokio::test]
async fn test_report_open_failure_still_runs_the_measurement() {
    let doer = Arc::new(
        FakeDoer::new()
            .on(
                "/api/v1/collectors",
                br#"[{"type": "https", "address": "https://collector.example"}]"#.to_vec(),
            )
            .on("/api/v1/test-helpers", b"{}".to_vec())
            .on_status("collector.example/report", 500)
            .on("policy=geo_options", b"[]".to_vec()),
    );
    let deps = TaskDeps {
        http: doer,
        tunnel_starter: None,
    };
    let settings = r#"{
        "name": "Ndt7",
        "options": {
            "software_name": "example-app",
            "software_version": "0.1.0",
            "work_dir_path": "/tmp",
            "no_geolookup": true,
            "no_resolver_lookup": true
        }
    }"#;
    let task = Task::start_with(settings, deps);
    let events = collect_events(task).await;

    assert_eq!(count_key(&events, "failure.report_create"), 1);
    assert_eq!(count_key(&events, "status.report_create"), 0);
    assert_eq!(count_key(&events, "measurement"), 1);
    assert_eq!(count_key(&events, "status.measurement_submission"), 0);
    assert_eq!(count_key(&events, "status.end"), 1);
}

#[tokio::test]
async fn test_invalid_settings_json_fails_startup() {
    let task = Task::start_with("{not json", TaskDeps::default());
    let events = collect_events(task).await;
    let keys = keys_of(&events);
    assert_eq!(
        keys,
        vec!["status.queued", "failure.startup", "status.end"]
    );
}

#[tokio::test]
async fn test_missing_required_option_fails_startup() {
    let settings = r#"{
        "name": "Ndt7",
        "options": {"software_name": "app", "software_version": "1.0"}
    }"#;
    let task = Task::start_with(settings, TaskDeps::default());
    let events = collect_events(task).await;
    let failure = events.iter().find(|ev| ev.key == "failure.startup").unwrap();
    assert_eq!(failure.value["failure"], "empty_variable: work_dir_path");
    assert_eq!(count_key(&events, "status.end"), 1);
}

#[tokio::test]
async fn test_unknown_nettest_fails_startup() {
    let task = Task::start_with(&offline_settings("WebConnectivity"), TaskDeps::default());
    let events = collect_events(task).await;
    let failure = events.iter().find(|ev| ev.key == "failure.startup").unwrap();
    assert_eq!(failure.value["failure"], "unknown_nettest_error");
}

#[tokio::test]
async fn test_psiphon_without_tunnel_library_fails_startup() {
    let task = Task::start_with(&offline_settings("PsiphonTunnel"), TaskDeps::default());
    let events = collect_events(task).await;
    let failure = events.iter().find(|ev| ev.key == "failure.startup").unwrap();
    assert_eq!(failure.value["failure"], "missing_tunnel_library");
}

struct NoopTunnel;

#[async_trait]
impl Tunnel for NoopTunnel {
    fn socks_proxy_port(&self) -> u16 {
        9050
    }

    async fn stop(&self) {}
}

struct NoopStarter;

#[async_trait]
impl TunnelStarter for NoopStarter {
    async fn start_tunnel(
        &self,
        _token: &CancellationToken,
        _config_json: &[u8],
        _workdir: &Path,
    ) -> Result<Box<dyn Tunnel>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Box::new(NoopTunnel))
    }
}

#[tokio::test]
async fn test_psiphon_task_produces_bootstrap_keys() {
    let workdir = tempfile::tempdir().unwrap();
    let config_file = workdir.path().join("psiphon.json");
    std::fs::write(&config_file, b"{}").unwrap();

    let doer = Arc::new(FakeDoer::new().on("humans.txt", b"ok".to_vec()));
    let deps = TaskDeps {
        http: doer,
        tunnel_starter: Some(Arc::new(NoopStarter)),
    };
    let settings = format!(
        r#"{{
            "name": "PsiphonTunnel",
            "options": {{
                "software_name": "example-app",
                "software_version": "0.1.0",
                "work_dir_path": {workdir:?},
                "config_file_path": {config_file:?},
                "no_bouncer": true,
                "no_collector": true,
                "no_geolookup": true,
                "no_resolver_lookup": true
            }}
        }}"#,
        workdir = workdir.path().display().to_string(),
        config_file = config_file.display().to_string(),
    );
    let task = Task::start_with(&settings, deps);
    let events = collect_events(task).await;

    let measurement_event = events.iter().find(|ev| ev.key == "measurement").unwrap();
    let json_str = measurement_event.value["json_str"].as_str().unwrap();
    let measurement: Measurement = serde_json::from_str(json_str).unwrap();
    assert_eq!(measurement.test_name, "psiphontunnel");
    assert_eq!(measurement.test_keys["failure"], "");
    assert!(measurement.test_keys["bootstrap_time_seconds"].as_f64().is_some());
}

#[tokio::test]
async fn test_interrupt_still_ends_with_exactly_one_end_event() {
    let task = Task::start_with(&offline_settings("Ndt7"), TaskDeps::default());
    task.interrupt();
    let events = collect_events(task).await;
    assert_eq!(count_key(&events, "status.end"), 1);
    assert_eq!(events.last().unwrap().key, "status.end");
}
