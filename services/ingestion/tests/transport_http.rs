use std::{path::Path, sync::Arc};

use chrono::NaiveDate;
use ingestion::transport::{
    IngestConfig, IngestionRuntime, Outcome, RecordingSink, SharedRuntime,
    handle_http_request_bytes,
};

fn sample_runtime(data_dir: &Path) -> (SharedRuntime, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let runtime = IngestionRuntime::new(IngestConfig::new(data_dir))
        .with_event_sink(sink.clone())
        .with_clock(|| {
            NaiveDate::from_ymd_opt(2026, 3, 14)
                .expect("valid date")
                .and_hms_opt(9, 26, 53)
                .expect("valid time")
        });
    (Arc::new(runtime), sink)
}

fn post(runtime: &SharedRuntime, body: &str) -> String {
    let request = format!(
        "POST /save_data HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let response = handle_http_request_bytes(runtime, request.as_bytes())
        .expect("request should parse and return response");
    String::from_utf8(response).expect("response should be UTF-8")
}

#[test]
fn transport_post_saves_participant_csv() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let data_dir = dir.path().join("data");
    let (runtime, sink) = sample_runtime(&data_dir);
    let body = r#"[
      {"rt": 512, "stimulus": "<p>left</p>", "response": "f", "trial_index": 0,
       "participant_id": "sub-07", "experiment_version": "2.0", "time_elapsed": 1200},
      {"rt": 430, "stimulus": "<p>\"right\", then left</p>", "response": "j", "trial_index": 1,
       "participant_id": "sub-07", "correct": true, "time_elapsed": 1730}
    ]"#;

    let response = post(&runtime, body);
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains(
        r#""filename":"participant_sub-07_2026-03-14_092653_v2.0.csv","rows":2"#
    ));

    let csv_path = data_dir.join("participant_sub-07_2026-03-14_092653_v2.0.csv");
    let text = std::fs::read_to_string(csv_path).expect("csv should exist");
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("participant_id,experiment_version,rt,time_elapsed,trial_index,stimulus,response,correct")
    );
    assert_eq!(lines.next(), Some("sub-07,2.0,512,1200,0,<p>left</p>,f,"));
    assert_eq!(
        lines.next(),
        Some(r#"sub-07,,430,1730,1,"<p>""right"", then left</p>",j,true"#)
    );
    assert_eq!(lines.next(), None);
    assert_eq!(sink.events()[0].outcome, Outcome::Saved);
}

#[test]
fn transport_sanitizes_participant_id_in_file_name() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let (runtime, _) = sample_runtime(dir.path());

    let response = post(&runtime, r#"[{"participant_id":"../../etc/passwd"}]"#);
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("participant_______etc_passwd_2026-03-14_092653_vunknown.csv"));

    let names: Vec<_> = std::fs::read_dir(dir.path())
        .expect("data dir should be readable")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec!["participant_______etc_passwd_2026-03-14_092653_vunknown.csv".to_string()]
    );
}

#[test]
fn transport_rejects_oversized_body_via_content_length_guard() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let (runtime, _) = sample_runtime(dir.path());
    let request = b"POST /save_data HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: 20000000\r\nConnection: close\r\n\r\n";

    let response = handle_http_request_bytes(&runtime, request)
        .expect("oversized payload should still get a response");
    let response = String::from_utf8(response).expect("response should be UTF-8");
    assert!(response.starts_with("HTTP/1.1 413 Payload Too Large"));
    assert!(response.contains(r#"{"success":false,"error":"Data too large"}"#));
}

#[test]
fn transport_creates_missing_data_directory_on_first_post() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let data_dir = dir.path().join("nested").join("data");
    let (runtime, _) = sample_runtime(&data_dir);

    let response = post(&runtime, r#"[{"participant_id":"P9"}]"#);
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(data_dir.is_dir());
}
