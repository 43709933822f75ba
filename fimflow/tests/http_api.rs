//! HTTP surface tests against a bound ephemeral listener.
//!
//! The service runs with zero workers here, so submitted jobs stay
//! `accepted`; the full claim/run path is exercised by the CLI workflow
//! tests.

use fimflow::config::Settings;
use fimflow::service::Service;
use serde_json::Value;

async fn serve() -> (String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        data_dir: dir.path().to_path_buf(),
        workers: 0,
        ..Default::default()
    };
    let service = Service::new(settings).unwrap();
    let router = service.router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{address}"), dir)
}

async fn get_json(url: &str) -> (u16, Value) {
    let url = url.to_string();
    tokio::task::spawn_blocking(move || {
        let response = reqwest::blocking::get(&url).unwrap();
        let status = response.status().as_u16();
        let body: Value = response.json().unwrap_or(Value::Null);
        (status, body)
    })
    .await
    .unwrap()
}

async fn post_json(url: &str, body: Value) -> (u16, Value) {
    let url = url.to_string();
    tokio::task::spawn_blocking(move || {
        let client = reqwest::blocking::Client::new();
        let response = client.post(&url).json(&body).send().unwrap();
        let status = response.status().as_u16();
        let body: Value = response.json().unwrap_or(Value::Null);
        (status, body)
    })
    .await
    .unwrap()
}

async fn delete(url: &str) -> (u16, Value) {
    let url = url.to_string();
    tokio::task::spawn_blocking(move || {
        let client = reqwest::blocking::Client::new();
        let response = client.delete(&url).send().unwrap();
        let status = response.status().as_u16();
        let body: Value = response.json().unwrap_or(Value::Null);
        (status, body)
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_ping_reports_healthy() {
    let (base, _dir) = serve().await;
    let (status, body) = get_json(&format!("{base}/ping")).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_unknown_process_is_404() {
    let (base, _dir) = serve().await;
    let (status, _) = post_json(
        &format!("{base}/processes/make_it_rain/execution"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_invalid_input_is_400() {
    let (base, _dir) = serve().await;
    let (status, body) = post_json(
        &format!("{base}/processes/run_known_wse/execution"),
        serde_json::json!({"submodel_directory": "/x"}),
    )
    .await;
    assert_eq!(status, 400);
    assert!(body["detail"].as_str().unwrap().contains("min_elevation"));
}

#[tokio::test]
async fn test_submission_lifecycle_with_zero_workers() {
    let (base, _dir) = serve().await;
    let (status, body) = post_json(
        &format!("{base}/processes/test/execution"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, 201);
    let job_id = body["jobID"].as_str().unwrap().to_string();
    assert_eq!(body["status"], "accepted");

    // With no workers the job stays accepted.
    let (status, body) = get_json(&format!("{base}/jobs/{job_id}")).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["processID"], "test");
    assert!(body["created"].is_string());

    // It shows up in the listing.
    let (_, listing) = get_json(&format!("{base}/jobs")).await;
    let jobs = listing["jobs"].as_array().unwrap();
    assert!(jobs.iter().any(|j| j["jobID"] == job_id.as_str()));

    // Results for a non-terminal job conflict.
    let (status, _) = get_json(&format!("{base}/jobs/{job_id}/results")).await;
    assert_eq!(status, 409);

    // Metadata carries submission bookkeeping.
    let (status, metadata) = get_json(&format!("{base}/jobs/{job_id}/metadata")).await;
    assert_eq!(status, 200);
    assert_eq!(metadata["processID"], "test");
    assert!(metadata["pid"].is_null());

    // Dismissal transitions without a child having spawned.
    let (status, _) = delete(&format!("{base}/jobs/{job_id}")).await;
    assert_eq!(status, 200);
    let (_, body) = get_json(&format!("{base}/jobs/{job_id}")).await;
    assert_eq!(body["status"], "dismissed");
}

#[tokio::test]
async fn test_unknown_job_is_404_everywhere() {
    let (base, _dir) = serve().await;
    for path in ["jobs/feed00d1", "jobs/feed00d1/results", "jobs/feed00d1/logs"] {
        let (status, _) = get_json(&format!("{base}/{path}")).await;
        assert_eq!(status, 404, "{path}");
    }
    let (status, _) = delete(&format!("{base}/jobs/feed00d1")).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_bad_traceback_param_is_400() {
    let (base, _dir) = serve().await;
    let (_, body) = post_json(
        &format!("{base}/processes/test/execution"),
        serde_json::json!({}),
    )
    .await;
    let job_id = body["jobID"].as_str().unwrap();
    let (status, _) = get_json(&format!("{base}/jobs/{job_id}?tb=yes")).await;
    assert_eq!(status, 400);
    let (status, _) = get_json(&format!("{base}/jobs/{job_id}?tb=true")).await;
    assert_eq!(status, 200);
}
