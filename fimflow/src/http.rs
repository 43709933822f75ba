//! HTTP surface: OGC Processes-shaped endpoints.
//!
//! The surface does no business work. Handlers validate against the
//! process registry, read and write the job store, and serialize job
//! summaries; everything else happens in the workers.

use crate::job::{JobId, JobStatus, LogStream};
use crate::registry::{ProcessRegistry, RegistryError};
use crate::store::JobStore;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub store: JobStore,
    pub registry: Arc<ProcessRegistry>,
}

/// Builds the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/processes/{name}/execution", post(execute))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(job_status).delete(dismiss_job))
        .route("/jobs/{id}/results", get(job_results))
        .route("/jobs/{id}/metadata", get(job_metadata))
        .route("/jobs/{id}/logs", get(job_logs))
        .with_state(state)
}

fn problem(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(json!({"type": "process", "detail": detail.into()})),
    )
        .into_response()
}

async fn ping() -> Response {
    Json(json!({"status": "healthy"})).into_response()
}

async fn execute(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let input = match body {
        Ok(Json(value)) => value,
        Err(e) => {
            return problem(
                StatusCode::BAD_REQUEST,
                format!("could not parse body to a JSON document: {e}"),
            )
        }
    };
    if let Err(e) = state.registry.validate_submission(&name, &input) {
        return match e {
            RegistryError::UnknownProcess(_) => problem(StatusCode::NOT_FOUND, e.to_string()),
            RegistryError::InvalidInput(_) => problem(StatusCode::BAD_REQUEST, e.to_string()),
        };
    }
    match state.store.enqueue(&name, &input) {
        Ok(job_id) => {
            info!(process = %name, job_id = %job_id, "job accepted");
            (
                StatusCode::CREATED,
                Json(json!({
                    "type": "process",
                    "jobID": job_id,
                    "status": JobStatus::Accepted,
                })),
            )
                .into_response()
        }
        Err(e) => problem(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unable to submit job: {e}"),
        ),
    }
}

async fn list_jobs(State(state): State<AppState>) -> Response {
    match state.store.list() {
        Ok(records) => {
            let jobs: Vec<Value> = records
                .iter()
                .map(|r| serde_json::to_value(r.summary(false)).unwrap_or(Value::Null))
                .collect();
            Json(json!({"jobs": jobs})).into_response()
        }
        Err(e) => problem(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let include_traceback = match params.get("tb").map(String::as_str) {
        None => false,
        Some("true") => true,
        Some("false") => false,
        Some(other) => {
            return problem(
                StatusCode::BAD_REQUEST,
                format!("query param 'tb' should be 'true' or 'false', but got: {other:?}"),
            )
        }
    };
    match state.store.get(&JobId::new(id.clone())) {
        Ok(Some(record)) => Json(record.summary(include_traceback)).into_response(),
        Ok(None) => problem(StatusCode::NOT_FOUND, format!("job ID not found: {id}")),
        Err(e) => problem(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn job_results(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get(&JobId::new(id.clone())) {
        Ok(Some(record)) => {
            if record.status == JobStatus::Successful {
                Json(record.result.unwrap_or(json!({}))).into_response()
            } else {
                problem(
                    StatusCode::CONFLICT,
                    format!("job {id} is {}; results require a successful job", record.status),
                )
            }
        }
        Ok(None) => problem(StatusCode::NOT_FOUND, format!("job ID not found: {id}")),
        Err(e) => problem(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn job_metadata(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get(&JobId::new(id.clone())) {
        Ok(Some(record)) => Json(json!({
            "jobID": record.job_id,
            "processID": record.process,
            "status": record.status,
            "submitted": record.submit_time,
            "started": record.start_time,
            "finished": record.end_time,
            "exitCode": record.exit_code,
            "pid": record.child_pid,
        }))
        .into_response(),
        Ok(None) => problem(StatusCode::NOT_FOUND, format!("job ID not found: {id}")),
        Err(e) => problem(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn job_logs(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let job_id = JobId::new(id.clone());
    match state.store.get(&job_id) {
        Ok(Some(_)) => {}
        Ok(None) => return problem(StatusCode::NOT_FOUND, format!("job ID not found: {id}")),
        Err(e) => return problem(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
    let stdout = state.store.read_logs(&job_id, LogStream::Stdout);
    let stderr = state.store.read_logs(&job_id, LogStream::Stderr);
    match (stdout, stderr) {
        (Ok(stdout), Ok(stderr)) => Json(json!({
            "logs": lines_as_json(&stdout),
            "errors": lines_as_json(&stderr),
        }))
        .into_response(),
        (Err(e), _) | (_, Err(e)) => problem(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Structured log lines come back as objects; everything else stays text.
fn lines_as_json(lines: &[String]) -> Vec<Value> {
    lines
        .iter()
        .map(|line| serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.clone())))
        .collect()
}

async fn dismiss_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.dismiss(&JobId::new(id.clone())) {
        Ok(_) => Json(json!({
            "type": "process",
            "detail": format!("job ID dismissed: {id}"),
        }))
        .into_response(),
        Err(crate::store::StoreError::NotFound(_)) => {
            problem(StatusCode::NOT_FOUND, format!("job ID not found: {id}"))
        }
        Err(e) => problem(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_as_json_mixes_shapes() {
        let lines = vec![
            r#"{"level":"INFO","message":"working"}"#.to_string(),
            "plain line".to_string(),
        ];
        let parsed = lines_as_json(&lines);
        assert_eq!(parsed[0]["level"], "INFO");
        assert_eq!(parsed[1], Value::String("plain line".to_string()));
    }
}
