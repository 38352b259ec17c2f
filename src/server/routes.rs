use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::AppState;
use crate::backends::ExecutionMode;
use crate::errors::Error;
use crate::jobs::{Job, JobStatus, Status};
use crate::processes::ProcessSummary;
use crate::storage;

// ---------------------------------------------------------------------------
// Query params and request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct FormatParams {
    pub f: Option<String>,
}

enum OutputFormat {
    Json,
    Html,
}

impl FormatParams {
    fn output_format(&self) -> Result<OutputFormat, Error> {
        match self.f.as_deref() {
            None | Some("json") => Ok(OutputFormat::Json),
            Some("html") => Ok(OutputFormat::Html),
            Some(other) => Err(Error::Validation(format!(
                "valid format options are 'html' or 'json', not '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub inputs: Option<serde_json::Map<String, Value>>,
}

// ---------------------------------------------------------------------------
// Info handlers
// ---------------------------------------------------------------------------

/// GET /
pub async fn landing_page() -> Json<Value> {
    Json(json!({
        "title": super::TITLE,
        "description": super::DESCRIPTION,
    }))
}

/// GET /conformance
pub async fn conformance() -> Json<Value> {
    Json(json!({ "conformsTo": super::CONFORMS_TO }))
}

// ---------------------------------------------------------------------------
// Process handlers
// ---------------------------------------------------------------------------

/// GET /processes
pub async fn process_list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FormatParams>,
) -> Result<Response, Error> {
    let summaries = state.processes.list();
    match params.output_format()? {
        OutputFormat::Json => Ok(Json(summaries).into_response()),
        OutputFormat::Html => Ok(Html(render_processes_html(&summaries)).into_response()),
    }
}

/// GET /processes/{processID}
pub async fn process_describe(
    State(state): State<Arc<AppState>>,
    Path(process_id): Path<String>,
) -> Result<Json<Value>, Error> {
    let process = state.processes.get(&process_id).ok_or_else(|| {
        Error::Validation(format!("'{}' is not an available process", process_id))
    })?;
    Ok(Json(process.describe()))
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// POST /processes/{processID}/execution
pub async fn execution(
    State(state): State<Arc<AppState>>,
    Path(process_id): Path<String>,
    Json(body): Json<ExecRequest>,
) -> Result<Response, Error> {
    let process = state
        .processes
        .get(&process_id)
        .ok_or_else(|| Error::Validation(format!("'{}' is not an available process", process_id)))?
        .clone();

    let mut inputs = body
        .inputs
        .ok_or_else(|| Error::Validation("'inputs' is required in the body of the request".to_string()))?;
    process.verify_inputs(&inputs)?;

    let mode = match process.info.job_control_options.first().map(String::as_str) {
        Some("sync-execute") => ExecutionMode::Sync,
        Some("async-execute") => ExecutionMode::Async,
        _ => {
            return Err(Error::Internal(
                "incorrect controller option defined in process configuration".to_string(),
            ))
        }
    };

    let job_id = Uuid::new_v4();
    inputs.insert("jobID".to_string(), json!(job_id));
    let payload = serde_json::to_string(&inputs)?;

    let cmd = match &process.runtime.entrypoint {
        Some(entrypoint) if !entrypoint.is_empty() => vec![entrypoint.clone(), payload],
        _ => vec![payload],
    };

    let backend = state.backends.for_process(&process, mode, state.config.as_ref())?;
    let job = Job::new(job_id, &process, cmd, mode, backend, state.job_context());

    // admission: the job is accepted, so it enters the cache and the
    // active registry together, before the submit round-trip
    state.cache.add(Arc::clone(&job)).await;
    state.registry.add(&job).await;
    if let Err(e) = job.create().await {
        // the submission failed; roll the admission back
        state.cache.remove(job_id).await;
        state.registry.remove(job_id).await;
        return Err(Error::Backend(format!("submission error: {}", e)));
    }

    match mode {
        ExecutionMode::Sync => {
            // run on a worker task so the handler's scheduler stays free
            let worker = tokio::spawn(Arc::clone(&job).run_sync());
            if let Err(e) = worker.await {
                tracing::error!("Worker task for job {} panicked: {}", job_id, e);
            }

            if job.current_status() == Status::Successful {
                let outputs = if process.outputs.is_empty() {
                    Value::Null
                } else {
                    storage::fetch_document(
                        state.store.as_ref(),
                        &state.config.results_prefix,
                        job_id,
                    )
                    .await?
                };
                Ok(Json(json!({"jobID": job_id, "outputs": outputs})).into_response())
            } else {
                Ok((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "processID": process.info.id,
                        "type": "process",
                        "jobID": job_id,
                        "status": job.current_status(),
                        "detail": job.stored_logs(),
                    })),
                )
                    .into_response())
            }
        }
        ExecutionMode::Async => {
            job.spawn_monitor();
            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "processID": process.info.id,
                    "type": "process",
                    "jobID": job_id,
                    "status": Status::Accepted,
                })),
            )
                .into_response())
        }
    }
}

// ---------------------------------------------------------------------------
// Job handlers
// ---------------------------------------------------------------------------

async fn lookup_job(state: &AppState, job_id: &str) -> Option<Arc<Job>> {
    let job_id = Uuid::parse_str(job_id).ok()?;
    state.cache.get(job_id).await
}

fn not_found_body(job_id: &str) -> Json<Value> {
    Json(json!({
        "type": "process",
        "jobID": job_id,
        "detail": "jobID not found",
    }))
}

/// GET /jobs
pub async fn job_list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FormatParams>,
) -> Result<Response, Error> {
    let jobs = state.cache.list().await;
    match params.output_format()? {
        OutputFormat::Json => Ok(Json(jobs).into_response()),
        OutputFormat::Html => Ok(Html(render_jobs_html(&jobs)).into_response()),
    }
}

/// GET /jobs/{jobID}
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    match lookup_job(&state, &job_id).await {
        Some(job) => Json(job.status_summary()).into_response(),
        None => (StatusCode::NOT_FOUND, not_found_body(&job_id)).into_response(),
    }
}

/// GET /jobs/{jobID}/results
pub async fn job_results(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Response, Error> {
    let Some(job) = lookup_job(&state, &job_id).await else {
        return Ok((StatusCode::NOT_FOUND, not_found_body(&job_id)).into_response());
    };

    let summary = job.status_summary();
    match summary.status {
        Status::Successful => {
            let outputs =
                storage::fetch_document(state.store.as_ref(), &state.config.results_prefix, job.id())
                    .await?;
            Ok(Json(json!({
                "type": "process",
                "jobID": job.id(),
                "status": summary.status,
                "updated": summary.updated,
                "outputs": outputs,
            }))
            .into_response())
        }
        Status::Failed | Status::Dismissed => Ok(Json(json!({
            "type": "process",
            "jobID": job.id(),
            "status": summary.status,
            "updated": summary.updated,
            "detail": job.stored_logs(),
        }))
        .into_response()),
        _ => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({
                "type": "process",
                "jobID": job.id(),
                "status": summary.status,
                "updated": summary.updated,
                "detail": "results not ready",
            })),
        )
            .into_response()),
    }
}

/// DELETE /jobs/{jobID}
pub async fn job_dismiss(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Response, Error> {
    let job = lookup_job(&state, &job_id)
        .await
        .ok_or_else(|| Error::Gone(format!("job {} not in the jobs cache", job_id)))?;

    job.kill().await?;
    Ok(Json(json!({
        "jobID": job.id(),
        "status": Status::Dismissed,
        "message": format!("job {} dismissed", job.id()),
    }))
    .into_response())
}

/// GET /jobs/{jobID}/logs
pub async fn job_logs(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    match lookup_job(&state, &job_id).await {
        Some(job) => Json(job.logs().await).into_response(),
        None => (StatusCode::NOT_FOUND, not_found_body(&job_id)).into_response(),
    }
}

/// GET /jobs/{jobID}/metadata
pub async fn job_metadata(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Response, Error> {
    let Some(job) = lookup_job(&state, &job_id).await else {
        return Ok((StatusCode::NOT_FOUND, not_found_body(&job_id)).into_response());
    };

    let metadata =
        storage::fetch_document(state.store.as_ref(), &state.config.meta_prefix, job.id()).await?;
    Ok(Json(metadata).into_response())
}

// ---------------------------------------------------------------------------
// Minimal HTML rendering for ?f=html
// ---------------------------------------------------------------------------

fn html_page(title: &str, rows: String) -> String {
    format!(
        "<!doctype html><html><head><title>{title}</title></head>\
         <body><h1>{title}</h1><table border=\"1\">{rows}</table></body></html>"
    )
}

fn render_processes_html(processes: &[ProcessSummary]) -> String {
    let mut rows = String::from("<tr><th>id</th><th>version</th><th>title</th></tr>");
    for p in processes {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            p.id, p.version, p.title
        ));
    }
    html_page("Processes", rows)
}

fn render_jobs_html(jobs: &[JobStatus]) -> String {
    let mut rows = String::from("<tr><th>jobID</th><th>processID</th><th>status</th><th>updated</th></tr>");
    for j in jobs {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            j.job_id, j.process_id, j.status, j.updated
        ));
    }
    html_page("Jobs", rows)
}
