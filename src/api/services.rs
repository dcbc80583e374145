use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::collections::HashMap;

use super::error::ApiError;
use super::models::{
    ArtifactView, ArtifactsResponse, HealthResponse, JobCreatedResponse, JobListResponse,
    JobStartedResponse, JobView, SkillView,
};
use super::state::AppState;
use crate::ledger::{JobStatus, ModelRef};
use crate::orchestrator::{CreateJobRequest, UploadedFile};

/// Job submission endpoint (`POST /api/v1/jobs`, multipart).
///
/// Fields: `requirement` (required non-blank), `files` (one or more parts),
/// optional `skill_code`, `agent`, `model_provider_id` + `model_id` (both or
/// neither), `output_contract` (JSON text), `idempotency_key`. An identical
/// resubmission under the same key returns the original job.
pub async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut requirement = None;
    let mut skill_code = None;
    let mut agent = None;
    let mut model_provider_id = None;
    let mut model_id = None;
    let mut output_contract_text = None;
    let mut idempotency_key = None;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "requirement" => requirement = Some(read_text(field).await?),
            "skill_code" => skill_code = non_empty(read_text(field).await?),
            "agent" => agent = non_empty(read_text(field).await?),
            "model_provider_id" => model_provider_id = non_empty(read_text(field).await?),
            "model_id" => model_id = non_empty(read_text(field).await?),
            "output_contract" => output_contract_text = non_empty(read_text(field).await?),
            "idempotency_key" => idempotency_key = non_empty(read_text(field).await?),
            "files" => {
                let file_name = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("file")
                    .to_string();
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::InvalidInput(format!("failed to read upload: {e}")))?;
                files.push(UploadedFile { file_name, content });
            }
            _ => {
                // Unknown fields are drained and ignored
                let _ = field.bytes().await;
            }
        }
    }

    let requirement = requirement
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidInput("requirement must not be blank".into()))?;
    if files.is_empty() {
        return Err(ApiError::InvalidInput("at least one file is required".into()));
    }

    let model = match (model_provider_id, model_id) {
        (Some(provider_id), Some(model_id)) => Some(ModelRef {
            provider_id,
            model_id,
        }),
        (None, None) => None,
        _ => {
            return Err(ApiError::InvalidInput(
                "model_provider_id and model_id must appear together".into(),
            ));
        }
    };

    let output_contract = match output_contract_text {
        Some(text) => Some(
            serde_json::from_str(&text)
                .map_err(|e| ApiError::InvalidInput(format!("output_contract is not valid JSON: {e}")))?,
        ),
        None => None,
    };

    let tenant_id = header_value(&headers, "x-tenant-id")
        .unwrap_or_else(|| state.config.identity.default_tenant.clone());
    let created_by = header_value(&headers, "x-actor")
        .unwrap_or_else(|| state.config.identity.default_actor.clone());

    let created = state
        .orchestrator
        .create_job(CreateJobRequest {
            tenant_id,
            created_by,
            requirement,
            files,
            skill_code,
            agent,
            model,
            output_contract,
            idempotency_key,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(JobCreatedResponse {
            job_id: created.job_id,
            status: created.status,
            selected_skill: created.selected_skill,
        }),
    ))
}

/// `POST /api/v1/jobs/{id}/start`
pub async fn start_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.start_job(&job_id).await?;
    Ok(Json(JobStartedResponse {
        job_id: job.job_id,
        status: job.status,
    }))
}

/// `GET /api/v1/jobs/{id}`
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.get_job(&job_id)?;
    Ok(Json(JobView::from(job)))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

/// `GET /api/v1/jobs`
pub async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = header_value(&headers, "x-tenant-id")
        .unwrap_or_else(|| state.config.identity.default_tenant.clone());
    let limit = query.limit.unwrap_or(50).min(500);
    let jobs = state
        .orchestrator
        .list_jobs(&tenant_id, query.status, limit)?;
    Ok(Json(JobListResponse {
        jobs: jobs.into_iter().map(JobView::from).collect(),
    }))
}

/// `POST /api/v1/jobs/{id}/abort`
pub async fn abort_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.abort_job(&job_id).await?;
    Ok(Json(JobView::from(job)))
}

/// `GET /api/v1/jobs/{id}/artifacts`
pub async fn list_artifacts(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let listing = state.orchestrator.list_artifacts(&job_id)?;
    Ok(Json(ArtifactsResponse {
        job_id,
        artifacts: listing.artifacts.into_iter().map(ArtifactView::from).collect(),
        bundle_ready: listing.bundle_ready,
    }))
}

/// `GET /api/v1/jobs/{id}/download`: the result bundle zip.
pub async fn download_bundle(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job = state.orchestrator.get_job(&job_id)?;
    let listing = state.orchestrator.list_artifacts(&job_id)?;
    if !listing.bundle_ready {
        return Err(ApiError::NotFound(format!("bundle for job {job_id}")));
    }

    let path = job
        .result_bundle_path
        .ok_or_else(|| ApiError::NotFound(format!("bundle for job {job_id}")))?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound(format!("bundle for job {job_id}")))?;

    file_response(bytes, "application/zip", &format!("{job_id}.zip"))
}

/// `GET /api/v1/jobs/{id}/artifacts/{artifact_id}/download`
///
/// Only `output` and `bundle` categories are reachable; anything else is a
/// 404 regardless of existence.
pub async fn download_artifact(
    State(state): State<AppState>,
    Path((job_id, artifact_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let job = state.orchestrator.get_job(&job_id)?;
    let file = state
        .store
        .find_file(&job_id, &artifact_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .filter(|f| f.category.is_downloadable())
        .ok_or_else(|| ApiError::NotFound(format!("artifact {artifact_id}")))?;

    let path = std::path::Path::new(&job.workspace_dir).join(&file.relative_path);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound(format!("artifact {artifact_id}")))?;

    let download_name = file
        .relative_path
        .rsplit('/')
        .next()
        .unwrap_or("artifact")
        .to_string();
    file_response(bytes, &file.mime_type, &download_name)
}

#[derive(Debug, Deserialize)]
pub struct ListSkillsQuery {
    pub task_type: Option<String>,
}

/// `GET /api/v1/skills`
pub async fn list_skills(
    State(state): State<AppState>,
    Query(query): Query<ListSkillsQuery>,
) -> impl IntoResponse {
    let skills: Vec<SkillView> = state
        .skills
        .list()
        .into_iter()
        .map(|skill| SkillView::from(skill.descriptor()))
        .filter(|view| {
            query
                .task_type
                .as_deref()
                .map(|t| view.task_type == t)
                .unwrap_or(true)
        })
        .collect();
    Json(skills)
}

/// `GET /api/v1/skills/{code}`
pub async fn get_skill(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let skill = state
        .skills
        .get(&code)
        .ok_or_else(|| ApiError::NotFound(format!("skill {code}")))?;
    Ok(Json(SkillView::from(skill.descriptor())))
}

/// `GET /health`: component report. The service is healthy as long as the
/// ledger answers; an unreachable agent is reported but does not take the
/// API down.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();

    let ledger_ok = state.store.health_check().is_ok();
    components.insert(
        "ledger".to_string(),
        if ledger_ok { "healthy" } else { "unhealthy" }.to_string(),
    );

    let agent_status = match state.agent.health().await {
        Ok(health) if health.healthy => "healthy".to_string(),
        Ok(_) => "degraded".to_string(),
        Err(err) => format!("unreachable: {err}"),
    };
    components.insert("agent".to_string(), agent_status);
    components.insert("api".to_string(), "healthy".to_string());

    let status_code = if ledger_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if ledger_ok { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    (status_code, Json(response))
}

/// `GET /operators/metrics`
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("failed to read field: {e}")))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn file_response(bytes: Vec<u8>, mime_type: &str, download_name: &str) -> Result<Response, ApiError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{download_name}\""),
        )
        .body(Body::from(bytes))
        .map_err(|e| ApiError::Internal(e.to_string()))
}
