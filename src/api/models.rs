//! API wire types
//!
//! `POST /api/v1/jobs` accepts a multipart submission: a `requirement` text
//! field, one or more `files` parts, and optional `skill_code`, `agent`,
//! `model_provider_id` + `model_id` (must appear together),
//! `output_contract` (JSON text), and `idempotency_key` fields. Responses
//! project the stored [`Job`] into [`JobView`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::ledger::{FileCategory, Job, JobFile, JobStatus, ModelRef};
use crate::skills::SkillDescriptor;

#[derive(Debug, Serialize, Deserialize)]
pub struct JobCreatedResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub selected_skill: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobStartedResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// Materialized job projection returned by `GET /jobs/{id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: String,
    pub tenant_id: String,
    pub created_by: String,
    pub status: JobStatus,
    pub selected_skill: String,
    pub agent: String,
    pub model: Option<ModelRef>,
    pub requirement: String,
    pub session_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.job_id,
            tenant_id: job.tenant_id,
            created_by: job.created_by,
            status: job.status,
            selected_skill: job.selected_skill,
            agent: job.agent,
            model: job.model,
            requirement: job.requirement,
            session_id: job.session_id,
            error_code: job.error_code,
            error_message: job.error_message,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArtifactView {
    pub artifact_id: String,
    pub category: FileCategory,
    pub relative_path: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

impl From<JobFile> for ArtifactView {
    fn from(file: JobFile) -> Self {
        Self {
            artifact_id: file.file_id,
            category: file.category,
            relative_path: file.relative_path,
            mime_type: file.mime_type,
            size_bytes: file.size_bytes,
            sha256: file.sha256,
            created_at: file.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArtifactsResponse {
    pub job_id: String,
    pub artifacts: Vec<ArtifactView>,
    pub bundle_ready: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SkillView {
    pub code: String,
    pub name: String,
    pub aliases: Vec<String>,
    pub version: String,
    pub schema_version: String,
    pub task_type: String,
    pub description: String,
}

impl From<&SkillDescriptor> for SkillView {
    fn from(descriptor: &SkillDescriptor) -> Self {
        Self {
            code: descriptor.code.to_string(),
            name: descriptor.name.to_string(),
            aliases: descriptor.aliases.iter().map(|a| a.to_string()).collect(),
            version: descriptor.version.to_string(),
            schema_version: descriptor.schema_version.to_string(),
            task_type: descriptor.task_type.to_string(),
            description: descriptor.description.to_string(),
        }
    }
}

/// Shape of one SSE `data:` payload on `GET /jobs/{id}/events`.
#[derive(Debug, Serialize, Deserialize)]
pub struct EventView {
    pub job_id: String,
    pub status: Option<JobStatus>,
    pub source: crate::ledger::EventSource,
    pub event_type: String,
    pub message: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}
