//! Orchestrator: the public operations behind the HTTP façade
//!
//! Owns job creation (idempotency, workspace, skill routing, plan), start
//! (health guardrail + enqueue), abort (conditional absorbing write), and
//! artifact listing. The HTTP layer is a thin adapter over this service.

use bytes::Bytes;
use chrono::Utc;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::AgentClient;
use crate::config::Config;
use crate::ledger::{
    EventSource, FileCategory, Job, JobEvent, JobFile, JobStatus, JobStore, LedgerError,
};
use crate::observability::Metrics;
use crate::queue::{QueueError, WorkBroker};
use crate::skills::{InputFileMeta, RouterError, SkillContext, SkillRegistry};
use crate::workspace::{WorkspaceError, WorkspaceManager, mime_for_name};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("unknown skill: {0}")]
    UnknownSkill(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("operation not allowed in state {current}")]
    InvalidState { current: JobStatus },

    #[error("job is terminal in state {current}")]
    Terminal { current: JobStatus },

    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("store error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// One uploaded file, in submission order.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content: Bytes,
}

#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub tenant_id: String,
    pub created_by: String,
    pub requirement: String,
    pub files: Vec<UploadedFile>,
    pub skill_code: Option<String>,
    pub agent: Option<String>,
    pub model: Option<crate::ledger::ModelRef>,
    pub output_contract: Option<Value>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedJob {
    pub job_id: String,
    pub status: JobStatus,
    pub selected_skill: String,
    /// True when the idempotency index matched an earlier submission.
    pub existing: bool,
}

#[derive(Debug, Clone)]
pub struct ArtifactListing {
    pub artifacts: Vec<JobFile>,
    pub bundle_ready: bool,
}

pub struct Orchestrator {
    store: Arc<JobStore>,
    workspaces: Arc<WorkspaceManager>,
    skills: Arc<SkillRegistry>,
    agent: Arc<AgentClient>,
    broker: Arc<WorkBroker>,
    config: Arc<Config>,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<JobStore>,
        workspaces: Arc<WorkspaceManager>,
        skills: Arc<SkillRegistry>,
        agent: Arc<AgentClient>,
        broker: Arc<WorkBroker>,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            workspaces,
            skills,
            agent,
            broker,
            config,
            metrics,
        }
    }

    /// Create a job: idempotency claim, workspace + inputs, skill routing,
    /// plan, and the `created` record.
    pub async fn create_job(&self, request: CreateJobRequest) -> Result<CreatedJob> {
        if request.requirement.trim().is_empty() {
            return Err(OrchestratorError::Invalid("requirement must not be blank".into()));
        }
        if request.files.is_empty() {
            return Err(OrchestratorError::Invalid("at least one file is required".into()));
        }

        let requirement_hash = requirement_hash(&request.requirement, &request.files);
        let job_id = Uuid::now_v7().to_string();

        // Idempotency: identical (tenant, key, content) returns the earlier
        // job without creating a second workspace.
        if let Some(key) = request.idempotency_key.as_deref() {
            let winner = self.store.claim_idempotency(
                &request.tenant_id,
                key,
                &requirement_hash,
                &job_id,
            )?;
            if winner != job_id {
                let existing = self
                    .store
                    .get(&winner)?
                    .ok_or_else(|| OrchestratorError::NotFound(winner.clone()))?;
                info!(job_id = %winner, "Idempotent resubmit, returning existing job");
                return Ok(CreatedJob {
                    job_id: existing.job_id,
                    status: existing.status,
                    selected_skill: existing.selected_skill,
                    existing: true,
                });
            }
        }

        // The claim is durable; if anything below fails before the job row
        // lands, release it so an identical retry is not pinned to a job
        // that never existed.
        let created = self.materialize_job(&job_id, &request, &requirement_hash);
        if created.is_err() {
            if let Some(key) = request.idempotency_key.as_deref() {
                if let Err(err) = self.store.release_idempotency(
                    &request.tenant_id,
                    key,
                    &requirement_hash,
                    &job_id,
                ) {
                    warn!(job_id = %job_id, error = %err, "Failed to release idempotency claim");
                }
            }
        }
        created
    }

    /// Everything between the idempotency claim and the durable `created`
    /// record.
    fn materialize_job(
        &self,
        job_id: &str,
        request: &CreateJobRequest,
        requirement_hash: &str,
    ) -> Result<CreatedJob> {
        let workspace = self.workspaces.create(job_id)?;
        workspace.write_request(&request.requirement)?;

        let mut input_metas = Vec::with_capacity(request.files.len());
        let mut input_rows = Vec::with_capacity(request.files.len());
        for upload in &request.files {
            let stored = workspace.store_input(&upload.file_name, &upload.content)?;
            input_metas.push(InputFileMeta {
                file_name: stored.file_name.clone(),
                mime_type: mime_for_name(&stored.file_name).to_string(),
                size_bytes: stored.size_bytes,
            });
            input_rows.push(JobFile {
                file_id: Uuid::new_v4().to_string(),
                job_id: job_id.to_string(),
                category: FileCategory::Input,
                relative_path: format!("inputs/{}", stored.file_name),
                mime_type: mime_for_name(&stored.file_name).to_string(),
                size_bytes: stored.size_bytes,
                sha256: stored.sha256,
                created_at: Utc::now(),
            });
        }

        let route = self
            .skills
            .route(
                request.skill_code.as_deref(),
                &request.requirement,
                &input_metas,
                self.config.router.fallback_threshold,
            )
            .map_err(|RouterError::UnknownSkill(code)| OrchestratorError::UnknownSkill(code))?;
        let selected_skill = route.skill.descriptor().code.to_string();

        let ctx = SkillContext {
            job_id: job_id.to_string(),
            tenant_id: request.tenant_id.clone(),
            requirement: request.requirement.clone(),
            workspace: workspace.clone(),
            input_files: input_metas,
            output_contract: request.output_contract.clone(),
        };
        let plan = route.skill.build_execution_plan(&ctx);
        workspace.write_plan(&serde_json::to_value(&plan).map_err(LedgerError::from)?)?;

        let now = Utc::now();
        let job = Job {
            job_id: job_id.to_string(),
            tenant_id: request.tenant_id.clone(),
            created_by: request.created_by.clone(),
            requirement: request.requirement.clone(),
            selected_skill: selected_skill.clone(),
            agent: request
                .agent
                .clone()
                .unwrap_or_else(|| self.config.agent.default_agent.clone()),
            model: request.model.clone(),
            output_contract: request.output_contract.clone(),
            status: JobStatus::Created,
            session_id: None,
            workspace_dir: workspace.root().to_string_lossy().to_string(),
            result_bundle_path: None,
            error_code: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_job(&job)?;
        for row in &input_rows {
            self.store.upsert_file(row)?;
        }

        self.emit(
            job_id,
            Some(JobStatus::Created),
            "job.created",
            "",
            json!({
                "selected_skill": selected_skill,
                "requirement_hash": requirement_hash,
                "input_count": request.files.len(),
            }),
        );
        if let Some(fallback) = route.fallback {
            self.emit(
                job_id,
                Some(JobStatus::Created),
                "skill.router.fallback",
                format!(
                    "best candidate {} scored {:.2}, below threshold {:.2}",
                    fallback.best_code, fallback.best_score, fallback.threshold
                ),
                json!({
                    "best_code": fallback.best_code,
                    "best_score": fallback.best_score,
                    "threshold": fallback.threshold,
                    "selected": selected_skill,
                }),
            );
        }
        self.metrics.job_created();
        info!(job_id, skill = %selected_skill, "Job created");

        Ok(CreatedJob {
            job_id: job_id.to_string(),
            status: JobStatus::Created,
            selected_skill,
            existing: false,
        })
    }

    /// Start (or restart) a job: agent health guardrail, conditional
    /// transition to `queued`, durable enqueue.
    pub async fn start_job(&self, job_id: &str) -> Result<Job> {
        let job = self
            .store
            .get(job_id)?
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))?;

        if !matches!(job.status, JobStatus::Created | JobStatus::Failed) {
            return Err(OrchestratorError::InvalidState { current: job.status });
        }

        // Probe before any state change so an unreachable agent leaves the
        // job exactly as it was.
        if let Err(err) = self.agent.health().await {
            warn!(job_id, error = %err, "Agent health probe failed");
            return Err(OrchestratorError::AgentUnavailable(err.to_string()));
        }

        let outcome = self.store.set_status(
            job_id,
            &[JobStatus::Created, JobStatus::Failed],
            JobStatus::Queued,
        )?;
        if !outcome.applied {
            return Err(OrchestratorError::InvalidState {
                current: outcome.current,
            });
        }

        let ticket = self.broker.enqueue(job_id).await?;
        self.emit(
            job_id,
            Some(JobStatus::Queued),
            "job.enqueued",
            "",
            json!({ "ticket_seq": ticket.seq, "attempt": ticket.attempt }),
        );
        info!(job_id, seq = ticket.seq, "Job enqueued");

        self.store.require(job_id).map_err(Into::into)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        self.store
            .get(job_id)?
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))
    }

    pub fn list_jobs(&self, tenant_id: &str, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>> {
        self.store.list_jobs(tenant_id, status, limit).map_err(Into::into)
    }

    /// Abort: conditional absorbing write. Replay on an already-aborted job
    /// is a no-op returning the unchanged record; a succeeded job cannot be
    /// aborted.
    pub async fn abort_job(&self, job_id: &str) -> Result<Job> {
        let job = self
            .store
            .get(job_id)?
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))?;

        match job.status {
            JobStatus::Aborted => return Ok(job),
            JobStatus::Succeeded => {
                return Err(OrchestratorError::Terminal { current: job.status });
            }
            _ => {}
        }

        let from_set: Vec<JobStatus> = [
            JobStatus::Created,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::WaitingApproval,
            JobStatus::Verifying,
            JobStatus::Packaging,
            JobStatus::Failed,
        ]
        .to_vec();
        let outcome = self.store.set_status(job_id, &from_set, JobStatus::Aborted)?;
        if outcome.applied {
            self.emit(job_id, Some(JobStatus::Aborted), "job.aborted", "", json!({}));
            self.metrics.job_aborted();
            info!(job_id, "Job aborted");

            // Best-effort: tell the agent to stop as well. The executor
            // observes the status at its next check regardless.
            if let Some(session_id) = &job.session_id {
                if let Err(err) = self
                    .agent
                    .abort_session(&job.workspace_dir, session_id)
                    .await
                {
                    warn!(job_id, error = %err, "Best-effort session abort failed");
                }
            }
        } else if outcome.current != JobStatus::Aborted {
            return Err(OrchestratorError::Terminal {
                current: outcome.current,
            });
        }

        self.store.require(job_id).map_err(Into::into)
    }

    /// Externally visible artifacts: only `output` and `bundle` categories.
    pub fn list_artifacts(&self, job_id: &str) -> Result<ArtifactListing> {
        let job = self
            .store
            .get(job_id)?
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))?;

        let artifacts: Vec<JobFile> = self
            .store
            .list_files(job_id)?
            .into_iter()
            .filter(|f| f.category.is_downloadable())
            .collect();

        let zip_indexed = artifacts
            .iter()
            .any(|f| f.category == FileCategory::Bundle && f.relative_path == "bundle/result.zip");
        let bundle_ready = zip_indexed
            && job
                .result_bundle_path
                .as_deref()
                .map(|p| std::path::Path::new(p).is_file())
                .unwrap_or(false);

        Ok(ArtifactListing {
            artifacts,
            bundle_ready,
        })
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Re-send tickets that were persisted but never acked (startup path).
    pub async fn redeliver_pending(&self) -> Result<usize> {
        self.broker.redeliver_pending().await.map_err(Into::into)
    }

    fn emit(
        &self,
        job_id: &str,
        status: Option<JobStatus>,
        event_type: &str,
        message: impl Into<String>,
        payload: Value,
    ) {
        let event = JobEvent::new(job_id, status, EventSource::Api, event_type, message, payload);
        if let Err(err) = self.store.append_event(event) {
            warn!(job_id, event_type, error = %err, "Failed to append event");
        }
    }
}

/// Content hash binding an idempotency key to the actual submission: the
/// trimmed requirement plus each file's name and digest in upload order.
pub fn requirement_hash(requirement: &str, files: &[UploadedFile]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(requirement.trim().as_bytes());
    for file in files {
        hasher.update([0u8]);
        hasher.update(file.file_name.as_bytes());
        hasher.update([0u8]);
        let mut content_hasher = Sha256::new();
        content_hasher.update(&file.content);
        hasher.update(content_hasher.finalize());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, content: &[u8]) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            content: Bytes::copy_from_slice(content),
        }
    }

    #[test]
    fn hash_ignores_surrounding_whitespace() {
        let files = vec![upload("a.csv", b"1,2")];
        assert_eq!(
            requirement_hash("do the thing", &files),
            requirement_hash("  do the thing \n", &files)
        );
    }

    #[test]
    fn hash_changes_with_content() {
        let base = requirement_hash("req", &[upload("a.csv", b"1,2")]);
        assert_ne!(base, requirement_hash("req", &[upload("a.csv", b"1,3")]));
        assert_ne!(base, requirement_hash("req", &[upload("b.csv", b"1,2")]));
        assert_ne!(base, requirement_hash("other", &[upload("a.csv", b"1,2")]));
    }

    #[test]
    fn hash_is_order_sensitive() {
        let ab = requirement_hash("req", &[upload("a", b"x"), upload("b", b"y")]);
        let ba = requirement_hash("req", &[upload("b", b"y"), upload("a", b"x")]);
        assert_ne!(ab, ba);
    }
}
