//! Job executor: drives one job from `queued` to a terminal state
//!
//! The pipeline is a linear progression with two embedded loops (the
//! event/poll convergence loop and the permission sweep) and one universal
//! interrupt: abort. Every state transition goes through a conditional store
//! update, so an abort written by the API is observed at the next check and
//! preempts whatever the executor was doing. The executor never lets an
//! error escape the state machine: each terminal failure becomes a status
//! write plus a `job.failed` event.

pub mod error;

pub use error::ExecError;

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::agent::{AgentClient, BridgeEvent, EventBridge, PromptRequest, SessionStateKind};
use crate::config::{IdentityConfig, LimitsConfig};
use crate::ledger::{
    EventSource, FileCategory, Job, JobEvent, JobFile, JobStatus, JobStore, PermissionAction,
    PermissionDecision,
};
use crate::observability::Metrics;
use crate::policy;
use crate::skills::{ExecutionPlan, InputFileMeta, Skill, SkillContext, SkillRegistry};
use crate::workspace::{Workspace, WorkspaceManager, mime_for_name, sha256_file};

/// Pipeline states the failure path may transition out of. `succeeded` is
/// deliberately absent: a completed job is never clobbered.
const FAILABLE: &[JobStatus] = &[
    JobStatus::Created,
    JobStatus::Queued,
    JobStatus::Running,
    JobStatus::WaitingApproval,
    JobStatus::Verifying,
    JobStatus::Packaging,
    JobStatus::Failed,
];

/// Terminal result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Succeeded,
    Failed { code: &'static str },
    Aborted,
    /// The claim found the job in a state this worker must not touch
    /// (redelivery after a hard kill, a concurrent abort, a finished job).
    Skipped { status: JobStatus },
    /// Transport failure while creating the agent session; the queue layer
    /// decides whether to retry. No terminal state was written.
    RetrySessionCreate,
}

pub struct JobExecutor {
    store: Arc<JobStore>,
    workspaces: Arc<WorkspaceManager>,
    agent: Arc<AgentClient>,
    skills: Arc<SkillRegistry>,
    limits: LimitsConfig,
    identity: IdentityConfig,
    metrics: Arc<Metrics>,
}

impl JobExecutor {
    pub fn new(
        store: Arc<JobStore>,
        workspaces: Arc<WorkspaceManager>,
        agent: Arc<AgentClient>,
        skills: Arc<SkillRegistry>,
        limits: LimitsConfig,
        identity: IdentityConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            workspaces,
            agent,
            skills,
            limits,
            identity,
            metrics,
        }
    }

    /// Run one job to a terminal state. Every error is absorbed here; only
    /// the retriable session-create outcome leaves a non-terminal job behind.
    pub async fn run(&self, job_id: &str) -> ExecOutcome {
        let job = match self.store.get(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id, "Ticket for unknown job, skipping");
                return ExecOutcome::Skipped {
                    status: JobStatus::Failed,
                };
            }
            Err(err) => {
                warn!(job_id, error = %err, "Store read failed on claim");
                return ExecOutcome::Skipped {
                    status: JobStatus::Failed,
                };
            }
        };

        if !matches!(job.status, JobStatus::Queued | JobStatus::Running) {
            debug!(job_id, status = %job.status, "Claim skipped, job not runnable");
            return ExecOutcome::Skipped { status: job.status };
        }

        match self.pipeline(&job).await {
            Ok(()) => {
                info!(job_id, "Job succeeded");
                self.metrics.job_succeeded();
                ExecOutcome::Succeeded
            }
            Err(ExecError::Aborted) => {
                self.finalize_abort(&job).await;
                ExecOutcome::Aborted
            }
            Err(err) if err.is_retriable_session_create() => {
                warn!(job_id, error = %err, "Session create hit transport failure");
                ExecOutcome::RetrySessionCreate
            }
            Err(err) => {
                let code = err.code();
                self.fail(job_id, code, &err.to_string()).await;
                ExecOutcome::Failed { code }
            }
        }
    }

    /// Commit a failure: conditional transition, error record, audit event.
    /// An abort that won the race turns this into an abort finalization.
    pub async fn fail(&self, job_id: &str, code: &'static str, message: &str) {
        let message = trim_message(message);
        match self.store.set_status(job_id, FAILABLE, JobStatus::Failed) {
            Ok(outcome) if outcome.applied => {
                if let Err(err) = self.store.set_error(job_id, code, &message) {
                    warn!(job_id, error = %err, "Failed to record error detail");
                }
                let event = JobEvent::new(
                    job_id,
                    Some(JobStatus::Failed),
                    EventSource::Worker,
                    "job.failed",
                    message.clone(),
                    json!({ "error_code": code }),
                );
                if let Err(err) = self.store.append_event(event) {
                    warn!(job_id, error = %err, "Failed to append job.failed event");
                }
                self.metrics.job_failed();
                info!(job_id, code, "Job failed");
            }
            Ok(outcome) => {
                // Abort preempts the failure path
                debug!(job_id, status = %outcome.current, code, "Failure superseded");
            }
            Err(err) => warn!(job_id, error = %err, "Failure transition error"),
        }
    }

    async fn pipeline(&self, job: &Job) -> Result<(), ExecError> {
        let job_id = job.job_id.as_str();
        let directory = job.workspace_dir.clone();
        let workspace = self.workspaces.open(&directory);

        // Stage 1: claim the job
        self.set_status_or_abort(job_id, &[JobStatus::Queued, JobStatus::Running], JobStatus::Running)?;
        self.metrics.job_started();
        self.emit(job_id, JobStatus::Running, "job.started", "", json!({}));

        // Stage 2: agent session (reused on restart, created at most once)
        let session_id = match &job.session_id {
            Some(existing) => existing.clone(),
            None => {
                let title = format!("agentbox job {job_id}");
                let session_id = self
                    .agent
                    .create_session(&directory, Some(&title))
                    .await
                    .map_err(ExecError::SessionCreate)?;
                self.store.set_session_id(job_id, &session_id)?;
                self.emit(
                    job_id,
                    JobStatus::Running,
                    "session.created",
                    "",
                    json!({ "session_id": session_id }),
                );
                session_id
            }
        };

        // Stage 3: compose and dispatch the prompt
        let skill = self
            .skills
            .get(&job.selected_skill)
            .ok_or_else(|| ExecError::SkillMissing(job.selected_skill.clone()))?;
        let ctx = self.skill_context(job, &workspace)?;
        let plan = load_or_build_plan(&workspace, skill.as_ref(), &ctx)?;
        let prompt = skill.build_prompt(&ctx, &plan);
        let request = PromptRequest::text(prompt, job.agent.clone(), job.model.clone());
        self.agent
            .prompt_async(&directory, &session_id, &request)
            .await
            .map_err(ExecError::Prompt)?;
        self.emit(
            job_id,
            JobStatus::Running,
            "prompt.sent",
            "",
            json!({ "session_id": session_id }),
        );

        // Stage 4: converge on idle, answering permissions along the way
        let mut bridge = EventBridge::spawn(
            self.agent.clone(),
            directory.clone(),
            session_id.clone(),
            &self.limits,
        );
        self.converge(job_id, &directory, &session_id, &mut bridge)
            .await?;
        drop(bridge);

        // Stage 5: preserve the agent's final message
        match self.agent.last_message(&directory, &session_id).await {
            Ok(text) if !text.trim().is_empty() => {
                workspace.write_last_message(&text)?;
                self.index_file(job_id, &workspace, FileCategory::Log, "logs/agent-last-message.md")?;
            }
            Ok(_) => {}
            Err(err) => warn!(job_id, error = %err, "Could not fetch last message"),
        }

        // Stage 6: verification
        self.set_status_or_abort(job_id, &[JobStatus::Running], JobStatus::Verifying)?;

        // Stage 7: inputs must be byte-identical to creation time
        self.verify_inputs(job_id, &workspace)?;

        // Stage 8: outputs exist and satisfy the skill contract
        let outputs_present = workspace
            .outputs_dir()
            .read_dir()
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if !outputs_present {
            return Err(ExecError::OutputsMissing);
        }
        skill
            .validate_outputs(&ctx)
            .await
            .map_err(ExecError::ContractViolated)?;

        // Stage 9-10: packaging
        self.set_status_or_abort(job_id, &[JobStatus::Verifying], JobStatus::Packaging)?;
        let bundle = workspace.build_bundle(job_id, Some(&session_id))?;
        for entry in &bundle.manifest.entries {
            if entry.relative_path.starts_with("outputs/") {
                self.store.upsert_file(&JobFile {
                    file_id: uuid::Uuid::new_v4().to_string(),
                    job_id: job_id.to_string(),
                    category: FileCategory::Output,
                    relative_path: entry.relative_path.clone(),
                    mime_type: mime_for_name(&entry.relative_path).to_string(),
                    size_bytes: entry.size_bytes,
                    sha256: entry.sha256.clone(),
                    created_at: chrono::Utc::now(),
                })?;
            }
        }
        self.index_file(job_id, &workspace, FileCategory::Bundle, "bundle/manifest.json")?;
        self.index_file(job_id, &workspace, FileCategory::Bundle, "bundle/result.zip")?;
        self.store
            .set_bundle_path(job_id, &workspace.bundle_path().to_string_lossy())?;
        self.metrics.bundle_built();
        self.emit(
            job_id,
            JobStatus::Packaging,
            "bundle.built",
            "",
            json!({
                "entries": bundle.manifest.entries.len(),
                "zip_size_bytes": bundle.zip_size_bytes,
            }),
        );

        // Stage 11: done
        self.set_status_or_abort(job_id, &[JobStatus::Packaging], JobStatus::Succeeded)?;
        self.store.clear_error(job_id)?;
        self.emit(job_id, JobStatus::Succeeded, "job.succeeded", "", json!({}));
        Ok(())
    }

    /// Convergence loop: an event tick (bridge channel) fused with a poll
    /// tick every `poll_interval`. The poll path alone is sufficient for
    /// correctness; bridge events only accelerate it.
    async fn converge(
        &self,
        job_id: &str,
        directory: &str,
        session_id: &str,
        bridge: &mut EventBridge,
    ) -> Result<(), ExecError> {
        let poll_interval = Duration::from_millis(self.limits.poll_interval_ms);
        let soft_deadline = Duration::from_secs(self.limits.soft_deadline_secs);
        let permission_ceiling = Duration::from_secs(self.limits.permission_wait_secs);

        let started = Instant::now();
        let mut waiting_since: Option<Instant> = None;
        let mut in_waiting_state = false;
        let mut status_misses: u32 = 0;
        let mut bridge_alive = true;

        loop {
            // (a) abort wins over everything
            self.ensure_not_aborted(job_id)?;

            // (b) soft deadline
            if started.elapsed() > soft_deadline {
                let _ = self.agent.abort_session(directory, session_id).await;
                return Err(ExecError::SoftTimeout);
            }

            // (c) authoritative status sweep
            match self.agent.session_status(directory).await {
                Ok(sessions) => match sessions.get(session_id).map(|s| s.kind) {
                    Some(SessionStateKind::Idle) => {
                        if in_waiting_state {
                            self.set_status_or_abort(
                                job_id,
                                &[JobStatus::WaitingApproval],
                                JobStatus::Running,
                            )?;
                        }
                        return Ok(());
                    }
                    Some(SessionStateKind::Retry) => {
                        status_misses = 0;
                        self.emit(
                            job_id,
                            JobStatus::Running,
                            "session.retry",
                            "",
                            json!({ "session_id": session_id }),
                        );
                    }
                    Some(_) => status_misses = 0,
                    None => {
                        status_misses += 1;
                        // Recorded for observability; the soft deadline is
                        // still the only bail-out.
                        if status_misses == 10 {
                            self.emit(
                                job_id,
                                JobStatus::Running,
                                "session.status.missing",
                                "session absent from status map",
                                json!({ "session_id": session_id, "polls": status_misses }),
                            );
                        }
                    }
                },
                Err(err) if err.is_transport() => {
                    debug!(job_id, error = %err, "Status poll transport error, will retry");
                }
                Err(err) => return Err(ExecError::Agent(err)),
            }

            // (d)+(e) permission sweep and the waiting_approval window
            let pending = self.sweep_permissions(job_id, directory, session_id).await?;
            if pending > 0 {
                if !in_waiting_state {
                    self.set_status_or_abort(
                        job_id,
                        &[JobStatus::Running],
                        JobStatus::WaitingApproval,
                    )?;
                    in_waiting_state = true;
                }
                let since = *waiting_since.get_or_insert_with(Instant::now);
                if since.elapsed() > permission_ceiling {
                    return Err(ExecError::PermissionTimeout);
                }
            } else {
                if in_waiting_state {
                    self.set_status_or_abort(
                        job_id,
                        &[JobStatus::WaitingApproval],
                        JobStatus::Running,
                    )?;
                    in_waiting_state = false;
                }
                waiting_since = None;
            }

            // (f) wait for the next tick: a bridge event or the poll timer
            if bridge_alive {
                tokio::select! {
                    event = bridge.next() => match event {
                        Some(event) => self.note_bridge_event(job_id, session_id, &event),
                        None => bridge_alive = false,
                    },
                    _ = tokio::time::sleep(poll_interval) => {}
                }
                // Drain whatever else arrived without waiting
                while let Some(event) = bridge.try_next() {
                    self.note_bridge_event(job_id, session_id, &event);
                }
            } else {
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    fn note_bridge_event(&self, job_id: &str, session_id: &str, event: &BridgeEvent) {
        match event {
            BridgeEvent::SessionUpdated => self.emit(
                job_id,
                JobStatus::Running,
                "session.updated",
                "",
                json!({ "session_id": session_id }),
            ),
            BridgeEvent::SessionRetry => self.emit(
                job_id,
                JobStatus::Running,
                "session.retry",
                "",
                json!({ "session_id": session_id }),
            ),
            // PermissionAsked and Resync just accelerate the next sweep;
            // MessagePartUpdated is progress noise.
            _ => {}
        }
    }

    /// Answer every pending permission for this session. Returns how many
    /// were pending when the sweep started.
    async fn sweep_permissions(
        &self,
        job_id: &str,
        directory: &str,
        session_id: &str,
    ) -> Result<usize, ExecError> {
        let pending = match self.agent.list_permissions(directory).await {
            Ok(pending) => pending,
            Err(err) if err.is_transport() => {
                debug!(job_id, error = %err, "Permission poll transport error");
                return Ok(0);
            }
            Err(err) => return Err(ExecError::Agent(err)),
        };

        let workspace_root = std::path::PathBuf::from(directory);
        let mut found = 0usize;
        for request in pending
            .iter()
            .filter(|request| request.session_id == session_id)
        {
            found += 1;
            let verdict = policy::decide(request, &workspace_root);
            let decision = verdict.decision;

            match self
                .agent
                .reply_permission(directory, &request.request_id, decision)
                .await
            {
                Ok(()) => {}
                // Already answered elsewhere; nothing to record
                Err(err) if matches!(err, crate::agent::AgentError::NotFound { .. }) => continue,
                Err(err) if err.is_transport() => {
                    // Stays pending; the next sweep retries
                    debug!(job_id, request_id = %request.request_id, error = %err, "Permission reply transport error");
                    continue;
                }
                Err(err) => return Err(ExecError::Agent(err)),
            }

            self.store.add_permission_action(&PermissionAction {
                job_id: job_id.to_string(),
                request_id: request.request_id.clone(),
                action: decision,
                actor: self.identity.default_actor.clone(),
                created_at: chrono::Utc::now(),
            })?;
            self.emit(
                job_id,
                JobStatus::Running,
                "permission.replied",
                verdict.reason.clone(),
                json!({
                    "request_id": request.request_id,
                    "tool": request.tool,
                    "path": request.target_path(),
                    "command": request.command_line(),
                    "decision": decision.as_str(),
                }),
            );
            self.metrics.permission_replied();
            if decision == PermissionDecision::Reject {
                info!(job_id, request_id = %request.request_id, reason = %verdict.reason, "Permission rejected");
            }
        }

        Ok(found)
    }

    /// Re-hash every input and compare with the digests recorded at
    /// creation. Any drift (content, missing file, extra file) is tampering.
    fn verify_inputs(&self, job_id: &str, workspace: &Workspace) -> Result<(), ExecError> {
        let mut recorded: Vec<(String, String)> = self
            .store
            .list_files(job_id)?
            .into_iter()
            .filter(|f| f.category == FileCategory::Input)
            .map(|f| {
                let name = f
                    .relative_path
                    .strip_prefix("inputs/")
                    .unwrap_or(&f.relative_path)
                    .to_string();
                (name, f.sha256)
            })
            .collect();
        recorded.sort();

        let current = workspace.hash_inputs()?;
        if recorded != current {
            let offender = find_drift(&recorded, &current);
            return Err(ExecError::InputsTampered(offender));
        }
        Ok(())
    }

    fn skill_context(&self, job: &Job, workspace: &Workspace) -> Result<SkillContext, ExecError> {
        let input_files: Vec<InputFileMeta> = self
            .store
            .list_files(&job.job_id)?
            .into_iter()
            .filter(|f| f.category == FileCategory::Input)
            .map(|f| InputFileMeta {
                file_name: f
                    .relative_path
                    .strip_prefix("inputs/")
                    .unwrap_or(&f.relative_path)
                    .to_string(),
                mime_type: f.mime_type,
                size_bytes: f.size_bytes,
            })
            .collect();

        Ok(SkillContext {
            job_id: job.job_id.clone(),
            tenant_id: job.tenant_id.clone(),
            requirement: job.requirement.clone(),
            workspace: workspace.clone(),
            input_files,
            output_contract: job.output_contract.clone(),
        })
    }

    fn index_file(
        &self,
        job_id: &str,
        workspace: &Workspace,
        category: FileCategory,
        relative_path: &str,
    ) -> Result<(), ExecError> {
        let path = workspace.root().join(relative_path);
        let metadata = std::fs::metadata(&path).map_err(crate::workspace::WorkspaceError::from)?;
        let sha256 = sha256_file(&path).map_err(crate::workspace::WorkspaceError::from)?;
        self.store.upsert_file(&JobFile {
            file_id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            category,
            relative_path: relative_path.to_string(),
            mime_type: mime_for_name(relative_path).to_string(),
            size_bytes: metadata.len(),
            sha256,
            created_at: chrono::Utc::now(),
        })?;
        Ok(())
    }

    fn ensure_not_aborted(&self, job_id: &str) -> Result<(), ExecError> {
        let job = self.store.require(job_id)?;
        if job.status == JobStatus::Aborted {
            Err(ExecError::Aborted)
        } else {
            Ok(())
        }
    }

    fn set_status_or_abort(
        &self,
        job_id: &str,
        from_set: &[JobStatus],
        to: JobStatus,
    ) -> Result<(), ExecError> {
        let outcome = self.store.set_status(job_id, from_set, to)?;
        if outcome.applied {
            Ok(())
        } else if outcome.current == JobStatus::Aborted {
            Err(ExecError::Aborted)
        } else {
            Err(ExecError::IllegalState {
                current: outcome.current,
                wanted: to,
            })
        }
    }

    /// Observed abort: stand down, release the agent session, leave a final
    /// audit event. The `aborted` status itself was written by the API.
    async fn finalize_abort(&self, job: &Job) {
        info!(job_id = %job.job_id, "Executor released after abort");
        if let Some(session_id) = &job.session_id {
            let _ = self
                .agent
                .abort_session(&job.workspace_dir, session_id)
                .await;
        }
        self.emit(
            &job.job_id,
            JobStatus::Aborted,
            "worker.released",
            "executor released after abort",
            json!({}),
        );
    }

    fn emit(
        &self,
        job_id: &str,
        status: JobStatus,
        event_type: &str,
        message: impl Into<String>,
        payload: serde_json::Value,
    ) {
        // A late tick (bridge event, permission reply) must never append a
        // non-aborted status after the job.aborted event.
        if status != JobStatus::Aborted {
            if let Ok(Some(job)) = self.store.get(job_id) {
                if job.status == JobStatus::Aborted {
                    return;
                }
            }
        }
        let source = match event_type {
            "session.updated" | "session.retry" | "session.status.missing" => EventSource::Opencode,
            _ => EventSource::Worker,
        };
        let event = JobEvent::new(job_id, Some(status), source, event_type, message, payload);
        if let Err(err) = self.store.append_event(event) {
            warn!(job_id, event_type, error = %err, "Failed to append event");
        }
    }
}

/// The plan written at creation is the source of truth; rebuild only if it
/// went missing.
fn load_or_build_plan(
    workspace: &Workspace,
    skill: &dyn Skill,
    ctx: &SkillContext,
) -> Result<ExecutionPlan, ExecError> {
    match std::fs::read(workspace.plan_path()) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(plan) => Ok(plan),
            Err(err) => {
                warn!(error = %err, "Stored plan unreadable, rebuilding");
                Ok(skill.build_execution_plan(ctx))
            }
        },
        Err(_) => {
            let plan = skill.build_execution_plan(ctx);
            workspace.write_plan(&serde_json::to_value(&plan).unwrap_or_default())?;
            Ok(plan)
        }
    }
}

fn find_drift(recorded: &[(String, String)], current: &[(String, String)]) -> String {
    for (name, sha) in recorded {
        match current.iter().find(|(n, _)| n == name) {
            Some((_, current_sha)) if current_sha != sha => return format!("inputs/{name}"),
            None => return format!("inputs/{name} (removed)"),
            Some(_) => {}
        }
    }
    for (name, _) in current {
        if !recorded.iter().any(|(n, _)| n == name) {
            return format!("inputs/{name} (added)");
        }
    }
    "inputs/".to_string()
}

fn trim_message(message: &str) -> String {
    const MAX: usize = 500;
    let trimmed = message.trim();
    if trimmed.len() <= MAX {
        return trimmed.to_string();
    }
    let mut cut = MAX;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &trimmed[..cut])
}
