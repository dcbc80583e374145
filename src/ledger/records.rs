//! Persisted record types for jobs, files, events, and permission replies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle states. `aborted` is absorbing: once written it can never be
/// overwritten. `succeeded` is terminal. `failed` is terminal but may be
/// restarted back to `queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Queued,
    Running,
    WaitingApproval,
    Verifying,
    Packaging,
    Succeeded,
    Failed,
    Aborted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::WaitingApproval => "waiting_approval",
            JobStatus::Verifying => "verifying",
            JobStatus::Packaging => "packaging",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Aborted
        )
    }

    /// Whether `from -> to` is a legal transition. Self-transitions are
    /// permitted as idempotent no-ops so a redelivered stage can re-enter
    /// cleanly.
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        use JobStatus::*;

        if from == Aborted {
            return false;
        }
        if from == to {
            return true;
        }
        match (from, to) {
            (Created, Queued) => true,
            (Queued, Running) => true,
            (Running, WaitingApproval) | (WaitingApproval, Running) => true,
            (Running, Verifying) => true,
            (Verifying, Packaging) => true,
            (Packaging, Succeeded) => true,
            (Failed, Queued) => true,
            (_, Failed) => true,
            (from, Aborted) => from != Succeeded,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model override forwarded to the agent server verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    #[serde(rename = "providerID")]
    pub provider_id: String,
    #[serde(rename = "modelID")]
    pub model_id: String,
}

/// One user request: a workspace, a lifecycle, and an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub tenant_id: String,
    pub created_by: String,
    pub requirement: String,
    pub selected_skill: String,
    pub agent: String,
    pub model: Option<ModelRef>,
    pub output_contract: Option<Value>,
    pub status: JobStatus,
    pub session_id: Option<String>,
    pub workspace_dir: String,
    pub result_bundle_path: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a conditional status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub applied: bool,
    /// Status prevailing after the call (the new status when applied,
    /// the blocking status otherwise).
    pub current: JobStatus,
}

/// Where a job file lives in the workspace and how it may be exposed.
/// Only `output` and `bundle` are externally listable and downloadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Input,
    Output,
    Bundle,
    Log,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Input => "input",
            FileCategory::Output => "output",
            FileCategory::Bundle => "bundle",
            FileCategory::Log => "log",
        }
    }

    pub fn is_downloadable(&self) -> bool {
        matches!(self, FileCategory::Output | FileCategory::Bundle)
    }
}

/// Catalog entry for a file belonging to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFile {
    pub file_id: String,
    pub job_id: String,
    pub category: FileCategory,
    pub relative_path: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Api,
    Worker,
    Opencode,
}

/// Append-only audit record. `id` is assigned by the store and is strictly
/// increasing per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(default)]
    pub id: u64,
    pub job_id: String,
    pub status: Option<JobStatus>,
    pub source: EventSource,
    pub event_type: String,
    pub message: String,
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(
        job_id: impl Into<String>,
        status: Option<JobStatus>,
        source: EventSource,
        event_type: impl Into<String>,
        message: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: 0,
            job_id: job_id.into(),
            status,
            source,
            event_type: event_type.into(),
            message: message.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Reply sent to an agent permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    Once,
    Always,
    Reject,
}

impl PermissionDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionDecision::Once => "once",
            PermissionDecision::Always => "always",
            PermissionDecision::Reject => "reject",
        }
    }
}

/// Audit row for one automated permission reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionAction {
    pub job_id: String,
    pub request_id: String,
    pub action: PermissionDecision,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_is_absorbing() {
        use JobStatus::*;
        for to in [
            Created,
            Queued,
            Running,
            WaitingApproval,
            Verifying,
            Packaging,
            Succeeded,
            Failed,
            Aborted,
        ] {
            assert!(!JobStatus::can_transition(Aborted, to), "aborted -> {to}");
        }
    }

    #[test]
    fn succeeded_cannot_be_aborted_or_restarted() {
        assert!(!JobStatus::can_transition(
            JobStatus::Succeeded,
            JobStatus::Aborted
        ));
        assert!(!JobStatus::can_transition(
            JobStatus::Succeeded,
            JobStatus::Queued
        ));
    }

    #[test]
    fn failed_restarts_to_queued_only() {
        assert!(JobStatus::can_transition(
            JobStatus::Failed,
            JobStatus::Queued
        ));
        assert!(!JobStatus::can_transition(
            JobStatus::Failed,
            JobStatus::Running
        ));
    }

    #[test]
    fn linear_pipeline_is_legal() {
        use JobStatus::*;
        for (from, to) in [
            (Created, Queued),
            (Queued, Running),
            (Running, WaitingApproval),
            (WaitingApproval, Running),
            (Running, Verifying),
            (Verifying, Packaging),
            (Packaging, Succeeded),
        ] {
            assert!(JobStatus::can_transition(from, to), "{from} -> {to}");
        }
    }

    #[test]
    fn any_non_aborted_state_can_fail_or_abort() {
        use JobStatus::*;
        for from in [Created, Queued, Running, WaitingApproval, Verifying, Packaging] {
            assert!(JobStatus::can_transition(from, Failed));
            assert!(JobStatus::can_transition(from, Aborted));
        }
        assert!(JobStatus::can_transition(Failed, Aborted));
    }

    #[test]
    fn skipping_stages_is_illegal() {
        use JobStatus::*;
        assert!(!JobStatus::can_transition(Created, Running));
        assert!(!JobStatus::can_transition(Queued, Verifying));
        assert!(!JobStatus::can_transition(Running, Packaging));
        assert!(!JobStatus::can_transition(Verifying, Succeeded));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::WaitingApproval).unwrap(),
            "\"waiting_approval\""
        );
        let parsed: JobStatus = serde_json::from_str("\"aborted\"").unwrap();
        assert_eq!(parsed, JobStatus::Aborted);
    }

    #[test]
    fn model_ref_uses_wire_field_names() {
        let model = ModelRef {
            provider_id: "anthropic".to_string(),
            model_id: "claude".to_string(),
        };
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["providerID"], "anthropic");
        assert_eq!(json["modelID"], "claude");
    }
}
