//! Executor failure taxonomy and the stable error codes surfaced to users

use thiserror::Error;

use crate::agent::AgentError;
use crate::ledger::{JobStatus, LedgerError};
use crate::skills::Violation;
use crate::workspace::WorkspaceError;

#[derive(Debug, Error)]
pub enum ExecError {
    /// The job was aborted; preempts every other outcome.
    #[error("job aborted")]
    Aborted,

    #[error("session creation failed: {0}")]
    SessionCreate(AgentError),

    #[error("prompt dispatch failed: {0}")]
    Prompt(AgentError),

    #[error("agent call failed: {0}")]
    Agent(AgentError),

    #[error("permissions pending past the wait ceiling")]
    PermissionTimeout,

    #[error("session did not converge before the soft deadline")]
    SoftTimeout,

    #[error("input file changed after creation: {0}")]
    InputsTampered(String),

    #[error("no outputs were produced")]
    OutputsMissing,

    #[error("output contract violated: {0}")]
    ContractViolated(Violation),

    #[error("skill not registered: {0}")]
    SkillMissing(String),

    #[error("conditional update refused: job is {current}, wanted {wanted}")]
    IllegalState {
        current: JobStatus,
        wanted: JobStatus,
    },

    #[error("store error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),
}

impl ExecError {
    /// Stable identifier recorded in `error_code` and surfaced over the API.
    pub fn code(&self) -> &'static str {
        match self {
            ExecError::Aborted => "job.aborted",
            ExecError::SessionCreate(AgentError::Transport(_)) => "agent.unavailable",
            ExecError::SessionCreate(AgentError::Auth { .. }) => "agent.auth_failed",
            ExecError::SessionCreate(_) => "agent.session.create_failed",
            ExecError::Prompt(AgentError::Auth { .. }) => "agent.auth_failed",
            ExecError::Prompt(_) => "agent.prompt_failed",
            ExecError::Agent(AgentError::Auth { .. }) => "agent.auth_failed",
            ExecError::Agent(_) => "agent.unavailable",
            ExecError::PermissionTimeout => "permission.timeout",
            ExecError::SoftTimeout => "job.timeout",
            ExecError::InputsTampered(_) => "inputs.tampered",
            ExecError::OutputsMissing => "outputs.missing",
            ExecError::ContractViolated(_) => "outputs.contract.violated",
            ExecError::SkillMissing(_) => "input.invalid",
            ExecError::IllegalState { .. } => "state.illegal_transition",
            ExecError::Ledger(_) => "storage.write_failed",
            ExecError::Workspace(WorkspaceError::Bundle(_)) => "bundle.failed",
            ExecError::Workspace(_) => "storage.write_failed",
        }
    }

    /// Only a transport failure while creating the session is retried by the
    /// queue layer.
    pub fn is_retriable_session_create(&self) -> bool {
        matches!(self, ExecError::SessionCreate(err) if err.is_transport())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            ExecError::SessionCreate(AgentError::Transport("refused".into())).code(),
            "agent.unavailable"
        );
        assert_eq!(
            ExecError::SessionCreate(AgentError::Server {
                status: 500,
                body: String::new()
            })
            .code(),
            "agent.session.create_failed"
        );
        assert_eq!(
            ExecError::Prompt(AgentError::BadRequest {
                status: 400,
                body: String::new()
            })
            .code(),
            "agent.prompt_failed"
        );
        assert_eq!(ExecError::PermissionTimeout.code(), "permission.timeout");
        assert_eq!(ExecError::SoftTimeout.code(), "job.timeout");
        assert_eq!(
            ExecError::InputsTampered("inputs/a.csv".into()).code(),
            "inputs.tampered"
        );
        assert_eq!(ExecError::OutputsMissing.code(), "outputs.missing");
        assert_eq!(
            ExecError::ContractViolated(Violation::new("missing report")).code(),
            "outputs.contract.violated"
        );
    }

    #[test]
    fn only_transport_session_create_is_retriable() {
        assert!(
            ExecError::SessionCreate(AgentError::Transport("timeout".into()))
                .is_retriable_session_create()
        );
        assert!(
            !ExecError::SessionCreate(AgentError::Auth {
                status: 401,
                body: String::new()
            })
            .is_retriable_session_create()
        );
        assert!(!ExecError::Agent(AgentError::Transport("x".into())).is_retriable_session_create());
    }
}
