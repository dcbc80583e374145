use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::orchestrator::OrchestratorError;
use crate::workspace::WorkspaceError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    InvalidState(String),

    #[error("job is terminal: {0}")]
    Terminal(String),

    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) | ApiError::Terminal(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidState(_) => StatusCode::CONFLICT,
            ApiError::AgentUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "input.invalid",
            ApiError::NotFound(_) => "not_found",
            ApiError::InvalidState(_) | ApiError::Terminal(_) => "state.illegal_transition",
            ApiError::AgentUnavailable(_) => "agent.unavailable",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(value: OrchestratorError) -> Self {
        match value {
            OrchestratorError::Invalid(msg) => ApiError::InvalidInput(msg),
            OrchestratorError::UnknownSkill(code) => {
                ApiError::InvalidInput(format!("unknown skill: {code}"))
            }
            OrchestratorError::NotFound(id) => ApiError::NotFound(id),
            OrchestratorError::InvalidState { current } => {
                ApiError::InvalidState(format!("current status is {current}"))
            }
            OrchestratorError::Terminal { current } => {
                ApiError::Terminal(format!("current status is {current}"))
            }
            OrchestratorError::AgentUnavailable(msg) => ApiError::AgentUnavailable(msg),
            // Upload validation failures are client errors, not 500s
            OrchestratorError::Workspace(WorkspaceError::EmptyUpload(name)) => {
                ApiError::InvalidInput(format!("empty upload: {name}"))
            }
            OrchestratorError::Workspace(err @ WorkspaceError::UploadTooLarge { .. }) => {
                ApiError::InvalidInput(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}
