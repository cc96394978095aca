use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RalphError {
    #[error("{0}")]
    Input(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    IllegalTransition(String),

    #[error("unknown agent: {0}")]
    AgentNotFound(String),

    #[error("not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("failed to create worktree: {0}")]
    WorktreeFailed(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("subprocess failed: {0}")]
    Subprocess(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RalphError {
    /// HTTP status the error surfaces as at the API boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RalphError::Input(_) | RalphError::AgentNotFound(_) | RalphError::NotARepository(_) => {
                StatusCode::BAD_REQUEST
            }
            RalphError::NotFound(_) => StatusCode::NOT_FOUND,
            RalphError::IllegalTransition(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RalphError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, RalphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RalphError::Input("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RalphError::NotFound("thread x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RalphError::IllegalTransition("cannot pause a running run".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            RalphError::Subprocess("git diff".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_agent_not_found_is_client_error() {
        assert_eq!(
            RalphError::AgentNotFound("gemini".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
