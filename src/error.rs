use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::matcher::{MIN_PARTICIPANTS, MatchError};
use crate::utils::{error_codes, error_to_api_response};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("names already drawn")]
    AlreadyDrawn,

    #[error("need at least {0} participants to draw")]
    NotEnoughParticipants(usize),

    #[error("cannot find a valid assignment with the current exclusions, try removing some")]
    NoFeasibleAssignment,

    #[error("you are not a member of this group")]
    NotAMember,

    #[error("draw has not been performed yet")]
    DrawNotPerformed,

    #[error("too many requests, retry in {0} seconds")]
    RateLimited(u64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, i32) {
        match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, error_codes::AUTH_FAILED),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, error_codes::PERMISSION_DENIED),
            AppError::NotAMember => (StatusCode::FORBIDDEN, error_codes::NOT_A_MEMBER),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR),
            AppError::Conflict(_) => (StatusCode::CONFLICT, error_codes::CONFLICT),
            AppError::AlreadyDrawn => (StatusCode::CONFLICT, error_codes::ALREADY_DRAWN),
            AppError::NotEnoughParticipants(_) => (
                StatusCode::BAD_REQUEST,
                error_codes::NOT_ENOUGH_PARTICIPANTS,
            ),
            AppError::NoFeasibleAssignment => (
                StatusCode::UNPROCESSABLE_ENTITY,
                error_codes::NO_FEASIBLE_ASSIGNMENT,
            ),
            AppError::DrawNotPerformed => {
                (StatusCode::BAD_REQUEST, error_codes::DRAW_NOT_PERFORMED)
            }
            AppError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, error_codes::RATE_LIMIT),
            AppError::Database(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error_codes::INTERNAL_ERROR)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // 内部错误只记日志，不把细节返回给客户端
        let msg = if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, error_to_api_response::<()>(code, msg)).into_response()
    }
}

impl From<MatchError> for AppError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::NotEnoughParticipants(_) => AppError::NotEnoughParticipants(MIN_PARTICIPANTS),
            MatchError::NoFeasibleAssignment { .. } => AppError::NoFeasibleAssignment,
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<CryptoError> for AppError {
    fn from(err: CryptoError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("password hashing failed: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AppError::Internal(format!("token generation failed: {}", err))
    }
}
