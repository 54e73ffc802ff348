//! Error taxonomy for every feed operation and its HTTP mapping.
//!
//! Operations return `Result<T, FeedError>`; handlers return the same type and
//! axum turns it into a JSON body via `IntoResponse`.

use axum::{
    Json,
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::classifier::ClassifierError;
use crate::media::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Username or email already belongs to another account.
    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(String),

    #[error("Invalid email or password")]
    InvalidCredential,

    /// No valid session where one is required.
    #[error("Login required")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {} errors", .0.len())]
    Validation(Vec<FieldError>),

    #[error("Classifier failure: {0}")]
    ClassifierFailure(#[from] ClassifierError),

    #[error("Storage failure: {0}")]
    StorageFailure(#[from] StorageError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FeedError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        FeedError::Validation(vec![FieldError {
            field: field.to_string(),
            message: message.into(),
        }])
    }

    /// Map a failed user insert/update: a UNIQUE race becomes
    /// `DuplicateIdentity`, anything else stays internal.
    pub fn from_identity_write(err: anyhow::Error) -> Self {
        if medfeed_db::is_unique_violation(&err) {
            FeedError::DuplicateIdentity("Username or email already in use".to_string())
        } else {
            FeedError::Internal(err)
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            FeedError::DuplicateIdentity(_) => StatusCode::CONFLICT,
            FeedError::InvalidCredential | FeedError::Unauthenticated => StatusCode::UNAUTHORIZED,
            FeedError::Forbidden(_) => StatusCode::FORBIDDEN,
            FeedError::NotFound(_) => StatusCode::NOT_FOUND,
            FeedError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            FeedError::ClassifierFailure(_) => StatusCode::BAD_GATEWAY,
            FeedError::StorageFailure(e) if e.is_bad_input() => StatusCode::UNPROCESSABLE_ENTITY,
            FeedError::StorageFailure(_) | FeedError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            FeedError::DuplicateIdentity(_) => "duplicate_identity",
            FeedError::InvalidCredential => "invalid_credential",
            FeedError::Unauthenticated => "unauthenticated",
            FeedError::Forbidden(_) => "forbidden",
            FeedError::NotFound(_) => "not_found",
            FeedError::Validation(_) => "validation_error",
            FeedError::ClassifierFailure(_) => "classifier_failure",
            FeedError::StorageFailure(_) => "storage_failure",
            FeedError::Internal(_) => "internal_error",
        }
    }
}

impl From<validator::ValidationErrors> for FeedError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut details: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| FieldError {
                    field: field.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field).then_with(|| a.message.cmp(&b.message)));
        FeedError::Validation(details)
    }
}

// Extractor rejections get the same JSON body as every other failure.

impl From<JsonRejection> for FeedError {
    fn from(rejection: JsonRejection) -> Self {
        FeedError::invalid("body", rejection.body_text())
    }
}

impl From<PathRejection> for FeedError {
    fn from(rejection: PathRejection) -> Self {
        FeedError::invalid("path", rejection.body_text())
    }
}

impl From<QueryRejection> for FeedError {
    fn from(rejection: QueryRejection) -> Self {
        FeedError::invalid("query", rejection.body_text())
    }
}

impl From<MultipartRejection> for FeedError {
    fn from(rejection: MultipartRejection) -> Self {
        FeedError::invalid("form", rejection.body_text())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
    /// Where an unauthenticated caller should go next.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
}

impl IntoResponse for FeedError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let (message, details, login) = match self {
            FeedError::Validation(details) => {
                ("Request validation failed".to_string(), Some(details), None)
            }
            FeedError::Unauthenticated => (
                "Please log in to access this page".to_string(),
                None,
                Some("/login".to_string()),
            ),
            FeedError::Internal(err) => {
                // Log internal errors but don't expose details to clients
                error!("Internal error: {:#}", err);
                ("An internal error occurred".to_string(), None, None)
            }
            FeedError::StorageFailure(err) if !err.is_bad_input() => {
                error!("Storage error: {}", err);
                ("Could not store the uploaded image".to_string(), None, None)
            }
            other => (other.to_string(), None, None),
        };

        let body = Json(ErrorResponse {
            error: code.to_string(),
            message,
            details,
            login,
        });

        (status, body).into_response()
    }
}
