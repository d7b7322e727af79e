use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::auth::TokenError;
use crate::credentials::CredentialError;
use crate::gamification::GamificationError;
use crate::images::ImageError;
use crate::models::ValidationError;
use crate::oauth::FederatedLoginError;
use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("unauthorized: {0}")] Unauthorized(String),
    #[error("forbidden")] Forbidden,
    #[error("bad request: {0}")] BadRequest(String),
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("unsupported media type")] UnsupportedMedia,
    #[error("payload too large")] PayloadTooLarge,
    #[error("service unavailable: {0}")] Unavailable(String),
    #[error("upstream dependency failed")] Dependency,
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Conflict => ApiError::Conflict,
            RepoError::Constraint(msg) => {
                tracing::error!(%msg, "constraint violation reached the store");
                ApiError::Internal
            }
            RepoError::Internal(msg) => {
                tracing::error!(%msg, "persistence failure");
                ApiError::Dependency
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Encode(msg) => {
                tracing::error!(%msg, "token signing failed");
                ApiError::Internal
            }
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::WeakInput => ApiError::BadRequest(e.to_string()),
            CredentialError::Hash(msg) => {
                tracing::error!(%msg, "password hashing failed");
                ApiError::Internal
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<ImageError> for ApiError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::UnsupportedFormat(_) => ApiError::UnsupportedMedia,
            ImageError::Encode(msg) => {
                tracing::error!(%msg, "image encoding failed");
                ApiError::Internal
            }
            ImageError::Storage(err) => {
                tracing::error!(%err, "image storage failed");
                ApiError::Dependency
            }
        }
    }
}

impl From<FederatedLoginError> for ApiError {
    fn from(e: FederatedLoginError) -> Self {
        match e {
            FederatedLoginError::Exchange(_) => {
                tracing::warn!(err = %e, "federated login rejected");
                ApiError::Unauthorized(e.to_string())
            }
            FederatedLoginError::ProfileFetch(_) | FederatedLoginError::AccountCreation(_) => {
                tracing::error!(err = %e, "federated login failed");
                ApiError::Dependency
            }
            FederatedLoginError::Token(inner) => inner.into(),
        }
    }
}

impl From<GamificationError> for ApiError {
    fn from(e: GamificationError) -> Self {
        match e {
            GamificationError::InvalidAmount(_) => ApiError::BadRequest(e.to_string()),
            GamificationError::Repo(inner) => inner.into(),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::UnsupportedMedia => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Dependency => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpResponse::build(status).json(ApiErrorBody { error: self.to_string() })
    }
}
