use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use log::error;
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy for the API surface. Variants map one-to-one onto HTTP
/// statuses; upstream and storage failures are logged with their detail and
/// collapse to a generic message so internals never leak to clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("internal server error")]
    Upstream,
}

impl ApiError {
    pub fn validation<S: Into<String>>(msg: S) -> ApiError {
        ApiError::Validation(msg.into())
    }

    pub fn unauthenticated() -> ApiError {
        ApiError::Unauthorized("authentication required".to_owned())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl actix_web::ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status()).json(ErrorBody {
            message: self.to_string(),
        })
    }
}

impl From<sled::Error> for ApiError {
    fn from(err: sled::Error) -> ApiError {
        error!("storage error: {:?}", err);
        ApiError::Upstream
    }
}

impl From<bcrypt::BcryptError> for ApiError {
    fn from(err: bcrypt::BcryptError) -> ApiError {
        error!("bcrypt error: {:?}", err);
        ApiError::Upstream
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> ApiError {
        error!("catalog provider error: {:?}", err);
        ApiError::Upstream
    }
}
