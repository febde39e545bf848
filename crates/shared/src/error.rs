use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("user is not authenticated to perform this action.")]
    Authentication {
        msg: String,
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("user is not authorized to perform this action.")]
    Authorization {
        msg: String,
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("could not find resource")]
    NotFound {
        msg: String,
        lookup_id: String,
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("resource already exists")]
    AlreadyExists { msg: String },
    #[error("invalid request")]
    InvalidRequest {
        msg: String,
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("validation failed")]
    Validation { msg: String },
    #[error("repository error")]
    Repository {
        msg: String,
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("unknown error")]
    Unknown(
        #[from]
        anyhow::Error,
    ),
    #[error("io error")]
    IoError {
        #[from]
        #[source]
        source: std::io::Error,
    },
    #[error("url parse error")]
    UrlParseError {
        #[from]
        #[source]
        source: url::ParseError,
    },
    #[error("serde json error")]
    SerdeSerializationError {
        #[from]
        #[source]
        source: serde_json::Error,
    },
    #[error("reqwest error")]
    ReqwestError {
        #[from]
        #[source]
        source: reqwest::Error,
    },
    #[error("address parse error")]
    AddrParseError {
        #[from]
        #[source]
        source: std::net::AddrParseError,
    },
}

impl CommonError {
    /// The message intended for the caller, without any internal error chain.
    pub fn public_message(&self) -> String {
        match self {
            CommonError::Authentication { msg, .. }
            | CommonError::Authorization { msg, .. }
            | CommonError::NotFound { msg, .. }
            | CommonError::AlreadyExists { msg }
            | CommonError::InvalidRequest { msg, .. }
            | CommonError::Validation { msg }
            | CommonError::Repository { msg, .. } => msg.clone(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for CommonError {
    fn into_response(self) -> Response {
        let status = match self {
            CommonError::Authentication { .. } => StatusCode::UNAUTHORIZED,
            CommonError::Authorization { .. } => StatusCode::FORBIDDEN,
            CommonError::NotFound { .. } => StatusCode::NOT_FOUND,
            CommonError::AlreadyExists { .. } => StatusCode::CONFLICT,
            CommonError::InvalidRequest { .. } | CommonError::Validation { .. } => {
                StatusCode::BAD_REQUEST
            }
            CommonError::Repository { .. }
            | CommonError::Unknown(_)
            | CommonError::IoError { .. }
            | CommonError::UrlParseError { .. }
            | CommonError::SerdeSerializationError { .. }
            | CommonError::ReqwestError { .. }
            | CommonError::AddrParseError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            name: match self {
                CommonError::Authentication { .. } => "Authentication",
                CommonError::Authorization { .. } => "Authorization",
                CommonError::NotFound { .. } => "NotFound",
                CommonError::AlreadyExists { .. } => "AlreadyExists",
                CommonError::InvalidRequest { .. } => "InvalidRequest",
                CommonError::Validation { .. } => "Validation",
                CommonError::Repository { .. } => "Repository",
                _ => "InternalServerError",
            }
            .to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    name: String,
    message: String,
}
