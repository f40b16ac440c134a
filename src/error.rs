use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY environment variable not set")]
    MissingApiKey,
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("image is empty")]
    Empty,
    #[error("unrecognized image format")]
    UnknownFormat,
    #[error("unsupported image format: {0}")]
    Unsupported(String),
    #[error("unreadable image: {0}")]
    Unreadable(String),
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),
    #[error("not a base64 data URL")]
    InvalidDataUrl,
}

/// Named step of a flow, used to attribute generation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Suggest,
    BackgroundRemoval,
    PosterGeneration,
    Edit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Suggest => "suggest",
            Stage::BackgroundRemoval => "background-removal",
            Stage::PosterGeneration => "poster-generation",
            Stage::Edit => "edit",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Stage::Suggest => "Failed to generate a concept. Please try again.",
            Stage::BackgroundRemoval => "Failed to remove background. Please try again.",
            Stage::PosterGeneration => "Failed to generate poster. Please try a different concept.",
            Stage::Edit => "Failed to edit poster. Please try a different instruction.",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{stage} failed: {detail}")]
pub struct GenerationError {
    pub stage: Stage,
    pub detail: String,
}

impl GenerationError {
    pub fn new(stage: Stage, detail: impl Into<String>) -> Self {
        Self { stage, detail: detail.into() }
    }
}

/// Everything a flow can end with short of success.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("another request is already in progress")]
    Busy,
    #[error("{0}")]
    InvalidInput(String),
}

impl FlowError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Single message shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            FlowError::Encoding(e) => format!("Could not read the image: {e}."),
            FlowError::Generation(e) => e.stage.user_message().to_string(),
            FlowError::Busy => "Please wait for the current request to finish.".to_string(),
            FlowError::InvalidInput(msg) => msg.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EncodingError> for ApiError {
    fn from(e: EncodingError) -> Self {
        ApiError::Flow(FlowError::Encoding(e))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Flow(FlowError::Encoding(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Flow(FlowError::Generation(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Flow(FlowError::Busy) => StatusCode::CONFLICT,
            ApiError::Flow(FlowError::InvalidInput(_)) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Flow(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.message() }))).into_response()
    }
}
