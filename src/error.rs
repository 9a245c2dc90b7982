use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

pub const INTERNAL_MESSAGE: &str = "An internal server error occurred";

/// Envelope shared by every endpoint: `{success, data?, message?}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: None,
        })
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        })
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            data: None,
            message: Some(message.into()),
        })
    }

    fn failure(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            message: Some(message.into()),
        })
    }
}

/// Why a lookup came back empty. Both render identically so that
/// non-owners cannot tell a foreign record from a missing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Recipe,
    Category,
    GalleryImage,
}

impl Missing {
    fn message(self) -> &'static str {
        match self {
            Missing::Recipe => "Recipe not found or access denied",
            Missing::Category => "Category not found or permission denied",
            Missing::GalleryImage => "Image not found in gallery",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{}", .0.message())]
    NotFound(Missing),
    #[error("{0}")]
    Validation(String),
    #[error("Invalid action provided")]
    InvalidAction(String),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("Recipe was modified concurrently; reload and retry")]
    Conflict,
    #[error("storage gateway: {0:#}")]
    Storage(anyhow::Error),
    #[error("internal: {0:#}")]
    Internal(anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::InvalidAction(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict => StatusCode::CONFLICT,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Storage(_) | AppError::Internal(_) => {
                error!(error = %self, "request failed");
                INTERNAL_MESSAGE.to_string()
            }
            other => other.to_string(),
        };
        (status, ApiResponse::failure(message)).into_response()
    }
}
