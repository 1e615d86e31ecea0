//! Request-boundary errors.
//!
//! Module errors ([`ImagingError`], [`StoreError`], [`ValidationError`]) are
//! translated into one [`ServiceError`] at the edge of a request. Each variant
//! has a short category code and an HTTP status, and renders as:
//!
//! ```json
//! {"error": {"category": "missing_uuid", "detail": "missing required field 'uuid'"}}
//! ```
//!
//! `detail` never carries file paths or internal causes; those go to the log.

use crate::identifier::AssetId;
use crate::imaging::ImagingError;
use crate::store::StoreError;
use crate::validate::ValidationError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unsupported media type {0:?}")]
    UnsupportedMedia(Option<String>),
    #[error("upload decode failed: {0}")]
    DecodeFailed(String),
    #[error("stored asset {id} is corrupt: {reason}")]
    CorruptAsset { id: AssetId, reason: String },
    #[error("transform failed: {0}")]
    TransformFailed(String),
    #[error("encode failed: {0}")]
    EncodeFailed(String),
    #[error("storage failure: {0}")]
    StoreFailed(#[source] std::io::Error),
    #[error("asset {0} not found")]
    NotFound(AssetId),
    #[error("imaging unavailable: {0}")]
    Unavailable(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("no route for {0}")]
    UnknownRoute(String),
    #[error("{method} not allowed on {path}")]
    MethodNotAllowed { method: String, path: String },
}

impl ServiceError {
    /// Imaging failure while ingesting an upload: undecodable input is the
    /// caller's fault.
    pub fn ingestion(err: ImagingError) -> Self {
        match err {
            ImagingError::Decode(reason) => ServiceError::DecodeFailed(reason),
            other => Self::common(other),
        }
    }

    /// Imaging failure while serving `id`: an undecodable master is ours.
    pub fn retrieval(id: AssetId, err: ImagingError) -> Self {
        match err {
            ImagingError::Decode(reason) => ServiceError::CorruptAsset { id, reason },
            other => Self::common(other),
        }
    }

    fn common(err: ImagingError) -> Self {
        match err {
            ImagingError::Decode(reason) => ServiceError::DecodeFailed(reason),
            ImagingError::Transform(reason) => ServiceError::TransformFailed(reason),
            ImagingError::Encode(reason) => ServiceError::EncodeFailed(reason),
            ImagingError::Unavailable(reason) => ServiceError::Unavailable(reason),
        }
    }

    pub fn category(&self) -> String {
        match self {
            ServiceError::Validation(ValidationError::Missing(field)) => format!("missing_{field}"),
            ServiceError::Validation(ValidationError::Invalid { field, .. }) => {
                format!("invalid_{field}")
            }
            ServiceError::UnsupportedMedia(_) => "unsupported_media".into(),
            ServiceError::DecodeFailed(_) => "decode_failed".into(),
            ServiceError::CorruptAsset { .. } => "corrupt_asset".into(),
            ServiceError::TransformFailed(_) => "transform_failed".into(),
            ServiceError::EncodeFailed(_) => "encode_failed".into(),
            ServiceError::StoreFailed(_) => "store_failed".into(),
            ServiceError::NotFound(_) | ServiceError::UnknownRoute(_) => "not_found".into(),
            ServiceError::Unavailable(_) => "unavailable".into(),
            ServiceError::InvalidQuery(_) => "invalid_query".into(),
            ServiceError::MethodNotAllowed { .. } => "method_not_allowed".into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_)
            | ServiceError::UnsupportedMedia(_)
            | ServiceError::DecodeFailed(_)
            | ServiceError::TransformFailed(_)
            | ServiceError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) | ServiceError::UnknownRoute(_) => StatusCode::NOT_FOUND,
            ServiceError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ServiceError::CorruptAsset { .. }
            | ServiceError::EncodeFailed(_)
            | ServiceError::StoreFailed(_)
            | ServiceError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message.
    pub fn detail(&self) -> String {
        match self {
            ServiceError::Validation(e) => e.to_string(),
            ServiceError::UnsupportedMedia(Some(declared)) => {
                format!("declared type '{declared}' is not an image")
            }
            ServiceError::UnsupportedMedia(None) => "upload declares no content type".into(),
            ServiceError::DecodeFailed(reason) => format!("image could not be decoded: {reason}"),
            ServiceError::CorruptAsset { .. } => "stored image could not be decoded".into(),
            ServiceError::TransformFailed(reason) => reason.clone(),
            ServiceError::EncodeFailed(_) => "output encoding failed".into(),
            ServiceError::StoreFailed(_) => "storage failure".into(),
            ServiceError::NotFound(id) => format!("no image with id {id}"),
            ServiceError::Unavailable(_) => "image processing is unavailable".into(),
            ServiceError::InvalidQuery(reason) => reason.clone(),
            ServiceError::UnknownRoute(path) => format!("no route for {path}"),
            ServiceError::MethodNotAllowed { method, path } => {
                format!("{method} is not allowed on {path}")
            }
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                category: self.category(),
                detail: self.detail(),
            },
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            StoreError::Io(e) => ServiceError::StoreFailed(e),
        }
    }
}

/// Wire form of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub category: String,
    pub detail: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let category = self.category();
        if status.is_server_error() {
            tracing::error!(%category, error = %self, "request failed");
        } else {
            tracing::warn!(%category, error = %self, "request rejected");
        }
        (status, Json(self.envelope())).into_response()
    }
}
