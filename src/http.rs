//! HTTP surface.
//!
//! ## Routes
//!
//! - `GET /`: upload form posting to `/save`.
//! - `POST /save`: multipart field `image`. Returns `{"uuid": ..., "message": "Success"}`.
//! - `GET /get?uuid=&width=&height=`: the stored image at exactly `width × height`,
//!   with `Content-Type` set to the delivery format.
//!
//! Every failure, including extractor rejections, unknown paths and wrong
//! methods on known paths, renders as the JSON envelope from
//! [`crate::error`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{Method, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use maud::{DOCTYPE, Markup, html};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::imaging::TransformRequest;
use crate::pipeline::{Pipeline, Upload};
use crate::validate::{self, ValidationError};

/// Multipart field carrying the upload.
pub const IMAGE_FIELD: &str = "image";

/// Body of a successful `POST /save`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResponse {
    pub uuid: String,
    pub message: String,
}

/// Build the service router. Request bodies are capped at `max_upload_bytes`.
pub fn router(pipeline: Arc<Pipeline>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(form_handler).fallback(method_not_allowed))
        .route("/save", post(save_handler).fallback(method_not_allowed))
        .route("/get", get(get_handler).fallback(method_not_allowed))
        .fallback(fallback_handler)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(pipeline)
}

async fn form_handler() -> Html<String> {
    Html(upload_form().into_string())
}

async fn save_handler(
    State(pipeline): State<Arc<Pipeline>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SaveResponse>, ServiceError> {
    let mut multipart = multipart.map_err(|e| invalid_image(e.body_text()))?;
    let upload = read_image_field(&mut multipart).await?;
    let stored = pipeline.ingest(upload).await?;
    Ok(Json(SaveResponse {
        uuid: stored.id.to_string(),
        message: "Success".to_string(),
    }))
}

/// First `image` field of the form. Other fields are skipped.
async fn read_image_field(multipart: &mut Multipart) -> Result<Upload, ServiceError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| invalid_image(e.body_text()))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let declared_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| invalid_image(e.body_text()))?;
        return Ok(Upload {
            declared_type,
            bytes: bytes.to_vec(),
        });
    }
    Err(ValidationError::Missing(IMAGE_FIELD).into())
}

async fn get_handler(
    State(pipeline): State<Arc<Pipeline>>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Result<Response, ServiceError> {
    let Query(query) = query.map_err(|e| ServiceError::InvalidQuery(e.body_text()))?;
    let params = validate::retrieval_params(&query)?;
    let delivered = pipeline
        .retrieve(params.id, TransformRequest::exact(params.width, params.height))
        .await?;
    Ok(([(header::CONTENT_TYPE, delivered.media_type)], delivered.bytes).into_response())
}

async fn fallback_handler(uri: Uri) -> ServiceError {
    ServiceError::UnknownRoute(uri.path().to_string())
}

/// Known path, unsupported method.
async fn method_not_allowed(method: Method, uri: Uri) -> ServiceError {
    ServiceError::MethodNotAllowed {
        method: method.to_string(),
        path: uri.path().to_string(),
    }
}

fn invalid_image(reason: String) -> ServiceError {
    ValidationError::invalid(IMAGE_FIELD, reason).into()
}

fn upload_form() -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { "Upload image" }
            }
            body {
                h1 { "Upload image" }
                form action="/save" method="post" enctype="multipart/form-data" {
                    input type="file" name=(IMAGE_FIELD) accept="image/*" required;
                    button type="submit" { "Upload" }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_form_posts_multipart_to_save() {
        let page = upload_form().into_string();
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains(r#"action="/save""#));
        assert!(page.contains(r#"enctype="multipart/form-data""#));
        assert!(page.contains(r#"name="image""#));
    }

    #[test]
    fn save_response_shape() {
        let body = SaveResponse {
            uuid: "67e55044-10b1-426f-9247-bb680e5fe0c8".into(),
            message: "Success".into(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["message"], "Success");
        assert_eq!(json["uuid"], "67e55044-10b1-426f-9247-bb680e5fe0c8");
    }

    #[test]
    fn invalid_image_category() {
        assert_eq!(invalid_image("truncated".into()).category(), "invalid_image");
    }
}
