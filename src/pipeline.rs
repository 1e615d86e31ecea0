//! Ingestion and retrieval orchestration.
//!
//! ```text
//! ingest:   classify ─┬─ vector ──────────────────────────────▶ store.put(svg)
//!                     └─ raster ─▶ decode ─▶ encode_master ───▶ store.put(master)
//!
//! retrieve: store.load ─┬─ svg ────────────────────────────────▶ markup as-is
//!                       └─ raster ─▶ transform ─▶ delivery bytes
//! ```
//!
//! Everything after classification runs as a single job on the
//! [`ImagingContext`] pool, so a request holds at most one worker. The
//! encoded master is complete in memory before the store is touched, and the
//! store writes atomically, so a failed ingestion leaves no file behind.

use crate::classify::{MediaClass, classify};
use crate::error::ServiceError;
use crate::identifier::AssetId;
use crate::imaging::{
    Delivered, DeliverySettings, ImagingContext, MasterSettings, TransformRequest, decode_upload,
    encode_master, transform,
};
use crate::store::{AssetStore, StoredFormat};
use crate::validate::ValidationError;
use std::sync::Arc;

/// An upload as received: declared media type plus payload.
#[derive(Debug, Clone)]
pub struct Upload {
    pub declared_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stored {
    pub id: AssetId,
    pub format: StoredFormat,
}

pub struct Pipeline {
    ctx: Arc<ImagingContext>,
    store: AssetStore,
    master: MasterSettings,
    delivery: DeliverySettings,
}

impl Pipeline {
    pub fn new(
        ctx: Arc<ImagingContext>,
        store: AssetStore,
        master: MasterSettings,
        delivery: DeliverySettings,
    ) -> Self {
        Self {
            ctx,
            store,
            master,
            delivery,
        }
    }

    pub fn context(&self) -> &ImagingContext {
        &self.ctx
    }

    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    /// Store an upload and return its new identifier.
    #[tracing::instrument(
        skip_all,
        fields(declared = ?upload.declared_type, bytes = upload.bytes.len(), id)
    )]
    pub async fn ingest(&self, upload: Upload) -> Result<Stored, ServiceError> {
        let class = classify(upload.declared_type.as_deref());
        if class == MediaClass::Rejected {
            return Err(ServiceError::UnsupportedMedia(upload.declared_type));
        }
        if upload.bytes.is_empty() {
            return Err(invalid_image("upload is empty"));
        }

        let id = AssetId::allocate();
        tracing::Span::current().record("id", tracing::field::display(id));

        let store = self.store.clone();
        let settings = self.master;
        let bytes = upload.bytes;
        let format = self
            .ctx
            .run(move |limits| -> Result<StoredFormat, ServiceError> {
                if class == MediaClass::Vector {
                    check_svg(&bytes)?;
                    store.put(&id, StoredFormat::Svg, &bytes)?;
                    return Ok(StoredFormat::Svg);
                }
                let decoded = decode_upload(&bytes, limits).map_err(ServiceError::ingestion)?;
                let master =
                    encode_master(&bytes, decoded, &settings).map_err(ServiceError::ingestion)?;
                store.put(&id, master.format, &master.bytes)?;
                Ok(master.format)
            })
            .await
            .map_err(ServiceError::ingestion)??;

        tracing::info!(%id, format = format.extension(), "image stored");
        Ok(Stored { id, format })
    }

    /// Render asset `id` at the requested size.
    ///
    /// Vector assets are returned as stored; the requested size is not
    /// applied and is echoed back in [`Delivered`].
    #[tracing::instrument(skip_all, fields(%id, ?request))]
    pub async fn retrieve(
        &self,
        id: AssetId,
        request: TransformRequest,
    ) -> Result<Delivered, ServiceError> {
        let store = self.store.clone();
        let delivery = self.delivery;
        let delivered = self
            .ctx
            .run(move |limits| -> Result<Delivered, ServiceError> {
                let (format, bytes) = store.load(&id)?;
                if format.is_vector() {
                    return Ok(Delivered {
                        bytes,
                        media_type: format.media_type(),
                        width: request.width.unwrap_or(0),
                        height: request.height.unwrap_or(0),
                    });
                }
                transform(&bytes, format, request, &delivery, limits)
                    .map_err(|e| ServiceError::retrieval(id, e))
            })
            .await
            .map_err(|e| ServiceError::retrieval(id, e))??;

        tracing::info!(
            media_type = delivered.media_type,
            width = delivered.width,
            height = delivered.height,
            bytes = delivered.bytes.len(),
            "image delivered"
        );
        Ok(delivered)
    }
}

fn invalid_image(reason: &str) -> ServiceError {
    ValidationError::invalid("image", reason).into()
}

/// Vector uploads are stored verbatim, but must at least be SVG markup.
fn check_svg(bytes: &[u8]) -> Result<(), ServiceError> {
    let text = std::str::from_utf8(bytes).map_err(|_| invalid_image("SVG is not valid UTF-8"))?;
    if text.contains("<svg") {
        Ok(())
    } else {
        Err(invalid_image("no <svg> element found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::{Quality, Speed};
    use crate::test_helpers::{animated_gif_bytes, jpeg_bytes, png16_bytes, test_context};
    use image::GenericImageView;
    use tempfile::TempDir;

    const SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"><rect width="10" height="10"/></svg>"#;

    fn pipeline() -> (TempDir, Pipeline) {
        let tmp = TempDir::new().unwrap();
        let store = AssetStore::open(tmp.path().join("images")).unwrap();
        let master = MasterSettings {
            quality: Quality::new(90),
            speed: Speed::new(10),
        };
        let pipeline = Pipeline::new(
            Arc::new(test_context()),
            store,
            master,
            DeliverySettings::default(),
        );
        (tmp, pipeline)
    }

    fn upload(declared: &str, bytes: Vec<u8>) -> Upload {
        Upload {
            declared_type: Some(declared.to_string()),
            bytes,
        }
    }

    fn stored_files(p: &Pipeline) -> usize {
        std::fs::read_dir(p.store().root()).unwrap().count()
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    #[tokio::test]
    async fn jpeg_is_stored_as_avif() {
        let (_tmp, p) = pipeline();
        let stored = p.ingest(upload("image/jpeg", jpeg_bytes(64, 48))).await.unwrap();
        assert_eq!(stored.format, StoredFormat::Avif);
        assert!(p.store().path_for(&stored.id, StoredFormat::Avif).is_file());
    }

    #[tokio::test]
    async fn declared_type_does_not_pick_decoder() {
        // Declared PNG, actually JPEG: sniffed format wins.
        let (_tmp, p) = pipeline();
        let stored = p.ingest(upload("image/png", jpeg_bytes(8, 8))).await.unwrap();
        assert_eq!(stored.format, StoredFormat::Avif);
    }

    #[tokio::test]
    async fn sixteen_bit_is_stored_as_png() {
        let (_tmp, p) = pipeline();
        let stored = p.ingest(upload("image/png", png16_bytes(8, 8))).await.unwrap();
        assert_eq!(stored.format, StoredFormat::Png);
    }

    #[tokio::test]
    async fn animated_gif_keeps_container() {
        let (_tmp, p) = pipeline();
        let bytes = animated_gif_bytes(20, 20, 2);
        let stored = p.ingest(upload("image/gif", bytes.clone())).await.unwrap();
        assert_eq!(stored.format, StoredFormat::Gif);
        assert_eq!(p.store().get(&stored.id, StoredFormat::Gif).unwrap(), bytes);
    }

    #[tokio::test]
    async fn svg_is_stored_verbatim() {
        let (_tmp, p) = pipeline();
        let stored = p
            .ingest(upload("image/svg+xml", SVG.as_bytes().to_vec()))
            .await
            .unwrap();
        assert_eq!(stored.format, StoredFormat::Svg);
        assert_eq!(p.store().get(&stored.id, StoredFormat::Svg).unwrap(), SVG.as_bytes());
    }

    #[tokio::test]
    async fn non_image_is_rejected_without_writing() {
        let (_tmp, p) = pipeline();
        let err = p.ingest(upload("text/plain", b"hello".to_vec())).await.unwrap_err();
        assert_eq!(err.category(), "unsupported_media");
        assert_eq!(stored_files(&p), 0);
    }

    #[tokio::test]
    async fn missing_content_type_is_rejected() {
        let (_tmp, p) = pipeline();
        let err = p
            .ingest(Upload {
                declared_type: None,
                bytes: jpeg_bytes(4, 4),
            })
            .await
            .unwrap_err();
        assert_eq!(err.category(), "unsupported_media");
    }

    #[tokio::test]
    async fn empty_upload_is_invalid() {
        let (_tmp, p) = pipeline();
        let err = p.ingest(upload("image/png", Vec::new())).await.unwrap_err();
        assert_eq!(err.category(), "invalid_image");
    }

    #[tokio::test]
    async fn undecodable_upload_leaves_nothing() {
        let (_tmp, p) = pipeline();
        let err = p
            .ingest(upload("image/png", b"\x89PNG but not really".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "decode_failed");
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(stored_files(&p), 0);
    }

    #[tokio::test]
    async fn non_svg_markup_is_invalid() {
        let (_tmp, p) = pipeline();
        let err = p
            .ingest(upload("image/svg+xml", b"<html></html>".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "invalid_image");
        assert_eq!(stored_files(&p), 0);
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    #[tokio::test]
    async fn roundtrip_delivers_exact_size() {
        let (_tmp, p) = pipeline();
        let stored = p.ingest(upload("image/jpeg", jpeg_bytes(300, 200))).await.unwrap();
        let d = p
            .retrieve(stored.id, TransformRequest::exact(100, 100))
            .await
            .unwrap();
        assert_eq!(d.media_type, "image/webp");
        let img = image::load_from_memory(&d.bytes).unwrap();
        assert_eq!(img.dimensions(), (100, 100));
    }

    #[tokio::test]
    async fn retrieval_is_repeatable() {
        let (_tmp, p) = pipeline();
        let stored = p.ingest(upload("image/jpeg", jpeg_bytes(90, 60))).await.unwrap();
        let a = p.retrieve(stored.id, TransformRequest::exact(30, 40)).await.unwrap();
        let b = p.retrieve(stored.id, TransformRequest::exact(30, 40)).await.unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[tokio::test]
    async fn svg_is_returned_as_markup() {
        let (_tmp, p) = pipeline();
        let stored = p
            .ingest(upload("image/svg+xml", SVG.as_bytes().to_vec()))
            .await
            .unwrap();
        let d = p
            .retrieve(stored.id, TransformRequest::exact(500, 500))
            .await
            .unwrap();
        assert_eq!(d.media_type, "image/svg+xml");
        assert_eq!(d.bytes, SVG.as_bytes());
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let (_tmp, p) = pipeline();
        let err = p
            .retrieve(AssetId::allocate(), TransformRequest::exact(10, 10))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "not_found");
    }

    #[tokio::test]
    async fn corrupt_master_is_server_error() {
        let (_tmp, p) = pipeline();
        let id = AssetId::allocate();
        p.store().put(&id, StoredFormat::Avif, b"definitely not avif").unwrap();
        let err = p
            .retrieve(id, TransformRequest::exact(10, 10))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "corrupt_asset");
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn shut_down_context_is_unavailable() {
        let (_tmp, p) = pipeline();
        p.context().shutdown();
        let err = p
            .ingest(upload("image/jpeg", jpeg_bytes(4, 4)))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "unavailable");
        assert_eq!(stored_files(&p), 0);
    }
}
