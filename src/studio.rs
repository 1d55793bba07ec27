use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Result, StudioError};
use crate::gallery::{GalleryLoad, GalleryStore};
use crate::generation::{GenerationClient, GenerationParams};
use crate::image_processing;
use crate::session::{LatestImage, SessionState};

#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub elapsed_seconds: f64,
    pub upload_filename: String,
    pub images: Vec<LatestImage>,
}

/// Glue between the upload form, the generation client and the two image
/// directories.
pub struct Studio {
    uploads: GalleryStore,
    outputs: GalleryStore,
    client: GenerationClient,
    session: Mutex<SessionState>,
}

impl Studio {
    pub fn new(uploads: GalleryStore, outputs: GalleryStore, client: GenerationClient) -> Self {
        Self {
            uploads,
            outputs,
            client,
            session: Mutex::new(SessionState::default()),
        }
    }

    pub fn uploads(&self) -> &GalleryStore {
        &self.uploads
    }

    pub fn outputs(&self) -> &GalleryStore {
        &self.outputs
    }

    /// Saves the upload, runs one generation against it and stores every
    /// result with the upload's original name as provenance. On success the
    /// session's latest list is replaced; on failure it is left alone.
    pub async fn generate_from_upload(
        &self,
        upload: &[u8],
        original_name: &str,
        params: &GenerationParams,
    ) -> Result<GenerationOutcome> {
        params.validate()?;
        if upload.is_empty() {
            return Err(StudioError::validation("upload a main face image first"));
        }
        let format = image_processing::detect_format_name(upload)
            .ok_or_else(|| StudioError::validation("upload must be a png, jpeg or webp image"))?;
        let face = image_processing::decode_image(upload)
            .map_err(|err| StudioError::validation(format!("upload is not a readable image: {err}")))?;

        let upload_filename = self.uploads.save(&face, format, None).await?;
        let source_name = match original_name.trim() {
            "" => upload_filename.as_str(),
            name => name,
        };
        info!(%upload_filename, source = source_name, "stored upload");

        let source_path = self.uploads.resolve_path(&upload_filename);
        let result = self
            .client
            .generate(params, &source_path)
            .await
            .inspect_err(|err| warn!(error = %err, "generation failed"))?;

        let format = params.output_format;
        let mut images = Vec::with_capacity(result.images.len());
        for image in &result.images {
            let filename = self
                .outputs
                .save(image, format.as_str(), Some(source_name))
                .await?;
            images.push(LatestImage {
                url: self.outputs.get_public_url(&filename),
                filename,
                format,
            });
        }

        let elapsed_seconds = result.elapsed_seconds();
        self.session
            .lock()
            .await
            .replace(images.clone(), elapsed_seconds);
        info!(
            count = images.len(),
            elapsed_seconds,
            "Image generated in {elapsed_seconds:.2} seconds"
        );
        Ok(GenerationOutcome {
            elapsed_seconds,
            upload_filename,
            images,
        })
    }

    pub async fn reset(&self) {
        self.session.lock().await.reset();
        info!("session reset");
    }

    pub async fn session(&self) -> SessionState {
        self.session.lock().await.clone()
    }

    pub async fn gallery(&self) -> Result<GalleryLoad> {
        self.outputs.load_all().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::Router;
    use axum::routing::get;

    use super::*;
    use crate::gallery::AspectRatioBucket;
    use crate::generation::{InferenceService, JobSpec, OutputFormat};
    use crate::test_support::{png_bytes, spawn_server};

    struct StaticService {
        urls: std::sync::Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceService for StaticService {
        async fn submit(&self, _job: &JobSpec) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.urls.lock().unwrap().clone())
        }
    }

    async fn studio(dir: &std::path::Path, urls: Vec<String>) -> (Studio, Arc<StaticService>) {
        let service = Arc::new(StaticService {
            urls: std::sync::Mutex::new(urls),
            calls: AtomicUsize::new(0),
        });
        let studio = Studio::new(
            GalleryStore::new(dir.join("uploaded_images"), "/uploaded"),
            GalleryStore::new(dir.join("generated_images"), "/generated"),
            GenerationClient::new(service.clone()),
        );
        (studio, service)
    }

    async fn host() -> String {
        spawn_server(Router::new().route("/out.png", get(|| async { png_bytes(36, 64) }))).await
    }

    #[tokio::test]
    async fn generation_persists_upload_outputs_and_session() {
        let temp = tempfile::tempdir().unwrap();
        let host = host().await;
        let (studio, service) =
            studio(temp.path(), vec![format!("{host}/out.png"), format!("{host}/out.png")]).await;

        let params = GenerationParams {
            prompt: "a pirate".to_string(),
            num_outputs: 2,
            output_format: OutputFormat::Webp,
            ..GenerationParams::default()
        };
        let outcome = studio
            .generate_from_upload(&png_bytes(16, 16), "me.png", &params)
            .await
            .unwrap();

        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert!(outcome.upload_filename.ends_with(".png"));
        assert!(temp.path().join("uploaded_images").join(&outcome.upload_filename).exists());
        assert_eq!(outcome.images.len(), 2);
        for image in &outcome.images {
            assert!(image.filename.ends_with(".webp"));
            assert_eq!(image.url, format!("/generated/{}", image.filename));
        }

        let session = studio.session().await;
        assert_eq!(session.latest, outcome.images);

        let gallery = studio.gallery().await.unwrap();
        assert_eq!(gallery.gallery[&AspectRatioBucket::Vertical]["me.png"].len(), 2);
    }

    #[tokio::test]
    async fn reset_keeps_files() {
        let temp = tempfile::tempdir().unwrap();
        let host = host().await;
        let (studio, _) = studio(temp.path(), vec![format!("{host}/out.png")]).await;
        studio
            .generate_from_upload(&png_bytes(8, 8), "face.jpg", &GenerationParams::default())
            .await
            .unwrap();

        studio.reset().await;
        assert!(studio.session().await.is_empty());
        assert_eq!(studio.gallery().await.unwrap().image_count(), 1);
    }

    #[tokio::test]
    async fn bad_input_touches_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let (studio, service) = studio(temp.path(), Vec::new()).await;

        let params = GenerationParams {
            num_outputs: 0,
            ..GenerationParams::default()
        };
        let err = studio
            .generate_from_upload(&png_bytes(8, 8), "face.png", &params)
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::Validation(_)));

        let err = studio
            .generate_from_upload(b"plain text", "face.png", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::Validation(_)));

        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
        assert!(!temp.path().join("uploaded_images").exists());
    }

    #[tokio::test]
    async fn failed_generation_leaves_session_untouched() {
        let temp = tempfile::tempdir().unwrap();
        let host = host().await;
        let (studio, service) = studio(temp.path(), vec![format!("{host}/out.png")]).await;
        studio
            .generate_from_upload(&png_bytes(8, 8), "face.png", &GenerationParams::default())
            .await
            .unwrap();
        let before = studio.session().await.latest;

        *service.urls.lock().unwrap() = vec![format!("{host}/out.png"), format!("{host}/missing.png")];
        let err = studio
            .generate_from_upload(&png_bytes(8, 8), "face.png", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::Generation(_)));
        assert_eq!(studio.session().await.latest, before);
        assert_eq!(studio.gallery().await.unwrap().image_count(), 1);
    }
}
