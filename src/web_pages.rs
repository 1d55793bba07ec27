use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use image::GenericImageView;
use serde::Serialize;
use tower_http::services::ServeDir;
use tracing::warn;

use crate::error::StudioError;
use crate::gallery::{GalleryLoad, GalleryStore};
use crate::generation::{GenerationParams, OutputFormat};
use crate::studio::Studio;

const INDEX_HTML: &str = include_str!("../templates/index.html");
const UPLOAD_LIMIT_BYTES: usize = 50 * 1024 * 1024;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Serialize)]
struct GalleryImageView {
    filename: String,
    url: String,
    download_url: String,
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct SourceView {
    source: String,
    images: Vec<GalleryImageView>,
}

#[derive(Serialize)]
struct BucketView {
    aspect_ratio: String,
    sources: Vec<SourceView>,
}

#[derive(Serialize)]
struct FailureView {
    filename: String,
    error: String,
}

#[derive(Serialize)]
struct GalleryResponse {
    buckets: Vec<BucketView>,
    errors: Vec<FailureView>,
}

impl GalleryResponse {
    fn from_load(load: GalleryLoad, store: &GalleryStore) -> Self {
        let buckets = load
            .gallery
            .into_iter()
            .map(|(bucket, sources)| BucketView {
                aspect_ratio: bucket.label().to_string(),
                sources: sources
                    .into_iter()
                    .map(|(source, entries)| SourceView {
                        source,
                        images: entries
                            .into_iter()
                            .map(|entry| {
                                let (width, height) = entry.image.dimensions();
                                GalleryImageView {
                                    url: store.get_public_url(&entry.filename),
                                    download_url: format!("/download/{}", entry.filename),
                                    filename: entry.filename,
                                    width,
                                    height,
                                }
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        let errors = load
            .failures
            .into_iter()
            .map(|failure| FailureView {
                filename: failure.filename,
                error: failure.error,
            })
            .collect();
        Self { buckets, errors }
    }
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse { error: message.to_string() })).into_response()
}

fn status_for(err: &StudioError) -> StatusCode {
    match err {
        StudioError::Validation(_) => StatusCode::BAD_REQUEST,
        StudioError::Generation(_) => StatusCode::BAD_GATEWAY,
        StudioError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn studio_error(err: &StudioError) -> Response {
    json_error(status_for(err), &err.to_string())
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, StudioError> {
    value
        .trim()
        .parse()
        .map_err(|_| StudioError::validation(format!("{name} is not a valid number: {value:?}")))
}

/// Overwrites the defaults in `params` with one form field.
fn apply_field(params: &mut GenerationParams, name: &str, value: &str) -> Result<(), StudioError> {
    let tuning = &mut params.tuning;
    match name {
        "prompt" => params.prompt = value.to_string(),
        "num_outputs" => params.num_outputs = parse_field(name, value)?,
        "output_format" => params.output_format = OutputFormat::parse(value)?,
        "width" => params.width = parse_field(name, value)?,
        "height" => params.height = parse_field(name, value)?,
        "true_cfg" => tuning.true_cfg = parse_field(name, value)?,
        "id_weight" => tuning.id_weight = parse_field(name, value)?,
        "num_steps" => tuning.num_steps = parse_field(name, value)?,
        "start_step" => tuning.start_step = parse_field(name, value)?,
        "guidance_scale" => tuning.guidance_scale = parse_field(name, value)?,
        "negative_prompt" => tuning.negative_prompt = value.to_string(),
        "max_sequence_length" => tuning.max_sequence_length = parse_field(name, value)?,
        "output_quality" => tuning.output_quality = parse_field(name, value)?,
        _ => {}
    }
    Ok(())
}

pub async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn handle_generate(
    State(studio): State<Arc<Studio>>,
    mut multipart: Multipart,
) -> Response {
    let mut params = GenerationParams::default();
    let mut file_name = String::new();
    let mut bytes = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let name = field.name().unwrap_or("").to_string();
                if name == "file" {
                    file_name = field.file_name().unwrap_or("").to_string();
                    match field.bytes().await {
                        Ok(data) => bytes = Some(data),
                        Err(err) => {
                            return json_error(
                                StatusCode::BAD_REQUEST,
                                &format!("failed to read upload: {err}"),
                            );
                        }
                    }
                    continue;
                }
                let value = match field.text().await {
                    Ok(value) => value,
                    Err(err) => {
                        return json_error(
                            StatusCode::BAD_REQUEST,
                            &format!("failed to read field {name}: {err}"),
                        );
                    }
                };
                if let Err(err) = apply_field(&mut params, &name, &value) {
                    return studio_error(&err);
                }
            }
            Ok(None) => break,
            Err(err) => {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    &format!("failed to read form: {err}"),
                );
            }
        }
    }

    let Some(bytes) = bytes else {
        return json_error(StatusCode::BAD_REQUEST, "Please upload a main face image.");
    };
    match studio
        .generate_from_upload(bytes.as_ref(), &file_name, &params)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => {
            warn!(error = %err, "generate request failed");
            json_error(status_for(&err), &format!("Error generating image: {err}"))
        }
    }
}

pub async fn handle_reset(State(studio): State<Arc<Studio>>) -> Response {
    studio.reset().await;
    Json(MessageResponse {
        message: "Page has been reset. Your generated images are still available in the showcase."
            .to_string(),
    })
    .into_response()
}

pub async fn session_state(State(studio): State<Arc<Studio>>) -> Response {
    Json(studio.session().await).into_response()
}

pub async fn gallery_listing(State(studio): State<Arc<Studio>>) -> Response {
    match studio.gallery().await {
        Ok(load) => Json(GalleryResponse::from_load(load, studio.outputs())).into_response(),
        Err(err) => studio_error(&err),
    }
}

pub async fn download_image(
    State(studio): State<Arc<Studio>>,
    Path(filename): Path<String>,
) -> Response {
    match studio.outputs().read(&filename).await {
        Ok(Some((bytes, mime_type))) => (
            [
                (header::CONTENT_TYPE, mime_type.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{filename}\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "image not found"),
        Err(err) => studio_error(&err),
    }
}

pub fn router(studio: Arc<Studio>) -> Router {
    let generated_dir = studio.outputs().dir().to_path_buf();
    let uploaded_dir = studio.uploads().dir().to_path_buf();
    Router::new()
        .route("/", get(index_page))
        .route(
            "/generate",
            post(handle_generate).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route("/reset", post(handle_reset))
        .route("/session", get(session_state))
        .route("/gallery", get(gallery_listing))
        .route("/download/{filename}", get(download_image))
        .nest_service("/generated", ServeDir::new(generated_dir))
        .nest_service("/uploaded", ServeDir::new(uploaded_dir))
        .with_state(studio)
}
