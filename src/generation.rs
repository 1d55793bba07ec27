use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::DynamicImage;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{Result, StudioError};
use crate::{image_processing, url_validation::validate_http_url};

pub const DEFAULT_NEGATIVE_PROMPT: &str = "bad quality, worst quality, text, signature, watermark, extra limbs, low resolution, partially rendered objects, deformed or partially rendered eyes, deformed, deformed eyeballs, cross-eyed, blurry";

pub const MIN_OUTPUTS: u32 = 1;
pub const MAX_OUTPUTS: u32 = 4;
pub const MIN_DIMENSION: u32 = 256;
pub const MAX_DIMENSION: u32 = 1536;

/// The remote model behind the generation client. Takes one job and returns
/// the URLs of the finished images.
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn submit(&self, job: &JobSpec) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Webp,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::Webp),
            other => Err(StudioError::validation(format!(
                "output format must be png or webp, got {other:?}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model knobs forwarded untouched to the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningParams {
    pub true_cfg: f64,
    pub id_weight: f64,
    pub num_steps: u32,
    pub start_step: u32,
    pub guidance_scale: f64,
    pub negative_prompt: String,
    pub max_sequence_length: u32,
    pub output_quality: u32,
}

impl Default for TuningParams {
    fn default() -> Self {
        Self {
            true_cfg: 1.0,
            id_weight: 1.05,
            num_steps: 20,
            start_step: 0,
            guidance_scale: 4.0,
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            max_sequence_length: 128,
            output_quality: 100,
        }
    }
}

fn check_range<T>(name: &str, value: T, min: T, max: T) -> Result<()>
where
    T: PartialOrd + fmt::Display + Copy,
{
    if !(min..=max).contains(&value) {
        return Err(StudioError::validation(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

impl TuningParams {
    pub fn validate(&self) -> Result<()> {
        check_range("true_cfg", self.true_cfg, 1.0, 10.0)?;
        check_range("id_weight", self.id_weight, 1.0, 3.0)?;
        check_range("num_steps", self.num_steps, 1, 20)?;
        check_range("start_step", self.start_step, 0, 10)?;
        check_range("guidance_scale", self.guidance_scale, 1.0, 10.0)?;
        check_range("max_sequence_length", self.max_sequence_length, 128, 512)?;
        check_range("output_quality", self.output_quality, 0, 100)?;
        Ok(())
    }
}

/// Everything the user chooses for one generation, minus the source image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    pub num_outputs: u32,
    pub output_format: OutputFormat,
    pub width: u32,
    pub height: u32,
    #[serde(flatten)]
    pub tuning: TuningParams,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            num_outputs: 1,
            output_format: OutputFormat::Png,
            width: 896,
            height: 1152,
            tuning: TuningParams::default(),
        }
    }
}

impl GenerationParams {
    pub fn validate(&self) -> Result<()> {
        check_range("num_outputs", self.num_outputs, MIN_OUTPUTS, MAX_OUTPUTS)?;
        check_range("width", self.width, MIN_DIMENSION, MAX_DIMENSION)?;
        check_range("height", self.height, MIN_DIMENSION, MAX_DIMENSION)?;
        self.tuning.validate()
    }
}

/// The flat input record sent to the remote model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSpec {
    pub width: u32,
    pub height: u32,
    pub prompt: String,
    pub true_cfg: f64,
    pub id_weight: f64,
    pub num_steps: u32,
    pub start_step: u32,
    pub num_outputs: u32,
    pub output_format: OutputFormat,
    pub guidance_scale: f64,
    pub output_quality: u32,
    pub main_face_image: String,
    pub negative_prompt: String,
    pub max_sequence_length: u32,
}

impl JobSpec {
    pub fn new(params: &GenerationParams, source_image: &[u8]) -> Self {
        let tuning = &params.tuning;
        Self {
            width: params.width,
            height: params.height,
            prompt: params.prompt.clone(),
            true_cfg: tuning.true_cfg,
            id_weight: tuning.id_weight,
            num_steps: tuning.num_steps,
            start_step: tuning.start_step,
            num_outputs: params.num_outputs,
            output_format: params.output_format,
            guidance_scale: tuning.guidance_scale,
            output_quality: tuning.output_quality,
            main_face_image: encode_data_uri(source_image),
            negative_prompt: tuning.negative_prompt.clone(),
            max_sequence_length: tuning.max_sequence_length,
        }
    }
}

/// Source images are always labeled JPEG, whatever their real format.
pub fn encode_data_uri(bytes: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes))
}

#[derive(Debug)]
pub struct GenerationResult {
    pub images: Vec<DynamicImage>,
    pub elapsed: Duration,
}

impl GenerationResult {
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

#[derive(Clone)]
pub struct GenerationClient {
    service: Arc<dyn InferenceService>,
    http: Client,
}

impl GenerationClient {
    pub fn new(service: Arc<dyn InferenceService>) -> Self {
        Self::with_http_client(service, Client::new())
    }

    pub fn with_http_client(service: Arc<dyn InferenceService>, http: Client) -> Self {
        Self { service, http }
    }

    /// Submits one job built from `params` and the image at
    /// `source_image_path`, then downloads and decodes every result. The
    /// first failing download aborts the batch. `elapsed` covers the
    /// submission and all downloads.
    pub async fn generate(
        &self,
        params: &GenerationParams,
        source_image_path: &Path,
    ) -> Result<GenerationResult> {
        params.validate()?;
        let source = tokio::fs::read(source_image_path).await.map_err(|err| {
            StudioError::io(format!(
                "read source image {} failed: {err}",
                source_image_path.display()
            ))
        })?;
        if source.is_empty() {
            return Err(StudioError::validation("source face image is empty"));
        }
        let job = JobSpec::new(params, &source);

        let started = Instant::now();
        info!(
            num_outputs = job.num_outputs,
            width = job.width,
            height = job.height,
            format = %job.output_format,
            "submitting generation job"
        );
        let urls = self.service.submit(&job).await?;
        debug!(count = urls.len(), "generation job returned result urls");

        let mut images = Vec::with_capacity(urls.len());
        for url in &urls {
            images.push(self.fetch_image(url).await?);
        }
        let elapsed = started.elapsed();
        info!(
            images = images.len(),
            elapsed_seconds = elapsed.as_secs_f64(),
            "generation finished"
        );
        Ok(GenerationResult { images, elapsed })
    }

    async fn fetch_image(&self, raw_url: &str) -> Result<DynamicImage> {
        let url = validate_http_url(raw_url)?;
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StudioError::generation(format!(
                "fetch {url} failed: HTTP {status}"
            )));
        }
        let bytes = response.bytes().await?;
        image_processing::decode_image(&bytes)
            .map_err(|err| StudioError::generation(format!("decode {url} failed: {err}")))
    }
}
