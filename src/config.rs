use std::env;
use std::path::PathBuf;

use tokio::time::Duration;

use crate::replicate::{DEFAULT_POLL_INTERVAL_MS, FLUX_PULID_VERSION, REPLICATE_API_ROOT};

pub const DEFAULT_PORT: u16 = 8501;
pub const DEFAULT_GENERATED_DIR: &str = "generated_images";
pub const DEFAULT_UPLOADED_DIR: &str = "uploaded_images";

/// Server settings, read from the environment after `.env` is loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub replicate_api_token: String,
    pub replicate_api_root: String,
    pub replicate_model_version: String,
    pub poll_interval: Duration,
    pub generated_dir: PathBuf,
    pub uploaded_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            port: non_empty("STUDIO_PORT")
                .and_then(|value| value.trim().parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT),
            replicate_api_token: non_empty("REPLICATE_API_TOKEN")
                .map(|value| value.trim().to_string())
                .unwrap_or_default(),
            replicate_api_root: non_empty("REPLICATE_API_BASE")
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .unwrap_or_else(|| REPLICATE_API_ROOT.to_string()),
            replicate_model_version: non_empty("REPLICATE_MODEL_VERSION")
                .unwrap_or_else(|| FLUX_PULID_VERSION.to_string()),
            poll_interval: Duration::from_millis(
                non_empty("REPLICATE_POLL_INTERVAL_MS")
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            generated_dir: non_empty("GENERATED_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_GENERATED_DIR)),
            uploaded_dir: non_empty("UPLOADED_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOADED_DIR)),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}
