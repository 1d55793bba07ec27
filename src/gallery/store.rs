use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView};
use indexmap::IndexMap;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StudioError};
use crate::gallery::aspect::{AspectRatioBucket, classify};
use crate::image_processing;

pub const META_SUFFIX: &str = ".meta";
pub const UNKNOWN_SOURCE: &str = "Unknown";

/// Bucket → source filename → images in directory-listing order.
pub type Gallery = IndexMap<AspectRatioBucket, IndexMap<String, Vec<GalleryEntry>>>;

#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub filename: String,
    pub image: DynamicImage,
}

/// A gallery file that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct GalleryLoad {
    pub gallery: Gallery,
    pub failures: Vec<LoadFailure>,
}

impl GalleryLoad {
    pub fn is_empty(&self) -> bool {
        self.gallery.is_empty()
    }

    pub fn image_count(&self) -> usize {
        self.gallery
            .values()
            .flat_map(|sources| sources.values())
            .map(Vec::len)
            .sum()
    }
}

/// One directory of images named `<uuid>.<ext>`, each optionally paired with
/// a `<uuid>.<ext>.meta` sidecar holding the source filename. The directory
/// listing is the index.
#[derive(Clone, Debug)]
pub struct GalleryStore {
    base_dir: PathBuf,
    base_url: String,
}

impl GalleryStore {
    pub fn new(base_dir: PathBuf, base_url: impl Into<String>) -> Self {
        Self {
            base_dir,
            base_url: base_url.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn resolve_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    pub fn get_public_url(&self, filename: &str) -> String {
        let trimmed = self.base_url.trim_end_matches('/');
        format!("{trimmed}/{}", filename.trim_start_matches('/'))
    }

    pub fn get_meta_filename(filename: &str) -> String {
        format!("{filename}{META_SUFFIX}")
    }

    /// Writes `image` as `<uuid>.<format>` and returns the filename. "jpg" is
    /// encoded as JPEG but keeps its extension.
    pub async fn save(
        &self,
        image: &DynamicImage,
        format: &str,
        source_filename: Option<&str>,
    ) -> Result<String> {
        let encoder = image_processing::format_from_name(format)?;
        let ext = format.trim().to_ascii_lowercase();
        let filename = format!("{}.{ext}", Uuid::new_v4());
        let bytes = image_processing::encode_image(image, encoder)?;

        fs::create_dir_all(&self.base_dir).await?;
        fs::write(self.resolve_path(&filename), &bytes).await?;

        if let Some(source) = source_filename {
            let meta_path = self.resolve_path(&Self::get_meta_filename(&filename));
            fs::write(meta_path, source).await?;
        }
        debug!(
            dir = %self.base_dir.display(),
            %filename,
            source = source_filename.unwrap_or(UNKNOWN_SOURCE),
            bytes = bytes.len(),
            "saved gallery image"
        );
        Ok(filename)
    }

    /// Reloads every image in the directory grouped by aspect-ratio bucket,
    /// then by source filename. Files that fail to load are returned in
    /// `failures` instead of aborting the reload.
    pub async fn load_all(&self) -> Result<GalleryLoad> {
        let mut load = GalleryLoad::default();
        let mut dir = match fs::read_dir(&self.base_dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(load),
            Err(err) => return Err(err.into()),
        };

        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(dir = %self.base_dir.display(), error = %err, "gallery listing stopped early");
                    load.failures.push(LoadFailure {
                        filename: self.base_dir.display().to_string(),
                        error: err.to_string(),
                    });
                    break;
                }
            };
            let raw_name = entry.file_name();
            let lossy_name = raw_name.to_string_lossy();
            if !has_gallery_extension(&lossy_name) {
                continue;
            }
            let Some(filename) = raw_name.to_str().map(str::to_string) else {
                warn!(filename = %lossy_name, "gallery file name is not valid UTF-8");
                load.failures.push(LoadFailure {
                    filename: lossy_name.into_owned(),
                    error: "file name is not valid UTF-8".to_string(),
                });
                continue;
            };

            match self.load_entry(&filename).await {
                Ok((bucket, source, image)) => {
                    load.gallery
                        .entry(bucket)
                        .or_default()
                        .entry(source)
                        .or_default()
                        .push(GalleryEntry { filename, image });
                }
                Err(err) => {
                    warn!(%filename, error = %err, "gallery file could not be loaded");
                    load.failures.push(LoadFailure {
                        filename,
                        error: err.to_string(),
                    });
                }
            }
        }
        info!(
            dir = %self.base_dir.display(),
            images = load.image_count(),
            failures = load.failures.len(),
            "gallery reloaded"
        );
        Ok(load)
    }

    async fn load_entry(&self, filename: &str) -> Result<(AspectRatioBucket, String, DynamicImage)> {
        let bytes = fs::read(self.resolve_path(filename)).await?;
        let image = image_processing::decode_image(&bytes)
            .map_err(|err| StudioError::io(format!("decode {filename} failed: {err}")))?;
        let (width, height) = image.dimensions();
        let bucket = classify(width, height);
        let source = self.read_source(filename).await?;
        Ok((bucket, source, image))
    }

    async fn read_source(&self, filename: &str) -> Result<String> {
        let meta_path = self.resolve_path(&Self::get_meta_filename(filename));
        match fs::read_to_string(&meta_path).await {
            Ok(content) => Ok(content.trim().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(UNKNOWN_SOURCE.to_string())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Raw bytes and MIME type of a stored image, for download.
    pub async fn read(&self, filename: &str) -> Result<Option<(Vec<u8>, &'static str)>> {
        let ext = validate_filename(filename)?;
        match fs::read(self.resolve_path(filename)).await {
            Ok(bytes) => Ok(Some((bytes, image_processing::mime_for_extension(ext)))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

fn has_gallery_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(image_processing::is_gallery_extension)
}

/// Accepts only a bare `<stem>.<image ext>` name and returns the extension.
fn validate_filename(filename: &str) -> Result<&str> {
    let invalid = || StudioError::validation(format!("invalid gallery filename: {filename}"));
    if filename.is_empty()
        || filename.contains(['/', '\\'])
        || filename.starts_with('.')
        || filename.contains("..")
    {
        return Err(invalid());
    }
    let (_, ext) = filename.rsplit_once('.').ok_or_else(invalid)?;
    if !image_processing::is_gallery_extension(ext) {
        return Err(invalid());
    }
    Ok(ext)
}
