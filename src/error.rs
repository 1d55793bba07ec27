use thiserror::Error;

pub type Result<T> = std::result::Result<T, StudioError>;

/// Errors surfaced by the generation client, the gallery store and the
/// studio flow built on top of them.
#[derive(Error, Debug)]
pub enum StudioError {
    /// Source image unreadable, directory unwritable, gallery file corrupt.
    #[error("IO error: {0}")]
    Io(String),

    /// Remote service call failed, or a result URL could not be fetched or decoded.
    #[error("generation failed: {0}")]
    Generation(String),

    /// A parameter is outside its allowed range.
    #[error("invalid parameter: {0}")]
    Validation(String),
}

impl StudioError {
    pub fn io(message: impl Into<String>) -> Self {
        StudioError::Io(message.into())
    }

    pub fn generation(message: impl Into<String>) -> Self {
        StudioError::Generation(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        StudioError::Validation(message.into())
    }
}

impl From<std::io::Error> for StudioError {
    fn from(err: std::io::Error) -> Self {
        StudioError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for StudioError {
    fn from(err: reqwest::Error) -> Self {
        StudioError::Generation(err.to_string())
    }
}
