pub mod config;
pub mod error;
pub mod gallery;
pub mod generation;
pub mod image_processing;
pub mod replicate;
pub mod session;
pub mod studio;
pub mod url_validation;
pub mod web_pages;

#[cfg(test)]
mod test_support;

pub use error::{Result, StudioError};
