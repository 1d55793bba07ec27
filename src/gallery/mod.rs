pub mod aspect;
pub mod store;

pub use aspect::{AspectRatioBucket, classify};
pub use store::{
    Gallery, GalleryEntry, GalleryLoad, GalleryStore, LoadFailure, META_SUFFIX, UNKNOWN_SOURCE,
};
