//! Thumbnail rendering for 3D models, cached by content hash.
//!
//! A [`Renderer`] turns a model file into a PNG; [`F3dRenderer`] drives the
//! `f3d` viewer headless. [`ThumbnailService`] owns the on-disk cache and makes
//! sure each distinct model is rendered at most once.

pub mod error;
mod f3d;
mod imaging;
mod renderer;
mod service;

pub use crate::f3d::F3dRenderer;
pub use crate::imaging::is_valid_image;
pub use crate::renderer::{RenderOptions, Renderer};
pub use crate::service::{
    BatchOutcome, BatchProgress, BatchReport, CacheStats, CleanupReport, DEFAULT_SIZES, Thumbnail, ThumbnailRequest,
    ThumbnailService,
};
