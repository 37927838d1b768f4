use crate::error::Result;
use std::path::Path;

/// Appearance of a rendered thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Square canvas edge in pixels.
    pub size: u32,
    /// Surface colour, as understood by the renderer (`"0.8,0.8,0.8"` for f3d).
    pub material: Option<String>,
    /// Background colour, same format as `material`.
    pub background: Option<String>,
}
impl Default for RenderOptions {
    fn default() -> Self {
        Self { size: 1280, material: None, background: None }
    }
}

/// Turns a model file into an image. Implementations block; callers run them
/// on the blocking thread pool.
pub trait Renderer: Send + Sync {
    /// Renders `model` and writes a PNG to `save_to`.
    fn render_to(&self, model: &Path, options: &RenderOptions, save_to: &Path) -> Result<()>;
}
