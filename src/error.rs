use thiserror::Error;

/// Failures surfaced by the rendering core.
///
/// Initialization variants abort startup; everything that can go wrong after a
/// successful init is either logged-and-skipped (missing resources) or a
/// silent configuration branch, so `render` only ever returns surface loss.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("render target has zero size ({width}x{height})")]
    ZeroSizedTarget { width: u32, height: u32 },

    #[error("no suitable GPU adapter found")]
    AdapterNotFound,

    #[error("failed to create GPU device: {0}")]
    DeviceRequest(String),

    #[error("failed to create rendering surface: {0}")]
    SurfaceCreation(String),

    #[error("missing shader program: {0}")]
    MissingProgram(String),

    #[error("missing resource: {0}")]
    MissingResource(String),

    #[error("lost rendering surface: {0}")]
    SurfaceLost(#[from] wgpu::SurfaceError),
}
