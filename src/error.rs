use thiserror::Error;

/// Fatal failures of the initialization sequence.
///
/// Every variant aborts startup. Whatever was acquired before the failing step is still owned by
/// the [`Renderer`](crate::Renderer) and released by [`Renderer::terminate`](crate::Renderer::terminate).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("Could not create a backend instance")]
    InstanceCreation,

    #[error("Could not create a surface for the window")]
    SurfaceCreation,

    #[error("Could not get adapter: {0}")]
    AdapterRequest(String),

    #[error("Could not get device: {0}")]
    DeviceRequest(String),

    #[error("Device did not expose a queue")]
    QueueUnavailable,

    #[error("Failed to create {0}")]
    ResourceCreation(&'static str),

    #[error("Shader module failed to compile: {0}")]
    ShaderCompilation(String),

    #[error("Render pipeline creation failed")]
    PipelineCreation,

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Renderer is not initialized")]
    NotInitialized,

    #[error("Mesh could not be loaded")]
    MeshUnavailable,
}

pub type Result<T> = std::result::Result<T, InitError>;
