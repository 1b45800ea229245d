use thiserror::Error;

pub type Result<T, E = SessionError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Camera(#[from] depth_camera::Error),
    /// Writing poses or the mesh failed; the run cannot continue.
    #[error("export failed: {0}")]
    Export(String),
    #[error("console error: {0}")]
    Console(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}
