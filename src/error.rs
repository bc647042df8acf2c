// error.rs - 全景视图的错误分类 (全部可恢复, 不会让视图崩溃)

use std::path::PathBuf;

use crate::sensor::SensorSet;

/// Non-fatal conditions a view can run into. Each one is recovered where it is
/// detected; the latest one is kept in [`crate::view::ViewStatus`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ViewError {
    #[error("motion sensors unavailable: {missing}")]
    SensorUnavailable { missing: SensorSet },

    #[error("failed to load panorama '{photo}': {reason}")]
    TextureLoadFailed { photo: String, reason: String },

    #[error("invalid orientation input: {reason}")]
    InvalidOrientationInput { reason: String },

    #[error("render backend error: {0}")]
    Backend(#[from] RenderError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("surface lost")]
    SurfaceLost,

    #[error("out of GPU memory")]
    OutOfMemory,

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
