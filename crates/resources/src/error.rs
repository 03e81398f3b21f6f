//! Error types for resource loading.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for resource loading operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// Failed to parse an OBJ file.
    #[error("Failed to load OBJ file '{path}': {source}")]
    Obj {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    /// An OBJ face is not a triangle.
    #[error("OBJ file '{path}' has a face with {vertices} vertices, only triangles are supported")]
    NonTriangleFace { path: PathBuf, vertices: u32 },

    /// A mesh array exceeds the inline upload limit.
    #[error("{what} of '{path}' is {size} bytes, the limit is {limit} bytes")]
    TooLarge {
        path: PathBuf,
        what: &'static str,
        size: usize,
        limit: usize,
    },

    /// Cube map faces have different sizes.
    #[error("Cube map face '{path}' is {actual:?}, expected {expected:?}")]
    FaceSizeMismatch {
        path: PathBuf,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// Cube map faces must be square.
    #[error("Cube map face '{path}' is {width}x{height}, faces must be square")]
    NonSquareFace {
        path: PathBuf,
        width: u32,
        height: u32,
    },

    /// Image decoding error.
    #[error("Failed to decode image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
