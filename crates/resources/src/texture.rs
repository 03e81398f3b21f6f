//! RGBA8 pixel data decoded from image files.

use std::path::{Path, PathBuf};

use crate::error::{ResourceError, ResourceResult};

/// Tightly packed RGBA8 pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rgba8Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Rgba8Image {
    /// Decodes `path` and converts it to RGBA8.
    pub fn load(path: &Path) -> ResourceResult<Self> {
        if !path.exists() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()));
        }

        let image = image::open(path)
            .map_err(|source| image_error(path, source))?
            .into_rgba8();
        let (width, height) = image.dimensions();
        tracing::debug!("Decoded {:?} ({}x{})", path, width, height);

        Ok(Self {
            width,
            height,
            pixels: image.into_raw(),
        })
    }

    /// Size in bytes of the pixel data.
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

/// Reads the dimensions of `path` without decoding the pixels.
pub fn image_dimensions(path: &Path) -> ResourceResult<(u32, u32)> {
    if !path.exists() {
        return Err(ResourceError::FileNotFound(path.to_path_buf()));
    }
    image::image_dimensions(path).map_err(|source| image_error(path, source))
}

fn image_error(path: &Path, source: image::ImageError) -> ResourceError {
    ResourceError::Image {
        path: PathBuf::from(path),
        source,
    }
}
