//! Skybox cube map faces.
//!
//! A skybox directory holds six PNG files named after the face they cover.
//! Faces are stored in Vulkan cube layer order: `+X, -X, +Y, -Y, +Z, -Z`
//! map to front, back, top, bottom, left, right.

use std::path::{Path, PathBuf};

use crate::error::{ResourceError, ResourceResult};
use crate::texture::{Rgba8Image, image_dimensions};

/// Face file stems in layer order.
pub const CUBE_FACE_NAMES: [&str; 6] = ["front", "back", "top", "bottom", "left", "right"];
pub const CUBE_FACE_COUNT: u32 = CUBE_FACE_NAMES.len() as u32;

/// Bytes per RGBA8 texel.
const TEXEL_SIZE: u64 = 4;

/// Paths of the six faces under `dir`, in layer order.
pub fn face_paths(dir: &Path) -> [PathBuf; 6] {
    CUBE_FACE_NAMES.map(|name| dir.join(format!("{}.png", name)))
}

/// Size of a single face, read from the first face's header.
///
/// Used while declaring GPU resources, before any face is decoded.
///
/// # Errors
/// Fails if the first face is missing or not square.
pub fn face_extent(dir: &Path) -> ResourceResult<(u32, u32)> {
    let [first, ..] = face_paths(dir);
    let (width, height) = image_dimensions(&first)?;
    if width != height {
        return Err(ResourceError::NonSquareFace {
            path: first,
            width,
            height,
        });
    }
    Ok((width, height))
}

/// Bytes needed to stage all six faces of `extent`.
pub fn staging_size(extent: (u32, u32)) -> u64 {
    u64::from(CUBE_FACE_COUNT) * u64::from(extent.0) * u64::from(extent.1) * TEXEL_SIZE
}

/// Decoded cube map faces.
#[derive(Debug)]
pub struct CubeMapFaces {
    pub width: u32,
    pub height: u32,
    /// One RGBA8 image per face, in layer order.
    pub faces: Vec<Rgba8Image>,
}

impl CubeMapFaces {
    /// Decodes all six faces under `dir`.
    ///
    /// # Errors
    /// Fails if a face is missing or cannot be decoded, if the first face is
    /// not square, or if a face differs in size from the first.
    pub fn load(dir: &Path) -> ResourceResult<Self> {
        let mut faces = Vec::with_capacity(CUBE_FACE_NAMES.len());
        let mut expected = None;

        for path in face_paths(dir) {
            let face = Rgba8Image::load(&path)?;
            let actual = (face.width, face.height);
            match expected {
                None if face.width != face.height => {
                    return Err(ResourceError::NonSquareFace {
                        path,
                        width: face.width,
                        height: face.height,
                    });
                }
                None => expected = Some(actual),
                Some(expected) if expected != actual => {
                    return Err(ResourceError::FaceSizeMismatch {
                        path,
                        expected,
                        actual,
                    });
                }
                Some(_) => {}
            }
            faces.push(face);
        }

        let (width, height) = expected.unwrap_or_default();
        tracing::info!("Loaded cube map from {:?} ({}x{} per face)", dir, width, height);

        Ok(Self {
            width,
            height,
            faces,
        })
    }

    /// Byte size of one face.
    pub fn face_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * TEXEL_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_paths_follow_layer_order() {
        let paths = face_paths(Path::new("sky"));
        assert_eq!(paths[0], Path::new("sky/front.png"));
        assert_eq!(paths[3], Path::new("sky/bottom.png"));
        assert_eq!(paths[5], Path::new("sky/right.png"));
    }

    #[test]
    fn test_staging_size() {
        assert_eq!(staging_size((2, 3)), 6 * 2 * 3 * 4);
        assert_eq!(staging_size((2048, 2048)), 6 * 2048 * 2048 * 4);
    }

    #[test]
    fn test_missing_directory_reports_first_face() {
        let result = face_extent(Path::new("does/not/exist"));
        match result {
            Err(ResourceError::FileNotFound(path)) => assert!(path.ends_with("front.png")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
