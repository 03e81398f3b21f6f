//! Asset loading.
//!
//! This crate decodes external assets into CPU-side data:
//! - Skybox cube map faces
//! - OBJ triangle meshes
//! - RGBA8 textures

mod error;

pub mod cubemap;
pub mod mesh;
pub mod texture;

pub use cubemap::{CUBE_FACE_COUNT, CUBE_FACE_NAMES, CubeMapFaces};
pub use error::{ResourceError, ResourceResult};
pub use mesh::{MESH_ARRAY_LIMIT, ObjMesh};
pub use texture::Rgba8Image;
