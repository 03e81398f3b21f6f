//! Triangle meshes loaded from OBJ files.
//!
//! Positions, texture coordinates and their index lists are kept separate
//! (OBJ style) because the ray-query shader fetches them per hit triangle.
//! Multiple shapes in one file are merged into a single mesh.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::error::{ResourceError, ResourceResult};

/// Largest size of any single mesh array, in bytes.
pub const MESH_ARRAY_LIMIT: usize = 65536;

/// An indexed triangle mesh.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjMesh {
    /// `x, y, z` per vertex.
    pub positions: Vec<f32>,
    /// `u, v` per texture coordinate.
    pub tex_coords: Vec<f32>,
    /// Three position indices per triangle.
    pub indices: Vec<u32>,
    /// Three texture coordinate indices per triangle.
    pub tex_coord_indices: Vec<u32>,
}

impl ObjMesh {
    /// Loads `path`. Materials are ignored.
    pub fn load(path: &Path) -> ResourceResult<Self> {
        if !path.exists() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()));
        }

        let (models, _materials) =
            tobj::load_obj(path, &load_options()).map_err(|source| ResourceError::Obj {
                path: path.to_path_buf(),
                source,
            })?;

        let mesh = Self::from_models(path, models)?;
        tracing::info!(
            "Loaded mesh {:?}: {} vertices, {} triangles",
            path,
            mesh.vertex_count(),
            mesh.triangle_count()
        );
        Ok(mesh)
    }

    /// Parses OBJ text from a reader. `path` is only used in errors.
    pub fn from_reader(path: &Path, reader: &mut impl BufRead) -> ResourceResult<Self> {
        let (models, _materials) = tobj::load_obj_buf(reader, &load_options(), |_| {
            Err(tobj::LoadError::OpenFileFailed)
        })
        .map_err(|source| ResourceError::Obj {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_models(path, models)
    }

    fn from_models(path: &Path, models: Vec<tobj::Model>) -> ResourceResult<Self> {
        let mut mesh = ObjMesh::default();

        for model in models {
            let shape = model.mesh;
            if let Some(&vertices) = shape.face_arities.iter().find(|&&arity| arity != 3) {
                return Err(ResourceError::NonTriangleFace {
                    path: PathBuf::from(path),
                    vertices,
                });
            }

            let position_base = mesh.vertex_count() as u32;
            let tex_coord_base = (mesh.tex_coords.len() / 2) as u32;

            mesh.indices
                .extend(shape.indices.iter().map(|&i| i + position_base));
            mesh.tex_coord_indices
                .extend(shape.texcoord_indices.iter().map(|&i| i + tex_coord_base));
            mesh.positions.extend_from_slice(&shape.positions);
            mesh.tex_coords.extend_from_slice(&shape.texcoords);
        }

        mesh.check_limits(path)?;
        Ok(mesh)
    }

    fn check_limits(&self, path: &Path) -> ResourceResult<()> {
        let arrays = [
            ("Vertex buffer", self.positions.len() * size_of::<f32>()),
            ("Vertex index buffer", self.indices.len() * size_of::<u32>()),
            ("Texture coordinate buffer", self.tex_coords.len() * size_of::<f32>()),
            (
                "Texture coordinate index buffer",
                self.tex_coord_indices.len() * size_of::<u32>(),
            ),
        ];

        for (what, size) in arrays {
            if size > MESH_ARRAY_LIMIT {
                return Err(ResourceError::TooLarge {
                    path: path.to_path_buf(),
                    what,
                    size,
                    limit: MESH_ARRAY_LIMIT,
                });
            }
        }
        Ok(())
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        single_index: false,
        triangulate: false,
        ignore_lines: true,
        ignore_points: true,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufReader;

    use super::*;

    fn parse(source: &str) -> ResourceResult<ObjMesh> {
        ObjMesh::from_reader(Path::new("test.obj"), &mut BufReader::new(source.as_bytes()))
    }

    const QUAD: &str = "\
o quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1 2/2 3/3
f 1/1 3/3 4/4
";

    #[test]
    fn test_parses_triangles() {
        let mesh = parse(QUAD).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.tex_coord_indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.tex_coords.len(), 8);
    }

    #[test]
    fn test_rejects_quads() {
        let source = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        assert!(matches!(
            parse(source),
            Err(ResourceError::NonTriangleFace { vertices: 4, .. })
        ));
    }

    #[test]
    fn test_merges_shapes() {
        let source = "\
o a
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
o b
v 0 0 1
v 1 0 1
v 0 1 1
f 4 5 6
";
        let mesh = parse(source).unwrap();
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.triangle_count(), 2);
        let max_index = mesh.indices.iter().copied().max().unwrap();
        assert!((max_index as usize) < mesh.vertex_count());
    }

    #[test]
    fn test_size_limit() {
        let vertex_count = MESH_ARRAY_LIMIT / (3 * size_of::<f32>()) + 1;
        let mut source = String::new();
        for i in 0..vertex_count {
            source.push_str(&format!("v {} 0 0\n", i));
        }
        // Fan over every vertex: tobj drops vertices no face references.
        for i in 2..vertex_count {
            source.push_str(&format!("f 1 {} {}\n", i, i + 1));
        }

        assert!(matches!(
            parse(&source),
            Err(ResourceError::TooLarge { what: "Vertex buffer", .. })
        ));
    }
}
