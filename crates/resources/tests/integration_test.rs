//! Integration tests for asset loading from disk.

use std::path::{Path, PathBuf};

use blackhole_resources::{CubeMapFaces, ObjMesh, ResourceError, cubemap};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_face(dir: &Path, name: &str, size: u32, value: u8) {
    let image = image::RgbaImage::from_pixel(size, size, image::Rgba([value, 0, 0, 255]));
    image.save(dir.join(format!("{}.png", name))).unwrap();
}

#[test]
fn test_load_cube_map_faces() {
    let dir = scratch_dir("cube_map_ok");
    for (i, name) in cubemap::CUBE_FACE_NAMES.iter().enumerate() {
        write_face(&dir, name, 4, i as u8);
    }

    assert_eq!(cubemap::face_extent(&dir).unwrap(), (4, 4));

    let faces = CubeMapFaces::load(&dir).unwrap();
    assert_eq!((faces.width, faces.height), (4, 4));
    assert_eq!(faces.faces.len(), 6);
    assert_eq!(faces.face_size(), 4 * 4 * 4);
    // Layer order follows the face names.
    for (i, face) in faces.faces.iter().enumerate() {
        assert_eq!(face.pixels[0], i as u8);
        assert_eq!(face.byte_size() as u64, faces.face_size());
    }
}

#[test]
fn test_cube_map_face_size_mismatch() {
    let dir = scratch_dir("cube_map_mismatch");
    for name in cubemap::CUBE_FACE_NAMES {
        let size = if name == "left" { 8 } else { 4 };
        write_face(&dir, name, size, 0);
    }

    match CubeMapFaces::load(&dir) {
        Err(ResourceError::FaceSizeMismatch {
            path,
            expected,
            actual,
        }) => {
            assert!(path.ends_with("left.png"));
            assert_eq!(expected, (4, 4));
            assert_eq!(actual, (8, 8));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_cube_map_faces_must_be_square() {
    let dir = scratch_dir("cube_map_non_square");
    for name in cubemap::CUBE_FACE_NAMES {
        let image = image::RgbaImage::from_pixel(8, 4, image::Rgba([0, 0, 0, 255]));
        image.save(dir.join(format!("{}.png", name))).unwrap();
    }

    match cubemap::face_extent(&dir) {
        Err(ResourceError::NonSquareFace {
            path,
            width,
            height,
        }) => {
            assert!(path.ends_with("front.png"));
            assert_eq!((width, height), (8, 4));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(matches!(
        CubeMapFaces::load(&dir),
        Err(ResourceError::NonSquareFace { .. })
    ));
}

#[test]
fn test_load_obj_from_file() {
    let dir = scratch_dir("obj_ok");
    let path = dir.join("triangle.obj");
    std::fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 0 1\nf 1/1 2/2 3/3\n")
        .unwrap();

    let mesh = ObjMesh::load(&path).unwrap();
    assert_eq!(mesh.triangle_count(), 1);
    assert_eq!(mesh.positions.len(), 9);
}

#[test]
fn test_missing_obj() {
    let result = ObjMesh::load(Path::new("missing/mesh.obj"));
    assert!(matches!(result, Err(ResourceError::FileNotFound(_))));
}
