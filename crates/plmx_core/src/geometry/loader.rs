use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use plmx_math::Vec3;
use thiserror::Error;

use super::proxy::{ProxyFile, PROXY_VERSION};
use crate::mesh::Mesh;

/// Errors that can occur while loading geometry. Always recovered by
/// substituting a placeholder.
#[derive(Error, Debug)]
pub enum GeometryLoadError {
    #[error("Geometry file not found: {0}")]
    NotFound(PathBuf),

    #[error("Unsupported geometry format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to load {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("No triangles in {0}")]
    NoGeometry(PathBuf),

    #[error("Proxy artifact missing after export: {0}")]
    ProxyMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type GeometryResult<T> = Result<T, GeometryLoadError>;

/// Turns a geometry file into a mesh.
pub trait GeometryLoader {
    fn load(&self, path: &Path) -> GeometryResult<Mesh>;
}

/// Built-in loader: Wavefront OBJ through `tobj`, plus the JSON proxy files
/// written by [`JsonProxyExporter`](super::JsonProxyExporter).
#[derive(Clone, Copy, Debug, Default)]
pub struct MeshLoader;

impl GeometryLoader for MeshLoader {
    fn load(&self, path: &Path) -> GeometryResult<Mesh> {
        let ext = path
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "obj" => load_obj(path),
            "json" => load_proxy(path),
            _ => Err(GeometryLoadError::UnsupportedFormat(if ext.is_empty() {
                path.display().to_string()
            } else {
                ext
            })),
        }
    }
}

/// Load every model of an OBJ file into one triangle mesh.
fn load_obj(path: &Path) -> GeometryResult<Mesh> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ..Default::default()
        },
    )
    .map_err(|e| GeometryLoadError::Load {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut indices = Vec::new();
    let mut has_normals = true;

    for model in &models {
        let mesh = &model.mesh;
        let base = positions.len() as u32;

        positions.extend(
            mesh.positions
                .chunks_exact(3)
                .map(|p| Vec3::new(p[0], p[1], p[2])),
        );
        if mesh.normals.len() == mesh.positions.len() {
            normals.extend(
                mesh.normals
                    .chunks_exact(3)
                    .map(|n| Vec3::new(n[0], n[1], n[2])),
            );
        } else {
            has_normals = false;
        }
        indices.extend(mesh.indices.iter().map(|i| i + base));
    }

    if indices.is_empty() {
        return Err(GeometryLoadError::NoGeometry(path.to_path_buf()));
    }

    let mut mesh = Mesh::new(positions, indices, has_normals.then_some(normals));
    mesh.ensure_normals();

    log::debug!(
        "Loaded {}: {} models, {} vertices, {} triangles",
        path.display(),
        models.len(),
        mesh.vertex_count(),
        mesh.triangle_count()
    );
    Ok(mesh)
}

fn load_proxy(path: &Path) -> GeometryResult<Mesh> {
    let file = File::open(path)?;
    let proxy: ProxyFile = serde_json::from_reader(BufReader::new(file))?;
    if proxy.version != PROXY_VERSION {
        return Err(GeometryLoadError::Load {
            path: path.to_path_buf(),
            message: format!("unsupported proxy version {}", proxy.version),
        });
    }
    Ok(proxy.mesh)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("plmx_loader_{name}_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_obj_triangulates_and_merges() {
        let dir = temp_dir("obj");
        let path = dir.join("quad.obj");
        fs::write(
            &path,
            "o a\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n\
             o b\nv 0 0 1\nv 1 0 1\nv 0 1 1\nf 5 6 7\n",
        )
        .unwrap();

        let mesh = MeshLoader.load(&path).unwrap();

        assert_eq!(mesh.triangle_count(), 3);
        assert_eq!(mesh.vertex_count(), 7);
        assert!(mesh.has_normals());
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertex_count()));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unsupported_format() {
        let err = MeshLoader.load(Path::new("/nowhere/part.jt")).unwrap_err();
        assert!(matches!(err, GeometryLoadError::UnsupportedFormat(ref ext) if ext == "jt"));
    }

    #[test]
    fn test_missing_obj_is_load_error() {
        let err = MeshLoader.load(Path::new("/nowhere/part.obj")).unwrap_err();
        assert!(matches!(err, GeometryLoadError::Load { .. }));
    }
}
