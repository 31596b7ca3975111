//! Load-once geometry store and instancer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use plmx_math::DMat4;

use super::loader::{GeometryLoadError, GeometryLoader, GeometryResult};
use super::proxy::ProxyExporter;
use crate::mesh::Mesh;
use crate::scene::{SceneNodeId, SceneSink};
use crate::workdir::WorkDir;

/// Edge length of placeholder boxes, in meters.
pub const DEFAULT_PLACEHOLDER_SIZE: f32 = 0.1;

/// Shared reference to a mesh in the scene's prototype area.
#[derive(Clone, Debug)]
pub struct GeometryHandle {
    /// Prototype ID in the target scene
    pub prototype: usize,
    pub name: String,
    pub mesh: Arc<Mesh>,
    /// True if the mesh stands in for geometry that failed to load
    pub placeholder: bool,
}

/// Cache of geometry handles keyed by resolved source path.
///
/// Every path is loaded at most once. Failures never escape: a missing or
/// unreadable file is replaced by a placeholder box named `MISSING_<file>`,
/// and that placeholder is cached like any other handle.
pub struct GeometryCache<'a> {
    workdir: WorkDir,
    loader: &'a dyn GeometryLoader,
    exporter: Option<&'a dyn ProxyExporter>,
    placeholder_size: f32,
    entries: HashMap<PathBuf, GeometryHandle>,
    loads: usize,
}

impl<'a> GeometryCache<'a> {
    pub fn new(workdir: WorkDir, loader: &'a dyn GeometryLoader) -> Self {
        Self {
            workdir,
            loader,
            exporter: None,
            placeholder_size: DEFAULT_PLACEHOLDER_SIZE,
            entries: HashMap::new(),
            loads: 0,
        }
    }

    /// Export every loaded mesh as a proxy artifact and reference that instead.
    pub fn with_exporter(mut self, exporter: &'a dyn ProxyExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn with_placeholder_size(mut self, size: f32) -> Self {
        self.placeholder_size = size;
        self
    }

    /// Handle for the geometry at `location`, loading it on first request.
    pub fn get_or_load<S: SceneSink + ?Sized>(&mut self, location: &str, sink: &mut S) -> GeometryHandle {
        let path = self.workdir.resolve(location);
        if let Some(handle) = self.entries.get(&path) {
            return handle.clone();
        }

        let handle = match self.load(&path) {
            Ok((mesh, source)) => {
                let name = file_name(&path, location);
                let prototype = sink.add_prototype(&name, mesh.clone(), source, false);
                GeometryHandle {
                    prototype,
                    name,
                    mesh,
                    placeholder: false,
                }
            }
            Err(err) => {
                log::warn!("{err}, substituting placeholder");
                self.placeholder(&path, location, sink)
            }
        };

        self.entries.insert(path, handle.clone());
        handle
    }

    /// Place a shared handle under `parent` with its own transform.
    pub fn create_instance<S: SceneSink + ?Sized>(
        &self,
        handle: &GeometryHandle,
        parent: Option<SceneNodeId>,
        name: &str,
        transform: DMat4,
        sink: &mut S,
    ) -> SceneNodeId {
        sink.add_instance(parent, name, handle.prototype, transform)
    }

    /// Distinct paths requested so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn placeholder_count(&self) -> usize {
        self.entries.values().filter(|h| h.placeholder).count()
    }

    /// Number of times the loader was invoked.
    pub fn load_count(&self) -> usize {
        self.loads
    }

    fn load(&mut self, path: &Path) -> GeometryResult<(Arc<Mesh>, PathBuf)> {
        if !path.is_file() {
            return Err(GeometryLoadError::NotFound(path.to_path_buf()));
        }

        self.loads += 1;
        let mesh = self.loader.load(path)?;

        let source = match self.exporter {
            Some(exporter) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let target = self
                    .workdir
                    .artifact(&format!("{stem}.{}", exporter.extension()));
                exporter.export(&mesh, &target)?;
                if !target.is_file() {
                    return Err(GeometryLoadError::ProxyMissing(target));
                }
                target
            }
            None => path.to_path_buf(),
        };

        Ok((Arc::new(mesh), source))
    }

    fn placeholder<S: SceneSink + ?Sized>(&self, path: &Path, location: &str, sink: &mut S) -> GeometryHandle {
        let name = format!("MISSING_{}", file_name(path, location));
        let mesh = Arc::new(Mesh::cuboid(self.placeholder_size));
        let prototype = sink.add_prototype(&name, mesh.clone(), path.to_path_buf(), true);
        GeometryHandle {
            prototype,
            name,
            mesh,
            placeholder: true,
        }
    }
}

fn file_name(path: &Path, location: &str) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| location.to_string())
}
