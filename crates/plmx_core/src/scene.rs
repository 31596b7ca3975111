//! Target scene for converted assemblies.
//!
//! The converter never talks to a concrete scene type directly; it writes
//! through the [`SceneSink`] trait. [`Scene`] is the in-memory implementation
//! used by the command-line tool and the tests: a node hierarchy of groups and
//! mesh instances, a non-rendering prototype area holding each loaded mesh
//! once, and a flat material library.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use plmx_math::{Aabb, DMat4, DVec3, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mesh::Mesh;

/// Errors that can occur when the scene refuses a material.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MaterialCreationError {
    #[error("Material name is empty")]
    EmptyName,

    #[error("Material '{0}' has non-finite parameters")]
    InvalidParameters(String),

    #[error("Material library is full ({capacity} entries), cannot add '{name}'")]
    LibraryFull { name: String, capacity: usize },
}

/// Errors that can occur while writing a scene snapshot.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A PBR material as stored in the target scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Material name, possibly altered by the scene on insert
    pub name: String,

    /// Diffuse/albedo color (RGB, 0-1)
    pub diffuse_color: Vec3,

    /// Metallic factor (0=dielectric, 1=metal)
    pub metallic: f32,

    /// Roughness factor (0=smooth, 1=rough)
    pub roughness: f32,

    /// Index of refraction
    pub ior: f32,

    /// Opacity (0=transparent, 1=opaque)
    pub opacity: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            diffuse_color: Vec3::new(0.5, 0.5, 0.5),
            metallic: 0.0,
            roughness: 0.5,
            ior: 1.5,
            opacity: 1.0,
        }
    }
}

impl Material {
    /// Create a new material with just a name and diffuse color.
    pub fn new(name: impl Into<String>, diffuse_color: Vec3) -> Self {
        Self {
            name: name.into(),
            diffuse_color,
            ..Default::default()
        }
    }

    fn is_finite(&self) -> bool {
        self.diffuse_color.is_finite()
            && self.metallic.is_finite()
            && self.roughness.is_finite()
            && self.ior.is_finite()
            && self.opacity.is_finite()
    }
}

/// Handle of a material in the scene library.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(pub usize);

/// Handle of a node in the scene hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SceneNodeId(pub usize);

/// A loaded mesh kept once in the prototype area and shared by instances.
#[derive(Clone, Debug)]
pub struct Prototype {
    /// Unique identifier within the scene
    pub id: usize,

    /// Prototype name (`MISSING_<file>` for placeholders)
    pub name: String,

    /// Shared mesh geometry
    pub mesh: Arc<Mesh>,

    /// File the mesh came from, or the proxy artifact standing in for it
    pub source: PathBuf,

    /// True if the mesh is a stand-in for geometry that failed to load
    pub placeholder: bool,

    /// Local bounding box (from mesh)
    pub bounds: Aabb,
}

impl Prototype {
    pub fn new(id: usize, name: String, mesh: Arc<Mesh>, source: PathBuf, placeholder: bool) -> Self {
        let bounds = mesh.bounds;
        Self {
            id,
            name,
            mesh,
            source,
            placeholder,
            bounds,
        }
    }
}

/// What a scene node carries besides its transform.
#[derive(Clone, Debug, PartialEq)]
pub enum SceneNodeKind {
    /// Pure grouping node with the source metadata attached.
    Group { metadata: Vec<(String, String)> },
    /// Mesh-bearing node referencing a shared prototype.
    Instance {
        prototype: usize,
        material: Option<MaterialId>,
    },
}

/// A node of the target hierarchy.
#[derive(Clone, Debug)]
pub struct SceneNode {
    pub name: String,
    pub parent: Option<SceneNodeId>,
    pub children: Vec<SceneNodeId>,
    /// Transform relative to the parent
    pub transform: DMat4,
    pub kind: SceneNodeKind,
}

impl SceneNode {
    pub fn is_instance(&self) -> bool {
        matches!(self.kind, SceneNodeKind::Instance { .. })
    }

    pub fn material(&self) -> Option<MaterialId> {
        match self.kind {
            SceneNodeKind::Instance { material, .. } => material,
            SceneNodeKind::Group { .. } => None,
        }
    }
}

/// Write side of a target scene as the converter sees it.
pub trait SceneSink {
    /// Look up a material by its exact stored name.
    fn find_material(&self, name: &str) -> Option<MaterialId>;

    fn material(&self, id: MaterialId) -> Option<&Material>;

    /// Every material currently in the library, in insertion order.
    fn material_ids(&self) -> Vec<MaterialId>;

    /// Add a material. The scene may store it under a different name.
    fn insert_material(&mut self, material: Material) -> Result<MaterialId, MaterialCreationError>;

    /// Store a mesh in the non-rendering prototype area and return its ID.
    fn add_prototype(&mut self, name: &str, mesh: Arc<Mesh>, source: PathBuf, placeholder: bool) -> usize;

    fn add_group(
        &mut self,
        parent: Option<SceneNodeId>,
        name: &str,
        transform: DMat4,
        metadata: Vec<(String, String)>,
    ) -> SceneNodeId;

    fn add_instance(
        &mut self,
        parent: Option<SceneNodeId>,
        name: &str,
        prototype: usize,
        transform: DMat4,
    ) -> SceneNodeId;

    /// Attach a material to a mesh-bearing node. Returns false for groups.
    fn bind_material(&mut self, node: SceneNodeId, material: MaterialId) -> bool;

    /// Triangles in the subtree rooted at `node`.
    fn polygon_count(&self, node: SceneNodeId) -> usize;

    /// Give the host a chance to process pending updates.
    fn flush(&mut self) {}

    /// Write a snapshot of the current state to `path`.
    fn persist(&self, path: &Path) -> Result<(), PersistenceError>;
}

/// A complete in-memory target scene.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    /// Scene name (usually the document's file stem)
    pub name: String,

    /// Shared prototype definitions (meshes)
    pub prototypes: Vec<Arc<Prototype>>,

    /// Material library
    pub materials: Vec<Material>,

    nodes: Vec<SceneNode>,
    roots: Vec<SceneNodeId>,

    /// Longest material name the library stores; longer names are cut.
    max_material_name: Option<usize>,
    /// Maximum number of materials the library accepts.
    material_capacity: Option<usize>,
    flushes: usize,
}

impl Scene {
    /// Create an empty scene.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Truncate material names longer than `len` characters on insert.
    pub fn with_material_name_limit(mut self, len: usize) -> Self {
        self.max_material_name = Some(len);
        self
    }

    /// Refuse new materials once the library holds `capacity` entries.
    pub fn with_material_capacity(mut self, capacity: usize) -> Self {
        self.material_capacity = Some(capacity);
        self
    }

    pub fn node(&self, id: SceneNodeId) -> Option<&SceneNode> {
        self.nodes.get(id.0)
    }

    /// Top-level nodes in creation order.
    pub fn roots(&self) -> &[SceneNodeId] {
        &self.roots
    }

    /// Find the first node with the given name.
    pub fn find_node(&self, name: &str) -> Option<SceneNodeId> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(SceneNodeId)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get total instance count.
    pub fn instance_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_instance()).count()
    }

    pub fn group_count(&self) -> usize {
        self.nodes.len() - self.instance_count()
    }

    /// Get prototype count.
    pub fn prototype_count(&self) -> usize {
        self.prototypes.len()
    }

    pub fn placeholder_count(&self) -> usize {
        self.prototypes.iter().filter(|p| p.placeholder).count()
    }

    /// Get material count.
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Number of times the converter flushed this scene.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    /// Instance nodes that place the given prototype.
    pub fn instances_of(&self, prototype: usize) -> Vec<SceneNodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| {
                matches!(n.kind, SceneNodeKind::Instance { prototype: p, .. } if p == prototype)
            })
            .map(|(i, _)| SceneNodeId(i))
            .collect()
    }

    /// Get total triangle count across all root subtrees.
    pub fn total_triangle_count(&self) -> usize {
        self.roots.iter().map(|&root| self.polygon_count(root)).sum()
    }

    /// Transform from node space to scene space.
    pub fn world_transform(&self, id: SceneNodeId) -> DMat4 {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current.and_then(|c| self.nodes.get(c.0)) {
            chain.push(node.transform);
            current = node.parent;
        }
        chain.reverse();
        plmx_math::transform::chain(&chain)
    }

    /// Compute the world-space bounding box of all instances.
    pub fn world_bounds(&self) -> Aabb {
        let mut bounds = Aabb::empty();

        for (i, node) in self.nodes.iter().enumerate() {
            let SceneNodeKind::Instance { prototype, .. } = node.kind else {
                continue;
            };
            let Some(proto) = self.prototypes.get(prototype) else {
                continue;
            };
            if proto.bounds.is_empty() {
                continue;
            }

            let matrix = self.world_transform(SceneNodeId(i));
            let (lo, hi) = (proto.bounds.min.as_dvec3(), proto.bounds.max.as_dvec3());

            // Transform all 8 corners of the prototype bounds
            let corners: Vec<Vec3> = (0..8)
                .map(|corner| {
                    let p = DVec3::new(
                        if corner & 1 == 0 { lo.x } else { hi.x },
                        if corner & 2 == 0 { lo.y } else { hi.y },
                        if corner & 4 == 0 { lo.z } else { hi.z },
                    );
                    matrix.transform_point3(p).as_vec3()
                })
                .collect();
            bounds = Aabb::surrounding(&bounds, &Aabb::from_slice(&corners));
        }

        bounds
    }

    /// Serializable view of the scene without mesh data.
    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            name: self.name.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeSnapshot {
                    name: n.name.clone(),
                    parent: n.parent,
                    transform: n.transform,
                    prototype: match n.kind {
                        SceneNodeKind::Instance { prototype, .. } => Some(prototype),
                        SceneNodeKind::Group { .. } => None,
                    },
                    material: n.material(),
                    metadata: match &n.kind {
                        SceneNodeKind::Group { metadata } => metadata.clone(),
                        SceneNodeKind::Instance { .. } => Vec::new(),
                    },
                })
                .collect(),
            prototypes: self
                .prototypes
                .iter()
                .map(|p| PrototypeSnapshot {
                    name: p.name.clone(),
                    source: p.source.clone(),
                    placeholder: p.placeholder,
                    triangles: p.mesh.triangle_count(),
                })
                .collect(),
            materials: self.materials.clone(),
        }
    }

    fn push_node(&mut self, parent: Option<SceneNodeId>, node: SceneNode) -> SceneNodeId {
        let id = SceneNodeId(self.nodes.len());
        self.nodes.push(node);
        match parent.and_then(|p| self.nodes.get_mut(p.0)) {
            Some(parent) => parent.children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// Store `name` the way the library would: cut to the length limit, then
    /// suffixed `.001`, `.002`, ... until unique.
    fn library_name(&self, name: &str) -> String {
        let base: String = match self.max_material_name {
            Some(limit) => name.chars().take(limit).collect(),
            None => name.to_string(),
        };
        if self.find_material(&base).is_none() {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}.{n:03}");
            if self.find_material(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }
}

impl SceneSink for Scene {
    fn find_material(&self, name: &str) -> Option<MaterialId> {
        self.materials
            .iter()
            .position(|m| m.name == name)
            .map(MaterialId)
    }

    fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0)
    }

    fn material_ids(&self) -> Vec<MaterialId> {
        (0..self.materials.len()).map(MaterialId).collect()
    }

    fn insert_material(&mut self, mut material: Material) -> Result<MaterialId, MaterialCreationError> {
        if material.name.trim().is_empty() {
            return Err(MaterialCreationError::EmptyName);
        }
        if !material.is_finite() {
            return Err(MaterialCreationError::InvalidParameters(material.name));
        }
        if let Some(capacity) = self.material_capacity {
            if self.materials.len() >= capacity {
                return Err(MaterialCreationError::LibraryFull {
                    name: material.name,
                    capacity,
                });
            }
        }

        let stored = self.library_name(&material.name);
        if stored != material.name {
            log::debug!("Material '{}' stored as '{}'", material.name, stored);
            material.name = stored;
        }

        let id = MaterialId(self.materials.len());
        self.materials.push(material);
        Ok(id)
    }

    fn add_prototype(&mut self, name: &str, mesh: Arc<Mesh>, source: PathBuf, placeholder: bool) -> usize {
        let id = self.prototypes.len();
        let prototype = Arc::new(Prototype::new(id, name.to_string(), mesh, source, placeholder));
        self.prototypes.push(prototype);
        id
    }

    fn add_group(
        &mut self,
        parent: Option<SceneNodeId>,
        name: &str,
        transform: DMat4,
        metadata: Vec<(String, String)>,
    ) -> SceneNodeId {
        self.push_node(
            parent,
            SceneNode {
                name: name.to_string(),
                parent,
                children: Vec::new(),
                transform,
                kind: SceneNodeKind::Group { metadata },
            },
        )
    }

    fn add_instance(
        &mut self,
        parent: Option<SceneNodeId>,
        name: &str,
        prototype: usize,
        transform: DMat4,
    ) -> SceneNodeId {
        self.push_node(
            parent,
            SceneNode {
                name: name.to_string(),
                parent,
                children: Vec::new(),
                transform,
                kind: SceneNodeKind::Instance {
                    prototype,
                    material: None,
                },
            },
        )
    }

    fn bind_material(&mut self, node: SceneNodeId, material: MaterialId) -> bool {
        match self.nodes.get_mut(node.0).map(|n| &mut n.kind) {
            Some(SceneNodeKind::Instance { material: slot, .. }) => {
                *slot = Some(material);
                true
            }
            _ => false,
        }
    }

    fn polygon_count(&self, node: SceneNodeId) -> usize {
        let Some(n) = self.nodes.get(node.0) else {
            return 0;
        };
        let own = match n.kind {
            SceneNodeKind::Instance { prototype, .. } => self
                .prototypes
                .get(prototype)
                .map(|p| p.mesh.triangle_count())
                .unwrap_or(0),
            SceneNodeKind::Group { .. } => 0,
        };
        own + n
            .children
            .iter()
            .map(|&child| self.polygon_count(child))
            .sum::<usize>()
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }

    fn persist(&self, path: &Path) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        // Write next to the target and rename so a crash never leaves a torn file.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Checkpoint form of a [`Scene`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub name: String,
    pub nodes: Vec<NodeSnapshot>,
    pub prototypes: Vec<PrototypeSnapshot>,
    pub materials: Vec<Material>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub parent: Option<SceneNodeId>,
    pub transform: DMat4,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prototype: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub material: Option<MaterialId>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub metadata: Vec<(String, String)>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrototypeSnapshot {
    pub name: String,
    pub source: PathBuf,
    pub placeholder: bool,
    pub triangles: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Arc<Mesh> {
        Arc::new(Mesh::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            vec![0, 1, 2],
            None,
        ))
    }

    #[test]
    fn test_scene_creation() {
        let mut scene = Scene::new("test");

        let proto_id = scene.add_prototype("triangle", triangle(), PathBuf::from("tri.obj"), false);
        assert_eq!(proto_id, 0);

        let group = scene.add_group(None, "asm", DMat4::IDENTITY, Vec::new());
        scene.add_instance(Some(group), "a", proto_id, DMat4::IDENTITY);
        scene.add_instance(
            Some(group),
            "b",
            proto_id,
            DMat4::from_translation(DVec3::new(1.0, 0.0, 0.0)),
        );

        assert_eq!(scene.prototype_count(), 1);
        assert_eq!(scene.instance_count(), 2);
        assert_eq!(scene.group_count(), 1);
        assert_eq!(scene.total_triangle_count(), 2);
        assert_eq!(scene.instances_of(proto_id).len(), 2);
        assert_eq!(scene.roots(), &[group]);
    }

    #[test]
    fn test_polygon_count_sums_subtree() {
        let mut scene = Scene::new("test");
        let tri = scene.add_prototype("tri", triangle(), PathBuf::from("tri.obj"), false);
        let cube = scene.add_prototype("cube", Arc::new(Mesh::cuboid(1.0)), PathBuf::from("c.obj"), false);

        let root = scene.add_group(None, "root", DMat4::IDENTITY, Vec::new());
        let sub = scene.add_group(Some(root), "sub", DMat4::IDENTITY, Vec::new());
        scene.add_instance(Some(root), "t", tri, DMat4::IDENTITY);
        scene.add_instance(Some(sub), "c", cube, DMat4::IDENTITY);

        assert_eq!(scene.polygon_count(sub), 12);
        assert_eq!(scene.polygon_count(root), 13);
    }

    #[test]
    fn test_world_transform_chains_parents() {
        let mut scene = Scene::new("test");
        let proto = scene.add_prototype("cube", Arc::new(Mesh::cuboid(2.0)), PathBuf::new(), false);
        let outer = scene.add_group(
            None,
            "outer",
            DMat4::from_translation(DVec3::new(10.0, 0.0, 0.0)),
            Vec::new(),
        );
        let node = scene.add_instance(
            Some(outer),
            "inner",
            proto,
            DMat4::from_translation(DVec3::new(0.0, 5.0, 0.0)),
        );

        let world = scene.world_transform(node);
        assert!((world.w_axis.truncate() - DVec3::new(10.0, 5.0, 0.0)).length() < 1e-12);

        let bounds = scene.world_bounds();
        assert!((bounds.centroid() - Vec3::new(10.0, 5.0, 0.0)).length() < 1e-5);
        assert!((bounds.extent() - Vec3::splat(2.0)).length() < 1e-5);
    }

    #[test]
    fn test_bind_material_only_on_instances() {
        let mut scene = Scene::new("test");
        let proto = scene.add_prototype("tri", triangle(), PathBuf::new(), false);
        let group = scene.add_group(None, "g", DMat4::IDENTITY, Vec::new());
        let inst = scene.add_instance(Some(group), "i", proto, DMat4::IDENTITY);
        let mat = scene.insert_material(Material::new("Steel", Vec3::splat(0.5))).unwrap();

        assert!(!scene.bind_material(group, mat));
        assert!(scene.bind_material(inst, mat));
        assert_eq!(scene.node(inst).unwrap().material(), Some(mat));
        assert_eq!(scene.node(group).unwrap().material(), None);
    }

    #[test]
    fn test_insert_material_renames_collisions_and_long_names() {
        let mut scene = Scene::new("test").with_material_name_limit(8);

        let a = scene.insert_material(Material::new("KUNSTSTOFF_PA6", Vec3::ONE)).unwrap();
        let b = scene.insert_material(Material::new("KUNSTSTOFF_PA66", Vec3::ONE)).unwrap();

        assert_eq!(scene.material(a).unwrap().name, "KUNSTSTO");
        assert_eq!(scene.material(b).unwrap().name, "KUNSTSTO.001");
        assert_eq!(scene.find_material("KUNSTSTOFF_PA6"), None);
    }

    #[test]
    fn test_insert_material_rejections() {
        let mut scene = Scene::new("test").with_material_capacity(1);

        assert_eq!(
            scene.insert_material(Material::new("  ", Vec3::ONE)),
            Err(MaterialCreationError::EmptyName)
        );
        assert!(matches!(
            scene.insert_material(Material::new("nan", Vec3::splat(f32::NAN))),
            Err(MaterialCreationError::InvalidParameters(_))
        ));
        assert!(scene.insert_material(Material::new("one", Vec3::ONE)).is_ok());
        assert!(matches!(
            scene.insert_material(Material::new("two", Vec3::ONE)),
            Err(MaterialCreationError::LibraryFull { capacity: 1, .. })
        ));
    }

    #[test]
    fn test_persist_writes_snapshot() {
        let dir = std::env::temp_dir().join(format!("plmx_scene_persist_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("asm.checkpoint.json");

        let mut scene = Scene::new("asm");
        let proto = scene.add_prototype("tri", triangle(), PathBuf::from("tri.obj"), false);
        let group = scene.add_group(
            None,
            "g",
            DMat4::IDENTITY,
            vec![("Nomenclature".to_string(), "BRACKET".to_string())],
        );
        scene.add_instance(Some(group), "i", proto, DMat4::IDENTITY);
        scene.persist(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let snapshot: SceneSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.prototypes[0].triangles, 1);
        assert_eq!(snapshot.nodes[0].metadata[0].1, "BRACKET");
        assert!(!path.with_extension("tmp").exists());

        fs::remove_dir_all(&dir).ok();
    }
}
