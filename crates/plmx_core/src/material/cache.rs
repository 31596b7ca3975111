//! Session-wide material deduplication.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::infer::{infer, InferredMaterial, MaterialFamily};
use super::spec::{base_type, is_blank_name, MaterialSpec};
use crate::context::RunContext;
use crate::scene::{Material, MaterialId, SceneSink};

/// Name of the shared fallback material.
pub const DEFAULT_MATERIAL: &str = "Default";

/// Name used when a spec's group, term and number are all blank.
pub const UNNAMED_MATERIAL: &str = "Unnamed";

/// How close two materials must be to count as the same.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialTolerance {
    /// Per-channel base color difference
    pub color: f32,
    pub roughness: f32,
    pub metalness: f32,
}

impl Default for MaterialTolerance {
    fn default() -> Self {
        Self {
            color: 0.10,
            roughness: 0.15,
            metalness: 0.15,
        }
    }
}

impl MaterialTolerance {
    pub fn similar(&self, inferred: &InferredMaterial, material: &Material) -> bool {
        let dc = (inferred.base_color - material.diffuse_color).abs();
        dc.max_element() < self.color
            && (inferred.roughness - material.roughness).abs() < self.roughness
            && (inferred.metalness - material.metallic).abs() < self.metalness
    }
}

/// A material as the session knows it. Never changes once created.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialRecord {
    /// Name the material is stored under in the scene
    pub name: String,
    pub family: MaterialFamily,
    pub properties: InferredMaterial,
    pub material: MaterialId,
}

pub type MaterialRef = Arc<MaterialRecord>;

/// Maps material names to scene materials for the length of a run.
///
/// Lookup order, first hit wins:
///
/// 1. a scene material with exactly the sanitized name
/// 2. a record this session created or adopted under that name
/// 3. a scene material with the same base type whose parameters are within
///    tolerance
/// 4. a newly created scene material
#[derive(Debug, Default)]
pub struct MaterialCache {
    tolerance: MaterialTolerance,
    by_name: HashMap<String, MaterialRef>,
    by_material: HashMap<MaterialId, MaterialRef>,
}

impl MaterialCache {
    pub fn new(tolerance: MaterialTolerance) -> Self {
        Self {
            tolerance,
            ..Default::default()
        }
    }

    /// Distinct scene materials this session has handed out.
    pub fn len(&self) -> usize {
        self.by_material.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_material.is_empty()
    }

    /// Resolve a spec to a scene material, creating it if nothing fits.
    ///
    /// Returns `None` only if the scene refuses both the material and the
    /// shared default.
    pub fn get_or_create<S: SceneSink + ?Sized>(
        &mut self,
        spec: &MaterialSpec,
        scene: &mut S,
        ctx: &mut RunContext,
    ) -> Option<MaterialRef> {
        let name = match spec.material_name() {
            name if is_blank_name(&name) => UNNAMED_MATERIAL.to_string(),
            name => name,
        };
        let inferred = infer(spec, ctx);

        if let Some(record) = self.lookup(&name, &inferred, scene) {
            ctx.stats.materials_reused += 1;
            return Some(record);
        }

        match scene.insert_material(inferred.to_material(&name)) {
            Ok(id) => {
                ctx.stats.materials_created += 1;
                let record = self.remember(&name, inferred, id, scene);
                log::debug!("Created material '{}' ({})", record.name, record.family);
                Some(record)
            }
            Err(err) => {
                log::warn!("Material '{name}' rejected: {err}, falling back to '{DEFAULT_MATERIAL}'");
                self.default_material(scene, ctx)
            }
        }
    }

    fn lookup<S: SceneSink + ?Sized>(
        &mut self,
        name: &str,
        inferred: &InferredMaterial,
        scene: &S,
    ) -> Option<MaterialRef> {
        if let Some(id) = scene.find_material(name) {
            let record = self.adopt(id, inferred.family, scene)?;
            self.by_name.insert(name.to_string(), record.clone());
            return Some(record);
        }

        if let Some(record) = self.by_name.get(name) {
            return Some(record.clone());
        }

        let base = base_type(name);
        let candidate = scene.material_ids().into_iter().find(|&id| {
            scene.material(id).is_some_and(|m| {
                base_type(&m.name) == base && self.tolerance.similar(inferred, m)
            })
        })?;
        let record = self.adopt(candidate, inferred.family, scene)?;
        log::debug!("Material '{name}' matches existing '{}'", record.name);
        self.by_name.insert(name.to_string(), record.clone());
        Some(record)
    }

    /// Record for a material already in the scene.
    fn adopt<S: SceneSink + ?Sized>(
        &mut self,
        id: MaterialId,
        family: MaterialFamily,
        scene: &S,
    ) -> Option<MaterialRef> {
        if let Some(record) = self.by_material.get(&id) {
            return Some(record.clone());
        }
        let material = scene.material(id)?;
        let record = Arc::new(MaterialRecord {
            name: material.name.clone(),
            family,
            properties: InferredMaterial::from_material(family, material),
            material: id,
        });
        self.by_material.insert(id, record.clone());
        Some(record)
    }

    fn remember<S: SceneSink + ?Sized>(
        &mut self,
        name: &str,
        properties: InferredMaterial,
        id: MaterialId,
        scene: &S,
    ) -> MaterialRef {
        let stored = scene
            .material(id)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| name.to_string());
        let record = Arc::new(MaterialRecord {
            name: stored,
            family: properties.family,
            properties,
            material: id,
        });
        self.by_name.insert(name.to_string(), record.clone());
        self.by_material.insert(id, record.clone());
        record
    }

    /// The shared fallback material, created on first use.
    fn default_material<S: SceneSink + ?Sized>(
        &mut self,
        scene: &mut S,
        ctx: &mut RunContext,
    ) -> Option<MaterialRef> {
        let fallback = InferredMaterial::default();
        if let Some(record) = self.lookup(DEFAULT_MATERIAL, &fallback, scene) {
            ctx.stats.materials_reused += 1;
            return Some(record);
        }

        match scene.insert_material(fallback.to_material(DEFAULT_MATERIAL)) {
            Ok(id) => {
                ctx.stats.materials_created += 1;
                Some(self.remember(DEFAULT_MATERIAL, fallback, id, scene))
            }
            Err(err) => {
                log::warn!("Default material rejected: {err}, material binding skipped");
                None
            }
        }
    }
}
