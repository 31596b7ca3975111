//! Hierarchy driver: walks a resolved document into a target scene.
//!
//! Instances become group nodes carrying their converted local transform and
//! metadata, Parts contribute their geometry and child instances to the
//! enclosing group, and every GeometryRef becomes an instance of a shared
//! prototype with an inferred material bound to it. Nothing in a single
//! subtree can abort the walk: unresolved references and cycles are skipped
//! with a warning, missing geometry turns into placeholders, and rejected
//! materials fall back to the default.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use plmx_math::{DMat4, TransformComposer};

use crate::context::{RunContext, RunStats};
use crate::geometry::GeometryCache;
use crate::material::{MaterialCache, MaterialSpec, MaterialTolerance};
use crate::plmxml::{Document, GeometryRef, GraphNode, Instance, NodeId, Part, SourceTransform};
use crate::scene::{SceneNodeId, SceneSink};

/// Tuning for one conversion.
#[derive(Clone, Debug)]
pub struct ConvertSettings {
    pub composer: TransformComposer,
    pub tolerance: MaterialTolerance,
    /// Flush the scene every N GeometryRefs (0 disables)
    pub flush_interval: usize,
    /// Persist a checkpoint every N GeometryRefs (0 disables)
    pub checkpoint_interval: usize,
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for ConvertSettings {
    fn default() -> Self {
        Self {
            composer: TransformComposer::default(),
            tolerance: MaterialTolerance::default(),
            flush_interval: 25,
            checkpoint_interval: 100,
            checkpoint_path: None,
        }
    }
}

/// What a finished conversion reports back.
#[derive(Clone, Debug, Default)]
pub struct ConvertReport {
    pub stats: RunStats,
    pub unknown_keywords: Vec<String>,
    /// True if the stop flag ended the walk early
    pub cancelled: bool,
}

/// Drives one document into one scene.
pub struct Converter<'a, S: SceneSink + ?Sized> {
    doc: &'a Document,
    sink: &'a mut S,
    geometry: GeometryCache<'a>,
    materials: MaterialCache,
    settings: ConvertSettings,
    stop: Option<&'a AtomicBool>,
    ctx: RunContext,
    /// Nodes on the current recursion path, for cycle detection
    path: Vec<NodeId>,
    geometry_visits: usize,
    cancelled: bool,
}

impl<'a, S: SceneSink + ?Sized> Converter<'a, S> {
    pub fn new(
        doc: &'a Document,
        sink: &'a mut S,
        geometry: GeometryCache<'a>,
        settings: ConvertSettings,
    ) -> Self {
        Self {
            doc,
            sink,
            geometry,
            materials: MaterialCache::new(settings.tolerance),
            settings,
            stop: None,
            ctx: RunContext::new(),
            path: Vec::new(),
            geometry_visits: 0,
            cancelled: false,
        }
    }

    /// Check `flag` between nodes and stop the walk once it is set.
    pub fn with_stop_flag(mut self, flag: &'a AtomicBool) -> Self {
        self.stop = Some(flag);
        self
    }

    /// Convert every declared root.
    pub fn run(mut self) -> ConvertReport {
        let doc = self.doc;
        log::info!(
            "Converting {} root(s), {} nodes",
            doc.roots.len(),
            doc.node_count()
        );

        self.note_unresolved("InstanceGraph", "rootRefs", &doc.root_refs, doc.roots.len());
        for &root in &doc.roots {
            self.visit(root, None);
        }

        self.sink.flush();
        self.checkpoint();

        let mut stats = self.ctx.stats.clone();
        stats.unique_geometry = self.geometry.len();
        stats.placeholders = self.geometry.placeholder_count();

        log::info!(
            "Converted {} geometry reference(s) into {} prototype(s), {} placeholder(s), \
             {} material(s) created, {} reused, {} polygons, {:.0}% memory saved",
            stats.files_processed,
            stats.unique_geometry,
            stats.placeholders,
            stats.materials_created,
            stats.materials_reused,
            stats.total_polygons,
            stats.memory_saved() * 100.0
        );
        self.ctx.report_unknown();

        ConvertReport {
            stats,
            unknown_keywords: self.ctx.unknown_keywords.iter().cloned().collect(),
            cancelled: self.cancelled,
        }
    }

    fn should_stop(&mut self) -> bool {
        if self.cancelled {
            return true;
        }
        if self.stop.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            log::warn!("Stop requested, ending conversion early");
            self.cancelled = true;
        }
        self.cancelled
    }

    fn visit(&mut self, id: NodeId, parent: Option<SceneNodeId>) {
        if self.should_stop() {
            return;
        }
        let doc = self.doc;
        let node = doc.node(id);

        if self.path.contains(&id) {
            log::warn!("Reference cycle through '{}', skipping repeated subtree", node.id());
            self.ctx.stats.skipped_subtrees += 1;
            return;
        }

        self.path.push(id);
        match node {
            GraphNode::Instance(inst) => self.visit_instance(node, inst, parent),
            GraphNode::Part(part) => {
                // A Part reached without an enclosing Instance gets its own group.
                let parent = match parent {
                    Some(parent) => parent,
                    None => self.add_group(node, None, None),
                };
                self.visit_part(part, parent);
            }
            GraphNode::GeometryRef(geom) => self.visit_geometry(geom, None, parent),
        }
        self.path.pop();
    }

    fn visit_instance(&mut self, node: &'a GraphNode, inst: &'a Instance, parent: Option<SceneNodeId>) {
        let group = self.add_group(node, inst.transform.as_ref(), parent);

        self.note_unresolved(&inst.id, "partRef", &inst.part_ref, inst.parts.len());
        self.note_unresolved(&inst.id, "instanceRefs", &inst.instance_refs, inst.children.len());

        for &part in &inst.parts {
            self.visit(part, Some(group));
        }
        for &child in &inst.children {
            self.visit(child, Some(group));
        }
    }

    fn visit_part(&mut self, part: &'a Part, parent: SceneNodeId) {
        let doc = self.doc;
        self.note_unresolved(&part.id, "instanceRefs", &part.instance_refs, part.children.len());

        for &rep in &part.representations {
            if self.should_stop() {
                return;
            }
            if let Some(geom) = doc.geometry(rep) {
                self.visit_geometry(geom, Some(part), Some(parent));
            }
        }
        for &child in &part.children {
            self.visit(child, Some(parent));
        }
    }

    fn visit_geometry(&mut self, geom: &'a GeometryRef, part: Option<&'a Part>, parent: Option<SceneNodeId>) {
        if geom.location.trim().is_empty() {
            log::warn!("GeometryRef '{}' has no location, skipping", geom.id);
            self.ctx.stats.skipped_subtrees += 1;
            return;
        }

        let handle = self.geometry.get_or_load(&geom.location, &mut *self.sink);
        self.ctx.stats.files_processed += 1;

        let name = geom.name.as_deref().unwrap_or(&geom.id);
        let local = self.local_transform(geom.transform.as_ref());
        let node = self
            .geometry
            .create_instance(&handle, parent, name, local, &mut *self.sink);
        self.ctx.stats.instances += 1;
        self.ctx.stats.total_polygons += self.sink.polygon_count(node);

        // Geometry without its own table inherits the Part's.
        let table = geom
            .table
            .as_ref()
            .or_else(|| part.and_then(|p| p.table.as_ref()));
        if let Some(spec) = table.and_then(MaterialSpec::from_table) {
            if let Some(record) = self
                .materials
                .get_or_create(&spec, &mut *self.sink, &mut self.ctx)
            {
                self.sink.bind_material(node, record.material);
            }
        }

        self.geometry_visits += 1;
        let flush = self.settings.flush_interval;
        if flush > 0 && self.geometry_visits % flush == 0 {
            self.sink.flush();
            log::info!(
                "Processed {} geometry reference(s), {} unique",
                self.geometry_visits,
                self.geometry.len()
            );
        }
        let checkpoint = self.settings.checkpoint_interval;
        if checkpoint > 0 && self.geometry_visits % checkpoint == 0 {
            self.checkpoint();
        }
    }

    fn add_group(
        &mut self,
        node: &GraphNode,
        transform: Option<&SourceTransform>,
        parent: Option<SceneNodeId>,
    ) -> SceneNodeId {
        let name = display_name(node);
        let local = self.local_transform(transform);
        let mut metadata = node.metadata();
        if let GraphNode::Instance(inst) = node {
            if inst.quantity != 1 {
                metadata.push(("Quantity".to_string(), inst.quantity.to_string()));
            }
        }
        self.ctx.stats.groups += 1;
        self.sink.add_group(parent, name, local, metadata)
    }

    fn local_transform(&self, transform: Option<&SourceTransform>) -> DMat4 {
        transform
            .map(|t| self.settings.composer.convert(&t.matrix))
            .unwrap_or(DMat4::IDENTITY)
    }

    /// Count references the resolver dropped as skipped subtrees.
    fn note_unresolved(&mut self, owner: &str, attribute: &str, raw: &str, resolved: usize) {
        let declared = raw.split_whitespace().count();
        if declared > resolved {
            log::warn!(
                "{owner}: {} of {declared} {attribute} unresolved, skipping those subtrees",
                declared - resolved
            );
            self.ctx.stats.skipped_subtrees += declared - resolved;
        }
    }

    fn checkpoint(&mut self) {
        let Some(path) = &self.settings.checkpoint_path else {
            return;
        };
        match self.sink.persist(path) {
            Ok(()) => log::debug!("Checkpoint written to {}", path.display()),
            Err(err) => log::warn!("Checkpoint {} failed: {err}", path.display()),
        }
    }
}

/// Nomenclature, then name, then ID.
fn display_name(node: &GraphNode) -> &str {
    if let Some(nomenclature) = node.nomenclature() {
        return nomenclature;
    }
    let name = match node {
        GraphNode::Instance(i) => i.name.as_deref(),
        GraphNode::Part(p) => p.name.as_deref(),
        GraphNode::GeometryRef(g) => g.name.as_deref(),
    };
    name.unwrap_or(node.id())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use plmx_math::{DVec3, UpAxis};

    use super::*;
    use crate::geometry::{GeometryLoader, GeometryResult, MeshLoader};
    use crate::mesh::Mesh;
    use crate::plmxml::parse_plmxml;
    use crate::scene::{Scene, SceneNodeKind};
    use crate::workdir::WorkDir;

    const CUBE_OBJ: &str = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nv 0 0 1\nv 1 0 1\nv 1 1 1\nv 0 1 1\n\
        f 1 3 2\nf 1 4 3\nf 5 6 7\nf 5 7 8\nf 1 2 6\nf 1 6 5\n\
        f 4 7 3\nf 4 8 7\nf 1 5 8\nf 1 8 4\nf 2 3 7\nf 2 7 6\n";

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("plmx_convert_{name}_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn convert(doc: &Document, scene: &mut Scene, dir: &Path, settings: ConvertSettings) -> ConvertReport {
        let _ = env_logger::builder().is_test(true).try_init();
        let geometry = GeometryCache::new(WorkDir::new(dir), &MeshLoader);
        Converter::new(doc, scene, geometry, settings).run()
    }

    /// One root, a sub-assembly with two instances of the same part.
    const SHARED_PART: &str = r#"<PLMXML><ProductDef><InstanceGraph rootRefs="i1">
        <Instance id="i1" partRef="asm">
          <UserData type="AttributesInContext"><UserValue title="Nomenclature" value="FRAME"/></UserData>
        </Instance>
        <Part id="asm" instanceRefs="i2 i3"/>
        <Instance id="i2" partRef="bolt">
          <Transform>1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1</Transform>
        </Instance>
        <Instance id="i3" partRef="bolt">
          <Transform>1 0 0 0 0 1 0 0 0 0 1 0 5 0 0 1</Transform>
        </Instance>
        <Part id="bolt">
          <Representation><CompoundRep id="g" location="cube.obj" name="bolt_body"/></Representation>
          <TableAttribute><Row><Column col="0" value="STAHL"/><Column col="7" value="20MnB4"/></Row></TableAttribute>
        </Part>
    </InstanceGraph></ProductDef></PLMXML>"#;

    #[test]
    fn test_shared_geometry_is_instanced() {
        let dir = temp_dir("shared");
        fs::write(dir.join("cube.obj"), CUBE_OBJ).unwrap();
        let doc = parse_plmxml(SHARED_PART).unwrap();
        let mut scene = Scene::new("asm");

        let report = convert(&doc, &mut scene, &dir, ConvertSettings::default());

        assert_eq!(report.stats.files_processed, 2);
        assert_eq!(report.stats.unique_geometry, 1);
        assert!((report.stats.memory_saved() - 0.5).abs() < 1e-12);
        assert_eq!(scene.prototype_count(), 1);
        assert_eq!(scene.instance_count(), 2);
        assert_eq!(report.stats.total_polygons, 24);
        assert_eq!(scene.total_triangle_count(), 24);

        // Three Instances, each a group.
        assert_eq!(scene.group_count(), 3);
        assert_eq!(scene.node(scene.roots()[0]).unwrap().name, "FRAME");

        let bodies = scene.instances_of(0);
        let x: Vec<f64> = bodies
            .iter()
            .map(|&n| scene.world_transform(n).w_axis.x)
            .collect();
        assert_eq!(x, vec![0.0, 5.0]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_materials_bound_to_mesh_nodes_only() {
        let dir = temp_dir("materials");
        fs::write(dir.join("cube.obj"), CUBE_OBJ).unwrap();
        let doc = parse_plmxml(SHARED_PART).unwrap();
        let mut scene = Scene::new("asm");

        let report = convert(&doc, &mut scene, &dir, ConvertSettings::default());

        assert_eq!(scene.material_count(), 1);
        assert_eq!(report.stats.materials_created, 1);
        assert_eq!(report.stats.materials_reused, 1);
        for i in 0..scene.node_count() {
            let node = scene.node(SceneNodeId(i)).unwrap();
            match node.kind {
                SceneNodeKind::Instance { material, .. } => assert!(material.is_some()),
                SceneNodeKind::Group { .. } => assert_eq!(node.material(), None),
            }
        }

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_second_pass_reuses_every_material() {
        let dir = temp_dir("second_pass");
        fs::write(dir.join("cube.obj"), CUBE_OBJ).unwrap();
        let doc = parse_plmxml(SHARED_PART).unwrap();
        let mut scene = Scene::new("asm");

        let first = convert(&doc, &mut scene, &dir, ConvertSettings::default());
        let second = convert(&doc, &mut scene, &dir, ConvertSettings::default());

        assert_eq!(first.stats.materials_created, 1);
        assert_eq!(second.stats.materials_created, 0);
        assert_eq!(second.stats.materials_reused, 2);
        assert_eq!(scene.material_count(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_geometry_completes_with_placeholder() {
        let dir = temp_dir("missing");
        let xml = r#"<PLMXML><ProductDef><InstanceGraph rootRefs="i1">
            <Instance id="i1" partRef="p1"/>
            <Part id="p1"><Representation id="r" location="absent.jt"/></Part>
        </InstanceGraph></ProductDef></PLMXML>"#;
        let doc = parse_plmxml(xml).unwrap();
        let mut scene = Scene::new("asm");

        let report = convert(&doc, &mut scene, &dir, ConvertSettings::default());

        assert_eq!(report.stats.files_processed, 1);
        assert_eq!(report.stats.placeholders, 1);
        assert_eq!(scene.instance_count(), 1);
        assert_eq!(scene.prototypes[0].name, "MISSING_absent.jt");
        assert!(!report.cancelled);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unresolved_and_cyclic_subtrees_are_skipped() {
        let dir = temp_dir("skips");
        let xml = r#"<PLMXML><ProductDef><InstanceGraph rootRefs="i1">
            <Instance id="i1" partRef="p1 ghost"/>
            <Part id="p1" instanceRefs="i2"/>
            <Instance id="i2" partRef="p1"/>
        </InstanceGraph></ProductDef></PLMXML>"#;
        let doc = parse_plmxml(xml).unwrap();
        let mut scene = Scene::new("asm");

        let report = convert(&doc, &mut scene, &dir, ConvertSettings::default());

        // "ghost" is dangling; p1 -> i2 -> p1 closes a cycle.
        assert_eq!(report.stats.skipped_subtrees, 2);
        assert_eq!(scene.group_count(), 2);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_root_part_gets_own_group() {
        let dir = temp_dir("root_part");
        let xml = r#"<PLMXML><ProductDef><InstanceGraph rootRefs="p1">
            <Part id="p1" name="Bracket"><Representation id="r" location="gone.obj"/></Part>
        </InstanceGraph></ProductDef></PLMXML>"#;
        let doc = parse_plmxml(xml).unwrap();
        let mut scene = Scene::new("asm");

        convert(&doc, &mut scene, &dir, ConvertSettings::default());

        let root = scene.node(scene.roots()[0]).unwrap();
        assert_eq!(root.name, "Bracket");
        assert!(!root.is_instance());
        assert_eq!(root.children.len(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_transforms_converted_to_target_axes() {
        let dir = temp_dir("axes");
        let xml = r#"<PLMXML><ProductDef><InstanceGraph rootRefs="i1">
            <Instance id="i1" partRef="p1">
              <Transform>1 0 0 0 0 1 0 0 0 0 1 0 0 0 2 1</Transform>
            </Instance>
            <Part id="p1"/>
        </InstanceGraph></ProductDef></PLMXML>"#;
        let doc = parse_plmxml(xml).unwrap();
        let mut scene = Scene::new("asm");
        let settings = ConvertSettings {
            composer: TransformComposer::new(100.0, UpAxis::Y),
            ..Default::default()
        };

        convert(&doc, &mut scene, &dir, settings);

        // Source +Z two meters up becomes +Y, in centimeters.
        let t = scene.world_transform(scene.roots()[0]).w_axis.truncate();
        assert!((t - DVec3::new(0.0, 200.0, 0.0)).length() < 1e-9);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_flush_and_checkpoint_intervals() {
        let dir = temp_dir("checkpoint");
        let doc = parse_plmxml(SHARED_PART).unwrap();
        let mut scene = Scene::new("asm");
        let checkpoint = dir.join("asm.checkpoint.json");
        let settings = ConvertSettings {
            flush_interval: 1,
            checkpoint_interval: 1,
            checkpoint_path: Some(checkpoint.clone()),
            ..Default::default()
        };

        convert(&doc, &mut scene, &dir, settings);

        // One flush per GeometryRef plus the final one.
        assert_eq!(scene.flush_count(), 3);
        assert!(checkpoint.is_file());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_failed_checkpoint_does_not_stop_walk() {
        let dir = temp_dir("badcheckpoint");
        let doc = parse_plmxml(SHARED_PART).unwrap();
        let mut scene = Scene::new("asm");
        let checkpoint = dir.join("no_such_dir").join("asm.checkpoint.json");
        let settings = ConvertSettings {
            checkpoint_interval: 1,
            checkpoint_path: Some(checkpoint.clone()),
            ..Default::default()
        };

        let report = convert(&doc, &mut scene, &dir, settings);

        assert!(!report.cancelled);
        assert_eq!(report.stats.files_processed, 2);
        assert_eq!(report.stats.instances, 2);
        assert_eq!(scene.instance_count(), 2);
        assert!(!checkpoint.exists());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_stop_flag_halts_walk() {
        let dir = temp_dir("stop");
        let doc = parse_plmxml(SHARED_PART).unwrap();
        let mut scene = Scene::new("asm");
        let stop = AtomicBool::new(true);
        let geometry = GeometryCache::new(WorkDir::new(&dir), &MeshLoader);

        let report = Converter::new(&doc, &mut scene, geometry, ConvertSettings::default())
            .with_stop_flag(&stop)
            .run();

        assert!(report.cancelled);
        assert_eq!(scene.node_count(), 0);
        assert_eq!(report.stats.files_processed, 0);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_geometry_table_overrides_part_table() {
        struct Triangle;
        impl GeometryLoader for Triangle {
            fn load(&self, _path: &Path) -> GeometryResult<Mesh> {
                Ok(Mesh::new(
                    vec![plmx_math::Vec3::ZERO, plmx_math::Vec3::X, plmx_math::Vec3::Y],
                    vec![0, 1, 2],
                    None,
                ))
            }
        }

        let dir = temp_dir("tables");
        fs::write(dir.join("a.bin"), "").unwrap();
        fs::write(dir.join("b.bin"), "").unwrap();
        let xml = r#"<PLMXML><ProductDef><InstanceGraph rootRefs="p">
            <Part id="p">
              <TableAttribute><Row><Column col="0" value="GUMMI"/></Row></TableAttribute>
              <Representation>
                <CompoundRep id="a" location="a.bin"/>
                <CompoundRep id="b" location="b.bin">
                  <TableAttribute><Row><Column col="0" value="GLAS"/></Row></TableAttribute>
                </CompoundRep>
              </Representation>
            </Part>
        </InstanceGraph></ProductDef></PLMXML>"#;
        let doc = parse_plmxml(xml).unwrap();
        let mut scene = Scene::new("asm");
        let geometry = GeometryCache::new(WorkDir::new(&dir), &Triangle);

        Converter::new(&doc, &mut scene, geometry, ConvertSettings::default()).run();

        let material_of = |name: &str| {
            let id = scene.node(scene.find_node(name).unwrap()).unwrap().material().unwrap();
            scene.materials[id.0].name.clone()
        };
        assert_eq!(material_of("a"), "GUMMI_");
        assert_eq!(material_of("b"), "GLAS_");

        fs::remove_dir_all(&dir).ok();
    }
}
