//! PLMX Core - PLMXML assembly import into an instanced scene.
//!
//! This crate provides:
//!
//! - **Document model**: `plmxml` parses an assembly hierarchy with
//!   cross-references resolved into a node arena
//! - **Scene graph types**: `Scene`, `Prototype`, `SceneNode`, `Material`, `Mesh`
//! - **Geometry instancing**: each distinct geometry file is loaded once and
//!   shared by every node that references it
//! - **Material inference**: descriptive PLM material data becomes a small
//!   set of reusable shading materials
//!
//! # Example
//!
//! ```ignore
//! use plmx_core::{run, Config, JsonProxyExporter, MeshLoader, RunMode, RunRequest};
//!
//! let request = RunRequest {
//!     document: "assembly.xml".into(),
//!     working_dir: "/data/export".into(),
//!     mode: RunMode::Instance,
//!     output: None,
//! };
//! let outcome = run(&request, &Config::default(), &MeshLoader, &JsonProxyExporter::default())?;
//! println!("{} instances of {} prototypes",
//!     outcome.scene.instance_count(),
//!     outcome.scene.prototype_count());
//! ```

pub mod config;
pub mod context;
pub mod convert;
pub mod geometry;
pub mod material;
pub mod mesh;
pub mod plmxml;
pub mod run;
pub mod scene;
pub mod workdir;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use context::{RunContext, RunStats};
pub use convert::{ConvertReport, ConvertSettings, Converter};
pub use geometry::{GeometryCache, GeometryLoader, JsonProxyExporter, MeshLoader, ProxyExporter};
pub use material::{MaterialCache, MaterialSpec};
pub use mesh::Mesh;
pub use plmxml::{parse_plmxml, parse_plmxml_file, Document, ParseError};
pub use run::{run, run_with_stop, RunError, RunMode, RunOutcome, RunRequest, RunSummary};
pub use scene::{Material, Prototype, Scene, SceneNode, SceneSink};
pub use workdir::WorkDir;
