//! Material inference and deduplication.
//!
//! Source documents describe materials only through free-text table columns
//! (group, standard, number, treatment, term, body name). This module turns
//! those into PBR parameters and makes sure each distinct material exists
//! once in the target scene.
//!
//! # Example
//!
//! ```ignore
//! use plmx_core::material::{MaterialCache, MaterialSpec};
//!
//! let spec = MaterialSpec::new("STAHL", "20MnB4", "");
//! let record = cache.get_or_create(&spec, &mut scene, &mut ctx);
//! ```

mod cache;
mod infer;
mod spec;

pub use cache::*;
pub use infer::*;
pub use spec::*;
