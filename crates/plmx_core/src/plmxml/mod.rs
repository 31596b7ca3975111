//! PLMXML support for PLMX.
//!
//! Parses the instance-graph vocabulary of a PLMXML session into a typed
//! node arena and links every ID reference once, before any traversal.
//!
//! ## Supported PLMXML Features
//!
//! - `Instance` / `Part` / `Representation` / `CompoundRep` graphs
//! - Row-major `Transform` matrices
//! - `UserData` metadata and column-indexed `TableAttribute` material tables
//! - `Relation` and `GeneralObject` (kept for the outline)
//!
//! ## Not Supported
//!
//! - Occurrence groups and product views
//! - Embedded geometry; only external file locations are followed
//!
//! # Example
//!
//! ```ignore
//! use plmx_core::plmxml::parse_plmxml_file;
//!
//! let document = parse_plmxml_file("assembly.plmxml".as_ref())?;
//! println!("{}", document.outline());
//! ```

mod outline;
mod parser;
mod resolver;
mod types;

pub use parser::*;
pub use resolver::ReferenceError;
pub use types::*;
