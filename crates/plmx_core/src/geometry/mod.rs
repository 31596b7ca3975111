//! Geometry loading, proxy export and instancing.
//!
//! Each distinct geometry path is loaded once into the scene's prototype
//! area; every further reference becomes a lightweight instance node.

mod cache;
mod loader;
mod proxy;

pub use cache::*;
pub use loader::*;
pub use proxy::{JsonProxyExporter, ProxyExporter, PROXY_VERSION};
