use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::loader::GeometryResult;
use crate::mesh::Mesh;

/// Current proxy file layout version.
pub const PROXY_VERSION: u32 = 1;

/// Serialises a loaded mesh into an artifact a renderer can reference.
pub trait ProxyExporter {
    /// Extension appended to the geometry base name, without the leading dot.
    fn extension(&self) -> &str;

    fn export(&self, mesh: &Mesh, target: &Path) -> GeometryResult<()>;
}

/// On-disk form of a JSON proxy.
#[derive(Serialize, Deserialize)]
pub(crate) struct ProxyFile {
    pub version: u32,
    pub mesh: Mesh,
}

/// Writes meshes as JSON proxies.
#[derive(Clone, Debug)]
pub struct JsonProxyExporter {
    extension: String,
}

impl Default for JsonProxyExporter {
    fn default() -> Self {
        Self::new("proxy.json")
    }
}

impl JsonProxyExporter {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }
}

impl ProxyExporter for JsonProxyExporter {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn export(&self, mesh: &Mesh, target: &Path) -> GeometryResult<()> {
        let mut writer = BufWriter::new(File::create(target)?);
        #[derive(Serialize)]
        struct Borrowed<'a> {
            version: u32,
            mesh: &'a Mesh,
        }
        serde_json::to_writer(
            &mut writer,
            &Borrowed {
                version: PROXY_VERSION,
                mesh,
            },
        )?;
        writer.flush()?;
        log::debug!("Wrote proxy {}", target.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::geometry::{GeometryLoader, MeshLoader};

    #[test]
    fn test_exported_proxy_loads_back() {
        let dir = std::env::temp_dir().join(format!("plmx_proxy_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let exporter = JsonProxyExporter::default();
        let target = dir.join(format!("box.{}", exporter.extension()));

        exporter.export(&Mesh::cuboid(0.5), &target).unwrap();
        let mesh = MeshLoader.load(&target).unwrap();

        assert_eq!(mesh.triangle_count(), 12);
        assert!((mesh.extent().x - 0.5).abs() < 1e-6);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_extension_strips_leading_dot() {
        assert_eq!(JsonProxyExporter::new(".rs.json").extension(), "rs.json");
    }
}
