//! The single directory every file of a run is resolved against.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Working directory for one run: source document, referenced geometry,
/// proxy artifacts, checkpoints and the log file all live relative to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Use `root` without checking it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Use `root` after verifying it is an accessible directory.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let meta = fs::metadata(&root)?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        // Check readability so a locked directory fails here and not mid-run.
        fs::read_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path as written in a document. Absolute paths are kept;
    /// Windows separators in relative paths are accepted.
    pub fn resolve(&self, location: impl AsRef<Path>) -> PathBuf {
        let location = location.as_ref();
        if location.is_absolute() {
            return location.to_path_buf();
        }
        let normalized: PathBuf = location
            .to_string_lossy()
            .split(['/', '\\'])
            .filter(|part| !part.is_empty() && *part != ".")
            .collect();
        self.root.join(normalized)
    }

    /// Path of a file the run writes into the directory.
    pub fn artifact(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_and_absolute() {
        let wd = WorkDir::new("/data/run");

        assert_eq!(wd.resolve("geo/a.obj"), PathBuf::from("/data/run/geo/a.obj"));
        assert_eq!(wd.resolve("geo\\sub\\b.jt"), PathBuf::from("/data/run/geo/sub/b.jt"));
        assert_eq!(wd.resolve("./c.obj"), PathBuf::from("/data/run/c.obj"));
        assert_eq!(wd.resolve("/abs/d.obj"), PathBuf::from("/abs/d.obj"));
    }

    #[test]
    fn test_open_rejects_missing_and_files() {
        let dir = std::env::temp_dir().join(format!("plmx_workdir_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("f.txt");
        fs::write(&file, "x").unwrap();

        assert!(WorkDir::open(&dir).is_ok());
        assert!(WorkDir::open(&file).is_err());
        assert!(WorkDir::open(dir.join("missing")).is_err());

        fs::remove_dir_all(&dir).ok();
    }
}
