//! Top-level entry point: one document, one working directory, one scene.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use plmx_math::Aabb;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::context::RunStats;
use crate::convert::Converter;
use crate::geometry::{GeometryCache, GeometryLoader, ProxyExporter};
use crate::plmxml::{parse_plmxml_file, Document, NodeKind, ParseError};
use crate::scene::Scene;
use crate::workdir::WorkDir;

/// The only failures a run reports to its caller.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Working directory {path} is not accessible: {source}")]
    WorkDir { path: PathBuf, source: io::Error },

    #[error("Failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: ParseError },

    #[error("Failed to serialize {path}: {source}")]
    Dump { path: PathBuf, source: serde_json::Error },

    #[error("Failed to write {path}: {source}")]
    Output { path: PathBuf, source: io::Error },
}

/// How geometry is brought into the scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Load geometry and reference it directly.
    #[default]
    Instance,
    /// Load geometry, write a proxy artifact next to the document and
    /// reference that.
    Proxy,
    /// Parse and print the hierarchy only.
    Outline,
    /// Parse and print the whole document model as JSON.
    Dump,
}

impl RunMode {
    /// True for modes that stop after parsing.
    pub fn is_listing(self) -> bool {
        matches!(self, RunMode::Outline | RunMode::Dump)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Instance => write!(f, "instance"),
            RunMode::Proxy => write!(f, "proxy"),
            RunMode::Outline => write!(f, "outline"),
            RunMode::Dump => write!(f, "dump"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunRequest {
    /// Source document, relative to the working directory or absolute
    pub document: PathBuf,
    pub working_dir: PathBuf,
    pub mode: RunMode,
    /// Write the listing (or the summary JSON) to this file, relative to the
    /// working directory
    pub output: Option<PathBuf>,
}

/// Statistics block of a finished run.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub document: PathBuf,
    pub mode: RunMode,
    pub nodes: usize,
    pub instance_nodes: usize,
    pub part_nodes: usize,
    pub geometry_refs: usize,
    pub dangling_refs: usize,
    #[serde(flatten)]
    pub stats: RunStats,
    pub memory_saved: f64,
    pub unknown_keywords: Vec<String>,
    pub cancelled: bool,
    /// World-space box around every placed instance, if any
    pub bounds: Option<Aabb>,
}

impl RunSummary {
    fn new(document: PathBuf, mode: RunMode, doc: &Document) -> Self {
        Self {
            document,
            mode,
            nodes: doc.node_count(),
            instance_nodes: doc.count(NodeKind::Instance),
            part_nodes: doc.count(NodeKind::Part),
            geometry_refs: doc.count(NodeKind::GeometryRef),
            dangling_refs: doc.dangling_refs(),
            stats: RunStats::default(),
            memory_saved: 0.0,
            unknown_keywords: Vec::new(),
            cancelled: false,
            bounds: None,
        }
    }
}

pub struct RunOutcome {
    pub scene: Scene,
    pub summary: RunSummary,
    /// Outline text or JSON dump, filled in the listing modes
    pub listing: Option<String>,
    /// Where `output` ended up, if requested
    pub written: Option<PathBuf>,
}

/// Convert a document into a fresh scene.
pub fn run(
    request: &RunRequest,
    config: &Config,
    loader: &dyn GeometryLoader,
    exporter: &dyn ProxyExporter,
) -> Result<RunOutcome, RunError> {
    run_with_stop(request, config, loader, exporter, None)
}

/// Like [`run`], checking `stop` between nodes.
pub fn run_with_stop(
    request: &RunRequest,
    config: &Config,
    loader: &dyn GeometryLoader,
    exporter: &dyn ProxyExporter,
    stop: Option<&AtomicBool>,
) -> Result<RunOutcome, RunError> {
    let workdir = WorkDir::open(&request.working_dir).map_err(|source| RunError::WorkDir {
        path: request.working_dir.clone(),
        source,
    })?;

    let path = workdir.resolve(&request.document);
    let doc = parse_plmxml_file(&path).map_err(|source| RunError::Parse {
        path: path.clone(),
        source,
    })?;
    let stem = document_stem(&path);
    log::info!(
        "Parsed {}: {} nodes, {} roots, {} dangling reference(s)",
        path.display(),
        doc.node_count(),
        doc.roots.len(),
        doc.dangling_refs()
    );

    let mut summary = RunSummary::new(path.clone(), request.mode, &doc);
    let mut scene = Scene::new(stem.clone());

    if request.mode.is_listing() {
        let listing = match request.mode {
            RunMode::Dump => doc.to_json().map_err(|source| RunError::Dump { path, source })?,
            _ => doc.outline(),
        };
        let written = write_output(&workdir, request.output.as_deref(), &listing)?;
        return Ok(RunOutcome {
            scene,
            summary,
            listing: Some(listing),
            written,
        });
    }

    let mut geometry = GeometryCache::new(workdir.clone(), loader).with_placeholder_size(config.placeholder_size);
    if request.mode == RunMode::Proxy {
        geometry = geometry.with_exporter(exporter);
    }
    let checkpoint = workdir.artifact(&format!("{stem}.checkpoint.json"));
    let settings = config.convert_settings(Some(checkpoint));

    let mut converter = Converter::new(&doc, &mut scene, geometry, settings);
    if let Some(flag) = stop {
        converter = converter.with_stop_flag(flag);
    }
    let report = converter.run();

    summary.memory_saved = report.stats.memory_saved();
    summary.stats = report.stats;
    summary.unknown_keywords = report.unknown_keywords;
    summary.cancelled = report.cancelled;
    let bounds = scene.world_bounds();
    summary.bounds = (!bounds.is_empty()).then_some(bounds);

    let written = match request.output.as_deref() {
        Some(output) => {
            let json = serde_json::to_string_pretty(&summary).map_err(|source| RunError::Dump {
                path: summary.document.clone(),
                source,
            })?;
            write_output(&workdir, Some(output), &json)?
        }
        None => None,
    };

    Ok(RunOutcome {
        scene,
        summary,
        listing: None,
        written,
    })
}

fn write_output(workdir: &WorkDir, output: Option<&Path>, contents: &str) -> Result<Option<PathBuf>, RunError> {
    let Some(output) = output else {
        return Ok(None);
    };
    let path = workdir.resolve(output);
    std::fs::write(&path, contents).map_err(|source| RunError::Output {
        path: path.clone(),
        source,
    })?;
    log::info!("Output written to {}", path.display());
    Ok(Some(path))
}

fn document_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scene".to_string())
}
