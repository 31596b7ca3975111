//! plmx - convert a PLMXML assembly into an instanced scene.

use std::fmt::Write as _;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use plmx_core::{run, Config, JsonProxyExporter, MeshLoader, RunMode, RunOutcome, RunRequest};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// Reference source geometry directly
    Instance,
    /// Write proxy artifacts into the working directory and reference those
    Proxy,
    /// Print the parsed hierarchy and stop
    Outline,
    /// Print the full document model as JSON and stop
    Dump,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Instance => RunMode::Instance,
            Mode::Proxy => RunMode::Proxy,
            Mode::Outline => RunMode::Outline,
            Mode::Dump => RunMode::Dump,
        }
    }
}

#[derive(Parser)]
#[command(name = "plmx")]
#[command(about = "Convert a PLMXML assembly into an instanced scene", long_about = None)]
struct Cli {
    /// PLMXML document, relative to the working directory
    document: PathBuf,

    /// Directory that geometry paths, artifacts and the log file resolve
    /// against (default: the document's directory)
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Mode::Instance)]
    mode: Mode,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scale applied to source translations (overrides the config file)
    #[arg(long)]
    unit_scale: Option<f64>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Write the outline, dump or summary JSON to this file in the working
    /// directory instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the log to this file in the working directory
    #[arg(long)]
    log_file: Option<String>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Working directory and document path relative to it.
    fn locate(&self) -> (PathBuf, PathBuf) {
        match &self.workdir {
            Some(dir) => (dir.clone(), self.document.clone()),
            None => {
                let dir = self
                    .document
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                let file = self
                    .document
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| self.document.clone());
                (dir, file)
            }
        }
    }

    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(scale) = self.unit_scale {
            config.unit_scale = scale;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(verbose: bool, log_path: Option<&Path>) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);

    if let Some(path) = log_path {
        match File::create(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(err) => eprintln!("Cannot open log file {}: {err}", path.display()),
        }
    }
    builder.init();
}

/// Everything the run prints on stdout. A listing (outline or dump) comes
/// first, then the summary as JSON or text.
fn render(outcome: &RunOutcome, json: bool) -> Result<String> {
    let summary = &outcome.summary;
    let mut out = String::new();

    if let Some(path) = &outcome.written {
        writeln!(out, "Output written to {}", path.display())?;
        if !json {
            return Ok(out);
        }
    } else if let Some(listing) = &outcome.listing {
        writeln!(out, "{listing}")?;
    }

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(summary)?)?;
        return Ok(out);
    }
    if outcome.listing.is_some() {
        return Ok(out);
    }

    let stats = &summary.stats;
    writeln!(out, "Document:          {}", summary.document.display())?;
    writeln!(out, "Mode:              {}", summary.mode)?;
    writeln!(out, "Geometry refs:     {}", stats.files_processed)?;
    writeln!(out, "Unique geometry:   {}", stats.unique_geometry)?;
    writeln!(out, "Placeholders:      {}", stats.placeholders)?;
    writeln!(out, "Memory saved:      {:.1}%", summary.memory_saved * 100.0)?;
    writeln!(out, "Groups:            {}", stats.groups)?;
    writeln!(out, "Instances:         {}", stats.instances)?;
    writeln!(out, "Materials created: {}", stats.materials_created)?;
    writeln!(out, "Materials reused:  {}", stats.materials_reused)?;
    writeln!(out, "Polygons:          {}", stats.total_polygons)?;
    writeln!(out, "Skipped subtrees:  {}", stats.skipped_subtrees)?;
    if let Some(bounds) = &summary.bounds {
        let extent = bounds.extent();
        writeln!(out, "Extent:            {:.3} x {:.3} x {:.3}", extent.x, extent.y, extent.z)?;
    }
    if summary.dangling_refs > 0 {
        writeln!(out, "Dangling refs:     {}", summary.dangling_refs)?;
    }
    if !summary.unknown_keywords.is_empty() {
        writeln!(out, "Unknown keywords:  {}", summary.unknown_keywords.join(", "))?;
    }
    if summary.cancelled {
        writeln!(out, "Run was cancelled before completion")?;
    }
    Ok(out)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let (working_dir, document) = cli.locate();

    let log_path = cli.log_file.as_deref().map(|name| working_dir.join(name));
    init_logging(cli.verbose, log_path.as_deref());

    let config = cli.config()?;
    let exporter = JsonProxyExporter::new(&config.proxy_extension);
    let request = RunRequest {
        document,
        working_dir,
        mode: cli.mode.into(),
        output: cli.output.clone(),
    };

    log::info!("Starting plmx ({} mode)", request.mode);
    match run(&request, &config, &MeshLoader, &exporter) {
        Ok(outcome) => {
            print!("{}", render(&outcome, cli.json)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            log::error!("{err}");
            eprintln!("Error: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
