//! Fetch command - download a closure and write the archive.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use depclone::logging::{init_logging, LoggingGuard};
use depclone::{
    ArchiveStream, AuxiliaryPolicy, ConfigFile, DiskStorage, FetchRequest, FetchSession,
    MemoryStorage, PackageFile, ProgressEvent, Severity, Storage, WalkOptions,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use indicatif::HumanBytes;
use tempfile::TempDir;

use crate::error::CliError;
use crate::ui::EventRenderer;

/// Arguments for the fetch command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Modules to fetch, as `name` or `name@constraint`
    #[arg(
        value_name = "MODULE",
        required_unless_present = "package",
        conflicts_with = "package"
    )]
    pub modules: Vec<String>,

    /// Fetch the dependencies listed in a package.json instead
    #[arg(long, visible_alias = "pkg", value_name = "FILE")]
    pub package: Option<PathBuf>,

    /// Registry ecosystem (npm, pypi) [default: from config]
    #[arg(short, long)]
    pub ecosystem: Option<String>,

    /// Output file, or `-` for stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Compress the archive with gzip
    #[arg(long)]
    pub gzip: bool,

    /// Fetch only the named modules, not their dependencies
    #[arg(long)]
    pub no_deps: bool,

    /// Also fetch dev dependencies of the named modules (of the package
    /// file with --package)
    #[arg(long)]
    pub dev: bool,

    /// Also fetch @types companions (npm)
    #[arg(long)]
    pub types: bool,

    /// With --types, only fetch companions of the named modules
    #[arg(long, requires = "types")]
    pub top_level_types: bool,

    /// Keep fetched files in this directory instead of a temporary one
    #[arg(long, value_name = "DIR", conflicts_with = "memory")]
    pub root: Option<PathBuf>,

    /// Keep fetched files in memory
    #[arg(long)]
    pub memory: bool,

    /// Number of named modules fetched concurrently
    #[arg(long, value_name = "N")]
    pub fan_out: Option<usize>,

    /// Only show warnings and errors
    #[arg(short, long)]
    pub quiet: bool,
}

/// Run the fetch command.
pub fn run(args: FetchArgs) -> Result<(), CliError> {
    let config = ConfigFile::load()?;
    let _logging = start_logging(&config);

    let mut options = walk_options(&args, &config)?;
    let (requests, skipped) = match &args.package {
        Some(path) => {
            let file = read_package_file(path, options.include_dev_dependencies)?;
            // Dev dependencies were taken from the package file itself
            options.include_dev_dependencies = false;
            if file.requests.is_empty() {
                return Err(CliError::PackageFile {
                    path: path.clone(),
                    reason: "no dependencies to fetch".to_string(),
                });
            }
            (file.requests, file.skipped)
        }
        None => (parse_requests(&args.modules)?, Vec::new()),
    };
    let ecosystem = args
        .ecosystem
        .clone()
        .unwrap_or_else(|| config.fetch.ecosystem.to_string());

    // The scratch directory must outlive the session
    let (storage, _scratch) = storage_for(&args)?;

    let session = FetchSession::builder()
        .ecosystem(ecosystem)
        .storage(storage)
        .options(options)
        .client_config(config.client_config())
        .progress_threshold(config.fetch.progress_threshold_bytes)
        .build()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    runtime.block_on(fetch(session, requests, &skipped, &args))
}

async fn fetch(
    session: FetchSession,
    requests: Vec<FetchRequest>,
    skipped: &[String],
    args: &FetchArgs,
) -> Result<(), CliError> {
    let (mut events, cancel) = session.start_closure_fetch(requests);

    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || on_interrupt.cancel())
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let mut renderer = EventRenderer::new(args.quiet);
    for name in skipped {
        renderer.render(&ProgressEvent::Status {
            message: format!(
                "skipping {}: source-control dependencies are not supported",
                name
            ),
            severity: Severity::Info,
        });
    }
    while let Some(event) = events.recv().await {
        renderer.render(&event);
        match event {
            ProgressEvent::Complete { total_size, stream } => {
                let written = write_archive(stream, &args.output, args.gzip).await?;
                tracing::info!(total_size, written, output = %args.output.display(), "Archive written");
                if !is_stdout(&args.output) {
                    renderer.println(&summary(
                        total_size,
                        written,
                        &args.output,
                        renderer.warnings(),
                        renderer.errors(),
                    ));
                }
                return Ok(());
            }
            ProgressEvent::FatalError { message } => return Err(CliError::Fetch(message)),
            _ => {}
        }
    }

    if cancel.is_cancelled() {
        Err(CliError::Cancelled)
    } else {
        Err(CliError::Fetch("the fetch ended without an archive".to_string()))
    }
}

fn start_logging(config: &ConfigFile) -> Option<LoggingGuard> {
    match init_logging(config.log_level(), &config.log_directory()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: logging disabled: {}", e);
            None
        }
    }
}

fn parse_requests(modules: &[String]) -> Result<Vec<FetchRequest>, CliError> {
    modules
        .iter()
        .map(|module| module.parse().map_err(CliError::InvalidRequest))
        .collect()
}

fn read_package_file(path: &Path, include_dev: bool) -> Result<PackageFile, CliError> {
    let package_err = |reason: String| CliError::PackageFile {
        path: path.to_path_buf(),
        reason,
    };
    let bytes = std::fs::read(path).map_err(|e| package_err(e.to_string()))?;
    let file = PackageFile::parse(&bytes, include_dev).map_err(|e| package_err(e.to_string()))?;
    tracing::info!(
        path = %path.display(),
        requests = file.requests.len(),
        skipped = file.skipped.len(),
        "Read package file"
    );
    Ok(file)
}

/// Config values overridden by flags.
fn walk_options(args: &FetchArgs, config: &ConfigFile) -> Result<WalkOptions, CliError> {
    let mut options = config.walk_options();
    if args.no_deps {
        options.include_dependencies = false;
    }
    if args.dev {
        options.include_dev_dependencies = true;
    }
    if args.types {
        options.include_auxiliary_artifacts = true;
    }
    if args.top_level_types {
        options.auxiliary_policy = AuxiliaryPolicy::TopLevelOnly;
    }
    if let Some(fan_out) = args.fan_out {
        if fan_out == 0 {
            return Err(CliError::Config("--fan-out must be at least 1".to_string()));
        }
        options.fan_out = fan_out;
    }
    Ok(options)
}

/// Storage backend for the fetch, plus the temporary directory backing it
/// when neither `--root` nor `--memory` was given.
fn storage_for(args: &FetchArgs) -> Result<(Arc<dyn Storage>, Option<TempDir>), CliError> {
    if args.memory {
        return Ok((Arc::new(MemoryStorage::new()), None));
    }
    if let Some(root) = &args.root {
        return Ok((Arc::new(DiskStorage::new(root.clone())), None));
    }

    let scratch = tempfile::Builder::new()
        .prefix("depclone-")
        .tempdir()
        .map_err(|e| CliError::Config(format!("Failed to create scratch directory: {}", e)))?;
    let storage = DiskStorage::new(scratch.path());
    Ok((Arc::new(storage), Some(scratch)))
}

fn is_stdout(path: &Path) -> bool {
    path.as_os_str() == "-"
}

async fn write_archive(stream: ArchiveStream, output: &Path, gzip: bool) -> Result<u64, CliError> {
    let output_err = |source| CliError::Output {
        path: output.to_path_buf(),
        source,
    };

    if gzip {
        let bytes = stream.into_bytes();
        let target = output.to_path_buf();
        return tokio::task::spawn_blocking(move || write_gzip(&target, &bytes))
            .await
            .map_err(|e| output_err(std::io::Error::other(e)))?
            .map_err(output_err);
    }

    if is_stdout(output) {
        let mut stdout = tokio::io::stdout();
        return stream.write_to(&mut stdout).await.map_err(output_err);
    }

    let mut file = tokio::fs::File::create(output).await.map_err(output_err)?;
    let written = stream.write_to(&mut file).await.map_err(output_err)?;
    file.sync_all().await.map_err(output_err)?;
    Ok(written)
}

/// Gzip `bytes` into `output`. Returns the compressed size.
fn write_gzip(output: &Path, bytes: &[u8]) -> std::io::Result<u64> {
    let compressed = {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        encoder.finish()?
    };

    if is_stdout(output) {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&compressed)?;
        stdout.flush()?;
    } else {
        std::fs::write(output, &compressed)?;
    }
    Ok(compressed.len() as u64)
}

fn summary(total_size: u64, written: u64, output: &Path, warnings: usize, errors: usize) -> String {
    let mut line = format!(
        "Wrote {} ({} of files) to {}",
        HumanBytes(written),
        HumanBytes(total_size),
        output.display()
    );
    if warnings > 0 || errors > 0 {
        line.push_str(&format!(" with {} warning(s), {} error(s)", warnings, errors));
    }
    line
}
