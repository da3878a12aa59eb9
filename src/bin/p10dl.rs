use std::fs;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use dicom_p10_downloader::app::{self, DownloadOptions};
use dicom_p10_downloader::archive::Compression;
use dicom_p10_downloader::config::{ConfigLoader, ResolvedConfig};
use dicom_p10_downloader::dicomweb::DicomWebHttpClient;
use dicom_p10_downloader::domain::{DicomUid, valid_dicom_uid};
use dicom_p10_downloader::error::DownloadError;
use dicom_p10_downloader::output::{JsonOutput, OutputMode, TextOutput};
use dicom_p10_downloader::reference::ReferenceTree;

#[derive(Parser)]
#[command(name = "p10dl")]
#[command(about = "Download DICOM objects over DICOMweb into a single zip archive")]
#[command(version, author)]
struct Cli {
    /// Print machine readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Retrieve studies, series or instances and zip them")]
    Fetch(FetchArgs),
    #[command(about = "Print the reference tree that would be retrieved")]
    Tree(RefArgs),
}

#[derive(Args, Clone)]
struct RefArgs {
    /// StudyInstanceUID
    study: Option<DicomUid>,

    /// SeriesInstanceUID
    series: Option<String>,

    /// SOPInstanceUID
    instance: Option<String>,

    /// JSON reference tree, e.g. ["1.2", ["1.3", ["1.3.1", "1.3.2"]]]
    #[arg(long)]
    refs: Option<Utf8PathBuf>,
}

#[derive(Args, Clone)]
struct FetchArgs {
    #[command(flatten)]
    refs: RefArgs,

    #[arg(long)]
    config: Option<String>,

    /// Server name from the config file.
    #[arg(long)]
    server: Option<String>,

    /// Use this WADO-RS root instead of a configured server.
    #[arg(long)]
    wado_root: Option<String>,

    #[arg(long, short)]
    output: Option<Utf8PathBuf>,

    #[arg(long)]
    deflate: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<DownloadError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &DownloadError) -> u8 {
    if error.is_invalid_input() {
        return 2;
    }
    if error.is_transport() {
        return 3;
    }
    match error {
        DownloadError::MissingConfig | DownloadError::UnknownServer(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    match cli.command {
        Commands::Fetch(args) => run_fetch(args, output_mode),
        Commands::Tree(args) => {
            let tree = build_tree(&args)?;
            let printed = match output_mode {
                OutputMode::Json => JsonOutput::print_tree(&tree),
                OutputMode::Text => TextOutput::print_tree(&tree),
            };
            printed.into_diagnostic()
        }
    }
}

fn run_fetch(args: FetchArgs, output_mode: OutputMode) -> miette::Result<()> {
    let tree = build_tree(&args.refs)?;
    let (client, resolved) = resolve_client(&args)?;

    let output = args.output.clone().unwrap_or_else(|| {
        app::default_archive_path(resolved.as_ref().and_then(|config| config.output_dir.as_deref()))
    });
    let compression = if args.deflate {
        Compression::Deflated
    } else {
        Compression::Stored
    };
    let options = DownloadOptions::new(output)
        .with_compression(compression)
        .on_progress(|info| {
            tracing::info!(
                percent = info.percent,
                total = info.total,
                failures = info.failures,
                "progress"
            );
        });

    let handle = app::download_and_package(&client, &tree, options)?;
    let printed = match output_mode {
        OutputMode::Json => JsonOutput::print_archive(&handle),
        OutputMode::Text => TextOutput::print_archive(&handle),
    };
    printed.into_diagnostic()
}

fn resolve_client(
    args: &FetchArgs,
) -> miette::Result<(DicomWebHttpClient, Option<ResolvedConfig>)> {
    if let Some(root) = &args.wado_root {
        let resolved = ConfigLoader::resolve(args.config.as_deref(), args.server.as_deref()).ok();
        return Ok((DicomWebHttpClient::new(root)?, resolved));
    }
    let resolved = ConfigLoader::resolve(args.config.as_deref(), args.server.as_deref())?;
    tracing::debug!(
        schema_version = resolved.schema_version,
        server = resolved.server.name.as_deref(),
        wado_root = %resolved.server.wado_root,
        "resolved configuration"
    );
    let client = DicomWebHttpClient::from_server(&resolved.server)?;
    Ok((client, Some(resolved)))
}

fn build_tree(args: &RefArgs) -> miette::Result<ReferenceTree> {
    let mut tree = match &args.refs {
        Some(path) => {
            let content = fs::read_to_string(path.as_std_path()).into_diagnostic()?;
            let loaded = serde_json::from_str::<ReferenceTree>(&content).into_diagnostic()?;
            let tree = loaded.filtered(|id| valid_dicom_uid(Some(id)).is_some());
            if tree != loaded {
                tracing::warn!(refs = %path, "ignoring invalid UIDs in reference file");
            }
            tree
        }
        None => ReferenceTree::new(),
    };

    if let Some(study) = &args.study {
        let series = valid_dicom_uid(args.series.as_deref());
        let instance = valid_dicom_uid(args.instance.as_deref());
        if series.is_none() && args.series.is_some() {
            tracing::warn!(series = args.series.as_deref(), "ignoring invalid series UID");
        }
        if instance.is_none() && args.instance.is_some() {
            tracing::warn!(instance = args.instance.as_deref(), "ignoring invalid instance UID");
        }
        tree.insert(&[Some(study.as_str()), series, instance]);
    }

    if tree.is_empty() {
        return Err(DownloadError::NoValidReference.into());
    }
    Ok(tree)
}
