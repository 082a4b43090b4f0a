use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::error;
use tracing_subscriber::EnvFilter;

use pipeline_archiver::app::{Archiver, CompletionEvent};
use pipeline_archiver::blob::BlobRestStore;
use pipeline_archiver::config::ConfigLoader;
use pipeline_archiver::domain::AnalysisId;
use pipeline_archiver::error::ArchiverError;
use pipeline_archiver::fields::StandardFields;
use pipeline_archiver::metadata::MetadataHttpClient;
use pipeline_archiver::output::JsonOutput;

#[derive(Parser)]
#[command(name = "pipeline-archiver")]
#[command(about = "Archive finished pipeline executions into the LIMS and clean up cluster storage")]
#[command(version, author)]
struct Cli {
    /// Path to pipeline-archiver.json
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Verify staged copies and finish executions whose copies are done")]
    Poll,
    #[command(about = "Stage the artifacts of a succeeded execution")]
    Event(EventArgs),
    #[command(about = "Print the experiment an analysis derives from")]
    Origin(OriginArgs),
}

#[derive(Args)]
struct EventArgs {
    /// Workflow file name the trigger was written for
    #[arg(long)]
    filename: String,

    #[arg(long)]
    execution_id: String,
}

#[derive(Args)]
struct OriginArgs {
    /// Analysis id, e.g. AX1234
    analysis: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(archiver) = report.downcast_ref::<ArchiverError>() {
            return ExitCode::from(map_exit_code(archiver));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ArchiverError) -> u8 {
    match error {
        ArchiverError::MissingConfig
        | ArchiverError::ConfigRead(_)
        | ArchiverError::ConfigParse(_)
        | ArchiverError::InvalidConfig(_) => 2,
        ArchiverError::StoreHttp(_)
        | ArchiverError::StoreStatus { .. }
        | ArchiverError::MetadataHttp(_)
        | ArchiverError::MetadataStatus { .. } => 3,
        ArchiverError::CopyFailed { .. } => 4,
        ArchiverError::NotFound(_)
        | ArchiverError::UnknownReference(_)
        | ArchiverError::UnknownStudy(_)
        | ArchiverError::UnsupportedPipeline(_)
        | ArchiverError::MissingInput(_)
        | ArchiverError::MissingOutput(_) => 5,
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
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let store = BlobRestStore::new(&config)?;
    let metadata = MetadataHttpClient::connect(&config.metadata)?;
    let fields = StandardFields::new(config.metadata.reference_file_id);
    let archiver = Archiver::new(config, store, metadata, fields);
    let sink = JsonOutput;

    match cli.command {
        Commands::Poll => {
            let summary = archiver.poll(&sink).inspect_err(log_failure)?;
            JsonOutput::print_poll(&summary).into_diagnostic()?;
        }
        Commands::Event(args) => {
            let event = CompletionEvent {
                filename: args.filename,
                execution_id: args.execution_id,
            };
            let staged = archiver
                .handle_completion(&event, &sink)
                .inspect_err(log_failure)?;
            JsonOutput::print_staged(&staged).into_diagnostic()?;
        }
        Commands::Origin(args) => {
            let analysis: AnalysisId = args.analysis.parse()?;
            let origin = archiver.origin(analysis).inspect_err(log_failure)?;
            JsonOutput::print_origin(&origin).into_diagnostic()?;
        }
    }
    Ok(())
}

fn log_failure(err: &ArchiverError) {
    error!(error = %err, "aborting");
}
