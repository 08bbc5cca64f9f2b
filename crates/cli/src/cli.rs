//! Command-line parser and dispatch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use oagr_core::{JobId, RequestState, StateParams, timestamp};
use oagr_infra::callbacks::{DEFAULT_ERROR_FILE, DEFAULT_SUCCESS_FILE};
use oagr_infra::jobs::{
    DriveOptions, JobRunner, JobStore, JobStoreError, PostgresJobStore, drive_to_completion,
};
use oagr_infra::{BatchClient, CsvExportCallback, HttpLookup, OagrConfig};
use oagr_observability::LogFormat;
use tracing::info;

use crate::input::read_identifiers;

#[derive(Parser)]
#[command(name = "oagr")]
#[command(about = "Bulk identifier resolution against an OAG lookup service")]
#[command(version)]
pub struct Cli {
    /// Lookup endpoint (overrides OAG_LOOKUP_URL)
    #[arg(long, global = true)]
    lookup_url: Option<String>,

    /// Job database (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Log output format: pretty or json
    #[arg(long, global = true, env = "OAGR_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and persist a new job
    Create {
        /// File with one identifier per line (`-` for stdin)
        identifiers: PathBuf,
        #[command(flatten)]
        tunables: Tunables,
    },

    /// Sweep persisted jobs until interrupted
    Run {
        #[command(flatten)]
        export: ExportFiles,
    },

    /// List every job with its status
    Status,

    /// Show parameters and counts for one job
    Report {
        job_id: JobId,
    },

    /// Resolve a list of identifiers in this process, without a database
    Lookup {
        /// File with one identifier per line (`-` for stdin)
        identifiers: PathBuf,
        /// Write the job state here after every cycle
        #[arg(long)]
        state_file: Option<PathBuf>,
        #[command(flatten)]
        tunables: Tunables,
        #[command(flatten)]
        export: ExportFiles,
    },
}

/// Per-job overrides of the configured defaults.
#[derive(Args, Debug, Default)]
struct Tunables {
    /// Job lifetime in seconds
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    back_off_factor: Option<f64>,
    /// Longest wait between attempts for one identifier, in seconds
    #[arg(long)]
    max_back_off: Option<f64>,
    /// Attempts after which an identifier is given up on
    #[arg(long)]
    max_retries: Option<u32>,
    /// Identifiers per lookup request
    #[arg(long)]
    batch_size: Option<usize>,
}

impl Tunables {
    fn into_params(self) -> StateParams {
        StateParams {
            timeout: self.timeout.map(Duration::from_secs),
            back_off_factor: self.back_off_factor,
            max_back_off: self.max_back_off,
            max_retries: self.max_retries,
            batch_size: self.batch_size,
            start: None,
        }
    }
}

#[derive(Args, Debug)]
struct ExportFiles {
    #[arg(long, default_value = DEFAULT_SUCCESS_FILE)]
    success_file: PathBuf,
    #[arg(long, default_value = DEFAULT_ERROR_FILE)]
    error_file: PathBuf,
}

impl ExportFiles {
    fn callback(&self) -> CsvExportCallback {
        CsvExportCallback::new(&self.success_file, &self.error_file)
    }
}

pub async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = OagrConfig::from_env().context("loading configuration")?;
    if let Some(url) = cli.lookup_url {
        config.lookup_url = url;
    }
    if cli.database_url.is_some() {
        config.database_url = cli.database_url;
    }

    match cli.command {
        Commands::Create { identifiers, tunables } => create(&config, &identifiers, tunables).await,
        Commands::Run { export } => run(&config, &export).await,
        Commands::Status => status(&config).await,
        Commands::Report { job_id } => report(&config, job_id).await,
        Commands::Lookup {
            identifiers,
            state_file,
            tunables,
            export,
        } => lookup(&config, &identifiers, state_file.as_deref(), tunables, &export).await,
    }
}

async fn open_store(config: &OagrConfig) -> Result<PostgresJobStore> {
    let url = config.require_database_url()?;
    let store = PostgresJobStore::connect(url)
        .await
        .context("connecting to the job database")?;
    store.ensure_schema().await.context("creating the job table")?;
    Ok(store)
}

fn build_runner(
    config: &OagrConfig,
    store: PostgresJobStore,
    callback: CsvExportCallback,
) -> Result<JobRunner<PostgresJobStore, HttpLookup, CsvExportCallback>> {
    let lookup = HttpLookup::from_config(config).context("building the HTTP client")?;
    Ok(JobRunner::new(
        store,
        BatchClient::new(lookup),
        callback,
        config.runner.clone(),
        config.state.clone(),
    ))
}

async fn create(config: &OagrConfig, identifiers: &Path, tunables: Tunables) -> Result<()> {
    let ids = read_identifiers(identifiers)?;
    let store = open_store(config).await?;
    let runner = build_runner(config, store, CsvExportCallback::default())?;
    let id = runner.create_job(ids, tunables.into_params()).await?;
    println!("{id}");
    Ok(())
}

async fn run(config: &OagrConfig, export: &ExportFiles) -> Result<()> {
    let store = open_store(config).await?;
    let runner = build_runner(config, store, export.callback())?;
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; stopping after the current sweep");
        }
    };
    runner.run(shutdown).await?;
    Ok(())
}

async fn status(config: &OagrConfig) -> Result<()> {
    let store = open_store(config).await?;
    for entry in store.statuses().await? {
        println!("{} {}", entry.id, entry.status);
    }
    Ok(())
}

async fn report(config: &OagrConfig, job_id: JobId) -> Result<()> {
    let store = open_store(config).await?;
    let record = store
        .pull(job_id)
        .await?
        .ok_or(JobStoreError::NotFound(job_id))?;
    let status = record.status;
    let state = record.into_state()?;

    println!("Job {} ({status})", state.id());
    println!("Started: {}", timestamp::format(&state.start()));
    println!("{}", state.parameters());
    println!("{}", state.status_report());
    println!("Outcome: {:?}", state.outcome(timestamp::now()));
    if let Some(next) = state.next_due() {
        println!("Next due: {}", timestamp::format(&next));
    }
    Ok(())
}

async fn lookup(
    config: &OagrConfig,
    identifiers: &Path,
    state_file: Option<&Path>,
    tunables: Tunables,
    export: &ExportFiles,
) -> Result<()> {
    let ids = read_identifiers(identifiers)?;
    let mut state = RequestState::new(ids, tunables.into_params(), &config.state)?;
    let lookup = HttpLookup::from_config(config).context("building the HTTP client")?;
    let client = BatchClient::new(lookup);
    let options = DriveOptions {
        throttle: config.runner.lookup_throttle,
        verbose: config.runner.verbose,
    };

    let outcome = drive_to_completion(&client, &mut state, options, &export.callback(), |st| {
        save_state_file(state_file, st)
    })
    .await?;

    println!("{}", state.status_report());
    println!("Outcome: {outcome:?}");
    Ok(())
}

fn save_state_file(path: Option<&Path>, state: &RequestState) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(&state.to_json()?)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn tunables_become_state_params() {
        let cli = Cli::try_parse_from([
            "oagr",
            "create",
            "ids.txt",
            "--timeout",
            "60",
            "--max-retries",
            "4",
            "--batch-size",
            "50",
        ])
        .unwrap();
        let Commands::Create { tunables, .. } = cli.command else {
            panic!("expected create");
        };
        let params = tunables.into_params();
        assert_eq!(params.timeout, Some(Duration::from_secs(60)));
        assert_eq!(params.max_retries, Some(4));
        assert_eq!(params.batch_size, Some(50));
        assert_eq!(params.back_off_factor, None);
    }

    #[test]
    fn report_takes_a_job_id() {
        let id = JobId::new();
        let args = ["oagr", "--log-format", "json", "report", &id.to_string()];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::Report { job_id } if job_id == id));
    }

    #[test]
    fn state_file_holds_the_job_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let ids = [oagr_core::Identifier::parse("a").unwrap()];
        let state = RequestState::new(ids, StateParams::default(), &Default::default()).unwrap();

        save_state_file(Some(&path), &state).unwrap();
        save_state_file(None, &state).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(RequestState::from_json(&raw).unwrap(), state);
    }
}
