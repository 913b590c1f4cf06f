use std::{
    env,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Args, Parser, Subcommand};
use telefuse::{
    config::{self, Config},
    pipeline::{self, Pipeline},
};
use telefuse_capture::frame::{self, Frame};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error("Telefuse pipeline returned an error: {0}")]
    Pipeline(#[from] pipeline::Error),
    #[error("Could not read table: {0}")]
    Frame(#[from] frame::Error),
}

fn default_config_path() -> String {
    "/etc/telefuse/telefuse.yaml".to_string()
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct CliWithSubcommands {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fuse the configured collection runs into the wide table
    Run(ConfigArgs),
    /// Validate configuration file and exit
    ConfigCheck(ConfigArgs),
    /// Print the shape of a table written by telefuse
    Inspect(InspectCommand),
}

#[derive(Args)]
struct ConfigArgs {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

#[derive(Args)]
struct InspectCommand {
    /// path of a timestamp-indexed CSV table
    table: PathBuf,
    /// list the column names too
    #[clap(long)]
    columns: bool,
}

fn get_config(config_path: &str) -> Result<Config, Error> {
    if let Ok(contents) = env::var("TELEFUSE_CONFIG") {
        debug!("Using config from env var 'TELEFUSE_CONFIG'");
        return Ok(config::parse_config(&contents)?);
    }
    debug!("Attempting to open configuration file at: {config_path}");
    Ok(config::load_config_from_path(Path::new(config_path))?)
}

fn run(args: &ConfigArgs) -> Result<(), Error> {
    let config = get_config(&args.config_path)?;
    let summary = Pipeline::new(config)?.run()?;
    info!(
        "Processed {} metric types ({} skipped, {} without output): {} KPIs, {} retained, {} groups",
        summary.processed,
        summary.skipped,
        summary.empty,
        summary.kpis,
        summary.retained,
        summary.groups
    );
    Ok(())
}

fn inspect(cmd: &InspectCommand) -> Result<(), Error> {
    let table = Frame::read_csv_file(&cmd.table)?;
    println!("{} rows x {} columns", table.num_rows(), table.num_columns());
    if cmd.columns {
        for column in table.columns() {
            println!("{}", column.name);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    let cli = CliWithSubcommands::parse();
    let res = match cli.command {
        Commands::Run(args) => {
            info!("Starting telefuse {version} run.");
            run(&args)
        }
        Commands::ConfigCheck(args) => get_config(&args.config_path).map(|config| {
            info!("Configuration valid: {} sources", config.sources.len());
        }),
        Commands::Inspect(cmd) => inspect(&cmd),
    };
    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
