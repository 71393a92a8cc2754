use std::{path::PathBuf, process::ExitCode};

use clap::{ArgAction, Parser};
use color_eyre::eyre::WrapErr;
use commands::{Commands, config::ConfigCommands, launch::LaunchArgs, prefix::PrefixCommands};
use process::CancellationToken;
use tracing::{debug, error, info, warn};
use wemod_telemetry::TelemetryConfig;

mod commands;
mod config;
mod feedback;
mod fetch;
mod output;
mod process;

#[cfg(test)]
mod testing;

use crate::config::{CONFIG_FILE_NAME, Config, KnownDirs, Options};

#[derive(Parser, Debug)]
#[command(
    name = "wemod-launcher",
    version,
    about = "Runs WeMod alongside games under Wine and Proton",
    after_help = "Use `wemod-launcher %command%` as a Steam launch option to start WeMod with a game.",
    propagate_version = true,
    flatten_help = true
)]
struct Cli {
    #[clap(flatten)]
    config: Options,

    /// Only print errors to the terminal. The log file is still written.
    #[clap(short, long, action = ArgAction::SetTrue)]
    quiet: bool,

    /// Configuration file read after the ones found in the search paths.
    #[clap(long, value_hint = clap::ValueHint::FilePath)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Failures are logged by the root span; only the exit status is left to report.
fn exit_code<T>(result: &color_eyre::Result<T>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

fn main() -> color_eyre::Result<ExitCode> {
    wemod_telemetry::install_error_handler();

    let cli = Cli::parse();

    let known_dirs = KnownDirs::default();
    let config_sources = known_dirs
        .config_dirs()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .collect::<Vec<_>>();

    let (mut options, config_errors) = Options::from_files(&config_sources);

    if let Some(path) = &cli.config_file {
        options = options.merge(Options::from_file(path)?);
    }

    let config = Config {
        known_dirs,
        options: options.merge(cli.config),
    };

    let level = wemod_telemetry::parse_level(config.log_level())?;
    let mut telemetry_config = TelemetryConfig::default()
        .with_level(level)
        .quiet(cli.quiet);

    if let Some(log_file) = config.log_file() {
        telemetry_config = telemetry_config.with_log_file(log_file);
    }

    let _telemetry_guard =
        wemod_telemetry::install(telemetry_config).wrap_err("failed to set up logging")?;

    for error in &config_errors {
        error!(?error, "failed to load configuration");
    }

    info!(version = env!("CARGO_PKG_VERSION"));
    debug!(?config_sources, config_file = ?cli.config_file, "configuration search paths");

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();

    if let Err(error) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(%error, "unable to install signal handler, cancellation is unavailable");
    }

    let command = cli.command.unwrap_or(Commands::Launch(LaunchArgs::default()));

    let result = wemod_telemetry::with_root_span("wemod-launcher", command.name(), || {
        match command {
            Commands::Launch(args) => commands::launch::launch(config, args, cancel),
            Commands::Game(command) => {
                commands::launch::launch(config, LaunchArgs { command }, cancel)
            }
            Commands::Setup => commands::setup::setup(&config, &cancel),
            Commands::Doctor => commands::doctor::doctor(&config, false),
            Commands::Info => commands::info::info(config),
            Commands::Prefix(PrefixCommands::Download) => commands::prefix::download(&config, &cancel),
            Commands::Prefix(PrefixCommands::Build) => commands::prefix::build(&config, &cancel),
            Commands::Config(ConfigCommands::Init) => commands::config::init(&config),
        }
    });

    Ok(exit_code(&result))
}
