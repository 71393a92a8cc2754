use clap::*;
use config::ConfigCommands;
use launch::LaunchArgs;
use prefix::PrefixCommands;

pub mod config;
pub mod doctor;
pub mod info;
pub mod launch;
pub mod prefix;
pub mod setup;

#[derive(Subcommand, Debug)]
#[command(flatten_help = true)]
pub enum Commands {
    /// Start a game together with WeMod, or WeMod on its own.
    #[clap(disable_version_flag = true)]
    Launch(LaunchArgs),

    /// Check for required tools, install WeMod and set up its prefix.
    #[clap(disable_version_flag = true)]
    Setup,

    /// Check for required tools and create the working directories.
    #[clap(disable_version_flag = true)]
    Doctor,

    /// Show the effective configuration, search paths and tool availability.
    #[clap(disable_version_flag = true)]
    Info,

    /// Provision WeMod's own Wine prefix.
    #[clap(subcommand, disable_version_flag = true)]
    Prefix(PrefixCommands),

    /// Manage the configuration file.
    #[clap(subcommand, disable_version_flag = true)]
    Config(ConfigCommands),

    /// Any other first argument starts a game command, e.g. Steam's %command%.
    #[command(external_subcommand)]
    Game(Vec<String>),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Launch(_) | Commands::Game(_) => "launch",
            Commands::Setup => "setup",
            Commands::Doctor => "doctor",
            Commands::Info => "info",
            Commands::Prefix(PrefixCommands::Download) => "prefix download",
            Commands::Prefix(PrefixCommands::Build) => "prefix build",
            Commands::Config(ConfigCommands::Init) => "config init",
        }
    }
}
