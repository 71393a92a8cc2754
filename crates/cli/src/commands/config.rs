use std::{fs, path::Path};

use clap::Subcommand;
use color_eyre::eyre::{OptionExt, WrapErr, bail};
use tracing::info;

use crate::config::Config;

#[derive(Subcommand, Debug)]
#[command(flatten_help = true)]
pub enum ConfigCommands {
    /// Write the effective configuration to the user configuration file.
    Init,
}

#[tracing::instrument(err, skip_all)]
pub fn init(config: &Config) -> color_eyre::Result<()> {
    let path = config
        .user_config_file()
        .ok_or_eyre("unable to determine the user configuration directory")?;

    write_config(config, &path)?;

    info!(path = %path.display(), "wrote configuration");
    println!("{}", path.display());

    Ok(())
}

fn write_config(config: &Config, path: &Path) -> color_eyre::Result<()> {
    if path.exists() {
        bail!("{} already exists, not overwriting it", path.display());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).wrap_err("failed to create configuration directory")?;
    }

    let contents = toml::to_string_pretty(&config.effective_options()?)
        .wrap_err("failed to serialize configuration")?;

    fs::write(path, contents)
        .wrap_err_with(|| format!("failed to write {}", path.display()))?;

    Ok(())
}
