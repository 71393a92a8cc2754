use std::fs;

use color_eyre::eyre::{WrapErr, bail};
use tracing::{info, warn};

use crate::config::Config;

/// Programs every launch depends on.
pub const REQUIRED_TOOLS: [&str; 3] = ["wine", "wineserver", "winetricks"];

/// The tools from [`REQUIRED_TOOLS`] that `lookup` can't find.
pub fn missing_tools(lookup: impl Fn(&str) -> bool) -> Vec<&'static str> {
    REQUIRED_TOOLS
        .into_iter()
        .filter(|tool| !lookup(tool))
        .collect()
}

pub fn on_path(tool: &str) -> bool {
    which::which(tool).is_ok()
}

/// Check the host for required tools and create the working directories.
///
/// Missing tools are only logged unless `fail_on_missing` is set.
#[tracing::instrument(err, skip(config))]
pub fn doctor(config: &Config, fail_on_missing: bool) -> color_eyre::Result<()> {
    if !cfg!(target_os = "linux") {
        bail!("unsupported OS {}: Linux only", std::env::consts::OS);
    }

    let missing = missing_tools(on_path);

    for tool in REQUIRED_TOOLS {
        if missing.contains(&tool) {
            warn!(tool, "missing dependency");
        } else {
            info!(tool, "dependency OK");
        }
    }

    for (name, dir) in [
        ("work", config.work_dir()?),
        ("prefix", config.prefix_dir()?),
        ("download", config.download_dir()?),
    ] {
        fs::create_dir_all(&dir)
            .wrap_err_with(|| format!("failed to create {name} directory {}", dir.display()))?;
    }

    if !missing.is_empty() {
        if fail_on_missing {
            bail!("missing required dependencies: {}", missing.join(", "));
        }
    } else {
        info!("doctor finished successfully");
    }

    Ok(())
}
