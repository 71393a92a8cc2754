use std::fs;

use clap::Subcommand;
use color_eyre::eyre::{OptionExt, WrapErr};
use serde::Deserialize;
use tracing::{info, warn};
use wemod_env::RuntimeEnvironment;

use crate::{
    commands::launch::deps::Winetricks,
    config::Config,
    fetch::{Http, extract_zip},
    process::{CancellationToken, ProcessRunner, SystemRunner},
};

/// Latest release of the prebuilt WeMod prefixes.
const LATEST_PREFIX_RELEASE_URL: &str =
    "https://api.github.com/repos/DeckCheatz/BuiltPrefixes-dev/releases/latest";

#[derive(Subcommand, Debug)]
#[command(flatten_help = true)]
pub enum PrefixCommands {
    /// Download a prebuilt prefix archive and extract it into the prefix directory.
    Download,

    /// Build the prefix locally by installing the required components with winetricks.
    Build,
}

#[derive(Debug, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

impl Release {
    /// Download URL of the first `.zip` asset.
    pub fn zip_asset_url(&self) -> Option<&str> {
        self.assets
            .iter()
            .filter(|asset| asset.name.trim().to_lowercase().ends_with(".zip"))
            .map(|asset| asset.browser_download_url.trim())
            .find(|url| !url.is_empty())
    }
}

fn latest_prefix_url(http: &Http) -> color_eyre::Result<String> {
    let release: Release = http
        .json(LATEST_PREFIX_RELEASE_URL)
        .wrap_err("failed to look up the latest prefix release")?;

    release
        .zip_asset_url()
        .map(str::to_string)
        .ok_or_eyre("latest prefix release does not contain a .zip asset")
}

#[tracing::instrument(err, skip_all)]
pub fn download(config: &Config, cancel: &CancellationToken) -> color_eyre::Result<()> {
    let download_dir = config.download_dir()?;
    let prefix_dir = config.prefix_dir()?;

    fs::create_dir_all(&download_dir).wrap_err("failed to create download directory")?;
    fs::create_dir_all(&prefix_dir).wrap_err("failed to create prefix directory")?;

    let http = Http::new(cancel.clone());
    let archive = download_dir.join("prefix.zip");

    match config.prefix_download_url() {
        Some(url) => {
            info!(url, "downloading prefix");

            if let Err(error) = http.download(url, &archive) {
                let Some(status) = error.status() else {
                    return Err(error).wrap_err("failed to download prefix");
                };

                let fallback = latest_prefix_url(&http)
                    .wrap_err_with(|| format!("prefix download failed with status {status}"))?;

                if fallback == url {
                    return Err(error).wrap_err("failed to download prefix");
                }

                warn!(status, %fallback, "configured prefix URL failed, retrying with latest release");
                http.download(&fallback, &archive)
                    .wrap_err("failed to download prefix")?;
            }
        }
        None => {
            let url = latest_prefix_url(&http)?;
            info!(%url, "downloading prefix");
            http.download(&url, &archive)
                .wrap_err("failed to download prefix")?;
        }
    }

    info!("extracting prefix archive");
    extract_zip(&archive, &prefix_dir, |_| true, cancel)
        .wrap_err("failed to extract prefix archive")?;

    info!(prefix = %prefix_dir.display(), "prefix ready");
    Ok(())
}

#[tracing::instrument(err, skip_all)]
pub fn build(config: &Config, cancel: &CancellationToken) -> color_eyre::Result<()> {
    let runner = SystemRunner::new(cancel.clone());

    build_with(&runner, config)
}

fn build_with<R: ProcessRunner>(runner: &R, config: &Config) -> color_eyre::Result<()> {
    let prefix_dir = config.prefix_dir()?;
    fs::create_dir_all(&prefix_dir).wrap_err("failed to create prefix directory")?;

    let env = RuntimeEnvironment::for_prefix(&prefix_dir);
    let winetricks = Winetricks::new(runner);

    for component in config.components() {
        info!(%component, "installing winetricks component");
        winetricks
            .install(&component, &env)
            .wrap_err_with(|| format!("failed to install {component}"))?;
    }

    info!(prefix = %prefix_dir.display(), "prefix build finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_fs::{TempDir, prelude::*};
    use pretty_assertions::assert_eq;

    use super::{Release, build_with};
    use crate::{
        config::{Config, KnownDirs, Options},
        testing::{Call, FakeRunner},
    };

    fn config(dir: &TempDir) -> Config {
        Config {
            options: Options {
                prefix_dir: Some(dir.child("wemod_prefix").to_path_buf()),
                ..Default::default()
            },
            known_dirs: KnownDirs::default(),
        }
    }

    #[test]
    fn picks_first_zip_asset() {
        let release: Release = serde_json::from_str(
            r#"{
                "tag_name": "v42",
                "assets": [
                    { "name": "checksums.txt", "browser_download_url": "https://example.org/sums" },
                    { "name": "WeMod-Prefix.ZIP ", "browser_download_url": " https://example.org/prefix.zip " },
                    { "name": "other.zip", "browser_download_url": "https://example.org/other.zip" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(Some("https://example.org/prefix.zip"), release.zip_asset_url());
    }

    #[test]
    fn release_without_zip_has_no_url() {
        let release: Release = serde_json::from_str(r#"{ "assets": [] }"#).unwrap();

        assert_eq!(None, release.zip_asset_url());
    }

    #[test]
    fn build_installs_components_into_private_prefix() {
        let dir = TempDir::new().unwrap();
        let runner = FakeRunner::new();

        build_with(&runner, &config(&dir)).unwrap();

        assert_eq!(
            vec![
                "winetricks -q corefonts".to_string(),
                "winetricks -q dotnet48".to_string(),
            ],
            runner.commands(Call::Run)
        );
        assert_eq!(
            Some(dir.child("wemod_prefix").path()),
            runner.calls()[0].1.environment().prefix()
        );
        assert!(dir.child("wemod_prefix").path().is_dir());
    }

    #[test]
    fn build_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        runner.fail(Call::Run, "winetricks -q corefonts", 1);

        assert!(build_with(&runner, &config(&dir)).is_err());
        assert_eq!(1, runner.calls().len());
    }
}
