use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use color_eyre::eyre::{OptionExt, WrapErr, bail};
use dialoguer::Select;
use serde::Deserialize;
use tracing::info;

use crate::{
    commands::{doctor, prefix},
    config::Config,
    fetch::{Http, extract_zip},
    process::CancellationToken,
};

/// Scoop manifest that tracks the current WeMod installer.
const SCOOP_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/Calinou/scoop-games/refs/heads/master/bucket/wemod.json";

const COMPANION_EXE_NAME: &str = "WeMod.exe";

/// Prefix of the installer entries that make up the application itself.
const PAYLOAD_PREFIX: &str = "lib/net";

#[derive(Debug, Deserialize)]
pub struct ScoopManifest {
    architecture: Architectures,
}

#[derive(Debug, Deserialize)]
struct Architectures {
    #[serde(rename = "64bit")]
    x64: ArchitectureEntry,
}

#[derive(Debug, Deserialize)]
struct ArchitectureEntry {
    #[serde(default)]
    url: String,
}

impl ScoopManifest {
    pub fn installer_url(&self) -> Option<&str> {
        Some(self.architecture.x64.url.trim()).filter(|url| !url.is_empty())
    }
}

/// How `setup` provisions WeMod's own prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefixStrategy {
    Download,
    Build,
    Skip,
}

impl PrefixStrategy {
    pub const ALL: [PrefixStrategy; 3] = [Self::Download, Self::Build, Self::Skip];
}

impl fmt::Display for PrefixStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefixStrategy::Download => f.write_str("Download a prebuilt prefix"),
            PrefixStrategy::Build => f.write_str("Build the prefix with winetricks"),
            PrefixStrategy::Skip => f.write_str("Skip prefix setup"),
        }
    }
}

fn choose_strategy(config: &Config) -> color_eyre::Result<PrefixStrategy> {
    if !config.interactive() {
        return Ok(PrefixStrategy::Download);
    }

    let index = Select::new()
        .with_prompt("Set up the WeMod prefix")
        .items(&PrefixStrategy::ALL)
        .default(0)
        .interact()?;

    Ok(PrefixStrategy::ALL[index])
}

/// Check the host, install WeMod and provision its prefix.
#[tracing::instrument(err, skip_all)]
pub fn setup(config: &Config, cancel: &CancellationToken) -> color_eyre::Result<()> {
    doctor::doctor(config, true)?;
    ensure_wemod(config, cancel)?;

    match choose_strategy(config)? {
        PrefixStrategy::Download => prefix::download(config, cancel),
        PrefixStrategy::Build => prefix::build(config, cancel),
        PrefixStrategy::Skip => {
            info!("prefix setup skipped by user");
            Ok(())
        }
    }
}

/// Download and unpack the WeMod installer unless WeMod is already installed.
pub fn ensure_wemod(config: &Config, cancel: &CancellationToken) -> color_eyre::Result<()> {
    let exe = config.wemod_exe()?;

    if exe.is_file() {
        info!(path = %exe.display(), "WeMod executable already present");
        return Ok(());
    }

    let download_dir = config.download_dir()?;
    fs::create_dir_all(&download_dir).wrap_err("failed to create download directory")?;

    let http = Http::new(cancel.clone());
    let manifest: ScoopManifest = http
        .json(SCOOP_MANIFEST_URL)
        .wrap_err("failed to fetch the WeMod scoop manifest")?;
    let url = manifest
        .installer_url()
        .ok_or_eyre("scoop manifest does not contain a 64bit WeMod URL")?;
    info!(url, "resolved WeMod installer URL");

    let installer = download_dir.join("wemod-setup.exe");
    http.download(url, &installer)
        .wrap_err("failed to download the WeMod installer")?;

    let install_root = config.wemod_dir()?;
    install_payload(&installer, &install_root, cancel)?;

    if !exe.is_file() {
        bail!("WeMod extracted but executable missing at {}", exe.display());
    }

    info!(path = %install_root.display(), "WeMod installed");
    Ok(())
}

/// Replace `install_root` with the application payload of the (zip based) installer.
fn install_payload(
    installer: &Path,
    install_root: &Path,
    cancel: &CancellationToken,
) -> color_eyre::Result<()> {
    if install_root.exists() {
        fs::remove_dir_all(install_root).wrap_err("failed to remove old WeMod installation")?;
    }
    fs::create_dir_all(install_root).wrap_err("failed to create WeMod installation directory")?;

    let extracted = extract_zip(
        installer,
        install_root,
        |name| name.starts_with(PAYLOAD_PREFIX),
        cancel,
    )
    .wrap_err("failed to unpack the WeMod installer")?;

    if extracted == 0 {
        bail!("installer archive did not contain a lib/net payload");
    }

    let lib_dir = install_root.join("lib");
    let payload = find_payload_root(&lib_dir)?;

    for entry in fs::read_dir(&payload).wrap_err("failed to read WeMod payload")? {
        let entry = entry?;
        fs::rename(entry.path(), install_root.join(entry.file_name()))
            .wrap_err("failed to move WeMod payload")?;
    }

    fs::remove_dir_all(&lib_dir).wrap_err("failed to clean up WeMod payload")?;

    Ok(())
}

/// The `lib/net*` directory holding `WeMod.exe`, else the first one by name.
fn find_payload_root(lib_dir: &Path) -> color_eyre::Result<PathBuf> {
    let mut candidates = Vec::new();

    for entry in fs::read_dir(lib_dir).wrap_err("failed to read installer lib directory")? {
        let entry = entry?;
        let is_payload = entry
            .file_name()
            .to_string_lossy()
            .to_lowercase()
            .starts_with("net");

        if is_payload && entry.file_type()?.is_dir() {
            candidates.push(entry.path());
        }
    }

    candidates.sort();

    let with_exe = candidates
        .iter()
        .find(|candidate| candidate.join(COMPANION_EXE_NAME).is_file());

    with_exe
        .or(candidates.first())
        .cloned()
        .ok_or_eyre("no lib/net* payload found in installer")
}
