use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::builder::{BoolValueParser, MapValueParser, TypedValueParser};
use color_eyre::{
    Result,
    eyre::{OptionExt, WrapErr},
};
use serde::{Deserialize, Serialize};
use steamlocate::SteamDir;

use crate::{commands::launch::supervisor::RetryPolicy, config::known_paths::OptionalPathExt};

pub mod known_paths;

pub use known_paths::KnownDirs;

pub const CONFIG_FILE_NAME: &str = "wemod-launcher.toml";

/// Value of `prefix_download_url` that selects the newest published prefix.
pub const AUTO_PREFIX_URL: &str = "auto";

/// Download location used by old releases. It no longer serves a prefix, so it's treated as
/// [`AUTO_PREFIX_URL`].
const LEGACY_PREFIX_URL: &str =
    "https://github.com/NichSchlagen/wemod-proton-launcher-go/releases/latest/download/prefix.zip";

pub const DEFAULT_COMPONENTS: [&str; 2] = ["corefonts", "dotnet48"];

#[derive(Clone, Debug, clap::Args, Serialize, Deserialize, Default, PartialEq)]
#[group(multiple = true)]
#[serde(default)]
pub struct Options {
    /// Never prompt; fail or pick the default instead.
    #[clap(
        long("non-interactive"),
        help_heading = "Configuration",
        default_missing_value = "true",
        num_args = 0..=1,
        require_equals = true,
        value_parser = invert_bool()
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) interactive: Option<bool>,

    /// Log level: debug, info, warn or error.
    #[clap(long, help_heading = "Configuration")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) log_level: Option<String>,

    /// File that receives a copy of all log output.
    #[clap(long, help_heading = "Configuration", value_hint = clap::ValueHint::FilePath)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) log_file: Option<PathBuf>,

    /// Directory holding the WeMod installation, its prefix and downloads.
    #[clap(long, help_heading = "Configuration", value_hint = clap::ValueHint::DirPath)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) work_dir: Option<PathBuf>,

    /// Path to WeMod.exe.
    #[clap(long, help_heading = "Configuration", value_hint = clap::ValueHint::FilePath)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) wemod_exe: Option<PathBuf>,

    /// WeMod's own Wine prefix, used when the game's prefix isn't known.
    #[clap(long, help_heading = "Configuration", value_hint = clap::ValueHint::DirPath)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) prefix_dir: Option<PathBuf>,

    #[clap(long, help_heading = "Configuration", value_hint = clap::ValueHint::DirPath)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) download_dir: Option<PathBuf>,

    /// URL of a prefix archive, or "auto" for the latest published one.
    #[clap(long, help_heading = "Configuration")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) prefix_download_url: Option<String>,

    /// Winetricks components every prefix needs [comma separated].
    #[clap(long, help_heading = "Configuration", value_delimiter = ',')]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) components: Option<Vec<String>>,

    /// Seconds to wait after starting a Proton game before starting WeMod.
    #[clap(long, help_heading = "Configuration")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) start_delay_secs: Option<u64>,

    /// How many times to try starting WeMod.
    #[clap(long, help_heading = "Configuration")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) retry_attempts: Option<u32>,

    /// Seconds to wait after resetting the prefix before trying again.
    #[clap(long, help_heading = "Configuration")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) retry_backoff_secs: Option<u64>,

    /// Optional path to a Steam installation, auto-detected if not provided
    #[clap(long, help_heading = "Configuration", value_hint = clap::ValueHint::DirPath)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) steam_dir: Option<PathBuf>,
}

fn invert_bool() -> MapValueParser<BoolValueParser, fn(bool) -> bool> {
    BoolValueParser::new().map(|v| !v)
}

impl Options {
    pub fn merge(self, other: Self) -> Self {
        Self {
            interactive: other.interactive.or(self.interactive),
            log_level: other.log_level.or(self.log_level),
            log_file: other.log_file.or(self.log_file),
            work_dir: other.work_dir.or(self.work_dir),
            wemod_exe: other.wemod_exe.or(self.wemod_exe),
            prefix_dir: other.prefix_dir.or(self.prefix_dir),
            download_dir: other.download_dir.or(self.download_dir),
            prefix_download_url: other.prefix_download_url.or(self.prefix_download_url),
            components: other.components.or(self.components),
            start_delay_secs: other.start_delay_secs.or(self.start_delay_secs),
            retry_attempts: other.retry_attempts.or(self.retry_attempts),
            retry_backoff_secs: other.retry_backoff_secs.or(self.retry_backoff_secs),
            steam_dir: other.steam_dir.or(self.steam_dir),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let encoded_toml = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let toml = toml::from_str(&encoded_toml)
            .wrap_err_with(|| format!("failed to parse {}", path.display()))?;

        Ok(toml)
    }

    /// Merge every readable file in order. Missing files are skipped silently. Broken ones are
    /// skipped and returned alongside the merged options, to be reported once logging is up.
    pub fn from_files<P: AsRef<Path>>(
        files: impl IntoIterator<Item = P>,
    ) -> (Options, Vec<color_eyre::Report>) {
        let mut config = Options::default();
        let mut errors = Vec::new();

        for file in files.into_iter() {
            let path = file.as_ref();

            if !path.is_file() {
                continue;
            }

            match Options::from_file(path) {
                Ok(item) => config = config.merge(item),
                Err(error) => errors.push(error),
            }
        }

        (config, errors)
    }
}

pub struct Config {
    pub options: Options,
    pub known_dirs: KnownDirs,
}

impl Config {
    pub fn interactive(&self) -> bool {
        self.options.interactive.unwrap_or(true)
    }

    pub fn log_level(&self) -> &str {
        self.options.log_level.as_deref().unwrap_or("info")
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.options.log_file.clone().or_else(|| {
            self.work_dir()
                .ok()
                .map(|dir| dir.join("wemod-launcher.log"))
        })
    }

    pub fn work_dir(&self) -> Result<PathBuf> {
        self.options
            .work_dir
            .clone()
            .or_else(|| self.known_dirs.data_dir().map(PathBuf::from))
            .ok_or_eyre("unable to determine a data directory, set work_dir")
    }

    pub fn wemod_exe(&self) -> Result<PathBuf> {
        match &self.options.wemod_exe {
            Some(exe) => Ok(exe.clone()),
            None => Ok(self.work_dir()?.join("wemod_bin").join("WeMod.exe")),
        }
    }

    /// Directory WeMod is installed into.
    pub fn wemod_dir(&self) -> Result<PathBuf> {
        let exe = self.wemod_exe()?;

        exe.parent()
            .map(Path::to_path_buf)
            .ok_or_eyre("wemod_exe has no parent directory")
    }

    pub fn prefix_dir(&self) -> Result<PathBuf> {
        match &self.options.prefix_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.work_dir()?.join("wemod_prefix")),
        }
    }

    pub fn download_dir(&self) -> Result<PathBuf> {
        match &self.options.download_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.work_dir()?.join("downloads")),
        }
    }

    /// The configured archive URL, or `None` when the latest published prefix should be used.
    pub fn prefix_download_url(&self) -> Option<&str> {
        let url = self.options.prefix_download_url.as_deref().map(str::trim)?;

        let resolves_latest = url.is_empty()
            || url.eq_ignore_ascii_case(AUTO_PREFIX_URL)
            || url.eq_ignore_ascii_case(LEGACY_PREFIX_URL);

        (!resolves_latest).then_some(url)
    }

    pub fn components(&self) -> Vec<String> {
        self.options.components.clone().unwrap_or_else(|| {
            DEFAULT_COMPONENTS
                .iter()
                .map(|component| component.to_string())
                .collect()
        })
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.options.start_delay_secs.unwrap_or(2))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let default = RetryPolicy::default();

        RetryPolicy {
            max_attempts: self.options.retry_attempts.unwrap_or(default.max_attempts),
            backoff: self
                .options
                .retry_backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(default.backoff),
        }
    }

    pub fn steam_dir(&self) -> Result<SteamDir> {
        Ok(self
            .options
            .steam_dir
            .as_ref()
            .map(|steam_path| SteamDir::from_dir(steam_path))
            .unwrap_or_else(SteamDir::locate)?)
    }

    /// Where `config init` writes, and the highest priority search location.
    pub fn user_config_file(&self) -> Option<Box<Path>> {
        self.known_dirs.user_config_dir().join(CONFIG_FILE_NAME)
    }

    /// Every option filled in, as it applies to this run.
    pub fn effective_options(&self) -> Result<Options> {
        Ok(Options {
            interactive: Some(self.interactive()),
            log_level: Some(self.log_level().to_string()),
            log_file: self.log_file(),
            work_dir: Some(self.work_dir()?),
            wemod_exe: Some(self.wemod_exe()?),
            prefix_dir: Some(self.prefix_dir()?),
            download_dir: Some(self.download_dir()?),
            prefix_download_url: Some(
                self.prefix_download_url()
                    .unwrap_or(AUTO_PREFIX_URL)
                    .to_string(),
            ),
            components: Some(self.components()),
            start_delay_secs: Some(self.start_delay().as_secs()),
            retry_attempts: Some(self.retry_policy().max_attempts),
            retry_backoff_secs: Some(self.retry_policy().backoff.as_secs()),
            steam_dir: self.options.steam_dir.clone(),
        })
    }
}
