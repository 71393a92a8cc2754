use std::{
    collections::BTreeMap,
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Command,
};

/// Root of the Wine prefix a process runs in.
pub const WINEPREFIX: &str = "WINEPREFIX";

/// Wine binary used by tools such as winetricks.
pub const WINE: &str = "WINE";

/// Wine server binary paired with [`WINE`].
pub const WINESERVER: &str = "WINESERVER";

/// Set by Steam for games that run under a compatibility tool.
pub const STEAM_COMPAT_DATA_PATH: &str = "STEAM_COMPAT_DATA_PATH";

/// Variables used to discover the prefix of a game started by Steam.
///
/// These are captured once at startup; nothing downstream reads the process environment again.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompatVars {
    /// An explicit `WINEPREFIX`.
    pub wineprefix: Option<PathBuf>,

    /// `STEAM_COMPAT_DATA_PATH`, the parent of Proton's `pfx` directory.
    pub steam_compat_data_path: Option<PathBuf>,
}

impl CompatVars {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars_os())
    }

    /// Build from an arbitrary set of variables. Values that are blank after trimming count as
    /// unset.
    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let mut compat = Self::default();

        for (key, value) in vars {
            let slot = match key.as_ref().to_str() {
                Some(WINEPREFIX) => &mut compat.wineprefix,
                Some(STEAM_COMPAT_DATA_PATH) => &mut compat.steam_compat_data_path,
                _ => continue,
            };

            *slot = non_blank(value.as_ref());
        }

        compat
    }
}

fn non_blank(value: &OsStr) -> Option<PathBuf> {
    match value.to_str() {
        Some(text) if text.trim().is_empty() => None,
        Some(text) => Some(PathBuf::from(text.trim())),
        None => Some(PathBuf::from(value)),
    }
}

/// Variables overlaid on the ambient environment of a spawned process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeEnvironment {
    vars: BTreeMap<String, OsString>,
}

impl RuntimeEnvironment {
    /// An environment that points Wine at `prefix`.
    pub fn for_prefix(prefix: impl AsRef<Path>) -> Self {
        Self::default().with(WINEPREFIX, prefix.as_ref())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl AsRef<OsStr>) -> Self {
        self.vars.insert(key.into(), value.as_ref().to_os_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars.get(key).map(OsString::as_os_str)
    }

    pub fn prefix(&self) -> Option<&Path> {
        self.get(WINEPREFIX).map(Path::new)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_os_str()))
    }
}

pub trait CommandExt {
    /// Overlay `env` on top of the inherited environment.
    fn with_runtime_env(&mut self, env: &RuntimeEnvironment) -> &mut Self;
}

impl CommandExt for Command {
    fn with_runtime_env(&mut self, env: &RuntimeEnvironment) -> &mut Self {
        self.envs(env.iter())
    }
}
