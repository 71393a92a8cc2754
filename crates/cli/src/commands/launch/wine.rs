use std::{
    ffi::OsString,
    os::unix::fs::PermissionsExt,
    path::Path,
};

use wemod_env::{RuntimeEnvironment, WINE, WINESERVER};

use crate::commands::launch::classify::{ClassifiedCommand, LaunchMode};

/// The Wine binaries WeMod and its prefix maintenance run with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WineTools {
    pub wine: OsString,
    pub wineserver: OsString,
    pub wineboot: OsString,
    bundled: bool,
}

impl WineTools {
    /// Binaries found on `PATH`.
    pub fn system() -> Self {
        Self {
            wine: "wine".into(),
            wineserver: "wineserver".into(),
            wineboot: "wineboot".into(),
            bundled: false,
        }
    }

    /// Binaries shipped inside the Proton installation containing `wrapper`.
    ///
    /// Proton keeps them under `files/bin`. Returns `None` if there's no executable `wine` or
    /// `wine64` there; `wineserver` and `wineboot` fall back to the system ones individually.
    pub fn bundled_with(wrapper: &Path) -> Option<Self> {
        let bin_dir = wrapper.parent()?.join("files").join("bin");
        let wine = ["wine", "wine64"]
            .into_iter()
            .map(|name| bin_dir.join(name))
            .find(|candidate| is_executable(candidate))?;

        let sibling_or = |name: &str| -> OsString {
            let candidate = bin_dir.join(name);

            if is_executable(&candidate) {
                candidate.into_os_string()
            } else {
                name.into()
            }
        };

        Some(Self {
            wineserver: sibling_or("wineserver"),
            wineboot: sibling_or("wineboot"),
            wine: wine.into_os_string(),
            bundled: true,
        })
    }

    /// Prefer Proton's own Wine for Proton launches. A system Wine of a different version than the
    /// one that created the prefix is the most common reason WeMod fails to start.
    pub fn select(mode: LaunchMode, classified: &ClassifiedCommand) -> Self {
        match (mode, classified.program()) {
            (LaunchMode::ProtonWrapped, Some(wrapper)) => {
                Self::bundled_with(Path::new(wrapper)).unwrap_or_else(Self::system)
            }
            _ => Self::system(),
        }
    }

    pub fn is_bundled(&self) -> bool {
        self.bundled
    }

    /// Point winetricks at these binaries. The system ones need no variables.
    pub fn tool_env(&self, env: RuntimeEnvironment) -> RuntimeEnvironment {
        if self.bundled {
            env.with(WINE, &self.wine).with(WINESERVER, &self.wineserver)
        } else {
            env
        }
    }
}

pub fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}
