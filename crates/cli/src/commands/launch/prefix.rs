use std::path::{Path, PathBuf};

use tracing::debug;
use wemod_env::CompatVars;

use crate::commands::launch::classify::LaunchMode;

/// Directory below `STEAM_COMPAT_DATA_PATH` that holds the actual Wine prefix.
pub const PROTON_PREFIX_DIR: &str = "pfx";

/// The Wine prefix WeMod runs in for one launch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SandboxTarget {
    pub path: PathBuf,

    /// Borrowed from the game's Proton session rather than WeMod's private prefix.
    pub game_owned: bool,
}

impl SandboxTarget {
    /// Launch mode implied by where the prefix came from. A Proton command whose prefix couldn't
    /// be discovered runs like a direct launch in WeMod's own prefix.
    pub fn mode(&self) -> LaunchMode {
        if self.game_owned {
            LaunchMode::ProtonWrapped
        } else {
            LaunchMode::Direct
        }
    }
}

/// Picks the prefix WeMod shares with the game.
///
/// WeMod has to see the same registry and filesystem as the game it's attached to, so for Proton
/// launches the game's prefix wins over WeMod's own.
#[derive(Clone, Debug)]
pub struct PrefixResolver {
    vars: CompatVars,
}

impl PrefixResolver {
    pub fn new(vars: CompatVars) -> Self {
        Self { vars }
    }

    pub fn resolve(&self, mode: LaunchMode, configured: &Path) -> SandboxTarget {
        let discovered = match mode {
            LaunchMode::ProtonWrapped => self.vars.wineprefix.clone().or_else(|| {
                self.vars
                    .steam_compat_data_path
                    .as_ref()
                    .map(|compat_data| compat_data.join(PROTON_PREFIX_DIR))
            }),
            LaunchMode::Direct => None,
        };

        let target = match discovered {
            Some(path) => SandboxTarget {
                path,
                game_owned: true,
            },
            None => SandboxTarget {
                path: configured.to_path_buf(),
                game_owned: false,
            },
        };

        debug!(?mode, ?target, "resolved prefix");
        target
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use pretty_assertions::assert_eq;
    use wemod_env::CompatVars;

    use super::{PrefixResolver, SandboxTarget};
    use crate::commands::launch::classify::LaunchMode;

    const CONFIGURED: &str = "/home/u/.local/share/wemod-launcher/wemod_prefix";

    fn resolver(wineprefix: Option<&str>, compat_data: Option<&str>) -> PrefixResolver {
        PrefixResolver::new(CompatVars {
            wineprefix: wineprefix.map(PathBuf::from),
            steam_compat_data_path: compat_data.map(PathBuf::from),
        })
    }

    #[test]
    fn proton_prefers_explicit_wineprefix() {
        let resolver = resolver(Some("/games/pfx"), Some("/steam/compatdata/1"));

        assert_eq!(
            resolver.resolve(LaunchMode::ProtonWrapped, Path::new(CONFIGURED)),
            SandboxTarget {
                path: PathBuf::from("/games/pfx"),
                game_owned: true,
            }
        );
    }

    #[test]
    fn proton_falls_back_to_compat_data_prefix() {
        let resolver = resolver(None, Some("/steam/compatdata/1245620"));
        let target = resolver.resolve(LaunchMode::ProtonWrapped, Path::new(CONFIGURED));

        assert_eq!(PathBuf::from("/steam/compatdata/1245620/pfx"), target.path);
        assert_eq!(LaunchMode::ProtonWrapped, target.mode());
    }

    #[test]
    fn proton_without_discovery_vars_uses_configured_prefix() {
        let target = resolver(None, None).resolve(LaunchMode::ProtonWrapped, Path::new(CONFIGURED));

        assert_eq!(
            target,
            SandboxTarget {
                path: PathBuf::from(CONFIGURED),
                game_owned: false,
            }
        );
        assert_eq!(LaunchMode::Direct, target.mode());
    }

    #[test]
    fn direct_always_uses_configured_prefix() {
        let resolver = resolver(Some("/games/pfx"), Some("/steam/compatdata/1"));
        let target = resolver.resolve(LaunchMode::Direct, Path::new(CONFIGURED));

        assert_eq!(PathBuf::from(CONFIGURED), target.path);
        assert!(!target.game_owned);
    }
}
