use std::path::{Path, PathBuf};

use directories::ProjectDirs;

#[derive(Debug)]
pub struct KnownDirs {
    /// The current working directory we launched from.
    cwd: Option<Box<Path>>,

    /// Installation prefix (defaults to /)
    prefix: Option<Box<Path>>,

    project_dirs: Option<ProjectDirs>,
}

pub trait OptionalPathExt {
    fn join<P>(&self, path: P) -> Option<Box<Path>>
    where
        P: AsRef<Path>;
}

impl<S: AsRef<Path>> OptionalPathExt for Option<S> {
    fn join<P>(&self, path: P) -> Option<Box<Path>>
    where
        P: AsRef<Path>,
    {
        self.as_ref()
            .map(|parent| parent.as_ref().join(path).into_boxed_path())
    }
}

const PROJECT_NAME: &str = "wemod-launcher";

impl Default for KnownDirs {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir()
                .map(PathBuf::into_boxed_path)
                .ok(),
            prefix: Some(Box::from(Path::new("/"))),
            project_dirs: ProjectDirs::from("", "", PROJECT_NAME),
        }
    }
}

impl KnownDirs {
    /// Discover the data directory. WeMod, its prefix, downloads and the log file live here
    /// unless configured otherwise.
    pub fn data_dir(&self) -> Option<Box<Path>> {
        self.project_dirs
            .as_ref()
            .map(|dirs| Box::from(dirs.data_local_dir()))
            .or(self.cwd.clone())
    }

    /// The per-user configuration directory, `$XDG_CONFIG_HOME/wemod-launcher`.
    pub fn user_config_dir(&self) -> Option<Box<Path>> {
        self.project_dirs
            .as_ref()
            .map(|proj| Box::from(proj.config_local_dir()))
    }

    /// Discover the candidate paths to configuration directories, ordered from least priority
    /// to highest.
    ///
    /// These can be one of the following:
    ///
    /// - $PREFIX/etc/wemod-launcher
    /// - ./
    /// - $XDG_CONFIG_HOME:=$HOME/.config/wemod-launcher
    pub fn config_dirs(&self) -> impl Iterator<Item = Box<Path>> {
        let config_dirs = [
            self.prefix.join("etc").join(PROJECT_NAME),
            self.cwd.clone(),
            self.user_config_dir(),
        ];

        config_dirs.into_iter().flatten()
    }
}
