use std::{collections::BTreeSet, fs, path::PathBuf};

use tracing::{info, instrument, warn};
use wemod_env::RuntimeEnvironment;

use crate::{
    commands::launch::prefix::SandboxTarget,
    feedback::{DIALOG_TITLE, Notifier, Progress},
    process::{Invocation, ProcessError, ProcessRunner},
};

/// File whose presence in a prefix means the required components were already installed.
pub const RUNTIME_READY_MARKER: &str = ".wemod_launcher_runtime_ready";

const WINETRICKS: &str = "winetricks";

/// Query and install Wine components with `winetricks`.
pub struct Winetricks<'a, R> {
    runner: &'a R,
}

impl<'a, R: ProcessRunner> Winetricks<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        Self { runner }
    }

    /// Components `winetricks` reports as installed in the prefix named by `env`.
    pub fn list_installed(&self, env: &RuntimeEnvironment) -> Result<BTreeSet<String>, ProcessError> {
        let query = Invocation::new(WINETRICKS)
            .arg("list-installed")
            .env(env.clone());

        self.runner
            .capture(&query)
            .map(|output| parse_installed(&output))
    }

    pub fn install(&self, component: &str, env: &RuntimeEnvironment) -> Result<(), ProcessError> {
        let install = Invocation::new(WINETRICKS)
            .args(["-q", component])
            .env(env.clone());

        self.runner.run(&install)
    }
}

/// One component per line; blank lines and anything mentioning a warning are noise.
pub fn parse_installed(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .map(|line| line.trim().to_lowercase())
        .filter(|line| !line.is_empty() && !line.contains("warning"))
        .collect()
}

#[derive(Debug, thiserror::Error)]
#[error("failed to install {component} into {}", prefix.display())]
pub struct InstallError {
    pub component: String,
    pub prefix: PathBuf,
    #[source]
    pub source: ProcessError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The ready marker was present; nothing was queried or installed.
    AlreadyPrepared,

    /// Installed components couldn't be listed, so installation was skipped for this run.
    QuerySkipped,

    /// Every required component is present. Holds the ones installed by this call.
    Installed(Vec<String>),
}

/// Makes sure a prefix has the Wine components WeMod needs.
pub struct DependencyInstaller<'a, R, F> {
    winetricks: Winetricks<'a, R>,
    feedback: &'a F,
}

impl<'a, R, F> DependencyInstaller<'a, R, F>
where
    R: ProcessRunner,
    F: Notifier + Progress,
{
    pub fn new(runner: &'a R, feedback: &'a F) -> Self {
        Self {
            winetricks: Winetricks::new(runner),
            feedback,
        }
    }

    /// Install whichever of `components` are missing from `sandbox`, then mark it ready.
    ///
    /// A marked prefix is never queried again. An install failure leaves the prefix unmarked.
    #[instrument(skip_all, fields(prefix = %sandbox.path.display()))]
    pub fn ensure(
        &self,
        sandbox: &SandboxTarget,
        components: &[String],
        env: &RuntimeEnvironment,
    ) -> Result<EnsureOutcome, InstallError> {
        let marker = sandbox.path.join(RUNTIME_READY_MARKER);

        if marker.exists() {
            info!("runtime marker found in prefix, skipping component checks");
            self.feedback
                .notify("Game prefix already prepared, skipping installation.");

            return Ok(EnsureOutcome::AlreadyPrepared);
        }

        self.feedback
            .notify("Checking installed components in game prefix ...");

        let query = self.feedback.with_progress(
            DIALOG_TITLE,
            "Checking installed components in game prefix ...",
            || self.winetricks.list_installed(env),
        );

        let mut installed = match query {
            Ok(installed) => installed,
            Err(error) => {
                warn!(%error, "could not list installed components, skipping installation for this run");
                return Ok(EnsureOutcome::QuerySkipped);
            }
        };

        self.feedback.notify("Dependency check completed.");

        let mut newly_installed = Vec::new();

        for component in components {
            // `parse_installed` lower-cases what winetricks reports.
            let component = component.trim().to_lowercase();

            if component.is_empty() {
                continue;
            }

            if installed.contains(&component) {
                self.feedback
                    .notify(&format!("Already installed: {component}"));
                continue;
            }

            info!(%component, "installing component into prefix");
            self.feedback
                .notify(&format!("Installing into game prefix: {component}"));

            self.feedback
                .with_progress(
                    DIALOG_TITLE,
                    &format!("Installing {component} into game prefix ..."),
                    || self.winetricks.install(&component, env),
                )
                .map_err(|source| InstallError {
                    component: component.clone(),
                    prefix: sandbox.path.clone(),
                    source,
                })?;

            self.feedback.notify(&format!("Installed: {component}"));
            installed.insert(component.clone());
            newly_installed.push(component);
        }

        if let Err(error) = fs::write(&marker, "ok\n") {
            warn!(%error, marker = %marker.display(), "failed to write runtime marker");
        }

        Ok(EnsureOutcome::Installed(newly_installed))
    }
}

#[cfg(test)]
mod tests {
    use assert_fs::{
        TempDir,
        prelude::{FileTouch, PathChild},
    };
    use pretty_assertions::assert_eq;
    use wemod_env::RuntimeEnvironment;

    use super::{DependencyInstaller, EnsureOutcome, RUNTIME_READY_MARKER, parse_installed};
    use crate::{
        commands::launch::prefix::SandboxTarget,
        testing::{Call, FakeRunner, RecordingFeedback},
    };

    fn components() -> Vec<String> {
        vec!["corefonts".to_string(), "dotnet48".to_string()]
    }

    fn sandbox(dir: &TempDir) -> SandboxTarget {
        SandboxTarget {
            path: dir.path().to_path_buf(),
            game_owned: true,
        }
    }

    #[test]
    fn parses_installed_components() {
        let output = "\nCoreFonts\n  vcrun2019 \n------------------------------------------------------\nWarning: You are using a 64-bit WINEPREFIX\n";

        assert_eq!(
            vec![
                "------------------------------------------------------",
                "corefonts",
                "vcrun2019"
            ],
            parse_installed(output).into_iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn installs_missing_components_and_writes_marker() {
        let prefix = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        runner.capture_output("winetricks list-installed", "corefonts\n");
        let feedback = RecordingFeedback::default();
        let env = RuntimeEnvironment::for_prefix(prefix.path());

        let outcome = DependencyInstaller::new(&runner, &feedback)
            .ensure(&sandbox(&prefix), &components(), &env)
            .unwrap();

        assert_eq!(EnsureOutcome::Installed(vec!["dotnet48".to_string()]), outcome);
        assert_eq!(
            vec!["winetricks -q dotnet48".to_string()],
            runner.commands(Call::Run)
        );
        assert_eq!(
            "ok\n",
            std::fs::read_to_string(prefix.child(RUNTIME_READY_MARKER).path()).unwrap()
        );
        assert!(
            feedback
                .messages()
                .contains(&"Already installed: corefonts".to_string())
        );
        assert_eq!(
            vec![
                "Checking installed components in game prefix ...".to_string(),
                "Installing dotnet48 into game prefix ...".to_string(),
            ],
            feedback.progress()
        );
    }

    #[test]
    fn configured_components_match_regardless_of_case() {
        let prefix = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        runner.capture_output("winetricks list-installed", "corefonts\ndotnet48\n");
        let feedback = RecordingFeedback::default();
        let configured = vec!["CoreFonts".to_string(), " DotNet48 ".to_string()];

        let outcome = DependencyInstaller::new(&runner, &feedback)
            .ensure(
                &sandbox(&prefix),
                &configured,
                &RuntimeEnvironment::for_prefix(prefix.path()),
            )
            .unwrap();

        assert_eq!(EnsureOutcome::Installed(Vec::new()), outcome);
        assert!(runner.commands(Call::Run).is_empty());
        assert!(prefix.child(RUNTIME_READY_MARKER).exists());
    }

    #[test]
    fn passes_environment_to_winetricks() {
        let prefix = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        let feedback = RecordingFeedback::default();
        let env = RuntimeEnvironment::for_prefix(prefix.path()).with("WINE", "/proton/files/bin/wine");

        DependencyInstaller::new(&runner, &feedback)
            .ensure(&sandbox(&prefix), &components(), &env)
            .unwrap();

        assert!(
            runner
                .calls()
                .iter()
                .all(|(_, invocation)| invocation.environment() == &env)
        );
    }

    #[test]
    fn second_call_installs_nothing() {
        let prefix = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        let feedback = RecordingFeedback::default();
        let env = RuntimeEnvironment::for_prefix(prefix.path());
        let installer = DependencyInstaller::new(&runner, &feedback);

        installer
            .ensure(&sandbox(&prefix), &components(), &env)
            .unwrap();
        let calls_after_first = runner.calls().len();

        let outcome = installer
            .ensure(&sandbox(&prefix), &components(), &env)
            .unwrap();

        assert_eq!(EnsureOutcome::AlreadyPrepared, outcome);
        assert_eq!(calls_after_first, runner.calls().len());
        assert_eq!(2, runner.commands(Call::Run).len());
    }

    #[test]
    fn existing_marker_skips_all_tool_calls() {
        let prefix = TempDir::new().unwrap();
        prefix.child(RUNTIME_READY_MARKER).touch().unwrap();
        let runner = FakeRunner::new();
        let feedback = RecordingFeedback::default();

        let outcome = DependencyInstaller::new(&runner, &feedback)
            .ensure(
                &sandbox(&prefix),
                &components(),
                &RuntimeEnvironment::for_prefix(prefix.path()),
            )
            .unwrap();

        assert_eq!(EnsureOutcome::AlreadyPrepared, outcome);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn query_failure_skips_installation() {
        let prefix = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        runner.fail(Call::Capture, "winetricks list-installed", 1);
        let feedback = RecordingFeedback::default();

        let outcome = DependencyInstaller::new(&runner, &feedback)
            .ensure(
                &sandbox(&prefix),
                &components(),
                &RuntimeEnvironment::for_prefix(prefix.path()),
            )
            .unwrap();

        assert_eq!(EnsureOutcome::QuerySkipped, outcome);
        assert!(runner.commands(Call::Run).is_empty());
        assert!(!prefix.child(RUNTIME_READY_MARKER).exists());
    }

    #[test]
    fn install_failure_is_fatal_and_leaves_prefix_unmarked() {
        let prefix = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        runner.fail(Call::Run, "winetricks -q dotnet48", 1);
        let feedback = RecordingFeedback::default();

        let error = DependencyInstaller::new(&runner, &feedback)
            .ensure(
                &sandbox(&prefix),
                &components(),
                &RuntimeEnvironment::for_prefix(prefix.path()),
            )
            .unwrap_err();

        assert_eq!("dotnet48", error.component);
        assert_eq!(
            vec![
                "winetricks -q corefonts".to_string(),
                "winetricks -q dotnet48".to_string(),
            ],
            runner.commands(Call::Run)
        );
        assert!(!prefix.child(RUNTIME_READY_MARKER).exists());
    }

    #[test]
    fn duplicate_components_install_once() {
        let prefix = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        let feedback = RecordingFeedback::default();
        let components = vec!["corefonts".to_string(), "corefonts".to_string()];

        DependencyInstaller::new(&runner, &feedback)
            .ensure(
                &sandbox(&prefix),
                &components,
                &RuntimeEnvironment::for_prefix(prefix.path()),
            )
            .unwrap();

        assert_eq!(
            vec!["winetricks -q corefonts".to_string()],
            runner.commands(Call::Run)
        );
    }
}
