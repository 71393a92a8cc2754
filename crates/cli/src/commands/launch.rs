pub mod classify;
pub mod deps;
pub mod prefix;
pub mod supervisor;
pub mod wine;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Args;
use color_eyre::eyre::{WrapErr, bail, eyre};
use dialoguer::Confirm;
use tracing::{debug, info, warn};
use wemod_env::{CompatVars, RuntimeEnvironment};

use crate::{
    commands::{
        launch::{
            classify::{ClassifiedCommand, LaunchMode, classify},
            deps::DependencyInstaller,
            prefix::{PrefixResolver, SandboxTarget},
            supervisor::{ProcessSupervisor, RetryPolicy},
            wine::{WineTools, is_executable},
        },
        setup,
    },
    config::Config,
    feedback::{DesktopFeedback, Notifier, Progress},
    process::{CancellationToken, ProcessError, ProcessRunner, SystemRunner},
};

#[derive(Args, Debug, Default)]
pub struct LaunchArgs {
    /// Game command to start alongside WeMod, usually Steam's %command%. WeMod is started on its
    /// own if omitted.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// The parts of the configuration a launch depends on.
#[derive(Clone, Debug)]
pub struct LaunchSettings {
    pub companion_exe: PathBuf,
    pub default_prefix: PathBuf,
    pub components: Vec<String>,
    pub start_delay: Duration,
    pub retry: RetryPolicy,
}

impl LaunchSettings {
    pub fn from_config(config: &Config) -> color_eyre::Result<Self> {
        Ok(Self {
            companion_exe: config.wemod_exe()?,
            default_prefix: config.prefix_dir()?,
            components: config.components(),
            start_delay: config.start_delay(),
            retry: config.retry_policy(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// WeMod was started without a game and left running.
    Standalone { companion_pid: u32 },

    /// The game ran and exited.
    GameFinished { companion_started: bool },
}

/// Runs one launch from a classified command to the exit of the game.
pub struct Launcher<'a, R, F> {
    runner: &'a R,
    feedback: &'a F,
    cancel: CancellationToken,
    vars: CompatVars,
    settings: LaunchSettings,
}

impl<'a, R, F> Launcher<'a, R, F>
where
    R: ProcessRunner,
    F: Notifier + Progress,
{
    pub fn new(
        runner: &'a R,
        feedback: &'a F,
        cancel: CancellationToken,
        vars: CompatVars,
        settings: LaunchSettings,
    ) -> Self {
        Self {
            runner,
            feedback,
            cancel,
            vars,
            settings,
        }
    }

    pub fn run(&self, classified: ClassifiedCommand) -> color_eyre::Result<LaunchOutcome> {
        let target = PrefixResolver::new(self.vars.clone())
            .resolve(classified.mode, &self.settings.default_prefix);
        let mode = target.mode();
        let tools = WineTools::select(mode, &classified);
        let env = RuntimeEnvironment::for_prefix(&target.path);

        info!(prefix = %target.path.display(), ?mode, "using WeMod prefix");

        if mode == LaunchMode::ProtonWrapped {
            self.prepare_prefix(&target, &tools, &env);
        }

        let supervisor = ProcessSupervisor::new(
            self.runner,
            self.feedback,
            self.cancel.clone(),
            tools,
            &self.settings.companion_exe,
        )
        .with_retry(self.settings.retry);

        if classified.is_standalone() {
            let companion = supervisor
                .start_companion(&env)
                .wrap_err("failed to start WeMod")?;

            info!(pid = companion.id(), "no game command provided, leaving WeMod running");

            return Ok(LaunchOutcome::Standalone {
                companion_pid: companion.id(),
            });
        }

        let program = classified.program().unwrap_or_default();
        validate_command(program)?;

        info!(command = %classified.command.join(" "), "starting game command");
        let mut game = supervisor
            .start_game(&classified.command)
            .wrap_err("failed to start game")?;

        let companion_started = match mode {
            LaunchMode::ProtonWrapped => {
                info!(delay = ?self.settings.start_delay, "delaying WeMod start until the game has claimed the prefix");
                if let Err(cancelled) = self.cancel.sleep(self.settings.start_delay) {
                    if let Err(kill_error) = game.kill() {
                        warn!(%kill_error, pid = game.id(), "failed to stop game");
                    }

                    return Err(
                        eyre!(cancelled).wrap_err("launch cancelled before WeMod was started")
                    );
                }

                match supervisor.start_with_recovery(&env) {
                    Ok(companion) => {
                        info!(pid = companion.id(), "WeMod started");
                        true
                    }
                    Err(error) => {
                        warn!(%error, "failed to start WeMod after game launch");
                        self.feedback
                            .notify("WeMod could not be started, the game keeps running without it.");
                        false
                    }
                }
            }
            LaunchMode::Direct => match supervisor.start_with_recovery(&env) {
                Ok(companion) => {
                    info!(pid = companion.id(), "WeMod started");
                    true
                }
                Err(error) => {
                    if let Err(kill_error) = game.kill() {
                        warn!(%kill_error, pid = game.id(), "failed to stop game");
                    }

                    return Err(eyre!(error).wrap_err("failed to start WeMod, game was stopped"));
                }
            },
        };

        match game.wait() {
            Ok(status) if status.success() => info!("game process finished"),
            Ok(status) => warn!(%status, "game process exited with error"),
            Err(error @ ProcessError::Cancelled { .. }) => {
                return Err(eyre!(error).wrap_err("launch cancelled while the game was running"));
            }
            Err(error) => warn!(%error, "lost track of the game process"),
        }

        Ok(LaunchOutcome::GameFinished { companion_started })
    }

    /// Install the components WeMod needs into the game's prefix. Failure only warns.
    fn prepare_prefix(&self, target: &SandboxTarget, tools: &WineTools, env: &RuntimeEnvironment) {
        let components = &self.settings.components;

        self.feedback.notify(&format!(
            "Checking game prefix dependencies ({}) ...",
            components.join("/")
        ));

        let installer = DependencyInstaller::new(self.runner, self.feedback);

        match installer.ensure(target, components, &tools.tool_env(env.clone())) {
            Ok(outcome) => {
                debug!(?outcome, "game prefix prepared");
                self.feedback.notify("Game prefix dependencies are ready.");
            }
            Err(error) => {
                warn!(%error, cause = %error.source, "game prefix preparation failed, continuing anyway");
                self.feedback
                    .notify("Prefix preparation failed, starting WeMod anyway ...");
            }
        }
    }
}

/// Check a game program can be spawned before anything is started.
fn validate_command(program: &str) -> color_eyre::Result<()> {
    if program.trim().is_empty() {
        bail!("game command is empty");
    }

    if program.contains(std::path::MAIN_SEPARATOR) {
        let path = Path::new(program);

        if !path.exists() {
            bail!("game command path not found: {program}");
        }

        if !is_executable(path) {
            bail!("game command is not executable: {program}");
        }

        return Ok(());
    }

    which::which(program)
        .map(|_| ())
        .map_err(|_| eyre!("game command not found in PATH: {program}"))
}

/// Make sure WeMod is installed, offering to run setup when it isn't.
fn ensure_companion_installed(
    config: &Config,
    companion_exe: &Path,
    cancel: &CancellationToken,
) -> color_eyre::Result<()> {
    if companion_exe.is_file() {
        return Ok(());
    }

    let run_setup = config.interactive()
        && Confirm::new()
            .with_prompt("WeMod.exe not found. Run setup now?")
            .default(true)
            .interact()?;

    if run_setup {
        setup::setup(config, cancel)?;

        if companion_exe.is_file() {
            return Ok(());
        }
    }

    bail!(
        "WeMod executable missing at {}; run: wemod-launcher setup",
        companion_exe.display()
    )
}

#[tracing::instrument(err, skip_all)]
pub fn launch(
    config: Config,
    args: LaunchArgs,
    cancel: CancellationToken,
) -> color_eyre::Result<()> {
    let classified = classify(&args.command)?;

    if let Some(note) = classified.note {
        info!("{note}");
    }

    let settings = LaunchSettings::from_config(&config)?;
    ensure_companion_installed(&config, &settings.companion_exe, &cancel)?;

    let runner = SystemRunner::new(cancel.clone());
    let feedback = DesktopFeedback::detect();
    let launcher = Launcher::new(&runner, &feedback, cancel, CompatVars::from_env(), settings);

    let outcome = launcher.run(classified)?;
    debug!(?outcome, "launch finished");

    Ok(())
}
