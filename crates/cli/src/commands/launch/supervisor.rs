use std::{
    fmt, io,
    path::PathBuf,
    process::ExitStatus,
    time::Duration,
};

use tracing::{debug, info, warn};
use wemod_env::RuntimeEnvironment;

use crate::{
    commands::launch::wine::WineTools,
    feedback::Notifier,
    process::{CancellationToken, ChildProcess, Invocation, ProcessError, ProcessRunner},
};

/// How often the companion is started before giving up, and how long the prefix gets to settle
/// after each reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Game,
    Companion,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Game => f.write_str("game"),
            Role::Companion => f.write_str("WeMod"),
        }
    }
}

#[derive(Debug)]
pub struct SupervisedProcess<C> {
    handle: C,
}

impl<C: ChildProcess> SupervisedProcess<C> {
    fn started(handle: C, role: Role) -> Self {
        debug!(%role, pid = handle.id(), "process started");

        Self { handle }
    }

    pub fn id(&self) -> u32 {
        self.handle.id()
    }

    pub fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        self.handle.wait()
    }

    pub fn kill(&mut self) -> io::Result<()> {
        self.handle.kill()
    }
}

/// Every failed attempt to start the companion, oldest first.
#[derive(Debug, thiserror::Error)]
#[error("{}", describe_attempts(.attempts))]
pub struct CompanionStartError {
    pub attempts: Vec<ProcessError>,
}

fn describe_attempts(attempts: &[ProcessError]) -> String {
    attempts
        .iter()
        .enumerate()
        .map(|(index, error)| match index {
            0 => format!("initial error: {error}"),
            1 => format!("retry error: {error}"),
            n => format!("retry {n} error: {error}"),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Starts the game and WeMod.
pub struct ProcessSupervisor<'a, R, F> {
    runner: &'a R,
    feedback: &'a F,
    cancel: CancellationToken,
    tools: WineTools,
    companion_exe: PathBuf,
    retry: RetryPolicy,
}

impl<'a, R, F> ProcessSupervisor<'a, R, F>
where
    R: ProcessRunner,
    F: Notifier,
{
    pub fn new(
        runner: &'a R,
        feedback: &'a F,
        cancel: CancellationToken,
        tools: WineTools,
        companion_exe: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            feedback,
            cancel,
            tools,
            companion_exe: companion_exe.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        Self { retry, ..self }
    }

    /// Start the game command in the inherited environment.
    pub fn start_game(
        &self,
        command: &[String],
    ) -> Result<SupervisedProcess<R::Child>, ProcessError> {
        let Some((program, args)) = command.split_first() else {
            return Err(ProcessError::Spawn {
                program: String::new(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "game command is empty"),
            });
        };

        let handle = self.runner.start(&Invocation::new(program).args(args))?;

        Ok(SupervisedProcess::started(handle, Role::Game))
    }

    /// Start WeMod once under the selected wine.
    pub fn start_companion(
        &self,
        env: &RuntimeEnvironment,
    ) -> Result<SupervisedProcess<R::Child>, ProcessError> {
        if self.tools.is_bundled() {
            info!("starting WeMod with Proton wine binary");
        } else {
            info!("starting WeMod with system wine");
        }

        let companion = Invocation::new(&self.tools.wine)
            .arg(&self.companion_exe)
            .env(env.clone());

        let handle = self.runner.start(&companion)?;

        Ok(SupervisedProcess::started(handle, Role::Companion))
    }

    /// Start WeMod, resetting the prefix with `wineboot -u` between failed attempts.
    ///
    /// A failed reset doesn't stop the next attempt. The returned error keeps the cause of every
    /// attempt.
    pub fn start_with_recovery(
        &self,
        env: &RuntimeEnvironment,
    ) -> Result<SupervisedProcess<R::Child>, CompanionStartError> {
        let mut attempts = Vec::new();

        for attempt in 0..self.retry.max_attempts.max(1) {
            if attempt > 0 {
                if attempt == 1 {
                    self.feedback
                        .notify("WeMod start failed, initializing Wine and retrying ...");
                }

                self.reset_prefix(env);

                if self.cancel.sleep(self.retry.backoff).is_err() {
                    attempts.push(ProcessError::Cancelled {
                        program: self.tools.wine.to_string_lossy().into_owned(),
                    });
                    break;
                }
            }

            match self.start_companion(env) {
                Ok(process) => {
                    if attempt > 0 {
                        self.feedback.notify("WeMod started successfully on retry.");
                    }

                    return Ok(process);
                }
                Err(error) => {
                    warn!(attempt = attempt + 1, %error, "WeMod start failed");
                    attempts.push(error);
                }
            }
        }

        Err(CompanionStartError { attempts })
    }

    fn reset_prefix(&self, env: &RuntimeEnvironment) {
        let reset = Invocation::new(&self.tools.wineboot)
            .arg("-u")
            .env(env.clone());

        if let Err(error) = self.runner.run(&reset) {
            warn!(%error, command = %reset, "wineboot recovery failed");
        }
    }
}
