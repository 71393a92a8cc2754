use std::{
    ffi::{OsStr, OsString},
    fmt,
    io::{self, Read},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::debug;
use wemod_env::{CommandExt, RuntimeEnvironment};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared flag set on SIGINT/SIGTERM.
///
/// Waits, sleeps and transfers observe it and return early. Processes started in the background
/// are left running.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation was cancelled")]
pub struct Cancelled;

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early if the token is cancelled.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let deadline = Instant::now() + duration;

        loop {
            if self.is_cancelled() {
                return Err(Cancelled);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }

            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited unsuccessfully ({status})")]
    Exit { program: String, status: ExitStatus },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} was cancelled")]
    Cancelled { program: String },
}

/// A program, its arguments and the environment overlaid when it is spawned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
    env: RuntimeEnvironment,
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            env: RuntimeEnvironment::default(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    pub fn env(self, env: RuntimeEnvironment) -> Self {
        Self { env, ..self }
    }

    pub fn environment(&self) -> &RuntimeEnvironment {
        &self.env
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).with_runtime_env(&self.env);
        command
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;

        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }

        Ok(())
    }
}

/// A process started by a [`ProcessRunner`].
pub trait ChildProcess: fmt::Debug {
    fn id(&self) -> u32;

    /// Block until the process exits.
    fn wait(&mut self) -> Result<ExitStatus, ProcessError>;

    fn kill(&mut self) -> io::Result<()>;
}

/// Capability to spawn external programs. Spawned programs inherit stdin, stdout and stderr.
pub trait ProcessRunner {
    type Child: ChildProcess;

    /// Run to completion; a non-zero exit is an error.
    fn run(&self, invocation: &Invocation) -> Result<(), ProcessError>;

    /// Run to completion and return stdout followed by stderr.
    fn capture(&self, invocation: &Invocation) -> Result<String, ProcessError>;

    /// Start without waiting for the process to exit.
    fn start(&self, invocation: &Invocation) -> Result<Self::Child, ProcessError>;
}

/// Runs real processes, observing a [`CancellationToken`] while waiting on them.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    cancel: CancellationToken,
}

impl SystemRunner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

impl ProcessRunner for SystemRunner {
    type Child = SystemChild;

    fn run(&self, invocation: &Invocation) -> Result<(), ProcessError> {
        debug!(command = %invocation, "run command");

        let mut child = self.start(invocation)?;
        let status = child.wait()?;

        if status.success() {
            Ok(())
        } else {
            Err(ProcessError::Exit {
                program: invocation.program_name(),
                status,
            })
        }
    }

    fn capture(&self, invocation: &Invocation) -> Result<String, ProcessError> {
        debug!(command = %invocation, "capture command");

        let program = invocation.program_name();
        if self.cancel.is_cancelled() {
            return Err(ProcessError::Cancelled { program });
        }

        let mut child = invocation
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        // Readers are detached on cancellation, grandchildren may still hold the pipes.
        let status = SystemChild {
            program: program.clone(),
            child,
            cancel: self.cancel.clone(),
        }
        .wait()?;

        if !status.success() {
            return Err(ProcessError::Exit { program, status });
        }

        let mut combined = String::from_utf8_lossy(&collect(stdout)).into_owned();
        combined.push_str(&String::from_utf8_lossy(&collect(stderr)));

        Ok(combined)
    }

    fn start(&self, invocation: &Invocation) -> Result<SystemChild, ProcessError> {
        debug!(command = %invocation, "start command");

        let program = invocation.program_name();
        if self.cancel.is_cancelled() {
            return Err(ProcessError::Cancelled { program });
        }

        let child = invocation
            .command()
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        Ok(SystemChild {
            program,
            child,
            cancel: self.cancel.clone(),
        })
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        buffer
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|reader| reader.join().ok())
        .unwrap_or_default()
}

#[derive(Debug)]
pub struct SystemChild {
    program: String,
    child: Child,
    cancel: CancellationToken,
}

impl ChildProcess for SystemChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    /// Polls for exit so that cancellation can interrupt the wait. A cancelled wait kills the
    /// process it was waiting on.
    fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        loop {
            let exited = self.child.try_wait().map_err(|source| ProcessError::Wait {
                program: self.program.clone(),
                source,
            })?;

            if let Some(status) = exited {
                return Ok(status);
            }

            if self.cancel.is_cancelled() {
                let _ = self.child.kill();
                let _ = self.child.wait();

                return Err(ProcessError::Cancelled {
                    program: self.program.clone(),
                });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()?;
        self.child.wait().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use pretty_assertions::assert_eq;
    use wemod_env::RuntimeEnvironment;

    use super::*;

    #[test]
    fn displays_invocation() {
        let invocation = Invocation::new("winetricks")
            .args(["-q", "corefonts"])
            .env(RuntimeEnvironment::for_prefix("/pfx"));

        assert_eq!("winetricks -q corefonts", invocation.to_string());
        assert_eq!(
            Some(std::path::Path::new("/pfx")),
            invocation.environment().prefix()
        );
    }

    #[test]
    fn cancelled_sleep_returns_early() {
        let token = CancellationToken::new();
        token.cancel();

        let started = Instant::now();
        assert_eq!(Err(Cancelled), token.sleep(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn uncancelled_sleep_completes() {
        let token = CancellationToken::new();
        assert_eq!(Ok(()), token.sleep(Duration::from_millis(10)));
    }

    #[test]
    fn reports_missing_program() {
        let runner = SystemRunner::new(CancellationToken::new());
        let error = runner
            .run(&Invocation::new("/nonexistent/wemod-launcher-test-binary"))
            .unwrap_err();

        assert!(matches!(error, ProcessError::Spawn { .. }));
    }

    #[test]
    fn reports_unsuccessful_exit() {
        let runner = SystemRunner::new(CancellationToken::new());
        let error = runner.run(&Invocation::new("false")).unwrap_err();

        assert!(matches!(error, ProcessError::Exit { program, .. } if program == "false"));
    }

    #[test]
    fn captures_stdout_then_stderr() {
        let runner = SystemRunner::new(CancellationToken::new());
        let output = runner
            .capture(&Invocation::new("sh").args(["-c", "echo err >&2; echo out"]))
            .unwrap();

        assert_eq!("out\nerr\n", output);
    }

    #[test]
    fn cancelling_stops_capture() {
        let token = CancellationToken::new();
        let runner = SystemRunner::new(token.clone());
        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                token.cancel();
            })
        };

        let started = Instant::now();
        let result = runner.capture(&Invocation::new("sleep").arg("30"));
        canceller.join().unwrap();

        assert!(matches!(result, Err(ProcessError::Cancelled { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn cancelled_wait_kills_child() {
        let token = CancellationToken::new();
        let runner = SystemRunner::new(token.clone());
        let mut child = runner
            .start(&Invocation::new("sleep").arg("30"))
            .unwrap();

        token.cancel();

        let started = Instant::now();
        assert!(matches!(
            child.wait(),
            Err(ProcessError::Cancelled { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
