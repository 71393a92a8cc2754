//! Best-effort user feedback: desktop notifications and progress dialogs.
//!
//! Neither is required for a launch to succeed. When `notify-send` or `zenity` are unavailable the
//! feedback degrades to lines on stderr, or to nothing at all.

use std::{
    io::Write,
    path::PathBuf,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use tracing::debug;

pub const APP_NAME: &str = "wemod-launcher";
pub const DIALOG_TITLE: &str = "WeMod Launcher";

/// How long a progress dialog may take to close after its operation finishes.
const DIALOG_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub trait Notifier {
    fn notify(&self, message: &str);
}

pub trait Progress {
    /// Run `operation` while a progress indicator is shown.
    fn with_progress<T, E>(
        &self,
        title: &str,
        text: &str,
        operation: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>;
}

#[derive(Debug, Default)]
pub struct DesktopFeedback {
    notify_send: Option<PathBuf>,
    zenity: Option<PathBuf>,
}

impl DesktopFeedback {
    /// Look up the desktop tools on `PATH`.
    pub fn detect() -> Self {
        let feedback = Self {
            notify_send: which::which("notify-send").ok(),
            zenity: which::which("zenity").ok(),
        };

        debug!(?feedback, "detected desktop feedback tools");
        feedback
    }
}

impl Notifier for DesktopFeedback {
    fn notify(&self, message: &str) {
        eprintln!("[{APP_NAME}] {message}");

        if let Some(notify_send) = &self.notify_send {
            let _ = Command::new(notify_send)
                .args(["-a", APP_NAME, DIALOG_TITLE, message])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}

impl Progress for DesktopFeedback {
    fn with_progress<T, E>(
        &self,
        title: &str,
        text: &str,
        operation: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let Some(zenity) = &self.zenity else {
            return operation();
        };

        let spawned = Command::new(zenity)
            .args(["--progress", "--title", title, "--text", text])
            .args(["--pulsate", "--no-cancel", "--auto-close", "--percentage=0"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let Ok(mut dialog) = spawned else {
            return operation();
        };

        let mut stdin = dialog.stdin.take();
        if let Some(stdin) = stdin.as_mut() {
            let _ = writeln!(stdin, "0");
            let _ = writeln!(stdin, "# {text}");
        }

        let result = operation();

        if let Some(mut stdin) = stdin {
            let _ = writeln!(stdin, "100");
        }

        if !wait_or_kill(&mut dialog, DIALOG_CLOSE_TIMEOUT) {
            debug!("progress dialog did not close in time and was killed");
        }

        result
    }
}

/// Wait up to `timeout` for `child` to exit, killing it otherwise.
///
/// Returns `true` if the child exited on its own.
pub fn wait_or_kill(child: &mut Child, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;

    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(25)),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return false;
            }
        }
    }
}
