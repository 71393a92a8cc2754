//! In-memory stand-ins for process spawning and desktop feedback.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    io,
    os::unix::process::ExitStatusExt,
    process::ExitStatus,
    rc::Rc,
};

use crate::{
    feedback::{Notifier, Progress},
    process::{ChildProcess, Invocation, ProcessError, ProcessRunner},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Call {
    Run,
    Capture,
    Start,
}

/// Records every invocation and fails the ones it was told to.
///
/// Failures are matched against the invocation's display form (`program arg1 arg2`) by prefix.
#[derive(Default)]
pub struct FakeRunner {
    calls: RefCell<Vec<(Call, Invocation)>>,
    failures: RefCell<HashMap<(Call, String), usize>>,
    captured: RefCell<HashMap<String, String>>,
    exit_code: Cell<i32>,
    next_pid: Cell<u32>,
    killed: Rc<RefCell<Vec<u32>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            next_pid: Cell::new(100),
            ..Default::default()
        }
    }

    /// Fail the next `times` calls of kind `call` whose command line starts with `command`.
    pub fn fail(&self, call: Call, command: &str, times: usize) -> &Self {
        self.failures
            .borrow_mut()
            .insert((call, command.to_string()), times);
        self
    }

    pub fn capture_output(&self, command: &str, output: &str) -> &Self {
        self.captured
            .borrow_mut()
            .insert(command.to_string(), output.to_string());
        self
    }

    pub fn exit_with(&self, code: i32) -> &Self {
        self.exit_code.set(code);
        self
    }

    pub fn calls(&self) -> Vec<(Call, Invocation)> {
        self.calls.borrow().clone()
    }

    /// Command lines of all calls of one kind, in order.
    pub fn commands(&self, kind: Call) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|(call, _)| *call == kind)
            .map(|(_, invocation)| invocation.to_string())
            .collect()
    }

    pub fn killed(&self) -> Vec<u32> {
        self.killed.borrow().clone()
    }

    fn record(&self, call: Call, invocation: &Invocation) -> Result<(), ProcessError> {
        self.calls.borrow_mut().push((call, invocation.clone()));

        let line = invocation.to_string();
        let mut failures = self.failures.borrow_mut();
        let matching = failures
            .iter_mut()
            .find(|((kind, prefix), remaining)| {
                *kind == call && **remaining > 0 && line.starts_with(prefix.as_str())
            });

        match matching {
            Some((_, remaining)) => {
                *remaining -= 1;
                Err(ProcessError::Spawn {
                    program: invocation.program_name(),
                    source: io::Error::other(format!("scripted failure #{}", *remaining + 1)),
                })
            }
            None => Ok(()),
        }
    }
}

impl ProcessRunner for FakeRunner {
    type Child = FakeChild;

    fn run(&self, invocation: &Invocation) -> Result<(), ProcessError> {
        self.record(Call::Run, invocation)
    }

    fn capture(&self, invocation: &Invocation) -> Result<String, ProcessError> {
        self.record(Call::Capture, invocation)?;

        let line = invocation.to_string();
        Ok(self
            .captured
            .borrow()
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    fn start(&self, invocation: &Invocation) -> Result<FakeChild, ProcessError> {
        self.record(Call::Start, invocation)?;

        let pid = self.next_pid.get();
        self.next_pid.set(pid + 1);

        Ok(FakeChild {
            pid,
            status: ExitStatus::from_raw(self.exit_code.get() << 8),
            killed: self.killed.clone(),
        })
    }
}

#[derive(Debug)]
pub struct FakeChild {
    pid: u32,
    status: ExitStatus,
    killed: Rc<RefCell<Vec<u32>>>,
}

impl ChildProcess for FakeChild {
    fn id(&self) -> u32 {
        self.pid
    }

    fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        Ok(self.status)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.killed.borrow_mut().push(self.pid);
        Ok(())
    }
}

/// Collects notifications and runs progress operations directly.
#[derive(Default)]
pub struct RecordingFeedback {
    messages: RefCell<Vec<String>>,
    progress: RefCell<Vec<String>>,
}

impl RecordingFeedback {
    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }

    pub fn progress(&self) -> Vec<String> {
        self.progress.borrow().clone()
    }
}

impl Notifier for RecordingFeedback {
    fn notify(&self, message: &str) {
        self.messages.borrow_mut().push(message.to_string());
    }
}

impl Progress for RecordingFeedback {
    fn with_progress<T, E>(
        &self,
        _title: &str,
        text: &str,
        operation: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        self.progress.borrow_mut().push(text.to_string());
        operation()
    }
}
