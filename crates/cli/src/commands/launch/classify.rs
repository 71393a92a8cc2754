use std::path::Path;

/// Name of the subcommand that may precede a game command, e.g. in `launch -- %command%`.
pub const LAUNCH_SUBCOMMAND: &str = "launch";

/// Proton verb that waits for the prefix to be idle before running the game.
pub const EXIT_WAITING_VERB: &str = "waitforexitandrun";

pub const RUN_VERB: &str = "run";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchMode {
    /// The game command is run as-is and WeMod uses its own prefix.
    Direct,

    /// The game is started through a Proton wrapper script.
    ProtonWrapped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifiedCommand {
    /// Program followed by its arguments. Empty when WeMod should run on its own.
    pub command: Vec<String>,
    pub mode: LaunchMode,
    pub note: Option<&'static str>,
}

impl ClassifiedCommand {
    fn standalone() -> Self {
        Self {
            command: Vec::new(),
            mode: LaunchMode::Direct,
            note: None,
        }
    }

    pub fn is_standalone(&self) -> bool {
        self.command.is_empty()
    }

    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error(
        "invalid game command: {command:?} is a Windows executable without a Proton/Wine wrapper; \
         use the Steam %command% unchanged or pass a Linux/Proton command"
    )]
    WindowsExecutable { command: String },
}

/// Split an incoming argument list into the game command and the way it should be launched.
///
/// Purely syntactic: nothing here touches the filesystem.
pub fn classify<S: AsRef<str>>(args: &[S]) -> Result<ClassifiedCommand, ClassifyError> {
    let mut tokens: &[S] = args;

    if let [first, rest @ ..] = tokens {
        if first.as_ref() == LAUNCH_SUBCOMMAND {
            tokens = rest;
        }
    }

    if let [first, rest @ ..] = tokens {
        if first.as_ref() == "--" {
            tokens = rest;
        }
    }

    let Some(first) = tokens.first() else {
        return Ok(ClassifiedCommand::standalone());
    };

    if let Some(wrapper) = proton_wrapper_index(tokens) {
        return Ok(ClassifiedCommand {
            command: to_owned(&tokens[wrapper..]),
            mode: LaunchMode::ProtonWrapped,
            note: Some("detected Proton launch command"),
        });
    }

    if looks_like_windows_executable(first.as_ref()) {
        return Err(ClassifyError::WindowsExecutable {
            command: first.as_ref().to_string(),
        });
    }

    Ok(ClassifiedCommand {
        command: to_owned(tokens),
        mode: LaunchMode::Direct,
        note: Some("using direct game command"),
    })
}

fn to_owned<S: AsRef<str>>(tokens: &[S]) -> Vec<String> {
    tokens.iter().map(|token| token.as_ref().to_string()).collect()
}

fn base_name(token: &str) -> String {
    Path::new(token)
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Index of a Proton wrapper token directly followed by a launch verb.
///
/// `waitforexitandrun` is preferred over `run`, since Steam command lines can carry both (the
/// runtime entry point takes `--verb=...` but Proton itself takes the bare verb).
fn proton_wrapper_index<S: AsRef<str>>(tokens: &[S]) -> Option<usize> {
    [EXIT_WAITING_VERB, RUN_VERB].into_iter().find_map(|verb| {
        tokens
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, token)| token.as_ref() == verb)
            .map(|(index, _)| index - 1)
            .find(|&wrapper| base_name(tokens[wrapper].as_ref()).contains("proton"))
    })
}

fn looks_like_windows_executable(token: &str) -> bool {
    let lowered = token.trim().to_lowercase();

    base_name(lowered.as_str()).ends_with(".exe")
        || lowered.contains(":\\")
        || lowered.contains(":/")
}
