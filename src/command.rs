//! Commands to be run on the cluster.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The placeholder replaced by the node rank when a templated command is dispatched.
pub const NODE_PLACEHOLDER: &str = "{node}";

/// Where a command runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Only on the control node.
    One,
    /// On every participating worker node, concurrently.
    All,
}

/// A shell command plus how to run it. These are cheap to construct and are built fresh for
/// every invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteCommand {
    command: String,
    mode: ExecMode,
    templated: bool,
    allow_error: bool,
}

impl Default for ExecMode {
    fn default() -> Self {
        ExecMode::All
    }
}

impl RemoteCommand {
    /// A command to run wherever `mode` says.
    pub fn new<S: Into<String>>(mode: ExecMode, command: S) -> Self {
        match mode {
            ExecMode::One => RemoteCommand::one(command),
            ExecMode::All => RemoteCommand::all(command),
        }
    }

    /// A command for the control node.
    pub fn one<S: Into<String>>(command: S) -> Self {
        RemoteCommand {
            command: command.into(),
            mode: ExecMode::One,
            templated: false,
            allow_error: false,
        }
    }

    /// A command for all participating workers. `{node}` in the command is replaced by each
    /// node's rank unless `untemplated` is called.
    pub fn all<S: Into<String>>(command: S) -> Self {
        RemoteCommand {
            command: command.into(),
            mode: ExecMode::All,
            templated: true,
            allow_error: false,
        }
    }

    /// Send the command verbatim to every node.
    pub fn untemplated(mut self) -> Self {
        self.templated = false;
        self
    }

    /// Do not treat a non-zero exit as a failure (e.g. `killall` when nothing is running).
    pub fn allow_error(mut self) -> Self {
        self.allow_error = true;
        self
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn allows_error(&self) -> bool {
        self.allow_error
    }

    pub fn as_str(&self) -> &str {
        &self.command
    }

    /// The command line to send to the node with the given rank.
    pub fn render_for(&self, rank: usize) -> String {
        if self.templated {
            self.command.replace(NODE_PLACEHOLDER, &rank.to_string())
        } else {
            self.command.clone()
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)
    }
}
