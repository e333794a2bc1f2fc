//! The production `Transport`: a fresh `spurs` SSH session per node per command.

use std::path::PathBuf;

use failure::ResultExt;

use spurs::{cmd, Execute, SshShell};

use crate::cluster::Node;

use super::Transport;

/// Logs in as `username`, with either the given private key or the default one
/// (`~/.ssh/id_rsa`).
#[derive(Clone, Debug)]
pub struct SshTransport {
    username: String,
    key: Option<PathBuf>,
}

impl SshTransport {
    pub fn new(username: &str, key: Option<PathBuf>) -> Self {
        SshTransport {
            username: username.to_owned(),
            key,
        }
    }

    fn connect(&self, node: &Node) -> Result<SshShell, failure::Error> {
        let addr = node.ssh_addr();
        let shell = match &self.key {
            Some(key) => SshShell::with_key(&self.username, &addr, key),
            None => SshShell::with_default_key(&self.username, &addr),
        };
        Ok(shell.with_context(|_| format!("unable to connect to {}", addr))?)
    }
}

impl Transport for SshTransport {
    fn run(
        &self,
        node: &Node,
        command: &str,
        allow_error: bool,
    ) -> Result<String, failure::Error> {
        let shell = self.connect(node)?;

        let mut cmd = cmd!("{}", command);
        if allow_error {
            cmd = cmd.allow_error();
        }

        let output = shell.run(cmd)?;
        Ok(output.stdout)
    }
}
