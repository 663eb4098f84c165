//! Command execution on the machine that holds the data.
//!
//! Remote traversal, remote dumps and mirroring only ever talk to a
//! [`RemoteShell`]: run a command and read its combined output, or run a
//! command and stream its stdout somewhere. The SSH implementation lives in
//! [`ssh`]; [`LocalShell`] runs the same commands through the local `sh`.

pub mod ssh;

use crate::process;
use crate::profile::SshSpec;
use crate::utils::{BackupError, Result};
use std::io::Write;
use std::process::Command;

pub use ssh::{HostKeyPolicy, SshClient, SshConnector};

/// Exit status and combined stdout/stderr of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

pub trait RemoteShell {
    /// Run `cmd` to completion and capture its output. A non-zero exit is
    /// reported in `status`, not as an error.
    fn output(&self, cmd: &str) -> Result<CommandOutput>;

    /// Run `cmd` and copy its stdout into `sink`. A non-zero exit is an error.
    fn stream(&self, cmd: &str, sink: &mut dyn Write) -> Result<u64>;
}

/// Opens one shell session per profile.
pub trait ShellConnector {
    fn connect(&self, ssh: &SshSpec) -> Result<Box<dyn RemoteShell>>;
}

/// Single-quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Wrap `cmd` so its stderr is buffered in a temporary file and only the
/// last bytes of it are written once `cmd` has finished. The exit status of
/// `cmd` is kept.
pub fn capped_stderr(cmd: &str) -> String {
    format!(
        "__backup_err=$(mktemp) || exit 1\n\
         {{ {cmd}\n}} 2>\"$__backup_err\"\n\
         __backup_rc=$?\n\
         tail -c {} \"$__backup_err\" >&2\n\
         rm -f \"$__backup_err\"\n\
         exit $__backup_rc\n",
        process::STDERR_TAIL
    )
}

/// Runs commands through the local `sh`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalShell;

impl RemoteShell for LocalShell {
    fn output(&self, cmd: &str) -> Result<CommandOutput> {
        let out = Command::new("sh")
            .args(["-c", cmd])
            .output()
            .map_err(|e| BackupError::execution(format!("failed to start sh: {e}")))?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));

        Ok(CommandOutput {
            status: out.status.code().unwrap_or(-1),
            output,
        })
    }

    fn stream(&self, cmd: &str, sink: &mut dyn Write) -> Result<u64> {
        process::stream_stdout(Command::new("sh").args(["-c", cmd]), sink)
    }
}

/// Hands out [`LocalShell`] regardless of the SSH settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalConnector;

impl ShellConnector for LocalConnector {
    fn connect(&self, ssh: &SshSpec) -> Result<Box<dyn RemoteShell>> {
        tracing::debug!(host = %ssh.host, "Using local shell");
        Ok(Box::new(LocalShell))
    }
}
