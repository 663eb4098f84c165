//! Local subprocess execution with stdout streamed into a sink.

use crate::utils::{BackupError, Result};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

/// Bytes of stderr kept for error messages.
pub(crate) const STDERR_TAIL: usize = 2048;

/// Resolve `program` on `PATH`.
pub fn find_program(program: &str) -> Result<PathBuf> {
    which::which(program)
        .map_err(|e| BackupError::precondition(format!("{program} not found in PATH: {e}")))
}

pub(crate) fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

/// Run `cmd`, copying its stdout into `sink` as it is produced.
///
/// Stderr is drained on a helper thread so a chatty child cannot fill the
/// pipe and stall. A non-zero exit is an `Execution` error carrying the tail
/// of stderr.
pub fn stream_stdout(cmd: &mut Command, sink: &mut dyn Write) -> Result<u64> {
    let program = cmd.get_program().to_string_lossy().into_owned();

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BackupError::execution(format!("failed to start {program}: {e}")))?;

    let stderr_reader = child.stderr.take().map(|mut stderr| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            buf
        })
    });

    let copied = match child.stdout.take() {
        Some(mut stdout) => io::copy(&mut stdout, sink),
        None => Ok(0),
    };

    let status = child.wait()?;
    let stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    let copied = copied
        .map_err(|e| BackupError::execution(format!("failed to copy output of {program}: {e}")))?;

    if !status.success() {
        return Err(BackupError::execution(format!(
            "{program} exited with {status}: {}",
            tail(&stderr)
        )));
    }

    Ok(copied)
}
