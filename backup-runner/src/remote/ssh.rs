//! SSH-backed [`RemoteShell`].

use super::{capped_stderr, CommandOutput, RemoteShell, ShellConnector};
use crate::process;
use crate::profile::{SshAuth, SshSpec};
use crate::utils::{BackupError, Result};
use ssh2::{CheckResult, ExtendedData, KnownHostFileKind, Session};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::Duration;

/// How the server's host key is checked during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Require a matching entry in an OpenSSH `known_hosts` file.
    Verify { known_hosts: PathBuf },
    /// Accept whatever key the server presents.
    AcceptAny,
}

/// One authenticated SSH session.
pub struct SshClient {
    session: Session,
    host: String,
}

impl SshClient {
    pub fn connect(spec: &SshSpec, host_keys: &HostKeyPolicy, timeout: Option<Duration>) -> Result<Self> {
        let tcp = TcpStream::connect((spec.host.as_str(), spec.port)).map_err(|e| {
            BackupError::execution(format!("unable to connect to {}:{}: {e}", spec.host, spec.port))
        })?;

        let mut session = Session::new()?;
        if let Some(timeout) = timeout {
            session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        }
        session.set_tcp_stream(tcp);
        session.handshake()?;

        verify_host_key(&session, spec, host_keys)?;

        match &spec.auth {
            SshAuth::Password(password) => session.userauth_password(&spec.user, password),
            SshAuth::Key { path, passphrase } => {
                session.userauth_pubkey_file(&spec.user, None, path, passphrase.as_deref())
            }
            SshAuth::Agent => session.userauth_agent(&spec.user),
        }
        .map_err(|e| BackupError::execution(format!("SSH authentication failed: {e}")))?;

        if !session.authenticated() {
            return Err(BackupError::execution("SSH authentication failed"));
        }

        tracing::info!(host = %spec.host, port = spec.port, user = %spec.user, "SSH session established");

        Ok(Self {
            session,
            host: spec.host.clone(),
        })
    }
}

fn verify_host_key(session: &Session, spec: &SshSpec, policy: &HostKeyPolicy) -> Result<()> {
    let known_hosts = match policy {
        HostKeyPolicy::AcceptAny => {
            tracing::debug!(host = %spec.host, "Host key verification disabled");
            return Ok(());
        }
        HostKeyPolicy::Verify { known_hosts } => known_hosts,
    };

    let (key, _) = session
        .host_key()
        .ok_or_else(|| BackupError::execution("server did not present a host key"))?;

    let mut hosts = session.known_hosts()?;
    hosts
        .read_file(known_hosts, KnownHostFileKind::OpenSSH)
        .map_err(|e| {
            BackupError::precondition(format!(
                "unable to read known hosts file {}: {e}",
                known_hosts.display()
            ))
        })?;

    match hosts.check_port(&spec.host, spec.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => Err(BackupError::precondition(format!(
            "host key for {} not found in {}",
            spec.host,
            known_hosts.display()
        ))),
        CheckResult::Mismatch => Err(BackupError::precondition(format!(
            "host key for {} does not match {}",
            spec.host,
            known_hosts.display()
        ))),
        CheckResult::Failure => Err(BackupError::execution(format!(
            "unable to check host key for {}",
            spec.host
        ))),
    }
}

impl RemoteShell for SshClient {
    fn output(&self, cmd: &str) -> Result<CommandOutput> {
        let mut channel = self.session.channel_session()?;
        channel.handle_extended_data(ExtendedData::Merge)?;
        channel.exec(cmd)?;

        let mut output = String::new();
        channel.read_to_string(&mut output)?;
        channel.wait_close()?;

        Ok(CommandOutput {
            status: channel.exit_status()?,
            output,
        })
    }

    /// Stdout and stderr share the channel window, so stderr is capped on
    /// the remote side and only read once stdout is done.
    fn stream(&self, cmd: &str, sink: &mut dyn Write) -> Result<u64> {
        let mut channel = self.session.channel_session()?;
        channel.exec(&capped_stderr(cmd))?;

        let copied = io::copy(&mut channel, sink).map_err(|e| {
            BackupError::execution(format!("failed to read output of remote command on {}: {e}", self.host))
        })?;

        let mut stderr = Vec::new();
        channel.stderr().read_to_end(&mut stderr)?;
        channel.wait_close()?;

        let status = channel.exit_status()?;
        if status != 0 {
            return Err(BackupError::execution(format!(
                "remote command on {} exited with status {status}: {}",
                self.host,
                process::tail(&stderr)
            )));
        }

        Ok(copied)
    }
}

impl Drop for SshClient {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "backup finished", None) {
            tracing::debug!(host = %self.host, error = %e, "SSH disconnect failed");
        }
    }
}

/// Connects with a fixed host-key policy and optional timeout.
#[derive(Debug, Clone)]
pub struct SshConnector {
    pub host_keys: HostKeyPolicy,
    pub timeout: Option<Duration>,
}

impl ShellConnector for SshConnector {
    fn connect(&self, ssh: &SshSpec) -> Result<Box<dyn RemoteShell>> {
        Ok(Box::new(SshClient::connect(ssh, &self.host_keys, self.timeout)?))
    }
}
