//! Sessions over the system `ssh` and `scp` binaries.
//!
//! One master connection is authenticated per session and every later
//! command and copy is multiplexed over its control socket, so a password
//! is only ever handed over once.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::ServerConfig;
use crate::error::{CinplaError, Result};

use super::{shell_quote, stream_command, Connector, RemoteSession};

#[derive(Debug, Clone)]
pub struct SshConnector {
    ssh: String,
    scp: String,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self {
            ssh: "ssh".to_string(),
            scp: "scp".to_string(),
        }
    }
}

impl SshConnector {
    fn master_command(
        &self,
        ssh: &Path,
        server: &ServerConfig,
        socket: &Path,
    ) -> Result<Command> {
        let mut cmd = match &server.password {
            Some(password) => {
                let sshpass = which::which("sshpass").map_err(|_| {
                    CinplaError::Configuration(
                        "password authentication needs 'sshpass' on PATH".to_string(),
                    )
                })?;
                let mut cmd = Command::new(sshpass);
                cmd.arg("-e").arg(ssh).env("SSHPASS", password);
                cmd
            }
            None => {
                let mut cmd = Command::new(ssh);
                cmd.args(["-o", "BatchMode=yes"]);
                cmd
            }
        };
        cmd.args(["-o", "ControlMaster=yes", "-o", "ControlPersist=yes"])
            .arg("-o")
            .arg(format!("ControlPath={}", socket.display()))
            .arg("-p")
            .arg(server.port.to_string())
            .args(["-f", "-N"])
            .arg(server.destination());
        Ok(cmd)
    }
}

impl Connector for SshConnector {
    fn connect(&self, server: &ServerConfig) -> Result<Box<dyn RemoteSession>> {
        let ssh = which::which(&self.ssh).map_err(|e| {
            CinplaError::Configuration(format!("'{}' not found on PATH: {e}", self.ssh))
        })?;
        let scp = which::which(&self.scp).map_err(|e| {
            CinplaError::Configuration(format!("'{}' not found on PATH: {e}", self.scp))
        })?;

        let control = tempfile::Builder::new().prefix("cinpla-ssh-").tempdir()?;
        let socket = control.path().join("ctl");

        tracing::info!(host = %server.hostname(), user = %server.user, "connecting");
        let output = self
            .master_command(&ssh, server, &socket)?
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CinplaError::Connection {
                host: server.hostname(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(CinplaError::Connection {
                host: server.hostname(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(Box::new(SshSession {
            ssh,
            scp,
            destination: server.destination(),
            port: server.port,
            socket,
            control: Some(control),
        }))
    }
}

/// A multiplexed session. Dropping it without `close` still tears down the
/// master connection.
#[derive(Debug)]
pub struct SshSession {
    ssh: PathBuf,
    scp: PathBuf,
    destination: String,
    port: u16,
    socket: PathBuf,
    control: Option<tempfile::TempDir>,
}

impl SshSession {
    fn control_opt(&self) -> String {
        format!("ControlPath={}", self.socket.display())
    }

    fn exec_command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.ssh);
        cmd.arg("-o")
            .arg(self.control_opt())
            .arg("-p")
            .arg(self.port.to_string())
            .arg(&self.destination)
            .arg(format!("( {command} ) 2>&1"));
        cmd
    }

    /// `user@host:path` for scp. The remote shell expands the path, so it is
    /// quoted like exec arguments.
    fn remote_path(&self, path: &str) -> String {
        format!("{}:{}", self.destination, shell_quote(path))
    }

    fn scp_command(&self, from: &str, to: &str) -> Command {
        let mut cmd = Command::new(&self.scp);
        cmd.arg("-q")
            .arg("-o")
            .arg(self.control_opt())
            .arg("-P")
            .arg(self.port.to_string())
            .arg(from)
            .arg(to);
        cmd
    }

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        tracing::debug!(from, to, "scp");
        let output = self
            .scp_command(from, to)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CinplaError::Transfer(format!("{from} -> {to}: {e}")))?;
        if !output.status.success() {
            return Err(CinplaError::Transfer(format!(
                "{from} -> {to}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl RemoteSession for SshSession {
    fn exec(&mut self, command: &str, on_line: &mut dyn FnMut(&str)) -> Result<()> {
        tracing::debug!(command, "remote exec");
        let code = stream_command(self.exec_command(command), on_line)?;
        if code != 0 {
            return Err(CinplaError::RemoteCommandFailed {
                command: command.to_string(),
                code,
            });
        }
        Ok(())
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        let to = self.remote_path(remote);
        self.copy(&local.display().to_string(), &to)
    }

    fn download(&mut self, remote: &str, local: &Path) -> Result<()> {
        let from = self.remote_path(remote);
        self.copy(&from, &local.display().to_string())
    }

    fn close(&mut self) -> Result<()> {
        let Some(control) = self.control.take() else {
            return Ok(());
        };
        let output = Command::new(&self.ssh)
            .arg("-o")
            .arg(self.control_opt())
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .output()?;
        drop(control);
        if !output.status.success() {
            return Err(CinplaError::Connection {
                host: self.destination.clone(),
                reason: format!(
                    "closing master connection: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if self.control.is_some() {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "ssh master connection not closed cleanly");
            }
        }
    }
}
