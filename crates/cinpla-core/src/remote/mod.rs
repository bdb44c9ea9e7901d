//! Remote processing servers: the session seam, its SSH implementation and
//! the handoff protocol built on top of it.

pub mod handoff;
pub mod ssh;

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::ServerConfig;
use crate::error::Result;

pub use handoff::{HandoffReport, HandoffRequest};
pub use ssh::{SshConnector, SshSession};

/// An authenticated session on one server.
pub trait RemoteSession {
    /// Run `command` through the remote shell, handing each line of merged
    /// stdout/stderr to `on_line` as it arrives. A non-zero exit is
    /// `RemoteCommandFailed`.
    fn exec(&mut self, command: &str, on_line: &mut dyn FnMut(&str)) -> Result<()>;

    fn upload(&mut self, local: &Path, remote: &str) -> Result<()>;

    fn download(&mut self, remote: &str, local: &Path) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Opens sessions. Failure here is a `Connection` error and is not retried.
pub trait Connector {
    fn connect(&self, server: &ServerConfig) -> Result<Box<dyn RemoteSession>>;
}

/// Quote `arg` for a POSIX shell.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Run `cmd`, streaming its stdout line by line. Returns the exit code,
/// `-1` when killed by a signal.
pub(crate) fn stream_command(mut cmd: Command, on_line: &mut dyn FnMut(&str)) -> Result<i32> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped());
    let mut child = cmd.spawn()?;
    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            on_line(&line?);
        }
    }
    let status = child.wait()?;
    Ok(status.code().unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_leaves_plain_words_alone() {
        assert_eq!(shell_quote("/tmp/cinpla-process-1"), "/tmp/cinpla-process-1");
        assert_eq!(shell_quote("--ms-before"), "--ms-before");
    }

    #[test]
    fn quote_wraps_spaces_and_quotes() {
        assert_eq!(shell_quote("Record Node 101"), "'Record Node 101'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn stream_command_yields_lines_and_code() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo one; echo two; exit 4");
        let mut lines = Vec::new();
        let code = stream_command(cmd, &mut |l| lines.push(l.to_string())).unwrap();
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(code, 4);
    }
}
