//! Invocation of the external signal toolkit.
//!
//! Binary vendor formats, filtering and spike sorting live behind a single
//! configured executable that speaks a JSON stdin/stdout protocol.
//!
//! # Protocol
//! `<command> <args...> <op>` with the request JSON on stdin and the response
//! JSON on stdout. Stderr is passed through to the terminal.
//!
//! | op       | request            | response                      |
//! |----------|--------------------|-------------------------------|
//! | `traces` | [`TracesRequest`]  | [`Traces`]                    |
//! | `events` | [`EventsRequest`]  | [`Events`]                    |
//! | `sort`   | [`SortRequest`]    | [`StepReport`]                |
//! | `lfp`    | [`FilterRequest`]  | [`StepReport`]                |
//! | `mua`    | [`FilterRequest`]  | [`StepReport`]                |

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::channels::{Grouping, ReferenceMode};
use crate::config::ToolkitConfig;
use crate::error::{CinplaError, Result};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracesRequest {
    pub acquisition: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<PathBuf>,
    /// Seconds of data from the start of the recording.
    pub window_s: f64,
}

/// Raw traces, one row per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Traces {
    pub sample_rate: f64,
    pub channels: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsRequest {
    pub acquisition: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub time: f64,
    pub full_word: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Events {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Events {
    /// TTL word emitted by the stimulus computer's parallel port.
    pub const TTL_WORD: i64 = 128;

    pub fn ttl_times(&self) -> Vec<f64> {
        self.events
            .iter()
            .filter(|e| e.full_word == Self::TTL_WORD)
            .map(|e| e.time)
            .collect()
    }
}

/// Preprocessing shared by every step that reads continuous data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessing {
    pub reference: ReferenceMode,
    pub grouping: Grouping,
    pub bad_channels: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortRequest {
    pub acquisition: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<PathBuf>,
    pub sorter: String,
    pub params: serde_yaml::Mapping,
    /// Scratch space for intermediate traces; removed by the caller.
    pub workdir: PathBuf,
    pub output: PathBuf,
    #[serde(flatten)]
    pub preprocessing: Preprocessing,
    pub ms_before: f64,
    pub ms_after: f64,
    pub parallel: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRequest {
    pub acquisition: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<PathBuf>,
    pub output: PathBuf,
    pub band: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
    #[serde(flatten)]
    pub preprocessing: Preprocessing,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepReport {
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

// ---------------------------------------------------------------------------
// SignalToolkit
// ---------------------------------------------------------------------------

/// Opaque signal processing backend.
pub trait SignalToolkit {
    fn traces(&self, req: &TracesRequest) -> Result<Traces>;
    fn events(&self, req: &EventsRequest) -> Result<Events>;
    fn sort(&self, req: &SortRequest) -> Result<StepReport>;
    fn lfp(&self, req: &FilterRequest) -> Result<StepReport>;
    fn mua(&self, req: &FilterRequest) -> Result<StepReport>;
}

/// The configured toolkit executable.
#[derive(Debug, Clone)]
pub struct ExternalToolkit {
    command: String,
    args: Vec<String>,
}

impl ExternalToolkit {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(cfg: &ToolkitConfig) -> Self {
        Self::new(cfg.command.clone(), cfg.args.clone())
    }

    /// Resolve the executable. A missing one is a configuration problem.
    fn program(&self) -> Result<PathBuf> {
        which::which(&self.command).map_err(|e| {
            CinplaError::Configuration(format!(
                "signal toolkit '{}' not found: {e} (set toolkit.command in config)",
                self.command
            ))
        })
    }

    fn call<Req: Serialize, Resp: DeserializeOwned>(&self, op: &str, req: &Req) -> Result<Resp> {
        let program = self.program()?;
        let failed = |reason: String| CinplaError::ToolkitFailed {
            op: op.to_string(),
            reason,
        };
        let input = serde_json::to_string(req)?;

        let mut cmd = Command::new(&program);
        cmd.args(&self.args)
            .arg(op)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        tracing::debug!(program = %program.display(), op, "invoking signal toolkit");

        let mut child = cmd.spawn().map_err(|e| failed(e.to_string()))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .map_err(|e| failed(format!("failed to write stdin: {e}")))?;
        }
        let output = child.wait_with_output().map_err(|e| failed(e.to_string()))?;

        if !output.status.success() {
            return Err(failed(format!("exited with {}", output.status)));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| failed(format!("invalid response: {e}")))
    }
}

impl SignalToolkit for ExternalToolkit {
    fn traces(&self, req: &TracesRequest) -> Result<Traces> {
        self.call("traces", req)
    }

    fn events(&self, req: &EventsRequest) -> Result<Events> {
        self.call("events", req)
    }

    fn sort(&self, req: &SortRequest) -> Result<StepReport> {
        self.call("sort", req)
    }

    fn lfp(&self, req: &FilterRequest) -> Result<StepReport> {
        self.call("lfp", req)
    }

    fn mua(&self, req: &FilterRequest) -> Result<StepReport> {
        self.call("mua", req)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("toolkit.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn ttl_times_filter_full_word() {
        let events = Events {
            duration_s: Some(10.0),
            events: vec![
                Event { time: 1.0, full_word: 128 },
                Event { time: 1.5, full_word: 0 },
                Event { time: 2.0, full_word: 128 },
            ],
        };
        assert_eq!(events.ttl_times(), vec![1.0, 2.0]);
    }

    #[test]
    fn missing_executable_is_configuration_error() {
        let tk = ExternalToolkit::new("cinpla-toolkit-does-not-exist", vec![]);
        let err = tk
            .events(&EventsRequest {
                acquisition: PathBuf::from("/nope"),
            })
            .unwrap_err();
        assert!(err.is_configuration(), "got {err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn op_is_passed_last_and_response_parsed() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("args");
        let body = format!(
            "echo \"$@\" > '{}'\ncat > /dev/null\necho '{{\"duration_s\": 4.0, \"events\": [{{\"time\": 0.5, \"full_word\": 128}}]}}'",
            log.display()
        );
        let path = script(dir.path(), &body);
        let tk = ExternalToolkit::new(path.to_string_lossy(), vec!["--verbose".to_string()]);

        let events = tk
            .events(&EventsRequest {
                acquisition: dir.path().to_path_buf(),
            })
            .unwrap();
        assert_eq!(events.duration_s, Some(4.0));
        assert_eq!(events.ttl_times(), vec![0.5]);
        assert_eq!(std::fs::read_to_string(&log).unwrap().trim(), "--verbose events");
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_toolkit_failure() {
        let dir = TempDir::new().unwrap();
        let path = script(dir.path(), "cat > /dev/null\nexit 3");
        let tk = ExternalToolkit::new(path.to_string_lossy(), vec![]);
        let err = tk
            .events(&EventsRequest {
                acquisition: dir.path().to_path_buf(),
            })
            .unwrap_err();
        assert!(matches!(err, CinplaError::ToolkitFailed { ref op, .. } if op == "events"));
    }

    #[cfg(unix)]
    #[test]
    fn garbage_response_is_toolkit_failure() {
        let dir = TempDir::new().unwrap();
        let path = script(dir.path(), "cat > /dev/null\necho not-json");
        let tk = ExternalToolkit::new(path.to_string_lossy(), vec![]);
        assert!(matches!(
            tk.traces(&TracesRequest {
                acquisition: dir.path().to_path_buf(),
                probe: None,
                window_s: 10.0,
            }),
            Err(CinplaError::ToolkitFailed { .. })
        ));
    }
}
