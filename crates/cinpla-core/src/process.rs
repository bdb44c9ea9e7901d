//! Processing of registered actions, in-process or on a configured server.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::action::ActionStore;
use crate::config::Config;
use crate::container::Container;
use crate::convert;
use crate::error::{CinplaError, Result};
use crate::paths;
use crate::processing::{self, PipelineInputs, PipelineReport, ProcessingOptions, TimeSpan};
use crate::remote::handoff::{self, HandoffReport, HandoffRequest};
use crate::remote::Connector;
use crate::toolkit::{EventsRequest, SignalToolkit};

/// Where an action is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Local,
    Server(String),
}

impl Target {
    pub fn parse(name: &str) -> Self {
        if name == "local" {
            Target::Local
        } else {
            Target::Server(name.to_string())
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Local => f.write_str("local"),
            Target::Server(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Local(PipelineReport),
    Remote(HandoffReport),
}

/// Open the container of a registered action.
pub fn action_container(root: &Path, cfg: &Config, action_id: &str) -> Result<Container> {
    ActionStore::project(root).load(action_id)?;
    let path = paths::container_path(root, cfg, action_id);
    if !path.exists() {
        return Err(CinplaError::Validation(format!(
            "action '{action_id}' has no data at '{}'",
            path.display()
        )));
    }
    Container::open(&path)
}

#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub action_id: String,
    pub target: Target,
    /// Falls back to `probe_path` from config.
    pub probe: Option<PathBuf>,
    pub options: ProcessingOptions,
}

pub struct ProcessDeps<'a> {
    pub toolkit: &'a dyn SignalToolkit,
    pub connector: &'a dyn Connector,
}

pub fn process_action(
    root: &Path,
    cfg: &Config,
    req: &ProcessRequest,
    deps: ProcessDeps<'_>,
    on_line: &mut dyn FnMut(&str),
) -> Result<ProcessOutcome> {
    let server = match &req.target {
        Target::Local => None,
        Target::Server(name) => Some(cfg.server(name)?),
    };
    let probe = req.probe.clone().or_else(|| cfg.probe_path.clone());
    if server.is_some() && probe.is_none() {
        return Err(CinplaError::Configuration(
            "missing option 'probe-path' (pass --probe-path or set probe_path in config)"
                .to_string(),
        ));
    }

    let container = action_container(root, cfg, &req.action_id)?;
    let acquisition = convert::acquisition_dir(&container)?;
    tracing::info!(action = %req.action_id, target = %req.target, "processing action");

    match (server, probe) {
        (Some(server), Some(probe)) => {
            let scratch = std::env::temp_dir();
            let report = handoff::run(
                deps.connector,
                server,
                &HandoffRequest {
                    acquisition: &acquisition,
                    probe: &probe,
                    options: &req.options,
                    container: &container,
                    local_scratch: &scratch,
                },
                on_line,
            )?;
            Ok(ProcessOutcome::Remote(report))
        }
        (_, probe) => {
            let report = processing::run(
                deps.toolkit,
                &req.options,
                &PipelineInputs {
                    acquisition: &acquisition,
                    probe: probe.as_deref(),
                    output: container.path(),
                    span: TimeSpan::from_container(&container)?,
                },
            )?;
            Ok(ProcessOutcome::Local(report))
        }
    }
}

/// Process a bare acquisition directory into a container at `output`. This
/// is what a server runs on behalf of [`process_action`].
pub fn process_dir(
    acquisition: &Path,
    output: &Path,
    probe: Option<&Path>,
    options: &ProcessingOptions,
    toolkit: &dyn SignalToolkit,
) -> Result<PipelineReport> {
    if !acquisition.is_dir() {
        return Err(CinplaError::Validation(format!(
            "acquisition directory '{}' does not exist",
            acquisition.display()
        )));
    }
    let duration = match toolkit.events(&EventsRequest {
        acquisition: acquisition.to_path_buf(),
    }) {
        Ok(events) => events.duration_s,
        Err(e) => {
            tracing::warn!(error = %e, "recording duration unknown");
            None
        }
    };
    processing::run(
        toolkit,
        options,
        &PipelineInputs {
            acquisition,
            probe,
            output,
            span: TimeSpan::from_duration(duration),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{AcquisitionReader, OpenEphysReader};
    use crate::container;
    use crate::convert::{Converter, RawCopyConverter};
    use crate::remote::RemoteSession;
    use crate::sorter::Sorter;
    use crate::toolkit::fake::FakeToolkit;
    use crate::toolkit::Events;
    use std::cell::Cell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingConnector {
        connects: Cell<usize>,
    }

    impl Connector for CountingConnector {
        fn connect(&self, server: &crate::config::ServerConfig) -> Result<Box<dyn RemoteSession>> {
            self.connects.set(self.connects.get() + 1);
            Err(CinplaError::Connection {
                host: server.hostname(),
                reason: "unreachable".to_string(),
            })
        }
    }

    fn project(dir: &TempDir) -> Config {
        let cfg = Config::new("lab");
        cfg.save(dir.path()).unwrap();
        cfg
    }

    fn register(dir: &TempDir, cfg: &Config, id: &str) -> Container {
        ActionStore::project(dir.path()).create(id).unwrap();
        let rec = dir.path().join("raw/rat1_20230101_01");
        std::fs::create_dir_all(&rec).unwrap();
        let info = OpenEphysReader.inspect(&rec).unwrap();
        RawCopyConverter
            .convert(&info, &paths::container_path(dir.path(), cfg, id))
            .unwrap()
    }

    fn request(id: &str, target: &str) -> ProcessRequest {
        ProcessRequest {
            action_id: id.to_string(),
            target: Target::parse(target),
            probe: None,
            options: ProcessingOptions::new(Sorter::Klusta, &Default::default()),
        }
    }

    #[test]
    fn target_parse() {
        assert_eq!(Target::parse("local"), Target::Local);
        assert_eq!(Target::parse("myhost"), Target::Server("myhost".to_string()));
    }

    #[test]
    fn unknown_server_fails_before_any_connection() {
        let dir = TempDir::new().unwrap();
        let cfg = project(&dir);
        let connector = CountingConnector::default();
        let toolkit = FakeToolkit::default();
        let err = process_action(
            dir.path(),
            &cfg,
            &request("action-x", "myhost"),
            ProcessDeps {
                toolkit: &toolkit,
                connector: &connector,
            },
            &mut |_| {},
        )
        .unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(err, CinplaError::UnknownServer(ref n) if n == "myhost"));
        assert_eq!(connector.connects.get(), 0);
        assert!(toolkit.calls.borrow().is_empty());
    }

    #[test]
    fn server_target_needs_a_probe() {
        let dir = TempDir::new().unwrap();
        let mut cfg = project(&dir);
        cfg.servers = vec![serde_yaml::from_str("{name: myhost, host: node1, user: bob}").unwrap()];
        register(&dir, &cfg, "rat1-010123-01");
        let connector = CountingConnector::default();
        let err = process_action(
            dir.path(),
            &cfg,
            &request("rat1-010123-01", "myhost"),
            ProcessDeps {
                toolkit: &FakeToolkit::default(),
                connector: &connector,
            },
            &mut |_| {},
        )
        .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(connector.connects.get(), 0);
    }

    #[test]
    fn unreachable_server_is_connection_error() {
        let dir = TempDir::new().unwrap();
        let mut cfg = project(&dir);
        cfg.servers = vec![serde_yaml::from_str("{name: myhost, host: node1, user: bob}").unwrap()];
        register(&dir, &cfg, "rat1-010123-01");
        let probe = dir.path().join("tetrode.prb");
        std::fs::write(&probe, "").unwrap();

        let mut req = request("rat1-010123-01", "myhost");
        req.probe = Some(probe);
        let connector = CountingConnector::default();
        let err = process_action(
            dir.path(),
            &cfg,
            &req,
            ProcessDeps {
                toolkit: &FakeToolkit::default(),
                connector: &connector,
            },
            &mut |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, CinplaError::Connection { .. }));
        assert_eq!(connector.connects.get(), 1);
    }

    #[test]
    fn missing_action_is_reported() {
        let dir = TempDir::new().unwrap();
        let cfg = project(&dir);
        let err = process_action(
            dir.path(),
            &cfg,
            &request("nope", "local"),
            ProcessDeps {
                toolkit: &FakeToolkit::default(),
                connector: &CountingConnector::default(),
            },
            &mut |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, CinplaError::ActionNotFound(_)));
    }

    #[test]
    fn local_target_runs_pipeline_into_container() {
        let dir = TempDir::new().unwrap();
        let cfg = project(&dir);
        let container = register(&dir, &cfg, "rat1-010123-01");
        let toolkit = FakeToolkit::default();
        let connector = CountingConnector::default();

        let outcome = process_action(
            dir.path(),
            &cfg,
            &request("rat1-010123-01", "local"),
            ProcessDeps {
                toolkit: &toolkit,
                connector: &connector,
            },
            &mut |_| {},
        )
        .unwrap();
        let ProcessOutcome::Local(report) = outcome else {
            panic!("expected a local run");
        };
        assert_eq!(report.steps, vec!["spikesorting", "lfp", "mua"]);
        assert_eq!(connector.connects.get(), 0);

        let ephys = container.group(container::ELECTROPHYSIOLOGY).unwrap();
        assert_eq!(
            ephys.attr("sorter").unwrap(),
            Some(serde_yaml::Value::from("klusta"))
        );
        assert!(ephys.path().join("lfp/lfp.done").exists());
    }

    #[test]
    fn process_dir_records_duration_from_events() {
        let dir = TempDir::new().unwrap();
        let acquisition = dir.path().join("acquisition");
        std::fs::create_dir_all(&acquisition).unwrap();
        let toolkit = FakeToolkit {
            events: Events {
                duration_s: Some(42.0),
                events: Vec::new(),
            },
            ..FakeToolkit::default()
        };
        let mut options = ProcessingOptions::new(Sorter::Klusta, &Default::default());
        options.sorting = false;
        options.mua = false;

        let out = dir.path().join("out");
        let report = process_dir(&acquisition, &out, None, &options, &toolkit).unwrap();
        assert_eq!(report.steps, vec!["lfp"]);

        let ephys = Container::open(&out)
            .unwrap()
            .group(container::ELECTROPHYSIOLOGY)
            .unwrap();
        assert_eq!(
            ephys.attr("stop_time").unwrap(),
            Some(crate::quantity::Quantity::seconds(42.0).to_yaml())
        );
        assert_eq!(ephys.attr("sorter").unwrap(), Some(serde_yaml::Value::Null));
    }

    #[test]
    fn process_dir_rejects_missing_acquisition() {
        let dir = TempDir::new().unwrap();
        let options = ProcessingOptions::new(Sorter::Klusta, &Default::default());
        assert!(matches!(
            process_dir(
                &dir.path().join("nope"),
                &dir.path().join("out"),
                None,
                &options,
                &FakeToolkit::default()
            ),
            Err(CinplaError::Validation(_))
        ));
    }
}
