//! Hand an acquisition to a processing server and bring the results home.
//!
//! # Protocol
//! 1. connect (no retry)
//! 2. `mkdir -p <scratch_root>/cinpla-process-<uuid>`
//! 3. tar the acquisition locally, upload it with the probe and sorter
//!    parameters
//! 4. unpack into `acquisition/` remotely, drop both tars
//! 5. `<program> process-dir acquisition --output . <flags>`, streamed
//! 6. tar `processing/` remotely, download, replace the local
//!    `processing/electrophysiology`, record metadata
//! 7. teardown: remote scratch, local scratch, session. Always runs; its
//!    problems are [`CleanupWarning`]s and never replace the original error.

use std::path::Path;

use serde::Serialize;

use crate::archive;
use crate::config::ServerConfig;
use crate::container::{self, Container};
use crate::error::{CinplaError, Result};
use crate::io::{CleanupWarning, ScratchDir};
use crate::processing::{self, ProcessingOptions, TimeSpan};

use super::{shell_quote, Connector, RemoteSession};

const ACQUISITION_TAR: &str = "acquisition.tar";
const PROCESSING_TAR: &str = "processing.tar";
const SORTER_PARAMS_FILE: &str = "sorter_params.yaml";

#[derive(Debug, Clone)]
pub struct HandoffRequest<'a> {
    /// Raw session directory inside the local container.
    pub acquisition: &'a Path,
    pub probe: &'a Path,
    pub options: &'a ProcessingOptions,
    /// Container receiving the results.
    pub container: &'a Container,
    /// Parent of the local scratch directory.
    pub local_scratch: &'a Path,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HandoffReport {
    pub server: String,
    pub remote_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_bad_channels: Option<Vec<usize>>,
    pub warnings: Vec<CleanupWarning>,
}

fn validate(req: &HandoffRequest<'_>) -> Result<()> {
    if !req.acquisition.is_dir() {
        return Err(CinplaError::Validation(format!(
            "acquisition directory '{}' does not exist",
            req.acquisition.display()
        )));
    }
    if !req.probe.is_file() {
        return Err(CinplaError::Validation(format!(
            "probe file '{}' does not exist",
            req.probe.display()
        )));
    }
    if req.probe.file_name().is_none() {
        return Err(CinplaError::Validation(format!(
            "probe path '{}' has no file name",
            req.probe.display()
        )));
    }
    Ok(())
}

/// Run the full handoff against `server`. Remote output lines are passed to
/// `on_line` as they arrive.
pub fn run(
    connector: &dyn Connector,
    server: &ServerConfig,
    req: &HandoffRequest<'_>,
    on_line: &mut dyn FnMut(&str),
) -> Result<HandoffReport> {
    validate(req)?;
    let mut session = connector.connect(server)?;

    let remote_dir = format!(
        "{}/cinpla-process-{}",
        server.scratch_root.trim_end_matches('/'),
        uuid::Uuid::new_v4().simple()
    );
    let mut report = HandoffReport {
        server: server.name.clone(),
        remote_dir: remote_dir.clone(),
        ..Default::default()
    };

    let mut local = None;
    let result = process_remotely(
        session.as_mut(),
        server,
        req,
        &remote_dir,
        &mut local,
        on_line,
    );
    report.warnings = teardown(session.as_mut(), server, &remote_dir, local);

    report.detected_bad_channels = result?;
    tracing::info!(server = %server.name, "remote processing finished");
    Ok(report)
}

fn process_remotely(
    session: &mut dyn RemoteSession,
    server: &ServerConfig,
    req: &HandoffRequest<'_>,
    remote_dir: &str,
    local: &mut Option<ScratchDir>,
    on_line: &mut dyn FnMut(&str),
) -> Result<Option<Vec<usize>>> {
    let dir = shell_quote(remote_dir);
    let remote = |name: &str| format!("{remote_dir}/{name}");

    tracing::info!(remote_dir, "staging remote scratch directory");
    session.exec(&format!("mkdir -p {dir}"), &mut |_| {})?;

    let scratch = local.insert(ScratchDir::create_in(req.local_scratch, "cinpla-process-")?);
    let tar = scratch.path().join(ACQUISITION_TAR);
    tracing::info!(acquisition = %req.acquisition.display(), "packaging acquisition");
    archive::pack(req.acquisition, &tar)?;

    tracing::info!(server = %server.name, "uploading acquisition");
    session.upload(&tar, &remote(ACQUISITION_TAR))?;
    let probe_name = req
        .probe
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    session.upload(req.probe, &remote(&probe_name))?;

    let mut flags = vec![
        "--probe-path".to_string(),
        probe_name.clone(),
    ];
    if !req.options.sorter_params.is_empty() {
        let params = scratch.path().join(SORTER_PARAMS_FILE);
        std::fs::write(&params, serde_yaml::to_string(&req.options.sorter_params)?)?;
        session.upload(&params, &remote(SORTER_PARAMS_FILE))?;
        flags.extend(["--sorter-params".to_string(), SORTER_PARAMS_FILE.to_string()]);
    }
    flags.extend(req.options.to_flags());

    tracing::info!("unpacking acquisition on server");
    session.exec(
        &format!(
            "cd {dir} && mkdir -p acquisition && tar -xf {ACQUISITION_TAR} -C acquisition && rm {ACQUISITION_TAR}"
        ),
        &mut |_| {},
    )?;
    std::fs::remove_file(&tar)?;

    let quoted: Vec<String> = flags.iter().map(|f| shell_quote(f)).collect();
    let command = format!(
        "cd {dir} && {} process-dir acquisition --output . {}",
        server.program,
        quoted.join(" ")
    );
    tracing::info!(command = %command, "running remote pipeline");
    session.exec(&command, on_line)?;

    tracing::info!("collecting results");
    session.exec(
        &format!("cd {dir} && tar -cf {PROCESSING_TAR} processing"),
        &mut |_| {},
    )?;
    let results = scratch.path().join(PROCESSING_TAR);
    session.download(&remote(PROCESSING_TAR), &results)?;

    if req.container.remove(container::ELECTROPHYSIOLOGY)? {
        tracing::info!("replaced previous electrophysiology results");
    }
    archive::unpack(&results, req.container.path())?;

    let ephys = req.container.require_group(container::ELECTROPHYSIOLOGY)?;
    let detected = processing::recorded_detection(&ephys)?;
    let span = TimeSpan::from_container(req.container)?;
    processing::record_metadata(&ephys, req.options, detected.as_deref(), &span)?;
    Ok(detected)
}

fn teardown(
    session: &mut dyn RemoteSession,
    server: &ServerConfig,
    remote_dir: &str,
    local: Option<ScratchDir>,
) -> Vec<CleanupWarning> {
    let mut warnings = Vec::new();

    if let Err(e) = session.exec(&format!("rm -rf {}", shell_quote(remote_dir)), &mut |_| {}) {
        let warning = CleanupWarning {
            target: format!("{}:{remote_dir}", server.hostname()),
            reason: e.to_string(),
        };
        tracing::warn!(warning = %warning, "remote scratch directory left behind");
        warnings.push(warning);
    }
    if let Some(w) = local.and_then(ScratchDir::remove) {
        warnings.push(w);
    }
    if let Err(e) = session.close() {
        let warning = CleanupWarning {
            target: format!("session to {}", server.hostname()),
            reason: e.to_string(),
        };
        tracing::warn!(warning = %warning, "session not closed cleanly");
        warnings.push(warning);
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingConfig;
    use crate::processing::PipelineInputs;
    use crate::quantity::Quantity;
    use crate::remote::stream_command;
    use crate::sorter::Sorter;
    use crate::channels::BadChannels;
    use crate::toolkit::fake::FakeToolkit;
    use crate::toolkit::Traces;
    use std::cell::{Cell, RefCell};
    use std::process::Command;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Runs "remote" commands with the local shell; remote paths are local.
    struct Loopback {
        commands: Rc<RefCell<Vec<String>>>,
        closed: Rc<Cell<bool>>,
        fail_download: bool,
    }

    impl RemoteSession for Loopback {
        fn exec(&mut self, command: &str, on_line: &mut dyn FnMut(&str)) -> Result<()> {
            self.commands.borrow_mut().push(command.to_string());
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(format!("( {command} ) 2>&1"));
            let code = stream_command(cmd, on_line)?;
            if code != 0 {
                return Err(CinplaError::RemoteCommandFailed {
                    command: command.to_string(),
                    code,
                });
            }
            Ok(())
        }

        fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
            std::fs::copy(local, remote)
                .map(|_| ())
                .map_err(|e| CinplaError::Transfer(e.to_string()))
        }

        fn download(&mut self, remote: &str, local: &Path) -> Result<()> {
            if self.fail_download {
                return Err(CinplaError::Transfer("connection reset".to_string()));
            }
            std::fs::copy(remote, local)
                .map(|_| ())
                .map_err(|e| CinplaError::Transfer(e.to_string()))
        }

        fn close(&mut self) -> Result<()> {
            self.closed.set(true);
            Ok(())
        }
    }

    #[derive(Default)]
    struct LoopbackConnector {
        refuse: bool,
        fail_download: bool,
        connects: Cell<usize>,
        commands: Rc<RefCell<Vec<String>>>,
        closed: Rc<Cell<bool>>,
    }

    impl Connector for LoopbackConnector {
        fn connect(&self, server: &ServerConfig) -> Result<Box<dyn RemoteSession>> {
            self.connects.set(self.connects.get() + 1);
            if self.refuse {
                return Err(CinplaError::Connection {
                    host: server.hostname(),
                    reason: "Permission denied (publickey)".to_string(),
                });
            }
            Ok(Box::new(Loopback {
                commands: Rc::clone(&self.commands),
                closed: Rc::clone(&self.closed),
                fail_download: self.fail_download,
            }))
        }
    }

    struct Fixture {
        _dir: TempDir,
        remote_root: std::path::PathBuf,
        local_scratch: std::path::PathBuf,
        acquisition: std::path::PathBuf,
        probe: std::path::PathBuf,
        container: Container,
    }

    fn fixture(name: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let remote_root = dir.path().join("remote");
        let local_scratch = dir.path().join("scratch");
        std::fs::create_dir_all(&remote_root).unwrap();
        std::fs::create_dir_all(&local_scratch).unwrap();

        let container = Container::create(&dir.path().join(name).join("main.exdir")).unwrap();
        let acq = container.require_group(container::ACQUISITION).unwrap();
        acq.set_attr("start_time", Quantity::seconds(0.0).to_yaml()).unwrap();
        acq.set_attr("stop_time", Quantity::seconds(600.0).to_yaml()).unwrap();
        let acquisition = acq.path().join("rat1_20230101_01");
        std::fs::create_dir_all(acquisition.join("Record Node 101")).unwrap();
        std::fs::write(acquisition.join("Record Node 101/continuous.dat"), b"\0\0\0\0").unwrap();

        let probe = dir.path().join("tetrode.prb");
        std::fs::write(&probe, "channel_groups = {}").unwrap();

        Fixture {
            remote_root,
            local_scratch,
            acquisition,
            probe,
            container,
            _dir: dir,
        }
    }

    fn server(remote_root: &Path, program: &str) -> ServerConfig {
        ServerConfig {
            name: "node1".to_string(),
            host: "node1".to_string(),
            domain: None,
            user: "alice".to_string(),
            password: None,
            port: 22,
            scratch_root: remote_root.display().to_string(),
            program: program.to_string(),
        }
    }

    fn options() -> ProcessingOptions {
        ProcessingOptions::new(Sorter::Klusta, &ProcessingConfig::default())
    }

    fn request<'a>(f: &'a Fixture, opts: &'a ProcessingOptions) -> HandoffRequest<'a> {
        HandoffRequest {
            acquisition: &f.acquisition,
            probe: &f.probe,
            options: opts,
            container: &f.container,
            local_scratch: &f.local_scratch,
        }
    }

    fn is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    /// A stand-in remote program: checks the staged inputs, writes a result
    /// file and echoes progress.
    const FAKE_PIPELINE: &str = "test -f acquisition/'Record Node 101'/continuous.dat && test -f tetrode.prb && mkdir -p processing/electrophysiology/lfp && echo done > processing/electrophysiology/lfp/lfp.done && echo sorted && true";

    #[test]
    fn successful_handoff_brings_results_home_and_cleans_up() {
        let f = fixture("ok");
        let opts = options();
        let connector = LoopbackConnector::default();
        let mut lines = Vec::new();

        let report = run(
            &connector,
            &server(&f.remote_root, FAKE_PIPELINE),
            &request(&f, &opts),
            &mut |l| lines.push(l.to_string()),
        )
        .unwrap();

        assert!(report.warnings.is_empty());
        assert!(report.remote_dir.contains("cinpla-process-"));
        assert_eq!(lines, vec!["sorted"]);
        assert!(f
            .container
            .path()
            .join("processing/electrophysiology/lfp/lfp.done")
            .exists());

        let ephys = f.container.group(container::ELECTROPHYSIOLOGY).unwrap();
        assert_eq!(
            ephys.attr("sorter").unwrap(),
            Some(serde_yaml::Value::from("klusta"))
        );
        assert!(is_empty(&f.remote_root));
        assert!(is_empty(&f.local_scratch));
        assert!(connector.closed.get());

        let commands = connector.commands.borrow();
        assert!(commands[0].starts_with("mkdir -p "));
        assert!(commands
            .iter()
            .any(|c| c.contains("process-dir acquisition --output . --probe-path tetrode.prb --sorter klusta")));
        assert!(commands.last().unwrap().starts_with("rm -rf "));
    }

    #[test]
    fn remote_failure_still_tears_down_everything() {
        let f = fixture("fail");
        let opts = options();
        let connector = LoopbackConnector::default();

        let err = run(
            &connector,
            &server(&f.remote_root, "false"),
            &request(&f, &opts),
            &mut |_| {},
        )
        .unwrap_err();

        assert!(matches!(err, CinplaError::RemoteCommandFailed { code: 1, .. }));
        assert!(is_empty(&f.remote_root), "remote scratch left behind");
        assert!(is_empty(&f.local_scratch), "local scratch left behind");
        assert!(connector.closed.get());
        assert!(connector
            .commands
            .borrow()
            .last()
            .unwrap()
            .starts_with("rm -rf "));
    }

    #[test]
    fn download_failure_is_transfer_error_after_cleanup() {
        let f = fixture("dl");
        let opts = options();
        let connector = LoopbackConnector {
            fail_download: true,
            ..Default::default()
        };
        let err = run(
            &connector,
            &server(&f.remote_root, FAKE_PIPELINE),
            &request(&f, &opts),
            &mut |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, CinplaError::Transfer(_)));
        assert!(is_empty(&f.remote_root));
        assert!(is_empty(&f.local_scratch));
    }

    #[test]
    fn connection_failure_touches_nothing() {
        let f = fixture("conn");
        let opts = options();
        let connector = LoopbackConnector {
            refuse: true,
            ..Default::default()
        };
        let err = run(
            &connector,
            &server(&f.remote_root, FAKE_PIPELINE),
            &request(&f, &opts),
            &mut |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, CinplaError::Connection { .. }));
        assert!(is_empty(&f.local_scratch));
        assert!(connector.commands.borrow().is_empty());
    }

    #[test]
    fn missing_probe_fails_before_connecting() {
        let f = fixture("probe");
        std::fs::remove_file(&f.probe).unwrap();
        let opts = options();
        let connector = LoopbackConnector::default();
        let err = run(
            &connector,
            &server(&f.remote_root, FAKE_PIPELINE),
            &request(&f, &opts),
            &mut |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, CinplaError::Validation(_)));
        assert_eq!(connector.connects.get(), 0);
    }

    #[test]
    fn sorter_params_travel_as_file() {
        let f = fixture("params");
        let mut opts = options();
        opts.sorter_params
            .insert("detect_sign".into(), (-1).into());
        let connector = LoopbackConnector::default();
        let program = format!("test -f {SORTER_PARAMS_FILE} && mkdir -p processing && true");

        run(
            &connector,
            &server(&f.remote_root, &program),
            &request(&f, &opts),
            &mut |_| {},
        )
        .unwrap();
        assert!(connector
            .commands
            .borrow()
            .iter()
            .any(|c| c.contains("--sorter-params sorter_params.yaml")));
    }

    #[test]
    fn remote_and_local_runs_record_identical_metadata() {
        let opts = options();

        let remote = fixture("remote-run");
        run(
            &LoopbackConnector::default(),
            &server(
                &remote.remote_root,
                "mkdir -p processing/electrophysiology && true",
            ),
            &request(&remote, &opts),
            &mut |_| {},
        )
        .unwrap();

        let local = fixture("local-run");
        processing::run(
            &FakeToolkit::default(),
            &opts,
            &PipelineInputs {
                acquisition: &local.acquisition,
                probe: Some(&local.probe),
                output: local.container.path(),
                span: TimeSpan::from_container(&local.container).unwrap(),
            },
        )
        .unwrap();

        let attrs = |c: &Container| c.group(container::ELECTROPHYSIOLOGY).unwrap().attrs().unwrap();
        assert_eq!(attrs(&remote.container), attrs(&local.container));
    }

    #[test]
    fn reprocessing_records_identical_metadata_on_both_targets() {
        let toolkit = FakeToolkit {
            traces: Some(Traces {
                sample_rate: 30000.0,
                channels: vec![
                    vec![1.0, -1.0, 1.0, -1.0],
                    vec![9.0, -9.0, 9.0, -9.0],
                    vec![1.0, -1.0, 1.0, -1.0],
                ],
            }),
            ..Default::default()
        };
        let local_run = |f: &Fixture, opts: &ProcessingOptions| {
            processing::run(
                &toolkit,
                opts,
                &PipelineInputs {
                    acquisition: &f.acquisition,
                    probe: Some(&f.probe),
                    output: f.container.path(),
                    span: TimeSpan::from_container(&f.container).unwrap(),
                },
            )
            .unwrap()
        };

        let mut auto = options();
        auto.bad_channels = BadChannels::Auto;
        let remote = fixture("remote-rerun");
        let local = fixture("local-rerun");
        local_run(&remote, &auto);
        local_run(&local, &auto);

        let mut explicit = options();
        explicit.bad_channels = BadChannels::Explicit(vec![2]);
        run(
            &LoopbackConnector::default(),
            &server(
                &remote.remote_root,
                "mkdir -p processing/electrophysiology && true",
            ),
            &request(&remote, &explicit),
            &mut |_| {},
        )
        .unwrap();
        local_run(&local, &explicit);

        let ephys = |c: &Container| c.group(container::ELECTROPHYSIOLOGY).unwrap();
        assert_eq!(ephys(&remote.container).attrs().unwrap(), ephys(&local.container).attrs().unwrap());
        assert_eq!(processing::recorded_detection(&ephys(&local.container)).unwrap(), None);
    }
}
