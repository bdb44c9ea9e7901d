//! The electrophysiology processing pipeline: bad channel resolution,
//! spike sorting, LFP and MUA, and the metadata describing the run.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::channels::{self, BadChannels, Grouping, ReferenceMode};
use crate::config::ProcessingConfig;
use crate::container::{self, Container, Group};
use crate::convert::mapping;
use crate::error::Result;
use crate::quantity::Quantity;
use crate::sorter::{self, Sorter};
use crate::toolkit::{FilterRequest, Preprocessing, SignalToolkit, SortRequest, TracesRequest};

pub const SPIKESORTING: &str = "spikesorting";
pub const LFP: &str = "lfp";
pub const MUA: &str = "mua";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingOptions {
    pub sorter: Sorter,
    pub sorter_params: Mapping,
    pub sorting: bool,
    pub lfp: bool,
    pub mua: bool,
    pub bad_channels: BadChannels,
    pub reference: ReferenceMode,
    pub grouping: Grouping,
    pub ms_before: f64,
    pub ms_after: f64,
    pub parallel: bool,
    pub lfp_band: [f64; 2],
    pub mua_band: [f64; 2],
    pub lfp_sample_rate: f64,
    pub bad_channel_threshold: f64,
    pub bad_channel_window_s: f64,
}

impl ProcessingOptions {
    pub fn new(sorter: Sorter, cfg: &ProcessingConfig) -> Self {
        Self {
            sorter,
            sorter_params: Mapping::new(),
            sorting: true,
            lfp: true,
            mua: true,
            bad_channels: BadChannels::None,
            reference: ReferenceMode::Cmr,
            grouping: Grouping::All,
            ms_before: 1.0,
            ms_after: 2.0,
            parallel: false,
            lfp_band: cfg.lfp_band,
            mua_band: cfg.mua_band,
            lfp_sample_rate: cfg.lfp_sample_rate,
            bad_channel_threshold: cfg.bad_channel_threshold,
            bad_channel_window_s: cfg.bad_channel_window_s,
        }
    }

    /// `process-dir` flags reproducing these options on another machine.
    /// Sorter parameters and the probe travel as files and are added by the
    /// caller.
    pub fn to_flags(&self) -> Vec<String> {
        let mut flags = vec!["--sorter".to_string(), self.sorter.name().to_string()];
        if !self.sorting {
            flags.push("--no-sorting".to_string());
        }
        if !self.lfp {
            flags.push("--no-lfp".to_string());
        }
        if !self.mua {
            flags.push("--no-mua".to_string());
        }
        match &self.bad_channels {
            BadChannels::None => {}
            BadChannels::Auto => flags.extend(["--bad-channels".to_string(), "auto".to_string()]),
            BadChannels::Explicit(ch) => {
                flags.push("--bad-channels".to_string());
                flags.extend(ch.iter().map(usize::to_string));
            }
        }
        flags.extend(["--ref".to_string(), self.reference.to_string()]);
        if self.grouping == Grouping::ByGroup {
            flags.push("--split-probe".to_string());
        }
        flags.extend(["--ms-before".to_string(), self.ms_before.to_string()]);
        flags.extend(["--ms-after".to_string(), self.ms_after.to_string()]);
        flags.extend([
            "--lfp-band".to_string(),
            self.lfp_band[0].to_string(),
            self.lfp_band[1].to_string(),
        ]);
        flags.extend([
            "--mua-band".to_string(),
            self.mua_band[0].to_string(),
            self.mua_band[1].to_string(),
        ]);
        if self.parallel {
            flags.push("--parallel".to_string());
        }
        flags
    }
}

// ---------------------------------------------------------------------------
// Time span
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSpan {
    pub start: Quantity,
    pub stop: Option<Quantity>,
}

impl TimeSpan {
    pub fn from_duration(duration_s: Option<f64>) -> Self {
        Self {
            start: Quantity::seconds(0.0),
            stop: duration_s.map(Quantity::seconds),
        }
    }

    /// Span recorded on the acquisition group at conversion time.
    pub fn from_container(container: &Container) -> Result<Self> {
        let attrs = container.group(container::ACQUISITION)?.attrs()?;
        let get = |key: &str| attrs.get(key).and_then(Quantity::from_yaml);
        Ok(Self {
            start: get("start_time").unwrap_or_else(|| Quantity::seconds(0.0)),
            stop: get("stop_time"),
        })
    }

    pub fn to_attrs(&self) -> Mapping {
        let mut attrs = mapping([("start_time", self.start.to_yaml())]);
        if let Some(stop) = &self.stop {
            attrs.insert(Value::from("stop_time"), stop.to_yaml());
        }
        attrs
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

fn band(b: [f64; 2]) -> Value {
    Value::Sequence(vec![b[0].into(), b[1].into()])
}

fn channel_list(ch: &[usize]) -> Value {
    Value::Sequence(ch.iter().map(|&c| (c as u64).into()).collect())
}

/// Describe a processing run on `processing/electrophysiology`.
///
/// Local and remote runs both end here with the same inputs, so the
/// recorded attributes match regardless of where the work happened.
pub fn record_metadata(
    group: &Group,
    opts: &ProcessingOptions,
    detected: Option<&[usize]>,
    span: &TimeSpan,
) -> Result<()> {
    let sorter = if opts.sorting {
        Value::from(opts.sorter.name())
    } else {
        Value::Null
    };
    let mut attrs = mapping([
        ("sorter", sorter),
        ("sorter_params", Value::Mapping(opts.sorter_params.clone())),
        ("lfp_band", band(opts.lfp_band)),
        ("mua_band", band(opts.mua_band)),
        ("reference", Value::from(opts.reference.as_str())),
        ("grouping", Value::from(opts.grouping.as_str())),
        ("bad_channels", opts.bad_channels.to_yaml()),
        ("ms_before", Value::from(opts.ms_before)),
        ("ms_after", Value::from(opts.ms_after)),
    ]);
    attrs.extend(span.to_attrs());
    if let Some(detected) = detected {
        attrs.insert(Value::from("detected_bad_channels"), channel_list(detected));
    }
    group.update_attrs(attrs)
}

/// Bad channels a previous run detected, as recorded in its metadata.
pub fn recorded_detection(group: &Group) -> Result<Option<Vec<usize>>> {
    let Some(Value::Sequence(seq)) = group.attr("detected_bad_channels")? else {
        return Ok(None);
    };
    Ok(Some(
        seq.iter()
            .filter_map(Value::as_u64)
            .map(|c| c as usize)
            .collect(),
    ))
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Where the pipeline reads from and writes to.
#[derive(Debug, Clone)]
pub struct PipelineInputs<'a> {
    pub acquisition: &'a Path,
    pub probe: Option<&'a Path>,
    /// Container root receiving `processing/electrophysiology`.
    pub output: &'a Path,
    pub span: TimeSpan,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_bad_channels: Option<Vec<usize>>,
    pub steps: Vec<String>,
    pub files: Vec<PathBuf>,
}

/// Run the pipeline in-process.
pub fn run(
    toolkit: &dyn SignalToolkit,
    opts: &ProcessingOptions,
    inputs: &PipelineInputs<'_>,
) -> Result<PipelineReport> {
    let mut report = PipelineReport::default();

    let bad_channels = match &opts.bad_channels {
        BadChannels::None => Vec::new(),
        BadChannels::Explicit(ch) => ch.clone(),
        BadChannels::Auto => {
            let traces = toolkit.traces(&TracesRequest {
                acquisition: inputs.acquisition.to_path_buf(),
                probe: inputs.probe.map(Path::to_path_buf),
                window_s: opts.bad_channel_window_s,
            })?;
            let detected = channels::detect_bad_channels(&traces, opts.bad_channel_threshold);
            tracing::info!(?detected, "detected bad channels");
            report.detected_bad_channels = Some(detected.clone());
            detected
        }
    };
    let preprocessing = Preprocessing {
        reference: opts.reference,
        grouping: opts.grouping,
        bad_channels,
    };

    let container = Container::require(inputs.output)?;
    // A re-run replaces earlier results.
    if container.remove(container::ELECTROPHYSIOLOGY)? {
        tracing::info!("replaced previous electrophysiology results");
    }
    let ephys = container.require_group(container::ELECTROPHYSIOLOGY)?;
    ephys.update_attrs(inputs.span.to_attrs())?;

    if opts.sorting {
        let target = ephys
            .require_group(SPIKESORTING)?
            .require_group(opts.sorter.name())?;
        target.update_attrs(inputs.span.to_attrs())?;
        let req = SortRequest {
            acquisition: inputs.acquisition.to_path_buf(),
            probe: inputs.probe.map(Path::to_path_buf),
            sorter: opts.sorter.name().to_string(),
            params: opts.sorter_params.clone(),
            workdir: PathBuf::new(),
            output: target.path().to_path_buf(),
            preprocessing: preprocessing.clone(),
            ms_before: opts.ms_before,
            ms_after: opts.ms_after,
            parallel: opts.parallel,
        };
        let step = sorter::run_sorter(toolkit, opts.sorter, req, &std::env::temp_dir())?;
        report.files.extend(step.files);
        report.steps.push(SPIKESORTING.to_string());
    }

    if opts.lfp {
        let target = ephys.require_group(LFP)?;
        target.update_attrs(inputs.span.to_attrs())?;
        tracing::info!(band = ?opts.lfp_band, rate = opts.lfp_sample_rate, "computing LFP");
        let step = toolkit.lfp(&FilterRequest {
            acquisition: inputs.acquisition.to_path_buf(),
            probe: inputs.probe.map(Path::to_path_buf),
            output: target.path().to_path_buf(),
            band: opts.lfp_band,
            sample_rate: Some(opts.lfp_sample_rate),
            preprocessing: preprocessing.clone(),
        })?;
        report.files.extend(step.files);
        report.steps.push(LFP.to_string());
    }

    if opts.mua {
        let target = ephys.require_group(MUA)?;
        target.update_attrs(inputs.span.to_attrs())?;
        tracing::info!(band = ?opts.mua_band, "computing MUA");
        let step = toolkit.mua(&FilterRequest {
            acquisition: inputs.acquisition.to_path_buf(),
            probe: inputs.probe.map(Path::to_path_buf),
            output: target.path().to_path_buf(),
            band: opts.mua_band,
            sample_rate: None,
            preprocessing,
        })?;
        report.files.extend(step.files);
        report.steps.push(MUA.to_string());
    }

    record_metadata(
        &ephys,
        opts,
        report.detected_bad_channels.as_deref(),
        &inputs.span,
    )?;
    Ok(report)
}
