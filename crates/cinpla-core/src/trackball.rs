//! Trackball motion logged by ManyMouse next to an Open Ephys session.
//!
//! Each line of the `.mousexy` file is `{"<device>": {"motion": "...",
//! "t": 1.25, "X": -3}}` with either an `X` or a `Y` delta. Mouse time
//! starts a fixed offset before the first TTL pulse.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::container::{self, Container, DatasetData};
use crate::convert;
use crate::error::Result;
use crate::processing::TimeSpan;
use crate::stimulus::{find_single, read_keyed_lines};
use crate::toolkit::{EventsRequest, SignalToolkit};

/// Seconds between the start of mouse logging and the first TTL pulse.
pub const DEFAULT_TIME_OFFSET: f64 = -10.0;

const AXES: [&str; 2] = ["X", "Y"];

#[derive(Debug, Clone, PartialEq)]
struct Sample {
    device: String,
    axis: &'static str,
    time: f64,
    value: i64,
}

fn parse_samples(entries: Vec<(String, serde_json::Value)>) -> Vec<Sample> {
    entries
        .into_iter()
        .filter_map(|(device, motion)| {
            let time = motion.get("t")?.as_f64()?;
            let (axis, value) = AXES
                .iter()
                .find_map(|&axis| Some((axis, motion.get(axis)?.as_i64()?)))?;
            Some(Sample {
                device,
                axis,
                time,
                value,
            })
        })
        .collect()
}

/// Group name for a device axis. `#` is not allowed in object names.
pub fn position_name(device: &str, axis: &str) -> String {
    format!("{}_{axis}", device.replace('#', "USB"))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackballReport {
    /// Samples written per position group.
    pub series: BTreeMap<String, usize>,
    /// Seconds added to every mouse timestamp.
    pub time_shift: f64,
    pub warnings: Vec<String>,
}

/// Import the session's `.mousexy` log into
/// `processing/tracking/trackball/position`.
pub fn import_mousexy(
    container: &Container,
    toolkit: &dyn SignalToolkit,
    time_offset: f64,
) -> Result<TrackballReport> {
    let session = convert::acquisition_dir(container)?;
    let log = find_single(&session, "mousexy")?;
    tracing::info!(path = %log.display(), "importing trackball motion");
    let samples = parse_samples(read_keyed_lines(&log)?);

    let events = toolkit.events(&EventsRequest {
        acquisition: session.clone(),
    })?;
    let mut warnings = Vec::new();
    let time_shift = match events.ttl_times().first() {
        Some(first) => first + time_offset,
        None => {
            let message = "no TTL events found, shifting by the offset only".to_string();
            tracing::warn!("{message}");
            warnings.push(message);
            time_offset
        }
    };
    let mut report = TrackballReport {
        series: BTreeMap::new(),
        time_shift,
        warnings,
    };

    let span = TimeSpan::from_duration(events.duration_s);
    let position = container
        .require_group(container::TRACKING)?
        .require_group("trackball")?
        .require_group("position")?;
    position.update_attrs(span.to_attrs())?;

    let mut devices: Vec<&str> = samples.iter().map(|s| s.device.as_str()).collect();
    devices.sort_unstable();
    devices.dedup();
    for device in devices {
        for axis in AXES {
            let (times, deltas): (Vec<f64>, Vec<i64>) = samples
                .iter()
                .filter(|s| s.device == device && s.axis == axis)
                .map(|s| (s.time + report.time_shift, s.value))
                .unzip();
            let data: Vec<i64> = deltas
                .iter()
                .scan(0i64, |sum, d| {
                    *sum += d;
                    Some(*sum)
                })
                .collect();

            let name = position_name(device, axis);
            let group = position.require_group(&name)?;
            group.update_attrs(span.to_attrs())?;
            group.write_dataset("data", &DatasetData::Int(data))?;
            group.write_dataset("times", &DatasetData::Float(times))?;
            report.series.insert(name, deltas.len());
        }
    }
    Ok(report)
}
