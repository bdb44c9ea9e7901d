//! PsychoPy visual stimulus logs aligned to TTL events.
//!
//! The stimulus computer writes one JSON object per line,
//! `{"grating": {"duration": 0.25, "orientation": 120}}`, and pulses the
//! parallel port once per stimulus. Stimulus `n` is paired with TTL `n`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::acquisition::AcquisitionSystem;
use crate::container::{self, Container, DatasetData, Group};
use crate::convert;
use crate::error::{CinplaError, Result};
use crate::processing::TimeSpan;
use crate::toolkit::{EventsRequest, SignalToolkit};

pub const VISUAL_STIMULUS: &str = "visual_stimulus";

/// The single file with extension `ext` directly inside `dir`.
pub(crate) fn find_single(dir: &Path, ext: &str) -> Result<PathBuf> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ext) {
            found.push(path);
        }
    }
    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(CinplaError::Validation(format!(
            "found no .{ext} file in '{}'",
            dir.display()
        ))),
        n => Err(CinplaError::Validation(format!(
            "found {n} .{ext} files in '{}', expected one",
            dir.display()
        ))),
    }
}

/// One-key JSON objects, one per line. Single quotes are accepted in place
/// of double quotes; lines that still do not parse are skipped.
pub(crate) fn read_keyed_lines(path: &Path) -> Result<Vec<(String, JsonValue)>> {
    let text = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let normalized = line.replace('\'', "\"");
        match serde_json::from_str::<serde_json::Map<String, JsonValue>>(&normalized) {
            Ok(object) => entries.extend(object),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::debug!(path = %path.display(), skipped, "skipped unparsable lines");
    }
    Ok(entries)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StimulusReport {
    /// Stimulus count per stimulus kind.
    pub stimuli: BTreeMap<String, usize>,
    pub ttl_events: usize,
    pub warnings: Vec<String>,
}

/// Pair stimuli with TTL times. Surplus on either side is dropped from the
/// end.
fn align(
    stimuli: &mut Vec<(String, JsonValue)>,
    ttl: &mut Vec<f64>,
    warnings: &mut Vec<String>,
) {
    if stimuli.len() == ttl.len() {
        return;
    }
    let message = format!(
        "number of TTL events ({}) does not match number of visual stimuli ({})",
        ttl.len(),
        stimuli.len()
    );
    tracing::warn!("{message}");
    warnings.push(message);
    let message = if stimuli.len() < ttl.len() {
        let surplus = ttl.len() - stimuli.len();
        ttl.truncate(stimuli.len());
        format!("discarding {surplus} last TTL events")
    } else {
        let surplus = stimuli.len() - ttl.len();
        stimuli.truncate(ttl.len());
        format!("discarding {surplus} last visual stimuli")
    };
    tracing::warn!("{message}");
    warnings.push(message);
}

/// Field values as one dataset: numbers when every stimulus has a numeric
/// value, text otherwise.
fn field_dataset(values: &[Option<&JsonValue>]) -> DatasetData {
    let numbers: Option<Vec<f64>> = values
        .iter()
        .map(|v| v.and_then(JsonValue::as_f64))
        .collect();
    match numbers {
        Some(n) => DatasetData::Float(n),
        None => DatasetData::Text(
            values
                .iter()
                .map(|v| match v {
                    Some(JsonValue::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                })
                .collect(),
        ),
    }
}

fn write_stimulus(
    parent: &Group,
    kind: &str,
    entries: &[(&JsonValue, f64)],
    span: &TimeSpan,
) -> Result<()> {
    let group = parent.require_group(kind)?;
    group.update_attrs(span.to_attrs())?;
    let times: Vec<f64> = entries.iter().map(|(_, t)| *t).collect();
    group.write_dataset("times", &DatasetData::Float(times))?;

    let mut fields: Vec<&str> = Vec::new();
    for (params, _) in entries {
        if let Some(object) = params.as_object() {
            for key in object.keys() {
                if !fields.contains(&key.as_str()) {
                    fields.push(key.as_str());
                }
            }
        }
    }
    for field in fields {
        if field == "times" {
            continue;
        }
        let values: Vec<Option<&JsonValue>> = entries.iter().map(|(p, _)| p.get(field)).collect();
        group.write_dataset(field, &field_dataset(&values))?;
    }
    Ok(())
}

/// Import the session's PsychoPy log into `processing/epochs/visual_stimulus`.
pub fn import_psychopy(container: &Container, toolkit: &dyn SignalToolkit) -> Result<StimulusReport> {
    if convert::acquisition_system(container)? != AcquisitionSystem::OpenEphys {
        return Err(CinplaError::Validation(
            "visual stimuli need an open-ephys recording".to_string(),
        ));
    }
    let session = convert::acquisition_dir(container)?;
    let log = find_single(&session, "jsonl")?;
    tracing::info!(path = %log.display(), "importing visual stimuli");
    let mut stimuli = read_keyed_lines(&log)?;

    let events = toolkit.events(&EventsRequest {
        acquisition: session.clone(),
    })?;
    let mut ttl = events.ttl_times();
    let mut report = StimulusReport {
        ttl_events: ttl.len(),
        ..StimulusReport::default()
    };
    align(&mut stimuli, &mut ttl, &mut report.warnings);

    let span = TimeSpan::from_duration(events.duration_s);
    let epochs = container.require_group(container::EPOCHS)?;
    let visual = epochs.require_group(VISUAL_STIMULUS)?;
    visual.update_attrs(span.to_attrs())?;

    let mut by_kind: BTreeMap<&str, Vec<(&JsonValue, f64)>> = BTreeMap::new();
    for ((kind, params), time) in stimuli.iter().zip(ttl) {
        by_kind.entry(kind).or_default().push((params, time));
    }
    for (kind, entries) in &by_kind {
        write_stimulus(&visual, kind, entries, &span)?;
        report.stimuli.insert(kind.to_string(), entries.len());
    }
    Ok(report)
}
