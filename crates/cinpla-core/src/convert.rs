use crate::acquisition::{AcquisitionSystem, RecordingInfo};
use crate::container::{self, Container};
use crate::error::{CinplaError, Result};
use crate::io;
use crate::quantity::Quantity;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// Turns a raw vendor recording into a container.
pub trait Converter {
    fn convert(&self, info: &RecordingInfo, container_path: &Path) -> Result<Container>;
}

/// Creates the container skeleton and copies the raw session into
/// `acquisition/<session>` so later processing can find it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCopyConverter;

impl Converter for RawCopyConverter {
    fn convert(&self, info: &RecordingInfo, container_path: &Path) -> Result<Container> {
        let container = Container::create(container_path)?;
        container.update_attrs(mapping([(
            "session_start_time",
            Value::from(info.datetime.format("%Y-%m-%dT%H:%M:%S").to_string()),
        )]))?;

        let acquisition = container.require_group(container::ACQUISITION)?;
        let mut attrs = mapping([
            ("acquisition_system", Value::from(info.system.as_str())),
            ("session", Value::from(info.session_name.as_str())),
            ("start_time", Quantity::seconds(0.0).to_yaml()),
        ]);
        if let Some(duration) = info.duration_s {
            attrs.insert(
                Value::from("stop_time"),
                Quantity::seconds(duration).to_yaml(),
            );
        }
        acquisition.update_attrs(attrs)?;

        let dest = acquisition.path().join(&info.session_name);
        let bytes = match info.system {
            AcquisitionSystem::OpenEphys => io::copy_dir(&info.path, &dest)?,
            AcquisitionSystem::Axona => copy_axona_files(&info.path, &dest)?,
        };
        tracing::info!(
            session = %info.session_name,
            bytes,
            container = %container_path.display(),
            "copied raw data into container"
        );

        container.require_group(container::PROCESSING)?;
        Ok(container)
    }
}

/// Every file next to the `.set` file sharing its stem belongs to the session.
fn copy_axona_files(set_file: &Path, dest: &Path) -> Result<u64> {
    let dir = set_file.parent().unwrap_or(Path::new("."));
    let stem = set_file
        .file_stem()
        .ok_or_else(|| CinplaError::Validation(format!("'{}' has no stem", set_file.display())))?;
    io::ensure_dir(dest)?;
    let mut bytes = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && path.file_stem() == Some(stem) {
            bytes += std::fs::copy(&path, dest.join(entry.file_name()))?;
        }
    }
    Ok(bytes)
}

/// Directory holding the raw session inside a converted container.
pub fn acquisition_dir(container: &Container) -> Result<PathBuf> {
    let acquisition = container.group(container::ACQUISITION)?;
    let session = acquisition
        .attr("session")?
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| {
            CinplaError::Validation(format!(
                "no acquisition session recorded in '{}'",
                container.path().display()
            ))
        })?;
    Ok(acquisition.path().join(session))
}

/// Acquisition system recorded at conversion time.
pub fn acquisition_system(container: &Container) -> Result<AcquisitionSystem> {
    let acquisition = container.group(container::ACQUISITION)?;
    acquisition
        .attr("acquisition_system")?
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| {
            CinplaError::Validation("no acquisition system related to this action".to_string())
        })?
        .parse()
}

pub(crate) fn mapping<const N: usize>(pairs: [(&str, Value); N]) -> Mapping {
    let mut m = Mapping::new();
    for (k, v) in pairs {
        m.insert(Value::from(k), v);
    }
    m
}
