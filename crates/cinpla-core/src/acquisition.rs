//! Vendor acquisition paths: system detection, session naming and the
//! metadata needed for registration.
//!
//! Readers only look at header/settings text. Sample data is never parsed
//! here; that is the signal toolkit's job.

use crate::error::{CinplaError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// AcquisitionSystem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionSystem {
    OpenEphys,
    Axona,
}

impl AcquisitionSystem {
    pub fn as_str(self) -> &'static str {
        match self {
            AcquisitionSystem::OpenEphys => "open-ephys",
            AcquisitionSystem::Axona => "axona",
        }
    }

    /// Tag added to every action registered from this system.
    pub fn tag(self) -> &'static str {
        self.as_str()
    }

    /// Axona sessions are addressed by their `.set` file, everything else is
    /// an Open Ephys recording directory.
    pub fn detect(path: &Path) -> Self {
        if path.extension().is_some_and(|e| e == "set") {
            AcquisitionSystem::Axona
        } else {
            AcquisitionSystem::OpenEphys
        }
    }
}

impl fmt::Display for AcquisitionSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AcquisitionSystem {
    type Err = CinplaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open-ephys" | "openephys" => Ok(AcquisitionSystem::OpenEphys),
            "axona" => Ok(AcquisitionSystem::Axona),
            other => Err(CinplaError::Configuration(format!(
                "unknown acquisition system '{other}' (expected open-ephys or axona)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingInfo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub system: AcquisitionSystem,
    pub path: PathBuf,
    /// Name the raw data keeps inside the container's acquisition group.
    pub session_name: String,
    pub datetime: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
}

impl RecordingInfo {
    /// Entity id implied by the path when none is given.
    pub fn default_entity(&self) -> Option<String> {
        match self.system {
            AcquisitionSystem::OpenEphys => {
                self.session_name.split('_').next().map(str::to_string)
            }
            AcquisitionSystem::Axona => self
                .path
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned()),
        }
    }

    /// Session number implied by the path when none is given.
    pub fn default_session(&self) -> Option<String> {
        match self.system {
            AcquisitionSystem::OpenEphys => {
                self.session_name.rsplit('_').next().map(str::to_string)
            }
            AcquisitionSystem::Axona => {
                let chars: Vec<char> = self.session_name.chars().collect();
                let start = chars.len().saturating_sub(2);
                Some(chars[start..].iter().collect())
            }
        }
    }
}

/// Inspects a raw acquisition path.
pub trait AcquisitionReader {
    fn inspect(&self, path: &Path) -> Result<RecordingInfo>;
}

/// Reader matching the detected system of `path`.
pub fn reader_for(system: AcquisitionSystem) -> Box<dyn AcquisitionReader> {
    match system {
        AcquisitionSystem::OpenEphys => Box::new(OpenEphysReader),
        AcquisitionSystem::Axona => Box::new(AxonaReader),
    }
}

// ---------------------------------------------------------------------------
// Open Ephys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenEphysReader;

impl AcquisitionReader for OpenEphysReader {
    fn inspect(&self, path: &Path) -> Result<RecordingInfo> {
        if !path.is_dir() {
            return Err(CinplaError::Validation(format!(
                "open-ephys path '{}' is not a directory",
                path.display()
            )));
        }
        let session_name = dir_name(path)?;

        let settings = path.join("settings.xml");
        let from_settings = if settings.exists() {
            parse_settings_date(&std::fs::read_to_string(&settings)?)
        } else {
            None
        };
        let datetime = from_settings
            .or_else(|| date_from_name(&session_name))
            .ok_or_else(|| {
                CinplaError::Validation(format!(
                    "cannot determine recording date of '{}'",
                    path.display()
                ))
            })?;

        Ok(RecordingInfo {
            system: AcquisitionSystem::OpenEphys,
            path: path.to_path_buf(),
            session_name,
            datetime,
            duration_s: None,
        })
    }
}

fn dir_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CinplaError::Validation(format!("'{}' has no name", path.display())))
}

/// `<DATE>1 Jan 2023 14:03:22</DATE>` from an Open Ephys `settings.xml`.
fn parse_settings_date(xml: &str) -> Option<NaiveDateTime> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"<DATE>\s*([^<]+?)\s*</DATE>").expect("valid regex"));
    let raw = re.captures(xml)?.get(1)?.as_str();
    NaiveDateTime::parse_from_str(raw, "%d %b %Y %H:%M:%S").ok()
}

/// A date embedded in a directory name: `YYYYMMDD` or `YYYY-MM-DD`,
/// optionally followed by `_HH-MM-SS`.
fn date_from_name(name: &str) -> Option<NaiveDateTime> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(\d{4})-?(\d{2})-?(\d{2})(?:_(\d{2})-(\d{2})-(\d{2}))?").expect("valid regex")
    });
    for caps in re.captures_iter(name) {
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
        let Some(date) = NaiveDate::from_ymd_opt(year, num(2)?, num(3)?) else {
            continue;
        };
        let time = match (num(4), num(5), num(6)) {
            (Some(h), Some(m), Some(s)) => NaiveTime::from_hms_opt(h, m, s)?,
            _ => NaiveTime::MIN,
        };
        return Some(date.and_time(time));
    }
    None
}

// ---------------------------------------------------------------------------
// Axona
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct AxonaReader;

impl AcquisitionReader for AxonaReader {
    fn inspect(&self, path: &Path) -> Result<RecordingInfo> {
        if AcquisitionSystem::detect(path) != AcquisitionSystem::Axona {
            return Err(CinplaError::Validation(format!(
                "need an Axona .set file, not '{}'",
                path.display()
            )));
        }
        let header = std::fs::read_to_string(path)?;
        let field = |key: &str| {
            header.lines().find_map(|line| {
                let (k, v) = line.split_once(char::is_whitespace)?;
                (k == key).then(|| v.trim().to_string())
            })
        };

        let date = field("trial_date")
            .and_then(|d| NaiveDate::parse_from_str(&d, "%A, %d %b %Y").ok())
            .ok_or_else(|| {
                CinplaError::Validation(format!("'{}' has no valid trial_date", path.display()))
            })?;
        let time = field("trial_time")
            .and_then(|t| NaiveTime::parse_from_str(&t, "%H:%M:%S").ok())
            .unwrap_or(NaiveTime::MIN);
        let duration_s = field("duration").and_then(|d| d.parse::<f64>().ok());

        let session_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| CinplaError::Validation(format!("'{}' has no name", path.display())))?;

        Ok(RecordingInfo {
            system: AcquisitionSystem::Axona,
            path: path.to_path_buf(),
            session_name,
            datetime: date.and_time(time),
            duration_s,
        })
    }
}
