//! Channel preprocessing choices: referencing, grouping and bad channels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CinplaError, Result};
use crate::toolkit::Traces;

// ---------------------------------------------------------------------------
// ReferenceMode
// ---------------------------------------------------------------------------

/// Common reference applied before sorting and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceMode {
    /// Common median reference.
    #[default]
    Cmr,
    /// Common average reference.
    Car,
    None,
}

impl ReferenceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceMode::Cmr => "cmr",
            ReferenceMode::Car => "car",
            ReferenceMode::None => "none",
        }
    }
}

impl fmt::Display for ReferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceMode {
    type Err = CinplaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cmr" => Ok(ReferenceMode::Cmr),
            "car" => Ok(ReferenceMode::Car),
            "none" => Ok(ReferenceMode::None),
            other => Err(CinplaError::Configuration(format!(
                "unknown reference '{other}' (expected cmr, car or none)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Grouping {
    /// All channels processed together.
    #[default]
    All,
    /// Each channel group of the probe processed on its own.
    ByGroup,
}

impl Grouping {
    pub fn from_split_probe(split: bool) -> Self {
        if split {
            Grouping::ByGroup
        } else {
            Grouping::All
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Grouping::All => "all",
            Grouping::ByGroup => "by-group",
        }
    }
}

impl fmt::Display for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// BadChannels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BadChannels {
    #[default]
    None,
    Explicit(Vec<usize>),
    /// Detect from the signal's noise level.
    Auto,
}

impl BadChannels {
    /// Parse the command line form: channel indices, or a lone `auto`.
    pub fn parse(values: &[String]) -> Result<Self> {
        if values.is_empty() {
            return Ok(BadChannels::None);
        }
        if values.iter().any(|v| v == "auto") {
            if values.len() > 1 {
                return Err(CinplaError::Validation(
                    "'auto' cannot be combined with explicit bad channels".to_string(),
                ));
            }
            return Ok(BadChannels::Auto);
        }
        let mut channels = values
            .iter()
            .map(|v| {
                v.parse::<usize>().map_err(|_| {
                    CinplaError::Validation(format!("bad channel '{v}' is not a channel index"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        channels.sort_unstable();
        channels.dedup();
        Ok(BadChannels::Explicit(channels))
    }

    /// The requested value as recorded in metadata.
    pub fn to_yaml(&self) -> serde_yaml::Value {
        match self {
            BadChannels::None => serde_yaml::Value::Sequence(Vec::new()),
            BadChannels::Explicit(ch) => {
                serde_yaml::Value::Sequence(ch.iter().map(|&c| (c as u64).into()).collect())
            }
            BadChannels::Auto => serde_yaml::Value::from("auto"),
        }
    }
}

/// Flag channels whose standard deviation exceeds `threshold` times the
/// median standard deviation across channels.
pub fn detect_bad_channels(traces: &Traces, threshold: f64) -> Vec<usize> {
    let stds: Vec<f64> = traces.channels.iter().map(|c| std_dev(c)).collect();
    let Some(median) = median(&stds) else {
        return Vec::new();
    };
    stds.iter()
        .enumerate()
        .filter(|&(_, &s)| s > threshold * median)
        .map(|(i, _)| i)
        .collect()
}

fn std_dev(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    (samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt()
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn traces(channels: Vec<Vec<f64>>) -> Traces {
        Traces {
            sample_rate: 30000.0,
            channels,
        }
    }

    fn noise(amplitude: f64) -> Vec<f64> {
        (0..100)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    #[test]
    fn noisy_channel_is_flagged() {
        let t = traces(vec![noise(1.0), noise(1.1), noise(10.0), noise(0.9)]);
        assert_eq!(detect_bad_channels(&t, 2.0), vec![2]);
    }

    #[test]
    fn detection_is_deterministic() {
        let t = traces(vec![noise(1.0), noise(5.0), noise(1.0), noise(6.0), noise(1.2)]);
        let first = detect_bad_channels(&t, 2.0);
        for _ in 0..5 {
            assert_eq!(detect_bad_channels(&t, 2.0), first);
        }
        assert_eq!(first, vec![1, 3]);
    }

    #[test]
    fn flat_or_empty_traces_flag_nothing() {
        assert!(detect_bad_channels(&traces(vec![]), 2.0).is_empty());
        assert!(detect_bad_channels(&traces(vec![vec![0.0; 10]; 4]), 2.0).is_empty());
    }

    #[test]
    fn parse_bad_channels() {
        assert_eq!(BadChannels::parse(&[]).unwrap(), BadChannels::None);
        assert_eq!(
            BadChannels::parse(&["auto".to_string()]).unwrap(),
            BadChannels::Auto
        );
        assert_eq!(
            BadChannels::parse(&["5".to_string(), "1".to_string(), "5".to_string()]).unwrap(),
            BadChannels::Explicit(vec![1, 5])
        );
        assert!(BadChannels::parse(&["auto".to_string(), "1".to_string()]).is_err());
        assert!(BadChannels::parse(&["x".to_string()]).is_err());
    }

    #[test]
    fn reference_mode_parsing() {
        assert_eq!("car".parse::<ReferenceMode>().unwrap(), ReferenceMode::Car);
        assert!("median".parse::<ReferenceMode>().unwrap_err().is_configuration());
        assert_eq!(ReferenceMode::default(), ReferenceMode::Cmr);
    }
}
