//! Physical values with a unit, as stored in action modules and container
//! attributes (`{value: 10.0, unit: um}`).

use crate::error::{CinplaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: String,
}

impl Quantity {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }

    pub fn seconds(value: f64) -> Self {
        Self::new(value, "s")
    }

    /// Convert between length units (m, mm, um, nm).
    pub fn to_unit(&self, unit: &str) -> Result<Quantity> {
        if self.unit == unit {
            return Ok(self.clone());
        }
        let from = length_scale(&self.unit)?;
        let to = length_scale(unit)?;
        Ok(Quantity::new(self.value * from / to, unit))
    }

    /// Add `other` expressed in this quantity's unit, rounded to 3 decimals.
    pub fn add_rounded(&self, other: &Quantity) -> Result<Quantity> {
        let other = other.to_unit(&self.unit)?;
        Ok(Quantity::new(round3(self.value + other.value), &self.unit))
    }

    pub fn to_yaml(&self) -> serde_yaml::Value {
        serde_yaml::to_value(self).unwrap_or(serde_yaml::Value::Null)
    }

    pub fn from_yaml(value: &serde_yaml::Value) -> Option<Quantity> {
        serde_yaml::from_value(value.clone()).ok()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

fn length_scale(unit: &str) -> Result<f64> {
    match unit {
        "m" => Ok(1.0),
        "mm" => Ok(1e-3),
        "um" => Ok(1e-6),
        "nm" => Ok(1e-9),
        other => Err(CinplaError::Validation(format!(
            "unit '{other}' is not a length unit (m, mm, um, nm)"
        ))),
    }
}

pub fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// A 3D position in one unit, as registered for surgical targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub unit: String,
}

impl Position {
    /// Parse `key,x,y,z,unit` as given on the command line.
    pub fn parse_keyed(s: &str) -> Result<(String, Position)> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let bad = || {
            CinplaError::Validation(format!(
                "position '{s}' must be comma separated <key,x,y,z,unit>"
            ))
        };
        let [key, x, y, z, unit] = parts.as_slice() else {
            return Err(bad());
        };
        let coord = |v: &str| v.parse::<f64>().map_err(|_| bad());
        Ok((
            key.to_string(),
            Position {
                x: coord(x)?,
                y: coord(y)?,
                z: coord(z)?,
                unit: unit.to_string(),
            },
        ))
    }

    pub fn depth(&self) -> Quantity {
        Quantity::new(self.z, &self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_mm_to_um() {
        let q = Quantity::new(1.9, "mm").to_unit("um").unwrap();
        assert!((q.value - 1900.0).abs() < 1e-9);
        assert_eq!(q.unit, "um");
    }

    #[test]
    fn add_rounded_keeps_left_unit() {
        let depth = Quantity::new(1.9, "mm");
        let next = depth.add_rounded(&Quantity::new(50.0, "um")).unwrap();
        assert_eq!(next, Quantity::new(1.95, "mm"));
    }

    #[test]
    fn non_length_unit_is_rejected() {
        assert!(Quantity::new(1.0, "s").to_unit("mm").is_err());
    }

    #[test]
    fn parse_keyed_position() {
        let (key, pos) = Position::parse_keyed("mecl,1.0,2.5,3,mm").unwrap();
        assert_eq!(key, "mecl");
        assert_eq!(pos.depth(), Quantity::new(3.0, "mm"));
        assert!(Position::parse_keyed("mecl,1,2,mm").is_err());
        assert!(Position::parse_keyed("mecl,a,2,3,mm").is_err());
    }

    #[test]
    fn quantity_yaml_shape() {
        let yaml = serde_yaml::to_string(&Quantity::new(10.0, "um")).unwrap();
        assert!(yaml.contains("value: 10.0"));
        assert!(yaml.contains("unit: um"));
    }
}
