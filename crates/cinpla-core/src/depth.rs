//! Electrode depth at recording time.
//!
//! Depths are either given explicitly or found from the subject's latest
//! drive adjustment, falling back to the implantation surgery.

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

use crate::action::{Action, ActionStore};
use crate::adjust;
use crate::confirm::Confirm;
use crate::error::{CinplaError, Result};
use crate::quantity::{Position, Quantity};
use crate::subject;

pub const DEPTH_MODULE: &str = "depth";

#[derive(Debug, Clone, PartialEq)]
pub struct DepthEntry {
    pub key: String,
    pub probe: u32,
    pub depth: Quantity,
}

impl DepthEntry {
    /// Parse `key probe value unit`.
    pub fn parse(values: &[String]) -> Result<Self> {
        let bad = || {
            CinplaError::Validation(format!(
                "depth '{}' must be <key probe value unit>",
                values.join(" ")
            ))
        };
        let [key, probe, value, unit] = values else {
            return Err(bad());
        };
        let probe = probe.parse::<u32>().map_err(|_| bad())?;
        let value = value.parse::<f64>().map_err(|_| bad())?;
        Ok(Self {
            key: key.clone(),
            probe,
            depth: Quantity::new(value, unit.as_str()),
        })
    }
}

impl std::fmt::Display for DepthEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} probe_{} = {}", self.key, self.probe, self.depth)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DepthSource {
    Explicit(Vec<DepthEntry>),
    Find,
}

/// Depths for `entity` from the latest adjustment or, without one, from the
/// implantation surgery.
pub fn find(store: &ActionStore, entity: &str) -> Result<Vec<DepthEntry>> {
    let adjustment_id = adjust::action_id(entity);
    if store.exists(&adjustment_id) {
        let action = store.load(&adjustment_id)?;
        if let Some(latest) = adjust::latest_index(&action) {
            if let Some(depths) = action
                .module(&adjust::module_name(latest))
                .and_then(|m| m.get("depth"))
                .and_then(Value::as_mapping)
            {
                return Ok(depths
                    .iter()
                    .filter_map(|(k, v)| {
                        Some(DepthEntry {
                            key: k.as_str()?.to_string(),
                            probe: 1,
                            depth: Quantity::from_yaml(v)?,
                        })
                    })
                    .collect());
            }
        }
    }

    let surgery_id = subject::surgery_id(entity, subject::Procedure::Implantation);
    if store.exists(&surgery_id) {
        let action = store.load(&surgery_id)?;
        return Ok(implant_depths(&action));
    }
    Ok(Vec::new())
}

/// Implant depth per anatomical key of an implantation surgery.
pub(crate) fn implant_depths(surgery: &Action) -> Vec<DepthEntry> {
    surgery
        .modules
        .values()
        .filter_map(|m| {
            let key = m.get("anatomy")?.as_str()?.to_string();
            let position: Position = serde_yaml::from_value(m.get("position")?.clone()).ok()?;
            Some(DepthEntry {
                key,
                probe: 1,
                depth: position.depth(),
            })
        })
        .collect()
}

/// `{key: {probe_N: quantity}}`
pub fn depth_module(entries: &[DepthEntry]) -> Value {
    let mut by_key: BTreeMap<&str, Mapping> = BTreeMap::new();
    for e in entries {
        by_key
            .entry(e.key.as_str())
            .or_default()
            .insert(Value::from(format!("probe_{}", e.probe)), e.depth.to_yaml());
    }
    let mut module = Mapping::new();
    for (key, probes) in by_key {
        module.insert(Value::from(key), Value::Mapping(probes));
    }
    Value::Mapping(module)
}

/// Resolve depths, ask for confirmation and store the `depth` module.
/// Returns `false` when the answer was no; the action is left untouched.
pub fn register_depth(
    store: &ActionStore,
    action: &mut Action,
    entity: &str,
    source: &DepthSource,
    confirm: &mut dyn Confirm,
) -> Result<bool> {
    let entries = match source {
        DepthSource::Explicit(entries) => entries.clone(),
        DepthSource::Find => find(store, entity)?,
    };
    if entries.is_empty() {
        return Err(CinplaError::Validation(format!(
            "no depth given and none found for '{entity}'"
        )));
    }
    let listing: Vec<String> = entries.iter().map(ToString::to_string).collect();
    if !confirm.confirm(&format!(
        "Are the following depths correct? {}",
        listing.join(", ")
    )) {
        return Ok(false);
    }
    action.set_module(DEPTH_MODULE, depth_module(&entries), true)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::Preset;
    use tempfile::TempDir;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_entry() {
        let e = DepthEntry::parse(&strings(&["mecl", "1", "1.9", "mm"])).unwrap();
        assert_eq!(e.key, "mecl");
        assert_eq!(e.probe, 1);
        assert_eq!(e.depth, Quantity::new(1.9, "mm"));
        assert!(DepthEntry::parse(&strings(&["mecl", "x", "1.9", "mm"])).is_err());
        assert!(DepthEntry::parse(&strings(&["mecl", "1.9"])).is_err());
    }

    #[test]
    fn module_groups_by_key() {
        let entries = vec![
            DepthEntry::parse(&strings(&["mecl", "1", "1.9", "mm"])).unwrap(),
            DepthEntry::parse(&strings(&["mecl", "2", "2.0", "mm"])).unwrap(),
            DepthEntry::parse(&strings(&["mecr", "1", "1.8", "mm"])).unwrap(),
        ];
        let module = depth_module(&entries);
        let mecl = module.get("mecl").unwrap().as_mapping().unwrap();
        assert_eq!(mecl.len(), 2);
        assert!(module.get("mecr").unwrap().get("probe_1").is_some());
    }

    #[test]
    fn declined_depth_is_not_written() {
        let dir = TempDir::new().unwrap();
        let store = ActionStore::project(dir.path());
        let mut action = Action::new("rat1-010123-01");
        let source = DepthSource::Explicit(vec![
            DepthEntry::parse(&strings(&["mecl", "1", "1.9", "mm"])).unwrap(),
        ]);
        let mut no = Preset::no();
        assert!(!register_depth(&store, &mut action, "rat1", &source, &mut no).unwrap());
        assert!(action.module(DEPTH_MODULE).is_none());
        assert_eq!(no.asked.len(), 1);
        assert!(no.asked[0].contains("mecl probe_1 = 1.9 mm"));

        let mut yes = Preset::yes();
        assert!(register_depth(&store, &mut action, "rat1", &source, &mut yes).unwrap());
        assert!(action.module(DEPTH_MODULE).is_some());
    }

    #[test]
    fn find_without_history_fails() {
        let dir = TempDir::new().unwrap();
        let store = ActionStore::project(dir.path());
        let mut action = Action::new("rat1-010123-01");
        let err = register_depth(
            &store,
            &mut action,
            "rat1",
            &DepthSource::Find,
            &mut Preset::yes(),
        )
        .unwrap_err();
        assert!(matches!(err, CinplaError::Validation(_)));
    }

    #[test]
    fn find_prefers_latest_adjustment() {
        let dir = TempDir::new().unwrap();
        let store = ActionStore::project(dir.path());

        let mut surgery = store
            .create(&subject::surgery_id("rat1", subject::Procedure::Implantation))
            .unwrap();
        let mut contents = Mapping::new();
        contents.insert("anatomy".into(), "mecl".into());
        contents.insert(
            "position".into(),
            serde_yaml::to_value(Position {
                x: 1.0,
                y: 2.0,
                z: 1.9,
                unit: "mm".to_string(),
            })
            .unwrap(),
        );
        surgery
            .set_module("implantation_mecl", Value::Mapping(contents), false)
            .unwrap();
        store.save(&surgery).unwrap();

        let found = find(&store, "rat1").unwrap();
        assert_eq!(found[0].depth, Quantity::new(1.9, "mm"));

        let mut adjustment = store.create(&adjust::action_id("rat1")).unwrap();
        for (idx, depth) in [(0, 1.9), (1, 1.95)] {
            let mut depths = Mapping::new();
            depths.insert("mecl".into(), Quantity::new(depth, "mm").to_yaml());
            let mut module = Mapping::new();
            module.insert("depth".into(), Value::Mapping(depths));
            adjustment
                .set_module(&adjust::module_name(idx), Value::Mapping(module), false)
                .unwrap();
        }
        store.save(&adjustment).unwrap();

        let found = find(&store, "rat1").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].depth, Quantity::new(1.95, "mm"));
    }
}
