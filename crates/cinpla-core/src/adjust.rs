//! Drive depth adjustments, one numbered module per adjustment on the
//! subject's `<subject>-adjustment` action.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde_yaml::{Mapping, Value};

use crate::action::{Action, ActionStore, ActionType, DATETIME_FORMAT};
use crate::confirm::Confirm;
use crate::convert::mapping;
use crate::depth;
use crate::error::{CinplaError, Result};
use crate::quantity::Quantity;
use crate::subject::{self, Procedure};

pub fn action_id(subject: &str) -> String {
    format!("{subject}-adjustment")
}

pub fn module_name(index: u32) -> String {
    format!("{index:03}_adjustment")
}

/// Highest adjustment index stored on `action`.
pub fn latest_index(action: &Action) -> Option<u32> {
    action
        .modules
        .keys()
        .filter_map(|name| name.strip_suffix("_adjustment")?.parse::<u32>().ok())
        .max()
}

#[derive(Debug, Clone)]
pub struct AdjustRequest {
    pub subject: String,
    pub date: NaiveDateTime,
    /// Adjustment per anatomical key, in micrometres.
    pub adjustments: Vec<(String, f64)>,
    pub user: String,
    /// Start from the implantation depth instead of a previous adjustment.
    pub init: bool,
    pub index: Option<u32>,
    pub overwrite: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AdjustOutcome {
    pub action_id: String,
    pub module: String,
    pub depth: BTreeMap<String, Quantity>,
}

pub fn adjust(
    store: &ActionStore,
    req: &AdjustRequest,
    confirm: &mut dyn Confirm,
) -> Result<AdjustOutcome> {
    if req.adjustments.is_empty() {
        return Err(CinplaError::Validation(
            "at least one adjustment is required".to_string(),
        ));
    }
    let id = action_id(&req.subject);

    let (mut action, index, previous) = if req.init {
        let surgery = store.load(&subject::surgery_id(&req.subject, Procedure::Implantation))?;
        let implant: BTreeMap<String, Quantity> = depth::implant_depths(&surgery)
            .into_iter()
            .map(|e| (e.key, e.depth))
            .collect();
        // Persisted only once the adjustment is confirmed.
        let action = match store.load(&id) {
            Ok(action) => action,
            Err(CinplaError::ActionNotFound(_)) => Action::new(&id),
            Err(e) => return Err(e),
        };
        (action, req.index.unwrap_or(0), implant)
    } else {
        let action = store.load(&id)?;
        let index = match (req.index, latest_index(&action)) {
            (Some(i), _) => i,
            (None, Some(latest)) => latest + 1,
            (None, None) => {
                return Err(CinplaError::Validation(format!(
                    "'{id}' has no adjustments yet, use init"
                )))
            }
        };
        let previous: BTreeMap<String, Quantity> = index
            .checked_sub(1)
            .and_then(|prev| action.module(&module_name(prev)))
            .and_then(|m| m.get("depth"))
            .and_then(Value::as_mapping)
            .map(|depths| {
                depths
                    .iter()
                    .filter_map(|(k, v)| Some((k.as_str()?.to_string(), Quantity::from_yaml(v)?)))
                    .collect()
            })
            .ok_or_else(|| {
                CinplaError::Validation(format!(
                    "no adjustment before index {index} on '{id}'"
                ))
            })?;
        (action, index, previous)
    };

    let mut new_depth = BTreeMap::new();
    let mut amounts = BTreeMap::new();
    for (key, um) in &req.adjustments {
        let prev = previous.get(key).ok_or_else(|| {
            CinplaError::Validation(format!("no previous depth known for '{key}'"))
        })?;
        let amount = Quantity::new(*um, "um");
        new_depth.insert(key.clone(), prev.add_rounded(&amount)?);
        amounts.insert(key.clone(), amount);
    }

    let describe = |m: &BTreeMap<String, Quantity>| {
        m.iter()
            .map(|(k, v)| format!("{k} = {v}"))
            .collect::<Vec<_>>()
            .join(" ")
    };
    if !confirm.confirm(&format!(
        "Correct adjustment: {}? New depth: {}",
        describe(&amounts),
        describe(&new_depth)
    )) {
        return Err(CinplaError::Aborted("adjustment not confirmed".to_string()));
    }

    let to_mapping = |m: &BTreeMap<String, Quantity>| {
        let mut out = Mapping::new();
        for (k, v) in m {
            out.insert(Value::from(k.as_str()), v.to_yaml());
        }
        Value::Mapping(out)
    };
    let content = mapping([
        ("depth", to_mapping(&new_depth)),
        ("adjustment", to_mapping(&amounts)),
        ("experimenter", Value::from(req.user.as_str())),
        (
            "date",
            Value::from(req.date.format(DATETIME_FORMAT).to_string()),
        ),
    ]);

    let name = module_name(index);
    action.action_type = Some(ActionType::Adjustment);
    action.entities = vec![req.subject.clone()];
    action.add_user(&req.user);
    action.set_module(&name, Value::Mapping(content), req.overwrite)?;
    store.save(&action)?;
    tracing::info!(action = %id, module = %name, "registered adjustment");

    Ok(AdjustOutcome {
        action_id: id,
        module: name,
        depth: new_depth,
    })
}
