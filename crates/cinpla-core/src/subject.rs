//! Subject lifecycle: registry entries, surgeries and perfusion.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::action::{Action, ActionStore, ActionType, DATETIME_FORMAT};
use crate::config::Config;
use crate::convert::mapping;
use crate::error::{CinplaError, Result};
use crate::quantity::{Position, Quantity};
use crate::register::apply_template;

pub const SURGERY_LOCATION: &str = "Sterile surgery station";
pub const SUBJECT_MODULE: &str = "subject";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Procedure {
    Implantation,
    Injection,
}

impl Procedure {
    pub fn as_str(self) -> &'static str {
        match self {
            Procedure::Implantation => "implantation",
            Procedure::Injection => "injection",
        }
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Procedure {
    type Err = CinplaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "implantation" => Ok(Procedure::Implantation),
            "injection" => Ok(Procedure::Injection),
            other => Err(CinplaError::Validation(format!(
                "procedure must be 'implantation' or 'injection', not '{other}'"
            ))),
        }
    }
}

pub fn surgery_id(subject: &str, procedure: Procedure) -> String {
    format!("{subject}-surgery-{procedure}")
}

pub fn perfusion_id(subject: &str) -> String {
    format!("{subject}-perfusion")
}

fn require_surgery_action(
    store: &ActionStore,
    id: &str,
    subject: &str,
    date: NaiveDateTime,
    user: &str,
    tag: &str,
) -> Result<Action> {
    let mut action = store.require(id)?;
    action.datetime = Some(date);
    action.location = Some(SURGERY_LOCATION.to_string());
    action.action_type = Some(ActionType::Surgery);
    action.tags = vec![tag.to_string()];
    action.entities = vec![subject.to_string()];
    action.users = vec![user.to_string()];
    Ok(action)
}

// ---------------------------------------------------------------------------
// Surgery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SurgeryRequest {
    pub subject: String,
    pub procedure: Procedure,
    pub date: NaiveDateTime,
    pub user: String,
    pub weight: Quantity,
    pub positions: Vec<(String, Position)>,
    /// Degrees.
    pub angle: Option<f64>,
    pub overwrite: bool,
}

pub fn register_surgery(store: &ActionStore, cfg: &Config, req: &SurgeryRequest) -> Result<Action> {
    if req.positions.is_empty() {
        return Err(CinplaError::Validation(
            "at least one position is required".to_string(),
        ));
    }
    let id = surgery_id(&req.subject, req.procedure);
    let mut action = require_surgery_action(
        store,
        &id,
        &req.subject,
        req.date,
        &req.user,
        req.procedure.as_str(),
    )?;
    let templated = apply_template(
        &mut action,
        cfg,
        &format!("surgery_{}", req.procedure),
        req.overwrite,
    )?;

    for (key, position) in &req.positions {
        let name = cfg.module_name(req.procedure.as_str(), key);
        let from_template = templated.contains(&name);
        let mut content = match action.module(&name) {
            Some(Value::Mapping(m)) if from_template => m.clone(),
            _ => Mapping::new(),
        };
        content.insert(Value::from("anatomy"), Value::from(key.as_str()));
        content.insert(Value::from("position"), serde_yaml::to_value(position)?);
        if let Some(angle) = req.angle {
            content.insert(Value::from("angle"), Quantity::new(angle, "deg").to_yaml());
        }
        tracing::info!(
            key = %key,
            x = position.x,
            y = position.y,
            z = position.z,
            unit = %position.unit,
            "registering position"
        );
        action.set_module(&name, Value::Mapping(content), req.overwrite || from_template)?;
    }

    let subject = mapping([
        ("registry", Value::from(format!("subjects/{}", req.subject))),
        ("weight", req.weight.to_yaml()),
    ]);
    action.set_module(SUBJECT_MODULE, Value::Mapping(subject), true)?;
    store.save(&action)?;
    Ok(action)
}

pub fn register_perfusion(
    store: &ActionStore,
    cfg: &Config,
    subject: &str,
    date: NaiveDateTime,
    user: &str,
    overwrite: bool,
) -> Result<Action> {
    let id = perfusion_id(subject);
    let mut action = require_surgery_action(store, &id, subject, date, user, "perfusion")?;
    apply_template(&mut action, cfg, "perfusion", overwrite)?;
    store.save(&action)?;
    Ok(action)
}

// ---------------------------------------------------------------------------
// Subjects registry
// ---------------------------------------------------------------------------

/// Optional descriptive fields of a subject, in registry order.
pub const SUBJECT_FIELDS: &[&str] = &[
    "developmental_stage",
    "gender",
    "genus",
    "health_status",
    "label",
    "population",
    "species",
    "strain",
    "trivial_name",
    "weight",
];

#[derive(Debug, Clone)]
pub struct SubjectRequest {
    pub subject: String,
    pub birthday: NaiveDate,
    pub cell_line: String,
    pub fields: BTreeMap<String, String>,
    pub user: Option<String>,
    pub overwrite: bool,
    pub now: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectOutcome {
    pub subject: String,
    /// Fields registered without a value.
    pub missing: Vec<String>,
}

/// Register a subject in the subjects registry.
pub fn register_subject(
    registry: &ActionStore,
    cfg: &Config,
    req: &SubjectRequest,
) -> Result<SubjectOutcome> {
    if !cfg.possible_cell_lines.is_empty() && !cfg.possible_cell_lines.contains(&req.cell_line) {
        return Err(CinplaError::Validation(format!(
            "cell line '{}' is not one of: {}",
            req.cell_line,
            cfg.possible_cell_lines.join(", ")
        )));
    }
    if let Some(unknown) = req
        .fields
        .keys()
        .find(|k| !SUBJECT_FIELDS.contains(&k.as_str()))
    {
        return Err(CinplaError::Validation(format!(
            "unknown subject field '{unknown}'"
        )));
    }

    let mut action = registry.require(&req.subject)?;
    action.datetime = Some(req.now);
    action.action_type = Some(ActionType::Info);
    action.entities = vec![req.subject.clone()];
    if let Some(user) = &req.user {
        action.add_user(user);
    }

    let mut module = mapping([
        (
            "birthday",
            Value::from(
                req.birthday
                    .and_time(chrono::NaiveTime::MIN)
                    .format(DATETIME_FORMAT)
                    .to_string(),
            ),
        ),
        ("cell_line", Value::from(req.cell_line.as_str())),
    ]);
    let mut missing = Vec::new();
    for field in SUBJECT_FIELDS {
        let value = req.fields.get(*field).map(String::as_str).unwrap_or("");
        if value.trim().is_empty() {
            tracing::warn!(subject = %req.subject, field, "no value registered");
            missing.push(field.to_string());
        }
        module.insert(
            Value::from(*field),
            Value::Mapping(mapping([("value", Value::from(value))])),
        );
    }
    action.set_module(SUBJECT_MODULE, Value::Mapping(module), req.overwrite)?;
    registry.save(&action)?;

    Ok(SubjectOutcome {
        subject: req.subject.clone(),
        missing,
    })
}
