//! Recording registration: raw acquisition in, action record and converted
//! container out.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::acquisition::{self, AcquisitionReader, AcquisitionSystem, RecordingInfo};
use crate::action::{Action, ActionStore, ActionType};
use crate::config::Config;
use crate::confirm::{Confirm, Preset};
use crate::convert::Converter;
use crate::depth::{self, DepthSource};
use crate::error::{CinplaError, Result};
use crate::io;
use crate::paths;

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Copy the modules of the configured template `name` onto `action`.
/// Returns the module names written; an unconfigured template writes none.
pub fn apply_template(
    action: &mut Action,
    cfg: &Config,
    name: &str,
    overwrite: bool,
) -> Result<Vec<String>> {
    let Some(modules) = cfg.templates.get(name) else {
        return Ok(Vec::new());
    };
    for (module, content) in modules {
        action.set_module(module, content.clone(), overwrite)?;
    }
    Ok(modules.keys().cloned().collect())
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordingRequest {
    pub action_id: Option<String>,
    pub raw_path: PathBuf,
    /// Detected from the path when absent.
    pub system: Option<AcquisitionSystem>,
    pub entity_id: Option<String>,
    pub session: Option<String>,
    pub user: Option<String>,
    pub location: Option<String>,
    pub tags: Vec<String>,
    pub messages: Vec<String>,
    pub depth: DepthSource,
    pub register_depth: bool,
    /// Pre-supplied answer to the depth question.
    pub depth_confirmed: Option<bool>,
    pub templates: Vec<String>,
    pub overwrite: bool,
    /// Pre-supplied answer to the raw data deletion question.
    pub delete_raw: Option<bool>,
    pub now: NaiveDateTime,
}

impl RecordingRequest {
    pub fn new(raw_path: impl Into<PathBuf>, now: NaiveDateTime) -> Self {
        Self {
            action_id: None,
            raw_path: raw_path.into(),
            system: None,
            entity_id: None,
            session: None,
            user: None,
            location: None,
            tags: Vec::new(),
            messages: Vec::new(),
            depth: DepthSource::Find,
            register_depth: false,
            depth_confirmed: None,
            templates: Vec::new(),
            overwrite: false,
            delete_raw: None,
            now,
        }
    }
}

/// Collaborators of a registration.
pub struct RegisterDeps<'a> {
    /// Chosen from the acquisition system when absent.
    pub reader: Option<&'a dyn AcquisitionReader>,
    pub converter: &'a dyn Converter,
    pub confirm: &'a mut dyn Confirm,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterOutcome {
    pub action_id: String,
    pub container: PathBuf,
    pub raw_deleted: bool,
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

fn answer(preset: Option<bool>, confirm: &mut dyn Confirm, prompt: &str) -> bool {
    match preset {
        Some(true) => Preset::yes().confirm(prompt),
        Some(false) => Preset::no().confirm(prompt),
        None => confirm.confirm(prompt),
    }
}

fn resolve_identity(req: &RecordingRequest, info: &RecordingInfo) -> Result<(String, String, String)> {
    let entity = req
        .entity_id
        .clone()
        .or_else(|| info.default_entity())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| CinplaError::Validation("missing option 'entity-id'".to_string()))?;
    let session = req
        .session
        .clone()
        .or_else(|| info.default_session())
        .unwrap_or_default();
    if session.is_empty() || !session.chars().all(|c| c.is_ascii_digit()) {
        return Err(CinplaError::Validation(format!(
            "session '{session}' is not numeric, pass the session explicitly"
        )));
    }
    let action_id = match &req.action_id {
        Some(id) => id.clone(),
        None => format!("{entity}-{}-{session}", info.datetime.format("%d%m%y")),
    };
    paths::validate_action_id(&action_id)?;
    Ok((action_id, entity, session))
}

/// Delete the action and any partially written container.
fn discard(store: &ActionStore, id: &str, container: &Path) {
    if store.action_dir(id).exists() {
        if let Err(e) = store.delete(id) {
            tracing::warn!(action = id, error = %e, "could not delete action");
        }
    }
    if let Some(w) = io::remove_dir_forced(container) {
        tracing::warn!(warning = %w, "could not remove container");
    }
}

fn delete_raw(info: &RecordingInfo) -> Result<()> {
    match info.system {
        AcquisitionSystem::OpenEphys => std::fs::remove_dir_all(&info.path)?,
        AcquisitionSystem::Axona => {
            let dir = info.path.parent().unwrap_or(Path::new("."));
            let stem = info.path.file_stem();
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_file() && path.file_stem() == stem {
                    std::fs::remove_file(path)?;
                }
            }
        }
    }
    Ok(())
}

pub fn register_recording(
    root: &Path,
    cfg: &Config,
    req: &RecordingRequest,
    deps: RegisterDeps<'_>,
) -> Result<RegisterOutcome> {
    let user = cfg.resolve_user(req.user.as_deref())?;
    let location = cfg.resolve_location(req.location.as_deref())?;
    cfg.check_tags(&req.tags)?;
    if let Some(unknown) = req.templates.iter().find(|t| !cfg.templates.contains_key(*t)) {
        return Err(CinplaError::Configuration(format!(
            "template '{unknown}' is not configured"
        )));
    }

    let system = req
        .system
        .unwrap_or_else(|| AcquisitionSystem::detect(&req.raw_path));
    let default_reader = acquisition::reader_for(system);
    let reader = deps.reader.unwrap_or(default_reader.as_ref());
    let info = reader.inspect(&req.raw_path)?;
    let (action_id, entity, _session) = resolve_identity(req, &info)?;

    let store = ActionStore::project(root);
    let container = paths::container_path(root, cfg, &action_id);
    if !req.overwrite {
        if store.exists(&action_id) {
            return Err(CinplaError::AlreadyExists(format!("action '{action_id}'")));
        }
        if container.exists() {
            return Err(CinplaError::ContainerExists(container));
        }
    } else {
        if store.exists(&action_id) {
            store.delete(&action_id)?;
        }
        if container.exists() {
            std::fs::remove_dir_all(&container)?;
        }
    }

    tracing::info!(action = %action_id, "generating action");
    let mut action = store.create(&action_id)?;
    action.action_type = Some(ActionType::Recording);
    action.datetime = Some(info.datetime);
    action.entities = vec![entity.clone()];
    action.users = vec![user.clone()];
    action.location = Some(location);
    action.add_tags(req.tags.iter().cloned());
    action.add_tags([info.system.tag()]);
    for m in &req.messages {
        action.add_message(m.as_str(), &user, req.now);
    }

    let confirm = deps.confirm;
    if req.register_depth {
        let confirmed = match req.depth_confirmed {
            Some(answer) => {
                let mut preset = if answer { Preset::yes() } else { Preset::no() };
                depth::register_depth(&store, &mut action, &entity, &req.depth, &mut preset)
            }
            None => depth::register_depth(&store, &mut action, &entity, &req.depth, &mut *confirm),
        };
        match confirmed {
            Ok(true) => {}
            Ok(false) => {
                discard(&store, &action_id, &container);
                return Err(CinplaError::Aborted(format!(
                    "depth not confirmed, registration of '{action_id}' cancelled"
                )));
            }
            Err(e) => {
                discard(&store, &action_id, &container);
                return Err(e);
            }
        }
    }

    for name in &req.templates {
        if let Err(e) = apply_template(&mut action, cfg, name, true) {
            discard(&store, &action_id, &container);
            return Err(e);
        }
    }
    if let Err(e) = store.save(&action) {
        discard(&store, &action_id, &container);
        return Err(e);
    }

    if let Err(e) = deps.converter.convert(&info, &container) {
        tracing::warn!(action = %action_id, error = %e, "conversion failed, removing action");
        discard(&store, &action_id, &container);
        return Err(e);
    }

    let prompt = format!("Delete raw data in {}?", req.raw_path.display());
    let raw_deleted = answer(req.delete_raw, confirm, &prompt);
    if raw_deleted {
        delete_raw(&info)?;
        tracing::info!(path = %req.raw_path.display(), "deleted raw data");
    }

    Ok(RegisterOutcome {
        action_id,
        container,
        raw_deleted,
    })
}
