use crate::error::{CinplaError, Result};
use crate::paths;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    Recording,
    Surgery,
    Adjustment,
    Info,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Recording => "Recording",
            ActionType::Surgery => "Surgery",
            ActionType::Adjustment => "Adjustment",
            ActionType::Info => "Info",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub user: String,
    pub datetime: NaiveDateTime,
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// One registered unit of lab work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<ActionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<NaiveDateTime>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub modules: BTreeMap<String, serde_yaml::Value>,
}

impl Action {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action_type: None,
            datetime: None,
            entities: Vec::new(),
            users: Vec::new(),
            location: None,
            tags: Vec::new(),
            messages: Vec::new(),
            modules: BTreeMap::new(),
        }
    }

    // ---------------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------------

    /// Append tags, keeping first-seen order and dropping duplicates.
    pub fn add_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
    }

    pub fn add_user(&mut self, user: &str) {
        if !self.users.iter().any(|u| u == user) {
            self.users.push(user.to_string());
        }
    }

    pub fn add_message(&mut self, text: impl Into<String>, user: &str, datetime: NaiveDateTime) {
        self.messages.push(Message {
            text: text.into(),
            user: user.to_string(),
            datetime,
        });
    }

    pub fn module(&self, name: &str) -> Option<&serde_yaml::Value> {
        self.modules.get(name)
    }

    /// Store a module. An existing module is only replaced with `overwrite`.
    pub fn set_module(
        &mut self,
        name: &str,
        contents: serde_yaml::Value,
        overwrite: bool,
    ) -> Result<()> {
        if self.modules.contains_key(name) && !overwrite {
            return Err(CinplaError::AlreadyExists(format!(
                "module '{name}' on action '{}'",
                self.id
            )));
        }
        self.modules.insert(name.to_string(), contents);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ActionStore
// ---------------------------------------------------------------------------

/// A directory of action records, one `attributes.yaml` per action.
#[derive(Debug, Clone)]
pub struct ActionStore {
    dir: PathBuf,
}

impl ActionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The project's action store.
    pub fn project(root: &Path) -> Self {
        Self::new(paths::actions_dir(root))
    }

    /// The subjects registry shared by surgery and subject commands.
    pub fn subjects(root: &Path) -> Self {
        Self::new(paths::subjects_dir(root))
    }

    pub fn action_dir(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.action_dir(id).join(paths::ATTRIBUTES_FILE)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.record_path(id).exists()
    }

    pub fn create(&self, id: &str) -> Result<Action> {
        paths::validate_action_id(id)?;
        if self.exists(id) {
            return Err(CinplaError::AlreadyExists(format!("action '{id}'")));
        }
        let action = Action::new(id);
        self.save(&action)?;
        Ok(action)
    }

    pub fn load(&self, id: &str) -> Result<Action> {
        paths::validate_action_id(id)?;
        let path = self.record_path(id);
        if !path.exists() {
            return Err(CinplaError::ActionNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        let action: Action = serde_yaml::from_str(&data)?;
        Ok(action)
    }

    /// Load the action, creating an empty record if it does not exist.
    pub fn require(&self, id: &str) -> Result<Action> {
        match self.load(id) {
            Ok(action) => Ok(action),
            Err(CinplaError::ActionNotFound(_)) => self.create(id),
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, action: &Action) -> Result<()> {
        paths::validate_action_id(&action.id)?;
        let data = serde_yaml::to_string(action)?;
        crate::io::atomic_write(&self.record_path(&action.id), data.as_bytes())
    }

    /// Delete the record and everything stored under the action directory.
    pub fn delete(&self, id: &str) -> Result<()> {
        paths::validate_action_id(id)?;
        let dir = self.action_dir(id);
        if !dir.exists() {
            return Err(CinplaError::ActionNotFound(id.to_string()));
        }
        std::fs::remove_dir_all(&dir)?;
        tracing::info!(action = id, "deleted action");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<Action>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut actions = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let id = entry.file_name().to_string_lossy().into_owned();
                match self.load(&id) {
                    Ok(a) => actions.push(a),
                    Err(CinplaError::ActionNotFound(_) | CinplaError::InvalidActionId(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        actions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(actions)
    }
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Format of dates stored inside modules.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse a command line date: `dd.mm.yyyyTHH:MM` or `now`.
pub fn parse_datetime(input: &str, now: NaiveDateTime) -> Result<NaiveDateTime> {
    if input == "now" {
        return Ok(now);
    }
    NaiveDateTime::parse_from_str(input, "%d.%m.%YT%H:%M").map_err(|_| {
        CinplaError::Validation(format!(
            "date '{input}' must be \"dd.mm.yyyyTHH:MM\" or \"now\""
        ))
    })
}

// ---------------------------------------------------------------------------
// Annotate
// ---------------------------------------------------------------------------

/// Add a user, messages and tags to an existing action.
pub fn annotate(
    store: &ActionStore,
    id: &str,
    user: &str,
    tags: &[String],
    messages: &[String],
    now: NaiveDateTime,
) -> Result<Action> {
    if user.trim().is_empty() {
        return Err(CinplaError::Configuration("user name is empty".to_string()));
    }
    let mut action = store.load(id)?;
    action.add_user(user);
    for m in messages {
        action.add_message(m.as_str(), user, now);
    }
    action.add_tags(tags.iter().cloned());
    store.save(&action)?;
    Ok(action)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn now() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn create_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = ActionStore::project(dir.path());

        let mut action = store.create("rat1-010123-01").unwrap();
        action.action_type = Some(ActionType::Recording);
        action.add_tags(["open-ephys"]);
        store.save(&action).unwrap();

        let loaded = store.load("rat1-010123-01").unwrap();
        assert_eq!(loaded, action);
    }

    #[test]
    fn create_duplicate_fails() {
        let dir = TempDir::new().unwrap();
        let store = ActionStore::project(dir.path());
        store.create("a").unwrap();
        assert!(store.create("a").unwrap_err().is_already_exists());
    }

    #[test]
    fn require_creates_missing() {
        let dir = TempDir::new().unwrap();
        let store = ActionStore::project(dir.path());
        assert!(!store.exists("x"));
        store.require("x").unwrap();
        assert!(store.exists("x"));
        store.require("x").unwrap();
    }

    #[test]
    fn delete_removes_everything() {
        let dir = TempDir::new().unwrap();
        let store = ActionStore::project(dir.path());
        store.create("x").unwrap();
        std::fs::create_dir_all(store.action_dir("x").join("data/main.exdir")).unwrap();
        store.delete("x").unwrap();
        assert!(!store.action_dir("x").exists());
        assert!(matches!(
            store.delete("x"),
            Err(CinplaError::ActionNotFound(_))
        ));
    }

    #[test]
    fn list_sorted_by_id() {
        let dir = TempDir::new().unwrap();
        let store = ActionStore::project(dir.path());
        store.create("b").unwrap();
        store.create("a").unwrap();
        let ids: Vec<_> = store.list().unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn tags_are_deduplicated_in_order() {
        let mut action = Action::new("a");
        action.add_tags(["x", "y", "x"]);
        action.add_tags(["z", "y"]);
        assert_eq!(action.tags, vec!["x", "y", "z"]);
    }

    #[test]
    fn set_module_respects_overwrite() {
        let mut action = Action::new("a");
        action
            .set_module("depth", serde_yaml::Value::from(1), false)
            .unwrap();
        assert!(action
            .set_module("depth", serde_yaml::Value::from(2), false)
            .is_err());
        action
            .set_module("depth", serde_yaml::Value::from(2), true)
            .unwrap();
        assert_eq!(action.module("depth"), Some(&serde_yaml::Value::from(2)));
    }

    #[test]
    fn annotate_adds_user_messages_and_tags() {
        let dir = TempDir::new().unwrap();
        let store = ActionStore::project(dir.path());
        let mut action = store.create("a").unwrap();
        action.add_user("alice");
        store.save(&action).unwrap();

        let updated = annotate(
            &store,
            "a",
            "bob",
            &["good".to_string()],
            &["clean units".to_string()],
            now(),
        )
        .unwrap();
        assert_eq!(updated.users, vec!["alice", "bob"]);
        assert_eq!(updated.tags, vec!["good"]);
        assert_eq!(updated.messages[0].text, "clean units");
        assert_eq!(updated.messages[0].user, "bob");
    }

    #[test]
    fn parse_datetime_formats() {
        assert_eq!(parse_datetime("now", now()).unwrap(), now());
        assert_eq!(
            parse_datetime("21.03.2023T14:05", now()).unwrap().to_string(),
            "2023-03-21 14:05:00"
        );
        assert!(matches!(
            parse_datetime("2023-03-21", now()),
            Err(CinplaError::Validation(_))
        ));
    }

    #[test]
    fn annotate_missing_action_fails() {
        let dir = TempDir::new().unwrap();
        let store = ActionStore::project(dir.path());
        assert!(matches!(
            annotate(&store, "nope", "bob", &[], &[], now()),
            Err(CinplaError::ActionNotFound(_))
        ));
    }
}
