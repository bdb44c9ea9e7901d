//! Hierarchical on-disk container for converted recordings and derived
//! products.
//!
//! Layout follows exdir: every object is a directory with `exdir.yaml`
//! naming its kind and `attributes.yaml` holding a YAML mapping. Datasets
//! keep their values in `data.json`.
//!
//! ```text
//! main.exdir/
//!   exdir.yaml            {exdir: {type: file, version: 1}}
//!   attributes.yaml
//!   acquisition/          group
//!   processing/
//!     electrophysiology/
//!     epochs/
//!     tracking/
//! ```

use crate::error::{CinplaError, Result};
use crate::io;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

const META_FILE: &str = "exdir.yaml";
const ATTRIBUTES_FILE: &str = "attributes.yaml";
const DATA_FILE: &str = "data.json";

pub const ACQUISITION: &str = "acquisition";
pub const PROCESSING: &str = "processing";
pub const ELECTROPHYSIOLOGY: &str = "processing/electrophysiology";
pub const EPOCHS: &str = "processing/epochs";
pub const TRACKING: &str = "processing/tracking";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    File,
    Group,
    Dataset,
}

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    exdir: MetaInner,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetaInner {
    #[serde(rename = "type")]
    kind: ObjectKind,
    version: u32,
}

fn write_meta(dir: &Path, kind: ObjectKind) -> Result<()> {
    let meta = Meta {
        exdir: MetaInner { kind, version: 1 },
    };
    io::atomic_write(&dir.join(META_FILE), serde_yaml::to_string(&meta)?.as_bytes())
}

fn read_kind(dir: &Path) -> Option<ObjectKind> {
    let data = std::fs::read_to_string(dir.join(META_FILE)).ok()?;
    let meta: Meta = serde_yaml::from_str(&data).ok()?;
    Some(meta.exdir.kind)
}

fn read_attrs(dir: &Path) -> Result<Mapping> {
    let path = dir.join(ATTRIBUTES_FILE);
    if !path.exists() {
        return Ok(Mapping::new());
    }
    let data = std::fs::read_to_string(&path)?;
    if data.trim().is_empty() {
        return Ok(Mapping::new());
    }
    Ok(serde_yaml::from_str(&data)?)
}

fn write_attrs(dir: &Path, attrs: &Mapping) -> Result<()> {
    io::atomic_write(
        &dir.join(ATTRIBUTES_FILE),
        serde_yaml::to_string(attrs)?.as_bytes(),
    )
}

fn merge_attrs(dir: &Path, updates: Mapping) -> Result<()> {
    let mut attrs = read_attrs(dir)?;
    for (k, v) in updates {
        attrs.insert(k, v);
    }
    write_attrs(dir, &attrs)
}

/// Create `dir` as an object of `kind` unless it already is one.
fn require_object(dir: &Path, kind: ObjectKind) -> Result<()> {
    match read_kind(dir) {
        Some(existing) if existing == kind => Ok(()),
        Some(existing) => Err(CinplaError::Validation(format!(
            "'{}' is a {existing:?}, expected {kind:?}",
            dir.display()
        ))),
        None => {
            io::ensure_dir(dir)?;
            write_meta(dir, kind)
        }
    }
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Container {
    root: PathBuf,
}

impl Container {
    /// Create a new container. The path must not exist yet.
    pub fn create(root: &Path) -> Result<Self> {
        if root.exists() {
            return Err(CinplaError::ContainerExists(root.to_path_buf()));
        }
        io::ensure_dir(root)?;
        write_meta(root, ObjectKind::File)?;
        write_attrs(root, &Mapping::new())?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn open(root: &Path) -> Result<Self> {
        match read_kind(root) {
            Some(ObjectKind::File) => Ok(Self {
                root: root.to_path_buf(),
            }),
            _ => Err(CinplaError::Validation(format!(
                "'{}' is not a container",
                root.display()
            ))),
        }
    }

    /// Open the container at `root`, turning the directory into one if it
    /// is not a container yet.
    pub fn require(root: &Path) -> Result<Self> {
        require_object(root, ObjectKind::File)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn attrs(&self) -> Result<Mapping> {
        read_attrs(&self.root)
    }

    pub fn update_attrs(&self, updates: Mapping) -> Result<()> {
        merge_attrs(&self.root, updates)
    }

    pub fn has(&self, rel: &str) -> bool {
        read_kind(&self.root.join(rel)).is_some()
    }

    /// Open an existing group at a `/`-separated path below the root.
    pub fn group(&self, rel: &str) -> Result<Group> {
        let path = self.root.join(rel);
        match read_kind(&path) {
            Some(ObjectKind::Group) => Ok(Group { path }),
            _ => Err(CinplaError::Validation(format!(
                "group '{rel}' not found in '{}'",
                self.root.display()
            ))),
        }
    }

    /// Open or create the group at `rel`, creating intermediate groups.
    pub fn require_group(&self, rel: &str) -> Result<Group> {
        let mut path = self.root.clone();
        for part in rel.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
            require_object(&path, ObjectKind::Group)?;
        }
        Ok(Group { path })
    }

    /// Remove the object at `rel` and everything below it, if present.
    pub fn remove(&self, rel: &str) -> Result<bool> {
        let path = self.root.join(rel);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&path)?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Group {
    path: PathBuf,
}

impl Group {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn attrs(&self) -> Result<Mapping> {
        read_attrs(&self.path)
    }

    pub fn attr(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.attrs()?.get(key).cloned())
    }

    pub fn update_attrs(&self, updates: Mapping) -> Result<()> {
        merge_attrs(&self.path, updates)
    }

    pub fn set_attr(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let mut m = Mapping::new();
        m.insert(Value::from(key), value.into());
        merge_attrs(&self.path, m)
    }

    pub fn require_group(&self, name: &str) -> Result<Group> {
        let path = self.path.join(name);
        require_object(&path, ObjectKind::Group)?;
        Ok(Group { path })
    }

    /// Write a dataset, replacing any previous values.
    pub fn write_dataset(&self, name: &str, data: &DatasetData) -> Result<Dataset> {
        let path = self.path.join(name);
        require_object(&path, ObjectKind::Dataset)?;
        io::atomic_write(&path.join(DATA_FILE), serde_json::to_string(data)?.as_bytes())?;
        let dataset = Dataset { path };
        dataset.set_attr("num_samples", data.len() as u64)?;
        Ok(dataset)
    }

    pub fn dataset(&self, name: &str) -> Result<Dataset> {
        let path = self.path.join(name);
        match read_kind(&path) {
            Some(ObjectKind::Dataset) => Ok(Dataset { path }),
            _ => Err(CinplaError::Validation(format!(
                "dataset '{name}' not found in '{}'",
                self.path.display()
            ))),
        }
    }

    /// Names of child groups and datasets, sorted.
    pub fn children(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() && read_kind(&entry.path()).is_some() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatasetData {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl DatasetData {
    pub fn len(&self) -> usize {
        match self {
            DatasetData::Int(v) => v.len(),
            DatasetData::Float(v) => v.len(),
            DatasetData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    path: PathBuf,
}

impl Dataset {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> Result<DatasetData> {
        let raw = std::fs::read_to_string(self.path.join(DATA_FILE))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn attrs(&self) -> Result<Mapping> {
        read_attrs(&self.path)
    }

    pub fn set_attr(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let mut m = Mapping::new();
        m.insert(Value::from(key), value.into());
        merge_attrs(&self.path, m)
    }
}
