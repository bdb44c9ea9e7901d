//! Spike sorter selection and invocation.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{CinplaError, Result};
use crate::io::ScratchDir;
use crate::toolkit::{SignalToolkit, SortRequest, StepReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sorter {
    Klusta,
    Mountain,
    Kilosort,
    SpykingCircus,
    Ironclust,
}

/// Name on the command line, and the backend the toolkit runs for it.
const SORTERS: &[(&str, Sorter, &str)] = &[
    ("klusta", Sorter::Klusta, "klusta"),
    ("mountain", Sorter::Mountain, "mountainsort4"),
    ("kilosort", Sorter::Kilosort, "kilosort"),
    ("spyking-circus", Sorter::SpykingCircus, "spykingcircus"),
    ("ironclust", Sorter::Ironclust, "ironclust"),
];

impl Sorter {
    pub fn lookup(name: &str) -> Result<Sorter> {
        SORTERS
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, s, _)| *s)
            .ok_or_else(|| CinplaError::UnsupportedSorter(name.to_string()))
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        SORTERS.iter().map(|(n, _, _)| *n)
    }

    fn entry(self) -> &'static (&'static str, Sorter, &'static str) {
        // Every variant has a row.
        SORTERS
            .iter()
            .find(|(_, s, _)| *s == self)
            .unwrap_or(&SORTERS[0])
    }

    pub fn name(self) -> &'static str {
        self.entry().0
    }

    pub fn backend(self) -> &'static str {
        self.entry().2
    }

    /// Parameters for this sorter: an explicit file wins over config.
    pub fn params(self, cfg: &Config, params_file: Option<&Path>) -> Result<serde_yaml::Mapping> {
        if let Some(path) = params_file {
            let data = std::fs::read_to_string(path).map_err(|e| {
                CinplaError::Configuration(format!(
                    "cannot read sorter params '{}': {e}",
                    path.display()
                ))
            })?;
            if data.trim().is_empty() {
                return Ok(serde_yaml::Mapping::new());
            }
            return serde_yaml::from_str(&data).map_err(|e| {
                CinplaError::Configuration(format!(
                    "sorter params '{}' is not a YAML mapping: {e}",
                    path.display()
                ))
            });
        }
        Ok(cfg.sorter_params.get(self.name()).cloned().unwrap_or_default())
    }
}

impl fmt::Display for Sorter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Sorter {
    type Err = CinplaError;

    fn from_str(s: &str) -> Result<Self> {
        Sorter::lookup(s)
    }
}

/// Run the sorter through the toolkit. `req.workdir` is replaced by a fresh
/// scratch directory under `scratch_parent`, removed on every exit path.
pub fn run_sorter(
    toolkit: &dyn SignalToolkit,
    sorter: Sorter,
    mut req: SortRequest,
    scratch_parent: &Path,
) -> Result<StepReport> {
    let workdir = ScratchDir::create_in(scratch_parent, "cinpla-sort-")?;
    req.sorter = sorter.backend().to_string();
    req.workdir = workdir.path().to_path_buf();

    tracing::info!(sorter = %sorter, output = %req.output.display(), "spike sorting");
    let result = toolkit.sort(&req);
    if let Some(w) = workdir.remove() {
        tracing::warn!(warning = %w, "sorter working directory left behind");
    }
    result.map_err(|e| CinplaError::SpikeSortingFailed {
        sorter: sorter.name().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{Grouping, ReferenceMode};
    use crate::toolkit::fake::FakeToolkit;
    use crate::toolkit::Preprocessing;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn request(output: PathBuf) -> SortRequest {
        SortRequest {
            acquisition: PathBuf::from("acquisition"),
            probe: None,
            sorter: String::new(),
            params: serde_yaml::Mapping::new(),
            workdir: PathBuf::new(),
            output,
            preprocessing: Preprocessing {
                reference: ReferenceMode::Cmr,
                grouping: Grouping::All,
                bad_channels: vec![],
            },
            ms_before: 1.0,
            ms_after: 2.0,
            parallel: false,
        }
    }

    #[test]
    fn lookup_known_and_unknown() {
        assert_eq!(Sorter::lookup("klusta").unwrap(), Sorter::Klusta);
        assert_eq!(
            Sorter::lookup("spyking-circus").unwrap(),
            Sorter::SpykingCircus
        );
        let err = Sorter::lookup("magic").unwrap_err();
        assert!(matches!(err, CinplaError::UnsupportedSorter(ref n) if n == "magic"));
        assert!(err.is_configuration());
    }

    #[test]
    fn names_roundtrip_through_lookup() {
        for name in Sorter::names() {
            assert_eq!(Sorter::lookup(name).unwrap().name(), name);
        }
        assert_eq!(Sorter::Mountain.backend(), "mountainsort4");
    }

    #[test]
    fn params_prefer_file_over_config() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new("p");
        let mut from_cfg = serde_yaml::Mapping::new();
        from_cfg.insert("detect_sign".into(), (-1).into());
        cfg.sorter_params.insert("klusta".to_string(), from_cfg.clone());

        assert_eq!(Sorter::Klusta.params(&cfg, None).unwrap(), from_cfg);
        assert!(Sorter::Kilosort.params(&cfg, None).unwrap().is_empty());

        let file = dir.path().join("params.yaml");
        std::fs::write(&file, "detect_sign: 1\n").unwrap();
        let from_file = Sorter::Klusta.params(&cfg, Some(&file)).unwrap();
        assert_eq!(from_file.get("detect_sign"), Some(&serde_yaml::Value::from(1)));
    }

    #[test]
    fn failure_is_wrapped_and_workdir_removed() {
        let dir = TempDir::new().unwrap();
        let toolkit = FakeToolkit {
            fail: Some("sort"),
            ..Default::default()
        };
        let err = run_sorter(
            &toolkit,
            Sorter::Kilosort,
            request(dir.path().join("out")),
            dir.path(),
        )
        .unwrap_err();
        assert!(matches!(err, CinplaError::SpikeSortingFailed { ref sorter, .. } if sorter == "kilosort"));

        let workdir = toolkit.last_workdir.borrow().clone().unwrap();
        assert!(!workdir.exists());
    }

    #[test]
    fn success_removes_workdir_too() {
        let dir = TempDir::new().unwrap();
        let toolkit = FakeToolkit::default();
        let report = run_sorter(
            &toolkit,
            Sorter::Klusta,
            request(dir.path().join("out")),
            dir.path(),
        )
        .unwrap();
        assert_eq!(report.files.len(), 1);
        let workdir = toolkit.last_workdir.borrow().clone().unwrap();
        assert!(!workdir.exists());
    }
}
