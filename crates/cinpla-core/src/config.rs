use crate::error::{CinplaError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory on the server under which per-invocation scratch dirs are made.
    #[serde(default = "default_scratch_root")]
    pub scratch_root: String,
    /// The cinpla executable on the server.
    #[serde(default = "default_program")]
    pub program: String,
}

fn default_port() -> u16 {
    22
}

fn default_scratch_root() -> String {
    "/tmp".to_string()
}

fn default_program() -> String {
    "cinpla".to_string()
}

impl ServerConfig {
    pub fn hostname(&self) -> String {
        match self.domain.as_deref() {
            Some(domain) if !domain.is_empty() => format!("{}.{}", self.host, domain),
            _ => self.host.clone(),
        }
    }

    /// `user@hostname` as understood by ssh and scp.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.hostname())
    }
}

// ---------------------------------------------------------------------------
// ToolkitConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolkitConfig {
    #[serde(default = "default_toolkit_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_toolkit_command() -> String {
    "cinpla-toolkit".to_string()
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            command: default_toolkit_command(),
            args: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_lfp_band")]
    pub lfp_band: [f64; 2],
    #[serde(default = "default_mua_band")]
    pub mua_band: [f64; 2],
    #[serde(default = "default_lfp_sample_rate")]
    pub lfp_sample_rate: f64,
    #[serde(default = "default_bad_channel_threshold")]
    pub bad_channel_threshold: f64,
    #[serde(default = "default_bad_channel_window")]
    pub bad_channel_window_s: f64,
}

fn default_lfp_band() -> [f64; 2] {
    [1.0, 300.0]
}

fn default_mua_band() -> [f64; 2] {
    [300.0, 6000.0]
}

fn default_lfp_sample_rate() -> f64 {
    1000.0
}

fn default_bad_channel_threshold() -> f64 {
    2.0
}

fn default_bad_channel_window() -> f64 {
    10.0
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            lfp_band: default_lfp_band(),
            mua_band: default_mua_band(),
            lfp_sample_rate: default_lfp_sample_rate(),
            bad_channel_threshold: default_bad_channel_threshold(),
            bad_channel_window_s: default_bad_channel_window(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProjectConfig / UserConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

/// Project configuration. Loaded once per invocation and passed explicitly
/// into every operation that needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    #[serde(default)]
    pub user: UserConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub possible_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub possible_locations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub possible_cell_lines: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_path: Option<PathBuf>,
    #[serde(default)]
    pub toolkit: ToolkitConfig,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sorter_params: BTreeMap<String, serde_yaml::Mapping>,
    /// Named module templates: template name -> module name -> contents.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub templates: BTreeMap<String, BTreeMap<String, serde_yaml::Value>>,
    /// Module naming per surgical procedure: procedure -> anatomy key -> module name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub modules: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub processing: ProcessingConfig,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectConfig {
                id: project_id.into(),
            },
            user: UserConfig::default(),
            possible_tags: Vec::new(),
            possible_locations: Vec::new(),
            possible_cell_lines: Vec::new(),
            data_path: None,
            probe_path: None,
            toolkit: ToolkitConfig::default(),
            servers: Vec::new(),
            sorter_params: BTreeMap::new(),
            templates: BTreeMap::new(),
            modules: BTreeMap::new(),
            processing: ProcessingConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(CinplaError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Look up a server by name. Fails before any network activity.
    pub fn server(&self, name: &str) -> Result<&ServerConfig> {
        self.servers
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| CinplaError::UnknownServer(name.to_string()))
    }

    /// Module name used for an anatomy key of a surgical procedure.
    pub fn module_name(&self, procedure: &str, key: &str) -> String {
        self.modules
            .get(procedure)
            .and_then(|m| m.get(key))
            .cloned()
            .unwrap_or_else(|| format!("{procedure}_{key}"))
    }

    pub fn resolve_user(&self, user: Option<&str>) -> Result<String> {
        match user.or(self.user.name.as_deref()) {
            Some(u) if !u.trim().is_empty() => Ok(u.to_string()),
            _ => Err(CinplaError::Configuration(
                "missing option 'user' (pass --user or set user.name in config)".to_string(),
            )),
        }
    }

    pub fn resolve_location(&self, location: Option<&str>) -> Result<String> {
        let location = match location.or(self.user.location.as_deref()) {
            Some(l) if !l.trim().is_empty() => l.to_string(),
            _ => {
                return Err(CinplaError::Configuration(
                    "missing option 'location' (pass --location or set user.location in config)"
                        .to_string(),
                ))
            }
        };
        if !self.possible_locations.is_empty() && !self.possible_locations.contains(&location) {
            return Err(CinplaError::Validation(format!(
                "location '{location}' is not one of: {}",
                self.possible_locations.join(", ")
            )));
        }
        Ok(location)
    }

    pub fn check_tags(&self, tags: &[String]) -> Result<()> {
        if self.possible_tags.is_empty() {
            return Ok(());
        }
        for tag in tags {
            if !self.possible_tags.contains(tag) {
                return Err(CinplaError::Validation(format!(
                    "tag '{tag}' is not one of: {}",
                    self.possible_tags.join(", ")
                )));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.name.as_str()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("server '{}' is defined more than once", server.name),
                });
            }
            if server.name == "local" {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "server name 'local' is reserved for in-process processing"
                        .to_string(),
                });
            }
            if server.host.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("server '{}' has an empty host", server.name),
                });
            }
            if server.user.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("server '{}' has an empty user", server.name),
                });
            }
            if server.password.is_some() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "server '{}' stores a plain-text password; prefer key authentication",
                        server.name
                    ),
                });
            }
        }

        for (name, band) in [
            ("lfp_band", self.processing.lfp_band),
            ("mua_band", self.processing.mua_band),
        ] {
            if band[0] >= band[1] || band[0] < 0.0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "processing.{name} [{}, {}] must be increasing and non-negative",
                        band[0], band[1]
                    ),
                });
            }
        }

        if self.processing.bad_channel_threshold <= 0.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "processing.bad_channel_threshold must be positive".to_string(),
            });
        }

        for name in self.sorter_params.keys() {
            if crate::sorter::Sorter::lookup(name).is_err() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("unknown sorter '{name}' in sorter_params"),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn server(name: &str) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            host: "node1".to_string(),
            domain: Some("uio.no".to_string()),
            user: "alice".to_string(),
            password: None,
            port: 22,
            scratch_root: default_scratch_root(),
            program: default_program(),
        }
    }

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::new("lab-project");
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.project.id, "lab-project");
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.processing.lfp_band, [1.0, 300.0]);
    }

    #[test]
    fn minimal_yaml_gets_defaults() {
        let yaml = r#"
project:
  id: lab
servers:
  - name: myhost
    host: compute
    user: bob
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let s = cfg.server("myhost").unwrap();
        assert_eq!(s.port, 22);
        assert_eq!(s.scratch_root, "/tmp");
        assert_eq!(s.program, "cinpla");
        assert_eq!(s.hostname(), "compute");
        assert_eq!(cfg.toolkit.command, "cinpla-toolkit");
    }

    #[test]
    fn hostname_joins_domain() {
        assert_eq!(server("a").hostname(), "node1.uio.no");
        assert_eq!(server("a").destination(), "alice@node1.uio.no");
    }

    #[test]
    fn unknown_server_is_configuration_error() {
        let cfg = Config::new("lab");
        let err = cfg.server("myhost").unwrap_err();
        assert!(matches!(err, CinplaError::UnknownServer(ref n) if n == "myhost"));
        assert!(err.is_configuration());
    }

    #[test]
    fn resolve_user_falls_back_to_config() {
        let mut cfg = Config::new("lab");
        assert!(cfg.resolve_user(None).unwrap_err().is_configuration());
        cfg.user.name = Some("alice".to_string());
        assert_eq!(cfg.resolve_user(None).unwrap(), "alice");
        assert_eq!(cfg.resolve_user(Some("bob")).unwrap(), "bob");
    }

    #[test]
    fn resolve_location_checks_possible_locations() {
        let mut cfg = Config::new("lab");
        cfg.possible_locations = vec!["room-1".to_string()];
        assert_eq!(cfg.resolve_location(Some("room-1")).unwrap(), "room-1");
        assert!(matches!(
            cfg.resolve_location(Some("room-9")),
            Err(CinplaError::Validation(_))
        ));
    }

    #[test]
    fn module_name_default_and_override() {
        let mut cfg = Config::new("lab");
        assert_eq!(cfg.module_name("implantation", "mecl"), "implantation_mecl");
        cfg.modules.insert(
            "implantation".to_string(),
            BTreeMap::from([("mecl".to_string(), "mecl_implant".to_string())]),
        );
        assert_eq!(cfg.module_name("implantation", "mecl"), "mecl_implant");
    }

    #[test]
    fn validate_duplicate_and_reserved_servers() {
        let mut cfg = Config::new("lab");
        cfg.servers = vec![server("a"), server("a"), server("local")];
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("defined more than once")));
        assert!(warnings.iter().any(|w| w.message.contains("reserved")));
    }

    #[test]
    fn validate_inverted_band() {
        let mut cfg = Config::new("lab");
        cfg.processing.lfp_band = [300.0, 1.0];
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("lfp_band")));
    }

    #[test]
    fn validate_clean_config_has_no_warnings() {
        let mut cfg = Config::new("lab");
        cfg.servers = vec![server("a")];
        assert!(cfg.validate().is_empty());
    }
}
