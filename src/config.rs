//! Configuration for docpipe.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables for secrets and endpoints
//!    (DOCPIPE_RELAY_TOKEN, DOCPIPE_AGENT_TOKEN, DOCPIPE_ERP_USER,
//!    DOCPIPE_ERP_PASSWORD, DOCPIPE_ERP_URL)
//! 2. Config file: `$DOCPIPE_CONFIG`, else `.docpipe/config.yaml` in the
//!    current directory or a parent, else `~/.docpipe/config.yaml`
//! 3. Built-in defaults
//!
//! Relative paths in the file resolve against the directory holding
//! `.docpipe/`. The binary loads this once and passes it down.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::erp::{DEFAULT_ERP_TIMEOUT_SECS, DEFAULT_FAULT_MARKER};
use crate::adapters::local::DEFAULT_BACKUP_PREFIX;
use crate::adapters::relay::DEFAULT_RELAY_TIMEOUT_SECS;
use crate::adapters::transform::{TransformCommand, DEFAULT_TRANSFORM_TIMEOUT_SECS};

const CONFIG_DIR: &str = ".docpipe";
const CONFIG_FILE: &str = "config.yaml";
const REDACTED: &str = "********";

/// Where the document store lives relative to the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Roots and import folder are on this host
    #[default]
    Local,

    /// Roots and import folder sit behind a relay agent
    Relay,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub relay: RelayConfig,
    pub erp: ErpConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,

    /// File the configuration was read from, if any
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub topology: Topology,

    /// Candidate roots, highest priority first (local topology)
    pub search_roots: Vec<PathBuf>,

    /// Folder the transform imports XML from (local topology)
    pub import_dir: Option<PathBuf>,

    /// Folder the transform writes CSV output to
    pub csv_output_dir: Option<PathBuf>,

    /// Destination for CSV payloads supplied with a run
    pub csv_import_path: Option<PathBuf>,

    pub backup_prefix: String,

    /// Transform command; required for the local topology
    pub transform: Option<TransformCommand>,

    pub transform_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topology: Topology::Local,
            search_roots: Vec::new(),
            import_dir: None,
            csv_output_dir: None,
            csv_import_path: None,
            backup_prefix: DEFAULT_BACKUP_PREFIX.to_string(),
            transform: None,
            transform_timeout_secs: DEFAULT_TRANSFORM_TIMEOUT_SECS,
        }
    }
}

impl PipelineConfig {
    pub fn transform_timeout(&self) -> Duration {
        Duration::from_secs(self.transform_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            timeout_secs: DEFAULT_RELAY_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErpConfig {
    pub url: Option<String>,
    pub user: String,
    pub password: String,
    pub pool_alias: String,
    pub language: String,
    pub template: String,
    pub timeout_secs: u64,
    pub fault_marker: String,

    /// Skip TLS certificate validation; only for self-signed test ERPs
    pub accept_invalid_certs: bool,
}

impl Default for ErpConfig {
    fn default() -> Self {
        Self {
            url: None,
            user: String::new(),
            password: String::new(),
            pool_alias: "PRODUCTION".to_string(),
            language: "SPA".to_string(),
            template: "KLAES".to_string(),
            timeout_secs: DEFAULT_ERP_TIMEOUT_SECS,
            fault_marker: DEFAULT_FAULT_MARKER.to_string(),
            accept_invalid_certs: false,
        }
    }
}

impl ErpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub bind: String,
    pub token: Option<String>,
    pub search_roots: Vec<PathBuf>,
    pub xml_import_dir: Option<PathBuf>,
    pub csv_import_path: Option<PathBuf>,

    /// SQLite database behind `/execute-sql`; the endpoint is off without it
    pub database: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            token: None,
            search_roots: Vec::new(),
            xml_import_dir: None,
            csv_import_path: None,
            database: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,

    /// Bearer token required on `/reprocess` when set
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            token: None,
        }
    }
}

impl Config {
    /// Load from the discovered file (if any) and the process environment
    pub fn load() -> Result<Self> {
        let explicit = std::env::var_os("DOCPIPE_CONFIG").map(PathBuf::from);
        Self::load_with(explicit.as_deref())
    }

    /// Load from `explicit` when given, otherwise from the discovered file
    pub fn load_with(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file and resolve its relative paths
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.resolve_paths(&base_dir(path));
        config.config_file = Some(path.to_path_buf());
        Ok(config)
    }

    /// Overlay environment-provided secrets and endpoints
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(token) = non_empty("DOCPIPE_RELAY_TOKEN") {
            self.relay.token = Some(token);
        }
        if let Some(token) = non_empty("DOCPIPE_AGENT_TOKEN") {
            self.agent.token = Some(token);
        }
        if let Some(user) = non_empty("DOCPIPE_ERP_USER") {
            self.erp.user = user;
        }
        if let Some(password) = non_empty("DOCPIPE_ERP_PASSWORD") {
            self.erp.password = password;
        }
        if let Some(url) = non_empty("DOCPIPE_ERP_URL") {
            self.erp.url = Some(url);
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve_all = |paths: &mut Vec<PathBuf>| {
            for path in paths.iter_mut() {
                *path = resolve_path(base, path);
            }
        };
        let resolve_opt = |path: &mut Option<PathBuf>| {
            if let Some(p) = path.as_mut() {
                *p = resolve_path(base, p);
            }
        };

        resolve_all(&mut self.pipeline.search_roots);
        resolve_opt(&mut self.pipeline.import_dir);
        resolve_opt(&mut self.pipeline.csv_output_dir);
        resolve_opt(&mut self.pipeline.csv_import_path);
        resolve_all(&mut self.agent.search_roots);
        resolve_opt(&mut self.agent.xml_import_dir);
        resolve_opt(&mut self.agent.csv_import_path);
        resolve_opt(&mut self.agent.database);
    }

    /// Copy with every secret masked, for display
    pub fn redacted(&self) -> Self {
        let mask = |secret: &Option<String>| secret.as_ref().map(|_| REDACTED.to_string());

        let mut shown = self.clone();
        shown.relay.token = mask(&self.relay.token);
        shown.agent.token = mask(&self.agent.token);
        shown.server.token = mask(&self.server.token);
        if !shown.erp.password.is_empty() {
            shown.erp.password = REDACTED.to_string();
        }
        shown
    }
}

/// Find config file by searching current directory and parents, then home
fn find_config_file() -> Option<PathBuf> {
    if let Ok(mut current) = std::env::current_dir() {
        loop {
            let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
            if config_path.is_file() {
                return Some(config_path);
            }

            if !current.pop() {
                break;
            }
        }
    }

    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
        .filter(|path| path.is_file())
}

/// Directory relative paths resolve against: the parent of `.docpipe/`,
/// or the file's own directory for a file outside one
fn base_dir(config_path: &Path) -> PathBuf {
    let parent = config_path.parent().unwrap_or(Path::new("."));
    if parent.file_name().map_or(false, |name| name == CONFIG_DIR) {
        parent.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    // Blank entries stay blank so the store can skip them
    if path.is_absolute() || path.as_os_str().is_empty() {
        path.to_path_buf()
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.pipeline.topology, Topology::Local);
        assert_eq!(config.pipeline.transform_timeout_secs, 120);
        assert_eq!(config.pipeline.backup_prefix, "importcsv");
        assert_eq!(config.erp.pool_alias, "PRODUCTION");
        assert_eq!(config.erp.timeout_secs, 60);
        assert_eq!(config.erp.fault_marker, "<faultcode>");
        assert!(!config.erp.accept_invalid_certs);
        assert_eq!(config.agent.bind, "0.0.0.0:5000");
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(".docpipe");
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
pipeline:
  topology: relay
  search_roots: [./in, /abs/in]
  transform: "etl --orders"
relay:
  url: http://relay.local:5000
erp:
  url: https://erp.local/soap
  template: ORDERS
"#
        )
        .unwrap();

        let config = Config::from_file(&config_path).unwrap();

        assert_eq!(config.pipeline.topology, Topology::Relay);
        assert_eq!(config.pipeline.search_roots[0], temp.path().join("in"));
        assert_eq!(config.pipeline.search_roots[1], PathBuf::from("/abs/in"));
        assert_eq!(
            config.pipeline.transform,
            Some(TransformCommand::Shell("etl --orders".to_string()))
        );
        assert_eq!(config.erp.template, "ORDERS");
        // Unset fields keep their defaults
        assert_eq!(config.erp.language, "SPA");
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::default();
        config.erp.user = "file-user".to_string();

        let env: HashMap<&str, &str> = [
            ("DOCPIPE_ERP_USER", "env-user"),
            ("DOCPIPE_ERP_PASSWORD", "s3cret"),
            ("DOCPIPE_RELAY_TOKEN", ""),
        ]
        .into_iter()
        .collect();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.erp.user, "env-user");
        assert_eq!(config.erp.password, "s3cret");
        // Empty values do not override
        assert!(config.relay.token.is_none());
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let mut config = Config::default();
        config.erp.password = "s3cret".to_string();
        config.relay.token = Some("relay-token".to_string());

        let shown = serde_yaml::to_string(&config.redacted()).unwrap();

        assert!(!shown.contains("s3cret"));
        assert!(!shown.contains("relay-token"));
        assert!(shown.contains(REDACTED));
    }

    #[test]
    fn test_base_dir_for_plain_file() {
        assert_eq!(
            base_dir(Path::new("/etc/docpipe/agent.yaml")),
            PathBuf::from("/etc/docpipe")
        );
        assert_eq!(
            base_dir(Path::new("/srv/project/.docpipe/config.yaml")),
            PathBuf::from("/srv/project")
        );
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, Path::new("./subdir")),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, Path::new("/absolute/path")),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(resolve_path(&base, Path::new("")), PathBuf::new());
    }
}
