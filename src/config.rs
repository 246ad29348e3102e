//! Migration configuration
//!
//! Settings come from a TOML file (explicit path, `./notion-migrate.toml`, or the
//! platform config directory), then environment variables, then CLI flags.

use crate::client::notion::{DEFAULT_API_URL, DEFAULT_API_VERSION};
use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCAL_CONFIG_FILE: &str = "notion-migrate.toml";

/// What to do when a single record (or relation entry) fails to migrate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort the run on the first failure
    #[default]
    FailFast,
    /// Record the failure in the report and move on
    Continue,
}

/// Names of the self-referential hierarchy properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    pub parent_property: String,
    pub child_property: String,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            parent_property: "Parent item".to_string(),
            child_property: "Sub-item".to_string(),
        }
    }
}

/// A scoping record looked up by name before querying the source store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Data source holding the scoping records
    pub store_id: String,
    /// Rich text property matched against the first filter value
    #[serde(default = "default_scope_name_property")]
    pub name_property: String,
    /// Relation property on source records pointing at the scoping record
    #[serde(default = "default_scope_relation_property")]
    pub relation_property: String,
}

fn default_scope_name_property() -> String {
    "Nome".to_string()
}

fn default_scope_relation_property() -> String {
    "Projeto".to_string()
}

/// A secondary filter fed by a positional filter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub property: String,
    pub kind: String,
}

/// API connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub version: String,
    /// Only ever read from the environment
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            version: DEFAULT_API_VERSION.to_string(),
            api_key: None,
        }
    }
}

/// Settings for one migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Records processed per batch
    pub batch_size: usize,
    /// Pause after each record
    pub record_delay_ms: u64,
    /// Page size used when querying the source store
    pub page_size: u32,
    /// Relation entries written concurrently during resolution
    pub relation_concurrency: usize,
    pub failure_policy: FailurePolicy,
    /// Property that receives the numeric part of the source unique id
    pub legacy_id_property: String,
    pub hierarchy: HierarchyConfig,
    pub scope: Option<ScopeConfig>,
    pub filters: Vec<FilterConfig>,
    pub api: ApiConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            record_delay_ms: 100,
            page_size: 100,
            relation_concurrency: 8,
            failure_policy: FailurePolicy::FailFast,
            legacy_id_property: "IdLegado".to_string(),
            hierarchy: HierarchyConfig::default(),
            scope: None,
            filters: Vec::new(),
            api: ApiConfig::default(),
        }
    }
}

impl MigrationConfig {
    /// Load configuration from `path`, or from the first default location that exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_locations().into_iter().find(|p| p.is_file()),
        };

        match path {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(dirs) = ProjectDirs::from("", "", "notion-migrate") {
            locations.push(dirs.config_dir().join("config.toml"));
        }
        locations
    }

    /// Apply `NOTION_API_KEY`, `NOTION_API_URL` and `NOTION_VERSION`.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("NOTION_API_KEY") {
            if !key.trim().is_empty() {
                self.api.api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(url) = std::env::var("NOTION_API_URL") {
            self.api.base_url = url;
        }
        if let Ok(version) = std::env::var("NOTION_VERSION") {
            self.api.version = version;
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be greater than zero");
        }
        if self.page_size == 0 || self.page_size > 100 {
            bail!("page_size must be between 1 and 100, got {}", self.page_size);
        }
        if self.relation_concurrency == 0 {
            bail!("relation_concurrency must be greater than zero");
        }
        if self.hierarchy.parent_property == self.hierarchy.child_property {
            bail!("hierarchy parent and child properties must differ");
        }
        if self.legacy_id_property.trim().is_empty() {
            bail!("legacy_id_property must not be empty");
        }
        Ok(())
    }

    pub fn record_delay(&self) -> Duration {
        Duration::from_millis(self.record_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = MigrationConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.record_delay(), Duration::from_millis(100));
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.legacy_id_property, "IdLegado");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: MigrationConfig = toml::from_str(
            r#"
            batch_size = 5
            failure_policy = "continue"

            [scope]
            store_id = "projects"

            [[filters]]
            property = "Tipo da Tarefa"
            kind = "select"
            "#,
        )
        .unwrap();

        assert_eq!(config.batch_size, 5);
        assert_eq!(config.failure_policy, FailurePolicy::Continue);
        assert_eq!(config.record_delay_ms, 100);
        let scope = config.scope.unwrap();
        assert_eq!(scope.name_property, "Nome");
        assert_eq!(scope.relation_property, "Projeto");
        assert_eq!(config.filters[0].kind, "select");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "record_delay_ms = 0\n[hierarchy]\nparent_property = \"Pai\"").unwrap();

        let config = MigrationConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.record_delay_ms, 0);
        assert_eq!(config.hierarchy.parent_property, "Pai");
        assert_eq!(config.hierarchy.child_property, "Sub-item");
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let result = MigrationConfig::load(Some(Path::new("/nonexistent/notion-migrate.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = MigrationConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = MigrationConfig::default();
        config.page_size = 500;
        assert!(config.validate().is_err());

        let mut config = MigrationConfig::default();
        config.hierarchy.child_property = config.hierarchy.parent_property.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_apply_env_overrides() {
        std::env::set_var("NOTION_API_KEY", " secret_abc ");
        std::env::set_var("NOTION_API_URL", "http://localhost:9000/v1");
        std::env::remove_var("NOTION_VERSION");

        let mut config = MigrationConfig::default();
        config.apply_env();

        assert_eq!(config.api.api_key.as_deref(), Some("secret_abc"));
        assert_eq!(config.api.base_url, "http://localhost:9000/v1");
        assert_eq!(config.api.version, DEFAULT_API_VERSION);

        std::env::remove_var("NOTION_API_KEY");
        std::env::remove_var("NOTION_API_URL");
    }

    #[test]
    #[serial]
    fn test_apply_env_ignores_blank_key() {
        std::env::set_var("NOTION_API_KEY", "   ");
        let mut config = MigrationConfig::default();
        config.apply_env();
        assert!(config.api.api_key.is_none());
        std::env::remove_var("NOTION_API_KEY");
    }
}
