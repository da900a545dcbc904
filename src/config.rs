use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::parser::HeadingConvention;

pub const DEFAULT_CONFIG_PATH: &str = "vault_sync.json";
const DEFAULT_DB_PATH: &str = "data/vault.sqlite";
const ENV_PREFIX: &str = "VAULT_SYNC";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreConfig,
    /// Convention for flows that do not set their own.
    #[serde(default)]
    pub convention: HeadingConvention,
    #[serde(default)]
    pub flows: Vec<FlowConfig>,
}

/// Where and how section tables are written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// `main`, or a name from `attach`.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Extra database files attached under a schema name on connect.
    #[serde(default)]
    pub attach: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub columns: ColumnNames,
    #[serde(default = "default_true")]
    pub timestamp_column: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

fn default_schema() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            schema: default_schema(),
            attach: BTreeMap::new(),
            columns: ColumnNames::default(),
            timestamp_column: true,
        }
    }
}

impl StoreConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub title: String,
    pub content: String,
    pub source: String,
    pub updated: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            title: "section_title".into(),
            content: "content".into(),
            source: "source_name".into(),
            updated: "last_updated".into(),
        }
    }
}

/// One `(table, folder)` pairing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlowConfig {
    pub table: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub convention: Option<HeadingConvention>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Recursive walk of a local folder.
    Directory {
        path: PathBuf,
        #[serde(default = "default_extension")]
        extension: String,
        /// Name documents by their path under `path` instead of the bare
        /// file name.
        #[serde(default)]
        qualified_names: bool,
    },
    /// JSON object mapping document names to their markdown.
    Export { path: PathBuf },
    /// Remote collection listed with PROPFIND.
    Webdav {
        url: String,
        #[serde(default = "default_extension")]
        extension: String,
        #[serde(default)]
        username: Option<String>,
        /// Environment variable holding the password.
        #[serde(default)]
        password_env: Option<String>,
    },
}

fn default_extension() -> String {
    "md".to_string()
}

impl SourceConfig {
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self::Directory {
            path: path.into(),
            extension: default_extension(),
            qualified_names: false,
        }
    }
}

impl Settings {
    /// Load `path` (optional, JSON) overlaid with `VAULT_SYNC_*` variables,
    /// e.g. `VAULT_SYNC_STORE__PATH=/tmp/vault.sqlite`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, environment())
    }

    fn load_with(path: &Path, env: Environment) -> Result<Self, ConfigError> {
        let raw = Config::builder()
            .add_source(File::new(&path.to_string_lossy(), FileFormat::Json).required(false))
            .add_source(env)
            .build()?;
        let settings: Settings = raw.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw = Config::builder()
            .add_source(File::from_str(json, FileFormat::Json))
            .build()?;
        let settings: Settings = raw.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_identifier(&self.store.schema) {
            return Err(ConfigError::SchemaName(self.store.schema.clone()));
        }
        if let Some(name) = self.store.attach.keys().find(|n| !is_identifier(n)) {
            return Err(ConfigError::SchemaName(name.clone()));
        }
        let schema = self.store.schema.as_str();
        if schema != "main" && schema != "temp" && !self.store.attach.contains_key(schema) {
            return Err(ConfigError::UnattachedSchema(schema.to_string()));
        }
        self.convention.validate()?;
        for flow in &self.flows {
            validate_table_name(&flow.table)?;
            if let Some(conv) = &flow.convention {
                conv.validate()?;
            }
        }
        Ok(())
    }

    pub fn convention_for<'a>(&'a self, flow: &'a FlowConfig) -> &'a HeadingConvention {
        flow.convention.as_ref().unwrap_or(&self.convention)
    }

    /// Flows whose table is in `tables`, or every flow when `tables` is empty.
    pub fn select_flows(&self, tables: &[String]) -> Result<Vec<&FlowConfig>, ConfigError> {
        if tables.is_empty() {
            return Ok(self.flows.iter().collect());
        }
        for table in tables {
            if !self.flows.iter().any(|f| &f.table == table) {
                return Err(ConfigError::UnknownFlow(table.clone()));
            }
        }
        Ok(self
            .flows
            .iter()
            .filter(|f| tables.contains(&f.table))
            .collect())
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

pub fn validate_table_name(name: &str) -> Result<(), ConfigError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(ConfigError::TableName(name.to_string()))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
