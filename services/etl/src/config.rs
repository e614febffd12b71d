//! Settings file and environment configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

pub const DEFAULT_API_URL: &str = "https://api.miempresa.com/opiniones";

/// Every column is cast to text so the relational source decodes uniformly
pub const DEFAULT_SOURCE_QUERY: &str = r#"
    SELECT IdOpinion::text AS IdOpinion,
           IdCliente::text AS IdCliente,
           IdProducto::text AS IdProducto,
           Comentario::text AS Comentario,
           PuntajeSatisfaccion::text AS PuntajeSatisfaccion,
           Fecha::text AS Fecha,
           Fuente::text AS Fuente
    FROM Opiniones
"#;

const FILE_SOURCE_SUFFIX: &str = "_csv";

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_source_query() -> String {
    DEFAULT_SOURCE_QUERY.to_string()
}

/// Contents of `config/settings.json`
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub log_path: PathBuf,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub staging_db: PathBuf,
    /// Named file paths; only keys ending in `_csv` are flat-file sources
    #[serde(default)]
    pub paths: BTreeMap<String, PathBuf>,
    #[serde(default = "default_source_query")]
    pub source_query: String,
}

/// A flat-file source and the name it stages under
#[derive(Debug, Clone, PartialEq)]
pub struct FileSource {
    pub key: String,
    pub name: String,
    pub path: PathBuf,
}

impl Settings {
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read settings file {}", path))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse settings")
    }

    /// `clients_csv -> clients`, in key order
    pub fn file_sources(&self) -> Vec<FileSource> {
        self.paths
            .iter()
            .filter_map(|(key, path)| {
                key.strip_suffix(FILE_SOURCE_SUFFIX).map(|name| FileSource {
                    key: key.clone(),
                    name: name.to_string(),
                    path: path.clone(),
                })
            })
            .collect()
    }
}

/// Connection strings and timeouts read from the environment
#[derive(Debug, Clone)]
pub struct Environment {
    pub warehouse_url: Option<String>,
    pub source_db_url: Option<String>,
    pub api_timeout: Duration,
}

impl Environment {
    pub fn from_env() -> Self {
        Self {
            warehouse_url: std::env::var("WAREHOUSE_URL").ok(),
            source_db_url: std::env::var("SOURCE_DB_URL").ok(),
            api_timeout: Duration::from_secs(
                std::env::var("API_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            ),
        }
    }

    pub fn warehouse_url(&self) -> Result<&str> {
        self.warehouse_url
            .as_deref()
            .context("WAREHOUSE_URL env var missing")
    }
}
