use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::DownloadError;

pub const DEFAULT_CONFIG_FILE: &str = "p10dl.json";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub servers: Servers,
    #[serde(default)]
    pub output_dir: Option<Utf8PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Servers {
    #[serde(default)]
    pub dicom_web: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub wado_root: String,
    #[serde(default)]
    pub active: bool,
    /// Sent verbatim with every request, e.g. `Authorization`.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub server: ServerConfig,
    pub output_dir: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the JSON config at `path`, or `p10dl.json` in the current
    /// directory, and picks a server.
    pub fn resolve(
        path: Option<&str>,
        server: Option<&str>,
    ) -> Result<ResolvedConfig, DownloadError> {
        let config = Self::load(path)?;
        Self::resolve_config(config, server)
    }

    pub fn load(path: Option<&str>) -> Result<Config, DownloadError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(DownloadError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| DownloadError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| DownloadError::ConfigParse(err.to_string()))
    }

    /// Server selection: the named one, else the first active, else the first.
    pub fn resolve_config(
        config: Config,
        server: Option<&str>,
    ) -> Result<ResolvedConfig, DownloadError> {
        let schema_version = config.schema_version.unwrap_or(SCHEMA_VERSION);
        if schema_version > SCHEMA_VERSION {
            return Err(DownloadError::ConfigParse(format!(
                "unsupported schema_version {schema_version}, expected at most {SCHEMA_VERSION}"
            )));
        }
        let mut servers = config.servers.dicom_web;

        let index = match server {
            Some(name) => servers
                .iter()
                .position(|entry| entry.name.as_deref() == Some(name))
                .ok_or_else(|| DownloadError::UnknownServer(name.to_string()))?,
            None => servers.iter().position(|entry| entry.active).unwrap_or(0),
        };
        if index >= servers.len() {
            return Err(DownloadError::NoServerConfigured);
        }

        Ok(ResolvedConfig {
            schema_version,
            server: servers.swap_remove(index),
            output_dir: config.output_dir,
        })
    }
}
