//! Layered configuration: defaults, then an optional TOML file, then
//! `FOLIO_*` environment variables.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CONFIG_LOCATIONS: &[&str] = &["folio.toml", "config/folio.toml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Base URL of the node-graph worker.
    pub worker_url: String,
    pub storage_path: PathBuf,
    pub ffmpeg_path: String,
    pub cors_origins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            database_url: "sqlite://data/folio.db".to_string(),
            worker_url: "http://localhost:8188".to_string(),
            storage_path: PathBuf::from("./storage"),
            ffmpeg_path: "ffmpeg".to_string(),
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
        }
    }
}

impl Settings {
    /// Load settings from disk and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let explicit = std::env::var("FOLIO_CONFIG").ok().map(PathBuf::from);
        let path = explicit.or_else(|| {
            DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
        });

        let mut settings = match path {
            Some(path) if path.exists() => {
                let contents =
                    std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                        path: path.clone(),
                        source,
                    })?;
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
            _ => Self::default(),
        };

        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Apply `FOLIO_*` overrides from `lookup`. Split out from the process
    /// environment so it can be exercised directly.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup("FOLIO_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("FOLIO_PORT") {
            self.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "FOLIO_PORT".to_string(),
                value: port,
            })?;
        }
        if let Some(url) = lookup("FOLIO_DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(url) = lookup("FOLIO_WORKER_URL") {
            self.worker_url = url;
        }
        if let Some(path) = lookup("FOLIO_STORAGE_PATH") {
            self.storage_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("FOLIO_FFMPEG_PATH") {
            self.ffmpeg_path = path;
        }
        if let Some(origins) = lookup("FOLIO_CORS_ORIGINS") {
            self.cors_origins = origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_services() {
        let settings = Settings::default();
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.worker_url, "http://localhost:8188");
        assert!(settings.database_url.starts_with("sqlite://"));
    }

    #[test]
    fn toml_files_override_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            port = 9000
            worker_url = "http://gpu-box:8188"
            cors_origins = ["https://folio.example"]
            "#,
        )
        .unwrap();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.worker_url, "http://gpu-box:8188");
        assert_eq!(settings.cors_origins, vec!["https://folio.example"]);
        // Unset keys keep their defaults.
        assert_eq!(settings.host, "0.0.0.0");
    }

    #[test]
    fn env_overrides_win() {
        let mut settings = Settings::default();
        settings
            .apply_env(|key| match key {
                "FOLIO_PORT" => Some("8123".to_string()),
                "FOLIO_CORS_ORIGINS" => {
                    Some("https://a.example, https://b.example".to_string())
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(settings.port, 8123);
        assert_eq!(
            settings.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn bad_port_is_rejected() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(|key| (key == "FOLIO_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }
}
