use serde::Deserialize;
use shared::ResponseVariant;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::catalog::label_map::LabelOrientation;
use crate::inference::model::ModelBackend;
use crate::storage::artifact_service::ArtifactSource;

pub const CONFIG_PATH_VAR: &str = "PLANTDX_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/service.yaml";

const DEFAULT_MODEL_PATH: &str = "plant_disease_prediction_model.onnx";
const DEFAULT_LABEL_MAP_PATH: &str = "class_indices.json";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub model_path: PathBuf,
    pub model_url: Option<String>,
    pub model_file_id: Option<String>,
    pub model_sha256: Option<String>,
    pub model_backend: ModelBackend,
    pub apply_softmax: bool,
    pub label_map_path: PathBuf,
    pub label_map_orientation: LabelOrientation,
    pub response_variant: ResponseVariant,
    pub cors_permissive: bool,
    pub max_upload_bytes: usize,
    pub inference_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: None,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            model_url: None,
            model_file_id: None,
            model_sha256: None,
            model_backend: ModelBackend::default(),
            apply_softmax: false,
            label_map_path: PathBuf::from(DEFAULT_LABEL_MAP_PATH),
            label_map_orientation: LabelOrientation::default(),
            response_variant: ResponseVariant::default(),
            cors_permissive: true,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            inference_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Resolves the configuration from defaults, the optional YAML file and
    /// the process environment. `.env` must already have been loaded.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from);
        let yaml = match explicit {
            Some(path) => Some(read_config_file(&path)?),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_PATH);
                if fallback.exists() {
                    Some(read_config_file(fallback)?)
                } else {
                    None
                }
            }
        };

        Self::from_sources(yaml.as_deref(), |key| std::env::var(key).ok())
    }

    pub fn from_sources<F>(yaml: Option<&str>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: AppConfig = match yaml {
            Some(text) if !text.trim().is_empty() => serde_yaml::from_str(text)?,
            _ => AppConfig::default(),
        };
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = non_empty(env("HOST")) {
            self.host = host;
        }
        if let Some(port) = parse_var(env, "PORT")? {
            self.port = port;
        }
        if let Some(workers) = parse_var(env, "WORKERS")? {
            self.workers = Some(workers);
        }
        if let Some(path) = non_empty(env("MODEL_PATH")) {
            self.model_path = PathBuf::from(path);
        }
        if let Some(url) = non_empty(env("MODEL_URL")) {
            self.model_url = Some(url);
        }
        if let Some(file_id) = non_empty(env("MODEL_FILE_ID")) {
            self.model_file_id = Some(file_id);
        }
        if let Some(checksum) = non_empty(env("MODEL_SHA256")) {
            self.model_sha256 = Some(checksum);
        }
        if let Some(backend) = parse_var(env, "MODEL_BACKEND")? {
            self.model_backend = backend;
        }
        if let Some(apply_softmax) = parse_var(env, "APPLY_SOFTMAX")? {
            self.apply_softmax = apply_softmax;
        }
        if let Some(path) = non_empty(env("LABEL_MAP_PATH")) {
            self.label_map_path = PathBuf::from(path);
        }
        if let Some(orientation) = parse_var(env, "LABEL_MAP_ORIENTATION")? {
            self.label_map_orientation = orientation;
        }
        if let Some(variant) = parse_var(env, "RESPONSE_VARIANT")? {
            self.response_variant = variant;
        }
        if let Some(cors_permissive) = parse_var(env, "CORS_PERMISSIVE")? {
            self.cors_permissive = cors_permissive;
        }
        if let Some(limit) = parse_var(env, "MAX_UPLOAD_BYTES")? {
            self.max_upload_bytes = limit;
        }
        if let Some(secs) = parse_var(env, "INFERENCE_TIMEOUT_SECS")? {
            self.inference_timeout_secs = secs;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.workers == Some(0) {
            return Err(invalid("workers", "0"));
        }
        if self.max_upload_bytes == 0 {
            return Err(invalid("max_upload_bytes", "0"));
        }
        if self.inference_timeout_secs == 0 {
            return Err(invalid("inference_timeout_secs", "0"));
        }
        if let Some(url) = &self.model_url {
            Url::parse(url).map_err(|_| invalid("model_url", url))?;
        }
        if let Some(checksum) = self.model_sha256.take() {
            let checksum = checksum.trim().to_ascii_lowercase();
            if checksum.len() != 64 || !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid("model_sha256", &checksum));
            }
            self.model_sha256 = Some(checksum);
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    /// An explicit URL wins over a Google Drive file id.
    pub fn artifact_source(&self) -> Result<Option<ArtifactSource>, ConfigError> {
        if let Some(url) = &self.model_url {
            let parsed = Url::parse(url).map_err(|_| invalid("model_url", url))?;
            return Ok(Some(ArtifactSource::Url(parsed)));
        }
        Ok(self
            .model_file_id
            .clone()
            .map(ArtifactSource::GoogleDrive))
    }
}

fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_var<F, T>(env: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match non_empty(env(key)) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, &raw)),
        None => Ok(None),
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_bind_all_interfaces_without_a_download_source() {
        let config = AppConfig::from_sources(None, env_from(&[])).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert_eq!(config.model_path, PathBuf::from(DEFAULT_MODEL_PATH));
        assert_eq!(config.response_variant, ResponseVariant::Full);
        assert_eq!(config.label_map_orientation, LabelOrientation::IndexToLabel);
        assert!(config.cors_permissive);
        assert_eq!(config.artifact_source().unwrap(), None);
    }

    #[test]
    fn drive_file_id_is_opt_in() {
        let config = AppConfig::from_sources(
            Some("model_file_id: onnx-export-id\n"),
            env_from(&[]),
        )
        .unwrap();
        assert_eq!(
            config.artifact_source().unwrap(),
            Some(ArtifactSource::GoogleDrive("onnx-export-id".into()))
        );
    }

    #[test]
    fn environment_overrides_yaml() {
        let yaml = "port: 9000\nresponse_variant: minimal\nmodel_backend: onnx\n";
        let config = AppConfig::from_sources(
            Some(yaml),
            env_from(&[("PORT", "9100"), ("LABEL_MAP_ORIENTATION", "label_to_index")]),
        )
        .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.response_variant, ResponseVariant::Minimal);
        assert_eq!(config.label_map_orientation, LabelOrientation::LabelToIndex);
    }

    #[test]
    fn model_url_takes_precedence_over_file_id() {
        let config = AppConfig::from_sources(
            None,
            env_from(&[("MODEL_URL", "https://models.example.com/plant.onnx")]),
        )
        .unwrap();
        match config.artifact_source().unwrap() {
            Some(ArtifactSource::Url(url)) => assert_eq!(url.host_str(), Some("models.example.com")),
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[test]
    fn rejects_invalid_values() {
        let err = AppConfig::from_sources(None, env_from(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "PORT", .. }));

        let err =
            AppConfig::from_sources(None, env_from(&[("MODEL_SHA256", "abc123")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "model_sha256", .. }));

        let err = AppConfig::from_sources(Some("inference_timeout_secs: 0\n"), env_from(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        assert!(AppConfig::from_sources(Some("unknown_key: 1\n"), env_from(&[])).is_err());
    }

    #[test]
    fn example_config_file_is_valid() {
        let yaml = include_str!("../../config/service.example.yaml");
        let config = AppConfig::from_sources(Some(yaml), env_from(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn checksum_is_normalized_to_lowercase() {
        let upper = "AB".repeat(32);
        let config =
            AppConfig::from_sources(None, env_from(&[("MODEL_SHA256", upper.as_str())])).unwrap();
        assert_eq!(config.model_sha256, Some("ab".repeat(32)));
    }
}
