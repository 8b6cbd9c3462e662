use shared::ResponseVariant;
use std::sync::Arc;

use crate::catalog::treatment::labels_without_treatment;
use crate::catalog::{LabelMap, LabelMapError};
use crate::config::{AppConfig, ConfigError};
use crate::inference::{Classifier, InferenceError, Model, load_predictor};
use crate::storage::{ArtifactError, ArtifactService, HttpFetcher};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Model artifact error: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("Model loading error: {0}")]
    Model(#[from] InferenceError),
    #[error("Label map error: {0}")]
    LabelMap(#[from] LabelMapError),
}

/// Everything a request needs. Built once before the server starts and
/// never mutated afterwards.
#[derive(Clone)]
pub struct AppState {
    pub classifier: Classifier,
    pub variant: ResponseVariant,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(classifier: Classifier, variant: ResponseVariant, max_upload_bytes: usize) -> Self {
        Self {
            classifier,
            variant,
            max_upload_bytes,
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        let artifacts = ArtifactService::new(
            HttpFetcher::new()?,
            config.artifact_source()?,
            config.model_sha256.clone(),
        );
        let model_path = artifacts.ensure_present(&config.model_path).await?;

        let predictor = load_predictor(config.model_backend, &model_path)?;
        let labels = LabelMap::load(&config.label_map_path, config.label_map_orientation)?;
        if let Some(num_classes) = predictor.num_classes() {
            labels.ensure_covers(num_classes)?;
        }

        if config.response_variant.includes_treatment() {
            let uncovered = labels_without_treatment(labels.labels());
            if !uncovered.is_empty() {
                log::warn!(
                    "{} labels have no treatment advice and will get the fallback text: {:?}",
                    uncovered.len(),
                    uncovered
                );
            }
        }

        let model = Model::new(predictor, config.apply_softmax);
        let classifier = Classifier::new(model, Arc::new(labels), config.inference_timeout());
        Ok(Self::new(
            classifier,
            config.response_variant,
            config.max_upload_bytes,
        ))
    }
}
