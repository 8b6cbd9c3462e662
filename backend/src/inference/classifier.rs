use actix_web::web;
use std::sync::Arc;
use std::time::Duration;

use super::model::{InferenceError, Model};
use super::preprocess::{self, PreprocessError};
use crate::catalog::LabelMap;

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("Predicted class index {index} has no entry in the label map ({known} labels loaded)")]
    UnknownClass { index: usize, known: usize },
    #[error("Inference did not finish within {0:?}")]
    Timeout(Duration),
    #[error("Blocking worker failed: {0}")]
    Blocking(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
    pub class_index: usize,
}

/// Upload bytes in, labelled prediction out.
#[derive(Clone)]
pub struct Classifier {
    model: Model,
    labels: Arc<LabelMap>,
    timeout: Duration,
}

impl Classifier {
    pub fn new(model: Model, labels: Arc<LabelMap>, timeout: Duration) -> Self {
        Self {
            model,
            labels,
            timeout,
        }
    }

    pub async fn classify(&self, image: Vec<u8>) -> Result<Prediction, ClassifyError> {
        let batch = web::block(move || preprocess::preprocess(&image))
            .await
            .map_err(|e| ClassifyError::Blocking(e.to_string()))??;

        let model = self.model.clone();
        let inference = web::block(move || model.inference(&batch));
        let predictions = tokio::time::timeout(self.timeout, inference)
            .await
            .map_err(|_| ClassifyError::Timeout(self.timeout))?
            .map_err(|e| ClassifyError::Blocking(e.to_string()))??;

        self.resolve(&predictions)
    }

    pub fn resolve(&self, predictions: &[f32]) -> Result<Prediction, ClassifyError> {
        let (index, confidence) = self.model.calculate_result(predictions)?;
        if !(0.0..=1.0).contains(&confidence) {
            log::warn!(
                "Confidence {} is outside [0, 1]; the model may emit logits (see apply_softmax)",
                confidence
            );
        }

        let label = self
            .labels
            .get(index)
            .ok_or(ClassifyError::UnknownClass {
                index,
                known: self.labels.len(),
            })?;

        Ok(Prediction {
            label: label.to_string(),
            confidence,
            class_index: index,
        })
    }
}
