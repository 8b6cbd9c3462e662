use ndarray::{Array2, Array4};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum_macros::{Display, EnumString};

use super::onnx::OnnxPredictor;
#[cfg(feature = "torch")]
use super::torch::TorchPredictor;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Failed to load model from {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("Model inference failed: {0}")]
    Runtime(String),
    #[error("Model produced unusable output: {0}")]
    Output(String),
    #[error("The {0} backend is not compiled into this build")]
    Unavailable(ModelBackend),
    #[error(
        "{0} is a Keras HDF5 file; the .h5 artifact must be exported to ONNX \
         (remove it and point MODEL_URL or MODEL_FILE_ID at the export)"
    )]
    KerasArtifact(PathBuf),
}

const HDF5_SIGNATURE: &[u8] = b"\x89HDF\r\n\x1a\n";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelBackend {
    #[default]
    Onnx,
    Torch,
}

/// A loaded network. `predict` takes a `(batch, 224, 224, 3)` tensor and
/// returns one row of class probabilities per batch entry.
pub trait Predictor: Send + Sync {
    fn predict(&self, batch: &Array4<f32>) -> Result<Array2<f32>, InferenceError>;

    /// Width of the output layer, when the backend can tell without running.
    fn num_classes(&self) -> Option<usize> {
        None
    }
}

pub fn load_predictor(
    backend: ModelBackend,
    path: &Path,
) -> Result<Arc<dyn Predictor>, InferenceError> {
    log::info!("Loading {} model from {}", backend, path.display());
    if is_hdf5(path)? {
        return Err(InferenceError::KerasArtifact(path.to_path_buf()));
    }
    match backend {
        ModelBackend::Onnx => Ok(Arc::new(OnnxPredictor::load(path)?)),
        #[cfg(feature = "torch")]
        ModelBackend::Torch => Ok(Arc::new(TorchPredictor::load(path)?)),
        #[cfg(not(feature = "torch"))]
        ModelBackend::Torch => Err(InferenceError::Unavailable(backend)),
    }
}

fn is_hdf5(path: &Path) -> Result<bool, InferenceError> {
    let load_error = |e: std::io::Error| InferenceError::Load {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let file = File::open(path).map_err(load_error)?;
    let mut head = Vec::with_capacity(HDF5_SIGNATURE.len());
    file.take(HDF5_SIGNATURE.len() as u64)
        .read_to_end(&mut head)
        .map_err(load_error)?;
    Ok(head == HDF5_SIGNATURE)
}

#[derive(Clone)]
pub struct Model {
    predictor: Arc<dyn Predictor>,
    apply_softmax: bool,
}

impl Model {
    pub fn new(predictor: Arc<dyn Predictor>, apply_softmax: bool) -> Self {
        Self {
            predictor,
            apply_softmax,
        }
    }

    /// Class probabilities for a single-image batch.
    pub fn inference(&self, batch: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let output = self.predictor.predict(batch)?;
        if output.nrows() == 0 || output.ncols() == 0 {
            return Err(InferenceError::Output(format!(
                "empty output of shape {:?}",
                output.shape()
            )));
        }

        let mut predictions = output.row(0).to_vec();
        if self.apply_softmax {
            softmax(&mut predictions);
        }
        Ok(predictions)
    }

    /// Arg-max index and its probability. Ties resolve to the lowest index.
    pub fn calculate_result(&self, predictions: &[f32]) -> Result<(usize, f32), InferenceError> {
        argmax(predictions)
    }
}

pub fn argmax(predictions: &[f32]) -> Result<(usize, f32), InferenceError> {
    if let Some(index) = predictions.iter().position(|p| !p.is_finite()) {
        return Err(InferenceError::Output(format!(
            "non-finite probability at index {}",
            index
        )));
    }

    predictions
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (index, value)| match best {
            Some((_, top)) if value <= top => best,
            _ => Some((index, value)),
        })
        .ok_or_else(|| InferenceError::Output("no class probabilities".into()))
}

pub fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in values.iter_mut() {
            *v /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPredictor(Vec<f32>);

    impl Predictor for FixedPredictor {
        fn predict(&self, _batch: &Array4<f32>) -> Result<Array2<f32>, InferenceError> {
            Array2::from_shape_vec((1, self.0.len()), self.0.clone())
                .map_err(|e| InferenceError::Output(e.to_string()))
        }
    }

    fn blank_batch() -> Array4<f32> {
        Array4::zeros((1, 224, 224, 3))
    }

    #[test]
    fn argmax_picks_highest_probability() {
        assert_eq!(argmax(&[0.1, 0.8, 0.1]).unwrap(), (1, 0.8));
        assert_eq!(argmax(&[0.9]).unwrap(), (0, 0.9));
    }

    #[test]
    fn argmax_ties_resolve_to_first_index() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]).unwrap(), (1, 0.4));
    }

    #[test]
    fn argmax_rejects_empty_and_nan() {
        assert!(matches!(argmax(&[]), Err(InferenceError::Output(_))));
        assert!(matches!(
            argmax(&[0.1, f32::NAN, 0.2]),
            Err(InferenceError::Output(_))
        ));
    }

    #[test]
    fn softmax_produces_a_distribution() {
        let mut logits = vec![1.0, 3.0, -2.0];
        softmax(&mut logits);
        let total: f32 = logits.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(logits.iter().all(|p| (0.0..=1.0).contains(p)));
        assert_eq!(argmax(&logits).unwrap().0, 1);
    }

    #[test]
    fn model_returns_first_row() {
        let model = Model::new(Arc::new(FixedPredictor(vec![0.25, 0.75])), false);
        let predictions = model.inference(&blank_batch()).unwrap();
        assert_eq!(predictions, vec![0.25, 0.75]);
        assert_eq!(model.calculate_result(&predictions).unwrap(), (1, 0.75));
    }

    #[test]
    fn model_applies_softmax_when_configured() {
        let model = Model::new(Arc::new(FixedPredictor(vec![2.0, 2.0])), true);
        let predictions = model.inference(&blank_batch()).unwrap();
        assert_eq!(predictions, vec![0.5, 0.5]);
    }

    #[test]
    fn model_rejects_empty_output() {
        let model = Model::new(Arc::new(FixedPredictor(vec![])), false);
        assert!(matches!(
            model.inference(&blank_batch()),
            Err(InferenceError::Output(_))
        ));
    }

    fn scratch_file(name: &str, contents: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("plantdx-model-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[cfg(not(feature = "torch"))]
    #[test]
    fn torch_backend_requires_feature() {
        let path = scratch_file("model.pt", b"PK\x03\x04 torchscript archive");
        let err = load_predictor(ModelBackend::Torch, &path).err();
        assert!(matches!(err, Some(InferenceError::Unavailable(ModelBackend::Torch))));
    }

    #[test]
    fn keras_artifact_under_onnx_name_is_rejected() {
        let mut contents = HDF5_SIGNATURE.to_vec();
        contents.extend_from_slice(b"\0\0\0\0 keras weights");
        let path = scratch_file("plant_disease_prediction_model.onnx", &contents);

        let err = load_predictor(ModelBackend::Onnx, &path).err();
        match err {
            Some(InferenceError::KerasArtifact(reported)) => assert_eq!(reported, path),
            other => panic!("unexpected result: {:?}", other.map(|e| e.to_string())),
        }
        let message = InferenceError::KerasArtifact(path).to_string();
        assert!(message.contains("must be exported to ONNX"));
    }

    #[test]
    fn missing_model_file_is_a_load_error() {
        let err = load_predictor(ModelBackend::Onnx, Path::new("/nonexistent/model.onnx")).err();
        assert!(matches!(err, Some(InferenceError::Load { .. })));
    }
}
