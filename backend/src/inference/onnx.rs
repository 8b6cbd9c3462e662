use ndarray::{Array2, Array4};
use std::path::Path;
use tract_onnx::prelude::*;

use super::model::{InferenceError, Predictor};
use super::preprocess::{CHANNELS, INPUT_SIZE};

type OnnxPlan = TypedRunnableModel<TypedModel>;

/// ONNX export of the Keras classifier, run with tract. The plan is
/// immutable after optimisation so concurrent `run` calls are fine.
pub struct OnnxPredictor {
    plan: OnnxPlan,
    classes: Option<usize>,
}

impl OnnxPredictor {
    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        let load_error = |e: TractError| InferenceError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        tract_onnx::onnx()
            .model_for_path(path)
            .and_then(Self::from_model)
            .map_err(load_error)
    }

    pub fn from_model(model: InferenceModel) -> TractResult<Self> {
        let side = INPUT_SIZE as usize;
        let plan = model
            .with_input_fact(0, f32::fact([1, side, side, CHANNELS]).into())?
            .into_optimized()?
            .into_runnable()?;

        // The batch axis is 1, so every concrete output element is a class score.
        let classes = plan
            .model()
            .output_fact(0)
            .ok()
            .and_then(|fact| fact.shape.as_concrete().map(|dims| dims.iter().product::<usize>()))
            .filter(|n| *n > 0);
        match classes {
            Some(n) => log::info!("ONNX model loaded with {} output classes", n),
            None => log::warn!("ONNX model output width is symbolic, class coverage checked per request"),
        }

        Ok(Self { plan, classes })
    }
}

impl Predictor for OnnxPredictor {
    fn predict(&self, batch: &Array4<f32>) -> Result<Array2<f32>, InferenceError> {
        let contiguous = batch.as_standard_layout();
        let data = contiguous
            .as_slice()
            .ok_or_else(|| InferenceError::Runtime("input tensor is not contiguous".into()))?;
        let input = Tensor::from_shape(batch.shape(), data)
            .map_err(|e| InferenceError::Runtime(e.to_string()))?;

        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| InferenceError::Runtime(e.to_string()))?;
        let output = outputs
            .first()
            .ok_or_else(|| InferenceError::Output("model returned no outputs".into()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::Output(e.to_string()))?;

        let rows = batch.shape()[0].max(1);
        let values: Vec<f32> = view.iter().copied().collect();
        if values.is_empty() || values.len() % rows != 0 {
            return Err(InferenceError::Output(format!(
                "output of shape {:?} does not split into {} rows",
                view.shape(),
                rows
            )));
        }
        let cols = values.len() / rows;
        Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| InferenceError::Output(e.to_string()))
    }

    fn num_classes(&self) -> Option<usize> {
        self.classes
    }
}
