use ndarray::{Array2, Array4};
use std::path::Path;
use std::sync::Mutex;
use tch::{CModule, Device, Kind, Tensor};

use super::model::{InferenceError, Predictor};

/// TorchScript export of the classifier. Input is permuted to NCHW before the
/// forward pass. Forward passes are serialized through the module lock.
pub struct TorchPredictor {
    module: Mutex<CModule>,
    device: Device,
}

impl TorchPredictor {
    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        let device = Device::cuda_if_available();
        let mut module =
            CModule::load_on_device(path, device).map_err(|e| InferenceError::Load {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        module.set_eval();
        log::info!("TorchScript model loaded on {:?}", device);

        Ok(Self {
            module: Mutex::new(module),
            device,
        })
    }
}

impl Predictor for TorchPredictor {
    fn predict(&self, batch: &Array4<f32>) -> Result<Array2<f32>, InferenceError> {
        let contiguous = batch.as_standard_layout();
        let data = contiguous
            .as_slice()
            .ok_or_else(|| InferenceError::Runtime("input tensor is not contiguous".into()))?;
        let shape: Vec<i64> = batch.shape().iter().map(|&d| d as i64).collect();
        let input = Tensor::from_slice(data)
            .view(shape.as_slice())
            .permute([0, 3, 1, 2])
            .to_device(self.device);

        let output = {
            let module = self
                .module
                .lock()
                .map_err(|_| InferenceError::Runtime("model lock poisoned".into()))?;
            tch::no_grad(|| module.forward_ts(&[input]))
                .map_err(|e| InferenceError::Runtime(e.to_string()))?
        };

        let rows = batch.shape()[0].max(1) as i64;
        let output = output
            .to_kind(Kind::Float)
            .to_device(Device::Cpu)
            .reshape([rows, -1]);
        let (rows, cols) = output
            .size2()
            .map_err(|e| InferenceError::Output(e.to_string()))?;
        let numel = (rows * cols) as usize;
        let mut values = vec![0.0f32; numel];
        output.copy_data(&mut values, numel);

        Array2::from_shape_vec((rows as usize, cols as usize), values)
            .map_err(|e| InferenceError::Output(e.to_string()))
    }
}
