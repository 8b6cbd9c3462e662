pub mod classifier;
pub mod model;
pub mod onnx;
pub mod preprocess;
#[cfg(feature = "torch")]
pub mod torch;

pub use classifier::{Classifier, ClassifyError, Prediction};
pub use model::{InferenceError, Model, ModelBackend, Predictor, load_predictor};
