pub mod label_map;
pub mod treatment;

pub use label_map::{LabelMap, LabelMapError, LabelOrientation};
pub use treatment::{FALLBACK_TREATMENT, treatment_for};
