use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Body returned by `POST /predict/`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionResponse {
    pub disease: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatment: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Shape of the prediction body. `Full` carries the treatment advice,
/// `Minimal` only the label and confidence.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResponseVariant {
    #[default]
    Full,
    Minimal,
}

impl ResponseVariant {
    pub fn includes_treatment(&self) -> bool {
        matches!(self, ResponseVariant::Full)
    }
}
