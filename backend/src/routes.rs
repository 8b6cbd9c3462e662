use actix_cors::Cors;
use actix_multipart::{Multipart, MultipartError};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use shared::{ErrorResponse, PredictionResponse};

use crate::catalog::treatment_for;
use crate::inference::ClassifyError;
use crate::state::AppState;

const FILE_FIELD: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("Malformed multipart body: {0}")]
    Multipart(String),
    #[error("Missing multipart field `file`")]
    MissingFile,
    #[error("Uploaded file exceeds the {0} byte limit")]
    TooLarge(usize),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
}

impl From<MultipartError> for PredictError {
    fn from(err: MultipartError) -> Self {
        PredictError::Multipart(err.to_string())
    }
}

impl PredictError {
    fn client_message(&self) -> String {
        match self {
            PredictError::Classify(ClassifyError::UnknownClass { .. }) => {
                "Model and label map are inconsistent".to_string()
            }
            PredictError::Classify(ClassifyError::Inference(_) | ClassifyError::Blocking(_)) => {
                "Model inference failed".to_string()
            }
            other => other.to_string(),
        }
    }

    fn log(&self) {
        match self {
            PredictError::Classify(ClassifyError::UnknownClass { .. }) => {
                error!("Label map integrity error: {}", self)
            }
            PredictError::Classify(
                ClassifyError::Inference(_)
                | ClassifyError::Blocking(_)
                | ClassifyError::Timeout(_),
            ) => error!("Prediction failed: {}", self),
            _ => warn!("Rejected upload: {}", self),
        }
    }
}

impl ResponseError for PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::Multipart(_) | PredictError::MissingFile => StatusCode::BAD_REQUEST,
            PredictError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            PredictError::Classify(ClassifyError::Preprocess(_)) => StatusCode::BAD_REQUEST,
            PredictError::Classify(ClassifyError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            PredictError::Classify(
                ClassifyError::UnknownClass { .. }
                | ClassifyError::Inference(_)
                | ClassifyError::Blocking(_),
            ) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse::new(self.client_message()))
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource(vec!["/predict/", "/predict"]).route(web::post().to(handle_prediction)),
    );
}

/// Any origin, method and header when `permissive`; same-origin only otherwise.
pub fn cors_policy(permissive: bool) -> Cors {
    if permissive {
        Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600)
    } else {
        Cors::default()
    }
}

async fn handle_prediction(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, PredictError> {
    let result = predict(&state, &mut payload).await;
    if let Err(e) = &result {
        e.log();
    }
    result
}

async fn predict(state: &AppState, payload: &mut Multipart) -> Result<HttpResponse, PredictError> {
    let image_data = read_file_field(payload, state.max_upload_bytes).await?;
    let upload_size = image_data.len();

    let prediction = state.classifier.classify(image_data).await?;
    info!(
        "Predicted {} (class {}, confidence {:.4}) for a {} byte upload",
        prediction.label, prediction.class_index, prediction.confidence, upload_size
    );

    let treatment = state
        .variant
        .includes_treatment()
        .then(|| treatment_for(&prediction.label).to_string());

    Ok(HttpResponse::Ok().json(PredictionResponse {
        disease: prediction.label,
        confidence: prediction.confidence,
        treatment,
    }))
}

async fn read_file_field(payload: &mut Multipart, limit: usize) -> Result<Vec<u8>, PredictError> {
    while let Some(mut field) = payload.try_next().await? {
        if field.name() != Some(FILE_FIELD) {
            while field.try_next().await?.is_some() {}
            continue;
        }

        let mut image_data = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk?;
            if image_data.len() + data.len() > limit {
                return Err(PredictError::TooLarge(limit));
            }
            image_data.extend_from_slice(&data);
        }
        return Ok(image_data);
    }
    Err(PredictError::MissingFile)
}
