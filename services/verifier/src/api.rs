use crate::artifact_store::{ArtifactField, ArtifactStore};
use crate::classifier::Classifier;
use crate::config::ApiConfig;
use crate::error::{PredictionError, MISSING_SIGNATURES_MESSAGE};
use crate::outcome::{self, ClassificationOutcome};
use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Multipart part carrying the reference signature
pub const REFERENCE_PART: &str = "reference";

/// Multipart part carrying the signature under test
pub const TEST_PART: &str = "file";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ArtifactStore>,
    pub classifier: Arc<dyn Classifier>,
}

/// Progress of one prediction request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Received,
    Validated,
    Staged,
    Classified,
    Parsed,
}

impl RequestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStage::Received => "received",
            RequestStage::Validated => "validated",
            RequestStage::Staged => "staged",
            RequestStage::Classified => "classified",
            RequestStage::Parsed => "parsed",
        }
    }
}

/// One uploaded part held in memory until validation passes
#[derive(Debug)]
struct UploadPart {
    data: Bytes,
    content_type: Option<String>,
    file_name: Option<String>,
}

/// A complete reference/test pair
#[derive(Debug)]
struct VerificationRequest {
    reference: UploadPart,
    test: UploadPart,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            CorsLayer::new()
                .allow_origin(parse_origins(&config.cors_origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/predict", post(predict))
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Turn configured origins into header values, skipping unusable ones
fn parse_origins(origins: &[String]) -> Vec<HeaderValue> {
    origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin.escape_debug(), error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect()
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "signature-verifier"
    }))
}

/// Verify a test signature against a reference signature
#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ClassificationOutcome>, PredictionError> {
    let mut stage = RequestStage::Received;

    let result = match multipart {
        Ok(multipart) => run_prediction(&state, multipart, &mut stage).await,
        Err(rejection) => Err(PredictionError::BadRequest(format!(
            "Invalid multipart request: {}",
            rejection.body_text()
        ))),
    };

    match result {
        Ok(outcome) => {
            metrics::counter!("verifier_predictions_total", "outcome" => "success").increment(1);
            info!(
                prediction = %outcome.prediction,
                confidence = outcome.confidence_value(),
                "Prediction completed"
            );
            Ok(Json(outcome))
        }
        Err(e) => {
            metrics::counter!("verifier_predictions_total", "outcome" => e.kind()).increment(1);
            log_failure(&e, stage);
            Err(e)
        }
    }
}

/// Validate, stage, classify and parse one request
///
/// Staged artifacts never outlive this function.
async fn run_prediction(
    state: &AppState,
    multipart: Multipart,
    stage: &mut RequestStage,
) -> Result<ClassificationOutcome, PredictionError> {
    let request = read_request(multipart).await?;
    *stage = RequestStage::Validated;

    let reference = state
        .store
        .stage(
            ArtifactField::Reference,
            request.reference.data,
            request.reference.content_type.as_deref(),
            request.reference.file_name.as_deref(),
        )
        .await?;
    // On failure the reference guard is dropped and removes its file
    let test = state
        .store
        .stage(
            ArtifactField::Test,
            request.test.data,
            request.test.content_type.as_deref(),
            request.test.file_name.as_deref(),
        )
        .await?;
    *stage = RequestStage::Staged;

    let raw = state
        .classifier
        .classify(reference.artifact(), test.artifact())
        .await;

    tokio::join!(state.store.release(reference), state.store.release(test));

    let raw = raw?;
    *stage = RequestStage::Classified;
    debug!(bytes = raw.len(), "Classifier record received");

    let outcome = outcome::parse(&raw)?;
    *stage = RequestStage::Parsed;
    Ok(outcome)
}

/// Collect the `reference` and `file` parts
///
/// Unknown parts are skipped. Missing, empty or repeated parts are rejected
/// before anything touches the staging area.
async fn read_request(mut multipart: Multipart) -> Result<VerificationRequest, PredictionError> {
    let mut reference: Option<UploadPart> = None;
    let mut test: Option<UploadPart> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        let (part_name, slot) = match field.name() {
            Some(REFERENCE_PART) => (REFERENCE_PART, &mut reference),
            Some(TEST_PART) => (TEST_PART, &mut test),
            _ => continue,
        };
        if slot.is_some() {
            return Err(PredictionError::BadRequest(format!(
                "Exactly one '{part_name}' part is allowed"
            )));
        }

        let content_type = field.content_type().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;

        *slot = Some(UploadPart {
            data,
            content_type,
            file_name,
        });
    }

    match (reference, test) {
        (Some(reference), Some(test)) if !reference.data.is_empty() && !test.data.is_empty() => {
            Ok(VerificationRequest { reference, test })
        }
        _ => Err(PredictionError::BadRequest(
            MISSING_SIGNATURES_MESSAGE.to_string(),
        )),
    }
}

/// Classify a multipart read failure, keeping over-limit bodies apart
fn multipart_error(e: MultipartError) -> PredictionError {
    let reason = format!("Invalid multipart request: {}", e.body_text());
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        PredictionError::PayloadTooLarge(reason)
    } else {
        PredictionError::BadRequest(reason)
    }
}

/// Log the internal diagnostics of a failed request
fn log_failure(err: &PredictionError, stage: RequestStage) {
    match err {
        PredictionError::BadRequest(reason) | PredictionError::PayloadTooLarge(reason) => {
            info!(stage = stage.as_str(), reason = %reason, "Rejected prediction request")
        }
        PredictionError::StorageWrite { path, source } => error!(
            stage = stage.as_str(),
            path = %path.display(),
            error = %source,
            "Failed to stage upload"
        ),
        PredictionError::ClassifierTimeout(limit) => error!(
            stage = stage.as_str(),
            timeout_ms = limit.as_millis() as u64,
            "Classifier timed out"
        ),
        PredictionError::ClassifierExecution { reason, stderr } => error!(
            stage = stage.as_str(),
            reason = %reason,
            stderr = %stderr,
            "Classifier execution failed"
        ),
        PredictionError::MalformedResult { reason, raw } => error!(
            stage = stage.as_str(),
            reason = %reason,
            raw_output = %raw,
            "Classifier returned a malformed result"
        ),
    }
}

/// Start the prediction API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting prediction API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
