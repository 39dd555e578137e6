//! HTTP Layer
//!
//! `POST /ocr/` accepts a multipart image upload and answers with canonical
//! text regions. `GET /health` reports engine readiness. Inference runs on a
//! blocking worker so the async runtime never waits on the engine lock.

pub mod classify;

use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{info, info_span, Instrument, Span};
use uuid::Uuid;

use crate::error::OcrError;
use crate::shared::{AppState, HealthReport, OcrResponse, TextRegion};
use crate::storage::uploads::{upload_extension, TempUpload};
use crate::vision::normalize;

use classify::classify;

/// Multipart field carrying the image
pub const UPLOAD_FIELD: &str = "file";

/// Build the service router
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.server.max_upload_bytes();

    Router::new()
        .route("/ocr/", post(ocr))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = HealthReport::from_readiness(state.readiness());
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn ocr(State(state): State<AppState>, multipart: Result<Multipart, MultipartRejection>) -> Response {
    let span = info_span!("ocr", request_id = %Uuid::new_v4());

    async move {
        let readiness = *state.readiness();
        match process(&state, multipart).await {
            Ok(regions) => {
                info!("OCR completed: {} text regions", regions.len());
                (StatusCode::OK, Json(OcrResponse::success(readiness.device_label(), regions))).into_response()
            }
            Err(err) => classify(&err, &readiness).into_response(),
        }
    }
    .instrument(span)
    .await
}

async fn process(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Vec<TextRegion>, OcrError> {
    if !state.readiness().initialized() {
        return Err(OcrError::Initialization);
    }

    let multipart = multipart.map_err(|e| OcrError::InvalidUpload(e.body_text()))?;
    let (filename, bytes) = read_upload(multipart).await?;
    let extension = upload_extension(&filename, &state.config.upload.allowed_extensions)?;
    info!("Processing {:?} ({} bytes)", filename, bytes.len());

    let adapter = Arc::clone(&state.adapter);
    let temp_dir = state.config.upload.temp_dir.clone();
    let span = Span::current();

    let normalized = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        let upload = TempUpload::write(temp_dir.as_deref(), &extension, &bytes)?;
        let raw = adapter.recognize(upload.path())?;
        normalize(&raw)
    })
    .await
    .map_err(|e| OcrError::engine(format!("OCR worker failed: {}", e)))??;

    Ok(normalized.regions)
}

/// Pull the first `file` field out of the form
async fn read_upload(mut multipart: Multipart) -> Result<(String, axum::body::Bytes), OcrError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| OcrError::InvalidUpload(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| OcrError::InvalidUpload(e.body_text()))?;
        return Ok((filename, bytes));
    }

    Err(OcrError::InvalidUpload("No file provided".to_string()))
}
