//! 🎯 Handlers: request in, engine call, envelope out.
//!
//! Nothing in here decides what an error *means*. The engine already did
//! that; handlers only pick a status and a message.

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::AppState;
use super::envelope::ApiResponse;
use crate::common::CompanyBatchRequest;

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateTreatedParams {
    #[serde(default)]
    name: Option<String>,
}

/// 🩺 `GET /health`: ping the store and remember the answer for the write path.
pub(crate) async fn health_check(State(state): State<AppState>) -> Response {
    match state.engine.health_check().await {
        Ok(()) => {
            state.liveness.mark(true);
            ApiResponse::ok("Service healthy").with_status(StatusCode::OK)
        }
        Err(err) => {
            state.liveness.mark(false);
            warn!("🩺 Health check failed: {}", err.detailed_message());
            ApiResponse::failure(format!("Service unhealthy: {}", err.detailed_message()))
                .with_status(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// 📦 `POST /api/v1/companies/batch`
pub(crate) async fn batch_upload(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if !state.liveness.is_healthy() {
        return ApiResponse::failure("Service is not healthy")
            .with_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            return ApiResponse::failure(format!(
                "Invalid request body: {}",
                rejection.body_text()
            ))
            .with_status(rejection.status());
        }
    };

    let request: CompanyBatchRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return ApiResponse::failure(format!("Invalid request body: {}", err))
                .with_status(StatusCode::BAD_REQUEST);
        }
    };

    if request.companies.is_empty() {
        return ApiResponse::failure("No companies provided").with_status(StatusCode::BAD_REQUEST);
    }

    match state.engine.process_batch(&request.companies).await {
        Ok(processed_count) => ApiResponse::with_data(
            "Batch processed successfully",
            json!({ "processed_count": processed_count }),
        )
        .with_status(StatusCode::OK),
        Err(err) => {
            error!("💀 Batch failed: {}", err.detailed_message());
            ApiResponse::failure(format!("Failed to process batch: {}", err.detailed_message()))
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// 📚 `GET /api/v1/companies`
pub(crate) async fn fetch_all_companies(State(state): State<AppState>) -> Response {
    match state.engine.fetch_all().await {
        Ok(companies) => ApiResponse::with_data("Companies fetched successfully", companies)
            .with_status(StatusCode::OK),
        Err(err) => {
            error!("💀 Fetch failed: {}", err.detailed_message());
            ApiResponse::failure(format!(
                "Failed to fetch companies: {}",
                err.detailed_message()
            ))
            .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// ✏️ `PUT /api/v1/companies/update-treated?name=X`
pub(crate) async fn update_treated(
    State(state): State<AppState>,
    params: Option<Query<UpdateTreatedParams>>,
) -> Response {
    let name = params
        .and_then(|Query(params)| params.name)
        .filter(|name| !name.is_empty());
    let Some(name) = name else {
        return ApiResponse::failure("Company name is required")
            .with_status(StatusCode::BAD_REQUEST);
    };

    match state.engine.mark_treated(&name).await {
        Ok(()) => ApiResponse::ok("Company treated field updated successfully")
            .with_status(StatusCode::OK),
        Err(err) => {
            if err.is_expected_outcome() {
                info!("😐 Treated update for '{}' refused: {}", name, err);
            } else {
                error!("💀 Treated update failed: {}", err.detailed_message());
            }
            ApiResponse::failure(format!(
                "Failed to update treated field: {}",
                err.detailed_message()
            ))
            .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
