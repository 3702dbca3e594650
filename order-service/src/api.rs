use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use num_traits::{FromPrimitive, Zero};
use serde::{Deserialize, Serialize};
use shared::{AdmissionError, AdmissionRequest, Order, StockAvailability, VariantStock};
use std::sync::Arc;

use crate::admission::OrderAdmission;

#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<OrderAdmission>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub variant_id: String,
    pub quantity: i64,
    /// Authenticated upstream by the gateway's session layer.
    pub user_id: String,
    pub total: f64,
}

#[derive(Debug, Deserialize)]
pub struct ProvisionStockRequest {
    pub variant_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityParams {
    pub quantity: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/stock", post(provision_stock))
        .route("/stock/:variant_id/availability", get(check_availability))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<Order>, ApiError> {
    let req = admission_request(request)?;
    match state.admission.create_order(req).await {
        Ok(order) => Ok(Json(order)),
        Err(err) => Err(admission_error_response(err)),
    }
}

pub async fn check_availability(
    State(state): State<AppState>,
    Path(variant_id): Path<String>,
    Query(params): Query<AvailabilityParams>,
) -> Result<Json<StockAvailability>, ApiError> {
    let requested = params.quantity.unwrap_or(1);
    if requested <= 0 {
        return Err(bad_request("quantity must be a positive number"));
    }
    match state.admission.check_availability(&variant_id, requested).await {
        Ok(availability) => Ok(Json(availability)),
        Err(err) => Err(admission_error_response(err)),
    }
}

pub async fn provision_stock(
    State(state): State<AppState>,
    Json(request): Json<ProvisionStockRequest>,
) -> Result<Json<VariantStock>, ApiError> {
    if request.variant_id.trim().is_empty() {
        return Err(bad_request("variant_id must not be empty"));
    }
    if request.quantity <= 0 {
        return Err(bad_request("quantity must be a positive number"));
    }
    match state
        .admission
        .provision_stock(&request.variant_id, request.quantity)
        .await
    {
        Ok(stock) => Ok(Json(stock)),
        Err(err) => Err(admission_error_response(err)),
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}

fn admission_request(request: CreateOrderRequest) -> Result<AdmissionRequest, ApiError> {
    if request.variant_id.trim().is_empty() {
        return Err(bad_request("variant_id must not be empty"));
    }
    if request.quantity <= 0 {
        return Err(bad_request("quantity must be a positive number"));
    }
    let total = BigDecimal::from_f64(request.total)
        .ok_or_else(|| bad_request("total must be a finite amount"))?;
    if total < BigDecimal::zero() {
        return Err(bad_request("total must not be negative"));
    }
    Ok(AdmissionRequest {
        variant_id: request.variant_id,
        quantity: request.quantity,
        user_id: request.user_id,
        total,
    })
}

/// The boundary's only knowledge of admission failures is the error kind.
fn admission_error_response(err: AdmissionError) -> ApiError {
    let status = match &err {
        AdmissionError::InsufficientStock { .. } => StatusCode::CONFLICT,
        AdmissionError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AdmissionError::Storage { .. } | AdmissionError::Commit { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}
