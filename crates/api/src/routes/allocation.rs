//! Batch and allocation endpoints.
//!
//! Each request body maps to exactly one event, which is dispatched on the
//! message bus.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::NaiveDate;
use domain::Event;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct AddBatchRequest {
    #[serde(rename = "ref")]
    pub reference: String,
    pub sku: String,
    pub qty: u32,
    #[serde(default)]
    pub eta: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct AllocateRequest {
    pub orderid: String,
    pub sku: String,
    pub qty: u32,
}

#[derive(Debug, Deserialize)]
pub struct ChangeQuantityRequest {
    pub batchref: String,
    pub qty: u32,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct BatchAddedResponse {
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Serialize)]
pub struct AllocatedResponse {
    pub batchref: String,
}

#[derive(Debug, Serialize)]
pub struct QuantityChangedResponse {
    pub batchref: String,
    pub qty: u32,
}

// -- Handlers --

/// POST /batches: register a purchased batch.
#[tracing::instrument(skip(state))]
pub async fn add_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddBatchRequest>,
) -> Result<(StatusCode, Json<BatchAddedResponse>), ApiError> {
    if req.reference.trim().is_empty() || req.sku.trim().is_empty() {
        return Err(ApiError::BadRequest("ref and sku must not be empty".to_string()));
    }

    state
        .bus
        .dispatch(Event::batch_created(
            req.reference.as_str(),
            req.sku.as_str(),
            req.qty,
            req.eta,
        ))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(BatchAddedResponse {
            reference: req.reference,
        }),
    ))
}

/// POST /allocate: allocate an order line and return the chosen batch.
#[tracing::instrument(skip(state))]
pub async fn allocate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AllocateRequest>,
) -> Result<(StatusCode, Json<AllocatedResponse>), ApiError> {
    if req.qty == 0 {
        return Err(ApiError::BadRequest("qty must be positive".to_string()));
    }

    let batchref = state
        .bus
        .dispatch(Event::allocation_request(req.orderid, req.sku, req.qty))
        .await?
        .ok_or_else(|| ApiError::Internal("allocation returned no batch reference".to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(AllocatedResponse {
            batchref: batchref.to_string(),
        }),
    ))
}

/// POST /batches/quantity: correct a batch's purchased quantity.
#[tracing::instrument(skip(state))]
pub async fn change_quantity(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChangeQuantityRequest>,
) -> Result<Json<QuantityChangedResponse>, ApiError> {
    state
        .bus
        .dispatch(Event::batch_quantity_changed(req.batchref.as_str(), req.qty))
        .await?;

    Ok(Json(QuantityChangedResponse {
        batchref: req.batchref,
        qty: req.qty,
    }))
}
