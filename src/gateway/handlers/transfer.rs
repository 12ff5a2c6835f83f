//! Transfer handlers

use std::sync::Arc;

use axum::extract::{Path, State};
use tracing::{error, info};

use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, TransferAccepted, TransferData, TransferRequestDto, TransferStatusData,
    ValidJson, accepted, error_codes, ok,
};
use crate::core_types::IdempotencyKey;
use crate::transfer::TransferError;

/// Execute a transfer and wait for the outcome
///
/// POST /api/v1/transfers
///
/// The coordinator runs in its own task: a client hanging up after the
/// debit does not stop the transfer from reaching a terminal state.
#[utoipa::path(
    post,
    path = "/api/v1/transfers",
    request_body = TransferRequestDto,
    responses(
        (status = 200, description = "Transfer applied", body = TransferData, content_type = "application/json"),
        (status = 400, description = "Invalid parameters, same account or currency mismatch"),
        (status = 404, description = "Unknown source or target account"),
        (status = 409, description = "Contention, or the same key is being processed"),
        (status = 422, description = "Insufficient funds, or key reused for another transfer"),
        (status = 500, description = "Internal error")
    ),
    tag = "Transfer"
)]
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<TransferRequestDto>,
) -> ApiResult<TransferData> {
    let req = req.into_request();
    info!(
        idempotency_key = %req.idempotency_key,
        amount = %req.amount,
        "Transfer requested"
    );

    let outcome = state
        .coordinator
        .spawn_execute(req)
        .await
        .map_err(|e| {
            error!(error = %e, "Transfer task failed");
            ApiError::internal("Internal error")
        })??;

    ok(outcome.into_result()?.into())
}

/// Queue a transfer
///
/// POST /api/v1/transfers/async
///
/// Returns as soon as the queue durably accepted the message. Poll
/// `GET /api/v1/transfers/{idempotency_key}` for the outcome.
#[utoipa::path(
    post,
    path = "/api/v1/transfers/async",
    request_body = TransferRequestDto,
    responses(
        (status = 202, description = "Transfer queued", body = TransferAccepted, content_type = "application/json"),
        (status = 400, description = "Invalid parameters"),
        (status = 503, description = "Queue unavailable")
    ),
    tag = "Transfer"
)]
pub async fn create_transfer_async(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<TransferRequestDto>,
) -> ApiResult<TransferAccepted> {
    let req = req.into_request();
    state.queue.publish(&req).await?;
    info!(idempotency_key = %req.idempotency_key, "Transfer queued");

    accepted(TransferAccepted {
        idempotency_key: req.idempotency_key.to_string(),
        status: "queued".to_string(),
    })
}

/// Get transfer status
///
/// GET /api/v1/transfers/{idempotency_key}
#[utoipa::path(
    get,
    path = "/api/v1/transfers/{idempotency_key}",
    params(
        ("idempotency_key" = String, Path, description = "Idempotency key returned on submission")
    ),
    responses(
        (status = 200, description = "Transfer status", body = TransferStatusData, content_type = "application/json"),
        (status = 400, description = "Invalid key format"),
        (status = 404, description = "Transfer not found")
    ),
    tag = "Transfer"
)]
pub async fn get_transfer(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<TransferStatusData> {
    let key = IdempotencyKey::parse(&key)
        .ok_or_else(|| ApiError::bad_request("Invalid idempotency key format"))?;

    match state.coordinator.status(&key).await {
        Ok(record) => ok(record.into()),
        // A queued transfer has no journal row until a consumer claims it
        Err(TransferError::NotFound(_)) => {
            ApiError::not_found(error_codes::TRANSFER_NOT_FOUND, "Transfer not found").into_err()
        }
        Err(e) => Err(e.into()),
    }
}
