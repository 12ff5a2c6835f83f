//! API Response types and error codes
//!
//! - `ApiResponse<T>`: Unified response wrapper
//! - `ApiError`: Error half of every handler result
//! - `error_codes`: Standard error code constants

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::ledger::LedgerError;
use crate::queue::QueueError;
use crate::transfer::{RejectReason, TransferError};

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// All API responses follow this structure:
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or absent (error)
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Response code: 0 for success, non-zero for errors
    #[schema(example = 0)]
    pub code: i32,
    /// Response message
    #[schema(example = "ok")]
    pub msg: String,
    /// Response data (only present when code == 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Create success response
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    /// Create error response
    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

// ============================================================================
// ApiError
// ============================================================================

/// Handler error carrying the HTTP status and the envelope code
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn not_found(code: i32, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::INTERNAL_ERROR,
            msg,
        )
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::SERVICE_UNAVAILABLE,
            msg,
        )
    }

    pub fn into_err<T>(self) -> Result<T, ApiError> {
        Err(self)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiResponse::<()>::error(self.code, self.msg)),
        )
            .into_response()
    }
}

impl From<TransferError> for ApiError {
    fn from(e: TransferError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = match &e {
            TransferError::Rejected(reason) => error_codes::for_reason(*reason),
            TransferError::Contention(_) | TransferError::InProgress(_) => {
                error_codes::TRANSFER_CONFLICT
            }
            TransferError::KeyMismatch(_) => error_codes::IDEMPOTENCY_KEY_MISMATCH,
            TransferError::NotFound(_) => error_codes::TRANSFER_NOT_FOUND,
            TransferError::Cancelled => error_codes::REQUEST_CANCELLED,
            TransferError::CriticalInconsistency(_) => error_codes::CRITICAL_INCONSISTENCY,
            TransferError::Store(_) | TransferError::Journal(_) => error_codes::INTERNAL_ERROR,
        };
        // Storage details stay in the log
        let msg = match &e {
            TransferError::Store(_) | TransferError::Journal(_) => {
                tracing::error!(error = %e, "Transfer failed on storage");
                "Internal error".to_string()
            }
            _ => e.to_string(),
        };
        Self::new(status, code, msg)
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(id) => Self::not_found(
                error_codes::ACCOUNT_NOT_FOUND,
                format!("Account not found: {}", id),
            ),
            LedgerError::InvalidAccount(msg) => Self::bad_request(msg),
            LedgerError::AlreadyExists(detail) => Self::new(
                StatusCode::CONFLICT,
                error_codes::ACCOUNT_EXISTS,
                format!("Account already exists: {}", detail),
            ),
            other => {
                tracing::error!(error = %other, "Ledger store failed");
                Self::internal("Internal error")
            }
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        tracing::error!(error = %e, "Queue publish failed");
        Self::service_unavailable("Transfer queue unavailable")
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(e: ValidationErrors) -> Self {
        Self::bad_request(e.to_string())
    }
}

/// Handler result: status plus envelope on success, `ApiError` otherwise
pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

pub fn created<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

pub fn accepted<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(data))))
}

// ============================================================================
// Error Codes
// ============================================================================

/// Standard API error codes
pub mod error_codes {
    use super::RejectReason;

    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_BALANCE: i32 = 1002;
    pub const INVALID_TRANSFER: i32 = 1003;
    pub const INVALID_AMOUNT: i32 = 1004;
    pub const IDEMPOTENCY_KEY_MISMATCH: i32 = 1005;

    // Resource errors (4xxx)
    pub const ACCOUNT_NOT_FOUND: i32 = 4001;
    pub const TRANSFER_NOT_FOUND: i32 = 4002;
    pub const ACCOUNT_EXISTS: i32 = 4090;
    pub const TRANSFER_CONFLICT: i32 = 4091;
    pub const REQUEST_CANCELLED: i32 = 4990;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const CRITICAL_INCONSISTENCY: i32 = 5002;

    pub fn for_reason(reason: RejectReason) -> i32 {
        match reason {
            RejectReason::UnknownSourceAccount | RejectReason::UnknownTargetAccount => {
                ACCOUNT_NOT_FOUND
            }
            RejectReason::SameAccount | RejectReason::CurrencyMismatch => INVALID_TRANSFER,
            RejectReason::InvalidAmount => INVALID_AMOUNT,
            RejectReason::InsufficientFunds => INSUFFICIENT_BALANCE,
            RejectReason::Contention => TRANSFER_CONFLICT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::IdempotencyKey;

    #[test]
    fn test_error_envelope_omits_data() {
        let json = serde_json::to_value(ApiResponse::<()>::error(1001, "bad")).unwrap();
        assert_eq!(json["code"], 1001);
        assert_eq!(json["msg"], "bad");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_transfer_error_mapping() {
        let err = ApiError::from(TransferError::Rejected(RejectReason::InsufficientFunds));
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, error_codes::INSUFFICIENT_BALANCE);

        let err = ApiError::from(TransferError::Rejected(RejectReason::UnknownTargetAccount));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, error_codes::ACCOUNT_NOT_FOUND);

        let err = ApiError::from(TransferError::Contention(IdempotencyKey::generate()));
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, error_codes::TRANSFER_CONFLICT);
    }

    #[test]
    fn test_storage_detail_is_hidden() {
        let err = ApiError::from(TransferError::Store("password=hunter2".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.msg.contains("hunter2"));
    }
}
