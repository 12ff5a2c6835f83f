//! Gateway types module
//!
//! ## Input Types
//! - [`StrictDecimal`]: Format-validated decimal for API input
//! - [`ValidJson`]: Axum extractor running `validator` rules
//! - [`OpenAccountRequest`], [`TransferRequestDto`]: request bodies
//!
//! ## Output Types
//! - [`DisplayAmount`]: Formatted amount for API responses
//! - [`ApiResponse<T>`]: Unified API response wrapper
//! - [`ApiError`]: Error half of [`ApiResult`]

pub mod account;
pub mod extract;
pub mod money;
pub mod response;
pub mod transfer;

pub use account::{AccountData, OpenAccountRequest};
pub use extract::ValidJson;
pub use money::{AmountFormatError, DisplayAmount, StrictDecimal};
pub use response::{ApiError, ApiResponse, ApiResult, accepted, created, error_codes, ok};
pub use transfer::{TransferAccepted, TransferData, TransferRequestDto, TransferStatusData};
