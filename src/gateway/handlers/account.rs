//! Account handlers

use std::sync::Arc;

use axum::extract::{Path, State};

use super::super::state::AppState;
use super::super::types::{
    AccountData, ApiError, ApiResult, OpenAccountRequest, ValidJson, created, error_codes, ok,
};
use crate::core_types::AccountId;

/// Open an account
///
/// POST /api/v1/accounts
///
/// The IBAN is generated server-side.
#[utoipa::path(
    post,
    path = "/api/v1/accounts",
    request_body = OpenAccountRequest,
    responses(
        (status = 201, description = "Account opened", body = AccountData, content_type = "application/json"),
        (status = 400, description = "Invalid parameters"),
        (status = 500, description = "Internal error")
    ),
    tag = "Account"
)]
pub async fn open_account(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<OpenAccountRequest>,
) -> ApiResult<AccountData> {
    let account = state.accounts.open(req.into()).await?;
    created(account.into())
}

/// List all accounts
///
/// GET /api/v1/accounts
#[utoipa::path(
    get,
    path = "/api/v1/accounts",
    responses(
        (status = 200, description = "All accounts", body = [AccountData], content_type = "application/json"),
        (status = 500, description = "Internal error")
    ),
    tag = "Account"
)]
pub async fn list_accounts(State(state): State<Arc<AppState>>) -> ApiResult<Vec<AccountData>> {
    let accounts = state.accounts.list().await?;
    ok(accounts.into_iter().map(AccountData::from).collect())
}

/// Get one account
///
/// GET /api/v1/accounts/{id}
#[utoipa::path(
    get,
    path = "/api/v1/accounts/{id}",
    params(
        ("id" = String, Path, description = "Account ID (UUID)")
    ),
    responses(
        (status = 200, description = "Account details", body = AccountData, content_type = "application/json"),
        (status = 400, description = "Invalid account ID format"),
        (status = 404, description = "Account not found")
    ),
    tag = "Account"
)]
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<AccountData> {
    let id: AccountId = id
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid account ID format"))?;

    match state.accounts.get(id).await {
        Ok(account) => ok(account.into()),
        Err(crate::ledger::LedgerError::NotFound(_)) => {
            ApiError::not_found(error_codes::ACCOUNT_NOT_FOUND, "Account not found").into_err()
        }
        Err(e) => Err(e.into()),
    }
}
