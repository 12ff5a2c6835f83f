//! Account request and response DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::money::{DisplayAmount, StrictDecimal};
use crate::ledger::{Account, OpenAccount};

/// Open account request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct OpenAccountRequest {
    /// ISO 4217 currency code
    #[validate(length(equal = 3, message = "currency must be a 3-letter code"))]
    #[schema(example = "TRY")]
    pub currency: String,
    #[validate(length(min = 1, max = 64, message = "owner_user_id is required"))]
    #[schema(example = "user-42")]
    pub owner_user_id: String,
    /// Opening balance, defaults to zero
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "100.00")]
    pub initial_balance: Option<StrictDecimal>,
}

impl From<OpenAccountRequest> for OpenAccount {
    fn from(req: OpenAccountRequest) -> Self {
        OpenAccount {
            currency: req.currency,
            owner_user_id: req.owner_user_id,
            initial_balance: req.initial_balance.map(StrictDecimal::inner).unwrap_or_default(),
        }
    }
}

/// Account response data
#[derive(Debug, Serialize, ToSchema)]
pub struct AccountData {
    #[schema(example = "0b9f6e52-6f0d-4c7b-9a34-7d3f0c1e5a21")]
    pub id: String,
    #[schema(example = "TR330006100519786457841326")]
    pub iban: String,
    #[schema(example = "TRY")]
    pub currency: String,
    #[schema(value_type = String, example = "100.00")]
    pub balance: DisplayAmount,
    pub owner_user_id: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountData {
    fn from(account: Account) -> Self {
        Self {
            id: account.id.to_string(),
            iban: account.iban.to_string(),
            currency: account.currency,
            balance: account.balance.into(),
            owner_user_id: account.owner_user_id,
            version: account.version,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}
