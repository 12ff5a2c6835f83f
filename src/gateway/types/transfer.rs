//! Transfer request and response DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::money::{DisplayAmount, StrictDecimal};
use crate::transfer::{TransferOutcome, TransferRecord, TransferRequest};

/// Transfer request body
///
/// Without `cid` every call is a new transfer. With `cid` the idempotency key
/// is derived from the request content plus the token, so a client retrying
/// after a timeout gets the recorded outcome instead of a second transfer.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TransferRequestDto {
    #[serde(alias = "fromIBAN")]
    #[validate(length(min = 1, max = 64, message = "from_iban is required"))]
    #[schema(example = "TR330006100519786457841326")]
    pub from_iban: String,
    #[serde(alias = "toIBAN")]
    #[validate(length(min = 1, max = 64, message = "to_iban is required"))]
    #[schema(example = "TR320010009999901234567890")]
    pub to_iban: String,
    #[schema(value_type = String, example = "25.50")]
    pub amount: StrictDecimal,
    /// Client idempotency token
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub cid: Option<String>,
}

impl TransferRequestDto {
    pub fn into_request(self) -> TransferRequest {
        match self.cid {
            Some(cid) => {
                TransferRequest::with_token(self.from_iban, self.to_iban, self.amount.inner(), &cid)
            }
            None => TransferRequest::new(self.from_iban, self.to_iban, self.amount.inner()),
        }
    }
}

/// Terminal transfer result
#[derive(Debug, Serialize, ToSchema)]
pub struct TransferData {
    pub idempotency_key: String,
    /// `applied` | `rejected`
    #[schema(example = "applied")]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub applied_at: DateTime<Utc>,
}

impl From<TransferOutcome> for TransferData {
    fn from(outcome: TransferOutcome) -> Self {
        Self {
            idempotency_key: outcome.idempotency_key.to_string(),
            status: outcome.status.to_string(),
            reason: outcome.reason.map(|r| r.code().to_string()),
            applied_at: outcome.applied_at,
        }
    }
}

/// Queued transfer acknowledgment
#[derive(Debug, Serialize, ToSchema)]
pub struct TransferAccepted {
    pub idempotency_key: String,
    #[schema(example = "queued")]
    pub status: String,
}

/// Journal view of a transfer, in flight or finished
#[derive(Debug, Serialize, ToSchema)]
pub struct TransferStatusData {
    pub idempotency_key: String,
    #[schema(example = "COMMITTED")]
    pub state: String,
    /// Present once the transfer is terminal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub from_iban: String,
    pub to_iban: String,
    #[schema(value_type = String, example = "25.50")]
    pub amount: DisplayAmount,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

impl From<TransferRecord> for TransferStatusData {
    fn from(record: TransferRecord) -> Self {
        let status = record.outcome().map(|o| o.status.to_string());
        Self {
            idempotency_key: record.idempotency_key.to_string(),
            state: record.state.to_string(),
            status,
            reason: record.reason.map(|r| r.code().to_string()),
            from_iban: record.from_iban,
            to_iban: record.to_iban,
            amount: record.amount.into(),
            attempts: record.attempts,
            created_at: record.created_at,
            updated_at: record.updated_at,
            applied_at: record.applied_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn dto(json: &str) -> TransferRequestDto {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_cid_makes_key_stable() {
        let body = r#"{"from_iban":"TR01","to_iban":"TR02","amount":"10.00","cid":"c-1"}"#;
        let a = dto(body).into_request();
        let b = dto(body).into_request();
        assert_eq!(a.idempotency_key, b.idempotency_key);
        assert_eq!(a.amount, Decimal::new(1000, 2));
    }

    #[test]
    fn test_without_cid_every_call_is_new() {
        let body = r#"{"from_iban":"TR01","to_iban":"TR02","amount":"10"}"#;
        assert_ne!(
            dto(body).into_request().idempotency_key,
            dto(body).into_request().idempotency_key
        );
    }

    #[test]
    fn test_accepts_queue_field_names() {
        let req = dto(r#"{"fromIBAN":"TR01","toIBAN":"TR02","amount":"1"}"#);
        assert_eq!(req.from_iban, "TR01");
        assert_eq!(req.to_iban, "TR02");
    }

    #[test]
    fn test_validation() {
        assert!(dto(r#"{"from_iban":"","to_iban":"TR02","amount":"1"}"#).validate().is_err());
        assert!(
            dto(r#"{"from_iban":"TR01","to_iban":"TR02","amount":"1","cid":""}"#)
                .validate()
                .is_err()
        );
        assert!(dto(r#"{"from_iban":"TR01","to_iban":"TR02","amount":"1"}"#).validate().is_ok());
    }
}
