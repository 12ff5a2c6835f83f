//! Wire format for queued transfer requests
//!
//! ```json
//! {"fromIBAN":"TR..","toIBAN":"TR..","amount":"12.50","idempotencyKey":"..."}
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::QueueError;
use crate::core_types::IdempotencyKey;
use crate::transfer::TransferRequest;

#[derive(Debug, Serialize, Deserialize)]
struct TransferMessage {
    #[serde(rename = "fromIBAN")]
    from_iban: String,
    #[serde(rename = "toIBAN")]
    to_iban: String,
    amount: Decimal,
    #[serde(rename = "idempotencyKey")]
    idempotency_key: String,
}

pub fn encode(req: &TransferRequest) -> Result<String, QueueError> {
    let message = TransferMessage {
        from_iban: req.from_iban.clone(),
        to_iban: req.to_iban.clone(),
        amount: req.amount,
        idempotency_key: req.idempotency_key.as_str().to_string(),
    };
    serde_json::to_string(&message).map_err(|e| QueueError::Malformed(e.to_string()))
}

pub fn decode(payload: &str) -> Result<TransferRequest, QueueError> {
    let message: TransferMessage =
        serde_json::from_str(payload).map_err(|e| QueueError::Malformed(e.to_string()))?;
    let key = IdempotencyKey::parse(&message.idempotency_key)
        .ok_or_else(|| QueueError::Malformed("invalid idempotency key".into()))?;
    Ok(TransferRequest::with_key(
        message.from_iban,
        message.to_iban,
        message.amount,
        key,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let req = TransferRequest::with_token("TR01", "TR02", Decimal::new(1250, 2), "abc");
        let json = encode(&req).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["fromIBAN"], "TR01");
        assert_eq!(value["toIBAN"], "TR02");
        assert_eq!(value["amount"], "12.50");
        assert_eq!(value["idempotencyKey"], req.idempotency_key.as_str());

        assert_eq!(decode(&json).unwrap(), req);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(decode("not json"), Err(QueueError::Malformed(_))));
        assert!(matches!(
            decode(r#"{"fromIBAN":"a","toIBAN":"b","amount":"1","idempotencyKey":"  "}"#),
            Err(QueueError::Malformed(_))
        ));
        assert!(matches!(
            decode(r#"{"fromIBAN":"a","toIBAN":"b","amount":"ten","idempotencyKey":"k"}"#),
            Err(QueueError::Malformed(_))
        ));
    }
}
