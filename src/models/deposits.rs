use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Internal deposit state. `Confirmed` and `Expired` are terminal; a row in
/// either state is never transitioned again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
pub enum PaymentStatus {
    Waiting,
    Confirmed,
    Expired,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Waiting => write!(f, "waiting"),
            PaymentStatus::Confirmed => write!(f, "confirmed"),
            PaymentStatus::Expired => write!(f, "expired"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayProvider {
    Nowpay,
    Cryptex,
}

impl fmt::Display for GatewayProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayProvider::Nowpay => write!(f, "nowpay"),
            GatewayProvider::Cryptex => write!(f, "cryptex"),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Deposit {
    pub id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_id: String,
    pub payment_status: PaymentStatus,
    pub pay_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize)]
pub struct NewDeposit {
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub provider: GatewayProvider,
}

/// Invoice details returned by a gateway when a payment is created.
#[derive(Clone, Deserialize, Serialize)]
pub struct GatewayInvoice {
    pub payment_id: String,
    pub pay_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn deposit_request_parses_decimal_amounts_exactly() {
        let req: NewDeposit = serde_json::from_str(
            r#"{"user_id": "u-1", "amount": "25.00", "currency": "usd", "provider": "nowpay"}"#,
        )
        .unwrap();

        assert_eq!(req.amount, dec!(25.00));
        assert_eq!(req.provider, GatewayProvider::Nowpay);
    }

    #[test]
    fn payment_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Confirmed).unwrap(),
            "\"confirmed\""
        );

        let status: PaymentStatus = serde_json::from_str("\"expired\"").unwrap();
        assert_eq!(status, PaymentStatus::Expired);
    }

    #[test]
    fn provider_deserializes_lowercase() {
        let provider: GatewayProvider = serde_json::from_str("\"cryptex\"").unwrap();
        assert_eq!(provider, GatewayProvider::Cryptex);
    }
}
