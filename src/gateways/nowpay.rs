use anyhow::bail;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::json;
use sha2::Sha512;

use super::{id_field, send_with_retry, REQUEST_TIMEOUT};
use crate::models::deposits::{GatewayInvoice, PaymentStatus};

type HmacSha512 = Hmac<Sha512>;

/// Nowpay signs webhook notifications with HMAC-SHA-512 over the payload
/// serialized with its keys in sorted order. The hex-encoded signature is
/// delivered in the `x-nowpay-sig` request header.
#[derive(Clone)]
pub struct NowPayApi {
    api_key: String,
    ipn_secret: Option<String>,
    allow_unsigned: bool,
    url: String,
    client: reqwest::Client,
}

impl NowPayApi {
    pub fn new(
        api_key: String,
        ipn_secret: Option<String>,
        allow_unsigned: bool,
        url: String,
    ) -> Self {
        Self {
            api_key,
            ipn_secret,
            allow_unsigned,
            url,
            client: reqwest::Client::new(),
        }
    }

    pub async fn create_payment(
        &self,
        order_id: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<GatewayInvoice, anyhow::Error> {
        let payload = json!({
            "price_amount": amount,
            "price_currency": currency,
            "order_id": order_id,
        });

        let request = self
            .client
            .post(format!("{}/v1/payment", self.url))
            .header("x-api-key", &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload);

        let response = send_with_retry(request).await?.error_for_status()?;
        let body: serde_json::Value = response.json().await?;

        let payment_id = match body.get("payment_id").and_then(id_field) {
            Some(id) => id,
            None => bail!("Nowpay: bad response format."),
        };
        let pay_address = body
            .get("pay_address")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(GatewayInvoice {
            payment_id,
            pay_address,
        })
    }

    /// Authenticates an inbound webhook payload. Total over untrusted input:
    /// malformed signatures and payloads return false, never an error.
    pub fn verify_signature(&self, payload: &serde_json::Value, signature: Option<&str>) -> bool {
        let secret = match &self.ipn_secret {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                if self.allow_unsigned {
                    log::warn!("Nowpay IPN secret not configured, accepting unsigned webhook.");
                    return true;
                }
                return false;
            }
        };

        let Some(signature) = signature else {
            return false;
        };
        let Ok(provided) = hex::decode(signature.trim()) else {
            return false;
        };
        // serde_json object keys iterate in sorted order, which is the
        // canonical form the gateway signs.
        let Ok(canonical) = serde_json::to_string(payload) else {
            return false;
        };
        let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
            return false;
        };

        mac.update(canonical.as_bytes());
        mac.verify_slice(&provided).is_ok()
    }

    /// Translates the gateway's status vocabulary onto the internal model.
    /// The gateway's "confirmed" only means the transfer is visible on
    /// chain; the payment settles at "finished".
    pub fn map_status(status: &str) -> PaymentStatus {
        match status {
            "finished" => PaymentStatus::Confirmed,
            "waiting" | "confirming" | "confirmed" | "sending" | "partially_paid" => {
                PaymentStatus::Waiting
            }
            "failed" | "refunded" | "expired" => PaymentStatus::Expired,
            other => {
                log::warn!("Nowpay sent unrecognized payment status: {}", other);
                PaymentStatus::Waiting
            }
        }
    }

    pub fn is_paid(status: &str) -> bool {
        status == "finished"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(secret: Option<&str>, allow_unsigned: bool) -> NowPayApi {
        NowPayApi::new(
            "test-key".to_string(),
            secret.map(String::from),
            allow_unsigned,
            "http://localhost:9999".to_string(),
        )
    }

    fn sign(payload: &serde_json::Value, secret: &str) -> String {
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(serde_json::to_string(payload).unwrap().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_correctly_signed_payload() {
        let api = api(Some("ipn-secret"), false);
        let payload = json!({"payment_id": 4532907, "payment_status": "finished"});
        let signature = sign(&payload, "ipn-secret");

        assert!(api.verify_signature(&payload, Some(&signature)));
    }

    #[test]
    fn key_order_does_not_affect_the_signature() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"payment_id": 1, "payment_status": "finished"}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"payment_status": "finished", "payment_id": 1}"#).unwrap();

        assert_eq!(sign(&a, "s"), sign(&b, "s"));
    }

    #[test]
    fn rejects_tampered_payload() {
        let api = api(Some("ipn-secret"), false);
        let payload = json!({"payment_id": 4532907, "payment_status": "waiting"});
        let signature = sign(&payload, "ipn-secret");

        let tampered = json!({"payment_id": 4532907, "payment_status": "finished"});
        assert!(!api.verify_signature(&tampered, Some(&signature)));
    }

    #[test]
    fn rejects_signature_made_with_wrong_secret() {
        let api = api(Some("ipn-secret"), false);
        let payload = json!({"payment_id": 4532907, "payment_status": "finished"});
        let signature = sign(&payload, "other-secret");

        assert!(!api.verify_signature(&payload, Some(&signature)));
    }

    #[test]
    fn rejects_missing_and_malformed_signatures() {
        let api = api(Some("ipn-secret"), false);
        let payload = json!({"payment_id": 4532907});

        assert!(!api.verify_signature(&payload, None));
        assert!(!api.verify_signature(&payload, Some("not hex at all")));
        assert!(!api.verify_signature(&payload, Some("")));
    }

    #[test]
    fn unsigned_webhooks_rejected_unless_explicitly_allowed() {
        let payload = json!({"payment_id": 4532907});

        assert!(!api(None, false).verify_signature(&payload, None));
        assert!(!api(Some(""), false).verify_signature(&payload, None));
        assert!(api(None, true).verify_signature(&payload, None));
    }

    #[test]
    fn maps_every_status() {
        assert_eq!(NowPayApi::map_status("finished"), PaymentStatus::Confirmed);
        assert_eq!(NowPayApi::map_status("waiting"), PaymentStatus::Waiting);
        assert_eq!(NowPayApi::map_status("confirming"), PaymentStatus::Waiting);
        assert_eq!(NowPayApi::map_status("confirmed"), PaymentStatus::Waiting);
        assert_eq!(NowPayApi::map_status("partially_paid"), PaymentStatus::Waiting);
        assert_eq!(NowPayApi::map_status("failed"), PaymentStatus::Expired);
        assert_eq!(NowPayApi::map_status("refunded"), PaymentStatus::Expired);
        assert_eq!(NowPayApi::map_status("expired"), PaymentStatus::Expired);
        assert_eq!(NowPayApi::map_status("something_new"), PaymentStatus::Waiting);
        assert_eq!(NowPayApi::map_status(""), PaymentStatus::Waiting);
    }

    #[test]
    fn only_finished_counts_as_paid() {
        assert!(NowPayApi::is_paid("finished"));
        assert!(!NowPayApi::is_paid("confirmed"));
        assert!(!NowPayApi::is_paid("waiting"));
        assert!(!NowPayApi::is_paid("failed"));
    }
}
