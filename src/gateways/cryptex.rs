use anyhow::bail;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rust_decimal::Decimal;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{constant_time_eq, send_with_retry, REQUEST_TIMEOUT};
use crate::models::deposits::{GatewayInvoice, PaymentStatus};

/// Cryptex signs payloads with an unkeyed digest: SHA-256 over the
/// base64-encoded payload (minus its own `sign` field) concatenated with the
/// merchant API key. The hex digest arrives either in the `sign` header or
/// embedded in the body, and is compared case-insensitively.
#[derive(Clone)]
pub struct CryptexApi {
    merchant_id: String,
    api_key: Option<String>,
    allow_unsigned: bool,
    url: String,
    client: reqwest::Client,
}

impl CryptexApi {
    pub fn new(
        merchant_id: String,
        api_key: Option<String>,
        allow_unsigned: bool,
        url: String,
    ) -> Self {
        Self {
            merchant_id,
            api_key,
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
        let Some(api_key) = configured(&self.api_key) else {
            bail!("Cryptex API key is not configured.");
        };

        let payload = json!({
            "amount": amount,
            "currency": currency,
            "order_id": order_id,
        });
        let Some(sign) = digest(&payload, api_key) else {
            bail!("Cryptex: could not sign request payload.");
        };

        let request = self
            .client
            .post(format!("{}/v1/payment", self.url))
            .header("merchant", &self.merchant_id)
            .header("sign", sign)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload);

        let response = send_with_retry(request).await?.error_for_status()?;
        let body: serde_json::Value = response.json().await?;

        let result = match body.get("result") {
            Some(result) => result,
            None => bail!("Cryptex: bad response format."),
        };
        let payment_id = match result.get("uuid").and_then(|v| v.as_str()) {
            Some(uuid) => uuid.to_string(),
            None => bail!("Cryptex: response is missing the payment uuid."),
        };
        let pay_address = result
            .get("address")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(GatewayInvoice {
            payment_id,
            pay_address,
        })
    }

    /// Authenticates an inbound webhook payload. The signature may arrive in
    /// the `sign` header or as a `sign` field inside the body; the field is
    /// excluded from the digested bytes either way. Total over untrusted
    /// input, returns false instead of failing.
    pub fn verify_signature(&self, payload: &serde_json::Value, signature: Option<&str>) -> bool {
        let Some(api_key) = configured(&self.api_key) else {
            if self.allow_unsigned {
                log::warn!("Cryptex API key not configured, accepting unsigned webhook.");
                return true;
            }
            return false;
        };

        let provided = signature
            .map(String::from)
            .or_else(|| {
                payload
                    .get("sign")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            });
        let Some(provided) = provided else {
            return false;
        };
        let Some(expected) = digest(payload, api_key) else {
            return false;
        };

        // hex::encode emits lowercase; fold the provided digest to match.
        let provided = provided.trim().to_ascii_lowercase();
        constant_time_eq(provided.as_bytes(), expected.as_bytes())
    }

    pub fn map_status(status: &str) -> PaymentStatus {
        match status {
            "paid" | "paid_over" => PaymentStatus::Confirmed,
            "confirm_check" | "wrong_amount" | "process" | "check" => PaymentStatus::Waiting,
            "fail" | "cancel" | "system_fail" | "refund_process" | "refund_fail"
            | "refund_paid" => PaymentStatus::Expired,
            other => {
                log::warn!("Cryptex sent unrecognized payment status: {}", other);
                PaymentStatus::Waiting
            }
        }
    }

    pub fn is_paid(status: &str) -> bool {
        matches!(status, "paid" | "paid_over")
    }
}

fn configured(api_key: &Option<String>) -> Option<&str> {
    match api_key.as_deref() {
        Some(key) if !key.is_empty() => Some(key),
        _ => None,
    }
}

fn digest(payload: &serde_json::Value, api_key: &str) -> Option<String> {
    let mut stripped = payload.clone();
    if let Some(object) = stripped.as_object_mut() {
        object.remove("sign");
    }

    let encoded = BASE64.encode(serde_json::to_string(&stripped).ok()?);
    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    hasher.update(api_key.as_bytes());

    Some(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(api_key: Option<&str>, allow_unsigned: bool) -> CryptexApi {
        CryptexApi::new(
            "merchant-1".to_string(),
            api_key.map(String::from),
            allow_unsigned,
            "http://localhost:9999".to_string(),
        )
    }

    #[test]
    fn accepts_digest_in_header() {
        let api = api(Some("api-key"), false);
        let payload = json!({"uuid": "dep-1", "status": "paid"});
        let sign = digest(&payload, "api-key").unwrap();

        assert!(api.verify_signature(&payload, Some(&sign)));
    }

    #[test]
    fn accepts_digest_embedded_in_body() {
        let api = api(Some("api-key"), false);
        let unsigned = json!({"uuid": "dep-1", "status": "paid"});
        let sign = digest(&unsigned, "api-key").unwrap();

        let mut signed = unsigned.clone();
        signed
            .as_object_mut()
            .unwrap()
            .insert("sign".to_string(), json!(sign));

        assert!(api.verify_signature(&signed, None));
    }

    #[test]
    fn sign_field_is_excluded_from_the_digested_bytes() {
        let with_sign = json!({"uuid": "dep-1", "status": "paid", "sign": "garbage"});
        let without = json!({"uuid": "dep-1", "status": "paid"});

        assert_eq!(
            digest(&with_sign, "api-key"),
            digest(&without, "api-key")
        );
    }

    #[test]
    fn digest_comparison_is_case_insensitive() {
        let api = api(Some("api-key"), false);
        let payload = json!({"uuid": "dep-1", "status": "paid"});
        let sign = digest(&payload, "api-key").unwrap().to_uppercase();

        assert!(api.verify_signature(&payload, Some(&sign)));
    }

    #[test]
    fn rejects_wrong_digest() {
        let api = api(Some("api-key"), false);
        let payload = json!({"uuid": "dep-1", "status": "paid"});
        let sign = digest(&payload, "other-key").unwrap();

        assert!(!api.verify_signature(&payload, Some(&sign)));
        assert!(!api.verify_signature(&payload, None));
        assert!(!api.verify_signature(&payload, Some("deadbeef")));
    }

    #[test]
    fn unsigned_webhooks_rejected_unless_explicitly_allowed() {
        let payload = json!({"uuid": "dep-1", "status": "paid"});

        assert!(!api(None, false).verify_signature(&payload, None));
        assert!(!api(Some(""), false).verify_signature(&payload, None));
        assert!(api(None, true).verify_signature(&payload, None));
    }

    #[test]
    fn maps_every_status() {
        assert_eq!(CryptexApi::map_status("paid"), PaymentStatus::Confirmed);
        assert_eq!(CryptexApi::map_status("paid_over"), PaymentStatus::Confirmed);
        assert_eq!(CryptexApi::map_status("confirm_check"), PaymentStatus::Waiting);
        assert_eq!(CryptexApi::map_status("wrong_amount"), PaymentStatus::Waiting);
        assert_eq!(CryptexApi::map_status("process"), PaymentStatus::Waiting);
        assert_eq!(CryptexApi::map_status("check"), PaymentStatus::Waiting);
        assert_eq!(CryptexApi::map_status("fail"), PaymentStatus::Expired);
        assert_eq!(CryptexApi::map_status("cancel"), PaymentStatus::Expired);
        assert_eq!(CryptexApi::map_status("system_fail"), PaymentStatus::Expired);
        assert_eq!(CryptexApi::map_status("refund_process"), PaymentStatus::Expired);
        assert_eq!(CryptexApi::map_status("refund_fail"), PaymentStatus::Expired);
        assert_eq!(CryptexApi::map_status("refund_paid"), PaymentStatus::Expired);
        assert_eq!(CryptexApi::map_status("brand_new_status"), PaymentStatus::Waiting);
    }

    #[test]
    fn paid_and_paid_over_count_as_paid() {
        assert!(CryptexApi::is_paid("paid"));
        assert!(CryptexApi::is_paid("paid_over"));
        assert!(!CryptexApi::is_paid("process"));
        assert!(!CryptexApi::is_paid("refund_paid"));
    }
}
