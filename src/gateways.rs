use std::time::Duration;

pub mod cryptex;
pub mod nowpay;

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Sends a gateway request, retrying transient transport failures and 5xx
/// responses with exponential backoff. Responses with 4xx statuses are
/// returned to the caller on the first attempt, never retried.
pub(crate) async fn send_with_retry(
    builder: reqwest::RequestBuilder,
) -> Result<reqwest::Response, anyhow::Error> {
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 1..=MAX_ATTEMPTS {
        let request = builder
            .try_clone()
            .ok_or_else(|| anyhow::anyhow!("Request is not retryable."))?;

        match request.send().await {
            Ok(response) if response.status().is_server_error() && attempt < MAX_ATTEMPTS => {
                log::warn!(
                    "Gateway returned {}, retrying ({}/{}).",
                    response.status(),
                    attempt,
                    MAX_ATTEMPTS
                );
            }
            Ok(response) => return Ok(response),
            Err(e) if (e.is_timeout() || e.is_connect()) && attempt < MAX_ATTEMPTS => {
                log::warn!(
                    "Gateway request failed: {}, retrying ({}/{}).",
                    e,
                    attempt,
                    MAX_ATTEMPTS
                );
            }
            Err(e) => return Err(e.into()),
        }

        tokio::time::sleep(backoff).await;
        backoff *= 2;
    }

    anyhow::bail!("Gateway request retries exhausted.")
}

/// Byte-wise comparison that does not short-circuit on the first mismatch.
pub(crate) fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }

    let mut diff = 0_u8;
    for (a, b) in left.iter().zip(right.iter()) {
        diff |= *a ^ *b;
    }
    diff == 0
}

/// Gateways send their payment identifier as either a JSON string or a bare
/// number, depending on endpoint.
pub(crate) fn id_field(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
