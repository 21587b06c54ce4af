use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tokio::sync::oneshot;

use super::ServiceError;
use super::RequestHandler;
use super::Service;

use crate::gateways;
use crate::gateways::cryptex::CryptexApi;
use crate::gateways::nowpay::NowPayApi;
use crate::models::deposits::{Deposit, GatewayProvider, PaymentStatus};
use crate::repositories::deposits::DepositRepository;
use crate::settings::Settings;

pub enum DepositServiceRequest {
    NewDeposit {
        user_id: String,
        amount: Decimal,
        currency: String,
        provider: GatewayProvider,
        response: oneshot::Sender<Result<Deposit, ServiceError>>,
    },
    GatewayWebhook {
        provider: GatewayProvider,
        payload: serde_json::Value,
        signature: Option<String>,
        response: oneshot::Sender<Result<WebhookOutcome, ServiceError>>,
    },
}

/// How a webhook delivery was resolved. Everything except the last two
/// variants acknowledges the delivery so the gateway stops retrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed { credited: bool },
    UnknownPayment,
    AlreadyExpired,
    InvalidSignature,
    MalformedPayload,
}

/// The fields the reconciler needs out of a gateway notification, with the
/// raw status already run through the gateway's own mapping.
struct GatewayNotification {
    payment_id: String,
    raw_status: String,
    paid: bool,
    mapped_status: PaymentStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReconcileAction {
    /// Expiry is terminal and wins any race against a late webhook.
    IgnoreExpired,
    /// Redelivery for an already-confirmed deposit; nothing left to apply.
    IgnoreConfirmed,
    SetStatus(PaymentStatus),
    ConfirmAndCredit,
}

/// Crediting is gated on the raw gateway status reporting the payment as
/// settled, never on the mapped status alone.
fn plan_reconciliation(
    stored: PaymentStatus,
    paid: bool,
    mapped: PaymentStatus,
) -> ReconcileAction {
    match stored {
        PaymentStatus::Expired => ReconcileAction::IgnoreExpired,
        PaymentStatus::Confirmed => ReconcileAction::IgnoreConfirmed,
        PaymentStatus::Waiting if paid => ReconcileAction::ConfirmAndCredit,
        PaymentStatus::Waiting => ReconcileAction::SetStatus(mapped),
    }
}

fn extract_notification(
    provider: GatewayProvider,
    payload: &serde_json::Value,
) -> Option<GatewayNotification> {
    match provider {
        GatewayProvider::Nowpay => {
            let payment_id = gateways::id_field(payload.get("payment_id")?)?;
            let raw_status = payload.get("payment_status")?.as_str()?.to_string();

            Some(GatewayNotification {
                payment_id,
                paid: NowPayApi::is_paid(&raw_status),
                mapped_status: NowPayApi::map_status(&raw_status),
                raw_status,
            })
        }
        GatewayProvider::Cryptex => {
            let payment_id = payload.get("uuid")?.as_str()?.to_string();
            let raw_status = payload.get("status")?.as_str()?.to_string();

            Some(GatewayNotification {
                payment_id,
                paid: CryptexApi::is_paid(&raw_status),
                mapped_status: CryptexApi::map_status(&raw_status),
                raw_status,
            })
        }
    }
}

#[derive(Clone)]
pub struct DepositRequestHandler {
    repository: Arc<DepositRepository>,
    nowpay_api: NowPayApi,
    cryptex_api: CryptexApi,
}

impl DepositRequestHandler {
    pub fn new(settings: &Settings, pool: PgPool) -> Self {
        let nowpay_api = NowPayApi::new(
            settings.nowpay.api_key.clone(),
            settings.nowpay.ipn_secret.clone(),
            settings.nowpay.allow_unsigned,
            settings.nowpay.url.clone(),
        );
        let cryptex_api = CryptexApi::new(
            settings.cryptex.merchant_id.clone(),
            settings.cryptex.api_key.clone(),
            settings.cryptex.allow_unsigned,
            settings.cryptex.url.clone(),
        );
        let repository = Arc::new(DepositRepository::new(
            nowpay_api.clone(),
            cryptex_api.clone(),
            settings.deposits.ttl_secs,
            settings.deposits.sweep_interval_secs,
            pool,
        ));

        DepositRequestHandler {
            repository,
            nowpay_api,
            cryptex_api,
        }
    }

    pub async fn start_expiry_sweep_task(&self) {
        self.repository.start_expiry_sweep_task().await
    }

    async fn new_deposit(
        &self,
        user_id: &str,
        amount: Decimal,
        currency: &str,
        provider: GatewayProvider,
    ) -> Result<Deposit, ServiceError> {
        self.repository
            .new_deposit(user_id, amount, currency, provider)
            .await
            .map_err(|e| ServiceError::Repository("Deposits".to_string(), e.to_string()))
    }

    /// Applies one gateway notification: authenticate, translate, persist,
    /// and credit at most once. Signature checks run before any lookup so a
    /// rejection reveals nothing about which payment ids exist.
    async fn process_webhook(
        &self,
        provider: GatewayProvider,
        payload: serde_json::Value,
        signature: Option<String>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let verified = match provider {
            GatewayProvider::Nowpay => self
                .nowpay_api
                .verify_signature(&payload, signature.as_deref()),
            GatewayProvider::Cryptex => self
                .cryptex_api
                .verify_signature(&payload, signature.as_deref()),
        };

        if !verified {
            log::warn!("Rejected {} webhook with a bad or missing signature.", provider);
            return Ok(WebhookOutcome::InvalidSignature);
        }

        let Some(notification) = extract_notification(provider, &payload) else {
            log::warn!("Received malformed {} webhook payload.", provider);
            return Ok(WebhookOutcome::MalformedPayload);
        };

        let deposit = self
            .repository
            .get_deposit_by_payment_id(&notification.payment_id)
            .await
            .map_err(|e| ServiceError::Repository("Deposits".to_string(), e.to_string()))?;

        let Some(deposit) = deposit else {
            log::info!(
                "Ignoring {} webhook for unknown payment {}.",
                provider,
                notification.payment_id
            );
            return Ok(WebhookOutcome::UnknownPayment);
        };

        match plan_reconciliation(
            deposit.payment_status,
            notification.paid,
            notification.mapped_status,
        ) {
            ReconcileAction::IgnoreExpired => {
                log::info!(
                    "Ignoring {} status '{}' for expired payment {}.",
                    provider,
                    notification.raw_status,
                    notification.payment_id
                );
                Ok(WebhookOutcome::AlreadyExpired)
            }
            ReconcileAction::IgnoreConfirmed => {
                Ok(WebhookOutcome::Processed { credited: false })
            }
            ReconcileAction::SetStatus(status) => {
                self.repository
                    .update_deposit_status(&notification.payment_id, status)
                    .await
                    .map_err(|e| {
                        ServiceError::Repository("Deposits".to_string(), e.to_string())
                    })?;

                Ok(WebhookOutcome::Processed { credited: false })
            }
            ReconcileAction::ConfirmAndCredit => {
                let credited = self
                    .repository
                    .confirm_and_credit(&notification.payment_id)
                    .await
                    .map_err(|e| {
                        ServiceError::Repository("Deposits".to_string(), e.to_string())
                    })?;

                if credited {
                    log::info!(
                        "Credited {} {} to user {} for payment {}.",
                        deposit.amount,
                        deposit.currency,
                        deposit.user_id,
                        notification.payment_id
                    );
                }

                Ok(WebhookOutcome::Processed { credited })
            }
        }
    }
}

#[async_trait]
impl RequestHandler<DepositServiceRequest> for DepositRequestHandler {
    async fn handle_request(&self, request: DepositServiceRequest) {
        match request {
            DepositServiceRequest::NewDeposit {
                user_id,
                amount,
                currency,
                provider,
                response,
            } => {
                let deposit = self
                    .new_deposit(&user_id, amount, &currency, provider)
                    .await;
                let _ = response.send(deposit);
            }
            DepositServiceRequest::GatewayWebhook {
                provider,
                payload,
                signature,
                response,
            } => {
                let outcome = self.process_webhook(provider, payload, signature).await;
                let _ = response.send(outcome);
            }
        }
    }
}

pub struct DepositService;

impl DepositService {
    pub fn new() -> Self {
        DepositService {}
    }
}

#[async_trait]
impl Service<DepositServiceRequest, DepositRequestHandler> for DepositService {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expiry_wins_any_race_against_a_late_webhook() {
        assert_eq!(
            plan_reconciliation(PaymentStatus::Expired, true, PaymentStatus::Confirmed),
            ReconcileAction::IgnoreExpired
        );
        assert_eq!(
            plan_reconciliation(PaymentStatus::Expired, false, PaymentStatus::Waiting),
            ReconcileAction::IgnoreExpired
        );
    }

    #[test]
    fn redelivered_paid_notification_never_credits_twice() {
        // First delivery confirms and credits.
        assert_eq!(
            plan_reconciliation(PaymentStatus::Waiting, true, PaymentStatus::Confirmed),
            ReconcileAction::ConfirmAndCredit
        );

        // Every redelivery sees the stored confirmed status and does nothing.
        assert_eq!(
            plan_reconciliation(PaymentStatus::Confirmed, true, PaymentStatus::Confirmed),
            ReconcileAction::IgnoreConfirmed
        );
    }

    #[test]
    fn confirmed_deposits_do_not_regress_to_waiting() {
        assert_eq!(
            plan_reconciliation(PaymentStatus::Confirmed, false, PaymentStatus::Waiting),
            ReconcileAction::IgnoreConfirmed
        );
    }

    #[test]
    fn intermediate_statuses_are_persisted_without_crediting() {
        assert_eq!(
            plan_reconciliation(PaymentStatus::Waiting, false, PaymentStatus::Waiting),
            ReconcileAction::SetStatus(PaymentStatus::Waiting)
        );
        assert_eq!(
            plan_reconciliation(PaymentStatus::Waiting, false, PaymentStatus::Expired),
            ReconcileAction::SetStatus(PaymentStatus::Expired)
        );
    }

    #[test]
    fn extracts_nowpay_notification_with_numeric_payment_id() {
        let payload = json!({"payment_id": 4532907, "payment_status": "finished", "pay_amount": "25.0"});
        let notification = extract_notification(GatewayProvider::Nowpay, &payload).unwrap();

        assert_eq!(notification.payment_id, "4532907");
        assert_eq!(notification.raw_status, "finished");
        assert!(notification.paid);
        assert_eq!(notification.mapped_status, PaymentStatus::Confirmed);
    }

    #[test]
    fn nowpay_confirmed_is_not_yet_paid() {
        let payload = json!({"payment_id": "abc123", "payment_status": "confirmed"});
        let notification = extract_notification(GatewayProvider::Nowpay, &payload).unwrap();

        assert!(!notification.paid);
        assert_eq!(notification.mapped_status, PaymentStatus::Waiting);
    }

    #[test]
    fn extracts_cryptex_notification() {
        let payload = json!({"uuid": "dep-1", "status": "paid_over", "sign": "abcd"});
        let notification = extract_notification(GatewayProvider::Cryptex, &payload).unwrap();

        assert_eq!(notification.payment_id, "dep-1");
        assert!(notification.paid);
        assert_eq!(notification.mapped_status, PaymentStatus::Confirmed);
    }

    #[test]
    fn missing_fields_are_malformed() {
        assert!(extract_notification(
            GatewayProvider::Nowpay,
            &json!({"payment_status": "finished"})
        )
        .is_none());
        assert!(extract_notification(
            GatewayProvider::Nowpay,
            &json!({"payment_id": 1, "payment_status": 42})
        )
        .is_none());
        assert!(
            extract_notification(GatewayProvider::Cryptex, &json!({"status": "paid"})).is_none()
        );
        assert!(extract_notification(GatewayProvider::Cryptex, &json!("paid")).is_none());
    }
}
