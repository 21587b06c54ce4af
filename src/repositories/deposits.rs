use anyhow::bail;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::gateways::cryptex::CryptexApi;
use crate::gateways::nowpay::NowPayApi;
use crate::models::deposits::{Deposit, GatewayProvider, PaymentStatus};

#[derive(Clone)]
pub struct DepositRepository {
    nowpay_api: NowPayApi,
    cryptex_api: CryptexApi,
    ttl_secs: i64,
    sweep_interval_secs: u64,
    conn: PgPool,
}

impl DepositRepository {
    pub fn new(
        nowpay_api: NowPayApi,
        cryptex_api: CryptexApi,
        ttl_secs: i64,
        sweep_interval_secs: u64,
        conn: PgPool,
    ) -> Self {
        DepositRepository {
            nowpay_api,
            cryptex_api,
            ttl_secs,
            sweep_interval_secs,
            conn,
        }
    }

    /// Creates the payment at the gateway, then records the deposit as
    /// `waiting` with an expiry one TTL from now.
    pub async fn new_deposit(
        &self,
        user_id: &str,
        amount: Decimal,
        currency: &str,
        provider: GatewayProvider,
    ) -> Result<Deposit, anyhow::Error> {
        let deposit_id = Uuid::new_v4().hyphenated().to_string();

        let invoice = match provider {
            GatewayProvider::Nowpay => {
                self.nowpay_api
                    .create_payment(&deposit_id, amount, currency)
                    .await?
            }
            GatewayProvider::Cryptex => {
                self.cryptex_api
                    .create_payment(&deposit_id, amount, currency)
                    .await?
            }
        };

        let expires_at = Utc::now() + Duration::seconds(self.ttl_secs);

        let deposit = sqlx::query_as::<_, Deposit>(
            r#"
            INSERT INTO deposits
            (id, user_id, amount, currency, payment_id, payment_status, pay_address, expires_at)
            VALUES ($1, $2, $3, $4, $5, 'waiting', $6, $7)
            RETURNING *
            "#,
        )
        .bind(&deposit_id)
        .bind(user_id)
        .bind(amount)
        .bind(currency)
        .bind(&invoice.payment_id)
        .bind(&invoice.pay_address)
        .bind(expires_at)
        .fetch_one(&self.conn)
        .await?;

        Ok(deposit)
    }

    pub async fn get_deposit_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<Deposit>, anyhow::Error> {
        let deposit =
            sqlx::query_as::<_, Deposit>("SELECT * FROM deposits WHERE payment_id = $1")
                .bind(payment_id)
                .fetch_optional(&self.conn)
                .await?;

        Ok(deposit)
    }

    /// Only rows still `waiting` are updated; terminal states never regress.
    pub async fn update_deposit_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            UPDATE deposits SET payment_status = $1, updated_at = CURRENT_TIMESTAMP
            WHERE payment_id = $2 AND payment_status = 'waiting'
            "#,
        )
        .bind(status)
        .bind(payment_id)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    /// Confirms the deposit and credits its recorded amount to the owning
    /// profile in one transaction. The status swap only touches rows still
    /// `waiting`, so of any number of concurrent or redelivered "paid"
    /// notifications exactly one applies the credit. Returns whether this
    /// call was the one that did.
    pub async fn confirm_and_credit(&self, payment_id: &str) -> Result<bool, anyhow::Error> {
        let mut tx = self.conn.begin().await?;

        let confirmed = sqlx::query_as::<_, Deposit>(
            r#"
            UPDATE deposits SET payment_status = 'confirmed', updated_at = CURRENT_TIMESTAMP
            WHERE payment_id = $1 AND payment_status = 'waiting'
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(deposit) = confirmed else {
            tx.rollback().await?;
            return Ok(false);
        };

        let credited = sqlx::query(
            r#"
            UPDATE profiles SET balance = balance + $1, updated_at = CURRENT_TIMESTAMP
            WHERE user_id = $2
            "#,
        )
        .bind(deposit.amount)
        .bind(&deposit.user_id)
        .execute(&mut *tx)
        .await?;

        if credited.rows_affected() != 1 {
            bail!("No profile to credit for user {}.", deposit.user_id);
        }

        tx.commit().await?;

        Ok(true)
    }

    /// Bulk-expires `waiting` deposits past their expiry timestamp. Rows
    /// already terminal are untouched, so overlapping sweeps are no-ops
    /// against each other.
    pub async fn expire_overdue_deposits(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error> {
        let expired = sqlx::query(
            r#"
            UPDATE deposits SET payment_status = 'expired', updated_at = CURRENT_TIMESTAMP
            WHERE payment_status = 'waiting' AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.conn)
        .await?;

        Ok(expired.rows_affected())
    }

    pub async fn start_expiry_sweep_task(&self) {
        let repository = self.clone();
        let interval_secs = self.sweep_interval_secs;

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));

            loop {
                interval.tick().await;

                match repository.expire_overdue_deposits(Utc::now()).await {
                    Ok(0) => {}
                    Ok(count) => log::info!("Expired {} overdue deposits.", count),
                    Err(e) => log::error!("Error expiring overdue deposits: {}", e),
                }
            }
        });

        log::info!("Deposit expiry sweep task started");
    }
}
