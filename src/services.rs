use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::settings::Settings;

mod deposits;
mod http;
mod profiles;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Repository error: {0} - {1}")]
    Repository(String, String),
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

pub async fn start_services(
    pool: PgPool,
    settings: Settings,
    listen: String,
) -> Result<(), anyhow::Error> {
    let (deposit_tx, mut deposit_rx) = mpsc::channel(512);
    let (profile_tx, mut profile_rx) = mpsc::channel(512);

    let mut deposit_service = deposits::DepositService::new();
    let mut profile_service = profiles::ProfileService::new();

    println!("[*] Starting deposit service.");
    let deposit_pool_clone = pool.clone();
    tokio::spawn(async move {
        let handler = deposits::DepositRequestHandler::new(&settings, deposit_pool_clone);

        handler.start_expiry_sweep_task().await;
        deposit_service.run(handler, &mut deposit_rx).await;
    });

    println!("[*] Starting profile service.");
    let profile_pool_clone = pool.clone();
    tokio::spawn(async move {
        profile_service
            .run(
                profiles::ProfileRequestHandler::new(profile_pool_clone),
                &mut profile_rx,
            )
            .await;
    });

    println!("[*] Starting HTTP server.");
    http::start_http_server(deposit_tx, profile_tx, &listen).await?;

    Ok(())
}
