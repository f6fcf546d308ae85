use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::repositories::LedgerError;
use crate::settings::Settings;

mod accounts;
mod admin;
mod http;
mod notifier;
mod quota;
mod scheduler;
mod tasks;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Account not found: {0}")]
    AccountNotFound(i64),
    #[error("Unauthorized admin access: {0}")]
    Unauthorized(i64),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::AccountNotFound(user_id) => ServiceError::AccountNotFound(user_id),
            other => ServiceError::Database(other.to_string()),
        }
    }
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
    pool: SqlitePool,
    settings: Settings,
    listen: &str,
) -> Result<(), anyhow::Error> {
    let (accounts_tx, mut accounts_rx) = mpsc::channel(512);
    let (quota_tx, mut quota_rx) = mpsc::channel(512);
    let (tasks_tx, mut tasks_rx) = mpsc::channel(512);
    let (notifier_tx, mut notifier_rx) = mpsc::channel(512);
    let (admin_tx, mut admin_rx) = mpsc::channel(512);

    let mut account_service = accounts::AccountService::new();
    let mut quota_service = quota::QuotaService::new();
    let mut task_service = tasks::TaskService::new();
    let mut notifier_service = notifier::NotifierService::new();
    let mut admin_service = admin::AdminService::new();

    let gateway = crate::repositories::gateway::GatewayClient::new(
        settings.gateway.url.clone(),
        settings.gateway.api_token.clone(),
    );

    log::info!("Starting notifier service.");
    let notifier_pool = pool.clone();
    let notifier_gateway = gateway.clone();
    tokio::spawn(async move {
        notifier_service
            .run(
                notifier::NotifierRequestHandler::new(notifier_pool, notifier_gateway),
                &mut notifier_rx,
            )
            .await;
    });

    log::info!("Starting account service.");
    let account_pool = pool.clone();
    let account_gateway = gateway.clone();
    let account_notifier_tx = notifier_tx.clone();
    let channel_id = settings.gateway.channel_id;
    let initial_quota = settings.quota.initial_requests;
    tokio::spawn(async move {
        account_service
            .run(
                accounts::AccountRequestHandler::new(
                    account_pool,
                    account_gateway,
                    account_notifier_tx,
                    channel_id,
                    initial_quota,
                ),
                &mut accounts_rx,
            )
            .await;
    });

    log::info!("Starting quota service.");
    let quota_pool = pool.clone();
    tokio::spawn(async move {
        quota_service
            .run(quota::QuotaRequestHandler::new(quota_pool), &mut quota_rx)
            .await;
    });

    log::info!("Starting task service.");
    let task_accounts_tx = accounts_tx.clone();
    let task_quota_tx = quota_tx.clone();
    let task_gateway = gateway.clone();
    let extraction =
        crate::repositories::extraction::ExtractionClient::new(settings.extraction.url.clone());
    let completion = crate::repositories::completion::CompletionClient::new(
        settings.completion.url.clone(),
        settings.completion.api_token.clone(),
        settings.completion.model.clone(),
        settings.completion.system_prompt.clone(),
        settings.completion.timeout_secs,
    );
    tokio::spawn(async move {
        task_service
            .run(
                tasks::TaskRequestHandler::new(
                    task_accounts_tx,
                    task_quota_tx,
                    task_gateway,
                    extraction,
                    completion,
                    channel_id,
                ),
                &mut tasks_rx,
            )
            .await;
    });

    log::info!("Starting admin service.");
    let admin_pool = pool.clone();
    let admin_notifier_tx = notifier_tx.clone();
    let admin_ids = settings.admin.ids.clone();
    tokio::spawn(async move {
        admin_service
            .run(
                admin::AdminRequestHandler::new(admin_pool, admin_ids, admin_notifier_tx),
                &mut admin_rx,
            )
            .await;
    });

    log::info!("Starting daily reset task.");
    scheduler::DailyResetTask::new(
        pool.clone(),
        notifier_tx.clone(),
        settings.quota.daily_baseline,
        settings.quota.reset_utc_offset_hours,
    )
    .start();

    log::info!("Starting HTTP server.");
    http::start_http_server(listen, accounts_tx, tasks_tx, admin_tx).await?;

    Ok(())
}
