use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::broadcasts::BroadcastReport;
use crate::repositories::accounts::AccountRepository;
use crate::repositories::gateway::GatewayClient;

/// Pause between broadcast deliveries so the gateway is not flooded.
const BROADCAST_THROTTLE_MS: u64 = 50;

pub enum NotifierRequest {
    /// Fire-and-forget balance-change notice. Honors the account's
    /// notifications flag; delivery failures are logged and swallowed.
    Notify { user_id: i64, text: String },
    /// Administrative fan-out to every account, notifications flag ignored.
    Broadcast {
        text: String,
        response: oneshot::Sender<Result<BroadcastReport, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct NotifierRequestHandler {
    accounts: AccountRepository,
    gateway: GatewayClient,
}

impl NotifierRequestHandler {
    pub fn new(sql_conn: SqlitePool, gateway: GatewayClient) -> Self {
        NotifierRequestHandler {
            accounts: AccountRepository::new(sql_conn),
            gateway,
        }
    }

    /// Returns whether a delivery was attempted and succeeded. `Ok(false)`
    /// means the account is missing or muted.
    async fn notify(&self, user_id: i64, text: &str) -> Result<bool, ServiceError> {
        let Some(account) = self.accounts.get_account(user_id).await? else {
            return Ok(false);
        };
        if !account.notifications_enabled {
            return Ok(false);
        }

        self.gateway
            .send_message(user_id, text)
            .await
            .map_err(|e| ServiceError::Communication("Notifier".to_string(), e.to_string()))?;

        Ok(true)
    }

    async fn broadcast(&self, text: &str) -> Result<BroadcastReport, ServiceError> {
        let ids = self.accounts.list_account_ids().await?;
        let mut report = BroadcastReport::default();

        for user_id in ids {
            match self.gateway.send_message(user_id, text).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    report.failed += 1;
                    log::error!("Broadcast to {} failed: {}", user_id, e);
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(BROADCAST_THROTTLE_MS)).await;
        }

        Ok(report)
    }
}

#[async_trait]
impl RequestHandler<NotifierRequest> for NotifierRequestHandler {
    async fn handle_request(&self, request: NotifierRequest) {
        match request {
            NotifierRequest::Notify { user_id, text } => {
                if let Err(e) = self.notify(user_id, &text).await {
                    log::warn!("Notification to {} failed: {}", user_id, e);
                }
            }
            NotifierRequest::Broadcast { text, response } => {
                let report = self.broadcast(&text).await;
                let _ = response.send(report);
            }
        }
    }
}

pub struct NotifierService;

impl NotifierService {
    pub fn new() -> Self {
        NotifierService {}
    }
}

#[async_trait]
impl Service<NotifierRequest, NotifierRequestHandler> for NotifierService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_pool;

    #[tokio::test]
    async fn muted_or_missing_accounts_are_skipped() {
        let pool = test_pool().await;
        let gateway = GatewayClient::new("http://127.0.0.1:1".to_string(), "token".to_string());
        let handler = NotifierRequestHandler::new(pool.clone(), gateway);

        // Missing account: nothing to deliver to.
        assert!(!handler.notify(100, "hello").await.unwrap());

        // Muted account: the flag short-circuits before any delivery.
        handler
            .accounts
            .create_account(100, "alice", None, 5)
            .await
            .unwrap();
        handler.accounts.toggle_notifications(100).await.unwrap();
        assert!(!handler.notify(100, "hello").await.unwrap());
    }
}
