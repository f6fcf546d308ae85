use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::quota::{Authorization, DenialReason};
use crate::models::referrals::REFERRAL_TARGET;
use crate::repositories::accounts::AccountRepository;
use crate::repositories::settings::SettingsRepository;

pub enum QuotaRequest {
    /// Pre-flight check before a task is attempted. Does not debit.
    Authorize {
        user_id: i64,
        response: oneshot::Sender<Result<Authorization, ServiceError>>,
    },
    /// Debit of one unit once the task completed. Returns the remaining
    /// balance.
    CommitSpend {
        user_id: i64,
        response: oneshot::Sender<Result<i64, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct QuotaRequestHandler {
    accounts: AccountRepository,
    settings: SettingsRepository,
}

impl QuotaRequestHandler {
    pub fn new(sql_conn: SqlitePool) -> Self {
        QuotaRequestHandler {
            accounts: AccountRepository::new(sql_conn.clone()),
            settings: SettingsRepository::new(sql_conn),
        }
    }

    async fn authorize(&self, user_id: i64) -> Result<Authorization, ServiceError> {
        let Some(account) = self.accounts.get_account(user_id).await? else {
            return Ok(Authorization::Denied(DenialReason::NotStarted));
        };

        if account.requests_left <= 0 {
            let settings = self.settings.referral_settings().await?;
            return Ok(Authorization::Denied(DenialReason::Exhausted {
                referral_code: account.referral_code,
                target_count: REFERRAL_TARGET,
                bonus_requests: settings.bulk_referral_requests,
            }));
        }

        Ok(Authorization::Granted {
            requests_left: account.requests_left,
        })
    }

    async fn commit_spend(&self, user_id: i64) -> Result<i64, ServiceError> {
        match self.accounts.spend_one(user_id).await? {
            Some(requests_left) => Ok(requests_left),
            None => {
                let account = self
                    .accounts
                    .get_account(user_id)
                    .await?
                    .ok_or(ServiceError::AccountNotFound(user_id))?;
                // A concurrent spend drained the balance between the
                // authorization and this commit; the spend path never takes
                // the balance below zero.
                log::warn!(
                    "Spend for {} not recorded, balance already at {}.",
                    user_id,
                    account.requests_left
                );
                Ok(account.requests_left)
            }
        }
    }
}

#[async_trait]
impl RequestHandler<QuotaRequest> for QuotaRequestHandler {
    async fn handle_request(&self, request: QuotaRequest) {
        match request {
            QuotaRequest::Authorize { user_id, response } => {
                let authorization = self.authorize(user_id).await;
                let _ = response.send(authorization);
            }
            QuotaRequest::CommitSpend { user_id, response } => {
                let result = self.commit_spend(user_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct QuotaService;

impl QuotaService {
    pub fn new() -> Self {
        QuotaService {}
    }
}

#[async_trait]
impl Service<QuotaRequest, QuotaRequestHandler> for QuotaService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_pool;

    #[tokio::test]
    async fn missing_account_is_not_started() {
        let handler = QuotaRequestHandler::new(test_pool().await);

        let authorization = handler.authorize(100).await.unwrap();
        assert!(matches!(
            authorization,
            Authorization::Denied(DenialReason::NotStarted)
        ));
    }

    #[tokio::test]
    async fn exhausted_denial_carries_remediation() {
        let pool = test_pool().await;
        let handler = QuotaRequestHandler::new(pool.clone());
        let account = handler
            .accounts
            .create_account(100, "alice", None, 0)
            .await
            .unwrap();

        match handler.authorize(100).await.unwrap() {
            Authorization::Denied(DenialReason::Exhausted {
                referral_code,
                target_count,
                bonus_requests,
            }) => {
                assert_eq!(referral_code, account.referral_code);
                assert_eq!(target_count, REFERRAL_TARGET);
                assert_eq!(bonus_requests, 100);
            }
            other => panic!("expected exhausted denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn spend_debits_exactly_one_unit() {
        let pool = test_pool().await;
        let handler = QuotaRequestHandler::new(pool);
        handler
            .accounts
            .create_account(100, "alice", None, 3)
            .await
            .unwrap();

        match handler.authorize(100).await.unwrap() {
            Authorization::Granted { requests_left } => assert_eq!(requests_left, 3),
            other => panic!("expected grant, got {:?}", other),
        }
        assert_eq!(handler.commit_spend(100).await.unwrap(), 2);

        // Draining the balance flips authorization to denied without going
        // below zero.
        handler.commit_spend(100).await.unwrap();
        handler.commit_spend(100).await.unwrap();
        assert_eq!(handler.commit_spend(100).await.unwrap(), 0);
        assert!(matches!(
            handler.authorize(100).await.unwrap(),
            Authorization::Denied(DenialReason::Exhausted { .. })
        ));
    }
}
