use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};

use super::notifier::NotifierRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::models::accounts::{Account, LedgerStats};
use crate::models::broadcasts::BroadcastReport;
use crate::models::referrals::ReferralSettings;
use crate::repositories::accounts::AccountRepository;
use crate::repositories::settings::SettingsRepository;

pub enum AdminRequest {
    AdjustQuota {
        admin_id: i64,
        user_id: i64,
        delta: i64,
        response: oneshot::Sender<Result<i64, ServiceError>>,
    },
    UpdateReferralSettings {
        admin_id: i64,
        referral_requests: Option<i64>,
        bulk_referral_requests: Option<i64>,
        response: oneshot::Sender<Result<ReferralSettings, ServiceError>>,
    },
    AccountInfo {
        admin_id: i64,
        user_id: i64,
        response: oneshot::Sender<Result<Option<Account>, ServiceError>>,
    },
    Stats {
        admin_id: i64,
        response: oneshot::Sender<Result<LedgerStats, ServiceError>>,
    },
    Broadcast {
        admin_id: i64,
        text: String,
        response: oneshot::Sender<Result<BroadcastReport, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct AdminRequestHandler {
    accounts: AccountRepository,
    settings: SettingsRepository,
    admin_ids: HashSet<i64>,
    notifier: mpsc::Sender<NotifierRequest>,
}

impl AdminRequestHandler {
    pub fn new(
        sql_conn: SqlitePool,
        admin_ids: Vec<i64>,
        notifier: mpsc::Sender<NotifierRequest>,
    ) -> Self {
        AdminRequestHandler {
            accounts: AccountRepository::new(sql_conn.clone()),
            settings: SettingsRepository::new(sql_conn),
            admin_ids: admin_ids.into_iter().collect(),
            notifier,
        }
    }

    /// Capability check at the service boundary: every admin operation
    /// passes through here first.
    fn authorize(&self, admin_id: i64) -> Result<(), ServiceError> {
        if self.admin_ids.contains(&admin_id) {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized(admin_id))
        }
    }

    /// Unbounded adjust: a negative delta may drive the balance below
    /// zero. The target is notified with the post-adjustment balance
    /// unless notifications are muted.
    async fn adjust_quota(&self, user_id: i64, delta: i64) -> Result<i64, ServiceError> {
        let account = self.accounts.admin_adjust(user_id, delta).await?;

        let verb = if delta >= 0 { "credited" } else { "debited" };
        let text = format!(
            "An administrator {} {} requests. Balance: {}",
            verb,
            delta.abs(),
            account.requests_left
        );
        if self
            .notifier
            .send(NotifierRequest::Notify { user_id, text })
            .await
            .is_err()
        {
            log::warn!("Notifier channel closed, adjustment notice dropped.");
        }

        Ok(account.requests_left)
    }

    async fn update_referral_settings(
        &self,
        referral_requests: Option<i64>,
        bulk_referral_requests: Option<i64>,
    ) -> Result<ReferralSettings, ServiceError> {
        for value in [referral_requests, bulk_referral_requests].into_iter().flatten() {
            if value <= 0 {
                return Err(ServiceError::InvalidRequest(
                    "Referral bonuses must be positive.".to_string(),
                ));
            }
        }

        self.settings
            .update_referral_settings(referral_requests, bulk_referral_requests)
            .await
            .map_err(Into::into)
    }

    async fn account_info(&self, user_id: i64) -> Result<Option<Account>, ServiceError> {
        self.accounts.get_account(user_id).await.map_err(Into::into)
    }

    async fn stats(&self) -> Result<LedgerStats, ServiceError> {
        let total_accounts = self.accounts.count_accounts().await?;
        let subscribed_accounts = self.accounts.count_subscribed().await?;
        let accounts_with_quota = self.accounts.count_with_quota().await?;
        let settings = self.settings.referral_settings().await?;

        Ok(LedgerStats {
            total_accounts,
            subscribed_accounts,
            accounts_with_quota,
            referral_requests: settings.referral_requests,
            bulk_referral_requests: settings.bulk_referral_requests,
        })
    }

    async fn broadcast(&self, text: String) -> Result<BroadcastReport, ServiceError> {
        let (broadcast_tx, broadcast_rx) = oneshot::channel();

        self.notifier
            .send(NotifierRequest::Broadcast {
                text,
                response: broadcast_tx,
            })
            .await
            .map_err(|e| {
                ServiceError::Communication("Admin => Notifier".to_string(), e.to_string())
            })?;

        broadcast_rx.await.map_err(|e| {
            ServiceError::Communication("Notifier => Admin".to_string(), e.to_string())
        })?
    }
}

#[async_trait]
impl RequestHandler<AdminRequest> for AdminRequestHandler {
    async fn handle_request(&self, request: AdminRequest) {
        match request {
            AdminRequest::AdjustQuota {
                admin_id,
                user_id,
                delta,
                response,
            } => {
                let result = match self.authorize(admin_id) {
                    Ok(()) => self.adjust_quota(user_id, delta).await,
                    Err(e) => Err(e),
                };
                let _ = response.send(result);
            }
            AdminRequest::UpdateReferralSettings {
                admin_id,
                referral_requests,
                bulk_referral_requests,
                response,
            } => {
                let result = match self.authorize(admin_id) {
                    Ok(()) => {
                        self.update_referral_settings(referral_requests, bulk_referral_requests)
                            .await
                    }
                    Err(e) => Err(e),
                };
                let _ = response.send(result);
            }
            AdminRequest::AccountInfo {
                admin_id,
                user_id,
                response,
            } => {
                let result = match self.authorize(admin_id) {
                    Ok(()) => self.account_info(user_id).await,
                    Err(e) => Err(e),
                };
                let _ = response.send(result);
            }
            AdminRequest::Stats { admin_id, response } => {
                let result = match self.authorize(admin_id) {
                    Ok(()) => self.stats().await,
                    Err(e) => Err(e),
                };
                let _ = response.send(result);
            }
            AdminRequest::Broadcast {
                admin_id,
                text,
                response,
            } => {
                let result = match self.authorize(admin_id) {
                    Ok(()) => self.broadcast(text).await,
                    Err(e) => Err(e),
                };
                let _ = response.send(result);
            }
        }
    }
}

pub struct AdminService;

impl AdminService {
    pub fn new() -> Self {
        AdminService {}
    }
}

#[async_trait]
impl Service<AdminRequest, AdminRequestHandler> for AdminService {}
