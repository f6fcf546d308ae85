use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};

use super::notifier::NotifierRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::models::accounts::{Account, Arrival, ArrivalOutcome};
use crate::models::referrals::REFERRAL_TARGET;
use crate::repositories::accounts::AccountRepository;
use crate::repositories::gateway::GatewayClient;
use crate::repositories::settings::SettingsRepository;
use crate::repositories::LedgerError;

pub enum AccountRequest {
    RegisterArrival {
        user_id: i64,
        display_name: String,
        referral_payload: Option<String>,
        response: oneshot::Sender<Result<Arrival, ServiceError>>,
    },
    GetAccount {
        user_id: i64,
        response: oneshot::Sender<Result<Option<Account>, ServiceError>>,
    },
    SetSubscribed {
        user_id: i64,
        subscribed: bool,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    ToggleNotifications {
        user_id: i64,
        response: oneshot::Sender<Result<bool, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct AccountRequestHandler {
    accounts: AccountRepository,
    settings: SettingsRepository,
    gateway: GatewayClient,
    notifier: mpsc::Sender<NotifierRequest>,
    channel_id: Option<i64>,
    initial_quota: i64,
}

impl AccountRequestHandler {
    pub fn new(
        sql_conn: SqlitePool,
        gateway: GatewayClient,
        notifier: mpsc::Sender<NotifierRequest>,
        channel_id: Option<i64>,
        initial_quota: i64,
    ) -> Self {
        AccountRequestHandler {
            accounts: AccountRepository::new(sql_conn.clone()),
            settings: SettingsRepository::new(sql_conn),
            gateway,
            notifier,
            channel_id,
            initial_quota,
        }
    }

    /// First-contact handling: attribute the arrival to a referrer when a
    /// valid foreign code was presented, award bonuses, or fall back to a
    /// plain create / returning-user refresh.
    async fn register_arrival(
        &self,
        user_id: i64,
        display_name: String,
        referral_payload: Option<String>,
    ) -> Result<Arrival, ServiceError> {
        let mut self_referral = false;
        let mut referred_by = None;

        if let Some(code) = referral_payload {
            match self.accounts.resolve_referral_code(&code).await? {
                Some(id) if id == user_id => self_referral = true,
                Some(id) => referred_by = Some(id),
                None => {}
            }
        }

        if self.accounts.get_account(user_id).await?.is_some() {
            return self.returning_arrival(user_id, &display_name, self_referral).await;
        }

        let account = match self
            .accounts
            .create_account(user_id, &display_name, referred_by, self.initial_quota)
            .await
        {
            Ok(account) => account,
            // Another arrival for the same identity slipped in between the
            // lookup and the insert.
            Err(LedgerError::DuplicateAccount(_)) => {
                return self.returning_arrival(user_id, &display_name, self_referral).await;
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = if self_referral {
            ArrivalOutcome::SelfReferralRejected
        } else if referred_by.is_some() {
            ArrivalOutcome::CreatedWithReferrer
        } else {
            ArrivalOutcome::Created
        };

        if let Some(referrer_id) = referred_by {
            self.credit_referrer(referrer_id, &display_name).await?;
        }

        let account = self.refresh_subscription(account).await?;

        Ok(Arrival { account, outcome })
    }

    async fn returning_arrival(
        &self,
        user_id: i64,
        display_name: &str,
        self_referral: bool,
    ) -> Result<Arrival, ServiceError> {
        self.accounts.update_display_name(user_id, display_name).await?;

        let account = self
            .accounts
            .get_account(user_id)
            .await?
            .ok_or(ServiceError::AccountNotFound(user_id))?;
        let account = self.refresh_subscription(account).await?;

        // The self-referral notice survives the returning path: presenting
        // your own code is only possible once the account exists.
        let outcome = if self_referral {
            ArrivalOutcome::SelfReferralRejected
        } else {
            ArrivalOutcome::Returning
        };

        Ok(Arrival { account, outcome })
    }

    async fn credit_referrer(
        &self,
        referrer_id: i64,
        new_user_name: &str,
    ) -> Result<(), ServiceError> {
        let settings = self.settings.referral_settings().await?;
        let credit = self
            .accounts
            .credit_referral(
                referrer_id,
                settings.referral_requests,
                settings.bulk_referral_requests,
            )
            .await?;

        let invited = if credit.bulk_awarded {
            REFERRAL_TARGET
        } else {
            credit.invited_friends_count
        };
        let text = format!(
            "New referral: {}! Invited: {}/{}\n+{} requests. Balance: {}",
            new_user_name,
            invited,
            REFERRAL_TARGET,
            settings.referral_requests,
            credit.requests_left
        );
        if self
            .notifier
            .send(NotifierRequest::Notify {
                user_id: referrer_id,
                text,
            })
            .await
            .is_err()
        {
            log::warn!("Notifier channel closed, referral notification dropped.");
        }

        if credit.bulk_awarded {
            let text = format!(
                "Bonus for {} referrals! +{} requests. Balance: {}",
                REFERRAL_TARGET, settings.bulk_referral_requests, credit.requests_left
            );
            let _ = self
                .notifier
                .send(NotifierRequest::Notify {
                    user_id: referrer_id,
                    text,
                })
                .await;
        }

        Ok(())
    }

    /// Re-checks channel membership through the gateway and persists the
    /// flag when it changed. A failed check counts as not subscribed.
    async fn refresh_subscription(&self, mut account: Account) -> Result<Account, ServiceError> {
        let Some(channel_id) = self.channel_id else {
            return Ok(account);
        };

        let subscribed = match self
            .gateway
            .is_channel_member(channel_id, account.user_id)
            .await
        {
            Ok(subscribed) => subscribed,
            Err(e) => {
                log::error!("Subscription check for {} failed: {}", account.user_id, e);
                false
            }
        };

        if subscribed != account.subscribed_to_channel {
            self.accounts.set_subscribed(account.user_id, subscribed).await?;
            account.subscribed_to_channel = subscribed;
        }

        Ok(account)
    }

    async fn get_account(&self, user_id: i64) -> Result<Option<Account>, ServiceError> {
        self.accounts.get_account(user_id).await.map_err(Into::into)
    }

    async fn set_subscribed(&self, user_id: i64, subscribed: bool) -> Result<(), ServiceError> {
        self.accounts
            .set_subscribed(user_id, subscribed)
            .await
            .map_err(Into::into)
    }

    async fn toggle_notifications(&self, user_id: i64) -> Result<bool, ServiceError> {
        self.accounts
            .toggle_notifications(user_id)
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl RequestHandler<AccountRequest> for AccountRequestHandler {
    async fn handle_request(&self, request: AccountRequest) {
        match request {
            AccountRequest::RegisterArrival {
                user_id,
                display_name,
                referral_payload,
                response,
            } => {
                let arrival = self
                    .register_arrival(user_id, display_name, referral_payload)
                    .await;
                let _ = response.send(arrival);
            }
            AccountRequest::GetAccount { user_id, response } => {
                let account = self.get_account(user_id).await;
                let _ = response.send(account);
            }
            AccountRequest::SetSubscribed {
                user_id,
                subscribed,
                response,
            } => {
                let result = self.set_subscribed(user_id, subscribed).await;
                let _ = response.send(result);
            }
            AccountRequest::ToggleNotifications { user_id, response } => {
                let result = self.toggle_notifications(user_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct AccountService;

impl AccountService {
    pub fn new() -> Self {
        AccountService {}
    }
}

#[async_trait]
impl Service<AccountRequest, AccountRequestHandler> for AccountService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_pool;

    async fn handler() -> (AccountRequestHandler, mpsc::Receiver<NotifierRequest>) {
        let pool = test_pool().await;
        let (notifier_tx, notifier_rx) = mpsc::channel(32);
        let gateway = GatewayClient::new("http://127.0.0.1:1".to_string(), "token".to_string());
        let handler = AccountRequestHandler::new(pool, gateway, notifier_tx, None, 5);

        (handler, notifier_rx)
    }

    #[tokio::test]
    async fn attribution_links_and_credits_referrer() {
        let (handler, mut notifier_rx) = handler().await;
        let referrer = handler
            .register_arrival(100, "alice".to_string(), None)
            .await
            .unwrap();

        let arrival = handler
            .register_arrival(
                200,
                "bob".to_string(),
                Some(referrer.account.referral_code.clone()),
            )
            .await
            .unwrap();
        assert_eq!(arrival.outcome, ArrivalOutcome::CreatedWithReferrer);
        assert_eq!(arrival.account.referred_by, Some(100));

        let referrer = handler.get_account(100).await.unwrap().unwrap();
        assert_eq!(referrer.invited_friends_count, 1);
        assert_eq!(referrer.requests_left, 15);

        match notifier_rx.recv().await.unwrap() {
            NotifierRequest::Notify { user_id, text } => {
                assert_eq!(user_id, 100);
                assert!(text.contains("+10 requests"));
                assert!(text.contains("Balance: 15"));
            }
            _ => panic!("expected a referral notification"),
        }
    }

    #[tokio::test]
    async fn self_referral_is_rejected_without_credit() {
        let (handler, _notifier_rx) = handler().await;
        let first = handler
            .register_arrival(100, "alice".to_string(), None)
            .await
            .unwrap();

        let arrival = handler
            .register_arrival(
                100,
                "alice".to_string(),
                Some(first.account.referral_code.clone()),
            )
            .await
            .unwrap();
        assert_eq!(arrival.outcome, ArrivalOutcome::SelfReferralRejected);

        let account = handler.get_account(100).await.unwrap().unwrap();
        assert_eq!(account.invited_friends_count, 0);
        assert_eq!(account.requests_left, 5);
        assert_eq!(account.referred_by, None);
    }

    #[tokio::test]
    async fn unknown_code_creates_unreferred_account() {
        let (handler, _notifier_rx) = handler().await;

        let arrival = handler
            .register_arrival(100, "alice".to_string(), Some("nosuch00".to_string()))
            .await
            .unwrap();

        assert_eq!(arrival.outcome, ArrivalOutcome::Created);
        assert_eq!(arrival.account.referred_by, None);
    }

    #[tokio::test]
    async fn returning_arrival_refreshes_name_without_credit() {
        let (handler, _notifier_rx) = handler().await;
        let referrer = handler
            .register_arrival(100, "alice".to_string(), None)
            .await
            .unwrap();
        handler
            .register_arrival(
                200,
                "bob".to_string(),
                Some(referrer.account.referral_code.clone()),
            )
            .await
            .unwrap();

        let again = handler
            .register_arrival(
                200,
                "bobby".to_string(),
                Some(referrer.account.referral_code.clone()),
            )
            .await
            .unwrap();
        assert_eq!(again.outcome, ArrivalOutcome::Returning);
        assert_eq!(again.account.display_name, "bobby");

        let referrer = handler.get_account(100).await.unwrap().unwrap();
        assert_eq!(referrer.invited_friends_count, 1);
        assert_eq!(referrer.requests_left, 15);
    }

    #[tokio::test]
    async fn fifth_referral_awards_bulk_bonus() {
        let (handler, mut notifier_rx) = handler().await;
        let referrer = handler
            .register_arrival(100, "alice".to_string(), None)
            .await
            .unwrap();

        for new_id in 201..=205 {
            handler
                .register_arrival(
                    new_id,
                    format!("friend-{}", new_id),
                    Some(referrer.account.referral_code.clone()),
                )
                .await
                .unwrap();
        }

        let referrer = handler.get_account(100).await.unwrap().unwrap();
        assert_eq!(referrer.invited_friends_count, 0);
        assert_eq!(referrer.requests_left, 5 + 5 * 10 + 100);

        let mut notifications = Vec::new();
        while let Ok(request) = notifier_rx.try_recv() {
            if let NotifierRequest::Notify { text, .. } = request {
                notifications.push(text);
            }
        }
        assert_eq!(notifications.len(), 6);
        assert!(notifications.last().unwrap().contains("Bonus for 5 referrals"));
    }

    #[tokio::test]
    async fn notifications_toggle_flips_flag() {
        let (handler, _notifier_rx) = handler().await;
        handler
            .register_arrival(100, "alice".to_string(), None)
            .await
            .unwrap();

        assert!(!handler.toggle_notifications(100).await.unwrap());
        assert!(handler.toggle_notifications(100).await.unwrap());

        let missing = handler.toggle_notifications(999).await;
        assert!(matches!(missing, Err(ServiceError::AccountNotFound(999))));
    }
}
