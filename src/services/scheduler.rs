use chrono::{FixedOffset, NaiveDate, Utc};
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use super::notifier::NotifierRequest;
use crate::repositories::accounts::AccountRepository;
use crate::repositories::settings::SettingsRepository;
use crate::repositories::LedgerError;

/// Recurring daily reconciliation of every account against the quota
/// baseline. The cursor (`last_reset_date`) lives in the ledger, so the
/// pass fires as soon as the scheduler observes a new calendar day in the
/// configured timezone, no matter when the process was last running.
pub struct DailyResetTask {
    accounts: AccountRepository,
    settings: SettingsRepository,
    notifier: mpsc::Sender<NotifierRequest>,
    baseline: i64,
    offset: FixedOffset,
}

impl DailyResetTask {
    pub fn new(
        sql_conn: SqlitePool,
        notifier: mpsc::Sender<NotifierRequest>,
        baseline: i64,
        utc_offset_hours: i32,
    ) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or_else(|| {
            log::warn!(
                "Reset offset {}h is out of range, falling back to UTC.",
                utc_offset_hours
            );
            FixedOffset::east_opt(0).expect("zero offset")
        });

        DailyResetTask {
            accounts: AccountRepository::new(sql_conn.clone()),
            settings: SettingsRepository::new(sql_conn),
            notifier,
            baseline,
            offset,
        }
    }

    pub fn start(self) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));

            loop {
                interval.tick().await;

                let today = self.today();
                if let Err(e) = self.tick(today).await {
                    log::error!("Daily reset pass for {} failed: {}", today, e);
                }
            }
        });

        log::info!("Daily reset task started");
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }

    /// Runs the pass at most once per calendar day.
    async fn tick(&self, today: NaiveDate) -> Result<(), LedgerError> {
        match self.settings.last_reset_date().await? {
            Some(last) if last >= today => Ok(()),
            _ => self.run_pass(today).await,
        }
    }

    /// Reconciles every account independently; a single account failure is
    /// logged and never aborts the rest. The cursor is advanced only after
    /// the full pass, and the per-account mutations are guarded, so a
    /// replayed pass is harmless.
    async fn run_pass(&self, today: NaiveDate) -> Result<(), LedgerError> {
        let ids = self.accounts.list_account_ids().await?;
        let mut replenished = 0usize;

        for user_id in &ids {
            match self.reconcile_account(*user_id).await {
                Ok(true) => replenished += 1,
                Ok(false) => {}
                Err(e) => log::error!("Daily reset for {} failed: {}", user_id, e),
            }
        }

        self.settings.record_reset_date(today).await?;
        log::info!(
            "Daily reset complete for {}: {} accounts, {} replenished.",
            today,
            ids.len(),
            replenished
        );

        Ok(())
    }

    async fn reconcile_account(&self, user_id: i64) -> Result<bool, LedgerError> {
        if self
            .accounts
            .replenish_if_consumed(user_id, self.baseline)
            .await?
        {
            let text = format!(
                "Daily bonus: balance replenished to {} requests!",
                self.baseline
            );
            if self
                .notifier
                .send(NotifierRequest::Notify { user_id, text })
                .await
                .is_err()
            {
                log::warn!("Notifier channel closed, replenishment notice dropped.");
            }
            return Ok(true);
        }

        self.accounts.carry_forward_baseline(user_id).await?;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::accounts::Account;
    use crate::repositories::test_pool;

    async fn task() -> (DailyResetTask, mpsc::Receiver<NotifierRequest>) {
        let pool = test_pool().await;
        let (notifier_tx, notifier_rx) = mpsc::channel(32);
        let task = DailyResetTask::new(pool, notifier_tx, 5, 3);

        (task, notifier_rx)
    }

    async fn fetch(task: &DailyResetTask, user_id: i64) -> Account {
        task.accounts.get_account(user_id).await.unwrap().unwrap()
    }

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, n).unwrap()
    }

    #[tokio::test]
    async fn consumed_accounts_are_replenished_and_notified() {
        let (task, mut notifier_rx) = task().await;
        task.accounts.create_account(100, "alice", None, 5).await.unwrap();
        task.accounts.spend_one(100).await.unwrap();
        task.accounts.spend_one(100).await.unwrap();

        task.run_pass(day(1)).await.unwrap();

        let account = fetch(&task, 100).await;
        assert_eq!(account.requests_left, 5);
        assert_eq!(account.requests_at_start_of_day, 5);

        match notifier_rx.recv().await.unwrap() {
            NotifierRequest::Notify { user_id, text } => {
                assert_eq!(user_id, 100);
                assert!(text.contains("replenished to 5"));
            }
            _ => panic!("expected a replenishment notification"),
        }
    }

    #[tokio::test]
    async fn untouched_balance_is_carried_forward_silently() {
        let (task, mut notifier_rx) = task().await;
        task.accounts.create_account(100, "alice", None, 5).await.unwrap();
        task.accounts.admin_adjust(100, 45).await.unwrap();

        task.run_pass(day(1)).await.unwrap();

        let account = fetch(&task, 100).await;
        assert_eq!(account.requests_left, 50);
        assert_eq!(account.requests_at_start_of_day, 50);
        assert!(notifier_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn negative_balances_are_replenished() {
        let (task, _notifier_rx) = task().await;
        task.accounts.create_account(100, "alice", None, 5).await.unwrap();
        task.accounts.admin_adjust(100, -100).await.unwrap();

        task.run_pass(day(1)).await.unwrap();

        let account = fetch(&task, 100).await;
        assert_eq!(account.requests_left, 5);
        assert_eq!(account.requests_at_start_of_day, 5);
    }

    #[tokio::test]
    async fn pass_is_idempotent_within_a_day() {
        let (task, mut notifier_rx) = task().await;
        task.accounts.create_account(100, "spender", None, 5).await.unwrap();
        task.accounts.create_account(200, "saver", None, 5).await.unwrap();
        task.accounts.spend_one(100).await.unwrap();

        task.tick(day(1)).await.unwrap();
        while notifier_rx.try_recv().is_ok() {}

        // Same calendar day: the cursor suppresses a second pass.
        task.tick(day(1)).await.unwrap();

        let spender = fetch(&task, 100).await;
        let saver = fetch(&task, 200).await;
        assert_eq!(spender.requests_left, 5);
        assert_eq!(saver.requests_left, 5);
        assert!(notifier_rx.try_recv().is_err());

        // Even a forced replay changes nothing once accounts are reconciled.
        task.run_pass(day(1)).await.unwrap();
        let spender_again = fetch(&task, 100).await;
        assert_eq!(spender_again.requests_left, spender.requests_left);
        assert_eq!(
            spender_again.requests_at_start_of_day,
            spender.requests_at_start_of_day
        );
        assert!(notifier_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pass_fires_when_the_date_advances() {
        let (task, mut notifier_rx) = task().await;
        task.accounts.create_account(100, "alice", None, 5).await.unwrap();

        task.tick(day(1)).await.unwrap();
        task.accounts.spend_one(100).await.unwrap();

        // The trigger is date comparison, not a midnight minute window: any
        // tick on a later date runs the pass.
        task.tick(day(3)).await.unwrap();

        let account = fetch(&task, 100).await;
        assert_eq!(account.requests_left, 5);
        assert_eq!(
            task.settings.last_reset_date().await.unwrap(),
            Some(day(3))
        );
        assert!(matches!(
            notifier_rx.recv().await.unwrap(),
            NotifierRequest::Notify { user_id: 100, .. }
        ));
    }
}
