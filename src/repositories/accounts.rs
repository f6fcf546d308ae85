use futures_util::TryStreamExt;
use sqlx::SqlitePool;

use super::LedgerError;
use crate::models::accounts::Account;
use crate::models::referrals::{ReferralCredit, REFERRAL_TARGET};
use crate::utils;

/// Attempts before giving up on generating a free referral code.
const REFERRAL_CODE_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct AccountRepository {
    conn: SqlitePool,
}

impl AccountRepository {
    pub fn new(conn: SqlitePool) -> Self {
        Self { conn }
    }

    /// Creates the account exactly once per identity. The referral code is
    /// generated here and regenerated on collision; a `user_id` collision
    /// surfaces as `DuplicateAccount`.
    pub async fn create_account(
        &self,
        user_id: i64,
        display_name: &str,
        referred_by: Option<i64>,
        initial_quota: i64,
    ) -> Result<Account, LedgerError> {
        let mut last_code = String::new();

        for _ in 0..REFERRAL_CODE_ATTEMPTS {
            let code = utils::generate_referral_code();
            match self
                .insert_account(user_id, display_name, &code, referred_by, initial_quota)
                .await
            {
                Err(LedgerError::DuplicateReferralCode(code)) => last_code = code,
                other => return other,
            }
        }

        Err(LedgerError::DuplicateReferralCode(last_code))
    }

    async fn insert_account(
        &self,
        user_id: i64,
        display_name: &str,
        referral_code: &str,
        referred_by: Option<i64>,
        initial_quota: i64,
    ) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts
            (user_id, display_name, referral_code, referred_by, requests_left, requests_at_start_of_day)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(display_name)
        .bind(referral_code)
        .bind(referred_by)
        .bind(initial_quota)
        .fetch_one(&self.conn)
        .await
        .map_err(|e| classify_insert_error(e, user_id, referral_code))
    }

    pub async fn get_account(&self, user_id: i64) -> Result<Option<Account>, LedgerError> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(account)
    }

    pub async fn resolve_referral_code(&self, code: &str) -> Result<Option<i64>, LedgerError> {
        let user_id =
            sqlx::query_scalar::<_, i64>("SELECT user_id FROM accounts WHERE referral_code = ?1")
                .bind(code)
                .fetch_optional(&self.conn)
                .await?;

        Ok(user_id)
    }

    /// Full scan of the ledger, used by the daily reset pass and broadcasts.
    pub async fn list_account_ids(&self) -> Result<Vec<i64>, LedgerError> {
        let mut rows = sqlx::query_scalar::<_, i64>("SELECT user_id FROM accounts").fetch(&self.conn);

        let mut ids = Vec::new();
        while let Some(user_id) = rows.try_next().await? {
            ids.push(user_id);
        }

        Ok(ids)
    }

    pub async fn update_display_name(
        &self,
        user_id: i64,
        display_name: &str,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE accounts SET display_name = ?1, updated_at = CURRENT_TIMESTAMP WHERE user_id = ?2",
        )
        .bind(display_name)
        .bind(user_id)
        .execute(&self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::AccountNotFound(user_id));
        }

        Ok(())
    }

    pub async fn set_subscribed(&self, user_id: i64, subscribed: bool) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE accounts SET subscribed_to_channel = ?1, updated_at = CURRENT_TIMESTAMP WHERE user_id = ?2",
        )
        .bind(subscribed)
        .bind(user_id)
        .execute(&self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::AccountNotFound(user_id));
        }

        Ok(())
    }

    pub async fn toggle_notifications(&self, user_id: i64) -> Result<bool, LedgerError> {
        let enabled = sqlx::query_scalar::<_, bool>(
            r#"
            UPDATE accounts
            SET notifications_enabled = NOT notifications_enabled, updated_at = CURRENT_TIMESTAMP
            WHERE user_id = ?1
            RETURNING notifications_enabled
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.conn)
        .await?;

        enabled.ok_or(LedgerError::AccountNotFound(user_id))
    }

    /// Credits one attribution to the referrer in a single statement: the
    /// invited counter wraps at REFERRAL_TARGET and the bulk bonus lands in
    /// the same write as the single bonus, so concurrent attributions can
    /// never lose an increment or double-award the bulk.
    pub async fn credit_referral(
        &self,
        referrer_id: i64,
        referral_requests: i64,
        bulk_requests: i64,
    ) -> Result<ReferralCredit, LedgerError> {
        let row = sqlx::query_as::<_, (i64, i64)>(
            r#"
            UPDATE accounts
            SET requests_left = requests_left + ?1
                    + (CASE WHEN invited_friends_count + 1 >= ?3 THEN ?2 ELSE 0 END),
                invited_friends_count = (invited_friends_count + 1) % ?3,
                updated_at = CURRENT_TIMESTAMP
            WHERE user_id = ?4
            RETURNING invited_friends_count, requests_left
            "#,
        )
        .bind(referral_requests)
        .bind(bulk_requests)
        .bind(REFERRAL_TARGET)
        .bind(referrer_id)
        .fetch_optional(&self.conn)
        .await?
        .ok_or(LedgerError::AccountNotFound(referrer_id))?;

        Ok(ReferralCredit {
            invited_friends_count: row.0,
            requests_left: row.1,
            bulk_awarded: row.0 == 0,
        })
    }

    /// Debits one unit if and only if the balance is positive. Returns the
    /// remaining balance, or `None` when nothing was debited (missing
    /// account, or a concurrent spend drained the balance first).
    pub async fn spend_one(&self, user_id: i64) -> Result<Option<i64>, LedgerError> {
        let left = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE accounts
            SET requests_left = requests_left - 1, updated_at = CURRENT_TIMESTAMP
            WHERE user_id = ?1 AND requests_left > 0
            RETURNING requests_left
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(left)
    }

    /// Administrative adjust. Unbounded: a negative delta may drive the
    /// balance below zero.
    pub async fn admin_adjust(&self, user_id: i64, delta: i64) -> Result<Account, LedgerError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET requests_left = requests_left + ?1, updated_at = CURRENT_TIMESTAMP
            WHERE user_id = ?2
            RETURNING *
            "#,
        )
        .bind(delta)
        .bind(user_id)
        .fetch_optional(&self.conn)
        .await?;

        account.ok_or(LedgerError::AccountNotFound(user_id))
    }

    /// Daily reset, consumed branch: quota was spent since the last
    /// boundary, so both fields return to the baseline. The guard repeats
    /// the condition so a racing spend cannot replenish an untouched
    /// account. Returns whether the account was replenished.
    pub async fn replenish_if_consumed(
        &self,
        user_id: i64,
        baseline: i64,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET requests_left = ?1, requests_at_start_of_day = ?1, updated_at = CURRENT_TIMESTAMP
            WHERE user_id = ?2 AND requests_left < requests_at_start_of_day
            "#,
        )
        .bind(baseline)
        .bind(user_id)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Daily reset, untouched branch: the unused balance becomes the new
    /// baseline; the balance itself is not altered.
    pub async fn carry_forward_baseline(&self, user_id: i64) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET requests_at_start_of_day = requests_left, updated_at = CURRENT_TIMESTAMP
            WHERE user_id = ?1 AND requests_left >= requests_at_start_of_day
            "#,
        )
        .bind(user_id)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    pub async fn count_accounts(&self) -> Result<i64, LedgerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM accounts")
            .fetch_one(&self.conn)
            .await?;

        Ok(count)
    }

    pub async fn count_subscribed(&self) -> Result<i64, LedgerError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM accounts WHERE subscribed_to_channel")
                .fetch_one(&self.conn)
                .await?;

        Ok(count)
    }

    pub async fn count_with_quota(&self) -> Result<i64, LedgerError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM accounts WHERE requests_left > 0")
                .fetch_one(&self.conn)
                .await?;

        Ok(count)
    }
}

fn classify_insert_error(e: sqlx::Error, user_id: i64, referral_code: &str) -> LedgerError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            if db.message().contains("referral_code") {
                return LedgerError::DuplicateReferralCode(referral_code.to_string());
            }
            return LedgerError::DuplicateAccount(user_id);
        }
    }

    LedgerError::Database(e)
}
