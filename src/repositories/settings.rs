use chrono::NaiveDate;
use sqlx::SqlitePool;

use super::LedgerError;
use crate::models::referrals::ReferralSettings;

const RESET_DATE_FORMAT: &str = "%Y-%m-%d";

/// Global settings rows plus the daily-reset cursor. Both live in the
/// ledger database so a restart never replays or skips a day.
#[derive(Clone)]
pub struct SettingsRepository {
    conn: SqlitePool,
}

impl SettingsRepository {
    pub fn new(conn: SqlitePool) -> Self {
        Self { conn }
    }

    pub async fn referral_settings(&self) -> Result<ReferralSettings, LedgerError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT key, value FROM referral_settings
            WHERE key IN ('referral_requests', 'bulk_referral_requests')
            "#,
        )
        .fetch_all(&self.conn)
        .await?;

        let mut settings = ReferralSettings::default();
        for (key, value) in rows {
            match key.as_str() {
                "referral_requests" => settings.referral_requests = value,
                "bulk_referral_requests" => settings.bulk_referral_requests = value,
                _ => {}
            }
        }

        Ok(settings)
    }

    pub async fn update_referral_settings(
        &self,
        referral_requests: Option<i64>,
        bulk_referral_requests: Option<i64>,
    ) -> Result<ReferralSettings, LedgerError> {
        if let Some(value) = referral_requests {
            self.upsert("referral_requests", value).await?;
        }
        if let Some(value) = bulk_referral_requests {
            self.upsert("bulk_referral_requests", value).await?;
        }

        self.referral_settings().await
    }

    async fn upsert(&self, key: &str, value: i64) -> Result<(), LedgerError> {
        sqlx::query("INSERT OR REPLACE INTO referral_settings (key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(&self.conn)
            .await?;

        Ok(())
    }

    pub async fn last_reset_date(&self) -> Result<Option<NaiveDate>, LedgerError> {
        let stored = sqlx::query_scalar::<_, String>(
            "SELECT last_reset_date FROM scheduler_state WHERE id = 1",
        )
        .fetch_optional(&self.conn)
        .await?;

        match stored {
            Some(text) => match NaiveDate::parse_from_str(&text, RESET_DATE_FORMAT) {
                Ok(date) => Ok(Some(date)),
                Err(e) => {
                    log::error!("Unreadable reset cursor '{}': {}", text, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn record_reset_date(&self, date: NaiveDate) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO scheduler_state (id, last_reset_date) VALUES (1, ?1)
            ON CONFLICT(id) DO UPDATE SET last_reset_date = excluded.last_reset_date
            "#,
        )
        .bind(date.format(RESET_DATE_FORMAT).to_string())
        .execute(&self.conn)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_pool;

    #[tokio::test]
    async fn defaults_are_seeded_at_init() {
        let repo = SettingsRepository::new(test_pool().await);

        let settings = repo.referral_settings().await.unwrap();
        assert_eq!(settings.referral_requests, 10);
        assert_eq!(settings.bulk_referral_requests, 100);
    }

    #[tokio::test]
    async fn updates_persist_per_field() {
        let repo = SettingsRepository::new(test_pool().await);

        let settings = repo
            .update_referral_settings(Some(25), None)
            .await
            .unwrap();
        assert_eq!(settings.referral_requests, 25);
        assert_eq!(settings.bulk_referral_requests, 100);
    }

    #[tokio::test]
    async fn reset_cursor_round_trips() {
        let repo = SettingsRepository::new(test_pool().await);
        assert_eq!(repo.last_reset_date().await.unwrap(), None);

        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        repo.record_reset_date(date).await.unwrap();
        assert_eq!(repo.last_reset_date().await.unwrap(), Some(date));

        let next = date.succ_opt().unwrap();
        repo.record_reset_date(next).await.unwrap();
        assert_eq!(repo.last_reset_date().await.unwrap(), Some(next));
    }
}
