use sqlx::SqlitePool;

pub mod accounts;
pub mod completion;
pub mod extraction;
pub mod gateway;
pub mod settings;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(i64),
    #[error("Account already exists: {0}")]
    DuplicateAccount(i64),
    #[error("Referral code already taken: {0}")]
    DuplicateReferralCode(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub async fn init_schema(pool: &SqlitePool) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            user_id INTEGER PRIMARY KEY,
            display_name TEXT NOT NULL,
            referral_code TEXT NOT NULL UNIQUE,
            referred_by INTEGER,
            requests_left INTEGER NOT NULL DEFAULT 0,
            requests_at_start_of_day INTEGER NOT NULL DEFAULT 0,
            subscribed_to_channel BOOLEAN NOT NULL DEFAULT FALSE,
            notifications_enabled BOOLEAN NOT NULL DEFAULT TRUE,
            invited_friends_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS referral_settings (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT OR IGNORE INTO referral_settings (key, value)
        VALUES ('referral_requests', 10), ('bulk_referral_requests', 100)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduler_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_reset_date TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Could not open in-memory database.");

    init_schema(&pool).await.expect("Could not initialize schema.");

    pool
}
