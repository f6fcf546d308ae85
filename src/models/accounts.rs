use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Account {
    pub user_id: i64,
    pub display_name: String,
    pub referral_code: String,
    pub referred_by: Option<i64>,
    pub requests_left: i64,
    pub requests_at_start_of_day: i64,
    pub subscribed_to_channel: bool,
    pub notifications_enabled: bool,
    pub invited_friends_count: i64,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

/// First-contact event delivered by the chat gateway.
#[derive(Clone, Debug, Deserialize)]
pub struct NewArrival {
    pub user_id: i64,
    pub display_name: String,
    pub referral_payload: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Arrival {
    pub account: Account,
    pub outcome: ArrivalOutcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalOutcome {
    Created,
    CreatedWithReferrer,
    SelfReferralRejected,
    Returning,
}

#[derive(Clone, Debug, Serialize)]
pub struct LedgerStats {
    pub total_accounts: i64,
    pub subscribed_accounts: i64,
    pub accounts_with_quota: i64,
    pub referral_requests: i64,
    pub bulk_referral_requests: i64,
}
