use serde::Serialize;

/// Referrals needed before the bulk bonus fires.
pub const REFERRAL_TARGET: i64 = 5;

#[derive(Clone, Debug, Serialize)]
pub struct ReferralSettings {
    pub referral_requests: i64,
    pub bulk_referral_requests: i64,
}

impl Default for ReferralSettings {
    fn default() -> Self {
        ReferralSettings {
            referral_requests: 10,
            bulk_referral_requests: 100,
        }
    }
}

/// Post-state of a referrer after one attribution was credited.
#[derive(Clone, Copy, Debug)]
pub struct ReferralCredit {
    pub invited_friends_count: i64,
    pub requests_left: i64,
    pub bulk_awarded: bool,
}
