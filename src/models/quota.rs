#[derive(Clone, Debug)]
pub enum Authorization {
    Granted { requests_left: i64 },
    Denied(DenialReason),
}

#[derive(Clone, Debug)]
pub enum DenialReason {
    /// No account exists for the identity; the gateway should prompt a start.
    NotStarted,
    /// Balance is spent. Carries the data the gateway needs to render the
    /// referral-link remediation message.
    Exhausted {
        referral_code: String,
        target_count: i64,
        bonus_requests: i64,
    },
}
