use uuid::Uuid;

/// Short referral code handed out at account creation. Codes are not
/// guaranteed unique here; the accounts repository retries on collision.
pub fn generate_referral_code() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_short_and_distinct() {
        let first = generate_referral_code();
        let second = generate_referral_code();

        assert_eq!(first.len(), 8);
        assert_ne!(first, second);
    }
}
