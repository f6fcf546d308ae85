pub mod accounts;
pub mod broadcasts;
pub mod quota;
pub mod referrals;
pub mod tasks;
