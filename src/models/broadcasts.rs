use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct BroadcastReport {
    pub sent: u64,
    pub failed: u64,
}
