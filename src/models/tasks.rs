use serde::Deserialize;

use crate::models::quota::DenialReason;

/// Task submission delivered by the chat gateway. Exactly one of `text`,
/// `photo_id` or `document` is expected to carry the task content.
#[derive(Clone, Debug, Deserialize)]
pub struct TaskSubmission {
    pub user_id: i64,
    pub text: Option<String>,
    pub photo_id: Option<String>,
    pub document: Option<DocumentRef>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DocumentRef {
    pub file_id: String,
    pub mime_type: String,
}

#[derive(Clone, Debug)]
pub enum TaskReply {
    Answer { text: String, requests_left: i64 },
    Denied(DenialReason),
    SubscriptionRequired,
    UnsupportedDocument,
    NoContent,
    Failed,
}
