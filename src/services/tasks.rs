use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::accounts::AccountRequest;
use super::quota::QuotaRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::models::accounts::Account;
use crate::models::quota::Authorization;
use crate::models::quota::DenialReason;
use crate::models::tasks::{TaskReply, TaskSubmission};
use crate::repositories::completion::CompletionClient;
use crate::repositories::extraction::ExtractionClient;
use crate::repositories::gateway::GatewayClient;

pub enum TaskRequest {
    Submit {
        submission: TaskSubmission,
        response: oneshot::Sender<Result<TaskReply, ServiceError>>,
    },
}

enum TaskInput {
    Prompt(String),
    Empty,
    Unsupported,
    ExtractionFailed,
}

#[derive(Clone)]
pub struct TaskRequestHandler {
    accounts_channel: mpsc::Sender<AccountRequest>,
    quota_channel: mpsc::Sender<QuotaRequest>,
    gateway: GatewayClient,
    extraction: ExtractionClient,
    completion: CompletionClient,
    channel_id: Option<i64>,
}

impl TaskRequestHandler {
    pub fn new(
        accounts_channel: mpsc::Sender<AccountRequest>,
        quota_channel: mpsc::Sender<QuotaRequest>,
        gateway: GatewayClient,
        extraction: ExtractionClient,
        completion: CompletionClient,
        channel_id: Option<i64>,
    ) -> Self {
        TaskRequestHandler {
            accounts_channel,
            quota_channel,
            gateway,
            extraction,
            completion,
            channel_id,
        }
    }

    /// Full task flow: account gate, subscription gate, quota gate, input
    /// assembly, completion call, then the debit. Upstream failures reply
    /// with a generic failure and never consume quota.
    async fn submit(&self, submission: TaskSubmission) -> Result<TaskReply, ServiceError> {
        let user_id = submission.user_id;

        let Some(account) = self.fetch_account(user_id).await? else {
            return Ok(TaskReply::Denied(DenialReason::NotStarted));
        };

        if !self.check_subscription(&account).await? {
            return Ok(TaskReply::SubscriptionRequired);
        }

        match self.authorize(user_id).await? {
            Authorization::Denied(reason) => return Ok(TaskReply::Denied(reason)),
            Authorization::Granted { .. } => {}
        }

        let prompt = match self.assemble_input(&submission).await {
            TaskInput::Prompt(prompt) => prompt,
            TaskInput::Empty => return Ok(TaskReply::NoContent),
            TaskInput::Unsupported => return Ok(TaskReply::UnsupportedDocument),
            TaskInput::ExtractionFailed => return Ok(TaskReply::Failed),
        };

        let answer = match self.completion.complete(&prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                log::error!("Completion request for {} failed: {}", user_id, e);
                return Ok(TaskReply::Failed);
            }
        };

        let requests_left = self.commit_spend(user_id).await?;

        Ok(TaskReply::Answer {
            text: answer,
            requests_left,
        })
    }

    /// The subscription flag is refreshed opportunistically: an
    /// unsubscribed account gets one live re-check through the gateway
    /// before the submission is turned away.
    async fn check_subscription(&self, account: &Account) -> Result<bool, ServiceError> {
        let Some(channel_id) = self.channel_id else {
            return Ok(true);
        };
        if account.subscribed_to_channel {
            return Ok(true);
        }

        match self
            .gateway
            .is_channel_member(channel_id, account.user_id)
            .await
        {
            Ok(true) => {
                self.set_subscribed(account.user_id, true).await?;
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                log::error!(
                    "Subscription check for {} failed: {}",
                    account.user_id,
                    e
                );
                Ok(false)
            }
        }
    }

    async fn assemble_input(&self, submission: &TaskSubmission) -> TaskInput {
        if let Some(text) = &submission.text {
            if text.trim().is_empty() {
                return TaskInput::Empty;
            }
            return TaskInput::Prompt(text.clone());
        }

        if let Some(photo_id) = &submission.photo_id {
            return match self.extraction.extract_image(photo_id).await {
                Ok(text) => TaskInput::Prompt(text),
                Err(e) => {
                    log::error!("Image extraction for {} failed: {}", submission.user_id, e);
                    TaskInput::ExtractionFailed
                }
            };
        }

        if let Some(document) = &submission.document {
            if document.mime_type != "application/pdf" {
                return TaskInput::Unsupported;
            }
            return match self.extraction.extract_pdf(&document.file_id).await {
                Ok(text) => TaskInput::Prompt(text),
                Err(e) => {
                    log::error!("PDF extraction for {} failed: {}", submission.user_id, e);
                    TaskInput::ExtractionFailed
                }
            };
        }

        TaskInput::Empty
    }

    async fn fetch_account(&self, user_id: i64) -> Result<Option<Account>, ServiceError> {
        let (account_tx, account_rx) = oneshot::channel();

        self.accounts_channel
            .send(AccountRequest::GetAccount {
                user_id,
                response: account_tx,
            })
            .await
            .map_err(|e| ServiceError::Communication("Task => Account".to_string(), e.to_string()))?;

        account_rx
            .await
            .map_err(|e| ServiceError::Communication("Account => Task".to_string(), e.to_string()))?
    }

    async fn set_subscribed(&self, user_id: i64, subscribed: bool) -> Result<(), ServiceError> {
        let (subscribed_tx, subscribed_rx) = oneshot::channel();

        self.accounts_channel
            .send(AccountRequest::SetSubscribed {
                user_id,
                subscribed,
                response: subscribed_tx,
            })
            .await
            .map_err(|e| ServiceError::Communication("Task => Account".to_string(), e.to_string()))?;

        subscribed_rx
            .await
            .map_err(|e| ServiceError::Communication("Account => Task".to_string(), e.to_string()))?
    }

    async fn authorize(&self, user_id: i64) -> Result<Authorization, ServiceError> {
        let (quota_tx, quota_rx) = oneshot::channel();

        self.quota_channel
            .send(QuotaRequest::Authorize {
                user_id,
                response: quota_tx,
            })
            .await
            .map_err(|e| ServiceError::Communication("Task => Quota".to_string(), e.to_string()))?;

        quota_rx
            .await
            .map_err(|e| ServiceError::Communication("Quota => Task".to_string(), e.to_string()))?
    }

    async fn commit_spend(&self, user_id: i64) -> Result<i64, ServiceError> {
        let (quota_tx, quota_rx) = oneshot::channel();

        self.quota_channel
            .send(QuotaRequest::CommitSpend {
                user_id,
                response: quota_tx,
            })
            .await
            .map_err(|e| ServiceError::Communication("Task => Quota".to_string(), e.to_string()))?;

        quota_rx
            .await
            .map_err(|e| ServiceError::Communication("Quota => Task".to_string(), e.to_string()))?
    }
}

#[async_trait]
impl RequestHandler<TaskRequest> for TaskRequestHandler {
    async fn handle_request(&self, request: TaskRequest) {
        match request {
            TaskRequest::Submit {
                submission,
                response,
            } => {
                let reply = self.submit(submission).await;
                let _ = response.send(reply);
            }
        }
    }
}

pub struct TaskService;

impl TaskService {
    pub fn new() -> Self {
        TaskService {}
    }
}

#[async_trait]
impl Service<TaskRequest, TaskRequestHandler> for TaskService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::accounts::AccountRepository;
    use crate::repositories::test_pool;
    use crate::services::{accounts, notifier::NotifierRequest, quota};
    use sqlx::SqlitePool;

    /// Wires real account and quota services over channels, the way
    /// `start_services` does, minus the network-facing pieces.
    async fn handler(pool: &SqlitePool) -> TaskRequestHandler {
        let (accounts_tx, mut accounts_rx) = mpsc::channel(32);
        let (quota_tx, mut quota_rx) = mpsc::channel(32);
        let (notifier_tx, _notifier_rx) = mpsc::channel::<NotifierRequest>(32);

        let gateway = GatewayClient::new("http://127.0.0.1:1".to_string(), "token".to_string());

        let account_handler = accounts::AccountRequestHandler::new(
            pool.clone(),
            gateway.clone(),
            notifier_tx,
            None,
            5,
        );
        tokio::spawn(async move {
            let mut service = accounts::AccountService::new();
            service.run(account_handler, &mut accounts_rx).await;
        });

        let quota_handler = quota::QuotaRequestHandler::new(pool.clone());
        tokio::spawn(async move {
            let mut service = quota::QuotaService::new();
            service.run(quota_handler, &mut quota_rx).await;
        });

        TaskRequestHandler::new(
            accounts_tx,
            quota_tx,
            gateway,
            ExtractionClient::new("http://127.0.0.1:1".to_string()),
            CompletionClient::new(
                "http://127.0.0.1:1".to_string(),
                "token".to_string(),
                "test-model".to_string(),
                "You are a helpful assistant.".to_string(),
                1,
            ),
            None,
        )
    }

    fn text_submission(user_id: i64, text: &str) -> TaskSubmission {
        TaskSubmission {
            user_id,
            text: Some(text.to_string()),
            photo_id: None,
            document: None,
        }
    }

    #[tokio::test]
    async fn unknown_identity_is_turned_away() {
        let pool = test_pool().await;
        let handler = handler(&pool).await;

        let reply = handler.submit(text_submission(100, "2 + 2")).await.unwrap();
        assert!(matches!(
            reply,
            TaskReply::Denied(DenialReason::NotStarted)
        ));
    }

    #[tokio::test]
    async fn exhausted_quota_is_denied_before_any_upstream_call() {
        let pool = test_pool().await;
        let handler = handler(&pool).await;
        AccountRepository::new(pool.clone())
            .create_account(100, "alice", None, 0)
            .await
            .unwrap();

        let reply = handler.submit(text_submission(100, "2 + 2")).await.unwrap();
        assert!(matches!(
            reply,
            TaskReply::Denied(DenialReason::Exhausted { .. })
        ));
    }

    #[tokio::test]
    async fn empty_submission_is_no_content() {
        let pool = test_pool().await;
        let handler = handler(&pool).await;
        AccountRepository::new(pool.clone())
            .create_account(100, "alice", None, 5)
            .await
            .unwrap();

        let reply = handler.submit(text_submission(100, "   ")).await.unwrap();
        assert!(matches!(reply, TaskReply::NoContent));
    }

    #[tokio::test]
    async fn non_pdf_documents_are_unsupported() {
        let pool = test_pool().await;
        let handler = handler(&pool).await;
        AccountRepository::new(pool.clone())
            .create_account(100, "alice", None, 5)
            .await
            .unwrap();

        let submission = TaskSubmission {
            user_id: 100,
            text: None,
            photo_id: None,
            document: Some(crate::models::tasks::DocumentRef {
                file_id: "doc-1".to_string(),
                mime_type: "application/msword".to_string(),
            }),
        };

        let reply = handler.submit(submission).await.unwrap();
        assert!(matches!(reply, TaskReply::UnsupportedDocument));
    }

    #[tokio::test]
    async fn completion_failure_never_debits() {
        let pool = test_pool().await;
        let handler = handler(&pool).await;
        let accounts = AccountRepository::new(pool.clone());
        accounts.create_account(100, "alice", None, 5).await.unwrap();

        // The completion client points at a closed port, so the call fails.
        let reply = handler.submit(text_submission(100, "2 + 2")).await.unwrap();
        assert!(matches!(reply, TaskReply::Failed));

        let account = accounts.get_account(100).await.unwrap().unwrap();
        assert_eq!(account.requests_left, 5);
    }
}
