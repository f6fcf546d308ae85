use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::accounts::AccountRequest;
use super::admin::AdminRequest;
use super::tasks::TaskRequest;
use super::ServiceError;
use crate::models::accounts::{Account, NewArrival};
use crate::models::quota::DenialReason;
use crate::models::tasks::{TaskReply, TaskSubmission};

#[derive(Clone)]
struct AppState {
    accounts_channel: mpsc::Sender<AccountRequest>,
    tasks_channel: mpsc::Sender<TaskRequest>,
    admin_channel: mpsc::Sender<AdminRequest>,
}

#[derive(Deserialize)]
struct SubscriptionUpdate {
    subscribed: bool,
}

#[derive(Deserialize)]
struct QuotaAdjustment {
    user_id: i64,
    delta: i64,
}

#[derive(Deserialize)]
struct ReferralSettingsUpdate {
    referral_requests: Option<i64>,
    bulk_referral_requests: Option<i64>,
}

#[derive(Deserialize)]
struct BroadcastMessage {
    text: String,
}

fn account_json(account: &Account) -> Value {
    json!({
        "user_id": account.user_id,
        "display_name": account.display_name,
        "referral_code": account.referral_code,
        "referred_by": account.referred_by,
        "requests_left": account.requests_left,
        "invited_friends_count": account.invited_friends_count,
        "subscribed_to_channel": account.subscribed_to_channel,
        "notifications_enabled": account.notifications_enabled
    })
}

fn error_response(e: ServiceError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        ServiceError::AccountNotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Unauthorized(_) => StatusCode::FORBIDDEN,
        ServiceError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, Json(json!({ "error": e.to_string() })))
}

fn channel_error(e: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("Failed to process request: {}", e) })),
    )
}

fn admin_id_from_headers(headers: &HeaderMap) -> Option<i64> {
    headers
        .get("x-admin-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

fn denial_json(reason: &DenialReason) -> Value {
    match reason {
        DenialReason::NotStarted => json!({
            "status": "denied",
            "reason": "not_started"
        }),
        DenialReason::Exhausted {
            referral_code,
            target_count,
            bonus_requests,
        } => json!({
            "status": "denied",
            "reason": "quota_exhausted",
            "referral_code": referral_code,
            "target_count": target_count,
            "bonus_requests": bonus_requests
        }),
    }
}

async fn gateway_arrival(
    State(state): State<AppState>,
    Json(arrival): Json<NewArrival>,
) -> impl IntoResponse {
    let (arrival_tx, arrival_rx) = oneshot::channel();

    let send_result = state
        .accounts_channel
        .send(AccountRequest::RegisterArrival {
            user_id: arrival.user_id,
            display_name: arrival.display_name,
            referral_payload: arrival.referral_payload,
            response: arrival_tx,
        })
        .await;
    if let Err(e) = send_result {
        return channel_error(e);
    }

    match arrival_rx.await {
        Ok(Ok(arrival)) => (
            StatusCode::OK,
            Json(json!({
                "outcome": arrival.outcome,
                "account": account_json(&arrival.account)
            })),
        ),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => channel_error(e),
    }
}

async fn gateway_task(
    State(state): State<AppState>,
    Json(submission): Json<TaskSubmission>,
) -> impl IntoResponse {
    let (task_tx, task_rx) = oneshot::channel();

    let send_result = state
        .tasks_channel
        .send(TaskRequest::Submit {
            submission,
            response: task_tx,
        })
        .await;
    if let Err(e) = send_result {
        return channel_error(e);
    }

    match task_rx.await {
        Ok(Ok(reply)) => {
            let body = match reply {
                TaskReply::Answer {
                    text,
                    requests_left,
                } => json!({
                    "status": "answered",
                    "answer": text,
                    "requests_left": requests_left
                }),
                TaskReply::Denied(reason) => denial_json(&reason),
                TaskReply::SubscriptionRequired => json!({ "status": "subscription_required" }),
                TaskReply::UnsupportedDocument => json!({ "status": "unsupported_document" }),
                TaskReply::NoContent => json!({ "status": "no_content" }),
                TaskReply::Failed => json!({ "status": "failed" }),
            };
            (StatusCode::OK, Json(body))
        }
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => channel_error(e),
    }
}

async fn gateway_account(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    let (account_tx, account_rx) = oneshot::channel();

    let send_result = state
        .accounts_channel
        .send(AccountRequest::GetAccount {
            user_id,
            response: account_tx,
        })
        .await;
    if let Err(e) = send_result {
        return channel_error(e);
    }

    match account_rx.await {
        Ok(Ok(Some(account))) => (StatusCode::OK, Json(account_json(&account))),
        Ok(Ok(None)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Account not found: {}", user_id) })),
        ),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => channel_error(e),
    }
}

async fn gateway_toggle_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    let (toggle_tx, toggle_rx) = oneshot::channel();

    let send_result = state
        .accounts_channel
        .send(AccountRequest::ToggleNotifications {
            user_id,
            response: toggle_tx,
        })
        .await;
    if let Err(e) = send_result {
        return channel_error(e);
    }

    match toggle_rx.await {
        Ok(Ok(enabled)) => (
            StatusCode::OK,
            Json(json!({ "notifications_enabled": enabled })),
        ),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => channel_error(e),
    }
}

async fn gateway_subscription(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(update): Json<SubscriptionUpdate>,
) -> impl IntoResponse {
    let (subscription_tx, subscription_rx) = oneshot::channel();

    let send_result = state
        .accounts_channel
        .send(AccountRequest::SetSubscribed {
            user_id,
            subscribed: update.subscribed,
            response: subscription_tx,
        })
        .await;
    if let Err(e) = send_result {
        return channel_error(e);
    }

    match subscription_rx.await {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(json!({ "subscribed_to_channel": update.subscribed })),
        ),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => channel_error(e),
    }
}

async fn admin_adjust_quota(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(adjustment): Json<QuotaAdjustment>,
) -> impl IntoResponse {
    let Some(admin_id) = admin_id_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Missing X-Admin-Id header." })),
        );
    };
    let (adjust_tx, adjust_rx) = oneshot::channel();

    let send_result = state
        .admin_channel
        .send(AdminRequest::AdjustQuota {
            admin_id,
            user_id: adjustment.user_id,
            delta: adjustment.delta,
            response: adjust_tx,
        })
        .await;
    if let Err(e) = send_result {
        return channel_error(e);
    }

    match adjust_rx.await {
        Ok(Ok(requests_left)) => (
            StatusCode::OK,
            Json(json!({ "requests_left": requests_left })),
        ),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => channel_error(e),
    }
}

async fn admin_update_referral_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<ReferralSettingsUpdate>,
) -> impl IntoResponse {
    let Some(admin_id) = admin_id_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Missing X-Admin-Id header." })),
        );
    };
    let (settings_tx, settings_rx) = oneshot::channel();

    let send_result = state
        .admin_channel
        .send(AdminRequest::UpdateReferralSettings {
            admin_id,
            referral_requests: update.referral_requests,
            bulk_referral_requests: update.bulk_referral_requests,
            response: settings_tx,
        })
        .await;
    if let Err(e) = send_result {
        return channel_error(e);
    }

    match settings_rx.await {
        Ok(Ok(settings)) => (StatusCode::OK, Json(json!(settings))),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => channel_error(e),
    }
}

async fn admin_account_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    let Some(admin_id) = admin_id_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Missing X-Admin-Id header." })),
        );
    };
    let (info_tx, info_rx) = oneshot::channel();

    let send_result = state
        .admin_channel
        .send(AdminRequest::AccountInfo {
            admin_id,
            user_id,
            response: info_tx,
        })
        .await;
    if let Err(e) = send_result {
        return channel_error(e);
    }

    match info_rx.await {
        Ok(Ok(Some(account))) => (StatusCode::OK, Json(json!(account))),
        Ok(Ok(None)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Account not found: {}", user_id) })),
        ),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => channel_error(e),
    }
}

async fn admin_stats(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let Some(admin_id) = admin_id_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Missing X-Admin-Id header." })),
        );
    };
    let (stats_tx, stats_rx) = oneshot::channel();

    let send_result = state
        .admin_channel
        .send(AdminRequest::Stats {
            admin_id,
            response: stats_tx,
        })
        .await;
    if let Err(e) = send_result {
        return channel_error(e);
    }

    match stats_rx.await {
        Ok(Ok(stats)) => (StatusCode::OK, Json(json!(stats))),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => channel_error(e),
    }
}

async fn admin_broadcast(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(message): Json<BroadcastMessage>,
) -> impl IntoResponse {
    let Some(admin_id) = admin_id_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Missing X-Admin-Id header." })),
        );
    };
    let (broadcast_tx, broadcast_rx) = oneshot::channel();

    let send_result = state
        .admin_channel
        .send(AdminRequest::Broadcast {
            admin_id,
            text: message.text,
            response: broadcast_tx,
        })
        .await;
    if let Err(e) = send_result {
        return channel_error(e);
    }

    match broadcast_rx.await {
        Ok(Ok(report)) => (StatusCode::OK, Json(json!(report))),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => channel_error(e),
    }
}

pub async fn start_http_server(
    listen: &str,
    accounts_channel: mpsc::Sender<AccountRequest>,
    tasks_channel: mpsc::Sender<TaskRequest>,
    admin_channel: mpsc::Sender<AdminRequest>,
) -> Result<(), anyhow::Error> {
    let app_state = AppState {
        accounts_channel,
        tasks_channel,
        admin_channel,
    };

    let app = Router::new()
        .route("/gateway/arrival", post(gateway_arrival))
        .route("/gateway/task", post(gateway_task))
        .route("/gateway/accounts/{user_id}", get(gateway_account))
        .route(
            "/gateway/accounts/{user_id}/notifications",
            post(gateway_toggle_notifications),
        )
        .route(
            "/gateway/accounts/{user_id}/subscription",
            post(gateway_subscription),
        )
        .route("/admin/quota", post(admin_adjust_quota))
        .route(
            "/admin/referral-settings",
            put(admin_update_referral_settings),
        )
        .route("/admin/accounts/{user_id}", get(admin_account_info))
        .route("/admin/stats", get(admin_stats))
        .route("/admin/broadcast", post(admin_broadcast))
        .route("/health", get(|| async { "OK" }))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
