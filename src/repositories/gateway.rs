use anyhow::bail;
use serde_json::json;

/// Outbound client for the chat gateway: message delivery and channel
/// membership checks. The gateway owns the transport; this client only
/// speaks its HTTP API.
#[derive(Clone)]
pub struct GatewayClient {
    url: String,
    api_token: String,
    client: reqwest::Client,
}

impl GatewayClient {
    pub fn new(url: String, api_token: String) -> Self {
        Self {
            url,
            api_token,
            client: reqwest::Client::new(),
        }
    }

    pub async fn send_message(&self, user_id: i64, text: &str) -> Result<(), anyhow::Error> {
        let payload = json!({
            "chat_id": user_id,
            "text": text
        });

        let response = self
            .client
            .post(format!("{}/sendMessage", self.url))
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Gateway rejected message: {}", response.status());
        }

        Ok(())
    }

    pub async fn is_channel_member(
        &self,
        channel_id: i64,
        user_id: i64,
    ) -> Result<bool, anyhow::Error> {
        let payload = json!({
            "chat_id": channel_id,
            "user_id": user_id
        });

        let response = self
            .client
            .post(format!("{}/getChatMember", self.url))
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Gateway membership check failed: {}", response.status());
        }

        let body: serde_json::Value = response.json().await?;
        let status = body["status"].as_str().unwrap_or_default().to_lowercase();

        Ok(matches!(status.as_str(), "member" | "administrator" | "creator"))
    }
}
