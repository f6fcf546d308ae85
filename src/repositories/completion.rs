use anyhow::bail;
use serde_json::json;

/// Client for the LLM completion endpoint. Every call is bounded by the
/// configured timeout; a timed-out or failed call never reaches the quota
/// debit path.
#[derive(Clone)]
pub struct CompletionClient {
    url: String,
    api_token: String,
    model: String,
    system_prompt: String,
    client: reqwest::Client,
}

impl CompletionClient {
    pub fn new(
        url: String,
        api_token: String,
        model: String,
        system_prompt: String,
        timeout_secs: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            url,
            api_token,
            model,
            system_prompt,
            client,
        }
    }

    pub async fn complete(&self, prompt: &str) -> Result<String, anyhow::Error> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": prompt }
            ]
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) => bail!("Completion endpoint returned non-JSON ({}): {}", status, e),
        };

        if !status.is_success() {
            let detail = body["error"]["message"].as_str().unwrap_or("no details");
            bail!("Completion endpoint error ({}): {}", status, detail);
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default();
        let answer = content.replace("**", "").trim().to_string();

        if answer.is_empty() {
            bail!("Completion endpoint returned an empty answer.");
        }

        Ok(answer)
    }
}
