use anyhow::bail;
use serde_json::json;

/// Client for the text-extraction collaborator. The extracted string is
/// consumed as opaque task input; extraction quality is not this
/// service's concern.
#[derive(Clone)]
pub struct ExtractionClient {
    url: String,
    client: reqwest::Client,
}

impl ExtractionClient {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }

    pub async fn extract_image(&self, file_id: &str) -> Result<String, anyhow::Error> {
        self.extract("image", file_id).await
    }

    pub async fn extract_pdf(&self, file_id: &str) -> Result<String, anyhow::Error> {
        self.extract("pdf", file_id).await
    }

    async fn extract(&self, kind: &str, file_id: &str) -> Result<String, anyhow::Error> {
        let payload = json!({
            "kind": kind,
            "file_id": file_id
        });

        let response = self
            .client
            .post(format!("{}/extract", self.url))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Extraction service error: {}", response.status());
        }

        let body: serde_json::Value = response.json().await?;
        let text = body["text"].as_str().unwrap_or_default().trim().to_string();

        if text.is_empty() {
            bail!("No text extracted from {} {}.", kind, file_id);
        }

        Ok(text)
    }
}
