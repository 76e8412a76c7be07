use reqwest::Client;
use serde_json::json;
use zeroize::Zeroizing;

use crate::provider::{parse_openai_response, ChatMessage};

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire format.
pub struct OpenAICompatProvider {
    client: Client,
    api_key: Zeroizing<String>,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenAICompatProvider {
    pub fn new(
        api_key: Zeroizing<String>,
        base_url: String,
        model: String,
        max_tokens: u32,
        timeout_seconds: u64,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_seconds))
                .build()?,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn build_request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0,
            "max_tokens": self.max_tokens,
            "stream": false,
        })
    }

    pub async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let body = self.build_request_body(messages);
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", &*self.api_key))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("API error ({status}): {}", text.trim());
        }
        parse_openai_response(&resp.json().await?)
    }
}
