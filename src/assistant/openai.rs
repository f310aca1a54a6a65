//! reqwest client for the OpenAI Assistants v2 endpoints.
//!
//! Every request carries the bearer credential and the `OpenAI-Beta` header.
//! Error bodies of the form `{"error": {"message": ...}}` are unwrapped into
//! `ApiError` messages.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Deserializer};
use serde_json::json;
use tracing::debug;

use super::{ApiError, AssistantApi, RunState, RunStatus, ThreadMessage};
use crate::config::{AssistantConfig, Credentials};

/// Number of messages fetched when looking for the reply.
const MESSAGE_PAGE: &str = "20";

pub struct HttpAssistantApi {
    client: Client,
    base: String,
    assistant_id: String,
}

#[derive(Deserialize)]
struct IdObject {
    id: String,
}

#[derive(Deserialize)]
struct RunObject {
    id: String,
    status: String,
}

impl From<RunObject> for RunState {
    fn from(run: RunObject) -> Self {
        RunState {
            status: RunStatus::from_upstream(&run.status),
            id: run.id,
            raw_status: run.status,
        }
    }
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

/// Join the `text` parts of a message's `content` array.
pub(super) fn text_parts<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Part {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        text: Option<TextValue>,
    }

    #[derive(Deserialize)]
    struct TextValue {
        value: String,
    }

    let parts: Vec<Part> = Vec::deserialize(deserializer)?;
    Ok(parts
        .into_iter()
        .filter(|p| p.kind == "text")
        .filter_map(|p| p.text.map(|t| t.value))
        .collect::<Vec<_>>()
        .join("\n"))
}

impl HttpAssistantApi {
    pub fn new(config: &AssistantConfig, credentials: &Credentials) -> Result<Self, ApiError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", credentials.api_key))
            .map_err(|e| ApiError::InvalidCredential(format!("API key: {e}")))?;
        auth.set_sensitive(true);

        let beta = HeaderValue::from_str(&config.beta_header)
            .map_err(|e| ApiError::InvalidCredential(format!("beta header: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert("openai-beta", beta);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base: config.api_base.trim_end_matches('/').to_string(),
            assistant_id: credentials.assistant_id.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn send(request: RequestBuilder) -> Result<Response, ApiError> {
        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or(body);

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized {
                status: status.as_u16(),
                message,
            },
            _ => ApiError::Status {
                status: status.as_u16(),
                message,
            },
        })
    }
}

#[async_trait]
impl AssistantApi for HttpAssistantApi {
    async fn create_thread(&self) -> Result<String, ApiError> {
        let resp = Self::send(self.client.post(self.url("/threads")).json(&json!({}))).await?;
        let thread: IdObject = resp.json().await?;
        debug!("Created thread {}", thread.id);
        Ok(thread.id)
    }

    async fn add_user_message(&self, thread_id: &str, text: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("/threads/{thread_id}/messages"));
        let body = json!({ "role": "user", "content": text });
        Self::send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn create_run(&self, thread_id: &str) -> Result<RunState, ApiError> {
        let url = self.url(&format!("/threads/{thread_id}/runs"));
        let body = json!({ "assistant_id": self.assistant_id });
        let run: RunObject = Self::send(self.client.post(url).json(&body)).await?.json().await?;
        debug!("Created run {} ({})", run.id, run.status);
        Ok(run.into())
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunState, ApiError> {
        let url = self.url(&format!("/threads/{thread_id}/runs/{run_id}"));
        let run: RunObject = Self::send(self.client.get(url)).await?.json().await?;
        Ok(run.into())
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("/threads/{thread_id}/runs/{run_id}/cancel"));
        Self::send(self.client.post(url).json(&json!({}))).await?;
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ApiError> {
        let url = self.url(&format!("/threads/{thread_id}/messages"));
        let request = self
            .client
            .get(url)
            .query(&[("order", "desc"), ("limit", MESSAGE_PAGE)]);
        let list: MessageList = Self::send(request).await?.json().await?;
        Ok(list.data)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("/threads/{thread_id}"));
        Self::send(self.client.delete(url)).await?;
        Ok(())
    }
}
