//! Assistants API client (https://api.openai.com by default).
//! Covers the thread/run surface the bridge needs: create thread, append
//! message, start run, poll run, list messages.

use serde::{Deserialize, Serialize};

use super::run::{RunStatus, ThreadsApi};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Client for the assistant backend HTTP API. Holds the assistant id so
/// callers start runs without carrying backend configuration around.
#[derive(Clone)]
pub struct AssistantClient {
    base_url: String,
    api_key: String,
    assistant_id: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("assistant request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("assistant api error: {0}")]
    Api(String),
    #[error("refusing to submit empty message content")]
    EmptyContent,
}

impl AssistantClient {
    pub fn new(api_key: String, assistant_id: String, base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            api_key,
            assistant_id,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn check(res: reqwest::Response) -> Result<reqwest::Response, AssistantError> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(AssistantError::Api(format!("{} {}", status, body)))
    }
}

#[async_trait::async_trait]
impl ThreadsApi for AssistantClient {
    /// POST /v1/threads — allocate a fresh conversation thread.
    async fn create_thread(&self) -> Result<String, AssistantError> {
        let res = self
            .request(reqwest::Method::POST, "/v1/threads")
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let data: ThreadObject = Self::check(res).await?.json().await?;
        Ok(data.id)
    }

    /// POST /v1/threads/{id}/messages — append one user message.
    async fn add_message(&self, thread_id: &str, content: &str) -> Result<(), AssistantError> {
        if content.trim().is_empty() {
            return Err(AssistantError::EmptyContent);
        }
        let body = CreateMessageRequest {
            role: "user",
            content,
        };
        let res = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/threads/{}/messages", thread_id),
            )
            .json(&body)
            .send()
            .await?;
        Self::check(res).await?;
        Ok(())
    }

    /// POST /v1/threads/{id}/runs — start processing accumulated messages.
    async fn create_run(&self, thread_id: &str) -> Result<String, AssistantError> {
        let body = CreateRunRequest {
            assistant_id: &self.assistant_id,
        };
        let res = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/threads/{}/runs", thread_id),
            )
            .json(&body)
            .send()
            .await?;
        let data: RunObject = Self::check(res).await?.json().await?;
        Ok(data.id)
    }

    /// GET /v1/threads/{id}/runs/{run_id} — current run status.
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, AssistantError> {
        let res = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/threads/{}/runs/{}", thread_id, run_id),
            )
            .send()
            .await?;
        let data: RunObject = Self::check(res).await?.json().await?;
        Ok(data.status)
    }

    /// GET /v1/threads/{id}/messages — newest first; returns the text of the
    /// most recent assistant-authored message, if any.
    async fn latest_assistant_reply(
        &self,
        thread_id: &str,
    ) -> Result<Option<String>, AssistantError> {
        let res = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/threads/{}/messages", thread_id),
            )
            .send()
            .await?;
        let data: ListMessagesResponse = Self::check(res).await?.json().await?;
        Ok(data
            .data
            .iter()
            .find(|m| m.role == "assistant")
            .and_then(MessageObject::text))
    }
}

#[derive(Debug, Deserialize)]
struct ThreadObject {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateRunRequest<'a> {
    assistant_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: RunStatus,
}

#[derive(Debug, Deserialize)]
struct ListMessagesResponse {
    #[serde(default)]
    data: Vec<MessageObject>,
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Vec<MessageContent>,
}

impl MessageObject {
    /// First text block of the message, if present.
    fn text(&self) -> Option<String> {
        self.content.iter().find_map(|c| match c {
            MessageContent::Text { text } => Some(text.value.clone()),
            MessageContent::Other => None,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessageContent {
    Text { text: TextValue },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_text_extracts_first_text_block() {
        let raw = serde_json::json!({
            "role": "assistant",
            "content": [
                { "type": "image_file", "image_file": { "file_id": "f1" } },
                { "type": "text", "text": { "value": "hello there" } }
            ]
        });
        let msg: MessageObject = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.text().as_deref(), Some("hello there"));
    }

    #[test]
    fn run_object_parses_status() {
        let raw = serde_json::json!({ "id": "run_1", "status": "in_progress" });
        let run: RunObject = serde_json::from_value(raw).unwrap();
        assert_eq!(run.id, "run_1");
        assert_eq!(run.status, RunStatus::InProgress);
    }
}
