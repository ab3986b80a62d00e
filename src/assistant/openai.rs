//! OpenAI Assistants v2 client over HTTP.

use crate::assistant::client::AssistantClient;
use crate::assistant::types::{
    MessageRole, Run, RunStatus, ThreadMessage, ThreadRef, ToolInvocation, ToolOutput,
};
use crate::config::AssistantConfig;
use crate::error::{AssistantError, Result};
use anyhow::Context as _;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

// -- wire types --

#[derive(Deserialize)]
struct ThreadObject {
    id: String,
}

#[derive(Deserialize)]
struct RunObject {
    id: String,
    status: RunStatus,
    #[serde(default)]
    required_action: Option<RequiredAction>,
}

#[derive(Deserialize)]
struct RequiredAction {
    submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Deserialize)]
struct SubmitToolOutputs {
    #[serde(default)]
    tool_calls: Vec<ToolCallObject>,
}

#[derive(Deserialize)]
struct ToolCallObject {
    id: String,
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct ListObject<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct MessageObject {
    id: String,
    role: MessageRole,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: TextContent },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct TextContent {
    value: String,
}

impl From<RunObject> for Run {
    fn from(run: RunObject) -> Self {
        let required_tool_calls = run
            .required_action
            .and_then(|action| action.submit_tool_outputs)
            .map(|outputs| {
                outputs
                    .tool_calls
                    .into_iter()
                    .map(|call| ToolInvocation {
                        id: call.id,
                        name: call.function.name,
                        arguments: call.function.arguments,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: run.id,
            status: run.status,
            required_tool_calls,
        }
    }
}

impl From<MessageObject> for ThreadMessage {
    fn from(message: MessageObject) -> Self {
        let text = message
            .content
            .into_iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.value),
                ContentPart::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            id: message.id,
            role: message.role,
            text,
        }
    }
}

/// Assistants v2 HTTP client.
pub struct OpenAiAssistantClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiAssistantClient {
    pub fn new(config: &AssistantConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build assistant HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|error| AssistantError::Request(error.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| AssistantError::Request(error.to_string()))?;

        if !status.is_success() {
            return Err(AssistantError::Status {
                status: status.as_u16(),
                body: text,
            }
            .into());
        }

        serde_json::from_str(&text).map_err(|error| AssistantError::Decode(error.to_string()).into())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(reqwest::Method::GET, path)).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        self.send(self.request(reqwest::Method::POST, path).json(&body))
            .await
    }
}

#[async_trait]
impl AssistantClient for OpenAiAssistantClient {
    async fn create_thread(&self) -> Result<ThreadRef> {
        let thread: ThreadObject = self.post("threads", serde_json::json!({})).await?;
        Ok(thread.id)
    }

    async fn list_runs(&self, thread: &str) -> Result<Vec<Run>> {
        let runs: ListObject<RunObject> = self.get(&format!("threads/{thread}/runs")).await?;
        Ok(runs.data.into_iter().map(Run::from).collect())
    }

    async fn cancel_run(&self, thread: &str, run_id: &str) -> Result<()> {
        let _: RunObject = self
            .post(
                &format!("threads/{thread}/runs/{run_id}/cancel"),
                serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    async fn post_message(&self, thread: &str, text: &str) -> Result<()> {
        let _: MessageObject = self
            .post(
                &format!("threads/{thread}/messages"),
                serde_json::json!({ "role": "user", "content": text }),
            )
            .await?;
        Ok(())
    }

    async fn start_run(&self, thread: &str, assistant_id: &str) -> Result<Run> {
        let run: RunObject = self
            .post(
                &format!("threads/{thread}/runs"),
                serde_json::json!({ "assistant_id": assistant_id }),
            )
            .await?;
        Ok(run.into())
    }

    async fn get_run(&self, thread: &str, run_id: &str) -> Result<Run> {
        let run: RunObject = self.get(&format!("threads/{thread}/runs/{run_id}")).await?;
        Ok(run.into())
    }

    async fn submit_tool_results(
        &self,
        thread: &str,
        run_id: &str,
        results: Vec<ToolOutput>,
    ) -> Result<()> {
        let _: RunObject = self
            .post(
                &format!("threads/{thread}/runs/{run_id}/submit_tool_outputs"),
                serde_json::json!({ "tool_outputs": results }),
            )
            .await?;
        Ok(())
    }

    async fn list_messages(&self, thread: &str) -> Result<Vec<ThreadMessage>> {
        let messages: ListObject<MessageObject> = self
            .get(&format!("threads/{thread}/messages?order=desc"))
            .await?;
        Ok(messages.data.into_iter().map(ThreadMessage::from).collect())
    }
}
