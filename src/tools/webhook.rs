//! Webhook-forward tool: the fallback for tool names without a local handler.

use crate::config::ToolsConfig;
use crate::error::Result;
use crate::tools::{ToolContext, ToolHandler, ToolOutcome};
use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// POSTs the call's arguments to `<base>/<tool name>`. Only 200, 201 and 202
/// count as success.
pub struct WebhookForwardTool {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl WebhookForwardTool {
    pub fn new(config: &ToolsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.webhook_timeout_secs))
            .build()
            .context("failed to build webhook HTTP client")?;

        Ok(Self {
            http,
            base_url: config
                .webhook_base_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
        })
    }
}

#[async_trait]
impl ToolHandler for WebhookForwardTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolOutcome> {
        let Some(base_url) = &self.base_url else {
            return Err(anyhow::anyhow!("no handler or webhook configured for tool {name}").into());
        };

        let response = self
            .http
            .post(format!("{base_url}/{name}"))
            .json(&args)
            .send()
            .await
            .with_context(|| format!("webhook request for {name} failed"))?;

        let status = response.status();
        tracing::info!(
            tool = name,
            status = status.as_u16(),
            phone = %ctx.key.phone,
            "webhook called"
        );

        let message = format!("Webhook chamado para função: {name}");
        if matches!(
            status,
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED
        ) {
            Ok(ToolOutcome::success(message))
        } else {
            Ok(ToolOutcome::failure(message))
        }
    }
}
