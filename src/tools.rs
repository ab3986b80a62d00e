//! Tool handlers the assistant can call during a run.
//!
//! Handlers are looked up by name in a [`ToolRegistry`]. Names without a
//! registered handler go to the registry's fallback, which in production
//! forwards the call to an external webhook (scheduling and any other
//! integration lives there).
//!
//! | Name | Handler |
//! |---|---|
//! | `notificar` | [`NotifyTool`]: alert a human operator |
//! | `funil_de_vendas` | [`FunnelTool`]: move the contact to a funnel stage |
//! | `enviar_midia` | [`SendMediaTool`]: send an image, video, audio or document |
//! | anything else | [`WebhookForwardTool`] |

pub mod funnel;
pub mod media;
pub mod notify;
pub mod webhook;

pub use funnel::FunnelTool;
pub use media::SendMediaTool;
pub use notify::NotifyTool;
pub use webhook::WebhookForwardTool;

use crate::ContactKey;
use crate::assistant::types::{ToolInvocation, ToolOutput};
use crate::config::ToolsConfig;
use crate::contacts::ContactStore;
use crate::error::Result;
use crate::messaging::OutboundChannelDyn;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-turn context handed to every tool call.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub key: ContactKey,
    pub contact_name: String,
    pub thread_id: String,
    /// The coalesced user input that started this turn.
    pub turn_input: String,
}

/// What a handler reports back to the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ToolOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool. `name` is the name the assistant called it by.
    async fn call(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolOutcome>;
}

/// Parse handler arguments into a typed struct.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(
    name: &str,
    args: serde_json::Value,
) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|error| anyhow::anyhow!("invalid arguments for {name}: {error}").into())
}

/// Name → handler table with an explicit fallback.
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    fallback: Arc<dyn ToolHandler>,
}

impl ToolRegistry {
    pub fn new(fallback: Arc<dyn ToolHandler>) -> Self {
        Self {
            handlers: HashMap::new(),
            fallback,
        }
    }

    /// The production table: operator notification, funnel stage, media
    /// send, and webhook forwarding for everything else.
    pub fn standard(
        channel: Arc<dyn OutboundChannelDyn>,
        contacts: Arc<dyn ContactStore>,
        config: &ToolsConfig,
    ) -> Result<Self> {
        let mut registry = Self::new(Arc::new(WebhookForwardTool::new(config)?));
        registry.register(NotifyTool::NAME, Arc::new(NotifyTool::new(channel.clone())));
        registry.register(FunnelTool::NAME, Arc::new(FunnelTool::new(contacts)));
        registry.register(SendMediaTool::NAME, Arc::new(SendMediaTool::new(channel)));
        Ok(registry)
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn resolve(&self, name: &str) -> &Arc<dyn ToolHandler> {
        self.handlers.get(name).unwrap_or(&self.fallback)
    }

    /// Run one tool call. Failures are reported in the output, never raised.
    pub async fn dispatch(&self, ctx: &ToolContext, invocation: &ToolInvocation) -> ToolOutput {
        let output = match parse_arguments(&invocation.arguments) {
            Ok(args) => {
                match self.resolve(&invocation.name).call(ctx, &invocation.name, args).await {
                    Ok(outcome) => {
                        tracing::info!(
                            tool = %invocation.name,
                            success = outcome.success,
                            phone = %ctx.key.phone,
                            "tool call finished"
                        );
                        serde_json::to_string(&outcome).unwrap_or_else(|_| {
                            serde_json::json!({ "success": outcome.success }).to_string()
                        })
                    }
                    Err(error) => {
                        tracing::warn!(%error, tool = %invocation.name, phone = %ctx.key.phone, "tool call failed");
                        failure_output(&error.to_string())
                    }
                }
            }
            Err(error) => {
                tracing::warn!(%error, tool = %invocation.name, "tool arguments are not valid JSON");
                failure_output(&format!("invalid arguments: {error}"))
            }
        };

        ToolOutput {
            tool_call_id: invocation.id.clone(),
            output,
        }
    }
}

fn parse_arguments(raw: &str) -> std::result::Result<serde_json::Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw)
}

fn failure_output(error: &str) -> String {
    serde_json::json!({ "success": false, "error": error }).to_string()
}
