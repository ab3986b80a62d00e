//! Notify tool: hand the conversation over to a human operator.

use crate::ContactKey;
use crate::error::Result;
use crate::messaging::OutboundChannelDyn;
use crate::tools::{ToolContext, ToolHandler, ToolOutcome, parse_args};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct NotifyArgs {
    /// Operator phone number to alert.
    pub numero: String,
}

/// Sends the operator a WhatsApp message with the client's name, number and
/// what they asked, on the same gateway instance.
pub struct NotifyTool {
    channel: Arc<dyn OutboundChannelDyn>,
}

impl NotifyTool {
    pub const NAME: &'static str = "notificar";

    pub fn new(channel: Arc<dyn OutboundChannelDyn>) -> Self {
        Self { channel }
    }
}

fn notification_text(ctx: &ToolContext) -> String {
    let name = if ctx.contact_name.trim().is_empty() {
        "Não informado"
    } else {
        ctx.contact_name.trim()
    };
    format!(
        "Um cliente está aguardando o seu contato\n\nNome: {name}\nNúmero: {}\nContexto: {}",
        ctx.key.phone, ctx.turn_input
    )
}

#[async_trait]
impl ToolHandler for NotifyTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolOutcome> {
        let args: NotifyArgs = parse_args(name, args)?;
        let operator = ContactKey::new(&args.numero, ctx.key.instance.clone());

        match self
            .channel
            .send_text(&operator, &notification_text(ctx))
            .await
        {
            Ok(()) => {
                tracing::info!(
                    operator = %operator.phone,
                    phone = %ctx.key.phone,
                    "operator notified"
                );
                Ok(ToolOutcome::success(format!(
                    "Notificação enviada para {}",
                    operator.phone
                )))
            }
            Err(error) => {
                tracing::warn!(%error, operator = %operator.phone, "failed to notify operator");
                Ok(ToolOutcome::failure("Falha ao enviar notificação"))
            }
        }
    }
}
