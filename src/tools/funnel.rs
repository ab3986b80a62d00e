//! Funnel tool: move the contact to another sales funnel stage.

use crate::contacts::ContactStore;
use crate::error::Result;
use crate::tools::{ToolContext, ToolHandler, ToolOutcome, parse_args};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct FunnelArgs {
    pub estagio: String,
}

pub struct FunnelTool {
    contacts: Arc<dyn ContactStore>,
}

impl FunnelTool {
    pub const NAME: &'static str = "funil_de_vendas";

    pub fn new(contacts: Arc<dyn ContactStore>) -> Self {
        Self { contacts }
    }
}

#[async_trait]
impl ToolHandler for FunnelTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolOutcome> {
        let args: FunnelArgs = parse_args(name, args)?;
        let stage = args.estagio.trim();

        match self.contacts.update_stage(&ctx.key, stage).await {
            Ok(()) => {
                tracing::info!(phone = %ctx.key.phone, stage, "funnel stage updated");
                Ok(ToolOutcome::success(format!(
                    "Contato atualizado para estágio: {stage}"
                )))
            }
            Err(error) => {
                tracing::warn!(%error, phone = %ctx.key.phone, stage, "failed to update funnel stage");
                Ok(ToolOutcome::failure("Falha ao atualizar estágio"))
            }
        }
    }
}
