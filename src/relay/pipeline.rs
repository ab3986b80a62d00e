//! Turn pipeline: what happens to a coalesced burst.

use crate::ContactKey;
use crate::assistant::{ConversationDriver, TurnOutcome};
use crate::chunker;
use crate::config::{AssistantConfig, ChunkerConfig};
use crate::contacts::{ContactStatus, ContactStore};
use crate::error::Result;
use crate::messaging::DispatchSink;
use crate::relay::debounce::BurstHandler;
use crate::tools::ToolContext;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// Runs a burst through the assistant and sends the reply back, chunked.
pub struct TurnPipeline {
    contacts: Arc<dyn ContactStore>,
    driver: ConversationDriver,
    assistants: AssistantConfig,
    chunker: ChunkerConfig,
    sink: DispatchSink,
}

impl TurnPipeline {
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        driver: ConversationDriver,
        assistants: AssistantConfig,
        chunker: ChunkerConfig,
        sink: DispatchSink,
    ) -> Self {
        Self {
            contacts,
            driver,
            assistants,
            chunker,
            sink,
        }
    }

    /// The contact's thread, created and stored on first use.
    async fn ensure_thread(&self, key: &ContactKey, existing: Option<String>) -> Result<String> {
        if let Some(thread) = existing {
            return Ok(thread);
        }
        let thread = self.driver.client().create_thread().await?;
        self.contacts.set_thread_ref(key, &thread).await?;
        tracing::info!(phone = %key.phone, thread = %thread, "assistant thread created");
        Ok(thread)
    }
}

#[async_trait]
impl BurstHandler for TurnPipeline {
    #[tracing::instrument(skip(self, input), fields(phone = %key.phone, instance = %key.instance))]
    async fn handle_burst(&self, key: &ContactKey, input: String) -> Result<()> {
        let Some(contact) = self.contacts.get_contact(key).await? else {
            tracing::warn!("burst for unknown contact dropped");
            return Ok(());
        };

        let status = contact.effective_status(Utc::now());
        if status != ContactStatus::Active {
            tracing::info!(%status, "contact not answerable, burst dropped");
            return Ok(());
        }

        let thread = self.ensure_thread(key, contact.thread_id).await?;
        let assistant_id = self.assistants.identity_for(&key.instance);
        let ctx = ToolContext {
            key: key.clone(),
            contact_name: contact.name,
            thread_id: thread.clone(),
            turn_input: input.clone(),
        };

        let reply = match self
            .driver
            .run_turn(&thread, &assistant_id, &input, &ctx)
            .await?
        {
            TurnOutcome::Reply(reply) => reply,
            outcome => {
                tracing::info!(?outcome, "turn ended without a reply");
                return Ok(());
            }
        };

        let chunks = chunker::split_into_chunks(&reply, &self.chunker);
        if chunks.is_empty() {
            tracing::info!("assistant reply was empty after normalization");
            return Ok(());
        }

        let total = chunks.len();
        if self.sink.send_all(key, &chunks).await {
            tracing::info!(chunks = total, "reply delivered");
        } else {
            tracing::warn!(chunks = total, "reply partially delivered");
        }
        Ok(())
    }
}
