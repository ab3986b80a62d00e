//! Dispatch sink: sends reply chunks in order, paced.

use crate::config::DispatchConfig;
use crate::messaging::traits::OutboundChannelDyn;
use crate::{ContactKey, MessageChunk};
use std::sync::Arc;

/// Sends the chunks of one reply strictly in order. A failed chunk is logged
/// and skipped; the rest are still attempted.
#[derive(Clone)]
pub struct DispatchSink {
    channel: Arc<dyn OutboundChannelDyn>,
    config: DispatchConfig,
}

impl DispatchSink {
    pub fn new(channel: Arc<dyn OutboundChannelDyn>, config: DispatchConfig) -> Self {
        Self { channel, config }
    }

    pub fn channel(&self) -> &Arc<dyn OutboundChannelDyn> {
        &self.channel
    }

    /// Returns true only if every chunk was accepted by the channel.
    pub async fn send_all(&self, key: &ContactKey, chunks: &[MessageChunk]) -> bool {
        let mut all_sent = true;

        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.pacing()).await;
            }

            match self.channel.send_text(key, &chunk.text).await {
                Ok(()) => {
                    tracing::debug!(
                        phone = %key.phone,
                        instance = %key.instance,
                        position = chunk.position,
                        total = chunk.total,
                        "chunk sent"
                    );
                }
                Err(error) => {
                    all_sent = false;
                    tracing::warn!(
                        %error,
                        phone = %key.phone,
                        instance = %key.instance,
                        position = chunk.position,
                        total = chunk.total,
                        "failed to send chunk"
                    );
                }
            }
        }

        all_sent
    }
}
