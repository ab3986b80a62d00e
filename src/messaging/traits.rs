//! Outbound channel trait and dynamic dispatch companion.

use crate::ContactKey;
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Media message to send through the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMedia {
    /// Publicly reachable URL of the file.
    pub url: String,
    /// Gateway media type: `image`, `video`, `audio` or `document`.
    pub mediatype: String,
    pub caption: Option<String>,
}

/// Static trait for outbound channels.
/// Use this for type-safe implementations.
pub trait OutboundChannel: Send + Sync + 'static {
    /// Unique name for this channel.
    fn name(&self) -> &str;

    /// Send one text message to a contact.
    fn send_text(
        &self,
        key: &ContactKey,
        text: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Send a media message to a contact.
    fn send_media(
        &self,
        key: &ContactKey,
        media: &OutboundMedia,
    ) -> impl Future<Output = Result<()>> + Send {
        let _ = (key, media);
        async move {
            Err(GatewayError::Other(anyhow::anyhow!(
                "channel {} does not support media",
                self.name()
            ))
            .into())
        }
    }

    /// Health check.
    fn health_check(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Dynamic trait for runtime polymorphism.
/// Use this when you need `Arc<dyn OutboundChannelDyn>`.
pub trait OutboundChannelDyn: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn send_text<'a>(
        &'a self,
        key: &'a ContactKey,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn send_media<'a>(
        &'a self,
        key: &'a ContactKey,
        media: &'a OutboundMedia,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Blanket implementation: any type implementing OutboundChannel automatically implements OutboundChannelDyn.
impl<T: OutboundChannel> OutboundChannelDyn for T {
    fn name(&self) -> &str {
        OutboundChannel::name(self)
    }

    fn send_text<'a>(
        &'a self,
        key: &'a ContactKey,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(OutboundChannel::send_text(self, key, text))
    }

    fn send_media<'a>(
        &'a self,
        key: &'a ContactKey,
        media: &'a OutboundMedia,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(OutboundChannel::send_media(self, key, media))
    }

    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(OutboundChannel::health_check(self))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Records every send; texts listed in `failing` are rejected.
    #[derive(Default)]
    pub struct RecordingChannel {
        pub sent: Mutex<Vec<(ContactKey, String, tokio::time::Instant)>>,
        pub media: Mutex<Vec<(ContactKey, OutboundMedia)>>,
        pub failing: Mutex<HashSet<String>>,
    }

    impl RecordingChannel {
        pub fn texts(&self) -> Vec<String> {
            self.sent.lock().iter().map(|(_, text, _)| text.clone()).collect()
        }
    }

    impl OutboundChannel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send_text(&self, key: &ContactKey, text: &str) -> Result<()> {
            self.sent
                .lock()
                .push((key.clone(), text.to_string(), tokio::time::Instant::now()));
            if self.failing.lock().contains(text) {
                return Err(GatewayError::Status {
                    status: 500,
                    body: "rejected".into(),
                }
                .into());
            }
            Ok(())
        }

        async fn send_media(&self, key: &ContactKey, media: &OutboundMedia) -> Result<()> {
            self.media.lock().push((key.clone(), media.clone()));
            Ok(())
        }
    }

    /// Text-only channel relying on the default `send_media`.
    pub struct TextOnlyChannel;

    impl OutboundChannel for TextOnlyChannel {
        fn name(&self) -> &str {
            "text-only"
        }

        async fn send_text(&self, _key: &ContactKey, _text: &str) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn dyn_channel_forwards_to_static_impl() {
        let channel = Arc::new(RecordingChannel::default());
        let dynamic: Arc<dyn OutboundChannelDyn> = channel.clone();
        let key = ContactKey::new("5511999999999", "loja");

        dynamic.send_text(&key, "oi").await.unwrap();

        assert_eq!(dynamic.name(), "recording");
        assert_eq!(channel.texts(), vec!["oi".to_string()]);
    }

    #[tokio::test]
    async fn media_is_unsupported_by_default() {
        let channel: Arc<dyn OutboundChannelDyn> = Arc::new(TextOnlyChannel);
        let media = OutboundMedia {
            url: "https://cdn.example/a.png".into(),
            mediatype: "image".into(),
            caption: None,
        };
        let error = channel
            .send_media(&ContactKey::new("1", "loja"), &media)
            .await
            .unwrap_err();

        assert!(error.to_string().contains("does not support media"));
    }
}
