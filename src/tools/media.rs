//! Media tool: send an image, video, audio or document to the contact.

use crate::error::Result;
use crate::messaging::{OutboundChannelDyn, OutboundMedia};
use crate::tools::{ToolContext, ToolHandler, ToolOutcome, parse_args};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SendMediaArgs {
    pub url: String,
    /// `image`, `video`, `audio` or `document`. Guessed from the URL when absent.
    pub mediatype: Option<String>,
    pub caption: Option<String>,
}

pub struct SendMediaTool {
    channel: Arc<dyn OutboundChannelDyn>,
}

impl SendMediaTool {
    pub const NAME: &'static str = "enviar_midia";

    pub fn new(channel: Arc<dyn OutboundChannelDyn>) -> Self {
        Self { channel }
    }
}

/// Media type from the file extension in a URL.
fn guess_mediatype(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let extension = path
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" | "mov" | "webm" | "3gp" => "video",
        "mp3" | "ogg" | "opus" | "m4a" | "wav" | "aac" => "audio",
        "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "csv" | "txt" | "zip" => {
            "document"
        }
        _ => "image",
    }
}

#[async_trait]
impl ToolHandler for SendMediaTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolOutcome> {
        let args: SendMediaArgs = parse_args(name, args)?;
        let url = args.url.trim();
        if url.is_empty() {
            return Ok(ToolOutcome::failure("URL da mídia não informada"));
        }

        let media = OutboundMedia {
            url: url.to_string(),
            mediatype: args
                .mediatype
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| guess_mediatype(url).to_string()),
            caption: args.caption.filter(|value| !value.trim().is_empty()),
        };

        match self.channel.send_media(&ctx.key, &media).await {
            Ok(()) => Ok(ToolOutcome::success("Mídia enviada")),
            Err(error) => {
                tracing::warn!(%error, phone = %ctx.key.phone, url = %media.url, "failed to send media");
                Ok(ToolOutcome::failure("Falha ao enviar mídia"))
            }
        }
    }
}
