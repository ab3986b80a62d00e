//! Turning inbound images and audio into text the assistant can read.

use crate::config::AssistantConfig;
use crate::error::{MediaError, Result};
use anyhow::Context as _;
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use std::time::Duration;

const CAPTION_PROMPT: &str = "Descreva detalhadamente esta imagem em português.";

/// Converts media payloads into text.
#[async_trait]
pub trait MediaInterpreter: Send + Sync {
    /// Describe a base64 JPEG image.
    async fn describe_image(&self, base64_jpeg: &str) -> Result<String>;

    /// Transcribe base64 audio.
    async fn transcribe_audio(&self, base64_audio: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Transcription {
    text: String,
}

/// Vision captions and Whisper transcription over the OpenAI HTTP API.
pub struct OpenAiMedia {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    vision_model: String,
    transcription_model: String,
}

impl OpenAiMedia {
    pub fn new(config: &AssistantConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("failed to build media HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            vision_model: config.vision_model.clone(),
            transcription_model: config.transcription_model.clone(),
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| MediaError::Request(error.to_string()))?;
        if !status.is_success() {
            return Err(MediaError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        serde_json::from_str(&body).map_err(|error| MediaError::Request(error.to_string()).into())
    }
}

fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|error| MediaError::Decode(error.to_string()))?;
    if bytes.is_empty() {
        return Err(MediaError::Empty.into());
    }
    Ok(bytes)
}

fn non_empty(text: Option<String>) -> Result<String> {
    text.map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| MediaError::Empty.into())
}

#[async_trait]
impl MediaInterpreter for OpenAiMedia {
    async fn describe_image(&self, base64_jpeg: &str) -> Result<String> {
        // Validate before paying for a request.
        decode_base64(base64_jpeg)?;

        let body = serde_json::json!({
            "model": self.vision_model,
            "max_tokens": 500,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": CAPTION_PROMPT },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/jpeg;base64,{}", base64_jpeg.trim()) }
                    }
                ]
            }]
        });

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|error| MediaError::Request(error.to_string()))?;

        let completion: ChatCompletion = Self::read_json(response).await?;
        non_empty(
            completion
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content),
        )
    }

    async fn transcribe_audio(&self, base64_audio: &str) -> Result<String> {
        let bytes = decode_base64(base64_audio)?;
        tracing::debug!(size = bytes.len(), "transcribing audio");

        let file = reqwest::multipart::Part::bytes(bytes)
            .file_name("audio.ogg")
            .mime_str("audio/ogg")
            .map_err(|error| MediaError::Request(error.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.transcription_model.clone())
            .part("file", file);

        let response = self
            .http
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .header("authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|error| MediaError::Request(error.to_string()))?;

        let transcription: Transcription = Self::read_json(response).await?;
        non_empty(Some(transcription.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::post;
    use std::collections::HashMap;

    async fn spawn_service() -> String {
        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(|axum::Json(body): axum::Json<serde_json::Value>| async move {
                    let model = body["model"].as_str().unwrap_or_default().to_string();
                    axum::Json(serde_json::json!({
                        "choices": [{"message": {"role": "assistant", "content": format!(" Um gato ({model}) ")}}]
                    }))
                }),
            )
            .route(
                "/v1/audio/transcriptions",
                post(|| async { axum::Json(serde_json::json!({"text": "quero um orçamento"})) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}")
    }

    fn media(base_url: String) -> OpenAiMedia {
        OpenAiMedia::new(&AssistantConfig {
            api_key: "sk-test".into(),
            base_url,
            identities: HashMap::new(),
            vision_model: "gpt-4o".into(),
            transcription_model: "whisper-1".into(),
        })
        .unwrap()
    }

    fn encoded(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn invalid_base64_is_a_decode_error() {
        let error = decode_base64("***").unwrap_err();
        assert!(matches!(error, crate::Error::Media(MediaError::Decode(_))));
        assert!(matches!(
            decode_base64("").unwrap_err(),
            crate::Error::Media(MediaError::Empty)
        ));
    }

    #[tokio::test]
    async fn image_caption_uses_vision_model() {
        let media = media(spawn_service().await);

        let caption = media.describe_image(&encoded(b"\xff\xd8jpeg")).await.unwrap();

        assert_eq!(caption, "Um gato (gpt-4o)");
    }

    #[tokio::test]
    async fn audio_is_transcribed() {
        let media = media(spawn_service().await);

        let text = media.transcribe_audio(&encoded(b"OggS....")).await.unwrap();

        assert_eq!(text, "quero um orçamento");
    }
}
