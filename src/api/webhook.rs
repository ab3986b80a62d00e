//! Inbound gateway webhook. Admits `messages.upsert` events into the relay
//! as debounced text fragments.

use super::server::ApiState;
use crate::contacts::Contact;
use crate::error::{ContactError, Result};
use crate::{ContactKey, InboundMessage, MessageContent};

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const UPSERT_EVENT: &str = "messages.upsert";

const IMAGE_FALLBACK: &str = "O usuário enviou uma imagem que não foi possível processar.";
const AUDIO_FALLBACK: &str = "O usuário enviou um áudio que não foi possível transcrever.";

#[derive(Deserialize)]
pub(super) struct WebhookPayload {
    event: String,
    #[serde(default)]
    instance: String,
    data: Option<UpsertData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertData {
    key: MessageKey,
    #[serde(default)]
    push_name: Option<String>,
    #[serde(default)]
    message_type: String,
    #[serde(default)]
    message: Option<MessageBody>,
    #[serde(default)]
    message_timestamp: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageKey {
    remote_jid: String,
    #[serde(default)]
    from_me: bool,
    #[serde(default)]
    id: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MessageBody {
    conversation: Option<String>,
    image_message: Option<ImageMessage>,
    /// Inline media payload; the gateway puts audio here.
    base64: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageMessage {
    jpeg_thumbnail: Option<String>,
}

impl UpsertData {
    fn into_inbound(self, instance: &str) -> InboundMessage {
        let body = self.message.unwrap_or_default();
        let content = match self.message_type.as_str() {
            "conversation" => MessageContent::Text(body.conversation.unwrap_or_default()),
            "imageMessage" => MessageContent::Image {
                thumbnail: body.image_message.and_then(|image| image.jpeg_thumbnail),
            },
            "audioMessage" => MessageContent::Audio { data: body.base64 },
            other => MessageContent::Unsupported(other.to_string()),
        };

        InboundMessage {
            id: self.key.id,
            key: ContactKey::new(&self.key.remote_jid, instance),
            push_name: self.push_name.unwrap_or_default(),
            from_me: self.key.from_me,
            content,
            timestamp: self
                .message_timestamp
                .and_then(|seconds| chrono::DateTime::from_timestamp(seconds, 0))
                .unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct WebhookResponse {
    success: bool,
    message: &'static str,
}

impl WebhookResponse {
    fn accepted(message: &'static str) -> Self {
        Self {
            success: true,
            message,
        }
    }

    fn rejected(message: &'static str) -> Self {
        Self {
            success: false,
            message,
        }
    }
}

pub(super) async fn receive(
    State(state): State<Arc<ApiState>>,
    Json(payload): Json<WebhookPayload>,
) -> std::result::Result<Json<WebhookResponse>, StatusCode> {
    if payload.event != UPSERT_EVENT {
        return Ok(Json(WebhookResponse::accepted("Evento ignorado")));
    }
    let Some(data) = payload.data else {
        tracing::warn!(instance = %payload.instance, "upsert event without data");
        return Err(StatusCode::BAD_REQUEST);
    };

    let message = data.into_inbound(&payload.instance);
    admit(&state, message).await.map(Json).map_err(|error| {
        tracing::error!(%error, "webhook processing failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn admit(state: &ApiState, message: InboundMessage) -> Result<WebhookResponse> {
    let key = &message.key;

    if message.from_me {
        record_operator_reply(state, &message).await?;
        return Ok(WebhookResponse::rejected("Mensagem do usuário"));
    }

    let contact = upsert_contact(state, &message).await?;
    let now = Utc::now();
    if !contact.is_answerable(now) {
        tracing::info!(
            phone = %key.phone,
            instance = %key.instance,
            status = %contact.effective_status(now),
            "message from suppressed contact dropped"
        );
        return Ok(WebhookResponse::rejected("Contato não está ativo"));
    }

    let text = match &message.content {
        MessageContent::Text(text) => text.trim().to_string(),
        MessageContent::Image { thumbnail } => describe_image(state, thumbnail.as_deref()).await,
        MessageContent::Audio { data } => transcribe_audio(state, data.as_deref()).await,
        MessageContent::Unsupported(kind) => {
            tracing::warn!(phone = %key.phone, kind = %kind, "unsupported message type");
            return Ok(WebhookResponse::rejected("Tipo de mensagem não suportado"));
        }
    };
    if text.is_empty() {
        return Ok(WebhookResponse::rejected("Mensagem vazia"));
    }

    if state.debouncer.enqueue(key.clone(), text) {
        Ok(WebhookResponse::accepted("Mensagem adicionada à fila"))
    } else {
        Ok(WebhookResponse::accepted("Mensagem adicionada à fila existente"))
    }
}

/// The business account answered by hand: the bot backs off and drops
/// whatever it was about to answer.
async fn record_operator_reply(state: &ApiState, message: &InboundMessage) -> Result<()> {
    let key = &message.key;
    if state.contacts.get_contact(key).await?.is_none() {
        create_contact(state, message).await?;
    }

    let until = Utc::now() + state.cooldown;
    state.contacts.enter_cooldown(key, until).await?;
    state.debouncer.cancel(key);

    tracing::info!(phone = %key.phone, instance = %key.instance, %until, "operator replied, contact in cooldown");
    Ok(())
}

async fn upsert_contact(state: &ApiState, message: &InboundMessage) -> Result<Contact> {
    match state.contacts.get_contact(&message.key).await? {
        Some(contact) => {
            state.contacts.touch(&message.key, &message.push_name).await?;
            Ok(contact)
        }
        None => create_contact(state, message).await,
    }
}

/// Insert the contact, then open its assistant thread. When a concurrent
/// request inserted it first, that request owns the thread and this one
/// reads the stored row.
async fn create_contact(state: &ApiState, message: &InboundMessage) -> Result<Contact> {
    let key = &message.key;
    let name = match message.push_name.trim() {
        "" => format!("User {}", key.phone),
        name => name.to_string(),
    };

    let Some(mut contact) = state.contacts.create_contact(key, &name, None).await? else {
        return state.contacts.get_contact(key).await?.ok_or_else(|| {
            ContactError::NotFound {
                phone: key.phone.clone(),
                instance: key.instance.clone(),
            }
            .into()
        });
    };

    match state.assistant.create_thread().await {
        Ok(thread) => {
            state.contacts.set_thread_ref(key, &thread).await?;
            contact.thread_id = Some(thread);
        }
        Err(error) => {
            // The first turn creates the thread instead.
            tracing::warn!(%error, phone = %key.phone, "failed to create assistant thread");
        }
    }
    Ok(contact)
}

async fn describe_image(state: &ApiState, thumbnail: Option<&str>) -> String {
    let Some(thumbnail) = thumbnail.filter(|data| !data.is_empty()) else {
        tracing::info!("image without thumbnail");
        return IMAGE_FALLBACK.to_string();
    };
    match state.media.describe_image(thumbnail).await {
        Ok(caption) => format!("O usuário enviou uma imagem. Descrição da imagem: {caption}"),
        Err(error) => {
            tracing::error!(%error, "image captioning failed");
            IMAGE_FALLBACK.to_string()
        }
    }
}

async fn transcribe_audio(state: &ApiState, data: Option<&str>) -> String {
    let Some(data) = data.filter(|data| !data.is_empty()) else {
        tracing::info!("audio without inline payload");
        return AUDIO_FALLBACK.to_string();
    };
    match state.media.transcribe_audio(data).await {
        Ok(text) => format!("O usuário enviou um áudio. Transcrição do áudio: {text}"),
        Err(error) => {
            tracing::error!(%error, "audio transcription failed");
            AUDIO_FALLBACK.to_string()
        }
    }
}
