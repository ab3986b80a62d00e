//! zapbot: a WhatsApp relay that coalesces bursts of inbound messages per
//! contact, runs them through a hosted assistant conversation, and sends the
//! reply back as a paced sequence of WhatsApp-sized messages.

pub mod api;
pub mod assistant;
pub mod chunker;
pub mod config;
pub mod contacts;
pub mod daemon;
pub mod db;
pub mod error;
pub mod media;
pub mod messaging;
pub mod relay;
pub mod tools;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Identity of one debounce/conversation stream: a phone number within a
/// gateway instance (tenant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactKey {
    pub phone: String,
    pub instance: String,
}

impl ContactKey {
    /// Build a key from a raw WhatsApp JID or bare number. Anything after `@`
    /// (e.g. `@s.whatsapp.net`) is dropped.
    pub fn new(phone: impl AsRef<str>, instance: impl Into<String>) -> Self {
        let phone = phone.as_ref();
        let phone = phone.split('@').next().unwrap_or(phone).trim();
        Self {
            phone: phone.to_string(),
            instance: instance.into(),
        }
    }
}

impl std::fmt::Display for ContactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.phone, self.instance)
    }
}

/// Inbound message from the WhatsApp gateway, after webhook parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub key: ContactKey,
    /// Display name the sender has set on WhatsApp. May be empty.
    pub push_name: String,
    /// True when the message was sent from the business account itself
    /// (an operator answering by hand).
    pub from_me: bool,
    pub content: MessageContent,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Message content variants the relay understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageContent {
    Text(String),
    Image {
        /// Base64 JPEG thumbnail delivered inline by the gateway.
        thumbnail: Option<String>,
    },
    Audio {
        /// Base64 audio payload delivered inline by the gateway.
        data: Option<String>,
    },
    /// Any other gateway message type, carried by name for logging.
    Unsupported(String),
}

/// One send-ready piece of an assistant reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageChunk {
    pub text: String,
    /// 1-indexed position within the reply.
    pub position: usize,
    pub total: usize,
}

impl MessageChunk {
    /// Number a split reply into chunks.
    pub fn sequence(parts: Vec<String>) -> Vec<MessageChunk> {
        let total = parts.len();
        parts
            .into_iter()
            .enumerate()
            .map(|(index, text)| MessageChunk {
                text,
                position: index + 1,
                total,
            })
            .collect()
    }
}
