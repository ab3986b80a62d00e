//! Top-level error types for zapbot.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Assistant(#[from] AssistantError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Contact(#[from] ContactError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Database connection and migration errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to connect to SQLite: {0}")]
    SqliteConnect(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors talking to the hosted assistant service.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("assistant request failed: {0}")]
    Request(String),

    #[error("assistant service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected assistant response: {0}")]
    Decode(String),

    #[error("run completed on thread {thread_id} without an assistant reply")]
    NoReply { thread_id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors talking to the outbound WhatsApp gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(String),

    #[error("gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Contact store errors.
#[derive(Debug, thiserror::Error)]
pub enum ContactError {
    #[error("contact {phone}@{instance} not found")]
    NotFound { phone: String, instance: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Audio transcription and image captioning errors.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("invalid base64 payload: {0}")]
    Decode(String),

    #[error("media request failed: {0}")]
    Request(String),

    #[error("media service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("media service returned no text")]
    Empty,
}
