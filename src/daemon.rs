//! Tracing setup and process wiring for the relay service.

use crate::api::{self, ApiState};
use crate::assistant::{AssistantClient, ConversationDriver, OpenAiAssistantClient};
use crate::config::Config;
use crate::contacts::{ContactStore, SqliteContactStore};
use crate::db;
use crate::media::{MediaInterpreter, OpenAiMedia};
use crate::messaging::{DispatchSink, EvolutionGateway, OutboundChannelDyn};
use crate::relay::{Debouncer, TurnPipeline};
use crate::tools::ToolRegistry;

use anyhow::Context as _;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

const MAX_MESSAGE_CHARS: usize = 280;

fn truncate_for_log(message: &str, max_chars: usize) -> (&str, bool) {
    match message.char_indices().nth(max_chars) {
        Some((byte_index, _character)) => (&message[..byte_index], true),
        None => (message, false),
    }
}

/// Writes one event field, cutting the `message` field short so whole
/// assistant replies don't flood the log.
fn write_field(
    writer: &mut format::Writer<'_>,
    field: &tracing::field::Field,
    value: &dyn fmt::Debug,
) -> fmt::Result {
    let field_name = field.name();
    if field_name == "message" {
        let formatted = format!("{value:?}");
        let (truncated, was_truncated) = truncate_for_log(&formatted, MAX_MESSAGE_CHARS);
        if was_truncated {
            write!(writer, "{field_name}={truncated}...")
        } else {
            write!(writer, "{field_name}={formatted}")
        }
    } else {
        write!(writer, "{field_name}={value:?}")
    }
}

fn build_env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    if debug {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Initialize tracing: compact output on stdout plus a daily-rolling file
/// under `log_dir`. The returned guard flushes the file writer on drop and
/// must be held for the life of the process.
pub fn init_tracing(log_dir: &Path, debug: bool) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "zapbot.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .fmt_fields(format::debug_fn(write_field))
        .compact();
    let stdout_layer = tracing_subscriber::fmt::layer()
        .fmt_fields(format::debug_fn(write_field))
        .compact();

    tracing_subscriber::registry()
        .with(build_env_filter(debug))
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Build every component from `config` and serve the webhook until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let pool = db::connect(&config.sqlite_path())
        .await
        .context("failed to connect to database")?;
    tracing::info!(path = %config.sqlite_path().display(), "database ready");

    let contacts: Arc<dyn ContactStore> = Arc::new(SqliteContactStore::new(
        pool.clone(),
        config.contacts.default_stage.clone(),
    ));
    let gateway: Arc<dyn OutboundChannelDyn> = Arc::new(EvolutionGateway::new(&config.gateway)?);
    if let Err(error) = gateway.health_check().await {
        tracing::warn!(%error, base_url = %config.gateway.base_url, "gateway not reachable at startup");
    }
    let assistant: Arc<dyn AssistantClient> =
        Arc::new(OpenAiAssistantClient::new(&config.assistant)?);
    let media: Arc<dyn MediaInterpreter> = Arc::new(OpenAiMedia::new(&config.assistant)?);

    let tools = Arc::new(ToolRegistry::standard(
        gateway.clone(),
        contacts.clone(),
        &config.tools,
    )?);
    let driver = ConversationDriver::new(assistant.clone(), tools, config.driver);
    let sink = DispatchSink::new(gateway, config.dispatch);
    let pipeline = Arc::new(TurnPipeline::new(
        contacts.clone(),
        driver,
        config.assistant.clone(),
        config.chunker,
        sink,
    ));
    let debouncer = Debouncer::new(pipeline, config.debounce);

    let state = Arc::new(ApiState {
        contacts,
        assistant,
        media,
        debouncer: debouncer.clone(),
        cooldown: chrono::Duration::hours(config.contacts.cooldown_hours),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = api::start_http_server(config.api.bind, state, shutdown_rx)
        .await
        .with_context(|| format!("failed to bind HTTP server to {}", config.api.bind))?;

    tracing::info!("zapbot started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    stop(shutdown_tx, server, &debouncer).await;
    pool.close().await;

    tracing::info!("zapbot stopped");
    Ok(())
}

/// Stop accepting webhooks, wait for in-flight requests, then discard the
/// bursts still pending. In-flight requests may enqueue until the server
/// has drained.
async fn stop(shutdown_tx: watch::Sender<bool>, server: JoinHandle<()>, debouncer: &Debouncer) {
    shutdown_tx.send(true).ok();
    if let Err(error) = server.await {
        tracing::warn!(%error, "HTTP server task failed");
    }

    let pending = debouncer.registry().live_task_count();
    debouncer.shutdown();
    if pending > 0 {
        tracing::info!(pending, "pending bursts discarded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::idle_debouncer;
    use crate::assistant::driver::testing::FakeAssistant;
    use crate::contacts::testing::MemoryContactStore;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Captions arrive late enough for shutdown to begin mid-request.
    struct SlowMedia;

    #[async_trait]
    impl MediaInterpreter for SlowMedia {
        async fn describe_image(&self, _base64_jpeg: &str) -> crate::Result<String> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok("Um tênis azul".into())
        }

        async fn transcribe_audio(&self, _base64_audio: &str) -> crate::Result<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn bursts_admitted_while_draining_are_discarded() {
        let debouncer = idle_debouncer();
        let state = Arc::new(ApiState {
            contacts: Arc::new(MemoryContactStore::default()),
            assistant: Arc::new(FakeAssistant::replying("Olá!")),
            media: Arc::new(SlowMedia),
            debouncer: debouncer.clone(),
            cooldown: chrono::Duration::hours(24),
        });
        let address = {
            let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            free.local_addr().unwrap()
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = api::start_http_server(address, state, shutdown_rx)
            .await
            .unwrap();

        let request = tokio::spawn(async move {
            reqwest::Client::new()
                .post(format!("http://{address}/webhook"))
                .json(&serde_json::json!({
                    "event": "messages.upsert",
                    "instance": "loja",
                    "data": {
                        "key": {"remoteJid": "5511999999999@s.whatsapp.net", "fromMe": false},
                        "pushName": "Maria",
                        "messageType": "imageMessage",
                        "message": {"imageMessage": {"jpegThumbnail": "/9j/4AAQ"}}
                    }
                }))
                .send()
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        stop(shutdown_tx, server, &debouncer).await;

        let response = request.await.unwrap().unwrap();
        assert!(response.status().is_success());
        assert!(debouncer.registry().is_empty());
        assert_eq!(debouncer.registry().live_task_count(), 0);
    }

    #[test]
    fn truncate_for_log_handles_multibyte_characters() {
        let message = "olá→mundo";
        let (truncated, was_truncated) = truncate_for_log(message, 4);

        assert!(was_truncated);
        assert_eq!(truncated, "olá→");
    }

    #[test]
    fn truncate_for_log_returns_original_when_within_limit() {
        let (truncated, was_truncated) = truncate_for_log("Oi", 10);

        assert!(!was_truncated);
        assert_eq!(truncated, "Oi");
    }
}
