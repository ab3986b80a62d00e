//! Evolution API gateway client: sends WhatsApp text and media messages.

use crate::ContactKey;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::messaging::traits::{OutboundChannel, OutboundMedia};
use anyhow::Context as _;
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct SendTextPayload<'a> {
    number: &'a str,
    text: &'a str,
    delay: u64,
}

#[derive(Serialize)]
struct SendMediaPayload<'a> {
    number: &'a str,
    mediatype: &'a str,
    media: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
    delay: u64,
}

/// Outbound channel backed by an Evolution API server. Every gateway
/// instance is reachable through the same server and credentials.
pub struct EvolutionGateway {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    send_delay_ms: u64,
}

impl EvolutionGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build gateway HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            send_delay_ms: config.send_delay_ms,
        })
    }

    fn endpoint(&self, action: &str, instance: &str) -> String {
        format!("{}/message/{action}/{instance}", self.base_url)
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> Result<()> {
        let response = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|error| GatewayError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        Ok(())
    }
}

impl OutboundChannel for EvolutionGateway {
    fn name(&self) -> &str {
        "evolution"
    }

    async fn send_text(&self, key: &ContactKey, text: &str) -> Result<()> {
        let payload = SendTextPayload {
            number: &key.phone,
            text,
            delay: self.send_delay_ms,
        };
        self.post(&self.endpoint("sendText", &key.instance), &payload)
            .await?;

        tracing::debug!(phone = %key.phone, instance = %key.instance, "text sent");
        Ok(())
    }

    async fn send_media(&self, key: &ContactKey, media: &OutboundMedia) -> Result<()> {
        let payload = SendMediaPayload {
            number: &key.phone,
            mediatype: &media.mediatype,
            media: &media.url,
            caption: media.caption.as_deref(),
            delay: self.send_delay_ms,
        };
        self.post(&self.endpoint("sendMedia", &key.instance), &payload)
            .await?;

        tracing::debug!(
            phone = %key.phone,
            instance = %key.instance,
            mediatype = %media.mediatype,
            "media sent"
        );
        Ok(())
    }

    /// The server root answers with its version banner when reachable.
    async fn health_check(&self) -> Result<()> {
        let response = self
            .http
            .get(&self.base_url)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|error| GatewayError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured {
        requests: Arc<Mutex<Vec<(String, String, Option<String>, serde_json::Value)>>>,
    }

    async fn capture(
        State(captured): State<Captured>,
        Path((action, instance)): Path<(String, String)>,
        headers: HeaderMap,
        axum::Json(body): axum::Json<serde_json::Value>,
    ) -> StatusCode {
        let apikey = headers
            .get("apikey")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let reject = body["text"] == "falha";
        captured
            .requests
            .lock()
            .push((action, instance, apikey, body));
        if reject {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::CREATED
        }
    }

    async fn spawn_gateway() -> (String, Captured) {
        let captured = Captured::default();
        let app = Router::new()
            .route("/", get(|| async { "Welcome to the Evolution API" }))
            .route("/message/{action}/{instance}", post(capture))
            .with_state(captured.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{address}/"), captured)
    }

    fn gateway(base_url: String) -> EvolutionGateway {
        EvolutionGateway::new(&GatewayConfig {
            base_url,
            api_key: "gw-key".into(),
            send_delay_ms: 1200,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn send_text_posts_number_text_and_delay() {
        let (base_url, captured) = spawn_gateway().await;
        let gateway = gateway(base_url);
        let key = ContactKey::new("5511999999999@s.whatsapp.net", "loja");

        gateway.send_text(&key, "Olá!").await.unwrap();

        let requests = captured.requests.lock();
        let (action, instance, apikey, body) = &requests[0];
        assert_eq!(action, "sendText");
        assert_eq!(instance, "loja");
        assert_eq!(apikey.as_deref(), Some("gw-key"));
        assert_eq!(
            body,
            &serde_json::json!({"number": "5511999999999", "text": "Olá!", "delay": 1200})
        );
    }

    #[tokio::test]
    async fn send_media_uses_media_endpoint() {
        let (base_url, captured) = spawn_gateway().await;
        let gateway = gateway(base_url);
        let media = OutboundMedia {
            url: "https://cdn.example/catalogo.pdf".into(),
            mediatype: "document".into(),
            caption: Some("Catálogo".into()),
        };

        gateway
            .send_media(&ContactKey::new("5511", "loja"), &media)
            .await
            .unwrap();

        let requests = captured.requests.lock();
        let (action, _, _, body) = &requests[0];
        assert_eq!(action, "sendMedia");
        assert_eq!(body["media"], "https://cdn.example/catalogo.pdf");
        assert_eq!(body["mediatype"], "document");
        assert_eq!(body["caption"], "Catálogo");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (base_url, _captured) = spawn_gateway().await;
        let gateway = gateway(base_url);

        let error = gateway
            .send_text(&ContactKey::new("5511", "loja"), "falha")
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            crate::Error::Gateway(GatewayError::Status { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn health_check_reaches_server_root() {
        let (base_url, _captured) = spawn_gateway().await;

        gateway(base_url).health_check().await.unwrap();
        gateway("http://127.0.0.1:9".into())
            .health_check()
            .await
            .unwrap_err();
    }
}
