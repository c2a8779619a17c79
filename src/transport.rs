//! Transport over a protocol gateway.
//!
//! The messaging wire protocol itself (handshake, multi-device sync,
//! encryption) lives in an external gateway process. This module speaks to
//! that gateway: a WebSocket delivers events as JSON frames, HTTP carries
//! outbound sends. The rest of the daemon only ever sees the `Transport`
//! trait.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use futures::stream::StreamExt;
use futures::SinkExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::traits::{
    CloseFrame, Transport, TransportConnection, TransportEvent, TransportLink,
};
use crate::types::InboundMessage;

/// Synthetic close code when the stream dies without a close frame.
const CODE_STREAM_LOST: u16 = 408;

pub struct GatewayTransport {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GatewayTransport {
    pub fn new(cfg: &GatewayConfig) -> Arc<Self> {
        Arc::new(Self {
            http: reqwest::Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        })
    }

    /// Ask the gateway to open the session and hand back a WebSocket URL.
    async fn open_session(
        &self,
        session_id: &str,
        resume: Option<Vec<u8>>,
    ) -> anyhow::Result<String> {
        let resume_b64 =
            resume.map(|blob| base64::engine::general_purpose::STANDARD.encode(blob));
        let resp = self
            .http
            .post(format!("{}/v1/sessions/{}/open", self.base_url, session_id))
            .bearer_auth(&self.api_key)
            .json(&json!({ "resume": resume_b64 }))
            .send()
            .await?
            .error_for_status()?;
        let body: Value = resp.json().await?;
        body.get("url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("no websocket url in gateway open response"))
    }
}

/// Translate one gateway JSON frame into a transport event.
fn parse_frame(frame: &Value) -> Option<TransportEvent> {
    match frame.get("type").and_then(|v| v.as_str())? {
        "pairing" => {
            let code = frame.get("code")?.as_str()?;
            Some(TransportEvent::PairingChallenge(code.to_string()))
        }
        "open" => Some(TransportEvent::Open),
        "close" => {
            let code = frame.get("code").and_then(|v| v.as_u64()).unwrap_or(0) as u16;
            let reason = frame
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            Some(TransportEvent::Close(CloseFrame { code, reason }))
        }
        "creds" => {
            let key = frame.get("key")?.as_str()?.to_string();
            let value = base64::engine::general_purpose::STANDARD
                .decode(frame.get("value")?.as_str()?)
                .ok()?;
            Some(TransportEvent::Credentials { key, value })
        }
        "message" => {
            let sender = frame.get("sender")?.as_str()?.to_string();
            let chat = frame.get("chat")?.as_str()?.to_string();
            let text = frame.get("text")?.as_str()?.to_string();
            // Older gateways omit the flag; the address says it anyway.
            let is_group = frame
                .get("group")
                .and_then(|v| v.as_bool())
                .unwrap_or_else(|| crate::session::is_group_address(&chat));
            Some(TransportEvent::Inbound(InboundMessage {
                sender,
                chat,
                text,
                is_group,
            }))
        }
        other => {
            debug!(frame_type = other, "ignoring unknown gateway frame");
            None
        }
    }
}

#[async_trait]
impl Transport for GatewayTransport {
    async fn connect(
        &self,
        session_id: &str,
        resume: Option<Vec<u8>>,
    ) -> anyhow::Result<TransportConnection> {
        let wss_url = self.open_session(session_id, resume).await?;
        info!(session_id, "gateway session opened");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&wss_url)
            .await
            .map_err(|e| anyhow::anyhow!("websocket connect failed: {e}"))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let (events_tx, events_rx) = mpsc::channel(64);
        let (closed_tx, closed_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let link = Arc::new(GatewayLink {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            session_id: session_id.to_string(),
            cancel: cancel.clone(),
            closed_rx,
        });

        // Event pump: translate frames until the stream ends, a close frame
        // arrives, or the link is cancelled from our side.
        tokio::spawn(async move {
            let mut sent_close = false;
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = ws_tx.send(tokio_tungstenite::tungstenite::Message::Close(None)).await;
                        break;
                    }
                    msg = ws_rx.next() => msg,
                };
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("websocket read error: {e}");
                        break;
                    }
                    None => break,
                };
                match msg {
                    tokio_tungstenite::tungstenite::Message::Text(text) => {
                        let frame: Value = match serde_json::from_str(&text) {
                            Ok(v) => v,
                            Err(e) => {
                                warn!("unparseable gateway frame: {e}");
                                continue;
                            }
                        };
                        if let Some(event) = parse_frame(&frame) {
                            let is_close = matches!(event, TransportEvent::Close(_));
                            if events_tx.send(event).await.is_err() {
                                break;
                            }
                            if is_close {
                                sent_close = true;
                                break;
                            }
                        }
                    }
                    tokio_tungstenite::tungstenite::Message::Ping(data) => {
                        let _ = ws_tx
                            .send(tokio_tungstenite::tungstenite::Message::Pong(data))
                            .await;
                    }
                    tokio_tungstenite::tungstenite::Message::Close(_) => break,
                    _ => {}
                }
            }
            if !sent_close && !cancel.is_cancelled() {
                // The stream died underneath us: surface it as a transient
                // close so the reconnect policy kicks in.
                let _ = events_tx
                    .send(TransportEvent::Close(CloseFrame {
                        code: CODE_STREAM_LOST,
                        reason: "stream ended".into(),
                    }))
                    .await;
            }
            let _ = closed_tx.send(true);
        });

        Ok(TransportConnection {
            events: events_rx,
            link,
        })
    }
}

pub struct GatewayLink {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    session_id: String,
    cancel: CancellationToken,
    closed_rx: watch::Receiver<bool>,
}

#[async_trait]
impl TransportLink for GatewayLink {
    async fn send(&self, destination: &str, text: &str) -> anyhow::Result<()> {
        self.http
            .post(format!(
                "{}/v1/sessions/{}/messages",
                self.base_url, self.session_id
            ))
            .bearer_auth(&self.api_key)
            .json(&json!({ "destination": destination, "text": text }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn end(&self) -> anyhow::Result<()> {
        self.cancel.cancel();
        let mut closed = self.closed_rx.clone();
        while !*closed.borrow() {
            if closed.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn logout(&self) -> anyhow::Result<()> {
        self.http
            .post(format!(
                "{}/v1/sessions/{}/logout",
                self.base_url, self.session_id
            ))
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
