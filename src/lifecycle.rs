//! Connection lifecycle: one persistent transport session per process.
//!
//! Owns the `Session` record and drives the state machine over transport
//! events. Reconnects use class-dependent backoff, pairing is bounded, and
//! session switch/reset fully closes the previous connection (and cancels
//! its pending reconnect timer) before anything new is established.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::session::{CloseClass, Session, MAX_PAIRING_ATTEMPTS, MAX_RECONNECT_ATTEMPTS};
use crate::traits::{CloseFrame, CredentialStore, Transport, TransportEvent};
use crate::types::{InboundMessage, SessionStatus};

/// Store key of the bootstrap credential record.
pub const BOOTSTRAP_KEY: &str = "creds";

pub struct ConnectionLifecycleManager {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    session: Mutex<Session>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl ConnectionLifecycleManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        session_id: &str,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            store,
            session: Mutex::new(Session::new(session_id.to_string())),
            inbound_tx,
        })
    }

    // ------------------------------------------------------------------
    // Public contract
    // ------------------------------------------------------------------

    pub async fn status(&self) -> SessionStatus {
        self.session.lock().await.status
    }

    pub async fn pairing_challenge(&self) -> Option<String> {
        self.session.lock().await.pairing_code.clone()
    }

    pub async fn session_id(&self) -> String {
        self.session.lock().await.id.clone()
    }

    pub async fn list_known_sessions(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.store.list_sessions().await?)
    }

    /// Connect on startup if a bootstrap credential exists; otherwise stay
    /// disconnected until an operator issues an explicit start.
    pub async fn init(self: &Arc<Self>) -> anyhow::Result<()> {
        let id = self.session_id().await;
        let bootstrap = self.store.read(&id, BOOTSTRAP_KEY).await?;
        if bootstrap.is_some() {
            self.connect().await
        } else {
            let mut session = self.session.lock().await;
            session.status = SessionStatus::Disconnected;
            info!(session_id = %session.id, "no stored credentials; waiting for operator start");
            Ok(())
        }
    }

    /// Operator-initiated start. Errors when the session is already live.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        {
            let mut session = self.session.lock().await;
            if session.status == SessionStatus::Connected {
                anyhow::bail!("already connected");
            }
            // Explicit operator restart: pairing attempts start over.
            session.pairing_attempts = 0;
        }
        self.connect().await
    }

    /// Send a text payload over the live connection.
    pub async fn send(&self, destination: &str, text: &str) -> anyhow::Result<()> {
        let link = self.session.lock().await.link.clone();
        match link {
            Some(link) => link.send(destination, text).await,
            None => anyhow::bail!("no live connection for session"),
        }
    }

    /// Log the account out. The transport acknowledges with a close event
    /// carrying the logged-out code, which terminates the session.
    pub async fn logout(&self) -> anyhow::Result<()> {
        let link = self.session.lock().await.link.clone();
        match link {
            Some(link) => link.logout().await,
            None => anyhow::bail!("no live connection for session"),
        }
    }

    /// Rebind to another session id. The current connection (and any pending
    /// reconnect timer) is fully torn down before the new context exists.
    /// Switching to the active id is a no-op success.
    pub async fn switch_session(self: &Arc<Self>, new_id: &str) -> anyhow::Result<()> {
        let (current, link) = {
            let mut session = self.session.lock().await;
            if session.id == new_id {
                return Ok(());
            }
            session.cancel_reconnect_timer();
            (session.id.clone(), session.link.take())
        };
        if let Some(link) = link {
            link.end().await?;
        }
        info!(from = %current, to = %new_id, "switched session");
        self.session.lock().await.rebind(new_id.to_string());
        self.init().await
    }

    /// Wipe a session's credentials and, when it is the active one, tear
    /// down the connection and reconnect from scratch. Always yields a
    /// fresh pairing challenge for the active session.
    pub async fn reset_session(self: &Arc<Self>, id: Option<&str>) -> anyhow::Result<()> {
        let current = self.session_id().await;
        let target = id.unwrap_or(&current).to_string();
        self.store.wipe(&target).await?;
        if target != current {
            info!(session_id = %target, "wiped credentials of inactive session");
            return Ok(());
        }
        let link = {
            let mut session = self.session.lock().await;
            session.cancel_reconnect_timer();
            session.link.take()
        };
        if let Some(link) = link {
            if let Err(e) = link.end().await {
                warn!("error closing connection during reset: {e}");
            }
        }
        self.session.lock().await.rebind(target);
        self.connect().await
    }

    // ------------------------------------------------------------------
    // Connection establishment
    // ------------------------------------------------------------------

    // Returns an explicitly-boxed `Send` future rather than an `async fn`:
    // `connect` is part of a recursive async cycle (connect → handle_drop →
    // schedule_reconnect → spawned timer task → connect) that is also
    // `tokio::spawn`ed, so the compiler needs a concrete `Send` boundary on
    // each back-edge to this function to prove the spawned future is `Send`.
    fn connect<'a>(
        self: &'a Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
        // One live connection per session id: close any leftover link and
        // invalidate outstanding callbacks before dialing.
        let (id, old_link) = {
            let mut session = self.session.lock().await;
            session.cancel_reconnect_timer();
            (session.id.clone(), session.link.take())
        };
        if let Some(link) = old_link {
            if let Err(e) = link.end().await {
                warn!("error closing previous connection: {e}");
            }
        }

        // Read the resume blob before touching session state so a store
        // failure leaves the machine where it was.
        let resume = self.store.read(&id, BOOTSTRAP_KEY).await?;

        let epoch = {
            let mut session = self.session.lock().await;
            session.epoch += 1;
            session.status = SessionStatus::Connecting;
            session.epoch
        };
        info!(session_id = %id, resumed = resume.is_some(), "connecting");

        match self.transport.connect(&id, resume).await {
            Ok(conn) => {
                let stale = {
                    let mut session = self.session.lock().await;
                    if session.epoch == epoch {
                        session.link = Some(conn.link.clone());
                        false
                    } else {
                        true
                    }
                };
                if stale {
                    // The session was switched or reset while we were
                    // dialing; this connection must not survive it.
                    let _ = conn.link.end().await;
                    anyhow::bail!("session context changed during connect");
                }
                self.spawn_event_loop(conn.events, epoch);
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %id, "transport connect failed: {e}");
                // Treat like a transient drop so the retry policy applies.
                self.handle_drop(CloseClass::Transient, &id).await;
                Err(e)
            }
        }
        })
    }

    fn spawn_event_loop(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        epoch: u64,
    ) {
        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !mgr.epoch_is_current(epoch).await {
                    break;
                }
                match event {
                    TransportEvent::PairingChallenge(code) => {
                        mgr.on_pairing_challenge(code).await;
                    }
                    TransportEvent::Open => mgr.on_open().await,
                    TransportEvent::Credentials { key, value } => {
                        mgr.on_credentials(&key, &value).await;
                    }
                    TransportEvent::Inbound(msg) => {
                        if mgr.inbound_tx.send(msg).await.is_err() {
                            warn!("inbound consumer gone; dropping message");
                        }
                    }
                    TransportEvent::Close(frame) => {
                        mgr.on_close(frame).await;
                        break;
                    }
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------

    async fn on_pairing_challenge(self: &Arc<Self>, code: String) {
        let (exhausted, link) = {
            let mut session = self.session.lock().await;
            session.pairing_attempts += 1;
            if session.pairing_attempts > MAX_PAIRING_ATTEMPTS {
                // Terminal sub-state: no automatic reconnect. Only an
                // explicit operator start or reset leaves it.
                session.pairing_code = None;
                session.status = SessionStatus::Disconnected;
                (true, session.link.take())
            } else {
                info!(attempt = session.pairing_attempts, "pairing challenge received");
                session.pairing_code = Some(code);
                session.status = SessionStatus::AwaitingPairing;
                (false, None)
            }
        };
        if exhausted {
            warn!("pairing attempts exhausted; operator restart required");
            if let Some(link) = link {
                if let Err(e) = link.end().await {
                    warn!("error closing connection after pairing abort: {e}");
                }
            }
        }
    }

    async fn on_open(&self) {
        let mut session = self.session.lock().await;
        session.note_connected();
        info!(session_id = %session.id, "connected");
    }

    async fn on_credentials(&self, key: &str, value: &[u8]) {
        let id = self.session_id().await;
        if let Err(e) = self.store.write(&id, key, value).await {
            // Isolated: the connection stays up, the blob is retried on the
            // transport's next credential push.
            error!(session_id = %id, key, "failed to persist credentials: {e}");
        }
    }

    async fn on_close(self: &Arc<Self>, frame: CloseFrame) {
        let class = CloseClass::from_code(frame.code);
        let id = self.session_id().await;
        info!(
            session_id = %id,
            code = frame.code,
            reason = %frame.reason,
            class = ?class,
            "connection closed"
        );
        match class {
            CloseClass::ManualLogout => {
                if let Err(e) = self.store.wipe(&id).await {
                    error!("credential wipe failed; logout transition aborted: {e}");
                    return;
                }
                let mut session = self.session.lock().await;
                session.cancel_reconnect_timer();
                session.link = None;
                session.pairing_code = None;
                session.status = SessionStatus::Terminated;
                info!(session_id = %session.id, "manual logout; session terminated");
            }
            CloseClass::InvalidSession => {
                if let Err(e) = self.store.wipe(&id).await {
                    error!("credential wipe failed; close transition aborted: {e}");
                    return;
                }
                self.handle_drop(class, &id).await;
            }
            CloseClass::Transient => self.handle_drop(class, &id).await,
        }
    }

    /// Shared tail of the two reconnecting close branches: count the
    /// attempt, force a full reset past the cap, otherwise back off and
    /// schedule the retry.
    async fn handle_drop(self: &Arc<Self>, class: CloseClass, id: &str) {
        let (attempt, exceeded) = {
            let mut session = self.session.lock().await;
            session.reconnect_attempts += 1;
            (
                session.reconnect_attempts,
                session.reconnect_attempts > MAX_RECONNECT_ATTEMPTS,
            )
        };
        if exceeded {
            self.force_full_reset(id).await;
            return;
        }
        let (delay_ms, epoch) = {
            let mut session = self.session.lock().await;
            session.link = None;
            session.pairing_code = None;
            session.status = SessionStatus::Disconnected;
            (session.next_reconnect_delay(class), session.epoch)
        };
        info!(delay_ms, attempt, "reconnect scheduled");
        self.schedule_reconnect(delay_ms, epoch).await;
    }

    /// Too many consecutive failures: wipe, reset every counter to base and
    /// start over with a fresh pairing.
    async fn force_full_reset(self: &Arc<Self>, id: &str) {
        warn!(session_id = %id, "reconnect attempts exhausted; forcing full session reset");
        if let Err(e) = self.store.wipe(id).await {
            error!("credential wipe failed; full reset aborted: {e}");
            return;
        }
        {
            let mut session = self.session.lock().await;
            let id = session.id.clone();
            session.rebind(id);
        }
        // Boxed: connect → handle_drop → force_full_reset recurses.
        if let Err(e) = Box::pin(self.connect()).await {
            warn!("reconnect after full reset failed: {e}");
        }
    }

    async fn schedule_reconnect(self: &Arc<Self>, delay_ms: u64, epoch: u64) {
        let mgr = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            mgr.reconnect_timer_fired(epoch).await;
        });
        let mut session = self.session.lock().await;
        session.cancel_reconnect_timer();
        session.reconnect_timer = Some(handle);
    }

    async fn reconnect_timer_fired(self: &Arc<Self>, epoch: u64) {
        {
            // Clear our own handle without aborting (we are that task) and
            // bail if the session context was switched or reset meanwhile.
            let mut session = self.session.lock().await;
            if session.epoch != epoch {
                return;
            }
            session.reconnect_timer = None;
        }
        if let Err(e) = self.connect().await {
            warn!("reconnect attempt failed: {e}");
        }
    }

    async fn epoch_is_current(&self, epoch: u64) -> bool {
        self.session.lock().await.epoch == epoch
    }
}
