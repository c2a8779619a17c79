//! The owned `Session` record and the pure pieces of the reconnect policy.
//!
//! Everything here is mutated only from inside
//! `ConnectionLifecycleManager`'s own event handlers and timer callbacks;
//! other components observe it through the manager's accessors.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::traits::TransportLink;
use crate::types::SessionStatus;

/// Base reconnect delay after a drop.
pub const BASE_RECONNECT_DELAY_MS: u64 = 3_000;
/// Soft-backoff ceiling for transient drops.
pub const TRANSIENT_DELAY_CAP_MS: u64 = 30_000;
/// Hard-backoff ceiling for invalid-session drops.
pub const INVALID_DELAY_CAP_MS: u64 = 60_000;
/// Pairing challenges allowed before the connection attempt is abandoned.
pub const MAX_PAIRING_ATTEMPTS: u32 = 3;
/// Reconnects allowed before the session is force-reset from scratch.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Transport status code for an operator-initiated logout.
pub const CODE_LOGGED_OUT: u16 = 401;
/// Status codes that mean the stored credential is no longer valid.
pub const INVALID_SESSION_CODES: [u16; 3] = [411, 440, 500];

/// Reconnect policy class for a close event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Operator logged the account out. Terminal; credentials are wiped and
    /// nothing reconnects until an explicit start.
    ManualLogout,
    /// The credential is corrupt or was superseded. Wipe and retry with
    /// hard backoff (a fresh pairing will be required).
    InvalidSession,
    /// Anything else (network drop, server restart). Retry with soft
    /// backoff, credentials untouched.
    Transient,
}

impl CloseClass {
    pub fn from_code(code: u16) -> CloseClass {
        if code == CODE_LOGGED_OUT {
            CloseClass::ManualLogout
        } else if INVALID_SESSION_CODES.contains(&code) {
            CloseClass::InvalidSession
        } else {
            CloseClass::Transient
        }
    }
}

/// One logical binding between this process and one messaging account.
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub pairing_code: Option<String>,
    pub pairing_attempts: u32,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    /// Bumped on every switch/reset/connect. Event loops and reconnect
    /// timers capture the epoch they were spawned under and stop acting
    /// once it no longer matches, so a replaced session context can never
    /// be revived by a stale callback.
    pub epoch: u64,
    /// Outbound half of the live connection, if any.
    pub link: Option<Arc<dyn TransportLink>>,
    /// Pending reconnect timer; aborted on switch/reset/connect.
    pub reconnect_timer: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(id: String) -> Self {
        Self {
            id,
            status: SessionStatus::Init,
            pairing_code: None,
            pairing_attempts: 0,
            reconnect_attempts: 0,
            reconnect_delay_ms: BASE_RECONNECT_DELAY_MS,
            epoch: 0,
            link: None,
            reconnect_timer: None,
        }
    }

    /// Abort a pending reconnect timer, if one is scheduled.
    pub fn cancel_reconnect_timer(&mut self) {
        if let Some(handle) = self.reconnect_timer.take() {
            handle.abort();
        }
    }

    /// Rebind the record to `id` and return it to a pristine `Init` state.
    /// Cancels any pending timer and invalidates outstanding callbacks.
    pub fn rebind(&mut self, id: String) {
        self.cancel_reconnect_timer();
        self.id = id;
        self.status = SessionStatus::Init;
        self.pairing_code = None;
        self.pairing_attempts = 0;
        self.reconnect_attempts = 0;
        self.reconnect_delay_ms = BASE_RECONNECT_DELAY_MS;
        self.epoch += 1;
        self.link = None;
    }

    /// Successful open: counters and backoff return to their base values.
    pub fn note_connected(&mut self) {
        self.status = SessionStatus::Connected;
        self.pairing_code = None;
        self.pairing_attempts = 0;
        self.reconnect_attempts = 0;
        self.reconnect_delay_ms = BASE_RECONNECT_DELAY_MS;
    }

    /// Current delay to wait before reconnecting, advancing the backoff for
    /// the next occurrence: ×1.5 capped at 30 s for transient drops, ×2
    /// capped at 60 s for invalid sessions.
    pub fn next_reconnect_delay(&mut self, class: CloseClass) -> u64 {
        let delay = self.reconnect_delay_ms;
        self.reconnect_delay_ms = match class {
            CloseClass::Transient => (delay + delay / 2).min(TRANSIENT_DELAY_CAP_MS),
            CloseClass::InvalidSession => (delay * 2).min(INVALID_DELAY_CAP_MS),
            CloseClass::ManualLogout => delay,
        };
        delay
    }
}

/// Strip the server part of a transport address ("5491122…@s.whatsapp.net"
/// → "5491122…"). Used to resolve senders against the backend user registry.
pub fn phone_from_address(address: &str) -> &str {
    address.split('@').next().unwrap_or(address)
}

/// Group chats live under the group server suffix.
pub fn is_group_address(address: &str) -> bool {
    address.ends_with("@g.us")
}
