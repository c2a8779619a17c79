use async_trait::async_trait;
use tokio::sync::mpsc;

use std::sync::Arc;

use crate::types::{
    Client, DomainUser, InboundMessage, NewPendingTask, NewTicket, StatusCount, Ticket,
    TicketFilter,
};

/// Failure of the credential store's underlying storage.
///
/// Distinct from the plain-anyhow errors used elsewhere: callers in the
/// connection state machine must be able to tell "the store broke" apart
/// from everything else, because an interrupted credential write aborts the
/// in-progress state transition.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("credential storage failure: {0}")]
    Backend(String),
}

/// Persists opaque credential material keyed by `(session_id, key)`.
///
/// All operations are idempotent; the store never retries on its own.
/// Absence on read is not an error.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Upsert one record. Returns once the write is durable.
    async fn write(&self, session_id: &str, key: &str, value: &[u8])
        -> Result<(), PersistenceError>;

    /// Read one record, or `None` if it does not exist.
    async fn read(&self, session_id: &str, key: &str)
        -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Delete one record. Deleting a missing record is a no-op.
    async fn remove(&self, session_id: &str, key: &str) -> Result<(), PersistenceError>;

    /// Delete every record for a session.
    async fn wipe(&self, session_id: &str) -> Result<(), PersistenceError>;

    /// Distinct session ids that currently have at least one record.
    async fn list_sessions(&self) -> Result<Vec<String>, PersistenceError>;
}

/// Idempotency log for reminder batches.
#[async_trait]
pub trait ReminderLogStore: Send + Sync {
    /// Record one sent reminder. Returns `false` when an entry with the same
    /// `(client_id, date_key, days_before, slot)` already exists (no-op).
    async fn record_reminder(
        &self,
        client_id: &str,
        date_key: &str,
        days_before: i64,
        slot: u32,
    ) -> Result<bool, PersistenceError>;

    /// Whether a reminder with this exact key was already recorded.
    async fn reminder_sent(
        &self,
        client_id: &str,
        date_key: &str,
        days_before: i64,
        slot: u32,
    ) -> Result<bool, PersistenceError>;
}

/// Close notification from the transport, carrying the protocol status code.
#[derive(Debug, Clone)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// Events emitted by a live transport connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An out-of-band pairing code the operator must enter/scan to link
    /// this session to an account.
    PairingChallenge(String),
    /// The session is authenticated and usable.
    Open,
    /// The connection closed; the code decides the reconnect policy.
    Close(CloseFrame),
    /// Updated credential material to persist under the given key.
    Credentials { key: String, value: Vec<u8> },
    /// A text message from a user or group.
    Inbound(InboundMessage),
}

/// A live connection: the event stream plus the outbound operations.
pub struct TransportConnection {
    pub events: mpsc::Receiver<TransportEvent>,
    pub link: Arc<dyn TransportLink>,
}

/// Outbound half of a connection.
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Send a text payload to a destination address.
    async fn send(&self, destination: &str, text: &str) -> anyhow::Result<()>;

    /// Close the connection gracefully. Resolves only once fully closed.
    async fn end(&self) -> anyhow::Result<()>;

    /// Log the account out. The transport reports this as a close event
    /// with the logged-out status code.
    async fn logout(&self) -> anyhow::Result<()>;
}

/// The external messaging capability. The wire protocol (handshake,
/// multi-device sync, encryption) lives behind this trait and is not
/// implemented here.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection for `session_id`. `resume` carries the bootstrap
    /// credential blob when one is stored; `None` starts a fresh pairing.
    async fn connect(
        &self,
        session_id: &str,
        resume: Option<Vec<u8>>,
    ) -> anyhow::Result<TransportConnection>;
}

/// Contract with the domain ticketing backend. The REST API behind it (and
/// its schemas and JWT auth) is an external collaborator.
#[async_trait]
pub trait TicketBackend: Send + Sync {
    async fn user_by_phone(&self, phone: &str) -> anyhow::Result<Option<DomainUser>>;
    async fn user_by_username(&self, username: &str) -> anyhow::Result<Option<DomainUser>>;
    async fn client_by_code(&self, code: &str) -> anyhow::Result<Option<Client>>;
    async fn active_clients(&self) -> anyhow::Result<Vec<Client>>;
    async fn create_ticket(&self, new: NewTicket) -> anyhow::Result<Ticket>;
    async fn ticket_by_sequence(&self, seq: i64) -> anyhow::Result<Option<Ticket>>;
    /// Persist modified fields of an existing ticket (status, observation,
    /// assignee, completion date).
    async fn update_ticket(&self, ticket: &Ticket) -> anyhow::Result<()>;
    async fn delete_ticket(&self, seq: i64) -> anyhow::Result<()>;
    async fn tickets_by_filter(&self, filter: &TicketFilter) -> anyhow::Result<Vec<Ticket>>;
    async fn tickets_assigned_to(&self, user_id: &str) -> anyhow::Result<Vec<Ticket>>;
    async fn create_pending(&self, new: NewPendingTask) -> anyhow::Result<()>;
    /// Ticket counts grouped by status, optionally windowed to the last
    /// `days` days.
    async fn ticket_status_summary(&self, days: Option<i64>) -> anyhow::Result<Vec<StatusCount>>;
}
