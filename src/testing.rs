//! Test infrastructure: scripted transport, in-memory stores, mock backend.
//!
//! Compiled only for tests. Provides a fully wired lifecycle manager over a
//! transport whose connections replay scripted event sequences, so the state
//! machine can be exercised without any real protocol.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};

use crate::lifecycle::ConnectionLifecycleManager;
use crate::traits::{
    CredentialStore, PersistenceError, ReminderLogStore, TicketBackend, Transport,
    TransportConnection, TransportEvent, TransportLink,
};
use crate::types::{
    Client, DomainUser, InboundMessage, NewPendingTask, NewTicket, StatusCount, Ticket,
    TicketFilter,
};

/// Let spawned event loops and timers run.
pub async fn tick() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// One recorded call to `ScriptedTransport::connect`.
#[derive(Debug, Clone)]
pub struct ConnectCall {
    pub session_id: String,
    pub resumed: bool,
}

/// Outbound half handed out by the scripted transport. Records everything.
pub struct RecordingLink {
    ended: AtomicBool,
    pub sent: Mutex<Vec<(String, String)>>,
    pub logouts: AtomicBool,
}

impl RecordingLink {
    fn new() -> Self {
        Self {
            ended: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            logouts: AtomicBool::new(false),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub async fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl TransportLink for RecordingLink {
    async fn send(&self, destination: &str, text: &str) -> anyhow::Result<()> {
        if self.is_ended() {
            anyhow::bail!("link already closed");
        }
        self.sent
            .lock()
            .await
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }

    async fn end(&self) -> anyhow::Result<()> {
        self.ended.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> anyhow::Result<()> {
        self.logouts.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport whose connections replay pre-scripted event sequences. Extra
/// events can be injected into the newest connection with `inject`.
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Vec<TransportEvent>>>,
    calls: Mutex<Vec<ConnectCall>>,
    links: Mutex<Vec<Arc<RecordingLink>>>,
    taps: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
}

impl ScriptedTransport {
    pub fn new(scripts: &[Vec<TransportEvent>]) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.iter().cloned().collect()),
            calls: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            taps: Mutex::new(Vec::new()),
        })
    }

    pub async fn connect_calls(&self) -> Vec<ConnectCall> {
        self.calls.lock().await.clone()
    }

    pub async fn connect_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn links(&self) -> Vec<Arc<RecordingLink>> {
        self.links.lock().await.clone()
    }

    /// Push an event into the most recent connection.
    pub async fn inject(&self, event: TransportEvent) {
        let taps = self.taps.lock().await;
        let tap = taps.last().expect("no connection to inject into");
        tap.send(event).await.expect("event channel closed");
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(
        &self,
        session_id: &str,
        resume: Option<Vec<u8>>,
    ) -> anyhow::Result<TransportConnection> {
        self.calls.lock().await.push(ConnectCall {
            session_id: session_id.to_string(),
            resumed: resume.is_some(),
        });
        let script = self.scripts.lock().await.pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::channel(script.len() + 16);
        for event in script {
            tx.try_send(event).expect("scripted event channel overflow");
        }
        self.taps.lock().await.push(tx);
        let link = Arc::new(RecordingLink::new());
        self.links.lock().await.push(link.clone());
        Ok(TransportConnection { events: rx, link })
    }
}

// ---------------------------------------------------------------------------
// Credential store
// ---------------------------------------------------------------------------

/// In-memory credential store with a switch to simulate storage failures.
pub struct MemoryCredentialStore {
    records: Mutex<HashMap<(String, String), Vec<u8>>>,
    fail: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn fail_next_operations(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(PersistenceError::Backend("simulated failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn write(
        &self,
        session_id: &str,
        key: &str,
        value: &[u8],
    ) -> Result<(), PersistenceError> {
        self.check()?;
        self.records
            .lock()
            .await
            .insert((session_id.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    async fn read(
        &self,
        session_id: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, PersistenceError> {
        self.check()?;
        Ok(self
            .records
            .lock()
            .await
            .get(&(session_id.to_string(), key.to_string()))
            .cloned())
    }

    async fn remove(&self, session_id: &str, key: &str) -> Result<(), PersistenceError> {
        self.check()?;
        self.records
            .lock()
            .await
            .remove(&(session_id.to_string(), key.to_string()));
        Ok(())
    }

    async fn wipe(&self, session_id: &str) -> Result<(), PersistenceError> {
        self.check()?;
        self.records
            .lock()
            .await
            .retain(|(sid, _), _| sid != session_id);
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<String>, PersistenceError> {
        self.check()?;
        let mut ids: Vec<String> = self
            .records
            .lock()
            .await
            .keys()
            .map(|(sid, _)| sid.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

/// In-memory reminder dedup log.
pub struct MemoryReminderLog {
    entries: Mutex<Vec<(String, String, i64, u32)>>,
}

impl MemoryReminderLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
        })
    }

    pub async fn entries(&self) -> Vec<(String, String, i64, u32)> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl ReminderLogStore for MemoryReminderLog {
    async fn record_reminder(
        &self,
        client_id: &str,
        date_key: &str,
        days_before: i64,
        slot: u32,
    ) -> Result<bool, PersistenceError> {
        let mut entries = self.entries.lock().await;
        let key = (client_id.to_string(), date_key.to_string(), days_before, slot);
        if entries.contains(&key) {
            return Ok(false);
        }
        entries.push(key);
        Ok(true)
    }

    async fn reminder_sent(
        &self,
        client_id: &str,
        date_key: &str,
        days_before: i64,
        slot: u32,
    ) -> Result<bool, PersistenceError> {
        let key = (client_id.to_string(), date_key.to_string(), days_before, slot);
        Ok(self.entries.lock().await.contains(&key))
    }
}

// ---------------------------------------------------------------------------
// Lifecycle harness
// ---------------------------------------------------------------------------

pub struct LifecycleHarness {
    pub manager: Arc<ConnectionLifecycleManager>,
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<MemoryCredentialStore>,
    pub inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
}

impl LifecycleHarness {
    pub async fn seed_credentials(&self, session_id: &str) {
        self.store
            .write(session_id, crate::lifecycle::BOOTSTRAP_KEY, b"blob")
            .await
            .unwrap();
    }
}

pub async fn lifecycle_harness(
    session_id: &str,
    scripts: &[Vec<TransportEvent>],
) -> LifecycleHarness {
    let transport = ScriptedTransport::new(scripts);
    let store = MemoryCredentialStore::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(32);
    let manager = ConnectionLifecycleManager::new(
        transport.clone(),
        store.clone(),
        session_id,
        inbound_tx,
    );
    LifecycleHarness {
        manager,
        transport,
        store,
        inbound_rx: Mutex::new(inbound_rx),
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// In-memory ticketing backend for dispatcher and scheduler tests.
pub struct MockBackend {
    pub users: Mutex<Vec<DomainUser>>,
    pub clients: Mutex<Vec<Client>>,
    pub tickets: Mutex<Vec<Ticket>>,
    pub pendings: Mutex<Vec<NewPendingTask>>,
    next_seq: AtomicI64,
    fail: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            users: Mutex::new(Vec::new()),
            clients: Mutex::new(Vec::new()),
            tickets: Mutex::new(Vec::new()),
            pendings: Mutex::new(Vec::new()),
            next_seq: AtomicI64::new(1),
            fail: AtomicBool::new(false),
        })
    }

    pub async fn add_user(&self, id: &str, username: &str, rank_label: &str, phone: &str) {
        self.users.lock().await.push(DomainUser {
            id: id.to_string(),
            username: username.to_string(),
            rank_label: rank_label.to_string(),
            phone: Some(phone.to_string()),
        });
    }

    pub async fn add_client(&self, id: &str, name: &str, code: &str) {
        self.clients.lock().await.push(Client {
            id: id.to_string(),
            name: name.to_string(),
            code: code.to_string(),
            active: true,
            last_update: Some(Utc::now()),
        });
    }

    /// Make every backend call fail, to exercise the dispatch boundary.
    pub fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("simulated backend outage");
        }
        Ok(())
    }
}

#[async_trait]
impl TicketBackend for MockBackend {
    async fn user_by_phone(&self, phone: &str) -> anyhow::Result<Option<DomainUser>> {
        self.check()?;
        Ok(self
            .users
            .lock()
            .await
            .iter()
            .find(|u| u.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn user_by_username(&self, username: &str) -> anyhow::Result<Option<DomainUser>> {
        self.check()?;
        Ok(self
            .users
            .lock()
            .await
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn client_by_code(&self, code: &str) -> anyhow::Result<Option<Client>> {
        self.check()?;
        Ok(self
            .clients
            .lock()
            .await
            .iter()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn active_clients(&self) -> anyhow::Result<Vec<Client>> {
        self.check()?;
        Ok(self
            .clients
            .lock()
            .await
            .iter()
            .filter(|c| c.active)
            .cloned()
            .collect())
    }

    async fn create_ticket(&self, new: NewTicket) -> anyhow::Result<Ticket> {
        self.check()?;
        let ticket = Ticket {
            id: uuid::Uuid::new_v4().to_string(),
            sequence_number: self.next_seq.fetch_add(1, Ordering::SeqCst),
            client_id: new.client_id,
            user_id: new.user_id,
            assigned_user_id: None,
            subject: new.subject,
            detail: new.detail,
            observation: String::new(),
            status: new.status,
            creation_date: Utc::now(),
            completion_date: None,
        };
        self.tickets.lock().await.push(ticket.clone());
        Ok(ticket)
    }

    async fn ticket_by_sequence(&self, seq: i64) -> anyhow::Result<Option<Ticket>> {
        self.check()?;
        Ok(self
            .tickets
            .lock()
            .await
            .iter()
            .find(|t| t.sequence_number == seq)
            .cloned())
    }

    async fn update_ticket(&self, ticket: &Ticket) -> anyhow::Result<()> {
        self.check()?;
        let mut tickets = self.tickets.lock().await;
        match tickets.iter_mut().find(|t| t.id == ticket.id) {
            Some(slot) => {
                *slot = ticket.clone();
                Ok(())
            }
            None => anyhow::bail!("ticket not found"),
        }
    }

    async fn delete_ticket(&self, seq: i64) -> anyhow::Result<()> {
        self.check()?;
        self.tickets.lock().await.retain(|t| t.sequence_number != seq);
        Ok(())
    }

    async fn tickets_by_filter(&self, filter: &TicketFilter) -> anyhow::Result<Vec<Ticket>> {
        self.check()?;
        let tickets = self.tickets.lock().await;
        Ok(match filter {
            TicketFilter::Status(status) => tickets
                .iter()
                .filter(|t| t.status == status.as_str())
                .cloned()
                .collect(),
            TicketFilter::CreatedBetween(from, to) => tickets
                .iter()
                .filter(|t| t.creation_date >= *from && t.creation_date <= *to)
                .cloned()
                .collect(),
        })
    }

    async fn tickets_assigned_to(&self, user_id: &str) -> anyhow::Result<Vec<Ticket>> {
        self.check()?;
        Ok(self
            .tickets
            .lock()
            .await
            .iter()
            .filter(|t| t.assigned_user_id.as_deref() == Some(user_id))
            .cloned()
            .collect())
    }

    async fn create_pending(&self, new: NewPendingTask) -> anyhow::Result<()> {
        self.check()?;
        self.pendings.lock().await.push(new);
        Ok(())
    }

    async fn ticket_status_summary(&self, days: Option<i64>) -> anyhow::Result<Vec<StatusCount>> {
        self.check()?;
        let cutoff = days.map(|d| Utc::now() - chrono::Duration::days(d));
        let tickets = self.tickets.lock().await;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for ticket in tickets.iter() {
            if let Some(cutoff) = cutoff {
                if ticket.creation_date < cutoff {
                    continue;
                }
            }
            *counts.entry(ticket.status.clone()).or_default() += 1;
        }
        let mut rows: Vec<StatusCount> = counts
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect();
        rows.sort_by(|a, b| a.status.cmp(&b.status));
        Ok(rows)
    }
}
