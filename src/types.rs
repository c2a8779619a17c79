use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection lifecycle states for the one active messaging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Init,
    Connecting,
    AwaitingPairing,
    Connected,
    Disconnected,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Init => "init",
            SessionStatus::Connecting => "connecting",
            SessionStatus::AwaitingPairing => "awaiting_pairing",
            SessionStatus::Connected => "connected",
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Terminated => "terminated",
        }
    }
}

/// Authorization rank of a domain user, as stored by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rank {
    TotalAccess,
    Consultor,
    ConsultorChief,
    ConsultorJr,
    Dev,
    DevChief,
    Admin,
    Guest,
    Marketing,
}

impl Rank {
    /// Backend wire label for this rank.
    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::TotalAccess => "CEO",
            Rank::Consultor => "Consultor",
            Rank::ConsultorChief => "Jefe de Consultoría",
            Rank::ConsultorJr => "Consultor Junior",
            Rank::Dev => "Desarrollador",
            Rank::DevChief => "Jefe de Programación",
            Rank::Admin => "Administración",
            Rank::Guest => "Invitado",
            Rank::Marketing => "Marketing",
        }
    }

    pub fn parse(label: &str) -> Option<Rank> {
        match label {
            "CEO" => Some(Rank::TotalAccess),
            "Consultor" => Some(Rank::Consultor),
            "Jefe de Consultoría" => Some(Rank::ConsultorChief),
            "Consultor Junior" => Some(Rank::ConsultorJr),
            "Desarrollador" => Some(Rank::Dev),
            "Jefe de Programación" => Some(Rank::DevChief),
            "Administración" => Some(Rank::Admin),
            "Invitado" => Some(Rank::Guest),
            "Marketing" => Some(Rank::Marketing),
            _ => None,
        }
    }
}

/// Ticket workflow states, matching the backend's status enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Pending,
    InProgress,
    Test,
    Solved,
    ToBudget,
    Budgeted,
    Revision,
    Cancelled,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 8] = [
        TicketStatus::Pending,
        TicketStatus::InProgress,
        TicketStatus::Test,
        TicketStatus::Solved,
        TicketStatus::ToBudget,
        TicketStatus::Budgeted,
        TicketStatus::Revision,
        TicketStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "Pendiente",
            TicketStatus::InProgress => "En Proceso",
            TicketStatus::Test => "Prueba",
            TicketStatus::Solved => "Resuelto",
            TicketStatus::ToBudget => "Presupuestar",
            TicketStatus::Budgeted => "Presupuestado",
            TicketStatus::Revision => "Revisión",
            TicketStatus::Cancelled => "Cancelado",
        }
    }

    /// Case-insensitive parse of a user-typed status label.
    pub fn parse(label: &str) -> Option<TicketStatus> {
        let wanted = label.trim().to_lowercase();
        Self::ALL
            .iter()
            .find(|s| s.as_str().to_lowercase() == wanted)
            .copied()
    }
}

/// A user registered in the ticketing backend.
#[derive(Debug, Clone, Deserialize)]
pub struct DomainUser {
    pub id: String,
    pub username: String,
    #[serde(rename = "rank")]
    pub rank_label: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl DomainUser {
    pub fn rank(&self) -> Option<Rank> {
        Rank::parse(&self.rank_label)
    }
}

/// A client (license holder) consumed from the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    /// Four-digit client code ("common").
    #[serde(rename = "common")]
    pub code: String,
    #[serde(default)]
    pub active: bool,
    /// Timestamp of the last license update; the license clock starts here.
    #[serde(rename = "lastUpdate")]
    pub last_update: Option<DateTime<Utc>>,
}

/// A support ticket (incident) consumed from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: i64,
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "assignedUserId", default)]
    pub assigned_user_id: Option<String>,
    pub subject: String,
    pub detail: String,
    #[serde(default)]
    pub observation: String,
    pub status: String,
    #[serde(rename = "creationDate")]
    pub creation_date: DateTime<Utc>,
    #[serde(rename = "completionDate", default)]
    pub completion_date: Option<DateTime<Utc>>,
}

/// Payload for creating a ticket.
#[derive(Debug, Clone, Serialize)]
pub struct NewTicket {
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub subject: String,
    pub detail: String,
    pub status: String,
}

/// Payload for creating a pending task.
#[derive(Debug, Clone, Serialize)]
pub struct NewPendingTask {
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub detail: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    #[serde(rename = "incidentId", skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
}

/// One row of a grouped ticket-status summary.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

/// Filter for ticket listings. Exactly one variant per query.
#[derive(Debug, Clone)]
pub enum TicketFilter {
    Status(TicketStatus),
    CreatedBetween(DateTime<Utc>, DateTime<Utc>),
}

/// A text message received over the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Sender address (used for the role lookup).
    pub sender: String,
    /// Chat the message arrived in; replies go back here.
    pub chat: String,
    pub text: String,
    pub is_group: bool,
}
