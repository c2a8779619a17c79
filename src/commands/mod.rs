//! Command dispatch: parse inbound text, authorize against the sender's
//! rank, execute against the ticketing backend, produce exactly one reply.
//!
//! Handlers are registered in a static registry built at startup; each one
//! declares the ranks allowed to run it and the check happens centrally in
//! `dispatch`, never inside a handler.

pub mod info;
pub mod pending;
pub mod tickets;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::session::phone_from_address;
use crate::traits::TicketBackend;
use crate::types::{DomainUser, InboundMessage, Rank};

/// Ranks that work tickets day to day.
pub const CONSULTING_RANKS: &[Rank] = &[
    Rank::TotalAccess,
    Rank::Consultor,
    Rank::ConsultorChief,
    Rank::Dev,
    Rank::DevChief,
];

/// Ranks that can change ticket state out from under others.
pub const CHIEF_RANKS: &[Rank] = &[Rank::TotalAccess, Rank::ConsultorChief, Rank::DevChief];

/// A parsed command invocation. Never persisted.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
    pub sender: String,
    pub chat: String,
    pub is_group: bool,
}

/// Outcome of a handler, rendered with the prefix users already know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok(String),
    Info(String),
    Warn(String),
    Error(String),
}

impl Reply {
    pub fn render(&self) -> String {
        match self {
            Reply::Ok(text) => format!("✅ {text}"),
            Reply::Info(text) => format!("ℹ️ {text}"),
            Reply::Warn(text) => format!("⚠️ {text}"),
            Reply::Error(text) => format!("❌ {text}"),
        }
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ranks allowed to invoke this command. Empty means any registered user.
    fn allowed_ranks(&self) -> &'static [Rank] {
        &[]
    }

    async fn execute(
        &self,
        inv: &Invocation,
        user: &DomainUser,
        backend: &dyn TicketBackend,
    ) -> anyhow::Result<Reply>;
}

/// Static command-key → handler table, built once at startup.
pub struct CommandRegistry {
    map: HashMap<&'static str, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn standard() -> Self {
        let mut map: HashMap<&'static str, Arc<dyn CommandHandler>> = HashMap::new();
        let handlers: Vec<Arc<dyn CommandHandler>> = vec![
            Arc::new(info::Menu),
            Arc::new(info::Support),
            Arc::new(info::TicketHelp),
            Arc::new(tickets::Create),
            Arc::new(tickets::Close),
            Arc::new(tickets::SetStatus),
            Arc::new(tickets::Assign),
            Arc::new(tickets::Delete),
            Arc::new(tickets::List),
            Arc::new(tickets::MyTickets),
            Arc::new(tickets::Summary),
            Arc::new(pending::CreatePending),
        ];
        for handler in handlers {
            map.insert(handler.name(), handler);
        }
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn CommandHandler>> {
        self.map.get(key).cloned()
    }
}

pub struct CommandDispatcher {
    registry: CommandRegistry,
    backend: Arc<dyn TicketBackend>,
    marker: char,
}

impl CommandDispatcher {
    pub fn new(backend: Arc<dyn TicketBackend>, marker: char) -> Self {
        Self {
            registry: CommandRegistry::standard(),
            backend,
            marker,
        }
    }

    /// Parse inbound text into an invocation. Returns `None` when the text
    /// does not start with the command marker.
    pub fn parse(&self, msg: &InboundMessage) -> Option<Invocation> {
        let text = msg.text.trim();
        let first = text.split_whitespace().next()?;
        let command = first.strip_prefix(self.marker)?;
        if command.is_empty() {
            return None;
        }
        let args = text
            .split_whitespace()
            .skip(1)
            .map(str::to_string)
            .collect();
        Some(Invocation {
            command: command.to_lowercase(),
            args,
            sender: msg.sender.clone(),
            chat: msg.chat.clone(),
            is_group: msg.is_group,
        })
    }

    /// Handle one inbound message. Returns the rendered reply to send back,
    /// or `None` when the message is not a command at all.
    pub async fn dispatch(&self, msg: &InboundMessage) -> Option<String> {
        let inv = self.parse(msg)?;
        Some(self.run(inv).await.render())
    }

    async fn run(&self, inv: Invocation) -> Reply {
        let (handler, inv) = match self.resolve(inv) {
            Ok(pair) => pair,
            Err(reply) => return reply,
        };

        // Sender must be a registered user; rank gates come from the handler.
        let phone = phone_from_address(&inv.sender).to_string();
        let user = match self.backend.user_by_phone(&phone).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(sender = %phone, command = %inv.command, "unregistered sender");
                return Reply::Error(
                    "No estás registrado como usuario autorizado. Contactá al administrador."
                        .to_string(),
                );
            }
            Err(e) => {
                error!("user lookup failed: {e}");
                return Reply::Error(
                    "Error procesando el comando. Intentá más tarde.".to_string(),
                );
            }
        };

        let allowed = handler.allowed_ranks();
        if !allowed.is_empty() {
            let permitted = user.rank().map(|r| allowed.contains(&r)).unwrap_or(false);
            if !permitted {
                return Reply::Error(format!(
                    "No tenés permisos para usar !{} (tu rango actual: {}).",
                    handler.name(),
                    user.rank_label
                ));
            }
        }

        match handler.execute(&inv, &user, self.backend.as_ref()).await {
            Ok(reply) => reply,
            Err(e) => {
                // The dispatch boundary: a failing handler must never take
                // the connection down with it.
                error!(command = %inv.command, "command handler failed: {e}");
                Reply::Error("Ocurrió un error procesando el comando. Intentá más tarde.".into())
            }
        }
    }

    /// Resolve the invocation to a handler. `!ticket <sub> …` forwards to
    /// the sub-handler with the arguments shifted by one.
    fn resolve(&self, inv: Invocation) -> Result<(Arc<dyn CommandHandler>, Invocation), Reply> {
        if inv.command == "ticket" {
            if let Some(sub) = inv.args.first() {
                if let Some(handler) = self.registry.get(&sub.to_lowercase()) {
                    let mut forwarded = inv;
                    forwarded.command = forwarded.args.remove(0).to_lowercase();
                    return Ok((handler, forwarded));
                }
            }
            // No or unknown subcommand: show the ticket panel.
            if let Some(help) = self.registry.get("tickethelp") {
                return Ok((help, inv));
            }
        }
        match self.registry.get(&inv.command) {
            Some(handler) => Ok((handler, inv)),
            None => Err(Reply::Info(format!(
                "Comando desconocido: !{}. Escribí !menu para ver las opciones.",
                inv.command
            ))),
        }
    }
}
