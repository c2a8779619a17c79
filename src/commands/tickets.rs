//! Ticket command handlers: create, close, status, assign, delete, list,
//! per-user listing and the grouped summary.

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};

use crate::commands::{CommandHandler, Invocation, Reply, CHIEF_RANKS, CONSULTING_RANKS};
use crate::formatting::{format_date, truncate};
use crate::traits::TicketBackend;
use crate::types::{DomainUser, NewTicket, Rank, TicketFilter, TicketStatus};

/// Minimum detail length for a new ticket; keeps empty tickets out.
const MIN_DETAIL_LEN: usize = 10;

fn is_client_code(code: &str) -> bool {
    code.len() == 4 && code.chars().all(|c| c.is_ascii_digit())
}

fn parse_sequence(arg: Option<&String>) -> Option<i64> {
    arg.and_then(|s| s.parse().ok())
}

fn status_options() -> String {
    TicketStatus::ALL
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct Create;

#[async_trait]
impl CommandHandler for Create {
    fn name(&self) -> &'static str {
        "crear"
    }

    fn allowed_ranks(&self) -> &'static [Rank] {
        CONSULTING_RANKS
    }

    async fn execute(
        &self,
        inv: &Invocation,
        user: &DomainUser,
        backend: &dyn TicketBackend,
    ) -> anyhow::Result<Reply> {
        let Some(code) = inv.args.first() else {
            return Ok(Reply::Error(
                "Formato inválido (falta el código de cliente). Usá: !crear <código> <detalle>."
                    .into(),
            ));
        };
        if !is_client_code(code) {
            return Ok(Reply::Error(format!(
                "Código inválido: \"{code}\" (deben ser exactamente 4 dígitos, ej. 0007)."
            )));
        }
        let detail = inv.args[1..].join(" ");
        if detail.chars().count() < MIN_DETAIL_LEN {
            return Ok(Reply::Error(format!(
                "Detalle demasiado corto (mínimo {MIN_DETAIL_LEN} caracteres). Agregá más contexto y reintentá."
            )));
        }
        let Some(client) = backend.client_by_code(code).await? else {
            return Ok(Reply::Error(format!(
                "Cliente no encontrado por código \"{code}\". Verificá el código y reintentá."
            )));
        };
        let ticket = backend
            .create_ticket(NewTicket {
                client_id: client.id,
                user_id: user.id.clone(),
                subject: "Ticket".into(),
                detail,
                status: TicketStatus::Pending.as_str().into(),
            })
            .await?;
        Ok(Reply::Ok(format!(
            "🎫 Ticket creado con ID #{}\n🧾 Asunto: {}",
            ticket.sequence_number, ticket.subject
        )))
    }
}

pub struct Close;

#[async_trait]
impl CommandHandler for Close {
    fn name(&self) -> &'static str {
        "cerrar"
    }

    fn allowed_ranks(&self) -> &'static [Rank] {
        CONSULTING_RANKS
    }

    async fn execute(
        &self,
        inv: &Invocation,
        user: &DomainUser,
        backend: &dyn TicketBackend,
    ) -> anyhow::Result<Reply> {
        let seq = parse_sequence(inv.args.first());
        let detail = inv.args[1..].join(" ");
        let (Some(seq), false) = (seq, detail.is_empty()) else {
            return Ok(Reply::Warn(
                "Formato inválido. Usá: !cerrar <nro_ticket> <detalle>".into(),
            ));
        };
        let Some(mut ticket) = backend.ticket_by_sequence(seq).await? else {
            return Ok(Reply::Error(format!("No se encontró el ticket N°{seq}")));
        };
        if ticket.status == TicketStatus::Solved.as_str() {
            return Ok(Reply::Warn(format!("El ticket N°{seq} ya está cerrado.")));
        }
        ticket.status = TicketStatus::Solved.as_str().into();
        ticket.observation = format!(
            "{}\n[Cerrado por {}]: {}",
            ticket.observation, user.username, detail
        )
        .trim_start()
        .to_string();
        ticket.completion_date = Some(Utc::now());
        backend.update_ticket(&ticket).await?;
        Ok(Reply::Ok(format!("Ticket N°{seq} cerrado correctamente.")))
    }
}

pub struct SetStatus;

#[async_trait]
impl CommandHandler for SetStatus {
    fn name(&self) -> &'static str {
        "estado"
    }

    fn allowed_ranks(&self) -> &'static [Rank] {
        CHIEF_RANKS
    }

    async fn execute(
        &self,
        inv: &Invocation,
        _user: &DomainUser,
        backend: &dyn TicketBackend,
    ) -> anyhow::Result<Reply> {
        let seq = parse_sequence(inv.args.first());
        let wanted = inv.args[1..].join(" ");
        let (Some(seq), false) = (seq, wanted.is_empty()) else {
            return Ok(Reply::Warn(
                "Uso correcto: !estado <nro_ticket> <nuevo_estado>".into(),
            ));
        };
        let Some(status) = TicketStatus::parse(&wanted) else {
            return Ok(Reply::Warn(format!(
                "Estado inválido. Usá uno de: {}",
                status_options()
            )));
        };
        let Some(mut ticket) = backend.ticket_by_sequence(seq).await? else {
            return Ok(Reply::Error(format!("No se encontró el ticket N°{seq}")));
        };
        let previous = ticket.status.clone();
        ticket.status = status.as_str().into();
        backend.update_ticket(&ticket).await?;
        Ok(Reply::Ok(format!(
            "Estado del ticket N°{seq} actualizado:\n*{previous} ➜ {}*",
            status.as_str()
        )))
    }
}

pub struct Assign;

#[async_trait]
impl CommandHandler for Assign {
    fn name(&self) -> &'static str {
        "asignar"
    }

    fn allowed_ranks(&self) -> &'static [Rank] {
        &[Rank::TotalAccess, Rank::ConsultorChief]
    }

    async fn execute(
        &self,
        inv: &Invocation,
        _user: &DomainUser,
        backend: &dyn TicketBackend,
    ) -> anyhow::Result<Reply> {
        let seq = parse_sequence(inv.args.first());
        let username = inv.args.get(1);
        let (Some(seq), Some(username)) = (seq, username) else {
            return Ok(Reply::Warn(
                "Usá el formato: !asignar <nro_ticket> <usuario>".into(),
            ));
        };
        let Some(mut ticket) = backend.ticket_by_sequence(seq).await? else {
            return Ok(Reply::Error(format!("No se encontró el ticket N°{seq}")));
        };
        let Some(assignee) = backend.user_by_username(username).await? else {
            return Ok(Reply::Error(format!(
                "El usuario *{username}* no está registrado en el sistema."
            )));
        };
        ticket.assigned_user_id = Some(assignee.id);
        backend.update_ticket(&ticket).await?;
        Ok(Reply::Ok(format!(
            "Ticket N°{seq} asignado a {}",
            assignee.username
        )))
    }
}

pub struct Delete;

#[async_trait]
impl CommandHandler for Delete {
    fn name(&self) -> &'static str {
        "borrar"
    }

    fn allowed_ranks(&self) -> &'static [Rank] {
        &[Rank::TotalAccess, Rank::DevChief]
    }

    async fn execute(
        &self,
        inv: &Invocation,
        _user: &DomainUser,
        backend: &dyn TicketBackend,
    ) -> anyhow::Result<Reply> {
        let Some(seq) = parse_sequence(inv.args.first()) else {
            return Ok(Reply::Warn(
                "Debés especificar el número del ticket. Ej: !borrar 1234".into(),
            ));
        };
        if backend.ticket_by_sequence(seq).await?.is_none() {
            return Ok(Reply::Error(format!("No se encontró el ticket N°{seq}")));
        }
        backend.delete_ticket(seq).await?;
        Ok(Reply::Ok(format!(
            "🗑️ Ticket N°{seq} eliminado permanentemente."
        )))
    }
}

pub struct List;

#[async_trait]
impl CommandHandler for List {
    fn name(&self) -> &'static str {
        "listar"
    }

    fn allowed_ranks(&self) -> &'static [Rank] {
        CONSULTING_RANKS
    }

    async fn execute(
        &self,
        inv: &Invocation,
        _user: &DomainUser,
        backend: &dyn TicketBackend,
    ) -> anyhow::Result<Reply> {
        let filter = match inv.args.first().map(|s| s.to_lowercase()).as_deref() {
            Some("estado") => {
                let wanted = inv.args[1..].join(" ");
                match TicketStatus::parse(&wanted) {
                    Some(status) => TicketFilter::Status(status),
                    None => {
                        return Ok(Reply::Error(format!(
                            "Estado inválido. Usá uno de: {}",
                            status_options()
                        )))
                    }
                }
            }
            Some("fecha") => match parse_date_range(inv.args.get(1)) {
                Some((from, to)) => TicketFilter::CreatedBetween(from, to),
                None => {
                    return Ok(Reply::Error(
                        "Fechas inválidas. Usá: !listar fecha YYYY-MM-DD,YYYY-MM-DD".into(),
                    ))
                }
            },
            _ => {
                return Ok(Reply::Info(
                    "Usá una de estas opciones:\n- !listar estado <estado>\n- !listar fecha YYYY-MM-DD,YYYY-MM-DD"
                        .into(),
                ))
            }
        };
        let tickets = backend.tickets_by_filter(&filter).await?;
        if tickets.is_empty() {
            return Ok(Reply::Info(
                "📭 No se encontraron tickets con ese filtro.".into(),
            ));
        }
        let mut out = String::from("📋 *Listado de tickets:*\n");
        for (i, ticket) in tickets.iter().enumerate() {
            out.push_str(&format!(
                "\n{}. *#{}* [{}]\n🗓️ {}\n📝 {}\n",
                i + 1,
                ticket.sequence_number,
                ticket.status,
                format_date(ticket.creation_date.date_naive()),
                truncate(&ticket.detail, 100)
            ));
        }
        Ok(Reply::Info(out.trim_end().to_string()))
    }
}

fn parse_date_range(
    arg: Option<&String>,
) -> Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)> {
    let (from, to) = arg?.split_once(',')?;
    let from = NaiveDate::parse_from_str(from.trim(), "%Y-%m-%d").ok()?;
    let to = NaiveDate::parse_from_str(to.trim(), "%Y-%m-%d").ok()?;
    let from = Utc.from_utc_datetime(&from.and_hms_opt(0, 0, 0)?);
    let to = Utc.from_utc_datetime(&to.and_hms_opt(23, 59, 59)?);
    Some((from, to))
}

pub struct MyTickets;

#[async_trait]
impl CommandHandler for MyTickets {
    fn name(&self) -> &'static str {
        "mistickets"
    }

    async fn execute(
        &self,
        inv: &Invocation,
        _user: &DomainUser,
        backend: &dyn TicketBackend,
    ) -> anyhow::Result<Reply> {
        let Some(username) = inv.args.first() else {
            return Ok(Reply::Error(
                "Formato incorrecto. Usá: !mistickets <usuario>".into(),
            ));
        };
        let Some(target) = backend.user_by_username(username).await? else {
            return Ok(Reply::Error(format!("El usuario *{username}* no existe.")));
        };
        let mut tickets = backend.tickets_assigned_to(&target.id).await?;
        if tickets.is_empty() {
            return Ok(Reply::Info(format!(
                "📭 No hay tickets asignados a *{username}*."
            )));
        }
        tickets.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
        let mut out = format!("🎟️ *Tickets asignados a {username}:*\n");
        for (i, ticket) in tickets.iter().enumerate() {
            out.push_str(&format!(
                "\n{}. 🆔 *#{}*\n📅 {}\n📌 Estado: *{}*\n📝 {}\n",
                i + 1,
                ticket.sequence_number,
                format_date(ticket.creation_date.date_naive()),
                ticket.status,
                truncate(&ticket.detail, 60)
            ));
        }
        out.push_str(&format!("\n📊 Total: *{}* tickets", tickets.len()));
        Ok(Reply::Info(out))
    }
}

pub struct Summary;

#[async_trait]
impl CommandHandler for Summary {
    fn name(&self) -> &'static str {
        "resumen"
    }

    fn allowed_ranks(&self) -> &'static [Rank] {
        &[Rank::TotalAccess, Rank::ConsultorChief, Rank::DevChief, Rank::Admin]
    }

    async fn execute(
        &self,
        inv: &Invocation,
        _user: &DomainUser,
        backend: &dyn TicketBackend,
    ) -> anyhow::Result<Reply> {
        let days: Option<i64> = inv.args.first().and_then(|s| s.parse().ok()).filter(|d| *d > 0);
        let rows = backend.ticket_status_summary(days).await?;
        if rows.is_empty() {
            return Ok(Reply::Info("📭 No hay tickets registrados.".into()));
        }
        let total: i64 = rows.iter().map(|r| r.count).sum();
        let window = days
            .map(|d| format!(" (últimos {d} días)"))
            .unwrap_or_default();
        let mut out = format!("📊 *Resumen de tickets{window}:*\n\n🔢 Total: {total}\n");
        for row in rows {
            out.push_str(&format!("• *{}:* {}\n", row.status, row.count));
        }
        Ok(Reply::Info(out.trim_end().to_string()))
    }
}
