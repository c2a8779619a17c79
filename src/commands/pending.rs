//! Pending-task registration: `!pendiente <cliente;usuario;detalle;estado[;obs][;ticket]>`.

use async_trait::async_trait;

use crate::commands::{CommandHandler, Invocation, Reply, CONSULTING_RANKS};
use crate::traits::TicketBackend;
use crate::types::{DomainUser, NewPendingTask, Rank, TicketStatus};

const USAGE: &str = "Faltan datos obligatorios.\n\n📌 Usá:\n!pendiente <clienteId>;<usuarioId>;<detalle>;<estado>[;<observación>][;<ticketId>]";

pub struct CreatePending;

#[async_trait]
impl CommandHandler for CreatePending {
    fn name(&self) -> &'static str {
        "pendiente"
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
        let raw = inv.args.join(" ");
        let parts: Vec<&str> = raw.split(';').map(str::trim).collect();
        let (client_id, user_id, detail, status) =
            match (parts.first(), parts.get(1), parts.get(2), parts.get(3)) {
                (Some(c), Some(u), Some(d), Some(s))
                    if !c.is_empty() && !u.is_empty() && !d.is_empty() && !s.is_empty() =>
                {
                    (*c, *u, *d, *s)
                }
                _ => return Ok(Reply::Error(USAGE.into())),
            };
        let Some(status) = TicketStatus::parse(status) else {
            let options = TicketStatus::ALL
                .iter()
                .map(|s| format!("- `{}`", s.as_str()))
                .collect::<Vec<_>>()
                .join("\n");
            return Ok(Reply::Warn(format!(
                "Estado no válido.\n\n📋 Estados permitidos:\n{options}"
            )));
        };
        let observation = parts.get(4).filter(|s| !s.is_empty()).map(|s| s.to_string());
        let incident_id = parts.get(5).filter(|s| !s.is_empty()).map(|s| s.to_string());

        backend
            .create_pending(NewPendingTask {
                client_id: client_id.to_string(),
                user_id: user_id.to_string(),
                detail: detail.to_string(),
                status: status.as_str().to_string(),
                observation: observation.clone(),
                incident_id: incident_id.clone(),
            })
            .await?;

        Ok(Reply::Ok(format!(
            "📌 Tarea pendiente registrada\n\n🧾 Cliente: {client_id}\n👤 Usuario: {user_id}\n📋 Estado: *{}*\n📝 Detalle: {detail}\n💬 Observación: {}\n📎 Ticket: {}",
            status.as_str(),
            observation.as_deref().unwrap_or("Sin observación"),
            incident_id.as_deref().unwrap_or("No vinculado"),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    fn inv(args: &str) -> Invocation {
        Invocation {
            command: "pendiente".into(),
            args: args.split_whitespace().map(str::to_string).collect(),
            sender: "549110000001@s.whatsapp.net".into(),
            chat: "549110000001@s.whatsapp.net".into(),
            is_group: false,
        }
    }

    fn user() -> DomainUser {
        DomainUser {
            id: "u1".into(),
            username: "consultor-ia".into(),
            rank_label: "Consultor".into(),
            phone: Some("549110000001".into()),
        }
    }

    #[tokio::test]
    async fn registers_a_pending_task() {
        let backend = MockBackend::new();
        let reply = CreatePending
            .execute(
                &inv("c1;u2;migrar el servidor;pendiente;revisar backups;t9"),
                &user(),
                backend.as_ref(),
            )
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Ok(_)), "got: {reply:?}");
        let pendings = backend.pendings.lock().await;
        assert_eq!(pendings.len(), 1);
        assert_eq!(pendings[0].client_id, "c1");
        assert_eq!(pendings[0].status, TicketStatus::Pending.as_str());
        assert_eq!(pendings[0].observation.as_deref(), Some("revisar backups"));
        assert_eq!(pendings[0].incident_id.as_deref(), Some("t9"));
    }

    #[tokio::test]
    async fn missing_fields_and_bad_status_are_rejected() {
        let backend = MockBackend::new();
        let reply = CreatePending
            .execute(&inv("c1;u2"), &user(), backend.as_ref())
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Error(_)), "got: {reply:?}");

        let reply = CreatePending
            .execute(&inv("c1;u2;algo;inexistente"), &user(), backend.as_ref())
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Warn(ref t) if t.contains("Estado no válido")));
        assert!(backend.pendings.lock().await.is_empty());
    }
}
