//! Static information commands: the menu, the support card and the ticket
//! panel shown when `!ticket` arrives without a subcommand.

use async_trait::async_trait;

use crate::commands::{CommandHandler, Invocation, Reply};
use crate::traits::TicketBackend;
use crate::types::DomainUser;

const MENU_TEXT: &str = "🤖 *Panel de comandos*

━━━━━━━━━━━━━━━━━━━━
🎫 *Tickets*
━━━━━━━━━━━━━━━━━━━━
🆕 Crear: `!ticket crear <código> <detalle>`
✅ Cerrar: `!ticket cerrar <id> <detalle>`
📌 Estado: `!ticket estado <id> <nuevo_estado>`
🧑‍🔧 Asignar: `!ticket asignar <id> <usuario>`
🗑️ Eliminar: `!ticket borrar <id>`
📋 Listar: `!ticket listar estado <estado>`
📅 Por fecha: `!ticket listar fecha YYYY-MM-DD,YYYY-MM-DD`
🎟️ Asignados: `!mistickets <usuario>`

━━━━━━━━━━━━━━━━━━━━
⏳ *Pendientes*
━━━━━━━━━━━━━━━━━━━━
➕ Crear: `!pendiente <cliente;usuario;detalle;estado[;obs][;ticket]>`

━━━━━━━━━━━━━━━━━━━━
🛠️ *Administración*
━━━━━━━━━━━━━━━━━━━━
📊 Resumen: `!resumen [días]`
☎️ Soporte: `!soporte`";

const SUPPORT_TEXT: &str = "📞 *Centro de soporte*
━━━━━━━━━━━━━━━━━━━━
🕒 Atención: Lunes a Viernes de 09:00 a 18:00 hs
📧 Consultas: escribí acá mismo o abrí un ticket.

💡 Tip: usá `!ticket crear <código> <problema>` para reportar un incidente al instante.";

const TICKET_PANEL: &str = "🎫 *Panel de tickets*

1️⃣ Crear: `!ticket crear <código> <detalle>`
2️⃣ Estado: `!ticket estado <id> <nuevo_estado>`
3️⃣ Asignar: `!ticket asignar <id> <usuario>`
4️⃣ Cerrar: `!ticket cerrar <id> <detalle>`
5️⃣ Eliminar: `!ticket borrar <id>`
6️⃣ Listar: `!ticket listar estado <estado>`
7️⃣ Listar: `!ticket listar fecha <YYYY-MM-DD,YYYY-MM-DD>`

⚠️ Todos los tickets requieren un cliente (código de 4 dígitos).";

pub struct Menu;

#[async_trait]
impl CommandHandler for Menu {
    fn name(&self) -> &'static str {
        "menu"
    }

    async fn execute(
        &self,
        _inv: &Invocation,
        _user: &DomainUser,
        _backend: &dyn TicketBackend,
    ) -> anyhow::Result<Reply> {
        Ok(Reply::Info(MENU_TEXT.into()))
    }
}

pub struct Support;

#[async_trait]
impl CommandHandler for Support {
    fn name(&self) -> &'static str {
        "soporte"
    }

    async fn execute(
        &self,
        _inv: &Invocation,
        _user: &DomainUser,
        _backend: &dyn TicketBackend,
    ) -> anyhow::Result<Reply> {
        Ok(Reply::Info(SUPPORT_TEXT.into()))
    }
}

pub struct TicketHelp;

#[async_trait]
impl CommandHandler for TicketHelp {
    fn name(&self) -> &'static str {
        "tickethelp"
    }

    async fn execute(
        &self,
        _inv: &Invocation,
        _user: &DomainUser,
        _backend: &dyn TicketBackend,
    ) -> anyhow::Result<Reply> {
        Ok(Reply::Info(TICKET_PANEL.into()))
    }
}
