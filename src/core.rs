use std::sync::Arc;

use tracing::{error, info, warn};

use crate::admin;
use crate::backend::HttpBackend;
use crate::commands::CommandDispatcher;
use crate::config::AppConfig;
use crate::lifecycle::ConnectionLifecycleManager;
use crate::reminders::ReminderScheduler;
use crate::state::SqliteStore;
use crate::transport::GatewayTransport;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    // 1. State store (credentials + reminder dedup log)
    let store = Arc::new(SqliteStore::new(&config.state.db_path).await?);
    info!("state store initialized ({})", config.state.db_path);

    // 2. Ticketing backend client
    let backend = Arc::new(HttpBackend::new(&config.backend));

    // 3. Transport + connection lifecycle
    let transport = GatewayTransport::new(&config.gateway);
    let (inbound_tx, mut inbound_rx) = tokio::sync::mpsc::channel(64);
    let lifecycle = ConnectionLifecycleManager::new(
        transport,
        store.clone(),
        &config.session.id,
        inbound_tx,
    );
    lifecycle.init().await?;

    // 4. Command dispatcher consuming inbound messages
    let dispatcher = CommandDispatcher::new(backend.clone(), config.commands.marker_char());
    let lifecycle_for_commands = lifecycle.clone();
    tokio::spawn(async move {
        while let Some(msg) = inbound_rx.recv().await {
            let Some(reply) = dispatcher.dispatch(&msg).await else {
                continue;
            };
            if let Err(e) = lifecycle_for_commands.send(&msg.chat, &reply).await {
                warn!(chat = %msg.chat, "failed to send command reply: {e}");
            }
        }
    });

    // 5. Reminder scheduler reusing the same session
    if config.reminders.enabled {
        ReminderScheduler::new(
            backend,
            lifecycle.clone(),
            store.clone(),
            config.reminders.clone(),
        )
        .spawn();
    } else {
        info!("reminder scheduler disabled by config");
    }

    // 6. Operator control surface
    let admin_cfg = config.admin.clone();
    let lifecycle_for_admin = lifecycle.clone();
    tokio::spawn(async move {
        if let Err(e) = admin::serve(lifecycle_for_admin, admin_cfg).await {
            error!("admin server error: {e}");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
