//! License-expiry reminders: two weekday slots compute the due set, render
//! one batch message and send it over the live session, deduplicated per
//! `(client, day, threshold, slot)`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, FixedOffset, NaiveDate, Utc, Weekday};
use croner::Cron;
use tracing::{debug, error, info, warn};

use crate::config::ReminderConfig;
use crate::formatting::{chunk_lines, format_date};
use crate::lifecycle::ConnectionLifecycleManager;
use crate::traits::{ReminderLogStore, TicketBackend};
use crate::types::Client;

/// One client due for a reminder. Computed per run, never persisted.
#[derive(Debug, Clone)]
pub struct ReminderCandidate {
    pub client_id: String,
    pub client_name: String,
    pub client_code: String,
    pub days_remaining: i64,
    pub expiry_date: NaiveDate,
}

/// Whole days between two UTC midnights. The only place day arithmetic
/// happens: both sides are normalized to their UTC calendar date first, so
/// wall-clock time of day can never leak into the difference.
pub fn days_remaining(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    expiry
        .date_naive()
        .signed_duration_since(now.date_naive())
        .num_days()
}

pub struct ReminderScheduler {
    backend: Arc<dyn TicketBackend>,
    lifecycle: Arc<ConnectionLifecycleManager>,
    log: Arc<dyn ReminderLogStore>,
    cfg: ReminderConfig,
}

impl ReminderScheduler {
    pub fn new(
        backend: Arc<dyn TicketBackend>,
        lifecycle: Arc<ConnectionLifecycleManager>,
        log: Arc<dyn ReminderLogStore>,
        cfg: ReminderConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            lifecycle,
            log,
            cfg,
        })
    }

    /// Spawn the slot tick loop as a background task.
    pub fn spawn(self: Arc<Self>) {
        let Some(offset) = self.cfg.offset() else {
            error!(
                offset_hours = self.cfg.utc_offset_hours,
                "invalid reminder timezone offset; scheduler disabled"
            );
            return;
        };
        let mut slots: Vec<(u32, Cron, DateTime<FixedOffset>)> = Vec::new();
        let now_local = Utc::now().with_timezone(&offset);
        for (idx, expr) in self.cfg.slots.iter().enumerate() {
            let cron: Cron = match expr.parse() {
                Ok(cron) => cron,
                Err(e) => {
                    error!(slot = idx, expr = %expr, "invalid slot cron, skipping: {e}");
                    continue;
                }
            };
            match cron.find_next_occurrence(&now_local, false) {
                Ok(next) => {
                    info!(slot = idx, expr = %expr, next = %next, "reminder slot scheduled");
                    slots.push((idx as u32, cron, next));
                }
                Err(e) => error!(slot = idx, expr = %expr, "no next occurrence, skipping: {e}"),
            }
        }
        if slots.is_empty() {
            warn!("no valid reminder slots configured");
            return;
        }

        let tick = Duration::from_secs(self.cfg.tick_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                let now = Utc::now();
                let now_local = now.with_timezone(&offset);
                for (slot, cron, next_run) in slots.iter_mut() {
                    if *next_run > now_local {
                        continue;
                    }
                    if let Err(e) = self.run_slot_at(*slot, now, false).await {
                        error!(slot, "reminder run failed: {e}");
                    }
                    match cron.find_next_occurrence(&now_local, false) {
                        Ok(next) => *next_run = next,
                        Err(e) => {
                            // Push the slot a day out rather than hot-looping.
                            error!(slot, "failed to compute next occurrence: {e}");
                            *next_run = now_local + ChronoDuration::days(1);
                        }
                    }
                }
            }
        });
        info!("reminder scheduler spawned");
    }

    /// Execute one slot as of `now`. Returns the candidate set (also on dry
    /// runs, which compute everything but send and log nothing).
    pub async fn run_slot_at(
        &self,
        slot: u32,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> anyhow::Result<Vec<ReminderCandidate>> {
        let offset = self
            .cfg
            .offset()
            .ok_or_else(|| anyhow::anyhow!("invalid timezone offset"))?;
        let now_local = now.with_timezone(&offset);
        if matches!(now_local.weekday(), Weekday::Sat | Weekday::Sun) {
            debug!(slot, "weekend; skipping reminder run");
            return Ok(Vec::new());
        }

        let clients = self.backend.active_clients().await?;
        let mut candidates = self.collect_candidates(&clients, now);
        candidates.sort_by_key(|c| c.days_remaining);

        if candidates.is_empty() || dry_run {
            return Ok(candidates);
        }
        if self.cfg.broadcast_to.is_empty() {
            warn!("reminders due but no broadcast destination configured");
            return Ok(candidates);
        }

        let date_key = now_local.date_naive().format("%Y-%m-%d").to_string();
        let sendables = if self.cfg.dedup {
            self.filter_already_sent(&candidates, &date_key, slot).await
        } else {
            candidates.clone()
        };
        if sendables.is_empty() {
            debug!(slot, "all candidates already notified today");
            return Ok(candidates);
        }

        let text = render_batch(&sendables);
        for chunk in chunk_lines(&text, self.cfg.max_message_len) {
            if let Err(e) = self.lifecycle.send(&self.cfg.broadcast_to, &chunk).await {
                // Not retried until the next scheduled slot; nothing gets
                // logged as sent either, so the next run picks it all up.
                warn!(slot, "reminder send failed: {e}");
                return Ok(candidates);
            }
        }
        info!(slot, count = sendables.len(), "reminder batch sent");

        if self.cfg.dedup {
            for candidate in &sendables {
                if let Err(e) = self
                    .log
                    .record_reminder(&candidate.client_id, &date_key, self.cfg.max_days, slot)
                    .await
                {
                    warn!(client_id = %candidate.client_id, "failed to record reminder: {e}");
                }
            }
        }
        Ok(candidates)
    }

    fn collect_candidates(&self, clients: &[Client], now: DateTime<Utc>) -> Vec<ReminderCandidate> {
        let mut candidates = Vec::new();
        for client in clients {
            // One client's bad data must not abort the rest of the batch.
            let Some(last_update) = client.last_update else {
                debug!(client = %client.name, "client has no last update; skipped");
                continue;
            };
            let expiry = last_update + ChronoDuration::days(self.cfg.license_duration_days);
            let remaining = days_remaining(expiry, now);
            if remaining < self.cfg.min_days || remaining > self.cfg.max_days {
                continue;
            }
            candidates.push(ReminderCandidate {
                client_id: client.id.clone(),
                client_name: client.name.clone(),
                client_code: client.code.clone(),
                days_remaining: remaining,
                expiry_date: expiry.date_naive(),
            });
        }
        candidates
    }

    async fn filter_already_sent(
        &self,
        candidates: &[ReminderCandidate],
        date_key: &str,
        slot: u32,
    ) -> Vec<ReminderCandidate> {
        let mut fresh = Vec::new();
        for candidate in candidates {
            match self
                .log
                .reminder_sent(&candidate.client_id, date_key, self.cfg.max_days, slot)
                .await
            {
                Ok(true) => {}
                Ok(false) => fresh.push(candidate.clone()),
                Err(e) => {
                    // When in doubt, send: a duplicate beats a silent miss.
                    warn!(client_id = %candidate.client_id, "dedup lookup failed: {e}");
                    fresh.push(candidate.clone());
                }
            }
        }
        fresh
    }
}

fn render_batch(candidates: &[ReminderCandidate]) -> String {
    let header = format!(
        "🚨 *Licencias próximas a vencer*\n👥 Total: {}",
        candidates.len()
    );
    let lines: Vec<String> = candidates
        .iter()
        .map(|c| {
            format!(
                "▪️ *{}* ({}) → ⏳ {} días • 📅 {}",
                c.client_name,
                c.client_code,
                c.days_remaining,
                format_date(c.expiry_date)
            )
        })
        .collect();
    format!(
        "{header}\n\n{}\n\n🔄 *Recordá coordinar la renovación* 🔄",
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        lifecycle_harness, tick, LifecycleHarness, MemoryReminderLog, MockBackend,
    };
    use crate::traits::TransportEvent;
    use chrono::TimeZone;

    fn cfg() -> ReminderConfig {
        ReminderConfig {
            broadcast_to: "licencias@g.us".into(),
            min_days: -10,
            max_days: 15,
            ..ReminderConfig::default()
        }
    }

    /// A Thursday, well inside the week in every offset involved.
    fn thursday_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 7, 12, 0, 0).unwrap()
    }

    fn saturday_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 9, 12, 0, 0).unwrap()
    }

    async fn seed_client(backend: &MockBackend, id: &str, name: &str, days_ago: i64) {
        let mut clients = backend.clients.lock().await;
        let code = format!("{:04}", clients.len());
        clients.push(Client {
            id: id.into(),
            name: name.into(),
            code,
            active: true,
            last_update: Some(thursday_noon() - ChronoDuration::days(days_ago)),
        });
    }

    async fn connected_harness() -> LifecycleHarness {
        let h = lifecycle_harness("main", &[vec![TransportEvent::Open]]).await;
        h.manager.start().await.unwrap();
        tick().await;
        h
    }

    #[test]
    fn days_remaining_uses_midnights_not_wall_clock() {
        let now = Utc.with_ymd_and_hms(2025, 8, 7, 23, 30, 0).unwrap();
        let expiry_same_day = Utc.with_ymd_and_hms(2025, 8, 7, 0, 5, 0).unwrap();
        assert_eq!(days_remaining(expiry_same_day, now), 0);

        let expiry_next_day = Utc.with_ymd_and_hms(2025, 8, 8, 0, 5, 0).unwrap();
        assert_eq!(days_remaining(expiry_next_day, now), 1);

        let expired = Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap();
        assert_eq!(days_remaining(expired, now), -6);
    }

    #[tokio::test]
    async fn exact_duration_client_yields_day_zero_and_is_included() {
        let backend = MockBackend::new();
        // lastUpdate exactly license_duration_days ago → daysRemaining == 0
        seed_client(&backend, "c1", "Acme", cfg().license_duration_days).await;
        let h = connected_harness().await;
        let scheduler = ReminderScheduler::new(
            backend,
            h.manager.clone(),
            MemoryReminderLog::new(),
            cfg(),
        );
        let candidates = scheduler
            .run_slot_at(0, thursday_noon(), true)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].days_remaining, 0);
    }

    #[tokio::test]
    async fn range_is_inclusive_and_sorted_most_urgent_first() {
        let backend = MockBackend::new();
        let d = cfg().license_duration_days;
        seed_client(&backend, "far", "Far", d - 15).await; // 15 days left (max edge)
        seed_client(&backend, "expired", "Expired", d + 10).await; // -10 (min edge)
        seed_client(&backend, "soon", "Soon", d - 3).await; // 3 days left
        seed_client(&backend, "outside", "Outside", d - 16).await; // 16 → excluded
        seed_client(&backend, "gone", "Gone", d + 11).await; // -11 → excluded
        let h = connected_harness().await;
        let scheduler = ReminderScheduler::new(
            backend,
            h.manager.clone(),
            MemoryReminderLog::new(),
            cfg(),
        );
        let candidates = scheduler
            .run_slot_at(0, thursday_noon(), true)
            .await
            .unwrap();
        let days: Vec<i64> = candidates.iter().map(|c| c.days_remaining).collect();
        assert_eq!(days, vec![-10, 3, 15]);
    }

    #[tokio::test]
    async fn weekend_runs_are_skipped() {
        let backend = MockBackend::new();
        seed_client(&backend, "c1", "Acme", cfg().license_duration_days).await;
        let h = connected_harness().await;
        let scheduler = ReminderScheduler::new(
            backend,
            h.manager.clone(),
            MemoryReminderLog::new(),
            cfg(),
        );
        let candidates = scheduler
            .run_slot_at(0, saturday_noon(), false)
            .await
            .unwrap();
        assert!(candidates.is_empty());
        assert!(h.transport.links().await[0].sent_messages().await.is_empty());
    }

    #[tokio::test]
    async fn batch_is_sent_once_and_logged() {
        let backend = MockBackend::new();
        seed_client(&backend, "c1", "Acme", cfg().license_duration_days - 3).await;
        seed_client(&backend, "c2", "Globex", cfg().license_duration_days - 5).await;
        let h = connected_harness().await;
        let log = MemoryReminderLog::new();
        let scheduler =
            ReminderScheduler::new(backend, h.manager.clone(), log.clone(), cfg());

        scheduler
            .run_slot_at(0, thursday_noon(), false)
            .await
            .unwrap();
        let sent = h.transport.links().await[0].sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "licencias@g.us");
        assert!(sent[0].1.contains("Acme"));
        assert!(sent[0].1.contains("Globex"));
        assert!(sent[0].1.contains("Total: 2"));
        assert_eq!(log.entries().await.len(), 2);

        // Second run of the same slot on the same day: dedup makes it a no-op.
        scheduler
            .run_slot_at(0, thursday_noon(), false)
            .await
            .unwrap();
        assert_eq!(h.transport.links().await[0].sent_messages().await.len(), 1);
        assert_eq!(log.entries().await.len(), 2);

        // A different slot the same day sends again.
        scheduler
            .run_slot_at(1, thursday_noon(), false)
            .await
            .unwrap();
        assert_eq!(h.transport.links().await[0].sent_messages().await.len(), 2);
        assert_eq!(log.entries().await.len(), 4);
    }

    #[tokio::test]
    async fn long_batches_are_chunked_at_line_boundaries() {
        let backend = MockBackend::new();
        for i in 0..60 {
            seed_client(
                &backend,
                &format!("c{i}"),
                &format!("Cliente con nombre considerablemente largo {i}"),
                cfg().license_duration_days - 3,
            )
            .await;
        }
        let h = connected_harness().await;
        let mut config = cfg();
        config.max_message_len = 600;
        let scheduler = ReminderScheduler::new(
            backend,
            h.manager.clone(),
            MemoryReminderLog::new(),
            config,
        );
        scheduler
            .run_slot_at(0, thursday_noon(), false)
            .await
            .unwrap();
        let sent = h.transport.links().await[0].sent_messages().await;
        assert!(sent.len() > 1, "expected multiple chunks");
        for (_, chunk) in &sent {
            assert!(chunk.len() <= 600, "chunk over limit: {}", chunk.len());
            for line in chunk.lines().filter(|l| l.starts_with("▪️")) {
                assert!(line.contains("📅"), "line was split: {line:?}");
            }
        }
    }

    #[tokio::test]
    async fn dry_run_sends_and_logs_nothing() {
        let backend = MockBackend::new();
        seed_client(&backend, "c1", "Acme", cfg().license_duration_days).await;
        let h = connected_harness().await;
        let log = MemoryReminderLog::new();
        let scheduler =
            ReminderScheduler::new(backend, h.manager.clone(), log.clone(), cfg());
        let candidates = scheduler
            .run_slot_at(0, thursday_noon(), true)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(h.transport.links().await[0].sent_messages().await.is_empty());
        assert!(log.entries().await.is_empty());
    }

    #[tokio::test]
    async fn failed_send_is_not_logged_as_sent() {
        let backend = MockBackend::new();
        seed_client(&backend, "c1", "Acme", cfg().license_duration_days).await;
        // No connection at all: sends fail.
        let h = lifecycle_harness("main", &[]).await;
        h.manager.init().await.unwrap();
        let log = MemoryReminderLog::new();
        let scheduler =
            ReminderScheduler::new(backend, h.manager.clone(), log.clone(), cfg());
        let candidates = scheduler
            .run_slot_at(0, thursday_noon(), false)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1, "failure must not abort the run");
        assert!(log.entries().await.is_empty());
    }

    #[tokio::test]
    async fn clients_without_last_update_are_skipped_not_fatal() {
        let backend = MockBackend::new();
        backend.clients.lock().await.push(Client {
            id: "broken".into(),
            name: "Sin Fecha".into(),
            code: "0099".into(),
            active: true,
            last_update: None,
        });
        seed_client(&backend, "c1", "Acme", cfg().license_duration_days).await;
        let h = connected_harness().await;
        let scheduler = ReminderScheduler::new(
            backend,
            h.manager.clone(),
            MemoryReminderLog::new(),
            cfg(),
        );
        let candidates = scheduler
            .run_slot_at(0, thursday_noon(), true)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].client_id, "c1");
    }
}
