use chrono::FixedOffset;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub session: SessionConfig,
    #[serde(default)]
    pub state: StateConfig,
    pub gateway: GatewayConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("cannot parse {}: {}", path.display(), e))?;

        // Secrets may come from the environment instead of the file.
        if let Ok(v) = std::env::var("GATEWAY_API_KEY") {
            config.gateway.api_key = v;
        }
        if let Ok(v) = std::env::var("BACKEND_PASSWORD") {
            config.backend.password = v;
        }
        if let Ok(v) = std::env::var("ADMIN_TOKEN") {
            config.admin.token = v;
        }
        if let Ok(v) = std::env::var("LOGOUT_SECRET") {
            config.admin.logout_secret = v;
        }
        if let Ok(v) = std::env::var("SESSION_ID") {
            config.session.id = v;
        }

        if config.reminders.offset().is_none() {
            anyhow::bail!(
                "reminders.utc_offset_hours out of range: {}",
                config.reminders.utc_offset_hours
            );
        }
        if config.commands.marker.chars().count() != 1 {
            anyhow::bail!(
                "commands.marker must be a single character, got {:?}",
                config.commands.marker
            );
        }
        Ok(config)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Active session id; credential records are keyed under it.
    #[serde(default = "default_session_id")]
    pub id: String,
}

fn default_session_id() -> String {
    "main".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "ticketbot.db".to_string()
}

/// The protocol gateway holding the actual messaging wire protocol.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

/// The ticketing REST API and the bot's service account on it.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Bearer token required on every admin route except `/status`.
    #[serde(default)]
    pub token: String,
    /// Extra shared secret required by `/logout`.
    #[serde(default)]
    pub logout_secret: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            token: String::new(),
            logout_secret: String::new(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReminderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Days a license stays valid after its last update.
    #[serde(default = "default_license_duration_days")]
    pub license_duration_days: i64,
    /// Inclusive day-range window; negative `min_days` includes licenses
    /// that already expired recently.
    #[serde(default)]
    pub min_days: i64,
    #[serde(default = "default_max_days")]
    pub max_days: i64,
    /// Broadcast destination (a group address). Empty disables sending.
    #[serde(default)]
    pub broadcast_to: String,
    /// Cron expressions for the daily slots, evaluated in the local offset.
    #[serde(default = "default_slots")]
    pub slots: Vec<String>,
    #[serde(default = "default_true")]
    pub dedup: bool,
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    /// Transport payload ceiling; longer batches are chunked at line breaks.
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl ReminderConfig {
    pub fn offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours.checked_mul(3600)?)
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            license_duration_days: default_license_duration_days(),
            min_days: 0,
            max_days: default_max_days(),
            broadcast_to: String::new(),
            slots: default_slots(),
            dedup: true,
            utc_offset_hours: default_utc_offset_hours(),
            max_message_len: default_max_message_len(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_license_duration_days() -> i64 {
    62
}
fn default_max_days() -> i64 {
    14
}
fn default_slots() -> Vec<String> {
    vec!["0 9 * * 1-5".into(), "30 15 * * 1-5".into()]
}
fn default_utc_offset_hours() -> i32 {
    -3
}
fn default_max_message_len() -> usize {
    3_500
}
fn default_tick_interval_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommandsConfig {
    #[serde(default = "default_marker")]
    pub marker: String,
}

impl CommandsConfig {
    pub fn marker_char(&self) -> char {
        self.marker.chars().next().unwrap_or('!')
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
        }
    }
}

fn default_marker() -> String {
    "!".to_string()
}
