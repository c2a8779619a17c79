//! HTTP client for the ticketing REST API.
//!
//! The API authenticates with a JWT issued by its login route; the client
//! re-logs-in on its own whenever the token is missing or within five
//! minutes of expiry, so callers never deal with auth at all.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::BackendConfig;
use crate::traits::TicketBackend;
use crate::types::{
    Client, DomainUser, NewPendingTask, NewTicket, StatusCount, Ticket, TicketFilter,
};

/// Re-login this long before the token actually expires.
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// Assumed lifetime when a token's `exp` claim cannot be read.
const FALLBACK_TOKEN_MINUTES: i64 = 30;

struct BearerToken {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    token: Mutex<Option<BearerToken>>,
}

/// Extract the `exp` claim (seconds since epoch) from a JWT without
/// verifying it; verification is the server's job, we only need the expiry.
fn decode_jwt_exp(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

fn needs_refresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= expires_at - ChronoDuration::minutes(REFRESH_MARGIN_MINUTES)
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

impl HttpBackend {
    pub fn new(cfg: &BackendConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            token: Mutex::new(None),
        }
    }

    async fn login(&self) -> anyhow::Result<BearerToken> {
        let resp = self
            .http
            .post(format!("{}/api/auth/login", self.base_url))
            .json(&json!({ "username": self.username, "password": self.password }))
            .send()
            .await?
            .error_for_status()?;
        let body: LoginResponse = resp.json().await?;
        let expires_at = decode_jwt_exp(&body.token).unwrap_or_else(|| {
            warn!("token has no readable exp claim; assuming a short lifetime");
            Utc::now() + ChronoDuration::minutes(FALLBACK_TOKEN_MINUTES)
        });
        info!(expires_at = %expires_at, "authenticated against ticketing backend");
        Ok(BearerToken {
            token: body.token,
            expires_at,
        })
    }

    /// Current bearer token, re-logging-in when missing or about to expire.
    async fn bearer(&self) -> anyhow::Result<String> {
        let mut guard = self.token.lock().await;
        let stale = match guard.as_ref() {
            Some(tok) => needs_refresh(tok.expires_at, Utc::now()),
            None => true,
        };
        if stale {
            *guard = Some(self.login().await?);
        }
        Ok(guard.as_ref().map(|t| t.token.clone()).unwrap_or_default())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<T> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn send_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl TicketBackend for HttpBackend {
    async fn user_by_phone(&self, phone: &str) -> anyhow::Result<Option<DomainUser>> {
        let users: Vec<DomainUser> = self
            .get_json("/api/users", &[("phone", phone.to_string())])
            .await?;
        Ok(users.into_iter().next())
    }

    async fn user_by_username(&self, username: &str) -> anyhow::Result<Option<DomainUser>> {
        let users: Vec<DomainUser> = self
            .get_json("/api/users", &[("username", username.to_string())])
            .await?;
        Ok(users.into_iter().next())
    }

    async fn client_by_code(&self, code: &str) -> anyhow::Result<Option<Client>> {
        let clients: Vec<Client> = self
            .get_json("/api/clients", &[("common", code.to_string())])
            .await?;
        Ok(clients.into_iter().next())
    }

    async fn active_clients(&self) -> anyhow::Result<Vec<Client>> {
        self.get_json("/api/clients", &[("active", "true".to_string())])
            .await
    }

    async fn create_ticket(&self, new: NewTicket) -> anyhow::Result<Ticket> {
        self.send_json(reqwest::Method::POST, "/api/incidents", &new)
            .await
    }

    async fn ticket_by_sequence(&self, seq: i64) -> anyhow::Result<Option<Ticket>> {
        let tickets: Vec<Ticket> = self
            .get_json("/api/incidents", &[("sequenceNumber", seq.to_string())])
            .await?;
        Ok(tickets.into_iter().next())
    }

    async fn update_ticket(&self, ticket: &Ticket) -> anyhow::Result<()> {
        let _: serde_json::Value = self
            .send_json(
                reqwest::Method::PUT,
                &format!("/api/incidents/{}", ticket.id),
                ticket,
            )
            .await?;
        Ok(())
    }

    async fn delete_ticket(&self, seq: i64) -> anyhow::Result<()> {
        let Some(ticket) = self.ticket_by_sequence(seq).await? else {
            anyhow::bail!("ticket {seq} not found");
        };
        let token = self.bearer().await?;
        self.http
            .delete(format!("{}/api/incidents/{}", self.base_url, ticket.id))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn tickets_by_filter(&self, filter: &TicketFilter) -> anyhow::Result<Vec<Ticket>> {
        let query = match filter {
            TicketFilter::Status(status) => vec![("status", status.as_str().to_string())],
            TicketFilter::CreatedBetween(from, to) => vec![
                ("from", from.to_rfc3339()),
                ("to", to.to_rfc3339()),
            ],
        };
        self.get_json("/api/incidents", &query).await
    }

    async fn tickets_assigned_to(&self, user_id: &str) -> anyhow::Result<Vec<Ticket>> {
        self.get_json(
            "/api/incidents",
            &[("assignedUserId", user_id.to_string())],
        )
        .await
    }

    async fn create_pending(&self, new: NewPendingTask) -> anyhow::Result<()> {
        let _: serde_json::Value = self
            .send_json(reqwest::Method::POST, "/api/pending", &new)
            .await?;
        Ok(())
    }

    async fn ticket_status_summary(&self, days: Option<i64>) -> anyhow::Result<Vec<StatusCount>> {
        let mut query = Vec::new();
        if let Some(days) = days {
            query.push(("days", days.to_string()));
        }
        self.get_json("/api/incidents/summary", &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jwt(exp: i64) -> String {
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"{\"alg\":\"HS256\"}");
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(format!("{{\"exp\":{exp},\"sub\":\"bot\"}}"));
        format!("{header}.{payload}.firma")
    }

    #[test]
    fn exp_claim_is_decoded() {
        let exp = 1_900_000_000;
        let decoded = decode_jwt_exp(&fake_jwt(exp)).unwrap();
        assert_eq!(decoded.timestamp(), exp);
    }

    #[test]
    fn malformed_tokens_decode_to_none() {
        assert!(decode_jwt_exp("not-a-jwt").is_none());
        assert!(decode_jwt_exp("a.b.c").is_none());
        assert!(decode_jwt_exp("").is_none());
    }

    #[test]
    fn refresh_happens_inside_the_margin() {
        let now = Utc::now();
        assert!(!needs_refresh(now + ChronoDuration::minutes(10), now));
        assert!(needs_refresh(now + ChronoDuration::minutes(4), now));
        assert!(needs_refresh(now - ChronoDuration::minutes(1), now));
    }
}
