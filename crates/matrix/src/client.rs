//! Thin client for the Matrix client-server API.
//!
//! Covers the slice of the API the bridge needs: login, whoami, token
//! refresh, long-poll sync, sending messages (optionally on behalf of a
//! ghost user), and room joins. Transient failures on idempotent calls
//! retry with backoff; everything else surfaces as a downstream error.

use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;

use wb_domain::config::MatrixConfig;
use wb_domain::{Error, Result};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_MS: u64 = 500;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One timeline message event as the bridge sees it.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    pub room_id: String,
    pub event_id: String,
    pub sender: String,
    pub body: String,
    pub origin_server_ts: i64,
}

/// The result of one `/sync` long poll.
#[derive(Debug, Clone)]
pub struct SyncBatch {
    pub next_batch: String,
    pub events: Vec<RoomEvent>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhoamiResponse {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    event_id: String,
}

#[derive(Debug, Deserialize)]
struct MatrixError {
    errcode: String,
    #[serde(default)]
    error: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MatrixClient {
    http: reqwest::Client,
    homeserver: String,
    user_id: String,
    access_token: RwLock<String>,
    refresh_token: RwLock<Option<String>>,
}

impl MatrixClient {
    pub fn new(config: &MatrixConfig) -> Result<Self> {
        if config.homeserver.is_empty() {
            return Err(Error::Config("matrix.homeserver is not set".into()));
        }
        let http = reqwest::Client::builder()
            // Sync long-polls block up to sync_timeout_ms; leave headroom.
            .timeout(Duration::from_millis(config.sync_timeout_ms + 15_000))
            .build()
            .map_err(|e| Error::downstream("homeserver", e.to_string()))?;

        Ok(Self {
            http,
            homeserver: config.homeserver.trim_end_matches('/').to_string(),
            user_id: config.user_id.clone(),
            access_token: RwLock::new(config.access_token.clone()),
            refresh_token: RwLock::new(if config.refresh_token.is_empty() {
                None
            } else {
                Some(config.refresh_token.clone())
            }),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/_matrix/client/v3{path}", self.homeserver)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.read())
    }

    async fn check<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| Error::downstream("homeserver", e.to_string()));
        }
        let err: MatrixError = response.json().await.unwrap_or(MatrixError {
            errcode: format!("HTTP_{status}"),
            error: String::new(),
        });
        Err(Error::downstream(
            "homeserver",
            format!("{}: {}", err.errcode, err.error),
        ))
    }

    // ── auth ───────────────────────────────────────────────────────

    /// Password login; stores the returned tokens on the client.
    pub async fn login(&self, password: &str) -> Result<String> {
        let body = json!({
            "type": "m.login.password",
            "identifier": { "type": "m.id.user", "user": self.user_id },
            "password": password,
            "refresh_token": true,
        });
        let response = self
            .http
            .post(self.url("/login"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::downstream("homeserver", e.to_string()))?;
        let login: LoginResponse = Self::check(response).await?;

        *self.access_token.write() = login.access_token;
        *self.refresh_token.write() = login.refresh_token;
        tracing::info!(user = %login.user_id, "matrix login succeeded");
        Ok(login.user_id)
    }

    /// Rotate the access token using the stored refresh token.
    pub async fn refresh(&self) -> Result<()> {
        let refresh_token = self
            .refresh_token
            .read()
            .clone()
            .ok_or_else(|| Error::Config("no refresh token available".into()))?;

        let response = self
            .http
            .post(self.url("/refresh"))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| Error::downstream("homeserver", e.to_string()))?;
        let refreshed: RefreshResponse = Self::check(response).await?;

        *self.access_token.write() = refreshed.access_token;
        if refreshed.refresh_token.is_some() {
            *self.refresh_token.write() = refreshed.refresh_token;
        }
        tracing::debug!("matrix access token refreshed");
        Ok(())
    }

    /// Verify the stored token; returns the server-reported user id.
    pub async fn whoami(&self) -> Result<String> {
        let whoami: WhoamiResponse = self.get_with_retry("/account/whoami", &[]).await?;
        Ok(whoami.user_id)
    }

    // ── sync ───────────────────────────────────────────────────────

    /// One long-poll sync from the given cursor.
    pub async fn sync(&self, since: Option<&str>, timeout_ms: u64) -> Result<SyncBatch> {
        let timeout = timeout_ms.to_string();
        let mut query: Vec<(&str, &str)> = vec![("timeout", &timeout)];
        if let Some(since) = since {
            query.push(("since", since));
        }

        let raw: serde_json::Value = self.get_with_retry("/sync", &query).await?;
        Ok(parse_sync(&raw))
    }

    // ── messaging ──────────────────────────────────────────────────

    /// Send a text message. `as_user` impersonates a ghost user via the
    /// application-service `user_id` query parameter.
    pub async fn send_message(
        &self,
        room_id: &str,
        body: &str,
        as_user: Option<&str>,
    ) -> Result<String> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        let mut url = self.url(&format!(
            "/rooms/{room_id}/send/m.room.message/{txn_id}"
        ));
        if let Some(user) = as_user {
            url = format!("{url}?user_id={user}");
        }

        let response = self
            .http
            .put(url)
            .header("Authorization", self.bearer())
            .json(&json!({ "msgtype": "m.text", "body": body }))
            .send()
            .await
            .map_err(|e| Error::downstream("homeserver", e.to_string()))?;
        let sent: SendResponse = Self::check(response).await?;
        Ok(sent.event_id)
    }

    /// Join a room, optionally as a ghost user.
    pub async fn join_room(&self, room_id: &str, as_user: Option<&str>) -> Result<()> {
        let mut url = self.url(&format!("/rooms/{room_id}/join"));
        if let Some(user) = as_user {
            url = format!("{url}?user_id={user}");
        }
        let response = self
            .http
            .post(url)
            .header("Authorization", self.bearer())
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| Error::downstream("homeserver", e.to_string()))?;
        let _: serde_json::Value = Self::check(response).await?;
        Ok(())
    }

    // ── retry helper ───────────────────────────────────────────────

    /// GET with exponential backoff. Only used for idempotent calls.
    async fn get_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let mut last_err = None;
        for attempt in 0..RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(RETRY_BASE_MS << attempt)).await;
            }
            let result = self
                .http
                .get(self.url(path))
                .query(query)
                .header("Authorization", self.bearer())
                .send()
                .await;
            match result {
                Ok(response) => return Self::check(response).await,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    tracing::debug!(path, attempt, error = %e, "retrying homeserver call");
                    last_err = Some(e);
                }
                Err(e) => return Err(Error::downstream("homeserver", e.to_string())),
            }
        }
        Err(Error::downstream(
            "homeserver",
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "retries exhausted".into()),
        ))
    }
}

// Debug must not print tokens.
impl std::fmt::Debug for MatrixClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixClient")
            .field("homeserver", &self.homeserver)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Pull `m.room.message` timeline events out of a raw sync response.
fn parse_sync(raw: &serde_json::Value) -> SyncBatch {
    let next_batch = raw["next_batch"].as_str().unwrap_or_default().to_string();
    let mut events = Vec::new();

    if let Some(rooms) = raw["rooms"]["join"].as_object() {
        for (room_id, room) in rooms {
            let timeline = room["timeline"]["events"].as_array();
            for event in timeline.into_iter().flatten() {
                if event["type"].as_str() != Some("m.room.message") {
                    continue;
                }
                let Some(body) = event["content"]["body"].as_str() else {
                    continue;
                };
                events.push(RoomEvent {
                    room_id: room_id.clone(),
                    event_id: event["event_id"].as_str().unwrap_or_default().to_string(),
                    sender: event["sender"].as_str().unwrap_or_default().to_string(),
                    body: body.to_string(),
                    origin_server_ts: event["origin_server_ts"].as_i64().unwrap_or_default(),
                });
            }
        }
    }

    SyncBatch { next_batch, events }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sync_extracts_message_events() {
        let raw = serde_json::json!({
            "next_batch": "s72594_4483_1934",
            "rooms": { "join": { "!room:example.org": { "timeline": { "events": [
                {
                    "type": "m.room.message",
                    "event_id": "$ev1",
                    "sender": "@alice:example.org",
                    "origin_server_ts": 1_700_000_000_000i64,
                    "content": { "msgtype": "m.text", "body": "hello" }
                },
                { "type": "m.room.member", "event_id": "$ev2", "sender": "@bob:example.org" }
            ]}}}}
        });
        let batch = parse_sync(&raw);
        assert_eq!(batch.next_batch, "s72594_4483_1934");
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].body, "hello");
        assert_eq!(batch.events[0].room_id, "!room:example.org");
    }

    #[test]
    fn debug_does_not_leak_tokens() {
        let client = MatrixClient::new(&MatrixConfig {
            homeserver: "https://matrix.example.org".into(),
            user_id: "@bridge:example.org".into(),
            access_token: "syt_secret_token".into(),
            ..Default::default()
        })
        .unwrap();
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("syt_secret_token"));
    }
}
