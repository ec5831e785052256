//! Voice session store and ephemeral TURN credentials.
//!
//! Sessions are owned by the RPC session that started them. TURN
//! credentials follow the shared-secret scheme: username is
//! `<expiry unix>:<voice session id>`, password is the hex HMAC-SHA256
//! of the username under the configured secret.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::Sha256;
use uuid::Uuid;

use wb_domain::config::VoiceConfig;

use crate::rpc::{
    RpcError, VOICE_BAD_PAYLOAD, VOICE_LIMIT_REACHED, VOICE_NOT_OWNER,
    VOICE_SESSION_EXPIRED, VOICE_SESSION_NOT_FOUND, VOICE_TURN_UNCONFIGURED,
};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceSession {
    pub id: String,
    /// RPC session that owns this voice session.
    pub owner_session: String,
    pub room_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub candidate_count: usize,
}

struct VoiceEntry {
    session: VoiceSession,
    candidates: Vec<serde_json::Value>,
}

pub struct VoiceSessionStore {
    config: VoiceConfig,
    sessions: RwLock<HashMap<String, VoiceEntry>>,
}

impl VoiceSessionStore {
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a voice session for `owner_session`.
    pub fn start(
        &self,
        owner_session: &str,
        room_id: Option<String>,
    ) -> Result<(VoiceSession, Vec<IceServer>), RpcError> {
        if self.config.turn_url.is_empty() || self.config.turn_secret.is_empty() {
            return Err(RpcError::new(
                VOICE_TURN_UNCONFIGURED,
                "no TURN relay is configured",
            ));
        }

        let mut sessions = self.sessions.write();
        if sessions.len() >= self.config.max_sessions {
            return Err(RpcError::new(
                VOICE_LIMIT_REACHED,
                format!("voice session limit ({}) reached", self.config.max_sessions),
            ));
        }

        let now = Utc::now();
        let session = VoiceSession {
            id: Uuid::new_v4().to_string(),
            owner_session: owner_session.to_string(),
            room_id,
            created_at: now,
            expires_at: now + Duration::seconds(self.config.credential_ttl_secs as i64),
            candidate_count: 0,
        };
        let servers = self.ice_servers_for(&session);
        sessions.insert(
            session.id.clone(),
            VoiceEntry {
                session: session.clone(),
                candidates: Vec::new(),
            },
        );
        tracing::info!(voice = %session.id, "voice session started");
        Ok((session, servers))
    }

    /// STUN + TURN entries with fresh ephemeral credentials.
    pub fn ice_servers(&self, voice_id: &str, caller: &str) -> Result<Vec<IceServer>, RpcError> {
        let sessions = self.sessions.read();
        let entry = sessions
            .get(voice_id)
            .ok_or_else(|| RpcError::new(VOICE_SESSION_NOT_FOUND, "voice session not found"))?;
        check_owner(&entry.session, caller)?;
        check_live(&entry.session)?;
        Ok(self.ice_servers_for(&entry.session))
    }

    /// Record an ICE candidate payload from the caller.
    pub fn add_candidate(
        &self,
        voice_id: &str,
        caller: &str,
        candidate: serde_json::Value,
    ) -> Result<usize, RpcError> {
        if !candidate.is_object() || candidate.get("candidate").is_none() {
            return Err(RpcError::new(
                VOICE_BAD_PAYLOAD,
                "candidate payload must be an object with a 'candidate' field",
            ));
        }

        let mut sessions = self.sessions.write();
        let entry = sessions
            .get_mut(voice_id)
            .ok_or_else(|| RpcError::new(VOICE_SESSION_NOT_FOUND, "voice session not found"))?;
        check_owner(&entry.session, caller)?;
        check_live(&entry.session)?;

        entry.candidates.push(candidate);
        entry.session.candidate_count = entry.candidates.len();
        Ok(entry.candidates.len())
    }

    pub fn end(&self, voice_id: &str, caller: &str) -> Result<VoiceSession, RpcError> {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .get(voice_id)
            .ok_or_else(|| RpcError::new(VOICE_SESSION_NOT_FOUND, "voice session not found"))?;
        check_owner(&entry.session, caller)?;
        let entry = sessions.remove(voice_id).ok_or_else(|| {
            RpcError::new(VOICE_SESSION_NOT_FOUND, "voice session not found")
        })?;
        tracing::info!(voice = %voice_id, "voice session ended");
        Ok(entry.session)
    }

    pub fn list(&self, caller: &str) -> Vec<VoiceSession> {
        self.sessions
            .read()
            .values()
            .filter(|e| e.session.owner_session == caller)
            .map(|e| e.session.clone())
            .collect()
    }

    /// Drop expired sessions; returns how many.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, e| e.session.expires_at > now);
        before - sessions.len()
    }

    fn ice_servers_for(&self, session: &VoiceSession) -> Vec<IceServer> {
        let username = format!("{}:{}", session.expires_at.timestamp(), session.id);
        let mut mac = HmacSha256::new_from_slice(self.config.turn_secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(username.as_bytes());
        let credential = hex::encode(mac.finalize().into_bytes());

        let mut servers = Vec::new();
        if !self.config.stun_url.is_empty() {
            servers.push(IceServer {
                urls: vec![self.config.stun_url.clone()],
                username: None,
                credential: None,
            });
        }
        servers.push(IceServer {
            urls: vec![self.config.turn_url.clone()],
            username: Some(username),
            credential: Some(credential),
        });
        servers
    }
}

fn check_owner(session: &VoiceSession, caller: &str) -> Result<(), RpcError> {
    if session.owner_session != caller {
        return Err(RpcError::new(
            VOICE_NOT_OWNER,
            "voice session belongs to another session",
        ));
    }
    Ok(())
}

fn check_live(session: &VoiceSession) -> Result<(), RpcError> {
    if session.expires_at <= Utc::now() {
        return Err(RpcError::new(VOICE_SESSION_EXPIRED, "voice session expired"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> VoiceSessionStore {
        VoiceSessionStore::new(VoiceConfig {
            turn_url: "turn:turn.example.org:3478".into(),
            turn_secret: "shhh".into(),
            max_sessions: 2,
            ..Default::default()
        })
    }

    #[test]
    fn start_returns_turn_credentials() {
        let store = store();
        let (session, servers) = store.start("rpc-1", None).unwrap();
        let turn = servers.iter().find(|s| s.username.is_some()).unwrap();
        let username = turn.username.as_ref().unwrap();
        assert!(username.ends_with(&session.id));
        assert_eq!(turn.credential.as_ref().unwrap().len(), 64);
    }

    #[test]
    fn unconfigured_turn_is_32003() {
        let store = VoiceSessionStore::new(VoiceConfig::default());
        let err = store.start("rpc-1", None).unwrap_err();
        assert_eq!(err.code, VOICE_TURN_UNCONFIGURED);
    }

    #[test]
    fn session_limit_is_32002() {
        let store = store();
        store.start("rpc-1", None).unwrap();
        store.start("rpc-1", None).unwrap();
        let err = store.start("rpc-1", None).unwrap_err();
        assert_eq!(err.code, VOICE_LIMIT_REACHED);
    }

    #[test]
    fn ownership_is_enforced() {
        let store = store();
        let (session, _) = store.start("rpc-1", None).unwrap();
        let err = store.end(&session.id, "rpc-2").unwrap_err();
        assert_eq!(err.code, VOICE_NOT_OWNER);
        assert!(store.end(&session.id, "rpc-1").is_ok());
    }

    #[test]
    fn bad_candidate_payload_is_32004() {
        let store = store();
        let (session, _) = store.start("rpc-1", None).unwrap();
        let err = store
            .add_candidate(&session.id, "rpc-1", serde_json::json!("not an object"))
            .unwrap_err();
        assert_eq!(err.code, VOICE_BAD_PAYLOAD);

        let count = store
            .add_candidate(
                &session.id,
                "rpc-1",
                serde_json::json!({"candidate": "candidate:1 1 UDP ..."}),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn unknown_session_is_32001() {
        let store = store();
        let err = store.ice_servers("missing", "rpc-1").unwrap_err();
        assert_eq!(err.code, VOICE_SESSION_NOT_FOUND);
    }
}
