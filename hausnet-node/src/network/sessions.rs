// Session Layer
//
// INTENTION:
// Negotiate and evict symmetric sessions between host pairs. Per unordered
// pair there is at most one live session; it becomes usable for symmetric
// encryption only once both sides have confirmed it. An expired session is
// replaced transparently, never repaired. A lookup miss on the decrypting
// side raises the dedicated, always-retriable session-not-found failure and
// purges local state so the next exchange re-handshakes.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use hausnet_common::logging::{Component, Logger};
use hausnet_common::types::{HostId, HostIdPair};
use hausnet_keys::symmetric::SYMMETRIC_KEY_LEN;

use crate::error::{Result, RpcError};

/// 128-bit session identifier.
pub type SessionId = Uuid;

/// The negotiated state for one host pair.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub pair: HostIdPair,
    pub key: [u8; SYMMETRIC_KEY_LEN],
    pub created: DateTime<Utc>,
    /// Hosts that have observed and accepted this session; a subset of the
    /// pair. Symmetric use requires the full pair.
    pub confirmed_by: HashSet<HostId>,
}

impl Session {
    /// Usable for the cheap path only when both sides have confirmed.
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_by.contains(self.pair.first())
            && self.confirmed_by.contains(self.pair.second())
    }

    pub fn is_expired(&self, max_age: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.created);
        age.to_std().map(|age| age > max_age).unwrap_or(false)
    }

    /// The descriptor that travels inside the asymmetric handshake payload.
    pub fn descriptor(&self) -> SessionDescriptor {
        SessionDescriptor {
            session_id: self.session_id,
            pair: self.pair.clone(),
            key: self.key,
            created: self.created,
        }
    }
}

/// Serialized `(sessionId, hostIdPair, sessionKey, created)` tuple carried in
/// the asymmetric handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_id: SessionId,
    pub pair: HostIdPair,
    pub key: [u8; SYMMETRIC_KEY_LEN],
    pub created: DateTime<Utc>,
}

#[derive(Default)]
struct SessionTable {
    by_pair: HashMap<HostIdPair, Session>,
    by_id: HashMap<SessionId, HostIdPair>,
}

impl SessionTable {
    fn insert(&mut self, session: Session) {
        self.by_id.insert(session.session_id, session.pair.clone());
        self.by_pair.insert(session.pair.clone(), session);
    }

    fn remove_pair(&mut self, pair: &HostIdPair) {
        if let Some(session) = self.by_pair.remove(pair) {
            self.by_id.remove(&session.session_id);
        }
    }
}

pub struct SessionManager {
    table: Mutex<SessionTable>,
    max_age: Duration,
    logger: Logger,
}

impl SessionManager {
    pub fn new(max_age: Duration, logger: &Logger) -> Self {
        Self {
            table: Mutex::new(SessionTable::default()),
            max_age,
            logger: logger.with_component(Component::Sessions),
        }
    }

    /// Return the existing non-expired session for the pair or atomically
    /// create a new one with fresh random key material.
    pub async fn get_or_create(&self, pair: HostIdPair) -> Session {
        let mut table = self.table.lock().await;
        if let Some(session) = table.by_pair.get(&pair) {
            if !session.is_expired(self.max_age) {
                return session.clone();
            }
            // Expired sessions are replaced, not repaired.
            table.remove_pair(&pair);
        }

        let session = Session {
            session_id: Uuid::new_v4(),
            pair: pair.clone(),
            key: hausnet_keys::symmetric::generate_key(),
            created: Utc::now(),
            confirmed_by: HashSet::new(),
        };
        self.logger.debug(format!(
            "created session {} for pair {pair}",
            session.session_id
        ));
        table.insert(session.clone());
        session
    }

    /// Idempotently record that one side has accepted the session.
    pub async fn confirm(&self, session_id: SessionId, by_host: &HostId) -> Result<()> {
        let mut table = self.table.lock().await;
        let pair = table
            .by_id
            .get(&session_id)
            .cloned()
            .ok_or_else(|| RpcError::SessionNotFound(session_id.to_string()))?;
        let session = table
            .by_pair
            .get_mut(&pair)
            .ok_or_else(|| RpcError::SessionNotFound(session_id.to_string()))?;
        if !session.pair.contains(by_host) {
            return Err(RpcError::Protocol(format!(
                "host '{by_host}' is not a participant of session {session_id}"
            )));
        }
        session.confirmed_by.insert(by_host.clone());
        Ok(())
    }

    /// Adopt a session received in an asymmetric handshake from `sender`:
    /// create the matching local session, self-confirm, and confirm the
    /// sender's side too, since sending the descriptor proves acceptance.
    pub async fn adopt(
        &self,
        descriptor: SessionDescriptor,
        local_host: &HostId,
        sender: &HostId,
    ) -> Result<()> {
        if !descriptor.pair.contains(local_host) || !descriptor.pair.contains(sender) {
            return Err(RpcError::Protocol(format!(
                "session descriptor pair {} does not match the exchange participants",
                descriptor.pair
            )));
        }

        let mut table = self.table.lock().await;
        if table.by_id.contains_key(&descriptor.session_id) {
            // Already known; confirmation below is idempotent.
        } else {
            table.remove_pair(&descriptor.pair);
            self.logger.debug(format!(
                "adopting session {} for pair {}",
                descriptor.session_id, descriptor.pair
            ));
            table.insert(Session {
                session_id: descriptor.session_id,
                pair: descriptor.pair.clone(),
                key: descriptor.key,
                created: descriptor.created,
                confirmed_by: HashSet::new(),
            });
        }

        if let Some(pair) = table.by_id.get(&descriptor.session_id).cloned() {
            if let Some(session) = table.by_pair.get_mut(&pair) {
                session.confirmed_by.insert(local_host.clone());
                session.confirmed_by.insert(sender.clone());
            }
        }
        Ok(())
    }

    /// The fully-confirmed, non-expired session for the pair, if any.
    pub async fn lookup_confirmed(&self, pair: &HostIdPair) -> Option<Session> {
        let table = self.table.lock().await;
        table
            .by_pair
            .get(pair)
            .filter(|session| session.is_confirmed() && !session.is_expired(self.max_age))
            .cloned()
    }

    /// Inbound lookup by session id. Expiry is checked lazily here: an
    /// expired or unknown id purges local state and raises the retriable
    /// session-not-found failure, forcing the peer to re-handshake.
    pub async fn lookup_by_id(&self, session_id: SessionId) -> Result<Session> {
        let mut table = self.table.lock().await;
        let pair = table
            .by_id
            .get(&session_id)
            .cloned()
            .ok_or_else(|| RpcError::SessionNotFound(session_id.to_string()))?;
        let session = table
            .by_pair
            .get(&pair)
            .cloned()
            .ok_or_else(|| RpcError::SessionNotFound(session_id.to_string()))?;
        if session.is_expired(self.max_age) {
            table.remove_pair(&pair);
            return Err(RpcError::SessionNotFound(format!(
                "session {session_id} expired"
            )));
        }
        Ok(session)
    }

    /// Observing a peer already using the symmetric path proves it holds the
    /// key, so mark its side confirmed even without an explicit handshake.
    pub async fn observe_symmetric_use(&self, session_id: SessionId, peer: &HostId) {
        let mut table = self.table.lock().await;
        if let Some(pair) = table.by_id.get(&session_id).cloned() {
            if let Some(session) = table.by_pair.get_mut(&pair) {
                if session.pair.contains(peer) {
                    session.confirmed_by.insert(peer.clone());
                }
            }
        }
    }

    /// Drop any session for the pair; the next exchange re-handshakes.
    pub async fn purge_pair(&self, pair: &HostIdPair) {
        let mut table = self.table.lock().await;
        table.remove_pair(pair);
    }

    /// Periodic sweep purging anything older than max-age plus the grace
    /// window. Safe to run concurrently with normal traffic.
    pub async fn evict(&self, grace: Duration) {
        let cutoff = self.max_age + grace;
        let mut table = self.table.lock().await;
        let expired: Vec<HostIdPair> = table
            .by_pair
            .values()
            .filter(|session| session.is_expired(cutoff))
            .map(|session| session.pair.clone())
            .collect();
        for pair in &expired {
            table.remove_pair(pair);
        }
        drop(table);
        if !expired.is_empty() {
            self.logger
                .debug(format!("swept {} expired session(s)", expired.len()));
        }
    }

    /// Spawn the session sweep on its fixed period.
    pub fn start_sweeper(
        self: &std::sync::Arc<Self>,
        period: Duration,
        grace: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.evict(grace).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> HostId {
        HostId::new(name).unwrap()
    }

    fn manager() -> SessionManager {
        SessionManager::new(
            Duration::from_secs(3600),
            &Logger::new_root(Component::Sessions, "test"),
        )
    }

    #[tokio::test]
    async fn one_live_session_per_pair() {
        let manager = manager();
        let pair = HostIdPair::new(host("a"), host("b"));
        let first = manager.get_or_create(pair.clone()).await;
        let second = manager.get_or_create(pair.clone()).await;
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.key, second.key);
    }

    #[tokio::test]
    async fn confirmation_is_idempotent_and_gates_symmetric_use() {
        let manager = manager();
        let a = host("a");
        let b = host("b");
        let pair = HostIdPair::new(a.clone(), b.clone());
        let session = manager.get_or_create(pair.clone()).await;

        assert!(manager.lookup_confirmed(&pair).await.is_none());

        manager.confirm(session.session_id, &a).await.unwrap();
        manager.confirm(session.session_id, &a).await.unwrap();
        assert!(manager.lookup_confirmed(&pair).await.is_none());

        manager.confirm(session.session_id, &b).await.unwrap();
        let confirmed = manager.lookup_confirmed(&pair).await.unwrap();
        assert_eq!(confirmed.confirmed_by.len(), 2);
    }

    #[tokio::test]
    async fn outsider_cannot_confirm() {
        let manager = manager();
        let pair = HostIdPair::new(host("a"), host("b"));
        let session = manager.get_or_create(pair).await;
        assert!(matches!(
            manager.confirm(session.session_id, &host("mallory")).await,
            Err(RpcError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn adoption_confirms_both_sides() {
        let sender_side = manager();
        let receiver_side = manager();
        let a = host("a");
        let b = host("b");
        let pair = HostIdPair::new(a.clone(), b.clone());

        let session = sender_side.get_or_create(pair.clone()).await;
        sender_side.confirm(session.session_id, &a).await.unwrap();

        receiver_side
            .adopt(session.descriptor(), &b, &a)
            .await
            .unwrap();
        let adopted = receiver_side.lookup_confirmed(&pair).await.unwrap();
        assert_eq!(adopted.session_id, session.session_id);
        assert_eq!(adopted.key, session.key);
    }

    #[tokio::test]
    async fn unknown_id_is_session_not_found() {
        let manager = manager();
        let err = manager.lookup_by_id(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn expired_session_is_replaced() {
        let manager = SessionManager::new(
            Duration::from_millis(0),
            &Logger::new_root(Component::Sessions, "test"),
        );
        let pair = HostIdPair::new(host("a"), host("b"));
        let first = manager.get_or_create(pair.clone()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.lookup_by_id(first.session_id).await.is_err());
        let second = manager.get_or_create(pair).await;
        assert_ne!(first.session_id, second.session_id);
    }
}
