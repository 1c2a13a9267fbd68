// Identity keystore seam.
//
// INTENTION:
// The RPC substrate never touches curve types directly; it talks to this
// capability trait keyed by host id. The in-memory store is the process-wide
// implementation, constructed at bootstrap and passed in explicitly.

use std::collections::HashMap;
use std::sync::RwLock;

use hausnet_common::logging::{Component, Logger};
use hausnet_common::types::HostId;

use crate::crypto::{IdentityKeyPair, PublicKey};
use crate::error::{KeyError, Result};

/// Opaque sign/encrypt/decrypt/verify capability for host-to-host envelopes.
pub trait IdentityCrypto: Send + Sync {
    /// The host this store signs for.
    fn local_host(&self) -> &HostId;

    /// Sign `plaintext` as the local host and seal it to `recipient`.
    fn sign_and_seal(&self, recipient: &HostId, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Open a sealed message addressed to the local host and verify it was
    /// signed by `sender`.
    fn open_and_verify(&self, sender: &HostId, sealed: &[u8]) -> Result<Vec<u8>>;
}

/// In-memory identity store: the local key pair plus known peer public keys.
pub struct InMemoryIdentityStore {
    local_host: HostId,
    local_keys: IdentityKeyPair,
    peers: RwLock<HashMap<HostId, PublicKey>>,
    logger: Logger,
}

impl InMemoryIdentityStore {
    pub fn new(local_host: HostId, local_keys: IdentityKeyPair, logger: &Logger) -> Self {
        Self {
            local_host,
            local_keys,
            peers: RwLock::new(HashMap::new()),
            logger: logger.with_component(Component::Keys),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.local_keys.public_key()
    }

    /// Register (or replace) a peer's public identity key.
    pub fn register_peer(&self, host: HostId, key: PublicKey) {
        self.logger.debug(format!(
            "registering identity key {} for host '{host}'",
            key.fingerprint()
        ));
        let mut peers = match self.peers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        peers.insert(host, key);
    }

    fn peer_key(&self, host: &HostId) -> Result<PublicKey> {
        let peers = match self.peers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        peers
            .get(host)
            .cloned()
            .ok_or_else(|| KeyError::KeyNotFound(host.to_string()))
    }
}

impl IdentityCrypto for InMemoryIdentityStore {
    fn local_host(&self) -> &HostId {
        &self.local_host
    }

    fn sign_and_seal(&self, recipient: &HostId, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.peer_key(recipient)?;
        self.local_keys.sign_and_seal(&key, plaintext)
    }

    fn open_and_verify(&self, sender: &HostId, sealed: &[u8]) -> Result<Vec<u8>> {
        let key = self.peer_key(sender)?;
        self.local_keys.open_and_verify(&key, sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> Logger {
        Logger::new_root(Component::Keys, "test")
    }

    #[test]
    fn seals_between_registered_hosts() {
        let center = HostId::new("center").unwrap();
        let porch = HostId::new("porch").unwrap();

        let center_store = InMemoryIdentityStore::new(
            center.clone(),
            IdentityKeyPair::generate(),
            &logger(),
        );
        let porch_store =
            InMemoryIdentityStore::new(porch.clone(), IdentityKeyPair::generate(), &logger());

        center_store.register_peer(porch.clone(), porch_store.public_key());
        porch_store.register_peer(center.clone(), center_store.public_key());

        let sealed = center_store.sign_and_seal(&porch, b"ping").unwrap();
        let opened = porch_store.open_and_verify(&center, &sealed).unwrap();
        assert_eq!(opened, b"ping");
    }

    #[test]
    fn unknown_peer_is_an_error() {
        let store = InMemoryIdentityStore::new(
            HostId::new("center").unwrap(),
            IdentityKeyPair::generate(),
            &logger(),
        );
        let err = store
            .sign_and_seal(&HostId::new("ghost").unwrap(), b"x")
            .unwrap_err();
        assert!(matches!(err, KeyError::KeyNotFound(_)));
    }
}
