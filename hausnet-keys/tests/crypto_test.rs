// End-to-end identity cryptography over the keystore seam.

use hausnet_common::logging::{Component, Logger};
use hausnet_common::types::HostId;
use hausnet_keys::{IdentityCrypto, IdentityKeyPair, InMemoryIdentityStore, KeyError};

fn logger() -> Logger {
    Logger::new_root(Component::Keys, "test")
}

fn host(name: &str) -> HostId {
    HostId::new(name).unwrap()
}

fn paired_stores() -> (InMemoryIdentityStore, InMemoryIdentityStore) {
    let center = InMemoryIdentityStore::new(host("center"), IdentityKeyPair::generate(), &logger());
    let porch = InMemoryIdentityStore::new(host("porch"), IdentityKeyPair::generate(), &logger());
    center.register_peer(host("porch"), porch.public_key());
    porch.register_peer(host("center"), center.public_key());
    (center, porch)
}

#[test]
fn seal_and_open_between_two_hosts() {
    let (center, porch) = paired_stores();

    let sealed = center.sign_and_seal(&host("porch"), b"lights off").unwrap();
    let opened = porch.open_and_verify(&host("center"), &sealed).unwrap();
    assert_eq!(opened, b"lights off");

    // And the other direction with independent key material.
    let sealed = porch.sign_and_seal(&host("center"), b"motion detected").unwrap();
    let opened = center.open_and_verify(&host("porch"), &sealed).unwrap();
    assert_eq!(opened, b"motion detected");
}

#[test]
fn sealed_bytes_differ_per_message() {
    let (center, _porch) = paired_stores();
    let a = center.sign_and_seal(&host("porch"), b"same").unwrap();
    let b = center.sign_and_seal(&host("porch"), b"same").unwrap();
    // Fresh ephemeral key and nonce every time.
    assert_ne!(a, b);
}

#[test]
fn tampered_sealed_message_is_rejected() {
    let (center, porch) = paired_stores();
    let mut sealed = center.sign_and_seal(&host("porch"), b"unlock door").unwrap();
    let last = sealed.len() - 1;
    sealed[last] ^= 0x01;
    assert!(porch.open_and_verify(&host("center"), &sealed).is_err());
}

#[test]
fn message_from_an_unregistered_host_is_rejected() {
    let (center, porch) = paired_stores();
    let sealed = center.sign_and_seal(&host("porch"), b"hello").unwrap();
    let err = porch.open_and_verify(&host("garage"), &sealed).unwrap_err();
    assert!(matches!(err, KeyError::KeyNotFound(_)));
}

#[test]
fn identity_survives_secret_byte_round_trip() {
    let original = IdentityKeyPair::generate();
    let restored = IdentityKeyPair::from_secret_bytes(&original.secret_bytes()).unwrap();
    assert_eq!(original.public_key(), restored.public_key());
    assert_eq!(
        original.public_key().fingerprint(),
        restored.public_key().fingerprint()
    );

    // A message sealed to the original opens with the restored identity.
    let peer = IdentityKeyPair::generate();
    let sealed = peer
        .sign_and_seal(&original.public_key(), b"state sync")
        .unwrap();
    let opened = restored.open_and_verify(&peer.public_key(), &sealed).unwrap();
    assert_eq!(opened, b"state sync");
}
