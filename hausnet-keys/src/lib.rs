//! Hausnet Keys
//!
//! Identity and session cryptography for the hausnet RPC substrate:
//! - P-256 identity key pairs (ECDSA signatures, ECIES-style seal/open)
//! - AES-GCM-256 session-cipher helpers with explicit nonces
//! - An in-memory identity keystore exposing the opaque
//!   sign/encrypt/decrypt/verify capability consumed by the security layer

pub mod crypto;
pub mod error;
pub mod store;
pub mod symmetric;

pub use crypto::{IdentityKeyPair, PublicKey};
pub use error::{KeyError, Result};
pub use store::{IdentityCrypto, InMemoryIdentityStore};
pub use symmetric::{NONCE_LEN, SYMMETRIC_KEY_LEN};
