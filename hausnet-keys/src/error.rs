use thiserror::Error;

/// Error types for the hausnet-keys crate
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("Signature error: {0}")]
    SignatureError(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<p256::ecdsa::Error> for KeyError {
    fn from(err: p256::ecdsa::Error) -> Self {
        KeyError::SignatureError(err.to_string())
    }
}

impl From<p256::elliptic_curve::Error> for KeyError {
    fn from(err: p256::elliptic_curve::Error) -> Self {
        KeyError::InvalidKey(err.to_string())
    }
}

impl From<aes_gcm::Error> for KeyError {
    fn from(_: aes_gcm::Error) -> Self {
        KeyError::CryptoError("AEAD operation failed".to_string())
    }
}

impl From<hkdf::InvalidLength> for KeyError {
    fn from(err: hkdf::InvalidLength) -> Self {
        KeyError::CryptoError(format!("HKDF error: {err}"))
    }
}

impl From<bincode::Error> for KeyError {
    fn from(err: bincode::Error) -> Self {
        KeyError::SerializationError(err.to_string())
    }
}

/// Result type for hausnet-keys operations
pub type Result<T> = std::result::Result<T, KeyError>;
