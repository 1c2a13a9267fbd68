// Identity cryptography for the transport-security layer.
//
// INTENTION:
// Provide the opaque sign/encrypt/decrypt/verify capability the RPC substrate
// consumes for its expensive first-contact handshake. A single P-256 secret
// backs both halves: ECDSA for signatures, static ECDH (against an ephemeral
// sender key) for an ECIES-style seal with HKDF-SHA256 and AES-GCM-256.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{ecdh, PublicKey as P256PublicKey, SecretKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{KeyError, Result};
use crate::symmetric::{self, NONCE_LEN, SYMMETRIC_KEY_LEN};

const ECIES_HKDF_INFO: &[u8] = b"hausnet_identity_seal";

/// Public identity key, carried as SEC1 uncompressed bytes so it can be
/// stored and exchanged without the curve types leaking across the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    bytes: Vec<u8>,
}

impl PublicKey {
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self> {
        // Validate eagerly so a bad key fails at registration, not at use.
        P256PublicKey::from_sec1_bytes(bytes)?;
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Short hex fingerprint of the key for log lines.
    pub fn fingerprint(&self) -> String {
        use sha2::Digest;
        let digest = sha2::Sha256::digest(&self.bytes);
        hex::encode(&digest[..8])
    }

    fn to_p256(&self) -> Result<P256PublicKey> {
        Ok(P256PublicKey::from_sec1_bytes(&self.bytes)?)
    }

    fn to_verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_sec1_bytes(&self.bytes)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))
    }
}

/// A signed-then-sealed message: the signature rides inside the ciphertext,
/// so only the recipient learns who signed what.
#[derive(Serialize, Deserialize)]
struct SignedPayload {
    payload: Vec<u8>,
    signature: Vec<u8>,
}

/// Wire form of an identity-sealed message.
#[derive(Serialize, Deserialize)]
struct SealedMessage {
    ephemeral_public: Vec<u8>,
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

/// The local participant's identity key pair.
#[derive(Clone)]
pub struct IdentityKeyPair {
    secret: SecretKey,
}

impl Default for IdentityKeyPair {
    fn default() -> Self {
        Self::generate()
    }
}

impl IdentityKeyPair {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    /// Restore an identity from SEC1 secret-key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret =
            SecretKey::from_slice(bytes).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Ok(Self { secret })
    }

    pub fn secret_bytes(&self) -> Vec<u8> {
        self.secret.to_bytes().to_vec()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            bytes: self
                .secret
                .public_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
        }
    }

    /// Sign a message with the identity key (ECDSA P-256, DER signature).
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::from(&self.secret);
        let signature: Signature = signing_key.sign(message);
        signature.to_der().as_bytes().to_vec()
    }

    /// Verify a DER signature against a peer's public identity key.
    pub fn verify(public_key: &PublicKey, message: &[u8], signature: &[u8]) -> Result<()> {
        let verifying_key = public_key.to_verifying_key()?;
        let signature = Signature::from_der(signature)
            .map_err(|e| KeyError::SignatureError(e.to_string()))?;
        verifying_key
            .verify(message, &signature)
            .map_err(|e| KeyError::SignatureError(format!("verification failed: {e}")))
    }

    /// Sign `plaintext` with the local identity and seal the result to the
    /// recipient's public key. Returns opaque bytes suitable for the wire.
    pub fn sign_and_seal(&self, recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
        let signed = SignedPayload {
            payload: plaintext.to_vec(),
            signature: self.sign(plaintext),
        };
        let body = bincode::serialize(&signed)?;

        let ephemeral = ecdh::EphemeralSecret::random(&mut OsRng);
        let ephemeral_public = ephemeral
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        let shared = ephemeral.diffie_hellman(&recipient.to_p256()?);
        let key = derive_seal_key(shared.raw_secret_bytes().as_slice())?;

        let (ciphertext, nonce) = symmetric::encrypt(&key, &body)?;
        Ok(bincode::serialize(&SealedMessage {
            ephemeral_public,
            nonce,
            ciphertext,
        })?)
    }

    /// Open a sealed message with the local identity and verify the inner
    /// signature against the claimed sender's public key.
    pub fn open_and_verify(&self, sender: &PublicKey, sealed: &[u8]) -> Result<Vec<u8>> {
        let sealed: SealedMessage = bincode::deserialize(sealed)?;
        let ephemeral = P256PublicKey::from_sec1_bytes(&sealed.ephemeral_public)?;
        let shared = ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), ephemeral.as_affine());
        let key = derive_seal_key(shared.raw_secret_bytes().as_slice())?;

        let body = symmetric::decrypt(&key, &sealed.ciphertext, &sealed.nonce)?;
        let signed: SignedPayload = bincode::deserialize(&body)?;
        Self::verify(sender, &signed.payload, &signed.signature)?;
        Ok(signed.payload)
    }
}

fn derive_seal_key(ikm: &[u8]) -> Result<[u8; SYMMETRIC_KEY_LEN]> {
    let hk = hkdf::Hkdf::<sha2::Sha256>::new(None, ikm);
    let mut okm = [0u8; SYMMETRIC_KEY_LEN];
    hk.expand(ECIES_HKDF_INFO, &mut okm)?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();

        let sealed = alice
            .sign_and_seal(&bob.public_key(), b"dim the kitchen to 40%")
            .unwrap();
        let opened = bob.open_and_verify(&alice.public_key(), &sealed).unwrap();
        assert_eq!(opened, b"dim the kitchen to 40%");
    }

    #[test]
    fn wrong_claimed_sender_is_rejected() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let mallory = IdentityKeyPair::generate();

        let sealed = alice.sign_and_seal(&bob.public_key(), b"hello").unwrap();
        assert!(bob.open_and_verify(&mallory.public_key(), &sealed).is_err());
    }

    #[test]
    fn only_the_recipient_can_open() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let eve = IdentityKeyPair::generate();

        let sealed = alice.sign_and_seal(&bob.public_key(), b"secret").unwrap();
        assert!(eve.open_and_verify(&alice.public_key(), &sealed).is_err());
    }
}
