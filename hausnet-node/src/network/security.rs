// Transport Security Wrapper
//
// INTENTION:
// Wrap outbound/inbound envelope bytes so that everything on the wire is
// either signed+sealed to the recipient's identity key (asymmetric handshake
// mode) or encrypted under a fully-confirmed symmetric session. First contact
// between a pair is always the expensive path; its payload carries the
// session descriptor so the receiver can adopt the session and both sides can
// switch to the cheap path until it expires.
//
// Wire format, bit-exact, all integers big-endian:
//   [0..6)  magic "itlihs"
//   [6]     version 0x00
//   [7]     mode: 0x00 asymmetric, 0x01 symmetric
// Asymmetric body (inside sign+seal):
//   [i32 len][session descriptor][i32 len][application payload]
// Symmetric body:
//   [i32 cipher ordinal][u8 len][session id][u8 len][IV][i32 len][ciphertext]
// Symmetric plaintext (hash-then-encrypt; the hash must stay inside the
// ciphertext, integrity derives from possession of the session key):
//   [i32 hash ordinal][i32 len][application payload][u8 len][SHA-256(payload)]

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use sha2::{Digest, Sha256};

use hausnet_common::logging::{Component, Logger};
use hausnet_common::types::{HostId, HostIdPair};
use hausnet_keys::store::IdentityCrypto;
use hausnet_keys::symmetric;

use crate::error::{Result, RpcError};
use crate::messages::{EnvelopeCodec, RpcEnvelope};
use crate::network::sessions::{SessionDescriptor, SessionId, SessionManager};

pub const MAGIC: [u8; 6] = *b"itlihs";
pub const VERSION: u8 = 0x00;
pub const MODE_ASYMMETRIC: u8 = 0x00;
pub const MODE_SYMMETRIC: u8 = 0x01;

const SHA256_LEN: usize = 32;
const SESSION_ID_LEN: usize = 16;

/// Symmetric cipher identifiers carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherType {
    Aes256Gcm = 0,
}

impl CipherType {
    fn from_ordinal(ordinal: i32) -> Result<Self> {
        match ordinal {
            0 => Ok(CipherType::Aes256Gcm),
            other => Err(RpcError::Protocol(format!("unknown cipher ordinal {other}"))),
        }
    }
}

/// Integrity hash identifiers carried inside the ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashType {
    Sha256 = 0,
}

impl HashType {
    fn from_ordinal(ordinal: i32) -> Result<Self> {
        match ordinal {
            0 => Ok(HashType::Sha256),
            other => Err(RpcError::Protocol(format!("unknown hash ordinal {other}"))),
        }
    }
}

pub struct SecurityWrapper {
    identity: Arc<dyn IdentityCrypto>,
    sessions: Arc<SessionManager>,
    codec: Arc<dyn EnvelopeCodec>,
    logger: Logger,
}

impl SecurityWrapper {
    pub fn new(
        identity: Arc<dyn IdentityCrypto>,
        sessions: Arc<SessionManager>,
        codec: Arc<dyn EnvelopeCodec>,
        logger: &Logger,
    ) -> Self {
        Self {
            identity,
            sessions,
            codec,
            logger: logger.with_component(Component::Security),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Encrypt an envelope for the wire. `from` and `to` are the outer
    /// plaintext-routable hosts; `to` must already be resolved to a concrete
    /// host. The symmetric path is used only when a fully-confirmed,
    /// non-expired session exists for the pair; otherwise the asymmetric
    /// handshake carries both the payload and a session descriptor.
    pub async fn encrypt_outbound(
        &self,
        envelope: &RpcEnvelope,
        from: &HostId,
        to: &HostId,
    ) -> Result<Vec<u8>> {
        if to.is_server_alias() {
            return Err(RpcError::Protocol(
                "server alias must be resolved before encryption".to_string(),
            ));
        }
        let payload = self.codec.encode(envelope)?;
        let pair = HostIdPair::new(from.clone(), to.clone());

        if let Some(session) = self.sessions.lookup_confirmed(&pair).await {
            return self.encode_symmetric(&payload, session.session_id, &session.key);
        }

        let session = self.sessions.get_or_create(pair).await;
        self.sessions.confirm(session.session_id, from).await?;
        self.logger.debug(format!(
            "asymmetric handshake to '{to}' carrying session {}",
            session.session_id
        ));
        self.encode_asymmetric(&payload, &session.descriptor(), to)
    }

    /// Decrypt an inbound frame. `outer_from`/`outer_to` are the outer
    /// envelope's plaintext hosts; the decoded inner message must agree with
    /// them, except for the documented relay-error allowance.
    pub async fn decrypt_inbound(
        &self,
        frame: &[u8],
        outer_from: &HostId,
        outer_to: &HostId,
    ) -> Result<RpcEnvelope> {
        let mut reader = Reader::new(frame);
        let magic = reader.take(MAGIC.len())?;
        if magic != MAGIC {
            return Err(RpcError::Protocol("bad magic header".to_string()));
        }
        let version = reader.u8()?;
        if version != VERSION {
            return Err(RpcError::Protocol(format!(
                "unsupported protocol version {version:#04x}"
            )));
        }
        let payload = match reader.u8()? {
            MODE_ASYMMETRIC => self.decode_asymmetric(reader.rest(), outer_from).await?,
            MODE_SYMMETRIC => self.decode_symmetric(reader.rest(), outer_from).await?,
            other => {
                return Err(RpcError::Protocol(format!("unknown mode byte {other:#04x}")))
            }
        };

        let envelope = self.codec.decode(&payload)?;
        self.cross_check(&envelope, outer_from, outer_to)?;
        Ok(envelope)
    }

    fn encode_symmetric(
        &self,
        payload: &[u8],
        session_id: SessionId,
        key: &[u8; symmetric::SYMMETRIC_KEY_LEN],
    ) -> Result<Vec<u8>> {
        let mut plaintext = BytesMut::new();
        plaintext.put_i32(HashType::Sha256 as i32);
        plaintext.put_i32(payload.len() as i32);
        plaintext.put_slice(payload);
        plaintext.put_u8(SHA256_LEN as u8);
        plaintext.put_slice(&Sha256::digest(payload));

        let (ciphertext, nonce) = symmetric::encrypt(key, &plaintext)?;

        let mut frame = BytesMut::new();
        frame.put_slice(&MAGIC);
        frame.put_u8(VERSION);
        frame.put_u8(MODE_SYMMETRIC);
        frame.put_i32(CipherType::Aes256Gcm as i32);
        frame.put_u8(SESSION_ID_LEN as u8);
        frame.put_slice(session_id.as_bytes());
        frame.put_u8(nonce.len() as u8);
        frame.put_slice(&nonce);
        frame.put_i32(ciphertext.len() as i32);
        frame.put_slice(&ciphertext);
        Ok(frame.to_vec())
    }

    fn encode_asymmetric(
        &self,
        payload: &[u8],
        descriptor: &SessionDescriptor,
        to: &HostId,
    ) -> Result<Vec<u8>> {
        let descriptor_bytes = bincode::serialize(descriptor)?;

        let mut inner = BytesMut::new();
        inner.put_i32(descriptor_bytes.len() as i32);
        inner.put_slice(&descriptor_bytes);
        inner.put_i32(payload.len() as i32);
        inner.put_slice(payload);

        let sealed = self.identity.sign_and_seal(to, &inner)?;

        let mut frame = BytesMut::new();
        frame.put_slice(&MAGIC);
        frame.put_u8(VERSION);
        frame.put_u8(MODE_ASYMMETRIC);
        frame.put_slice(&sealed);
        Ok(frame.to_vec())
    }

    async fn decode_asymmetric(&self, body: &[u8], outer_from: &HostId) -> Result<Vec<u8>> {
        let inner = self.identity.open_and_verify(outer_from, body)?;
        let mut reader = Reader::new(&inner);

        let descriptor_len = reader.i32_len()?;
        let descriptor: SessionDescriptor = bincode::deserialize(reader.take(descriptor_len)?)?;
        let payload_len = reader.i32_len()?;
        let payload = reader.take(payload_len)?.to_vec();

        // An unknown session id here is first contact: adopt the session,
        // self-confirm, and confirm the sender's side too.
        self.sessions
            .adopt(descriptor, self.identity.local_host(), outer_from)
            .await?;
        Ok(payload)
    }

    async fn decode_symmetric(&self, body: &[u8], outer_from: &HostId) -> Result<Vec<u8>> {
        let mut reader = Reader::new(body);
        CipherType::from_ordinal(reader.i32()?)?;

        let id_len = reader.u8()? as usize;
        if id_len != SESSION_ID_LEN {
            return Err(RpcError::Protocol(format!(
                "session id of {id_len} bytes, expected {SESSION_ID_LEN}"
            )));
        }
        let session_id = SessionId::from_slice(reader.take(id_len)?)
            .map_err(|e| RpcError::Protocol(format!("malformed session id: {e}")))?;

        let nonce_len = reader.u8()? as usize;
        if nonce_len != symmetric::NONCE_LEN {
            return Err(RpcError::Protocol(format!(
                "IV of {nonce_len} bytes, expected {}",
                symmetric::NONCE_LEN
            )));
        }
        let mut nonce = [0u8; symmetric::NONCE_LEN];
        nonce.copy_from_slice(reader.take(nonce_len)?);

        let ciphertext_len = reader.i32_len()?;
        let ciphertext = reader.take(ciphertext_len)?;

        let session = self.sessions.lookup_by_id(session_id).await?;
        let plaintext = symmetric::decrypt(&session.key, ciphertext, &nonce)
            .map_err(|_| RpcError::Protocol("integrity check failed".to_string()))?;

        let mut reader = Reader::new(&plaintext);
        HashType::from_ordinal(reader.i32()?)?;
        let payload_len = reader.i32_len()?;
        let payload = reader.take(payload_len)?.to_vec();
        let hash_len = reader.u8()? as usize;
        let declared_hash = reader.take(hash_len)?;
        let actual_hash = Sha256::digest(&payload);
        if declared_hash != actual_hash.as_slice() {
            return Err(RpcError::Protocol("payload hash mismatch".to_string()));
        }

        // The peer used the symmetric path, so it provably holds the key;
        // record its confirmation even without an explicit handshake.
        self.sessions
            .observe_symmetric_use(session_id, outer_from)
            .await;
        Ok(payload)
    }

    /// The signed inner coordinates must match the outer routable hosts. The
    /// single allowance: an error response about an unreachable or misrouted
    /// session may be resigned by an intermediate relay under its own outer
    /// identity while still carrying the original error.
    fn cross_check(
        &self,
        envelope: &RpcEnvelope,
        outer_from: &HostId,
        outer_to: &HostId,
    ) -> Result<()> {
        let inner_from = envelope.wire_sender()?;
        let inner_to = envelope.wire_recipient()?;
        if &inner_from == outer_from && &inner_to == outer_to {
            return Ok(());
        }

        if let RpcEnvelope::Response(response) = envelope {
            if let Some(error) = response.error_info() {
                if error.is_relay_allowed() {
                    self.logger.debug(format!(
                        "accepting relayed error '{}' from '{outer_from}'",
                        error.class_name
                    ));
                    return Ok(());
                }
            }
        }

        Err(RpcError::Protocol(format!(
            "inner coordinates ({inner_from} -> {inner_to}) disagree with outer envelope \
             ({outer_from} -> {outer_to})"
        )))
    }
}

/// Bounds-checked cursor over a frame.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(RpcError::Protocol("truncated frame".to_string()));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// An i32 length field; negative lengths are malformed.
    fn i32_len(&mut self) -> Result<usize> {
        let value = self.i32()?;
        usize::try_from(value)
            .map_err(|_| RpcError::Protocol(format!("negative length field {value}")))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }
}
