// Message Model
//
// INTENTION:
// Define the envelope types every other layer agrees on: requests, the
// response family (value, null, error, deferring), the error description that
// crosses process boundaries, and the opaque bytes<->envelope codec seam.
//
// Coordinates (request id, client host, server host) are generated once per
// request and copied verbatim onto its response; any mismatch between a
// response and its request is a protocol violation.

use chrono::{DateTime, Utc};
use hausnet_common::types::HostId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Result, RpcError};

/// 128-bit unique request identifier.
pub type RequestId = Uuid;

/// Sentinel timeout meaning "use the node default".
pub const TIMEOUT_UNDEFINED: i64 = -1;

/// Built-in request kinds used by the RPC plumbing itself.
pub mod kinds {
    /// Poll for the real response after a `Deferring` answer. Shares the
    /// original request's coordinates.
    pub const DEFERRED_POLL: &str = "hausnet.rpc.DeferredResponseRequest";
    /// Long-poll draining the inverse queue for the calling host.
    pub const INVERSE_POLL: &str = "hausnet.rpc.InversePollRequest";
    /// Delivery of a completed response for an inverse-routed request.
    pub const INVERSE_RESPONSE: &str = "hausnet.rpc.InverseResponseSubmission";
}

/// Shared routing coordinates of a request and its response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    pub request_id: RequestId,
    pub client_host: HostId,
    pub server_host: HostId,
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} -> {})",
            self.request_id, self.client_host, self.server_host
        )
    }
}

/// A service request.
///
/// Coordinates are populated by the invoking side: the id is generated, the
/// client host defaults to the local host, the created timestamp to now, and
/// the timeout sentinel to the configured default. A request is consumed
/// exactly once by the resolving service and discarded after its response is
/// delivered or it is evicted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: Option<RequestId>,
    pub client_host: Option<HostId>,
    pub server_host: HostId,
    pub created: Option<DateTime<Utc>>,
    /// Duration budget in milliseconds; [`TIMEOUT_UNDEFINED`] means default.
    pub timeout_ms: i64,
    /// Marks the request safe to retransmit on transport failures.
    pub idempotent: bool,
    /// Registry dispatch tag.
    pub kind: String,
    pub payload: Option<Vec<u8>>,
}

impl Request {
    pub fn new(kind: impl Into<String>, server_host: HostId) -> Self {
        Self {
            request_id: None,
            client_host: None,
            server_host,
            created: None,
            timeout_ms: TIMEOUT_UNDEFINED,
            idempotent: false,
            kind: kind.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as i64;
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// The fully-populated coordinates; an error if the invoking side has not
    /// filled them in yet.
    pub fn coordinates(&self) -> Result<Coordinates> {
        match (&self.request_id, &self.client_host) {
            (Some(request_id), Some(client_host)) => Ok(Coordinates {
                request_id: *request_id,
                client_host: client_host.clone(),
                server_host: self.server_host.clone(),
            }),
            _ => Err(RpcError::Protocol(
                "request coordinates have not been populated".to_string(),
            )),
        }
    }

    /// The effective timeout, falling back to `default` on the sentinel.
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        if self.timeout_ms < 0 {
            default
        } else {
            Duration::from_millis(self.timeout_ms as u64)
        }
    }

    /// Build the follow-up poll for a `Deferring` answer: same coordinates,
    /// shrunk remaining budget.
    pub fn deferred_poll(coordinates: &Coordinates, remaining: Duration) -> Self {
        Self {
            request_id: Some(coordinates.request_id),
            client_host: Some(coordinates.client_host.clone()),
            server_host: coordinates.server_host.clone(),
            created: Some(Utc::now()),
            timeout_ms: remaining.as_millis() as i64,
            idempotent: true,
            kind: kinds::DEFERRED_POLL.to_string(),
            payload: None,
        }
    }
}

/// Reconstructible description of a failure that crossed a process boundary:
/// class name, message, stack frames, and an optional cause chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub class_name: String,
    pub message: String,
    pub frames: Vec<String>,
    pub cause: Option<Box<ErrorInfo>>,
}

impl ErrorInfo {
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
            frames: Vec::new(),
            cause: None,
        }
    }

    /// Capture a handler failure, folding the anyhow context chain into
    /// frames and the root cause into a nested `ErrorInfo`.
    pub fn from_handler_error(error: &anyhow::Error) -> Self {
        let mut chain = error.chain();
        let message = chain
            .next()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown handler failure".to_string());
        let frames: Vec<String> = chain.map(|cause| cause.to_string()).collect();
        let cause = frames
            .last()
            .map(|root| Box::new(ErrorInfo::new(crate::error::classes::HANDLER, root.clone())));
        Self {
            class_name: crate::error::classes::HANDLER.to_string(),
            message,
            frames,
            cause,
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class_name, self.message)
    }
}

/// A service response.
///
/// `Null` masks a void or absent result; the legacy protocol also named a
/// `Void` marker response, which was documentation-only and never built, so
/// `Null` is the single no-result representation here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Successful result carrying an application payload.
    Value {
        coordinates: Coordinates,
        payload: Vec<u8>,
    },
    /// Successful result with nothing to return.
    Null { coordinates: Coordinates },
    /// The resolving side failed; the error is shipped back for
    /// reconstruction on the caller's side.
    Error {
        coordinates: Coordinates,
        error: ErrorInfo,
    },
    /// Processing is still under way; poll again with a deferred-response
    /// request sharing these coordinates.
    Deferring { coordinates: Coordinates },
}

impl Response {
    pub fn value(coordinates: Coordinates, payload: Vec<u8>) -> Self {
        Response::Value {
            coordinates,
            payload,
        }
    }

    pub fn null(coordinates: Coordinates) -> Self {
        Response::Null { coordinates }
    }

    pub fn error(coordinates: Coordinates, error: ErrorInfo) -> Self {
        Response::Error { coordinates, error }
    }

    pub fn deferring(coordinates: Coordinates) -> Self {
        Response::Deferring { coordinates }
    }

    pub fn coordinates(&self) -> &Coordinates {
        match self {
            Response::Value { coordinates, .. }
            | Response::Null { coordinates }
            | Response::Error { coordinates, .. }
            | Response::Deferring { coordinates } => coordinates,
        }
    }

    pub fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            Response::Error { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Union of everything that travels through the secured transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcEnvelope {
    Request(Request),
    Response(Response),
}

impl RpcEnvelope {
    /// The host this envelope is traveling from, per its coordinates:
    /// requests flow client -> server, responses server -> client.
    pub fn wire_sender(&self) -> Result<HostId> {
        match self {
            RpcEnvelope::Request(request) => Ok(request.coordinates()?.client_host),
            RpcEnvelope::Response(response) => Ok(response.coordinates().server_host.clone()),
        }
    }

    /// The host this envelope is traveling to.
    pub fn wire_recipient(&self) -> Result<HostId> {
        match self {
            RpcEnvelope::Request(request) => Ok(request.coordinates()?.server_host),
            RpcEnvelope::Response(response) => Ok(response.coordinates().client_host.clone()),
        }
    }
}

/// Opaque bytes<->envelope codec boundary under the transport layer.
pub trait EnvelopeCodec: Send + Sync {
    fn encode(&self, envelope: &RpcEnvelope) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<RpcEnvelope>;
}

/// Default codec over bincode.
pub struct BincodeCodec;

impl EnvelopeCodec for BincodeCodec {
    fn encode(&self, envelope: &RpcEnvelope) -> Result<Vec<u8>> {
        Ok(bincode::serialize(envelope)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<RpcEnvelope> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> HostId {
        HostId::new(name).unwrap()
    }

    #[test]
    fn coordinates_require_population() {
        let request = Request::new("hausnet.app.SwitchRequest", host("center"));
        assert!(request.coordinates().is_err());
    }

    #[test]
    fn effective_timeout_falls_back_on_sentinel() {
        let request = Request::new("k", host("center"));
        assert_eq!(request.timeout_ms, TIMEOUT_UNDEFINED);
        assert_eq!(
            request.effective_timeout(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
        let request = request.with_timeout(Duration::from_millis(250));
        assert_eq!(
            request.effective_timeout(Duration::from_secs(60)),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn deferred_poll_shares_coordinates() {
        let mut request = Request::new("k", host("center"));
        request.request_id = Some(Uuid::new_v4());
        request.client_host = Some(host("porch"));
        let coordinates = request.coordinates().unwrap();

        let poll = Request::deferred_poll(&coordinates, Duration::from_millis(800));
        assert_eq!(poll.coordinates().unwrap(), coordinates);
        assert_eq!(poll.kind, kinds::DEFERRED_POLL);
        assert_eq!(poll.timeout_ms, 800);
    }

    #[test]
    fn envelope_codec_round_trip() {
        let coordinates = Coordinates {
            request_id: Uuid::new_v4(),
            client_host: host("porch"),
            server_host: host("center"),
        };
        let envelope = RpcEnvelope::Response(Response::value(coordinates.clone(), vec![1, 2, 3]));
        let codec = BincodeCodec;
        let decoded = codec.decode(&codec.encode(&envelope).unwrap()).unwrap();
        match decoded {
            RpcEnvelope::Response(Response::Value {
                coordinates: decoded_coords,
                payload,
            }) => {
                assert_eq!(decoded_coords, coordinates);
                assert_eq!(payload, vec![1, 2, 3]);
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}
