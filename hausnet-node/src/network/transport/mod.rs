// Network Transport Module
//
// Pluggable client/server transports carrying opaque secured frames between
// hosts. The plaintext-routable outer envelope lives here: it names the
// sending and receiving hosts so the security layer can pick keys, while the
// body stays opaque to the transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use hausnet_common::types::HostId;

use crate::error::{Result, RpcError};

pub mod memory;
pub mod tcp;

pub use memory::{MemoryHub, MemoryTransport};
pub use tcp::{TcpTransport, TcpTransportOptions};

/// Type alias for async-returning function
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Plaintext-routable outer envelope around a secured frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    /// Sending host.
    pub from: HostId,
    /// Receiving host.
    pub to: HostId,
    /// Secured body; opaque to the transport.
    pub body: Vec<u8>,
}

impl WireFrame {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| RpcError::Protocol(format!("malformed wire frame: {e}")))
    }
}

/// Handler invoked for every inbound frame; returns the reply frame bytes.
pub type InboundHandler =
    Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>>> + Send + Sync>;

/// Client side of a transport: one request frame out, one reply frame back.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn exchange(&self, to: &HostId, frame: Vec<u8>) -> Result<Vec<u8>>;
}

/// Server side of a transport: accepts frames and feeds them to the handler.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Start listening for incoming frames.
    async fn start(self: Arc<Self>, handler: InboundHandler) -> Result<()>;

    /// Stop listening for incoming frames.
    async fn stop(&self) -> Result<()>;

    /// The local address this transport is bound to, as a string.
    fn local_address(&self) -> String;
}
