// In-memory transport.
//
// INTENTION:
// An in-process transport double for tests and single-process setups: a hub
// maps host ids to their inbound handlers, and an exchange is a direct async
// call. The frames still travel fully serialized and secured, so everything
// above the socket is exercised for real.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use hausnet_common::types::HostId;

use crate::error::{Result, RpcError};
use crate::network::transport::{ClientTransport, InboundHandler, ServerTransport};

/// Shared in-process switchboard connecting memory transports.
#[derive(Default)]
pub struct MemoryHub {
    endpoints: Mutex<HashMap<HostId, InboundHandler>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Both halves of a memory transport for one host.
pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    local_host: HostId,
}

impl MemoryTransport {
    pub fn new(hub: Arc<MemoryHub>, local_host: HostId) -> Self {
        Self { hub, local_host }
    }
}

#[async_trait]
impl ClientTransport for MemoryTransport {
    async fn exchange(&self, to: &HostId, frame: Vec<u8>) -> Result<Vec<u8>> {
        let handler = {
            let endpoints = self.hub.endpoints.lock().await;
            endpoints.get(to).cloned()
        };
        match handler {
            Some(handler) => handler(frame).await,
            None => Err(RpcError::Transport(format!(
                "host '{to}' is not connected to the hub"
            ))),
        }
    }
}

#[async_trait]
impl ServerTransport for MemoryTransport {
    async fn start(self: Arc<Self>, handler: InboundHandler) -> Result<()> {
        let mut endpoints = self.hub.endpoints.lock().await;
        endpoints.insert(self.local_host.clone(), handler);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut endpoints = self.hub.endpoints.lock().await;
        endpoints.remove(&self.local_host);
        Ok(())
    }

    fn local_address(&self) -> String {
        format!("memory://{}", self.local_host)
    }
}
