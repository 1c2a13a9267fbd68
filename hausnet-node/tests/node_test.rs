// End-to-end scenarios over the in-memory transport: request round trips,
// deferred completion, session loss recovery, and inverse delivery to a
// client-only node.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use hausnet_common::logging::{Component, Logger};
use hausnet_common::types::{HostId, HostIdPair};
use hausnet_keys::{IdentityKeyPair, InMemoryIdentityStore};
use hausnet_node::config::NodeConfig;
use hausnet_node::error::RpcError;
use hausnet_node::messages::Request;
use hausnet_node::network::transport::{MemoryHub, MemoryTransport, ServerTransport};
use hausnet_node::node::Node;
use hausnet_node::services::{HandlerContext, HandlerOutcome, ServiceHandler};

fn host(name: &str) -> HostId {
    HostId::new(name).unwrap()
}

/// Identity stores for the named hosts, each knowing every other's key.
fn stores_for(names: &[&str]) -> HashMap<HostId, Arc<InMemoryIdentityStore>> {
    let logger = Logger::new_root(Component::Keys, "test");
    let stores: HashMap<HostId, Arc<InMemoryIdentityStore>> = names
        .iter()
        .map(|name| {
            let id = host(name);
            let store = Arc::new(InMemoryIdentityStore::new(
                id.clone(),
                IdentityKeyPair::generate(),
                &logger,
            ));
            (id, store)
        })
        .collect();
    for (id, store) in &stores {
        for (peer_id, peer_store) in &stores {
            if peer_id != id {
                store.register_peer(peer_id.clone(), peer_store.public_key());
            }
        }
    }
    stores
}

fn node_with(
    config: NodeConfig,
    store: Arc<InMemoryIdentityStore>,
    hub: &Arc<MemoryHub>,
    serve: bool,
) -> Arc<Node> {
    let transport = Arc::new(MemoryTransport::new(hub.clone(), config.local_host.clone()));
    let server: Option<Arc<dyn ServerTransport>> = if serve {
        Some(transport.clone())
    } else {
        None
    };
    Arc::new(Node::new(config, store, transport, server))
}

#[derive(Clone)]
struct EchoHandler;

#[async_trait]
impl ServiceHandler for EchoHandler {
    fn request_kind(&self) -> &str {
        "light.Toggle"
    }

    fn handler_name(&self) -> &str {
        "EchoHandler"
    }

    fn clone_handler(&self) -> Box<dyn ServiceHandler> {
        Box::new(self.clone())
    }

    async fn handle(
        &mut self,
        request: &Request,
        _context: &HandlerContext,
    ) -> anyhow::Result<HandlerOutcome> {
        Ok(HandlerOutcome::Payload(request.payload.clone()))
    }
}

#[derive(Clone)]
struct NullHandler;

#[async_trait]
impl ServiceHandler for NullHandler {
    fn request_kind(&self) -> &str {
        "scene.Apply"
    }

    fn handler_name(&self) -> &str {
        "NullHandler"
    }

    fn clone_handler(&self) -> Box<dyn ServiceHandler> {
        Box::new(self.clone())
    }

    async fn handle(
        &mut self,
        _request: &Request,
        _context: &HandlerContext,
    ) -> anyhow::Result<HandlerOutcome> {
        Ok(HandlerOutcome::empty())
    }
}

#[derive(Clone)]
struct FailingHandler;

#[async_trait]
impl ServiceHandler for FailingHandler {
    fn request_kind(&self) -> &str {
        "door.Unlock"
    }

    fn handler_name(&self) -> &str {
        "FailingHandler"
    }

    fn clone_handler(&self) -> Box<dyn ServiceHandler> {
        Box::new(self.clone())
    }

    async fn handle(
        &mut self,
        _request: &Request,
        _context: &HandlerContext,
    ) -> anyhow::Result<HandlerOutcome> {
        bail!("lock jammed")
    }
}

#[derive(Clone)]
struct SlowHandler {
    kind: String,
    delay: Duration,
}

#[async_trait]
impl ServiceHandler for SlowHandler {
    fn request_kind(&self) -> &str {
        &self.kind
    }

    fn handler_name(&self) -> &str {
        "SlowHandler"
    }

    fn clone_handler(&self) -> Box<dyn ServiceHandler> {
        Box::new(self.clone())
    }

    async fn handle(
        &mut self,
        _request: &Request,
        _context: &HandlerContext,
    ) -> anyhow::Result<HandlerOutcome> {
        tokio::time::sleep(self.delay).await;
        Ok(HandlerOutcome::payload(b"recalibrated".to_vec()))
    }
}

async fn center_and_porch() -> (Arc<Node>, Arc<Node>) {
    let hub = MemoryHub::new();
    let mut stores = stores_for(&["center", "porch"]);

    let center_config = NodeConfig::new(host("center"), host("center"))
        .with_low_level_wait(Duration::from_millis(100));
    let center = node_with(
        center_config,
        stores.remove(&host("center")).unwrap(),
        &hub,
        true,
    );

    let porch_config = NodeConfig::new(host("porch"), host("center"))
        .with_default_timeout(Duration::from_secs(10));
    let porch = node_with(
        porch_config,
        stores.remove(&host("porch")).unwrap(),
        &hub,
        false,
    );

    center.start().await.unwrap();
    porch.start().await.unwrap();
    (center, porch)
}

#[tokio::test]
async fn remote_request_round_trip() {
    let (center, porch) = center_and_porch().await;
    center.register_handler(Box::new(EchoHandler)).await;

    let result = porch
        .request(Request::new("light.Toggle", host("server")).with_payload(b"porch on".to_vec()))
        .await
        .unwrap();
    assert_eq!(result.as_deref(), Some(b"porch on".as_slice()));

    center.stop().await.unwrap();
}

#[tokio::test]
async fn null_result_round_trips_as_absent() {
    let (center, porch) = center_and_porch().await;
    center.register_handler(Box::new(NullHandler)).await;

    let result = porch
        .request(Request::new("scene.Apply", host("server")))
        .await
        .unwrap();
    assert!(result.is_none());

    center.stop().await.unwrap();
}

#[tokio::test]
async fn remote_handler_failure_comes_back_reconstructed() {
    let (center, porch) = center_and_porch().await;
    center.register_handler(Box::new(FailingHandler)).await;

    let err = porch
        .request(Request::new("door.Unlock", host("server")))
        .await
        .unwrap_err();
    match err {
        RpcError::Remote(info) => assert!(info.message.contains("lock jammed")),
        other => panic!("unexpected error: {other}"),
    }

    center.stop().await.unwrap();
}

#[tokio::test]
async fn slow_handler_completes_through_deferred_polling() {
    let (center, porch) = center_and_porch().await;
    center
        .register_handler(Box::new(SlowHandler {
            kind: "heating.Recalibrate".to_string(),
            delay: Duration::from_millis(400),
        }))
        .await;

    // The handler outlives the server's low-level wait several times over,
    // so the round trip only succeeds via deferred polling.
    let result = porch
        .request(Request::new("heating.Recalibrate", host("server")))
        .await
        .unwrap();
    assert_eq!(result.as_deref(), Some(b"recalibrated".as_slice()));

    center.stop().await.unwrap();
}

#[tokio::test]
async fn budget_exhaustion_surfaces_as_timeout() {
    let (center, porch) = center_and_porch().await;
    center
        .register_handler(Box::new(SlowHandler {
            kind: "heating.Recalibrate".to_string(),
            delay: Duration::from_secs(10),
        }))
        .await;

    let err = porch
        .request(
            Request::new("heating.Recalibrate", host("server"))
                .with_timeout(Duration::from_millis(400)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout(_)), "got {err}");

    center.stop().await.unwrap();
}

#[tokio::test]
async fn session_loss_is_recovered_transparently() {
    let (center, porch) = center_and_porch().await;
    center.register_handler(Box::new(EchoHandler)).await;

    let first = porch
        .request(Request::new("light.Toggle", host("server")).with_payload(b"one".to_vec()))
        .await
        .unwrap();
    assert_eq!(first.as_deref(), Some(b"one".as_slice()));

    // The server forgets every session; the client still holds its confirmed
    // one and will send symmetric frames the server cannot decrypt.
    center
        .sessions()
        .purge_pair(&HostIdPair::new(host("center"), host("porch")))
        .await;

    let second = porch
        .request(Request::new("light.Toggle", host("server")).with_payload(b"two".to_vec()))
        .await
        .unwrap();
    assert_eq!(second.as_deref(), Some(b"two".as_slice()));

    center.stop().await.unwrap();
}

#[tokio::test]
async fn inverse_delivery_reaches_a_client_only_node() {
    let hub = MemoryHub::new();
    let mut stores = stores_for(&["center", "sensor"]);

    let center_config = NodeConfig::new(host("center"), host("center"))
        .with_inverse_host(host("sensor"))
        .with_inverse_poll_wait(Duration::from_secs(2));
    let center = node_with(
        center_config,
        stores.remove(&host("center")).unwrap(),
        &hub,
        true,
    );

    let sensor_config = NodeConfig::new(host("sensor"), host("center"))
        .client_only()
        .with_inverse_poll_wait(Duration::from_secs(2));
    let sensor = node_with(
        sensor_config,
        stores.remove(&host("sensor")).unwrap(),
        &hub,
        false,
    );
    sensor
        .register_handler(Box::new(SlowHandler {
            kind: "sensor.Read".to_string(),
            delay: Duration::from_millis(10),
        }))
        .await;

    center.start().await.unwrap();
    sensor.start().await.unwrap();

    // The request targets a host the server cannot reach directly; it is
    // queued and picked up by the sensor's polling loop.
    let result = center
        .request(
            Request::new("sensor.Read", host("sensor")).with_timeout(Duration::from_secs(10)),
        )
        .await
        .unwrap();
    assert_eq!(result.as_deref(), Some(b"recalibrated".as_slice()));

    sensor.stop().await.unwrap();
    center.stop().await.unwrap();
}
