// Executor correlation, dispatch routing, and eviction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use hausnet_common::logging::{Component, Logger};
use hausnet_common::types::HostId;
use hausnet_node::config::NodeConfig;
use hausnet_node::error::{classes, RpcError};
use hausnet_node::messages::{Request, Response};
use hausnet_node::services::executor::{RemoteInvoker, ServiceExecutor};
use hausnet_node::services::inverse_registry::InverseRequestRegistry;
use hausnet_node::services::service_registry::ServiceRegistry;
use hausnet_node::services::{HandlerContext, HandlerOutcome, ServiceHandler};

fn host(name: &str) -> HostId {
    HostId::new(name).unwrap()
}

fn logger() -> Logger {
    Logger::new_root(Component::Node, "test")
}

fn config() -> Arc<NodeConfig> {
    Arc::new(
        NodeConfig::new(host("center"), host("center"))
            .with_default_timeout(Duration::from_secs(5)),
    )
}

fn executor_with(
    config: Arc<NodeConfig>,
    remote: Option<Arc<dyn RemoteInvoker>>,
) -> (ServiceExecutor, Arc<ServiceRegistry>) {
    let logger = logger();
    let registry = Arc::new(ServiceRegistry::new(&logger));
    let inverse = Arc::new(InverseRequestRegistry::new(
        config.default_timeout,
        &logger,
    ));
    let executor = ServiceExecutor::new(config, registry.clone(), inverse, remote, &logger);
    (executor, registry)
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
struct SlowHandler {
    delay: Duration,
}

#[async_trait]
impl ServiceHandler for SlowHandler {
    fn request_kind(&self) -> &str {
        "heating.Recalibrate"
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
        Ok(HandlerOutcome::payload(b"done".to_vec()))
    }
}

#[tokio::test]
async fn local_dispatch_correlates_response_by_request_id() {
    let (executor, registry) = executor_with(config(), None);
    registry.register(Box::new(EchoHandler)).await;

    let request = Request::new("light.Toggle", host("center")).with_payload(b"porch".to_vec());
    let coordinates = executor.submit(request).await.unwrap();

    let response = executor
        .await_response(coordinates.request_id, Duration::from_secs(2))
        .await
        .expect("response within budget");
    match response {
        Response::Value { payload, .. } => assert_eq!(payload, b"porch"),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn unknown_kind_produces_service_not_found_error_response() {
    let (executor, _registry) = executor_with(config(), None);

    let request = Request::new("no.such.Kind", host("center"));
    let coordinates = executor.submit(request).await.unwrap();

    let response = executor
        .await_response(coordinates.request_id, Duration::from_secs(2))
        .await
        .expect("error response expected");
    match response {
        Response::Error { error, .. } => {
            assert_eq!(error.class_name, classes::SERVICE_NOT_FOUND);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn response_is_consumed_by_exactly_one_waiter() {
    let (executor, registry) = executor_with(config(), None);
    registry.register(Box::new(EchoHandler)).await;

    let request = Request::new("light.Toggle", host("center")).with_payload(b"x".to_vec());
    let coordinates = executor.submit(request).await.unwrap();

    assert!(executor
        .await_response(coordinates.request_id, Duration::from_secs(2))
        .await
        .is_some());
    assert!(executor
        .await_response(coordinates.request_id, Duration::from_millis(50))
        .await
        .is_none());
}

#[tokio::test]
async fn duplicate_response_delivery_is_rejected() {
    let (executor, registry) = executor_with(config(), None);
    registry.register(Box::new(EchoHandler)).await;

    let request = Request::new("light.Toggle", host("center")).with_payload(b"x".to_vec());
    let coordinates = executor.submit(request).await.unwrap();

    let response = executor
        .await_response(coordinates.request_id, Duration::from_secs(2))
        .await
        .unwrap();

    // The pending entry is gone once the response was stored and collected.
    let err = executor.store_response(response).await.unwrap_err();
    assert!(matches!(err, RpcError::DuplicateResponse(_)));
}

#[tokio::test]
async fn await_times_out_while_handler_is_still_running() {
    let (executor, registry) = executor_with(config(), None);
    registry
        .register(Box::new(SlowHandler {
            delay: Duration::from_secs(2),
        }))
        .await;

    let request = Request::new("heating.Recalibrate", host("center"));
    let coordinates = executor.submit(request).await.unwrap();

    assert!(executor
        .await_response(coordinates.request_id, Duration::from_millis(100))
        .await
        .is_none());

    // The work is not lost: the response arrives for a later waiter.
    assert!(executor
        .await_response(coordinates.request_id, Duration::from_secs(5))
        .await
        .is_some());
}

#[tokio::test]
async fn eviction_drops_expired_uncollected_responses() {
    let (executor, registry) = executor_with(config(), None);
    registry.register(Box::new(EchoHandler)).await;

    let request = Request::new("light.Toggle", host("center"))
        .with_payload(b"x".to_vec())
        .with_timeout(Duration::from_millis(50));
    let coordinates = executor.submit(request).await.unwrap();

    // Let the handler finish and the budget lapse without collecting.
    tokio::time::sleep(Duration::from_millis(200)).await;
    executor.evict().await;

    assert!(executor.take_response(coordinates.request_id).await.is_none());
}

#[tokio::test]
async fn eviction_drops_abandoned_in_flight_requests() {
    let (executor, registry) = executor_with(config(), None);
    registry
        .register(Box::new(SlowHandler {
            delay: Duration::from_secs(30),
        }))
        .await;

    let request =
        Request::new("heating.Recalibrate", host("center")).with_timeout(Duration::from_millis(50));
    let coordinates = executor.submit(request).await.unwrap();

    // Budget lapses with the handler still running; the sweep reclaims the
    // in-flight entry, so a late completion reads as a duplicate.
    tokio::time::sleep(Duration::from_millis(200)).await;
    executor.evict().await;

    let late = Response::value(coordinates, b"too late".to_vec());
    let err = executor.store_response(late).await.unwrap_err();
    assert!(matches!(err, RpcError::DuplicateResponse(_)));
}

struct StubRemote {
    payload: Vec<u8>,
}

#[async_trait]
impl RemoteInvoker for StubRemote {
    async fn exchange(&self, request: Request) -> hausnet_node::error::Result<Response> {
        let coordinates = request.coordinates()?;
        Ok(Response::value(coordinates, self.payload.clone()))
    }
}

#[tokio::test]
async fn non_local_target_is_forwarded_through_the_remote_invoker() {
    let remote: Arc<dyn RemoteInvoker> = Arc::new(StubRemote {
        payload: b"from afar".to_vec(),
    });
    let (executor, _registry) = executor_with(config(), Some(remote));

    let request = Request::new("light.Toggle", host("garden"));
    let coordinates = executor.submit(request).await.unwrap();

    let response = executor
        .await_response(coordinates.request_id, Duration::from_secs(2))
        .await
        .unwrap();
    match response {
        Response::Value { payload, .. } => assert_eq!(payload, b"from afar"),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn server_alias_resolves_before_dispatch() {
    let (executor, registry) = executor_with(config(), None);
    registry.register(Box::new(EchoHandler)).await;

    // "server" resolves to "center", which is local here.
    let request = Request::new("light.Toggle", host("server")).with_payload(b"hi".to_vec());
    let coordinates = executor.submit(request).await.unwrap();
    assert_eq!(coordinates.server_host, host("center"));

    assert!(executor
        .await_response(coordinates.request_id, Duration::from_secs(2))
        .await
        .is_some());
}
