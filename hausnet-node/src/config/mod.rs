// Configuration Module
//
// Node-level settings: the local identity, server-alias resolution, the
// routing facts (client-only flag, hosts reachable only by polling), timeout
// defaults, and the periods of the background sweeps.
//
// Configuration is constructed explicitly at bootstrap and passed into the
// node; there are no ambient globals.

use std::collections::HashSet;
use std::time::Duration;

use hausnet_common::logging::LoggingConfig;
use hausnet_common::types::HostId;

/// Node configuration with builder-style setters.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Identity of this node.
    pub local_host: HostId,
    /// The concrete host the reserved server alias resolves to.
    pub server_host: HostId,
    /// A constrained node can only make outbound connections; it receives
    /// work by polling its server's inverse queue.
    pub client_only: bool,
    /// Hosts that cannot accept inbound connections; requests targeting them
    /// are queued for inverse delivery instead of being forwarded.
    pub inverse_hosts: HashSet<HostId>,
    /// Default request timeout when the sentinel is used.
    pub default_timeout: Duration,
    /// How long the serving side waits for a handler before answering with a
    /// deferring response.
    pub low_level_wait: Duration,
    /// Long-poll budget of an inverse drain on the serving side.
    pub inverse_poll_wait: Duration,
    /// Outer retry bound of the RPC client.
    pub retry_attempts: u32,
    /// Backoff between client retries.
    pub retry_backoff: Duration,
    /// Period of the pending-request/response eviction sweep.
    pub pending_sweep_period: Duration,
    /// Maximum age of a symmetric session.
    pub session_max_age: Duration,
    /// Period of the session sweep.
    pub session_sweep_period: Duration,
    /// Grace added on top of the session max age before the sweep purges.
    pub session_grace: Duration,
    /// Logging configuration applied at node start.
    pub logging: LoggingConfig,
}

impl NodeConfig {
    pub fn new(local_host: HostId, server_host: HostId) -> Self {
        Self {
            local_host,
            server_host,
            client_only: false,
            inverse_hosts: HashSet::new(),
            default_timeout: Duration::from_secs(60),
            low_level_wait: Duration::from_secs(10),
            inverse_poll_wait: Duration::from_secs(20),
            retry_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            pending_sweep_period: Duration::from_secs(60 * 60),
            session_max_age: Duration::from_secs(60 * 60),
            session_sweep_period: Duration::from_secs(30 * 60),
            session_grace: Duration::from_secs(15 * 60),
            logging: LoggingConfig::default(),
        }
    }

    pub fn client_only(mut self) -> Self {
        self.client_only = true;
        self
    }

    pub fn with_inverse_host(mut self, host: HostId) -> Self {
        self.inverse_hosts.insert(host);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_low_level_wait(mut self, wait: Duration) -> Self {
        self.low_level_wait = wait;
        self
    }

    pub fn with_inverse_poll_wait(mut self, wait: Duration) -> Self {
        self.inverse_poll_wait = wait;
        self
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_session_max_age(mut self, max_age: Duration) -> Self {
        self.session_max_age = max_age;
        self
    }

    pub fn with_logging_config(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Resolve the reserved server alias to the configured concrete host.
    /// Must happen before any cryptographic operation uses the id.
    pub fn resolve_host(&self, host: &HostId) -> HostId {
        if host.is_server_alias() {
            self.server_host.clone()
        } else {
            host.clone()
        }
    }

    /// Whether the given (already resolved) host is this node.
    pub fn is_local(&self, host: &HostId) -> bool {
        host == &self.local_host
    }

    /// Whether requests for the given host must go through the inverse queue.
    pub fn is_inverse_host(&self, host: &HostId) -> bool {
        self.inverse_hosts.contains(host)
    }
}
