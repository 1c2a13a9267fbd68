// Network Module
//
// The layers between a populated request and bytes on the wire: the RPC
// client (retry and deferred-response loops), the security wrapper (signed
// and sealed handshake frames, symmetric session frames), the session table,
// and the pluggable transports.

pub mod rpc_client;
pub mod security;
pub mod sessions;
pub mod transport;

pub use rpc_client::RpcClient;
pub use security::SecurityWrapper;
pub use sessions::{Session, SessionDescriptor, SessionId, SessionManager};
pub use transport::{ClientTransport, InboundHandler, ServerTransport, WireFrame};
