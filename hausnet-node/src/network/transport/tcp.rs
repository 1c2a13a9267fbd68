// Framed TCP transport.
//
// INTENTION:
// The reference concrete transport: length-prefixed frames over plain TCP.
// One connection per exchange on the client side; the server accepts
// connections and spawns a task per connection, answering one frame with one
// reply frame. All security properties come from the frame contents, not the
// socket.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use hausnet_common::logging::{Component, Logger};
use hausnet_common::types::HostId;

use crate::error::{Result, RpcError};
use crate::network::transport::{ClientTransport, InboundHandler, ServerTransport};

const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Options for the TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransportOptions {
    /// Bind address of the listener. Port 0 lets the OS pick a free port.
    pub bind_address: SocketAddr,
    /// I/O timeout per exchange.
    pub io_timeout: Duration,
    /// Known peer addresses; the client side refuses hosts it cannot place.
    pub peers: HashMap<HostId, SocketAddr>,
}

impl Default for TcpTransportOptions {
    fn default() -> Self {
        Self {
            // Port 0 avoids clashes when several nodes run on one machine.
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            io_timeout: Duration::from_secs(30),
            peers: HashMap::new(),
        }
    }
}

pub struct TcpTransport {
    options: TcpTransportOptions,
    bound_address: Mutex<Option<SocketAddr>>,
    shutdown: tokio::sync::watch::Sender<bool>,
    logger: Logger,
}

impl TcpTransport {
    pub fn new(options: TcpTransportOptions, logger: &Logger) -> Self {
        let (shutdown, _) = tokio::sync::watch::channel(false);
        Self {
            options,
            bound_address: Mutex::new(None),
            shutdown,
            logger: logger.with_component(Component::Transporter),
        }
    }

    fn peer_address(&self, host: &HostId) -> Result<SocketAddr> {
        self.options
            .peers
            .get(host)
            .copied()
            .ok_or_else(|| RpcError::Transport(format!("no address known for host '{host}'")))
    }

    async fn handle_connection(
        mut stream: TcpStream,
        handler: InboundHandler,
        logger: Logger,
    ) {
        let frame = match read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(e) => {
                logger.warn(format!("failed to read inbound frame: {e}"));
                return;
            }
        };
        let reply = match handler(frame).await {
            Ok(reply) => reply,
            Err(e) => {
                logger.warn(format!("inbound handler failed: {e}"));
                return;
            }
        };
        if let Err(e) = write_frame(&mut stream, &reply).await {
            logger.warn(format!("failed to write reply frame: {e}"));
        }
    }
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    stream
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| RpcError::Transport(format!("read length: {e}")))?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(RpcError::Protocol(format!("frame of {len} bytes exceeds limit")));
    }
    let mut frame = vec![0u8; len as usize];
    stream
        .read_exact(&mut frame)
        .await
        .map_err(|e| RpcError::Transport(format!("read frame: {e}")))?;
    Ok(frame)
}

async fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> Result<()> {
    stream
        .write_all(&(frame.len() as u32).to_be_bytes())
        .await
        .map_err(|e| RpcError::Transport(format!("write length: {e}")))?;
    stream
        .write_all(frame)
        .await
        .map_err(|e| RpcError::Transport(format!("write frame: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| RpcError::Transport(format!("flush: {e}")))
}

#[async_trait]
impl ClientTransport for TcpTransport {
    async fn exchange(&self, to: &HostId, frame: Vec<u8>) -> Result<Vec<u8>> {
        let address = self.peer_address(to)?;
        let io = async {
            let mut stream = TcpStream::connect(address)
                .await
                .map_err(|e| RpcError::Transport(format!("connect {address}: {e}")))?;
            write_frame(&mut stream, &frame).await?;
            read_frame(&mut stream).await
        };
        tokio::time::timeout(self.options.io_timeout, io)
            .await
            .map_err(|_| RpcError::Transport(format!("exchange with '{to}' timed out")))?
    }
}

#[async_trait]
impl ServerTransport for TcpTransport {
    async fn start(self: Arc<Self>, handler: InboundHandler) -> Result<()> {
        let listener = TcpListener::bind(self.options.bind_address)
            .await
            .map_err(|e| {
                RpcError::Transport(format!("bind {}: {e}", self.options.bind_address))
            })?;
        let bound = listener
            .local_addr()
            .map_err(|e| RpcError::Transport(format!("local_addr: {e}")))?;
        *self.bound_address.lock().await = Some(bound);
        self.logger.info(format!("listening on {bound}"));

        let mut shutdown = self.shutdown.subscribe();
        let transport = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _)) => {
                                let handler = handler.clone();
                                let logger = transport.logger.clone();
                                tokio::spawn(async move {
                                    TcpTransport::handle_connection(stream, handler, logger).await;
                                });
                            }
                            Err(e) => {
                                transport.logger.warn(format!("accept failed: {e}"));
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        transport.logger.info("listener shutting down");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _ = self.shutdown.send(true);
        Ok(())
    }

    fn local_address(&self) -> String {
        self.bound_address
            .try_lock()
            .ok()
            .and_then(|guard| *guard)
            .map(|address| address.to_string())
            .unwrap_or_else(|| self.options.bind_address.to_string())
    }
}
