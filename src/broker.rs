//! Tunnel lifecycle manager.
//!
//! A [`Broker`] owns the listening socket, the poller and the connection
//! registry, and drives them from a single thread. Each loop turn handles
//! exactly one readiness event end to end:
//!
//! - an event on the listener accepts one connection, reads the tunnel
//!   request, connects to the destination and pairs the two sockets;
//! - an event on a paired socket runs one relay step and, if the tunnel
//!   ended, tears down both halves.
//!
//! Accept, the handshake reads and the outbound connect are blocking calls made
//! inside the turn that triggered them. A slow client stalls the loop for that
//! long; `handshake_timeout_ms` and `connect_timeout_ms` bound the stall.
//!
//! Teardown always runs in the same order: both registry entries are removed,
//! then both descriptors are unregistered, then both sockets are closed. A
//! descriptor number is therefore never closed while it can still resolve to a
//! tunnel, even if the OS hands the same number to the next accepted socket.

use crate::config::BrokerConfig;
use crate::error::{Result, TunnelError};
use crate::poller::{Event, Poller, TriggerMode};
use crate::protocol::TunnelRequest;
use crate::rate_limiter::RateLimiter;
use crate::registry::{ConnectionRegistry, Side, Tunnel, TunnelId};
use crate::relay::{self, CloseReason, RelayOutcome};
use crate::stats::BrokerStats;
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Listen backlog, same value the standard library uses.
const LISTEN_BACKLOG: i32 = 128;

/// Result of one loop turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// One event was dispatched.
    Handled,
    /// The timeout elapsed without an event.
    Idle,
}

/// 套接字状态（仅用于查询和日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// 监听套接字
    Listening,
    /// 已配对并在监听集合中
    Paired,
    /// 不属于本 broker（未注册或已关闭）
    Unregistered,
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketState::Listening => write!(f, "listening"),
            SocketState::Paired => write!(f, "paired"),
            SocketState::Unregistered => write!(f, "unregistered"),
        }
    }
}

pub struct Broker {
    config: BrokerConfig,
    listener: TcpListener,
    poller: Poller,
    registry: ConnectionRegistry,
    stats: BrokerStats,
    rate_limiter: Option<RateLimiter>,
    buf: Vec<u8>,
}

impl Broker {
    /// Bind the listener and register it with a fresh poller.
    pub fn bind(config: BrokerConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| TunnelError::config_error(format!("{:#}", e)))?;

        let addr = resolve_listen_addr(&config)?;
        let listener = bind_listener(addr)?;

        let mut poller = Poller::new(config.trigger)?;
        poller.register(listener.as_raw_fd())?;

        let rate_limiter = match config.rate_limit.clone() {
            Some(cfg) => Some(RateLimiter::new(cfg)?),
            None => None,
        };

        if let Some(ref limiter) = rate_limiter {
            info!(
                "Accept rate limit: {} req/s (burst {})",
                limiter.config().requests_per_second,
                limiter.config().burst_size
            );
        }

        info!(
            "Broker listening on {} (fd {}, trigger: {}, chunk: {} bytes)",
            listener.local_addr()?,
            listener.as_raw_fd(),
            config.trigger,
            config.chunk_size
        );

        Ok(Self {
            buf: vec![0u8; config.chunk_size],
            config,
            listener,
            poller,
            registry: ConnectionRegistry::new(),
            stats: BrokerStats::new(),
            rate_limiter,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &BrokerStats {
        &self.stats
    }

    /// Number of descriptors the poller is currently watching.
    pub fn poller_len(&self) -> usize {
        self.poller.len()
    }

    pub fn socket_state(&self, fd: RawFd) -> SocketState {
        if fd == self.listener.as_raw_fd() {
            SocketState::Listening
        } else if self.registry.contains_fd(fd) {
            SocketState::Paired
        } else {
            SocketState::Unregistered
        }
    }

    /// Run the event loop until there is nothing left to watch.
    ///
    /// Only returns on a fatal condition: the watched set became empty, the
    /// poller itself failed, or the listener reported an error.
    pub fn run(&mut self) -> Result<()> {
        info!("Waiting for tunnel requests...");
        loop {
            if let Err(e) = self.turn(None) {
                info!(
                    "Broker stopped: {} tunnels opened, {} closed, {} bytes relayed",
                    self.stats.tunnels_opened,
                    self.stats.tunnels_closed,
                    self.stats.total_bytes()
                );
                return Err(e);
            }
        }
    }

    /// Wait for one event (up to `timeout`) and dispatch it.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<Turn> {
        let event = match self.poller.wait(timeout)? {
            Some(event) => event,
            None if self.poller.is_empty() => {
                error!("No events, exiting: readiness set is empty");
                return Err(TunnelError::PollerExhausted);
            }
            None => return Ok(Turn::Idle),
        };

        if event.fd == self.listener.as_raw_fd() {
            self.on_listener_event(event)?;
        } else {
            self.on_tunnel_event(event);
        }
        Ok(Turn::Handled)
    }

    /// An error condition on the listener is fatal: in level mode it would be
    /// reported again on every turn.
    fn on_listener_event(&mut self, event: Event) -> Result<()> {
        if event.is_error() {
            let err = self.listener.take_error()?.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::Other, "listener reported an error condition")
            });
            error!(fd = event.fd, "Listener failed: {}", err);
            return Err(err.into());
        }
        self.accept_one();

        // 监听套接字在 one-shot 模式下必须重新武装，否则循环会因集合为空而退出
        if self.poller.mode() == TriggerMode::OneShot {
            self.poller.register(self.listener.as_raw_fd())?;
        }
        Ok(())
    }

    /// Accept a single connection and try to turn it into a tunnel.
    ///
    /// Every failure here is local to the accepted connection: the sockets
    /// opened so far are dropped (closed) and nothing is left in the registry.
    fn accept_one(&mut self) {
        let (client, client_addr) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                return;
            }
        };
        self.stats.accepted += 1;
        let client_fd = client.as_raw_fd();

        if let Some(ref limiter) = self.rate_limiter {
            if let Err(wait_time) = limiter.check() {
                self.stats.rate_limited += 1;
                warn!(
                    peer = %client_addr,
                    fd = client_fd,
                    "Rejecting connection: {}",
                    TunnelError::RateLimited {
                        retry_after: wait_time
                    }
                );
                return;
            }
        }

        debug!(peer = %client_addr, fd = client_fd, state = "handshaking", "Accepted connection");

        let request = match self.read_request(&client) {
            Ok(request) => request,
            Err(e) => {
                self.stats.handshake_failures += 1;
                warn!(peer = %client_addr, fd = client_fd, "Handshake failed: {}", e);
                return;
            }
        };

        debug!(
            peer = %client_addr,
            fd = client_fd,
            state = "connecting",
            "Tunnel requested to {}",
            request
        );

        let destination = match connect_destination(&request, self.config.connect_timeout()) {
            Ok(stream) => stream,
            Err(e) => {
                self.stats.connect_failures += 1;
                warn!(peer = %client_addr, fd = client_fd, "{}", e);
                return;
            }
        };

        if let Err(e) = self.pair(client, client_addr, destination, request) {
            warn!(peer = %client_addr, fd = client_fd, "Failed to pair tunnel: {}", e);
        }
    }

    fn read_request(&self, client: &TcpStream) -> Result<TunnelRequest> {
        client.set_read_timeout(self.config.handshake_timeout())?;
        let mut reader = client;
        let request = TunnelRequest::read_from(&mut reader)?;
        client.set_read_timeout(None)?;
        Ok(request)
    }

    /// Move both sockets into the registry and the poller together.
    fn pair(
        &mut self,
        client: TcpStream,
        client_addr: SocketAddr,
        destination: TcpStream,
        request: TunnelRequest,
    ) -> Result<TunnelId> {
        client.set_nonblocking(true)?;
        destination.set_nonblocking(true)?;

        let tunnel = Tunnel::new(client, client_addr, destination, request);
        let id = self.registry.insert(tunnel).map_err(|t| {
            TunnelError::protocol(format!(
                "descriptor {} or {} is already paired",
                t.client_fd(),
                t.destination_fd()
            ))
        })?;

        let (client_fd, destination_fd) = match self.registry.tunnel(id) {
            Some(t) => (t.client_fd(), t.destination_fd()),
            None => return Err(TunnelError::protocol("tunnel vanished while pairing")),
        };

        for fd in [client_fd, destination_fd] {
            if let Err(e) = self.poller.register(fd) {
                self.teardown(id, CloseReason::PollerFailed(e.kind()));
                return Err(e.into());
            }
        }

        if let Some(tunnel) = self.registry.tunnel(id) {
            info!(
                tunnel = id,
                client_fd,
                destination_fd,
                "Connecting {} to {} ({})",
                tunnel.client_addr,
                tunnel.request,
                tunnel
                    .destination_addr
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            );
        }
        self.stats.tunnels_opened += 1;
        Ok(id)
    }

    fn on_tunnel_event(&mut self, event: Event) {
        let Some(entry) = self.registry.lookup(event.fd) else {
            debug!(fd = event.fd, "Event for unknown descriptor ignored");
            return;
        };

        let outcome = match self.registry.tunnel(entry.tunnel) {
            Some(tunnel) => {
                let (src, dst) = tunnel.halves(entry.side);
                relay::relay_step(event.readiness, src, dst, &mut self.buf)
            }
            None => return,
        };

        match outcome {
            RelayOutcome::Forwarded(n) => {
                if let Some(tunnel) = self.registry.tunnel_mut(entry.tunnel) {
                    tunnel.record(entry.side, n);
                }
                match entry.side {
                    Side::Client => self.stats.bytes_client_to_dest += n as u64,
                    Side::Destination => self.stats.bytes_dest_to_client += n as u64,
                }
                debug!(tunnel = entry.tunnel, fd = event.fd, "Relayed {} bytes", n);
                self.rearm(entry.tunnel, event.fd);
            }
            RelayOutcome::Idle => self.rearm(entry.tunnel, event.fd),
            RelayOutcome::Closed(reason) => {
                self.teardown(entry.tunnel, reason);
            }
        }
    }

    /// Put a one-shot descriptor back into the watched set. No-op in level mode.
    fn rearm(&mut self, id: TunnelId, fd: RawFd) {
        if self.poller.mode() != TriggerMode::OneShot {
            return;
        }
        if let Err(e) = self.poller.register(fd) {
            self.teardown(id, CloseReason::PollerFailed(e.kind()));
        }
    }

    /// Tear down both halves of a tunnel. Returns `false` if it was already gone.
    fn teardown(&mut self, id: TunnelId, reason: CloseReason) -> bool {
        let Some(tunnel) = self.registry.remove(id) else {
            return false;
        };

        let client_fd = tunnel.client_fd();
        let destination_fd = tunnel.destination_fd();
        for fd in [client_fd, destination_fd] {
            if let Err(e) = self.poller.unregister(fd) {
                warn!(tunnel = id, fd, "Failed to unregister descriptor: {}", e);
            }
        }

        info!(
            tunnel = id,
            client_fd,
            destination_fd,
            reason = %reason,
            "Disconnecting {} from {} (sent {} bytes, received {} bytes, {:?})",
            tunnel.client_addr,
            tunnel.request,
            tunnel.bytes_client_to_dest,
            tunnel.bytes_dest_to_client,
            tunnel.age()
        );
        self.stats.tunnels_closed += 1;

        // 到这里两个描述符都已不在注册表和监听集合中，可以安全关闭
        drop(tunnel);
        true
    }
}

fn resolve_listen_addr(config: &BrokerConfig) -> Result<SocketAddr> {
    let endpoint = config.listen_endpoint();
    endpoint
        .to_socket_addrs()
        .map_err(|e| TunnelError::config_error(format!("Invalid listen address {}: {}", endpoint, e)))?
        .next()
        .ok_or_else(|| {
            TunnelError::config_error(format!("Listen address {} did not resolve", endpoint))
        })
}

/// Create the blocking listener with address and port reuse enabled.
fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// Blocking connect to the requested destination, trying each resolved
/// address in turn when a timeout is configured.
fn connect_destination(request: &TunnelRequest, timeout: Option<Duration>) -> Result<TcpStream> {
    let target = (request.host.as_str(), request.port);
    let failed = |e: io::Error| TunnelError::connection_failed(request.addr(), e);

    let Some(timeout) = timeout else {
        return TcpStream::connect(target).map_err(failed);
    };

    let mut last_err = None;
    for addr in target.to_socket_addrs().map_err(failed)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(failed(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "could not resolve to any address",
        )
    })))
}
