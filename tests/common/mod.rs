//! Common utilities for integration tests
#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tcp_broker::{Broker, BrokerConfig, BrokerStats, TriggerMode, TunnelRequest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::time::timeout;

/// Find an available port
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to random port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// A broker running its event loop on a background thread
pub struct BrokerHandle {
    pub addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<BrokerStats>>,
}

impl BrokerHandle {
    /// Stop the loop and return the final counters
    pub fn stop(mut self) -> BrokerStats {
        self.stop.store(true, Ordering::SeqCst);
        self.thread
            .take()
            .expect("broker already stopped")
            .join()
            .expect("broker thread panicked")
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub fn broker_config(trigger: TriggerMode) -> BrokerConfig {
    BrokerConfig::builder()
        .listen_port(0)
        .trigger(trigger)
        .connect_timeout_ms(2000)
        .handshake_timeout_ms(2000)
        .build()
        .expect("valid test config")
}

/// Start a broker on an ephemeral port
pub fn start_broker(config: BrokerConfig) -> BrokerHandle {
    let mut broker = Broker::bind(config).expect("Failed to bind broker");
    let addr = broker.local_addr().expect("Failed to get broker addr");
    let stop = Arc::new(AtomicBool::new(false));

    let flag = stop.clone();
    let thread = std::thread::spawn(move || {
        while !flag.load(Ordering::SeqCst) {
            broker
                .turn(Some(Duration::from_millis(20)))
                .expect("broker loop failed");
        }
        broker.stats().clone()
    });

    BrokerHandle {
        addr,
        stop,
        thread: Some(thread),
    }
}

/// Create a simple echo server for testing
pub async fn start_echo_server() -> (u16, tokio::task::JoinHandle<()>) {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind echo server");
    let port = listener.local_addr().expect("echo addr").port();

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 8192];
                        loop {
                            match socket.read(&mut buf).await {
                                Ok(0) => break, // Connection closed
                                Ok(n) => {
                                    if socket.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                }
                                Err(_) => break,
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    (port, handle)
}

/// A destination that accepts one connection and resets it immediately
pub async fn start_reset_server() -> (u16, tokio::task::JoinHandle<()>) {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind reset server");
    let port = listener.local_addr().expect("reset addr").port();

    let handle = tokio::spawn(async move {
        if let Ok((socket, _)) = listener.accept().await {
            // SO_LINGER 为 0 时关闭会发送 RST 而不是 FIN
            let _ = socket2::SockRef::from(&socket).set_linger(Some(Duration::ZERO));
            drop(socket);
        }
    });

    (port, handle)
}

/// Open a tunnel through the broker to `127.0.0.1:port`
pub async fn open_tunnel(broker: SocketAddr, port: u16) -> TcpStream {
    tcp_broker::client::connect(
        &broker.to_string(),
        &TunnelRequest::new("127.0.0.1", port),
    )
    .await
    .expect("Failed to open tunnel")
}

/// Write `data` and read back the same number of bytes
pub async fn round_trip(
    stream: &mut TcpStream,
    data: &[u8],
    timeout_duration: Duration,
) -> Result<Vec<u8>, String> {
    timeout(timeout_duration, async {
        stream
            .write_all(data)
            .await
            .map_err(|e| format!("Failed to write data: {}", e))?;

        let mut response = vec![0u8; data.len()];
        stream
            .read_exact(&mut response)
            .await
            .map_err(|e| format!("Failed to read response: {}", e))?;
        Ok(response)
    })
    .await
    .map_err(|_| "Timeout waiting for response".to_string())?
}

/// Read until the peer closes, failing on timeout
pub async fn read_until_closed(
    stream: &mut TcpStream,
    timeout_duration: Duration,
) -> Result<Vec<u8>, String> {
    let mut data = Vec::new();
    match timeout(timeout_duration, stream.read_to_end(&mut data)).await {
        Ok(Ok(_)) => Ok(data),
        // 对端带着未读数据关闭时会收到 RST
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => Ok(data),
        Ok(Err(e)) => Err(format!("Failed to read: {}", e)),
        Err(_) => Err("Timeout waiting for close".to_string()),
    }
}
