//! Client side of the tunnel handshake.
//!
//! [`open_tunnel`] is the blocking form used by tests and simple tools;
//! [`connect`] and [`pipe`] are the async forms behind the `connect`
//! subcommand.

use crate::error::{Result, TunnelError};
use crate::protocol::TunnelRequest;
use std::net::{TcpStream, ToSocketAddrs};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// 连接到 broker 并发送请求头，返回可直接读写的流
pub fn open_tunnel<A: ToSocketAddrs>(proxy: A, request: &TunnelRequest) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(proxy)
        .map_err(|e| TunnelError::connection_failed("broker", e))?;
    stream.set_nodelay(true)?;
    request.write_to(&mut stream)?;
    Ok(stream)
}

/// 异步版本的 [`open_tunnel`]
pub async fn connect(proxy: &str, request: &TunnelRequest) -> Result<tokio::net::TcpStream> {
    let header = request.encode()?;

    let mut stream = tokio::net::TcpStream::connect(proxy)
        .await
        .map_err(|e| TunnelError::connection_failed(proxy, e))?;
    stream.set_nodelay(true)?;
    stream.write_all(&header).await?;
    stream.flush().await?;

    info!("Requested tunnel to {} via {}", request, proxy);
    Ok(stream)
}

/// 在隧道和本地读写端之间双向转发，直到隧道关闭
///
/// broker 把客户端的半关闭当作断开，所以本地输入结束后不关闭隧道的写方向，
/// 只是停止读取本地输入，继续接收响应直到 broker 关闭隧道。
/// 返回 (发送字节数, 接收字节数)。
pub async fn pipe<R, W>(
    stream: tokio::net::TcpStream,
    mut local_in: R,
    mut local_out: W,
) -> Result<(u64, u64)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (mut tunnel_rx, mut tunnel_tx) = stream.into_split();
    let mut up_buf = vec![0u8; 8192];
    let mut down_buf = vec![0u8; 8192];
    let mut sent = 0u64;
    let mut received = 0u64;
    let mut upstream_done = false;

    loop {
        tokio::select! {
            n = local_in.read(&mut up_buf), if !upstream_done => {
                let n = n?;
                if n == 0 {
                    debug!("Local input closed, waiting for the tunnel to close");
                    upstream_done = true;
                } else {
                    tunnel_tx.write_all(&up_buf[..n]).await?;
                    sent += n as u64;
                }
            }
            n = tunnel_rx.read(&mut down_buf) => {
                let n = n?;
                if n == 0 {
                    debug!("Tunnel closed by broker");
                    break;
                }
                local_out.write_all(&down_buf[..n]).await?;
                local_out.flush().await?;
                received += n as u64;
            }
        }
    }

    Ok((sent, received))
}

/// 把隧道接到标准输入输出
pub async fn pipe_stdio(stream: tokio::net::TcpStream) -> Result<(u64, u64)> {
    pipe(stream, tokio::io::stdin(), tokio::io::stdout()).await
}
