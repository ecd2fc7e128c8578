/// 连接注册表
///
/// 以套接字描述符为键，记录每个已配对套接字所属的隧道及其方向。
/// 隧道本身拥有两端的 `TcpStream`，从注册表移除隧道之前任何一端都不会被关闭。
use crate::protocol::TunnelRequest;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

/// 隧道编号，单个 broker 内单调递增
pub type TunnelId = u64;

/// 套接字在隧道中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Destination,
}

impl Side {
    pub fn peer(self) -> Side {
        match self {
            Side::Client => Side::Destination,
            Side::Destination => Side::Client,
        }
    }
}

/// 注册表项：描述符 -> (隧道, 方向)，对端由方向推出
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub tunnel: TunnelId,
    pub side: Side,
}

/// 一条已建立的隧道
#[derive(Debug)]
pub struct Tunnel {
    id: TunnelId,
    client: TcpStream,
    destination: TcpStream,
    /// 客户端地址
    pub client_addr: SocketAddr,
    /// 客户端声明的目标地址
    pub request: TunnelRequest,
    /// 目标实际连上的地址
    pub destination_addr: Option<SocketAddr>,
    /// 客户端 -> 目标 的字节数
    pub bytes_client_to_dest: u64,
    /// 目标 -> 客户端 的字节数
    pub bytes_dest_to_client: u64,
    opened_at: Instant,
}

impl Tunnel {
    pub fn new(
        client: TcpStream,
        client_addr: SocketAddr,
        destination: TcpStream,
        request: TunnelRequest,
    ) -> Self {
        let destination_addr = destination.peer_addr().ok();
        Self {
            id: 0,
            client,
            destination,
            client_addr,
            request,
            destination_addr,
            bytes_client_to_dest: 0,
            bytes_dest_to_client: 0,
            opened_at: Instant::now(),
        }
    }

    pub fn id(&self) -> TunnelId {
        self.id
    }

    pub fn stream(&self, side: Side) -> &TcpStream {
        match side {
            Side::Client => &self.client,
            Side::Destination => &self.destination,
        }
    }

    pub fn fd(&self, side: Side) -> RawFd {
        self.stream(side).as_raw_fd()
    }

    pub fn client_fd(&self) -> RawFd {
        self.client.as_raw_fd()
    }

    pub fn destination_fd(&self) -> RawFd {
        self.destination.as_raw_fd()
    }

    /// 以 `src` 为读端返回 (src, dst)
    pub fn halves(&self, src: Side) -> (&TcpStream, &TcpStream) {
        (self.stream(src), self.stream(src.peer()))
    }

    /// 记录从 `from` 一侧读出并成功转发的字节数
    pub fn record(&mut self, from: Side, bytes: usize) {
        match from {
            Side::Client => self.bytes_client_to_dest += bytes as u64,
            Side::Destination => self.bytes_dest_to_client += bytes as u64,
        }
    }

    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

/// Socket identity -> tunnel map.
///
/// Both directions of a tunnel are inserted together and removed together.
/// Removal hands the [`Tunnel`] back to the caller still open, so the caller
/// can unregister both descriptors before dropping (closing) them.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<RawFd, Entry>,
    tunnels: HashMap<TunnelId, Tunnel>,
    next_id: TunnelId,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair both sockets of `tunnel`.
    ///
    /// Fails without touching the registry if either descriptor is already a
    /// key; the tunnel is handed back so the caller decides how to close it.
    pub fn insert(&mut self, mut tunnel: Tunnel) -> Result<TunnelId, Tunnel> {
        let client_fd = tunnel.client_fd();
        let destination_fd = tunnel.destination_fd();
        if client_fd == destination_fd
            || self.entries.contains_key(&client_fd)
            || self.entries.contains_key(&destination_fd)
        {
            return Err(tunnel);
        }

        self.next_id += 1;
        let id = self.next_id;
        tunnel.id = id;

        self.entries.insert(
            client_fd,
            Entry {
                tunnel: id,
                side: Side::Client,
            },
        );
        self.entries.insert(
            destination_fd,
            Entry {
                tunnel: id,
                side: Side::Destination,
            },
        );
        self.tunnels.insert(id, tunnel);
        Ok(id)
    }

    pub fn lookup(&self, fd: RawFd) -> Option<Entry> {
        self.entries.get(&fd).copied()
    }

    /// 查找描述符的对端描述符
    pub fn peer_of(&self, fd: RawFd) -> Option<RawFd> {
        let entry = self.lookup(fd)?;
        let tunnel = self.tunnels.get(&entry.tunnel)?;
        Some(tunnel.fd(entry.side.peer()))
    }

    pub fn tunnel(&self, id: TunnelId) -> Option<&Tunnel> {
        self.tunnels.get(&id)
    }

    pub fn tunnel_mut(&mut self, id: TunnelId) -> Option<&mut Tunnel> {
        self.tunnels.get_mut(&id)
    }

    /// Remove both directions of a tunnel. Returns `None` if it is already gone.
    pub fn remove(&mut self, id: TunnelId) -> Option<Tunnel> {
        let tunnel = self.tunnels.remove(&id)?;
        self.entries.remove(&tunnel.client_fd());
        self.entries.remove(&tunnel.destination_fd());
        Some(tunnel)
    }

    pub fn contains_fd(&self, fd: RawFd) -> bool {
        self.entries.contains_key(&fd)
    }

    /// 当前隧道数量
    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    /// 注册表项数量，始终是隧道数量的两倍
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn tunnels(&self) -> impl Iterator<Item = &Tunnel> {
        self.tunnels.values()
    }
}
