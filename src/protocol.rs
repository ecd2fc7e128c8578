/// 隧道请求头的编解码
///
/// 客户端连接到 broker 之后，在任何转发数据之前只发送一次：
///
/// ```text
/// +---------+----------+----------------+-----------+
/// | "zlbs"  | host_len | host (ASCII)   | port (BE) |
/// | 4 bytes | 1 byte   | host_len bytes | 2 bytes   |
/// +---------+----------+----------------+-----------+
/// ```
///
/// 请求头之后连接即变为无分帧的双向字节管道。
use crate::error::{Result, TunnelError};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::io::{Read, Write};

/// 协议魔数
pub const MAGIC: &[u8; 4] = b"zlbs";

/// 主机名最大长度（受 1 字节长度前缀限制）
pub const MAX_HOST_LEN: usize = u8::MAX as usize;

/// 客户端声明的目标地址
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TunnelRequest {
    pub host: String,
    pub port: u16,
}

impl TunnelRequest {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// 从阻塞读取器中按顺序读取 magic、主机名和端口
    ///
    /// 任何短读都会以 `UnexpectedEof` 的 I/O 错误返回。
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(TunnelError::protocol(format!(
                "unexpected magic {:?}",
                String::from_utf8_lossy(&magic)
            )));
        }

        let mut len = [0u8; 1];
        reader.read_exact(&mut len)?;

        let mut host = vec![0u8; len[0] as usize];
        reader.read_exact(&mut host)?;
        if !host.is_ascii() {
            return Err(TunnelError::protocol("destination host is not ASCII"));
        }
        // ASCII 一定是合法的 UTF-8
        let host = String::from_utf8(host).map_err(|e| TunnelError::protocol(e.to_string()))?;

        let mut port = [0u8; 2];
        reader.read_exact(&mut port)?;

        Ok(Self {
            host,
            port: u16::from_be_bytes(port),
        })
    }

    /// 编码为完整的请求头
    pub fn encode(&self) -> Result<Bytes> {
        if self.host.len() > MAX_HOST_LEN {
            return Err(TunnelError::protocol(format!(
                "destination host is {} bytes, at most {} allowed",
                self.host.len(),
                MAX_HOST_LEN
            )));
        }
        if !self.host.is_ascii() {
            return Err(TunnelError::protocol("destination host is not ASCII"));
        }

        let mut buf = BytesMut::with_capacity(MAGIC.len() + 1 + self.host.len() + 2);
        buf.put_slice(MAGIC);
        buf.put_u8(self.host.len() as u8);
        buf.put_slice(self.host.as_bytes());
        buf.put_u16(self.port);
        Ok(buf.freeze())
    }

    /// 编码并整体写入
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let header = self.encode()?;
        writer.write_all(&header)?;
        writer.flush()?;
        Ok(())
    }

    /// `host:port` 形式，可直接交给 `ToSocketAddrs`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for TunnelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
