/// 自定义错误类型
///
/// 使用 thiserror 定义精确的错误类型，让事件循环可以区分
/// "只影响单个隧道" 的错误和 "必须结束循环" 的错误
use std::io;
use thiserror::Error;

/// Broker 的主要错误类型
#[derive(Error, Debug)]
pub enum TunnelError {
    /// 连接目标地址失败
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 握手协议错误（magic 不匹配、主机名非法等）
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 监听队列中已没有任何可等待的描述符
    #[error("Readiness set is empty, nothing left to watch")]
    PollerExhausted,

    /// 新连接超出速率限制
    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: std::time::Duration },

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 其他错误（保留与 anyhow 的兼容性）
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// 创建连接失败错误
    pub fn connection_failed(addr: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionFailed {
            addr: addr.into(),
            source,
        }
    }

    /// 创建协议错误
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 创建配置错误
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 检查是否为协议错误
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// 检查是否为目标连接失败
    pub fn is_connection_failed(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }

    /// 检查是否为致命的队列耗尽错误
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::PollerExhausted)
    }

    /// 握手阶段读到 EOF（对端在发送完整请求头之前关闭）
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_protocol_error() {
        let err = TunnelError::protocol("bad magic");
        assert!(err.is_protocol());
        assert_eq!(err.to_string(), "Protocol error: bad magic");
    }

    #[test]
    fn test_connection_failed() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = TunnelError::connection_failed("127.0.0.1:8080", io_err);
        assert!(err.is_connection_failed());
        assert!(err.to_string().contains("Failed to connect"));
        assert!(err.to_string().contains("127.0.0.1:8080"));
    }

    #[test]
    fn test_exhausted() {
        let err = TunnelError::PollerExhausted;
        assert!(err.is_exhausted());
        assert!(!err.is_protocol());
    }

    #[test]
    fn test_rate_limited_message() {
        let err = TunnelError::RateLimited {
            retry_after: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("Rate limit exceeded"));
    }

    #[test]
    fn test_unexpected_eof() {
        let err = TunnelError::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(err.is_unexpected_eof());

        let err = TunnelError::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(!err.is_unexpected_eof());
    }
}
