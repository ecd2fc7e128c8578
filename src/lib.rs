/// TCP Broker 库入口
///
/// 将核心模块导出为库，方便测试和复用
pub mod broker;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod poller;
pub mod protocol;
pub mod rate_limiter;
pub mod registry;
pub mod relay;
pub mod stats;

// 重新导出常用类型
pub use broker::{Broker, SocketState, Turn};
pub use config::{BrokerConfig, BrokerConfigBuilder};
pub use error::{Result, TunnelError};
pub use poller::TriggerMode;
pub use protocol::TunnelRequest;
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use registry::{ConnectionRegistry, Side, Tunnel, TunnelId};
pub use relay::{CloseReason, RelayOutcome};
pub use stats::BrokerStats;
