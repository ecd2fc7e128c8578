use anyhow::Result;

use crate::poller::TriggerMode;

use super::{validator::ConfigValidator, BrokerConfig, RateLimitConfig};

/// BrokerConfig Builder
#[derive(Debug, Default)]
pub struct BrokerConfigBuilder {
    listen_addr: Option<String>,
    listen_port: Option<u16>,
    chunk_size: Option<usize>,
    trigger: Option<TriggerMode>,
    connect_timeout_ms: Option<u64>,
    handshake_timeout_ms: Option<u64>,
    rate_limit: Option<RateLimitConfig>,
}

impl BrokerConfigBuilder {
    /// 创建新的 Builder
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置监听地址
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// 设置监听端口
    pub fn listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    /// 设置单次转发的最大字节数
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// 设置触发模式
    pub fn trigger(mut self, trigger: TriggerMode) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// 设置连接目标的超时（毫秒）
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    /// 设置握手读取超时（毫秒）
    pub fn handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.handshake_timeout_ms = Some(ms);
        self
    }

    /// 设置速率限制
    pub fn rate_limit(mut self, requests_per_second: u32, burst_size: u32) -> Self {
        self.rate_limit = Some(RateLimitConfig {
            requests_per_second,
            burst_size,
        });
        self
    }

    /// 构建 BrokerConfig 并验证
    pub fn build(self) -> Result<BrokerConfig> {
        let defaults = BrokerConfig::default();
        let config = BrokerConfig {
            listen_addr: self.listen_addr.unwrap_or(defaults.listen_addr),
            listen_port: self.listen_port.unwrap_or(defaults.listen_port),
            chunk_size: self.chunk_size.unwrap_or(defaults.chunk_size),
            trigger: self.trigger.unwrap_or_default(),
            connect_timeout_ms: self.connect_timeout_ms,
            handshake_timeout_ms: self.handshake_timeout_ms,
            rate_limit: self.rate_limit,
        };

        // 验证配置
        ConfigValidator::validate_broker_config(&config)?;

        Ok(config)
    }
}
