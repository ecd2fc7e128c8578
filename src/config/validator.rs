use anyhow::{bail, Result};
use tracing::{debug, warn};

use super::{BrokerConfig, RateLimitConfig};

/// 单次转发的最大允许值（1MB）
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// 配置验证器 - 负责所有配置验证逻辑
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证地址不为空
    pub fn validate_address(addr: &str, context: &str) -> Result<()> {
        if addr.trim().is_empty() {
            bail!("{}: address cannot be empty", context);
        }
        Ok(())
    }

    /// 验证转发块大小
    pub fn validate_chunk_size(chunk_size: usize) -> Result<()> {
        if chunk_size == 0 {
            bail!("chunk_size must be greater than 0");
        }
        if chunk_size > MAX_CHUNK_SIZE {
            bail!(
                "chunk_size ({}) cannot be greater than {} bytes",
                chunk_size,
                MAX_CHUNK_SIZE
            );
        }
        Ok(())
    }

    /// 验证超时时间（如果配置了）
    pub fn validate_timeout(timeout_ms: Option<u64>, context: &str) -> Result<()> {
        if timeout_ms == Some(0) {
            bail!("{}: timeout must be greater than 0, omit it to wait forever", context);
        }
        Ok(())
    }

    /// 验证 broker 配置
    pub fn validate_broker_config(config: &BrokerConfig) -> Result<()> {
        // 验证监听地址
        Self::validate_address(&config.listen_addr, "Broker listen_addr")?;

        // 验证转发块大小
        Self::validate_chunk_size(config.chunk_size)?;

        // 验证超时
        Self::validate_timeout(config.connect_timeout_ms, "connect_timeout_ms")?;
        Self::validate_timeout(config.handshake_timeout_ms, "handshake_timeout_ms")?;

        if config.handshake_timeout_ms.is_none() {
            // 握手在事件循环内同步读取，慢客户端会阻塞整个循环
            debug!("handshake_timeout_ms not set, handshakes may block the event loop");
        }

        // 验证速率限制配置
        if let Some(ref rate_limit) = config.rate_limit {
            Self::validate_rate_limit_config(rate_limit)?;
        }

        Ok(())
    }

    /// 验证速率限制配置
    pub fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<()> {
        if config.requests_per_second == 0 {
            bail!("rate_limit.requests_per_second must be greater than 0");
        }
        if config.burst_size == 0 {
            bail!("rate_limit.burst_size must be greater than 0");
        }
        if config.burst_size < config.requests_per_second {
            warn!(
                "rate_limit.burst_size ({}) is less than requests_per_second ({}), \
                 this may cause frequent rate limiting",
                config.burst_size, config.requests_per_second
            );
        }
        Ok(())
    }
}
