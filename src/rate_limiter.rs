/// 速率限制器模块
///
/// 使用 token bucket 算法限制新隧道的建立速率；超出限制的连接在握手之前直接关闭
use crate::error::{Result, TunnelError};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

/// 速率限制器配置（缺省字段取默认值）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// 每秒允许的新连接数
    pub requests_per_second: u32,
    /// 突发容量（允许短时间内的峰值）
    pub burst_size: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 100, // 默认每秒 100 个新连接
            burst_size: 200,          // 允许短时间内 200 个峰值连接
        }
    }
}

/// 速率限制器包装器
///
/// 事件循环是单线程的，限制器由 broker 独占，不需要 `Arc`
pub struct RateLimiter {
    inner: GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>,
    clock: DefaultClock,
    config: RateLimiterConfig,
}

impl RateLimiter {
    /// 创建新的速率限制器
    pub fn new(config: RateLimiterConfig) -> Result<Self> {
        let per_second = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            TunnelError::config_error("rate_limit.requests_per_second must be greater than 0")
        })?;
        let burst = NonZeroU32::new(config.burst_size).ok_or_else(|| {
            TunnelError::config_error("rate_limit.burst_size must be greater than 0")
        })?;

        let quota = Quota::per_second(per_second).allow_burst(burst);

        Ok(Self {
            inner: GovernorLimiter::direct(quota),
            clock: DefaultClock::default(),
            config,
        })
    }

    /// 尝试获取一个令牌（非阻塞）
    /// 返回 Ok(()) 如果允许请求，否则返回需要等待的时间
    pub fn check(&self) -> std::result::Result<(), Duration> {
        match self.inner.check() {
            Ok(_) => Ok(()),
            Err(not_until) => Err(not_until.wait_time_from(self.clock.now())),
        }
    }

    /// 获取配置信息
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let config = RateLimiterConfig {
            requests_per_second: 10,
            burst_size: 20,
        };
        let limiter = RateLimiter::new(config).unwrap();
        assert_eq!(limiter.config().requests_per_second, 10);
        assert_eq!(limiter.config().burst_size, 20);
    }

    #[test]
    fn test_rate_limiter_rejects_zero() {
        let config = RateLimiterConfig {
            requests_per_second: 0,
            burst_size: 20,
        };
        assert!(RateLimiter::new(config).is_err());

        let config = RateLimiterConfig {
            requests_per_second: 10,
            burst_size: 0,
        };
        assert!(RateLimiter::new(config).is_err());
    }

    #[test]
    fn test_rate_limiter_check() {
        let config = RateLimiterConfig {
            requests_per_second: 1,
            burst_size: 10,
        };
        let limiter = RateLimiter::new(config).unwrap();

        // 前 10 个请求应该立即通过（burst_size）
        for _ in 0..10 {
            assert!(limiter.check().is_ok());
        }

        // 第 11 个请求应该被限流
        let wait = limiter.check().unwrap_err();
        assert!(wait <= Duration::from_secs(1));
    }
}
