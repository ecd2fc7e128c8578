// 配置管理模块 - 使用模块化设计

mod builder;
mod validator;

// 重新导出 builder 和 validator
pub use builder::BrokerConfigBuilder;
pub use validator::ConfigValidator;

pub use crate::rate_limiter::RateLimiterConfig as RateLimitConfig;

use crate::poller::TriggerMode;
use crate::relay::DEFAULT_CHUNK_SIZE;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    5050
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// Broker 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// 监听地址
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// 监听端口（0 表示由系统分配）
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// 单次转发的最大字节数
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// 触发模式（level 或 oneshot）
    #[serde(default)]
    pub trigger: TriggerMode,
    /// 连接目标地址的超时时间（毫秒，缺省则无限等待）
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    /// 读取握手请求头的超时时间（毫秒，缺省则无限等待）
    #[serde(default)]
    pub handshake_timeout_ms: Option<u64>,
    /// 速率限制配置（可选）
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            chunk_size: default_chunk_size(),
            trigger: TriggerMode::default(),
            connect_timeout_ms: None,
            handshake_timeout_ms: None,
            rate_limit: None,
        }
    }
}

impl BrokerConfig {
    /// 创建 Builder
    pub fn builder() -> BrokerConfigBuilder {
        BrokerConfigBuilder::new()
    }

    /// 验证配置
    pub fn validate(&self) -> anyhow::Result<()> {
        ConfigValidator::validate_broker_config(self)
    }

    /// `addr:port` 形式的监听端点
    pub fn listen_endpoint(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }

    /// 从 TOML 文本解析（需要 `[broker]` 表）
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        #[derive(Deserialize)]
        struct BrokerConfigWrapper {
            broker: BrokerConfig,
        }

        let wrapper: BrokerConfigWrapper =
            toml::from_str(content).context("Failed to parse broker configuration")?;
        wrapper
            .broker
            .validate()
            .context("Broker configuration validation failed")?;
        Ok(wrapper.broker)
    }

    /// 从文件加载配置
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path))?;
        Self::from_toml_str(&content)
    }
}
