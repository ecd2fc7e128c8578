use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::BrokerConfig;

/// 检查配置文件权限（仅Unix系统）
#[cfg(unix)]
pub fn check_config_file_permissions(config_path: &str) -> Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tracing::warn;

    let metadata = fs::metadata(config_path)
        .with_context(|| format!("Failed to read metadata for config file: {}", config_path))?;
    let mode = metadata.permissions().mode();

    // 检查是否其他用户可写（o+w = 0o002）
    if mode & 0o002 != 0 {
        warn!(
            "⚠️  SECURITY WARNING: Config file '{}' is writable by others (permissions: {:o})\n\
             Anyone on this host can change where the broker listens.\n\
             RECOMMENDATION: chmod 644 {}",
            config_path,
            mode & 0o777,
            config_path
        );
    }

    Ok(())
}

/// Windows系统不进行权限检查
#[cfg(not(unix))]
pub fn check_config_file_permissions(_config_path: &str) -> Result<()> {
    Ok(())
}

#[derive(Serialize)]
struct CheckResult {
    valid: bool,
    config_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    details: serde_json::Value,
}

impl CheckResult {
    fn failed(error: String) -> Self {
        Self {
            valid: false,
            config_type: "unknown".to_string(),
            warnings: vec![],
            error: Some(error),
            details: serde_json::json!({}),
        }
    }
}

/// Expand path with tilde (~) and make it absolute
pub fn expand_path(path: &str) -> Result<String> {
    let expanded = shellexpand::tilde(path);
    let path_buf = PathBuf::from(expanded.as_ref());

    if path_buf.is_absolute() {
        Ok(expanded.into_owned())
    } else {
        // Convert relative path to absolute
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&path_buf)
            .to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid path: {}", path))
    }
}

/// Warnings for settings that are valid but probably not what the operator wants
fn collect_warnings(config: &BrokerConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.handshake_timeout_ms.is_none() {
        warnings.push(
            "handshake_timeout_ms is not set, a silent client can stall the event loop"
                .to_string(),
        );
    }
    if config.connect_timeout_ms.is_none() {
        warnings.push(
            "connect_timeout_ms is not set, an unreachable destination can stall the event loop"
                .to_string(),
        );
    }
    if config.listen_addr == "0.0.0.0" || config.listen_addr == "::" {
        warnings.push(format!(
            "Broker listens on all interfaces ({}), any reachable host can open tunnels",
            config.listen_addr
        ));
    }
    warnings
}

/// Check configuration file format
pub fn check_config(config_path: &str, format: &str) -> Result<()> {
    let path = Path::new(config_path);

    // Check if file exists
    if !path.exists() {
        if format == "json" {
            let result =
                CheckResult::failed(format!("Configuration file not found: {}", config_path));
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            println!("✗ Configuration file not found: {}", config_path);
        }
        anyhow::bail!("Configuration file not found: {}", config_path);
    }

    if format == "text" {
        println!("Checking configuration file: {}\n", config_path);
    }

    match BrokerConfig::load(config_path) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            let details = serde_json::json!({
                "listen_addr": config.listen_addr,
                "listen_port": config.listen_port,
                "chunk_size": config.chunk_size,
                "trigger": config.trigger,
                "connect_timeout_ms": config.connect_timeout_ms,
                "handshake_timeout_ms": config.handshake_timeout_ms,
                "rate_limit": config.rate_limit,
            });

            if format == "json" {
                let result = CheckResult {
                    valid: true,
                    config_type: "broker".to_string(),
                    warnings,
                    error: None,
                    details,
                };
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("✓ Configuration type: Broker");
                println!("✓ Listen endpoint: {}", config.listen_endpoint());
                println!("✓ Chunk size: {} bytes", config.chunk_size);
                println!("✓ Trigger mode: {}", config.trigger);
                match config.connect_timeout_ms {
                    Some(ms) => println!("✓ Connect timeout: {} ms", ms),
                    None => println!("✓ Connect timeout: none"),
                }
                match config.handshake_timeout_ms {
                    Some(ms) => println!("✓ Handshake timeout: {} ms", ms),
                    None => println!("✓ Handshake timeout: none"),
                }
                if let Some(ref rate_limit) = config.rate_limit {
                    println!(
                        "✓ Rate limit: {} req/s (burst {})",
                        rate_limit.requests_per_second, rate_limit.burst_size
                    );
                }
                for warning in &warnings {
                    println!("⚠ Warning: {}", warning);
                }
                println!("\n✓ Broker configuration is valid!");
            }
            Ok(())
        }
        Err(e) => {
            if format == "json" {
                let result = CheckResult::failed(format!("{:#}", e));
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("✗ Configuration validation failed!");
                println!("\nError details:");
                println!("{:#}", e);

                // Provide hints for common issues
                println!("\nCommon issues:");
                println!("  1. Check TOML syntax (brackets, quotes, commas)");
                println!("  2. Ensure settings live under a [broker] section");
                println!("  3. Verify field names are spelled correctly");
                println!("  4. Ensure port numbers are valid (0-65535)");
                println!("  5. trigger must be \"level\" or \"oneshot\"");
                println!("  6. chunk_size and timeouts must be greater than 0");
            }

            Err(e)
        }
    }
}
