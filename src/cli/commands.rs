use anyhow::{Context, Result};
use tracing::info;

use crate::broker::Broker;
use crate::client;
use crate::config::BrokerConfig;
use crate::poller::TriggerMode;
use crate::protocol::TunnelRequest;

use super::config::{check_config, check_config_file_permissions, expand_path};
use super::template;

/// Execute CLI commands
pub async fn execute_command(cli: &super::Cli) -> Result<()> {
    use super::Commands;

    match &cli.command {
        Commands::Check { config, format } => {
            let config_path = expand_path(config)?;
            check_config(&config_path, format)?;
        }
        Commands::Template { output } => {
            template::generate_config_template(output.as_deref())?;
        }
        Commands::Broker {
            config,
            listen,
            port,
            oneshot,
        } => {
            let mut broker_config = match config {
                Some(path) => load_broker_config(path)?,
                None => BrokerConfig::default(),
            };
            apply_overrides(&mut broker_config, listen.as_deref(), *port, *oneshot)?;
            run_broker(broker_config).await?;
        }
        Commands::Connect { proxy, host, port } => {
            run_connect(proxy, host, *port).await?;
        }
    }

    Ok(())
}

fn load_broker_config(config: &str) -> Result<BrokerConfig> {
    let config_path = expand_path(config)?;

    // 检查配置文件权限
    check_config_file_permissions(&config_path)?;

    info!("Loading broker configuration from: {}", config_path);
    BrokerConfig::load(&config_path)
}

/// 命令行参数覆盖配置文件中的值
fn apply_overrides(
    config: &mut BrokerConfig,
    listen: Option<&str>,
    port: Option<u16>,
    oneshot: bool,
) -> Result<()> {
    if let Some(addr) = listen {
        config.listen_addr = addr.to_string();
    }
    if let Some(port) = port {
        config.listen_port = port;
    }
    if oneshot {
        config.trigger = TriggerMode::OneShot;
    }
    config.validate()
}

/// Run the broker event loop on a blocking thread
async fn run_broker(config: BrokerConfig) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut broker = Broker::bind(config)?;
        broker.run()?;
        Ok(())
    })
    .await
    .context("Broker thread panicked")?
}

/// Open a tunnel and wire it to stdin/stdout
async fn run_connect(proxy: &str, host: &str, port: u16) -> Result<()> {
    let request = TunnelRequest::new(host, port);
    let stream = client::connect(proxy, &request).await?;
    let (sent, received) = client::pipe_stdio(stream).await?;
    info!(
        "Tunnel to {} closed (sent {} bytes, received {} bytes)",
        request, sent, received
    );
    Ok(())
}
