use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tcp-broker")]
#[command(author, version, about = "Single-threaded TCP tunneling broker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行 broker
    Broker {
        /// 配置文件路径（缺省使用内置默认值）
        #[arg(short, long)]
        config: Option<String>,

        /// 覆盖监听地址
        #[arg(long)]
        listen: Option<String>,

        /// 覆盖监听端口
        #[arg(short, long)]
        port: Option<u16>,

        /// 使用 one-shot 触发模式
        #[arg(long)]
        oneshot: bool,
    },
    /// 通过 broker 建立隧道，并接到标准输入输出
    Connect {
        /// broker 地址 (HOST:PORT)
        #[arg(long, default_value = "127.0.0.1:5050")]
        proxy: String,

        /// 目标主机
        host: String,

        /// 目标端口
        port: u16,
    },
    /// 检查配置文件格式是否正确
    Check {
        /// 配置文件路径
        #[arg(short, long)]
        config: String,

        /// 输出格式 (text, json)
        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
    /// 生成配置文件模板
    Template {
        /// 输出文件路径（缺省打印到标准输出）
        #[arg(short, long)]
        output: Option<String>,
    },
}
