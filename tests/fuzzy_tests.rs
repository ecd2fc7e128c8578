/// Fuzzy tests for broker reliability
///
/// These tests throw malformed, truncated and random handshakes at a broker
/// and check that every bad connection is closed without leaving a tunnel
/// behind, and that the broker keeps serving well-formed requests.
mod common;

use rand::Rng;
use std::time::Duration;
use tcp_broker::{BrokerConfig, TriggerMode};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const TIMEOUT: Duration = Duration::from_secs(5);

fn fuzzy_config(trigger: TriggerMode) -> BrokerConfig {
    BrokerConfig::builder()
        .listen_port(0)
        .trigger(trigger)
        .connect_timeout_ms(500)
        .handshake_timeout_ms(500)
        .build()
        .unwrap()
}

/// 发送一段数据并关闭写方向，等待 broker 关闭连接
async fn send_and_expect_close(addr: std::net::SocketAddr, data: &[u8]) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let _ = stream.write_all(data).await;
    let _ = stream.shutdown().await;
    let response = common::read_until_closed(&mut stream, TIMEOUT).await.unwrap();
    assert!(response.is_empty(), "broker sent data on a rejected connection");
}

async fn assert_still_serving(addr: std::net::SocketAddr) {
    let (echo_port, echo) = common::start_echo_server().await;
    let mut stream = common::open_tunnel(addr, echo_port).await;
    let response = common::round_trip(&mut stream, b"still serving", TIMEOUT)
        .await
        .unwrap();
    assert_eq!(response, b"still serving");
    echo.abort();
}

/// 测试 broker 对截断请求头的处理
#[tokio::test]
async fn test_truncated_headers() {
    let broker = common::start_broker(fuzzy_config(TriggerMode::Level));
    let full = b"zlbs\x09localhost\x00\x50";

    // 每一个截断位置都应该被拒绝
    for cut in 0..full.len() {
        send_and_expect_close(broker.addr, &full[..cut]).await;
    }
    assert_still_serving(broker.addr).await;

    let stats = broker.stop();
    assert_eq!(stats.handshake_failures, full.len() as u64);
    assert_eq!(stats.tunnels_opened, 1);
}

/// 测试错误的 magic
#[tokio::test]
async fn test_wrong_magic_variants() {
    let broker = common::start_broker(fuzzy_config(TriggerMode::OneShot));

    let cases: &[&[u8]] = &[
        b"xxxx\x09localhost\x00\x50",
        b"ZLBS\x09localhost\x00\x50",
        b"zlb\x00\x09localhost\x00\x50",
        b"GET / HTTP/1.1\r\n\r\n",
        b"\x16\x03\x01\x00\xa5",
    ];
    for case in cases {
        send_and_expect_close(broker.addr, case).await;
    }
    assert_still_serving(broker.addr).await;

    let stats = broker.stop();
    assert_eq!(stats.handshake_failures, cases.len() as u64);
    assert_eq!(stats.connect_failures, 0);
}

/// 测试主机名长度与实际内容不符、非 ASCII 主机名和无法连接的目标
#[tokio::test]
async fn test_bad_hosts() {
    let broker = common::start_broker(fuzzy_config(TriggerMode::Level));

    // 声明 255 字节，实际只有 3 字节
    send_and_expect_close(broker.addr, b"zlbs\xffabc").await;
    // 非 ASCII
    send_and_expect_close(broker.addr, b"zlbs\x02\xc3\xa9\x00\x50").await;
    // 空主机名和端口 0 会走到连接阶段
    send_and_expect_close(broker.addr, b"zlbs\x00\x00\x50").await;
    send_and_expect_close(broker.addr, b"zlbs\x09127.0.0.1\x00\x00").await;
    assert_still_serving(broker.addr).await;

    let stats = broker.stop();
    assert_eq!(stats.handshake_failures, 2);
    assert_eq!(stats.connect_failures, 2);
    assert_eq!(stats.tunnels_opened, 1);
}

/// 测试随机数据注入
#[tokio::test]
async fn test_random_data_injection() {
    let broker = common::start_broker(fuzzy_config(TriggerMode::Level));
    let mut rng = rand::rng();

    let mut sent = 0;
    for _ in 0..20 {
        let len = rng.random_range(0..512);
        let mut random_data: Vec<u8> = (0..len).map(|_| rng.random()).collect();
        // 保证不会碰巧以合法 magic 开头
        if random_data.starts_with(b"zlbs") {
            random_data[0] = b'x';
        }
        send_and_expect_close(broker.addr, &random_data).await;
        sent += 1;
    }
    assert_still_serving(broker.addr).await;

    let stats = broker.stop();
    assert_eq!(stats.accepted, sent + 1);
    assert_eq!(stats.tunnels_opened, 1);
    assert_eq!(stats.rejected(), sent);
}

/// 测试立即断开的连接
#[tokio::test]
async fn test_immediate_disconnects() {
    let broker = common::start_broker(fuzzy_config(TriggerMode::OneShot));

    for _ in 0..10 {
        let stream = TcpStream::connect(broker.addr).await.unwrap();
        drop(stream);
    }
    assert_still_serving(broker.addr).await;

    let stats = broker.stop();
    assert_eq!(stats.handshake_failures, 10);
    assert_eq!(stats.tunnels_opened, 1);
}

/// 测试握手超时：不发送任何数据的客户端不会永久占住事件循环
#[tokio::test]
async fn test_silent_client_times_out() {
    let broker = common::start_broker(fuzzy_config(TriggerMode::Level));

    let mut silent = TcpStream::connect(broker.addr).await.unwrap();
    let response = common::read_until_closed(&mut silent, TIMEOUT).await.unwrap();
    assert!(response.is_empty());
    assert_still_serving(broker.addr).await;

    let stats = broker.stop();
    assert_eq!(stats.handshake_failures, 1);
}
