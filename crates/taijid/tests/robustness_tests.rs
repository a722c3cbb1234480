//! Robustness tests for the broker.
//!
//! These tests verify the daemon handles edge cases and error conditions gracefully:
//! - Malformed, non-UTF-8 and over-long input
//! - Handshake deadlines
//! - Rapid connect/disconnect
//! - Slow consumers under each overflow policy
//! - Concurrent sessions
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::net::SocketAddr;
use std::time::Duration;

use taijid::config::Config;
use taijid::registry::{spawn_registry, OverflowPolicy, RegistryHandle};
use taijid::server::PushServer;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

const READ_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Payload size used to fill socket buffers quickly
const LARGE_PAYLOAD: usize = 128 * 1024;

// ============================================================================
// Test Helpers
// ============================================================================

struct TestServer {
    client_addr: SocketAddr,
    control_addr: SocketAddr,
    registry: RegistryHandle,
    cancel_token: CancellationToken,
}

impl TestServer {
    async fn spawn(config: Config) -> Self {
        let config = Config {
            bind_address: "127.0.0.1".parse().unwrap(),
            client_port: 0,
            control_port: 0,
            ..config
        };

        let registry = spawn_registry(config.overflow_policy);
        let cancel_token = CancellationToken::new();
        let server = PushServer::bind(&config, registry.clone(), cancel_token.clone())
            .await
            .expect("bind loopback listeners");

        let client_addr = server.client_addr().unwrap();
        let control_addr = server.control_addr().unwrap();
        tokio::spawn(server.run());

        TestServer {
            client_addr,
            control_addr,
            registry,
            cancel_token,
        }
    }

    /// Connects and handshakes, then waits until `id` is listed.
    async fn connect_client(&self, id: &str) -> BufReader<TcpStream> {
        let mut stream = TcpStream::connect(self.client_addr).await.unwrap();
        stream
            .write_all(format!("HELO {id}\n").as_bytes())
            .await
            .unwrap();
        self.wait_until(|ids| ids.iter().any(|i| i == id)).await;
        BufReader::new(stream)
    }

    /// Polls the registry until `pred` holds for the listed ids.
    async fn wait_until<F>(&self, pred: F) -> Vec<String>
    where
        F: Fn(&[String]) -> bool,
    {
        timeout(READ_TIMEOUT, async {
            loop {
                let mut ids: Vec<String> = self
                    .registry
                    .list_all()
                    .await
                    .into_iter()
                    .map(|id| id.as_str().to_string())
                    .collect();
                ids.sort();
                if pred(&ids) {
                    return ids;
                }
                sleep(POLL_INTERVAL).await;
            }
        })
        .await
        .expect("registry should reach expected state")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn read_to_end(stream: &mut BufReader<TcpStream>) -> Vec<u8> {
    let mut rest = Vec::new();
    timeout(READ_TIMEOUT, stream.read_to_end(&mut rest))
        .await
        .expect("server should close")
        .unwrap();
    rest
}

/// Broadcasts large messages until the registry reports trouble delivering.
async fn flood_until<F>(registry: &RegistryHandle, pred: F) -> bool
where
    F: Fn(&taijid::registry::DeliveryReport) -> bool,
{
    let payload = format!("\"{}\"", "x".repeat(LARGE_PAYLOAD));
    for _ in 0..2_000 {
        let report = registry.broadcast(payload.clone()).await.unwrap();
        if pred(&report) {
            return true;
        }
    }
    false
}

// ============================================================================
// Malformed Input Tests
// ============================================================================

#[tokio::test]
async fn test_non_utf8_handshake_is_rejected() {
    let server = TestServer::spawn(Config::default()).await;

    let mut stream = TcpStream::connect(server.client_addr).await.unwrap();
    stream.write_all(&[0xff, 0xfe, 0xfd, b'\n']).await.unwrap();

    let mut stream = BufReader::new(stream);
    assert_eq!(read_to_end(&mut stream).await, b"Invalid HELO line\n");
}

#[tokio::test]
async fn test_non_utf8_after_handshake_is_echoed() {
    let server = TestServer::spawn(Config::default()).await;
    let mut client = server.connect_client("abc").await;

    client.get_mut().write_all(b"caf\xe9\n").await.unwrap();

    let mut echoed = Vec::new();
    timeout(READ_TIMEOUT, client.read_until(b'\n', &mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, b"caf\xe9\n");
    assert_eq!(server.wait_until(|ids| !ids.is_empty()).await, vec!["abc"]);

    let report = server.registry.broadcast("\"still here\"".to_string()).await.unwrap();
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn test_non_utf8_console_line_keeps_console_open() {
    let server = TestServer::spawn(Config::default()).await;

    let mut console = BufReader::new(TcpStream::connect(server.control_addr).await.unwrap());
    console.get_mut().write_all(&[0xff, b'\n']).await.unwrap();
    console.get_mut().write_all(b"q\n").await.unwrap();

    let output = read_to_end(&mut console).await;
    assert_eq!(
        output,
        b"Welcome to PushServer console.\n> <cmd> [args]\n> "
    );
}

#[tokio::test]
async fn test_unterminated_handshake_is_not_registered() {
    let server = TestServer::spawn(Config::default()).await;
    let mut events = server.registry.subscribe();

    let mut stream = TcpStream::connect(server.client_addr).await.unwrap();
    stream.write_all(b"HELO abc").await.unwrap();
    stream.shutdown().await.unwrap();

    let mut stream = BufReader::new(stream);
    assert!(read_to_end(&mut stream).await.is_empty());
    assert!(events.try_recv().is_err());
    assert!(server.registry.list_all().await.is_empty());
}

#[tokio::test]
async fn test_over_long_line_closes_session() {
    let config = Config {
        max_line_bytes: 64,
        ..Config::default()
    };
    let server = TestServer::spawn(config).await;
    let mut client = server.connect_client("abc").await;

    let line = format!("{}\n", "z".repeat(200));
    let _ = client.get_mut().write_all(line.as_bytes()).await;

    let mut rest = Vec::new();
    let _ = timeout(READ_TIMEOUT, client.read_to_end(&mut rest)).await;
    assert!(rest.is_empty(), "nothing should be echoed");
    server.wait_until(|ids| ids.is_empty()).await;
}

#[tokio::test]
async fn test_over_long_console_line_closes_console() {
    let config = Config {
        max_line_bytes: 64,
        ..Config::default()
    };
    let server = TestServer::spawn(config).await;
    let _client = server.connect_client("abc").await;

    let mut console = BufReader::new(TcpStream::connect(server.control_addr).await.unwrap());
    let line = format!("b \"{}\"\n", "z".repeat(200));
    let _ = console.get_mut().write_all(line.as_bytes()).await;

    let mut rest = Vec::new();
    let _ = timeout(READ_TIMEOUT, console.read_to_end(&mut rest)).await;
    assert_eq!(rest, b"Welcome to PushServer console.\n> ");
    assert_eq!(server.registry.list_all().await.len(), 1);
}

#[tokio::test]
async fn test_large_line_is_echoed_whole() {
    let server = TestServer::spawn(Config::default()).await;
    let mut client = server.connect_client("abc").await;

    let line = format!("{}\n", "y".repeat(100_000));
    client.get_mut().write_all(line.as_bytes()).await.unwrap();

    let mut echoed = String::new();
    timeout(READ_TIMEOUT, client.read_line(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, line);
}

#[tokio::test]
async fn test_malformed_console_lines_do_not_affect_clients() {
    let server = TestServer::spawn(Config::default()).await;
    let mut client = server.connect_client("abc").await;

    let mut console = BufReader::new(TcpStream::connect(server.control_addr).await.unwrap());
    for line in ["\"\n", "s\n", "b\n", "s abc hello\n", "?\n", "b \"ok\"\n"] {
        console.get_mut().write_all(line.as_bytes()).await.unwrap();
    }

    let mut line = String::new();
    timeout(READ_TIMEOUT, client.read_line(&mut line))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line, "BROADCAST \"ok\"\n");
}

// ============================================================================
// Handshake Deadline Tests
// ============================================================================

#[tokio::test]
async fn test_silent_client_times_out() {
    let config = Config {
        handshake_timeout_secs: 1,
        ..Config::default()
    };
    let server = TestServer::spawn(config).await;

    let mut stream = BufReader::new(TcpStream::connect(server.client_addr).await.unwrap());
    assert_eq!(read_to_end(&mut stream).await, b"Handshake timed out\n");
    assert!(server.registry.list_all().await.is_empty());
}

#[tokio::test]
async fn test_disabled_handshake_timeout_waits() {
    let config = Config {
        handshake_timeout_secs: 0,
        ..Config::default()
    };
    let server = TestServer::spawn(config).await;

    let mut stream = BufReader::new(TcpStream::connect(server.client_addr).await.unwrap());
    let mut buf = [0u8; 1];
    let idle = timeout(Duration::from_millis(200), stream.read(&mut buf)).await;
    assert!(idle.is_err(), "server should keep waiting for HELO");

    stream.get_mut().write_all(b"HELO late\n").await.unwrap();
    server.wait_until(|ids| ids == ["late"]).await;
}

// ============================================================================
// Churn and Concurrency Tests
// ============================================================================

#[tokio::test]
async fn test_rapid_connect_disconnect() {
    let server = TestServer::spawn(Config::default()).await;

    for n in 0..50 {
        let mut stream = TcpStream::connect(server.client_addr).await.unwrap();
        stream
            .write_all(format!("HELO churn-{n}\n").as_bytes())
            .await
            .unwrap();
        drop(stream);
    }

    server.wait_until(|ids| ids.is_empty()).await;

    // Still accepting afterwards.
    let _client = server.connect_client("after").await;
    assert_eq!(server.wait_until(|ids| !ids.is_empty()).await, vec!["after"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_stay_consistent() {
    let server = TestServer::spawn(Config::default()).await;
    let addr = server.client_addr;

    let mut tasks = Vec::new();
    for n in 0..40 {
        tasks.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(format!("HELO c{n:02}\n").as_bytes())
                .await
                .unwrap();
            // Odd clients leave again.
            if n % 2 == 1 {
                stream.write_all(b"bye\n").await.unwrap();
                return None;
            }
            Some(stream)
        }));
    }

    let mut kept = Vec::new();
    for task in tasks {
        if let Some(stream) = task.await.unwrap() {
            kept.push(stream);
        }
    }

    let expected: Vec<String> = (0..40).step_by(2).map(|n| format!("c{n:02}")).collect();
    let ids = server.wait_until(|ids| ids == expected.as_slice()).await;
    assert_eq!(ids.len(), 20);

    let report = server.registry.broadcast("\"all\"".to_string()).await.unwrap();
    assert_eq!(report.delivered, 20);
}

// ============================================================================
// Slow Consumer Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_client_drops_messages_but_stays() {
    let config = Config {
        inbox_capacity: 1,
        overflow_policy: OverflowPolicy::DropNewest,
        ..Config::default()
    };
    let server = TestServer::spawn(config).await;

    // Never reads, so its socket buffers fill up.
    let _stalled = server.connect_client("stalled").await;

    let dropped = flood_until(&server.registry, |report| report.dropped > 0).await;
    assert!(dropped, "stalled client should eventually overflow");

    assert_eq!(server.registry.list_all().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_client_is_disconnected() {
    let config = Config {
        inbox_capacity: 16,
        overflow_policy: OverflowPolicy::Disconnect,
        ..Config::default()
    };
    let server = TestServer::spawn(config).await;

    let _stalled = server.connect_client("stalled").await;
    let mut healthy = server.connect_client("healthy").await;

    // Keep the healthy client drained.
    let drain = tokio::spawn(async move {
        let mut line = String::new();
        loop {
            line.clear();
            match healthy.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    let evicted = flood_until(&server.registry, |report| report.evicted > 0).await;
    assert!(evicted, "stalled client should eventually be evicted");

    let ids = server.wait_until(|ids| !ids.iter().any(|i| i == "stalled")).await;
    assert_eq!(ids, vec!["healthy"]);

    drain.abort();
}

#[tokio::test]
async fn test_console_stays_responsive_with_stalled_client() {
    let config = Config {
        inbox_capacity: 1,
        overflow_policy: OverflowPolicy::DropNewest,
        ..Config::default()
    };
    let server = TestServer::spawn(config).await;
    let _stalled = server.connect_client("stalled").await;

    flood_until(&server.registry, |report| report.dropped > 0).await;

    let mut console = BufReader::new(TcpStream::connect(server.control_addr).await.unwrap());
    console.get_mut().write_all(b"b \"still\"\nq\n").await.unwrap();

    let output = String::from_utf8(read_to_end(&mut console).await).unwrap();
    assert_eq!(
        output,
        "Welcome to PushServer console.\n> Message broadcasted.\n> "
    );
}
