//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! End-to-end session tests against real sockets.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use wireline_server::{
    BUSY_MESSAGE, HandlerRegistry, LineReply, MonitorBus, MonitorEvent, Result, Server,
    ServerConfig, ServerError, SessionConfig, SessionHandle, SessionHandler, Supervisor,
    TransportKind,
};

const IAC: u8 = 255;
const WILL: u8 = 251;
const WONT: u8 = 252;
const DO: u8 = 253;

// ============================================================================
// Helpers
// ============================================================================

fn test_config(transport: TransportKind, session: SessionConfig) -> ServerConfig {
    let registry = HandlerRegistry::with_defaults();
    ServerConfig {
        name: "test".to_string(),
        transport,
        listen: "127.0.0.1:0".to_string(),
        max_connections: 100,
        session,
        handler_factory: registry.get("echo").unwrap(),
        ws: None,
        tls: None,
        shutdown_timeout: Duration::from_secs(10),
    }
}

async fn start_server(config: ServerConfig) -> (Arc<Server>, MonitorBus) {
    let monitor = MonitorBus::new();
    let server = Server::bind(config, monitor.clone()).await.unwrap();
    server.start().await.unwrap();
    (server, monitor)
}

/// Reads until `needle` appears in the collected bytes or `cap` elapses.
async fn read_until(stream: &mut TcpStream, needle: &[u8], cap: Duration) -> Vec<u8> {
    let deadline = Instant::now() + cap;
    let mut collected = Vec::new();
    let mut buffer = [0u8; 1024];
    while !contains(&collected, needle) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, stream.read(&mut buffer)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(read)) => collected.extend_from_slice(&buffer[..read]),
            Ok(Err(_)) => break,
        }
    }
    collected
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}

/// Reads until EOF or `cap`, returning whether EOF was observed.
async fn read_to_eof(stream: &mut TcpStream, cap: Duration) -> (Vec<u8>, bool) {
    let deadline = Instant::now() + cap;
    let mut collected = Vec::new();
    let mut buffer = [0u8; 1024];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return (collected, false);
        }
        match timeout(remaining, stream.read(&mut buffer)).await {
            Ok(Ok(0)) => return (collected, true),
            Ok(Ok(read)) => collected.extend_from_slice(&buffer[..read]),
            Ok(Err(_)) => return (collected, true),
            Err(_) => return (collected, false),
        }
    }
}

/// Splits out the 3-byte `IAC <verb> <option>` commands in a buffer.
fn negotiation_commands(bytes: &[u8]) -> Vec<(u8, u8)> {
    let mut commands = Vec::new();
    let mut index = 0;
    while index + 2 < bytes.len() {
        if bytes[index] == IAC {
            commands.push((bytes[index + 1], bytes[index + 2]));
            index += 3;
        } else {
            index += 1;
        }
    }
    commands
}

// ============================================================================
// Scenario: echo over TCP
// ============================================================================

#[tokio::test]
async fn echo_over_tcp() {
    let (server, _monitor) = start_server(test_config(TransportKind::Tcp, SessionConfig::default())).await;
    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();

    client.write_all(b"hello\n").await.unwrap();
    let output = read_until(&mut client, b"> ", Duration::from_secs(2)).await;
    assert_eq!(&output[..], b"Echo: hello\r\n> ");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn welcome_banner_is_written_first() {
    let session = SessionConfig {
        welcome_message: Some("Welcome to the Server!".to_string()),
        ..SessionConfig::default()
    };
    let (server, _monitor) = start_server(test_config(TransportKind::Tcp, session)).await;
    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();

    let output = read_until(&mut client, b"\r\n", Duration::from_secs(2)).await;
    assert_eq!(&output[..], b"Welcome to the Server!\r\n");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn quit_gets_goodbye_and_eof() {
    let (server, _monitor) = start_server(test_config(TransportKind::Tcp, SessionConfig::default())).await;
    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();

    client.write_all(b"QUIT\n").await.unwrap();
    let (output, eof) = read_to_eof(&mut client, Duration::from_secs(2)).await;
    assert!(contains(&output, b"Goodbye!\r\n"));
    assert!(eof, "connection must close after quit");

    server.shutdown().await.unwrap();
}

// ============================================================================
// Scenario: telnet negotiation
// ============================================================================

#[tokio::test]
async fn telnet_initial_negotiation() {
    let (server, _monitor) =
        start_server(test_config(TransportKind::Telnet, SessionConfig::default())).await;
    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();

    let mut opening = Vec::new();
    let mut buffer = [0u8; 64];
    while opening.len() < 15 {
        let read = timeout(Duration::from_secs(2), client.read(&mut buffer))
            .await
            .expect("negotiation within deadline")
            .unwrap();
        assert!(read > 0, "unexpected EOF during negotiation");
        opening.extend_from_slice(&buffer[..read]);
    }

    let commands = negotiation_commands(&opening);
    assert!(commands.contains(&(WILL, 3)), "WILL SUPPRESS-GO-AHEAD");
    assert!(commands.contains(&(DO, 3)), "DO SUPPRESS-GO-AHEAD");
    assert!(commands.contains(&(WILL, 1)), "WILL ECHO");
    assert!(commands.contains(&(DO, 24)), "DO TERMINAL-TYPE");
    assert!(commands.contains(&(DO, 31)), "DO NAWS");

    // Refuse echo; the server must not re-offer.
    client.write_all(&[IAC, WONT, 1]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut later = Vec::new();
    if let Ok(Ok(read)) = timeout(Duration::from_millis(200), client.read(&mut buffer)).await {
        later.extend_from_slice(&buffer[..read]);
    }
    assert!(
        !contains(&later, &[IAC, WILL, 1]),
        "server re-offered ECHO after refusal"
    );

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn telnet_backspace_editing() {
    let (server, _monitor) =
        start_server(test_config(TransportKind::Telnet, SessionConfig::default())).await;
    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();

    // Drain the five 3-byte opening offers.
    let mut drained = 0;
    let mut buffer = [0u8; 64];
    while drained < 15 {
        let read = timeout(Duration::from_secs(2), client.read(&mut buffer))
            .await
            .expect("negotiation within deadline")
            .unwrap();
        drained += read;
    }

    client.write_all(b"ab\x08c\r\n").await.unwrap();
    let output = read_until(&mut client, b"> ", Duration::from_secs(3)).await;
    assert!(
        contains(&output, b"Echo: ac\r\n"),
        "server must receive the edited line: {output:?}"
    );
    assert!(!contains(&output, b"Echo: ab"));

    server.shutdown().await.unwrap();
}

// ============================================================================
// Scenario: capacity guard
// ============================================================================

#[tokio::test]
async fn capacity_guard_rejects_with_busy_line() {
    let mut config = test_config(TransportKind::Tcp, SessionConfig::default());
    config.max_connections = 1;
    let (server, _monitor) = start_server(config).await;

    let mut first = TcpStream::connect(server.local_addr()).await.unwrap();
    // Let the first session install before the second connect.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.session_count(), 1);

    let started = Instant::now();
    let mut second = TcpStream::connect(server.local_addr()).await.unwrap();
    let (output, eof) = read_to_eof(&mut second, Duration::from_secs(1)).await;
    let elapsed = started.elapsed();

    assert_eq!(&output[..], format!("{BUSY_MESSAGE}\r\n").as_bytes());
    assert!(eof, "rejected client must see EOF");
    assert!(elapsed < Duration::from_millis(500), "busy reject too slow: {elapsed:?}");
    assert_eq!(server.session_count(), 1, "no session created at capacity");

    // The first client is still served.
    first.write_all(b"ping\n").await.unwrap();
    let output = read_until(&mut first, b"> ", Duration::from_secs(2)).await;
    assert!(contains(&output, b"Echo: ping\r\n"));

    server.shutdown().await.unwrap();
}

// ============================================================================
// Scenario: graceful shutdown
// ============================================================================

#[tokio::test]
async fn graceful_shutdown_drains_all_sessions() {
    let (server, monitor) = start_server(test_config(TransportKind::Tcp, SessionConfig::default())).await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(TcpStream::connect(server.local_addr()).await.unwrap());
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.session_count(), 3);

    // Observe lifecycle events directly on the bus.
    let (tx, mut events) = mpsc::channel(wireline_server::SUBSCRIBER_QUEUE);
    monitor.subscribe(tx);

    let shutdown = Instant::now();
    server.shutdown().await.unwrap();
    assert!(shutdown.elapsed() < Duration::from_secs(10));
    assert_eq!(server.session_count(), 0);

    for client in &mut clients {
        let (output, eof) = read_to_eof(client, Duration::from_secs(2)).await;
        assert!(eof, "client must see EOF after shutdown");
        assert!(contains(&output, b"Server is shutting down. Goodbye!\r\n"));
    }

    let mut ended = 0;
    while let Ok(json) = events.try_recv() {
        if let Ok(MonitorEvent::SessionEnded { .. }) = serde_json::from_str(&json) {
            ended += 1;
        }
    }
    assert_eq!(ended, 3, "one session_ended per session");

    // Repeated shutdown is a no-op.
    server.shutdown().await.unwrap();
}

// ============================================================================
// Supervisor
// ============================================================================

#[tokio::test]
async fn supervisor_runs_servers_on_both_transports() {
    let configs = vec![
        test_config(TransportKind::Tcp, SessionConfig::default()),
        test_config(TransportKind::Telnet, SessionConfig::default()),
    ];
    let supervisor = Supervisor::bind(configs, MonitorBus::new()).await.unwrap();
    supervisor.start().await.unwrap();

    let mut tcp = TcpStream::connect(supervisor.servers()[0].local_addr())
        .await
        .unwrap();
    tcp.write_all(b"over tcp\n").await.unwrap();
    let output = read_until(&mut tcp, b"> ", Duration::from_secs(2)).await;
    assert!(contains(&output, b"Echo: over tcp\r\n"));

    let mut telnet = TcpStream::connect(supervisor.servers()[1].local_addr())
        .await
        .unwrap();
    let output = read_until(&mut telnet, &[IAC], Duration::from_secs(2)).await;
    assert!(contains(&output, &[IAC]), "telnet server negotiates");

    supervisor.shutdown().await;
    for server in supervisor.servers() {
        assert!(!server.is_running());
        assert_eq!(server.session_count(), 0);
    }
}

#[tokio::test]
async fn supervisor_bind_failure_is_fatal() {
    let good = test_config(TransportKind::Tcp, SessionConfig::default());
    let mut bad = test_config(TransportKind::Tcp, SessionConfig::default());
    bad.listen = "203.0.113.1:9".to_string(); // unroutable bind address

    let result = Supervisor::bind(vec![good, bad], MonitorBus::new()).await;
    assert!(matches!(result, Err(ServerError::Bind { .. })));
}

// ============================================================================
// Idle timeout
// ============================================================================

#[tokio::test]
async fn idle_timeout_fires_within_bounds() {
    let session = SessionConfig {
        idle_timeout: Duration::from_millis(500),
        ..SessionConfig::default()
    };
    let (server, _monitor) = start_server(test_config(TransportKind::Tcp, session)).await;
    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();

    let started = Instant::now();
    let (_, eof) = read_to_eof(&mut client, Duration::from_secs(3)).await;
    let elapsed = started.elapsed();

    assert!(eof, "idle session must be closed");
    assert!(elapsed >= Duration::from_millis(450), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "fired late: {elapsed:?}");

    server.shutdown().await.unwrap();
}

// ============================================================================
// Protocol bounds
// ============================================================================

#[tokio::test]
async fn runaway_subnegotiation_closes_the_session() {
    let (server, _monitor) =
        start_server(test_config(TransportKind::Telnet, SessionConfig::default())).await;
    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();

    // A subnegotiation that never terminates with IAC SE.
    let mut runaway = vec![IAC, 250, 24];
    runaway.extend(std::iter::repeat(b'x').take(1100));
    client.write_all(&runaway).await.unwrap();

    let (_, eof) = read_to_eof(&mut client, Duration::from_secs(2)).await;
    assert!(eof, "oversized subnegotiation must close the session");

    server.shutdown().await.unwrap();
}

// ============================================================================
// Handler faults and pushes
// ============================================================================

struct FaultyHandler;

#[async_trait]
impl SessionHandler for FaultyHandler {
    async fn on_line(&mut self, _session: &SessionHandle, _line: &str) -> Result<LineReply> {
        Err(ServerError::HandlerFault("synthetic failure".to_string()))
    }
}

#[tokio::test]
async fn handler_fault_sends_internal_error_and_closes() {
    let mut registry = HandlerRegistry::new();
    registry.register("faulty", || Box::new(FaultyHandler));

    let mut config = test_config(TransportKind::Tcp, SessionConfig::default());
    config.handler_factory = registry.get("faulty").unwrap();
    let (server, _monitor) = start_server(config).await;

    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
    client.write_all(b"anything\n").await.unwrap();

    let (output, eof) = read_to_eof(&mut client, Duration::from_secs(2)).await;
    assert!(contains(&output, b"Internal error.\r\n"));
    assert!(eof, "session must close after a handler fault");

    server.shutdown().await.unwrap();
}

struct TickerHandler;

#[async_trait]
impl SessionHandler for TickerHandler {
    async fn on_connect(&mut self, session: &SessionHandle) -> Result<Vec<String>> {
        // A push producer, the way a feed handler would drive updates.
        let handle = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = handle.push_line("tick 1").await;
        });
        Ok(Vec::new())
    }

    async fn on_line(&mut self, _session: &SessionHandle, line: &str) -> Result<LineReply> {
        Ok(LineReply::line(format!("ack {line}")))
    }
}

#[tokio::test]
async fn handler_pushes_reach_the_client() {
    let mut registry = HandlerRegistry::new();
    registry.register("ticker", || Box::new(TickerHandler));

    let mut config = test_config(TransportKind::Tcp, SessionConfig::default());
    config.handler_factory = registry.get("ticker").unwrap();
    let (server, _monitor) = start_server(config).await;

    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
    let output = read_until(&mut client, b"tick 1\r\n", Duration::from_secs(2)).await;
    assert!(contains(&output, b"tick 1\r\n"), "push must arrive unprompted");

    server.shutdown().await.unwrap();
}
