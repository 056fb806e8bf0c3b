//! End-to-end tests against a real listener on an ephemeral port.

use ferry_core::config::ServerConfig;
use ferry_server::Server;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

const ADMIN_PASSWORD: &str = "sekrete123";

async fn start_server() -> (SocketAddr, TempDir) {
    let files_dir = TempDir::new().unwrap();

    let mut config = ServerConfig::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.poll_interval_ms = 10;
    config.storage.files_dir = files_dir.path().to_path_buf();

    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    (addr, files_dir)
}

struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        let n = timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for server reply")
            .unwrap();
        assert!(n > 0, "server closed the connection unexpectedly");
        line.trim_end().to_string()
    }

    async fn read_lines(&mut self, count: usize) -> Vec<String> {
        let mut lines = Vec::with_capacity(count);
        for _ in 0..count {
            lines.push(self.read_line().await);
        }
        lines
    }

    async fn read_exact(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        timeout(Duration::from_secs(5), self.reader.read_exact(&mut buf))
            .await
            .expect("timed out waiting for payload bytes")
            .unwrap();
        buf
    }

    /// Consume the five-line welcome banner, returning its first line.
    async fn skip_banner(&mut self) -> String {
        let lines = self.read_lines(5).await;
        lines[0].clone()
    }
}

#[tokio::test]
async fn test_welcome_banner_and_auth_flow() {
    let (addr, _files) = start_server().await;
    let mut client = TestClient::connect(addr).await;

    let welcome = client.skip_banner().await;
    assert_eq!(welcome, "WELCOME ClientID: 1");

    client.send("/auth alice").await;
    let reply = client.read_line().await;
    assert!(reply.contains("AUTH OK"), "{reply}");
    assert!(reply.contains("READ-ONLY"), "{reply}");

    client.send("/list").await;
    let reply = client.read_line().await;
    assert!(reply.contains("ADMIN privileges"), "{reply}");

    client.send("/auth alice sekrete123").await;
    let reply = client.read_line().await;
    assert!(reply.contains("Already authenticated"), "{reply}");

    client.send("quit").await;
    assert_eq!(client.read_line().await, "Goodbye!");
}

#[tokio::test]
async fn test_users_summary_lists_both_clients() {
    let (addr, _files) = start_server().await;

    let mut alice = TestClient::connect(addr).await;
    alice.skip_banner().await;
    alice.send("/auth alice").await;
    alice.read_line().await;

    let mut bob = TestClient::connect(addr).await;
    bob.skip_banner().await;
    bob.send(&format!("/auth bob {ADMIN_PASSWORD}")).await;
    bob.read_line().await;

    bob.send("/users").await;
    let lines = bob.read_lines(8).await;
    assert_eq!(lines[0], "USER SUMMARY:");
    assert_eq!(lines[1], "Total authenticated users: 2");
    assert_eq!(lines[2], "Admins: 1");
    assert_eq!(lines[3], "Read-only users: 1");
    assert_eq!(lines[5], "Active Users:");
    assert!(lines[6].contains("alice (read)"), "{:?}", lines);
    assert!(lines[7].contains("bob (admin)"), "{:?}", lines);
}

#[tokio::test]
async fn test_upload_then_download_round_trip() {
    let (addr, _files) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    client.skip_banner().await;

    client.send(&format!("/auth root {ADMIN_PASSWORD}")).await;
    client.read_line().await;

    client.send("/upload hello.txt 11").await;
    assert_eq!(client.read_line().await, "UPLOAD_READY");
    client.send_raw(b"hello world").await;
    let reply = client.read_line().await;
    assert!(reply.starts_with("UPLOAD_OK hello.txt"), "{reply}");

    client.send("/download hello.txt").await;
    assert_eq!(client.read_line().await, "DOWNLOAD_BEGIN hello.txt 11");
    assert_eq!(client.read_exact(11).await, b"hello world");
    assert_eq!(client.read_line().await, "DOWNLOAD_END");
}

#[tokio::test]
async fn test_zero_byte_upload_completes_immediately() {
    let (addr, _files) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    client.skip_banner().await;

    client.send(&format!("/auth root {ADMIN_PASSWORD}")).await;
    client.read_line().await;

    client.send("/upload empty.bin 0").await;
    assert_eq!(client.read_line().await, "UPLOAD_READY");
    let reply = client.read_line().await;
    assert!(reply.starts_with("UPLOAD_OK empty.bin"), "{reply}");

    client.send("/list").await;
    let lines = client.read_lines(2).await;
    assert_eq!(lines[0], "FILES (1):");
    assert_eq!(lines[1], "  empty.bin");
}

#[tokio::test]
async fn test_download_missing_file_is_an_error() {
    let (addr, _files) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    client.skip_banner().await;

    client.send(&format!("/auth root {ADMIN_PASSWORD}")).await;
    client.read_line().await;

    client.send("/download nope.txt").await;
    let reply = client.read_line().await;
    assert!(reply.starts_with("ERROR:"), "{reply}");
}

#[tokio::test]
async fn test_echo_requires_a_session() {
    let (addr, _files) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    client.skip_banner().await;

    client.send("hello out there").await;
    let reply = client.read_line().await;
    assert!(reply.starts_with("ERROR:"), "{reply}");

    client.send("/auth alice").await;
    client.read_line().await;

    client.send("hello out there").await;
    assert_eq!(client.read_line().await, "Server Echo: hello out there");
}

#[tokio::test]
async fn test_stats_reports_connections_and_sessions() {
    let (addr, _files) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    client.skip_banner().await;

    client.send("/auth alice").await;
    client.read_line().await;

    client.send("/stats").await;
    let lines = client.read_lines(4).await;
    assert_eq!(lines[0], "SERVER STATISTICS:");
    assert_eq!(lines[1], "Active connections: 1");
    assert!(
        lines[2].starts_with("Authenticated users: 1"),
        "{:?}",
        lines
    );
    assert!(lines[3].starts_with("Server time:"), "{:?}", lines);
}

#[tokio::test]
async fn test_logout_then_reauth() {
    let (addr, _files) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    client.skip_banner().await;

    client.send("/auth alice").await;
    client.read_line().await;

    client.send("/logout").await;
    assert_eq!(client.read_line().await, "Logged out successfully.");

    client.send(&format!("/auth alice {ADMIN_PASSWORD}")).await;
    let reply = client.read_line().await;
    assert!(reply.contains("ADMIN privileges"), "{reply}");
}

#[tokio::test]
async fn test_slow_reader_does_not_stall_other_clients() {
    let (addr, files) = start_server().await;
    std::fs::write(files.path().join("big.bin"), vec![7u8; 16 * 1024 * 1024]).unwrap();

    // This client requests a payload far larger than the socket buffers
    // and then never reads a byte of it.
    let mut hog = TestClient::connect(addr).await;
    hog.skip_banner().await;
    hog.send(&format!("/auth root {ADMIN_PASSWORD}")).await;
    hog.read_line().await;
    hog.send("/download big.bin").await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut other = TestClient::connect(addr).await;
    other.skip_banner().await;
    other.send("help").await;
    let reply = other.read_line().await;
    assert_eq!(reply, "AUTHENTICATION HELP:");
}

#[tokio::test]
async fn test_large_upload_round_trip() {
    let (addr, _files) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    client.skip_banner().await;

    client.send(&format!("/auth root {ADMIN_PASSWORD}")).await;
    client.read_line().await;

    let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    client
        .send(&format!("/upload big.bin {}", payload.len()))
        .await;
    assert_eq!(client.read_line().await, "UPLOAD_READY");
    client.send_raw(&payload).await;
    let reply = client.read_line().await;
    assert!(reply.starts_with("UPLOAD_OK big.bin"), "{reply}");

    client.send("/download big.bin").await;
    assert_eq!(
        client.read_line().await,
        format!("DOWNLOAD_BEGIN big.bin {}", payload.len())
    );
    assert_eq!(client.read_exact(payload.len()).await, payload);
    assert_eq!(client.read_line().await, "DOWNLOAD_END");
}

#[tokio::test]
async fn test_oversized_line_closes_the_connection() {
    let (addr, _files) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    client.skip_banner().await;

    client.send_raw(&vec![b'a'; 70 * 1024]).await;
    let reply = client.read_line().await;
    assert!(reply.starts_with("ERROR: Line too long"), "{reply}");

    let mut leftover = String::new();
    let n = timeout(
        Duration::from_secs(5),
        client.reader.read_line(&mut leftover),
    )
    .await
    .expect("timed out waiting for the connection to close")
    .unwrap();
    assert_eq!(n, 0, "connection should be closed, got {leftover:?}");
}

#[tokio::test]
async fn test_admin_can_kick_another_client() {
    let (addr, _files) = start_server().await;

    let mut victim = TestClient::connect(addr).await;
    assert_eq!(victim.skip_banner().await, "WELCOME ClientID: 1");

    let mut admin = TestClient::connect(addr).await;
    admin.skip_banner().await;
    admin.send(&format!("/auth root {ADMIN_PASSWORD}")).await;
    admin.read_line().await;

    admin.send("/kick 1").await;
    assert_eq!(
        victim.read_line().await,
        "You have been disconnected by an administrator"
    );
    assert_eq!(admin.read_line().await, "KICK OK - client #1 disconnected");
}
