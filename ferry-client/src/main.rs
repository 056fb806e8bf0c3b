//! Interactive terminal client
//!
//! Lines typed on stdin go to the server; server lines print to stdout.
//! The two protocol digressions from plain line traffic are handled here:
//! UPLOAD_READY triggers sending the staged file bytes, and DOWNLOAD_BEGIN
//! switches the reader to exact-length raw bytes until DOWNLOAD_END.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ferry-client")]
#[command(about = "Interactive client for the Ferry protocol")]
#[command(version)]
struct Args {
    /// Server host
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(default_value_t = 9000)]
    port: u16,

    /// Authenticate as this user right after connecting
    username: Option<String>,

    /// Admin password for the automatic /auth
    password: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Buffered network reader that can switch between line and raw reads.
///
/// Both read paths go through `fill_buf`, which consumes nothing until the
/// data is moved into the local buffer, so `next_line` stays safe to cancel
/// from a `select!` arm.
struct NetReader {
    inner: BufReader<OwnedReadHalf>,
    buf: Vec<u8>,
}

impl NetReader {
    fn new(read: OwnedReadHalf) -> Self {
        Self {
            inner: BufReader::new(read),
            buf: Vec::new(),
        }
    }

    /// Next newline-terminated line, or None on EOF.
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line[..pos])
                    .trim_end_matches('\r')
                    .to_string();
                return Ok(Some(text));
            }
            let chunk = self.inner.fill_buf().await?;
            if chunk.is_empty() {
                return Ok(None);
            }
            let n = chunk.len();
            self.buf.extend_from_slice(chunk);
            self.inner.consume(n);
        }
    }

    /// Exactly `len` raw bytes, draining any already-buffered data first.
    async fn read_exact(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let take = len.min(self.buf.len());
        out.extend(self.buf.drain(..take));

        while out.len() < len {
            let chunk = self.inner.fill_buf().await?;
            if chunk.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-transfer",
                ));
            }
            let take = chunk.len().min(len - out.len());
            out.extend_from_slice(&chunk[..take]);
            self.inner.consume(take);
        }
        Ok(out)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("ferry_client={level}"))),
        )
        .init();

    let addr = format!("{}:{}", args.host, args.port);
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("Failed to connect to {addr}"))?;
    println!("Connected to {addr}");

    let (read, write) = stream.into_split();
    let mut net = NetReader::new(read);
    let mut writer = write;

    if let Some(username) = &args.username {
        let auth = match &args.password {
            Some(password) => format!("/auth {username} {password}\n"),
            None => format!("/auth {username}\n"),
        };
        writer.write_all(auth.as_bytes()).await?;
    }

    // File bytes staged by a local /upload, sent once the server is ready.
    let mut pending_upload: Option<Vec<u8>> = None;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = net.next_line() => match line? {
                Some(line) => {
                    handle_server_line(&mut net, &mut writer, &mut pending_upload, line).await?;
                }
                None => {
                    println!("Connection closed by server");
                    break;
                }
            },

            input = stdin.next_line() => match input? {
                Some(input) => {
                    handle_input(&mut writer, &mut pending_upload, input.trim()).await?;
                }
                None => break,
            },
        }
    }

    Ok(())
}

async fn handle_server_line(
    net: &mut NetReader,
    writer: &mut OwnedWriteHalf,
    pending_upload: &mut Option<Vec<u8>>,
    line: String,
) -> Result<()> {
    if let Some(bytes) = take_staged_upload(pending_upload, &line) {
        writer.write_all(&bytes).await?;
        println!("Uploading {} bytes...", bytes.len());
        return Ok(());
    }

    if let Some(rest) = line.strip_prefix("DOWNLOAD_BEGIN ") {
        return receive_download(net, rest).await;
    }

    println!("{line}");
    Ok(())
}

/// Update the staged upload for one server line, returning the bytes to
/// stream once the server is ready for them. An `ERROR:` line means the
/// upload command was rejected and no transfer is pending, so the staged
/// bytes are discarded rather than shipped to a later transfer.
fn take_staged_upload(pending: &mut Option<Vec<u8>>, line: &str) -> Option<Vec<u8>> {
    if line == "UPLOAD_READY" {
        return pending.take();
    }
    if pending.is_some() && line.starts_with("ERROR:") {
        *pending = None;
    }
    None
}

/// Read the announced payload and save it under its base name.
async fn receive_download(net: &mut NetReader, announce: &str) -> Result<()> {
    let mut parts = announce.rsplitn(2, ' ');
    let size: usize = parts
        .next()
        .unwrap_or_default()
        .parse()
        .context("Malformed DOWNLOAD_BEGIN announcement")?;
    let name = parts.next().unwrap_or_default();
    if name.is_empty() {
        bail!("Malformed DOWNLOAD_BEGIN announcement");
    }

    debug!(file = name, bytes = size, "receiving download");
    let data = net.read_exact(size).await?;

    match net.next_line().await? {
        Some(marker) if marker == "DOWNLOAD_END" => {}
        other => bail!("Expected DOWNLOAD_END, got {other:?}"),
    }

    // Save by base name only; the server controls the announced name.
    let local = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    tokio::fs::write(&local, &data)
        .await
        .with_context(|| format!("Failed to save {local}"))?;
    println!("Downloaded {local} ({size} bytes)");
    Ok(())
}

async fn handle_input(
    writer: &mut OwnedWriteHalf,
    pending_upload: &mut Option<Vec<u8>>,
    input: &str,
) -> Result<()> {
    if input.is_empty() {
        return Ok(());
    }

    // /upload takes a local path here; the wire command carries the base
    // name and byte count, with the bytes sent after UPLOAD_READY.
    if let Some(path) = input.strip_prefix("/upload ") {
        let path = path.trim();
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let name = Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.to_string());
                let command = format!("/upload {} {}\n", name, bytes.len());
                *pending_upload = Some(bytes);
                writer.write_all(command.as_bytes()).await?;
            }
            Err(e) => eprintln!("Cannot read {path}: {e}"),
        }
        return Ok(());
    }

    writer.write_all(format!("{input}\n").as_bytes()).await?;
    Ok(())
}
