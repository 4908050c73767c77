//! HTTP control and streaming endpoint.
//!
//! Read-only routes (`/health`, `/status`, `/stream`) are open. Routes that
//! change state or write files (`/detection`, `/snap`) need the capability
//! token as `Authorization: Bearer <hex>`; tokens in the query string are
//! refused.

use crate::config::ApiSettings;
use crate::control::ControlSurface;
use crate::error::SnapshotError;
use crate::stream::{encode_chunk, multipart_content_type};
use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;
const STREAM_POLL: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    pub token: String,
    pub token_path: Option<PathBuf>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

/// Bearer capability for mutating routes. Lives for the process lifetime.
#[derive(Clone)]
pub struct CapabilityToken {
    token: [u8; 32],
}

impl CapabilityToken {
    pub fn generate() -> Self {
        let mut token = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token);
        Self { token }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.token)
    }

    pub fn validate(&self, presented: &str) -> Result<()> {
        let presented = parse_hex32(presented)?;
        let diff = presented
            .iter()
            .zip(self.token.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        if diff != 0 {
            return Err(anyhow!("capability token invalid"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CapabilityToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CapabilityToken(..)")
    }
}

pub struct ApiServer {
    cfg: ApiSettings,
    control: ControlSurface,
}

impl ApiServer {
    pub fn new(cfg: ApiSettings, control: ControlSurface) -> Self {
        Self { cfg, control }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api address {}", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind api listener on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let token = CapabilityToken::generate();
        let token_hex = token.to_hex();
        if let Some(path) = &self.cfg.token_path {
            write_token_file(path, &token_hex)?;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(ConnectionContext {
            control: self.control,
            token,
            stream_write_timeout: self.cfg.stream_write_timeout,
            shutdown: shutdown.clone(),
        });
        let join = std::thread::Builder::new()
            .name("rover-api".into())
            .spawn(move || {
                if let Err(err) = run_api(listener, ctx) {
                    log::error!("control api stopped: {}", err);
                }
            })
            .context("failed to spawn api thread")?;

        Ok(ApiHandle {
            addr,
            token: token_hex,
            token_path: self.cfg.token_path,
            shutdown,
            join: Some(join),
        })
    }
}

struct ConnectionContext {
    control: ControlSurface,
    token: CapabilityToken,
    stream_write_timeout: Duration,
    shutdown: Arc<AtomicBool>,
}

fn run_api(listener: TcpListener, ctx: Arc<ConnectionContext>) -> Result<()> {
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let ctx = Arc::clone(&ctx);
                let spawned = std::thread::Builder::new()
                    .name("rover-api-conn".into())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &ctx) {
                            log::warn!("control api request rejected: {}", err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("control api could not spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &ConnectionContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    let mutating = match request.path.as_str() {
        "/health" | "/status" | "/stream" => false,
        "/detection" | "/snap" => true,
        _ => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
    };
    let method_allowed = match request.method.as_str() {
        "GET" => true,
        "POST" => mutating,
        _ => false,
    };
    if !method_allowed {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match request.path.as_str() {
        "/health" => return write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        "/status" => {
            let payload = serde_json::to_vec(&ctx.control.status())?;
            return write_response(&mut stream, 200, "application/json", &payload);
        }
        "/stream" => return serve_stream(stream, ctx),
        _ => {}
    }

    if request.has_query_token() {
        write_json_response(
            &mut stream,
            400,
            r#"{"error":"token_query_param_not_allowed"}"#,
        )?;
        return Ok(());
    }
    let token = match request.bearer_token() {
        Some(token) => token,
        None => {
            write_json_response(&mut stream, 401, r#"{"error":"missing_token"}"#)?;
            return Ok(());
        }
    };
    if let Err(err) = ctx.token.validate(&token) {
        write_json_response(&mut stream, 401, r#"{"error":"invalid_token"}"#)?;
        return Err(err);
    }

    if request.path == "/detection" {
        let Some(enabled) = request.query_param("value").and_then(parse_flag) else {
            write_json_response(&mut stream, 400, r#"{"error":"invalid_value"}"#)?;
            return Ok(());
        };
        let enabled = ctx.control.set_detection_enabled(enabled);
        let payload = serde_json::to_vec(&serde_json::json!({ "detection": enabled }))?;
        return write_response(&mut stream, 200, "application/json", &payload);
    }

    match ctx.control.capture_snapshot() {
        Ok(path) => {
            let payload =
                serde_json::to_vec(&serde_json::json!({ "path": path.display().to_string() }))?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        Err(SnapshotError::NoFrameAvailable) => {
            write_json_response(&mut stream, 409, r#"{"error":"no_frame_available"}"#)
        }
        Err(err) => {
            log::error!("snapshot failed: {}", err);
            write_json_response(&mut stream, 500, r#"{"error":"snapshot_failed"}"#)
        }
    }
}

/// Push multipart chunks until the viewer goes away or the server stops.
fn serve_stream(mut stream: TcpStream, ctx: &ConnectionContext) -> Result<()> {
    stream.set_write_timeout(Some(ctx.stream_write_timeout))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-cache, no-store\r\nConnection: close\r\n\r\n",
        multipart_content_type()
    );
    stream.write_all(header.as_bytes())?;

    let hub = ctx.control.hub();
    let subscription = hub.subscribe();
    let id = subscription.id();
    let result = loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break Ok(());
        }
        match subscription.recv_timeout(STREAM_POLL) {
            Ok(Some(frame)) => {
                if let Err(err) = stream.write_all(&encode_chunk(&frame)).and_then(|_| stream.flush()) {
                    log::debug!("stream subscriber {} write failed: {}", id, err);
                    break Ok(());
                }
            }
            Ok(None) => continue,
            Err(err) => {
                log::debug!("{}", err);
                break Ok(());
            }
        }
    };
    hub.unsubscribe(id);
    result
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" => Some(false),
        _ => None,
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        raw_path: raw_path.to_string(),
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        401 => "HTTP/1.1 401 Unauthorized",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    raw_path: String,
}

impl HttpRequest {
    fn bearer_token(&self) -> Option<String> {
        if let Some(value) = self.headers.get("authorization") {
            let parts: Vec<&str> = value.split_whitespace().collect();
            if parts.len() == 2 && parts[0].eq_ignore_ascii_case("bearer") {
                return Some(parts[1].to_string());
            }
        }
        None
    }

    fn query_param(&self, key: &str) -> Option<&str> {
        let query = self.raw_path.split_once('?')?.1;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    fn has_query_token(&self) -> bool {
        self.query_param("token").is_some()
    }
}

fn write_token_file(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, format!("{token}\n"))
        .with_context(|| format!("write token file {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

fn parse_hex32(value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)?;
    if bytes.len() != 32 {
        return Err(anyhow!("token must be 32 bytes"));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
