//! Minimal blocking HTTP server for `POST /detect-threat/`.
//!
//! One listener thread, one connection at a time. Requests are read in full
//! (headers, then `Content-Length` bytes of body) before routing.

use anyhow::{anyhow, Result};
use base64::Engine;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::cache::{cache_key, VerdictCache};
use super::image::prepare_upload;
use super::upstream::ThreatModel;
use super::verdict::ThreatVerdict;
use crate::config::ServiceConfig;
use crate::multipart;

const MAX_HEADER_BYTES: usize = 8192;
const UPLOAD_FIELD: &str = "file";
const NO_FILE: &str = r#"{"error":"No file uploaded."}"#;
const NO_MODEL_RESPONSE: &str = r#"{"error":"No valid response from model."}"#;

#[derive(Debug)]
pub struct ServiceHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServiceHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("detect service thread panicked"))?;
        }
        Ok(())
    }
}

pub struct DetectService {
    cfg: ServiceConfig,
    model: Box<dyn ThreatModel>,
}

impl DetectService {
    pub fn new(cfg: ServiceConfig, model: Box<dyn ThreatModel>) -> Self {
        Self { cfg, model }
    }

    pub fn spawn(self) -> Result<ServiceHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "detect service configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;
        log::info!("detect service listening on http://{}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let mut state = ServiceState {
            cache: VerdictCache::new(self.cfg.cache_ttl, self.cfg.cache_capacity),
            cfg: self.cfg,
            model: self.model,
        };
        let join = std::thread::spawn(move || {
            if let Err(err) = run_service(listener, &mut state, shutdown_thread) {
                log::error!("detect service stopped: {}", err);
            }
        });

        Ok(ServiceHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct ServiceState {
    cfg: ServiceConfig,
    model: Box<dyn ThreatModel>,
    cache: VerdictCache,
}

fn run_service(
    listener: TcpListener,
    state: &mut ServiceState,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, state) {
                    log::warn!("detect service request rejected: {}", err);
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

fn handle_connection(mut stream: TcpStream, state: &mut ServiceState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream, state.cfg.max_upload_bytes)? {
        ReadOutcome::Request(request) => request,
        ReadOutcome::TooLarge { declared } => {
            log::warn!("detect service: upload of {} bytes refused", declared);
            write_json_response(&mut stream, 413, r#"{"error":"Upload too large."}"#, &[])?;
            return Ok(());
        }
    };

    let cors = cors_headers(&request, &state.cfg.cors_origins);
    if request.method == "OPTIONS" {
        let mut headers = cors;
        headers.push(("Access-Control-Allow-Methods", "GET, POST, OPTIONS".to_string()));
        headers.push((
            "Access-Control-Allow-Headers",
            request
                .header("access-control-request-headers")
                .unwrap_or("Content-Type")
                .to_string(),
        ));
        return write_response(&mut stream, 204, "text/plain", &[], &headers);
    }

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#, &cors),
        ("POST", "/detect-threat/") | ("POST", "/detect-threat") => {
            let (status, body) = detect_threat(&request, state);
            write_response(&mut stream, status, "application/json", &body, &cors)
        }
        (_, "/health") | (_, "/detect-threat/") | (_, "/detect-threat") => write_json_response(
            &mut stream,
            405,
            r#"{"error":"method_not_allowed"}"#,
            &cors,
        ),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#, &cors),
    }
}

fn detect_threat(request: &HttpRequest, state: &mut ServiceState) -> (u16, Vec<u8>) {
    let upload = match uploaded_file(request) {
        Some(upload) => upload,
        None => return (400, NO_FILE.as_bytes().to_vec()),
    };
    log::info!(
        "detect service: received {} ({}, {} bytes)",
        upload.file_name.as_deref().unwrap_or("<unnamed>"),
        upload.content_type.as_deref().unwrap_or("unknown type"),
        upload.data.len()
    );

    let jpeg = match prepare_upload(&upload.data, state.cfg.max_base64_bytes) {
        Ok(jpeg) => jpeg,
        Err(err) => {
            log::error!("detect service: image preparation failed: {:#}", err);
            let body = serde_json::json!({ "error": format!("Internal server error: {:#}", err) });
            return (500, body.to_string().into_bytes());
        }
    };
    let image_b64 = base64::engine::general_purpose::STANDARD.encode(&jpeg);
    let key = cache_key(&image_b64);
    log::info!("detect service: processing image with cache key {}", key);

    let answer = match state.cache.get(&key) {
        Some(answer) => {
            log::debug!("detect service: cache hit {}", key);
            answer
        }
        None => match state.model.analyze(&image_b64) {
            Ok(Some(answer)) => {
                state.cache.insert(key, answer.clone());
                answer
            }
            Ok(None) => return (500, NO_MODEL_RESPONSE.as_bytes().to_vec()),
            Err(err) => {
                log::error!("detect service: upstream request failed: {:#}", err);
                return (500, NO_MODEL_RESPONSE.as_bytes().to_vec());
            }
        },
    };

    let verdict = ThreatVerdict::from_model_text(&answer);
    match serde_json::to_vec(&verdict) {
        Ok(body) => (200, body),
        Err(err) => {
            let body = serde_json::json!({ "error": format!("Internal server error: {}", err) });
            (500, body.to_string().into_bytes())
        }
    }
}

fn uploaded_file(request: &HttpRequest) -> Option<multipart::FormPart> {
    let boundary = multipart::boundary_from_content_type(request.header("content-type")?)?;
    let parts = match multipart::parse(&request.body, &boundary) {
        Ok(parts) => parts,
        Err(err) => {
            log::warn!("detect service: malformed multipart body: {:#}", err);
            return None;
        }
    };
    parts
        .into_iter()
        .find(|part| part.name == UPLOAD_FIELD && !part.data.is_empty())
}

fn cors_headers(request: &HttpRequest, allowed: &[String]) -> Vec<(&'static str, String)> {
    match request.header("origin") {
        Some(origin) if allowed.iter().any(|allowed| allowed == origin) => vec![
            ("Access-Control-Allow-Origin", origin.to_string()),
            ("Access-Control-Allow-Credentials", "true".to_string()),
            ("Vary", "Origin".to_string()),
        ],
        _ => Vec::new(),
    }
}

enum ReadOutcome {
    Request(HttpRequest),
    TooLarge { declared: usize },
}

fn read_request(stream: &mut TcpStream, max_body: usize) -> Result<ReadOutcome> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = find_header_end(&data) {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > max_body {
        return Ok(ReadOutcome::TooLarge {
            declared: content_length,
        });
    }

    let mut body = data.split_off(header_end + 4);
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!(
                "body truncated at {} of {} bytes",
                body.len(),
                content_length
            ));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(ReadOutcome::Request(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    }))
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn write_json_response(
    stream: &mut TcpStream,
    status: u16,
    body: &str,
    extra_headers: &[(&str, String)],
) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes(), extra_headers)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
    extra_headers: &[(&str, String)],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let mut header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    for (name, value) in extra_headers {
        header.push_str(name);
        header.push_str(": ");
        header.push_str(value);
        header.push_str("\r\n");
    }
    header.push_str("\r\n");
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}
