//! Minimal HTTP front end for the detector.
//!
//! One worker thread owns the [`WeaponDetector`] and serves connections
//! sequentially from a non-blocking listener until [`ApiHandle::stop`].

mod payload;

pub use payload::{decode_image_payload, encode_data_url, mime_for_path};

use anyhow::{anyhow, Result};
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::detect::DetectionResult;
use crate::detector::WeaponDetector;

const MAX_HEAD_BYTES: usize = 8192;
const MAX_DRAIN_BYTES: usize = 64 * 1024 * 1024;
const UNKNOWN_BODY_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);
const NO_IMAGE: &str = "No image data provided";

const INDEX_HTML: &str = "<!doctype html>\n<html><head><title>weapon detector</title></head>\n<body><h1>weapon detector</h1>\n<p>POST <code>/detect</code> with <code>{\"image\": \"data:image/jpeg;base64,...\"}</code>.</p>\n<p>GET <code>/health</code> for liveness.</p></body></html>\n";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_request_bytes: usize,
    pub read_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5001".to_string(),
            max_request_bytes: 16 * 1024 * 1024,
            read_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
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

pub struct ApiServer {
    cfg: ApiConfig,
    detector: WeaponDetector,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, detector: WeaponDetector) -> Self {
        Self { cfg, detector }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;
        log::info!(
            "detection api listening on http://{} ({} backend)",
            addr,
            self.detector.backend_name()
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let mut detector = self.detector;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &cfg, &mut detector, shutdown_thread) {
                log::error!("detection api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: &ApiConfig,
    detector: &mut WeaponDetector,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = handle_connection(stream, detector, cfg) {
                    log::warn!("request from {} failed: {}", peer, err);
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

fn handle_connection(
    mut stream: TcpStream,
    detector: &mut WeaponDetector,
    cfg: &ApiConfig,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(cfg.read_timeout))?;

    let mut request = match read_head(&mut stream) {
        Ok(request) => request,
        Err(err) => return reject_early(&mut stream, malformed(err), None),
    };
    let declared = match request.content_length() {
        Ok(declared) => declared,
        Err(err) => return reject_early(&mut stream, malformed(err), None),
    };
    if declared > cfg.max_request_bytes {
        log::warn!(
            "rejecting {} byte body (limit {})",
            declared,
            cfg.max_request_bytes
        );
        let body = json!({
            "detected": false,
            "message": format!("request body exceeds {} bytes", cfg.max_request_bytes),
        });
        let pending = declared.saturating_sub(request.body.len());
        return reject_early(&mut stream, Response::json(413, &body), Some(pending));
    }
    if request.body.len() < declared && request.expects_continue() {
        stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
        stream.flush()?;
    }
    read_body(&mut stream, &mut request.body, declared)?;

    let response = route(&request, detector);
    log::debug!("{} {} -> {}", request.method, request.path, response.status);
    response.write_to(&mut stream)
}

fn malformed(err: anyhow::Error) -> Response {
    ApiError::BadRequest(format!("malformed request: {}", err)).into_response()
}

/// Answer before the body has been read, then consume what the client is
/// still sending so closing the socket does not reset the connection and
/// discard the response. `pending` is the unread body length, if known.
fn reject_early(stream: &mut TcpStream, response: Response, pending: Option<usize>) -> Result<()> {
    response.write_to(stream)?;
    stream.shutdown(Shutdown::Write)?;

    let budget = match pending {
        Some(pending) => pending.min(MAX_DRAIN_BYTES),
        None => {
            stream.set_read_timeout(Some(UNKNOWN_BODY_DRAIN_TIMEOUT))?;
            MAX_DRAIN_BYTES
        }
    };
    let mut buf = [0u8; 16 * 1024];
    let mut drained = 0usize;
    while drained < budget {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => drained += n,
        }
    }
    log::debug!("drained {} unread request bytes", drained);
    Ok(())
}

fn route(request: &HttpRequest, detector: &mut WeaponDetector) -> Response {
    if request.method == "OPTIONS" {
        return Response::empty(204);
    }
    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/detect") => match detect(detector, &request.body) {
            Ok(result) => match serde_json::to_vec(&result) {
                Ok(body) => Response::new(200, "application/json", body),
                Err(err) => ApiError::Server(err.into()).into_response(),
            },
            Err(err) => err.into_response(),
        },
        ("GET", "/health") => Response::json(200, &json!({"status": "ok"})),
        ("GET", "/") => Response::new(200, "text/html; charset=utf-8", INDEX_HTML.into()),
        (_, "/detect" | "/health" | "/") => {
            Response::json(405, &json!({"error": "method_not_allowed"}))
        }
        _ => Response::json(404, &json!({"error": "not_found"})),
    }
}

fn detect(detector: &mut WeaponDetector, body: &[u8]) -> Result<DetectionResult, ApiError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ApiError::BadRequest(NO_IMAGE.to_string()));
    }
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|err| ApiError::BadRequest(format!("invalid JSON body: {}", err)))?;
    let image = match value.get("image") {
        None | Some(serde_json::Value::Null) => {
            return Err(ApiError::BadRequest(NO_IMAGE.to_string()))
        }
        Some(serde_json::Value::String(image)) => image,
        Some(_) => {
            return Err(ApiError::BadRequest(
                "image must be a base64 string".to_string(),
            ))
        }
    };
    let bytes = decode_image_payload(image).map_err(ApiError::Server)?;
    detector.detect_bytes(&bytes).map_err(ApiError::Server)
}

/// Failure classes surfaced to clients.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Server(anyhow::Error),
}

impl ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => {
                log::warn!("bad detect request: {}", message);
                (400, message)
            }
            ApiError::Server(err) => {
                log::error!("error processing request: {:#}", err);
                (500, format!("Server error: {:#}", err))
            }
        };
        Response::json(status, &json!({"detected": false, "message": message}))
    }
}

struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn new(status: u16, content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body,
        }
    }

    fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, "application/json", value.to_string().into_bytes())
    }

    fn empty(status: u16) -> Self {
        Self::new(status, "text/plain", Vec::new())
    }

    fn write_to(&self, stream: &mut TcpStream) -> Result<()> {
        write_response(stream, self.status, self.content_type, &self.body)
    }
}

fn read_head(stream: &mut TcpStream) -> Result<HttpRequest> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let head_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request head"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEAD_BYTES {
            return Err(anyhow!("request head too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..head_end]);
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
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_ascii_uppercase(),
        path,
        headers,
        body: data[head_end + 4..].to_vec(),
    })
}

fn read_body(stream: &mut TcpStream, body: &mut Vec<u8>, declared: usize) -> Result<()> {
    let mut buf = [0u8; 16 * 1024];
    while body.len() < declared {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!(
                "body truncated at {} of {} bytes",
                body.len(),
                declared
            ));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(declared);
    Ok(())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
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
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
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
    fn content_length(&self) -> Result<usize> {
        match self.headers.get("content-length") {
            Some(value) => value
                .parse()
                .map_err(|_| anyhow!("invalid content-length '{}'", value)),
            None => Ok(self.body.len()),
        }
    }

    fn expects_continue(&self) -> bool {
        self.headers
            .get("expect")
            .is_some_and(|value| value.eq_ignore_ascii_case("100-continue"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;

    fn request(method: &str, path: &str, body: &str) -> HttpRequest {
        HttpRequest {
            method: method.to_string(),
            path: path.to_string(),
            headers: HashMap::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    fn message(response: &Response) -> String {
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        value["message"].as_str().unwrap_or_default().to_string()
    }

    #[test]
    fn missing_image_is_bad_request() {
        let mut detector = WeaponDetector::new(StubBackend::new());
        for body in ["", "{}", r#"{"image": null}"#, r#"{"other": "x"}"#] {
            let response = route(&request("POST", "/detect", body), &mut detector);
            assert_eq!(response.status, 400, "body {:?}", body);
            assert_eq!(message(&response), NO_IMAGE);
        }
    }

    #[test]
    fn malformed_json_and_wrong_type_are_bad_requests() {
        let mut detector = WeaponDetector::new(StubBackend::new());
        let response = route(&request("POST", "/detect", "{not json"), &mut detector);
        assert_eq!(response.status, 400);
        assert!(message(&response).starts_with("invalid JSON body"));

        let response = route(&request("POST", "/detect", r#"{"image": 5}"#), &mut detector);
        assert_eq!(response.status, 400);
    }

    #[test]
    fn undecodable_image_is_server_error() {
        let mut detector = WeaponDetector::new(StubBackend::new());
        let body = json!({"image": encode_data_url(b"not an image", "image/jpeg")}).to_string();
        let response = route(&request("POST", "/detect", &body), &mut detector);
        assert_eq!(response.status, 500);
        assert!(message(&response).starts_with("Server error: "));
    }

    #[test]
    fn method_and_path_routing() {
        let mut detector = WeaponDetector::new(StubBackend::new());
        assert_eq!(route(&request("GET", "/detect", ""), &mut detector).status, 405);
        assert_eq!(route(&request("GET", "/missing", ""), &mut detector).status, 404);
        assert_eq!(route(&request("OPTIONS", "/detect", ""), &mut detector).status, 204);
        assert_eq!(route(&request("GET", "/", ""), &mut detector).status, 200);
    }

    #[test]
    fn content_length_header_wins() {
        let mut req = request("POST", "/detect", "");
        assert_eq!(req.content_length().unwrap(), 0);
        req.headers
            .insert("content-length".to_string(), "42".to_string());
        assert_eq!(req.content_length().unwrap(), 42);
        req.headers
            .insert("content-length".to_string(), "lots".to_string());
        assert!(req.content_length().is_err());
    }
}
