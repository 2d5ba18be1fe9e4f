//! HTTP Upgrade Handshake
//!
//! Request construction and 101 validation for the client side, request
//! parsing and the 101 response for the server side. No I/O happens here.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use url::{Host, Url};

use crate::shared::error::HandshakeError;

/// RFC 6455 magic GUID appended to the client key.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound for an HTTP upgrade request or response head.
pub const MAX_HEADER_SIZE: usize = 8192;

/// Base64(SHA-1(key + GUID))
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Random 16-byte nonce, Base64 encoded.
pub fn generate_client_key() -> String {
    let nonce: [u8; 16] = rand::random();
    STANDARD.encode(nonce)
}

/// Parsed `ws://` / `wss://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    pub host: String,
    pub port: u16,
    /// Path including any query string, always starting with `/`.
    pub path: String,
    pub secure: bool,
}

impl WsUrl {
    pub fn parse(raw: &str) -> Result<Self, HandshakeError> {
        let url = Url::parse(raw.trim())
            .map_err(|err| HandshakeError::InvalidUrl(format!("{raw}: {err}")))?;

        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            other => return Err(HandshakeError::InvalidUrl(format!("unsupported scheme: {other}"))),
        };

        // Host::Ipv6 displays without brackets; host_header() adds them back
        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(HandshakeError::InvalidUrl("empty host".into())),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| HandshakeError::InvalidUrl(format!("no port for {raw}")))?;

        let mut path = match url.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            host,
            port,
            path,
            secure,
        })
    }

    /// `Host` header value; the port is included only when non-default.
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

/// Status line plus headers of an HTTP/1.1 message head.
#[derive(Debug, Clone)]
pub struct HttpHead {
    pub start_line: String,
    pub headers: Vec<(String, String)>,
}

impl HttpHead {
    /// Parse a head terminated by an empty line (the terminator is optional).
    pub fn parse(raw: &str) -> Result<Self, HandshakeError> {
        let mut lines = raw.split("\r\n");
        let start_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| HandshakeError::Malformed("empty message".into()))?
            .to_string();

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HandshakeError::Malformed(format!("bad header line: {line}")))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self { start_line, headers })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// True when a comma-separated header contains `token` (case-insensitive).
    fn header_has_token(&self, name: &str, token: &str) -> bool {
        self.header(name)
            .map(|value| value.split(',').any(|part| part.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    }
}

/// Client half of the upgrade.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    key: String,
    request: String,
}

impl ClientHandshake {
    pub fn new(url: &WsUrl, protocols: &[String], extra_headers: &[(String, String)]) -> Self {
        Self::with_key(url, protocols, extra_headers, generate_client_key())
    }

    /// Build with a fixed key.
    pub fn with_key(
        url: &WsUrl,
        protocols: &[String],
        extra_headers: &[(String, String)],
        key: String,
    ) -> Self {
        let mut request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n",
            url.path,
            url.host_header(),
            key
        );
        if !protocols.is_empty() {
            request.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", protocols.join(", ")));
        }
        for (name, value) in extra_headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        request.push_str("\r\n");

        Self { key, request }
    }

    pub fn request_bytes(&self) -> &[u8] {
        self.request.as_bytes()
    }

    /// Check the server's response head. Returns the parsed head on success.
    pub fn validate_response(&self, raw: &str) -> Result<HttpHead, HandshakeError> {
        let head = HttpHead::parse(raw)?;

        let mut parts = head.start_line.split_whitespace();
        let version = parts.next().unwrap_or_default();
        let status = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") || status != "101" {
            return Err(HandshakeError::NotSwitchingProtocols(head.start_line.clone()));
        }

        let accept = head
            .header("Sec-WebSocket-Accept")
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Accept"))?;
        let expected = compute_accept_key(&self.key);
        if accept != expected {
            return Err(HandshakeError::AcceptMismatch {
                expected,
                actual: accept.to_string(),
            });
        }

        Ok(head)
    }
}

/// A validated client upgrade request.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub path: String,
    pub key: String,
    pub protocols: Vec<String>,
    pub head: HttpHead,
}

impl UpgradeRequest {
    /// Parse and validate a client's upgrade request head.
    pub fn parse(raw: &str) -> Result<Self, HandshakeError> {
        let head = HttpHead::parse(raw)?;

        let mut parts = head.start_line.split_whitespace();
        let method = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();
        if method != "GET" || path.is_empty() {
            return Err(HandshakeError::Malformed(format!(
                "expected GET request, got: {}",
                head.start_line
            )));
        }

        if !head.header_has_token("Upgrade", "websocket") {
            return Err(HandshakeError::MissingHeader("Upgrade"));
        }

        if let Some(version) = head.header("Sec-WebSocket-Version") {
            if version != "13" {
                return Err(HandshakeError::UnsupportedVersion(version.to_string()));
            }
        }

        let key = head
            .header("Sec-WebSocket-Key")
            .filter(|key| !key.is_empty())
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?
            .to_string();

        let protocols = head
            .header("Sec-WebSocket-Protocol")
            .map(|value| {
                value
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            path: path.to_string(),
            key,
            protocols,
            head,
        })
    }

    /// First requested sub-protocol that the server supports.
    pub fn select_protocol(&self, supported: &[String]) -> Option<String> {
        self.protocols
            .iter()
            .find(|requested| supported.iter().any(|s| s == *requested))
            .cloned()
    }

    /// The 101 response for this request.
    pub fn accept_response(&self, protocol: Option<&str>) -> String {
        let mut response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n",
            compute_accept_key(&self.key)
        );
        if let Some(protocol) = protocol {
            response.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
        }
        response.push_str("\r\n");
        response
    }
}

/// Minimal error response for a rejected upgrade.
pub fn reject_response(status: u16, reason: &str) -> String {
    format!("HTTP/1.1 {status} {reason}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n")
}

/// Position just past the `\r\n\r\n` terminator, if present.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}
