//! Tier 1 RTSP check: one `DESCRIBE` over a raw socket.
//!
//! The request line carries the candidate URL without userinfo. When the candidate embeds
//! credentials and the camera answers `401`, the challenge is answered once (Basic or
//! MD5 Digest) on the same connection before the attempt is classified.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::debug;

use crate::classify::{detects_auth_challenge, parse_status_line};
use crate::types::{Candidate, Credentials, ProbeResult, ProbeType};

pub const DEFAULT_RTSP_PORT: u16 = 554;
const MAX_RESPONSE_BYTES: usize = 16 * 1024;
const USER_AGENT: &str = concat!("camera-bridge/", env!("CARGO_PKG_VERSION"));

static CHALLENGE_PARAM: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"(\w+)\s*=\s*(?:"([^"]*)"|([^\s,]+))"#).ok());

#[derive(Debug, Error)]
pub enum RtspError {
    #[error("candidate is not a valid rtsp url")]
    InvalidUrl,
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("connection closed without an RTSP status line")]
    NoStatusLine,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
struct RtspResponse {
    status: u16,
    head: String,
    headers: Vec<(String, String)>,
}

impl RtspResponse {
    fn parse(head: String) -> Result<Self, RtspError> {
        let status = parse_status_line(&head).ok_or(RtspError::NoStatusLine)?;
        let headers = head
            .lines()
            .skip(1)
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        Ok(Self {
            status,
            head,
            headers,
        })
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn status_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default().trim()
    }

    fn requires_auth(&self) -> bool {
        self.status == 401
            || self.header("www-authenticate").is_some()
            || detects_auth_challenge(&self.head)
    }
}

/// A `WWW-Authenticate` challenge; RTSP and HTTP cameras use the same grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Challenge {
    Basic,
    Digest {
        realm: String,
        nonce: String,
        qop: Option<String>,
        opaque: Option<String>,
    },
}

impl Challenge {
    fn parse(value: &str) -> Option<Self> {
        let (scheme, params) = value
            .trim()
            .split_once(char::is_whitespace)
            .unwrap_or((value.trim(), ""));
        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Challenge::Basic);
        }
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }

        let re = CHALLENGE_PARAM.as_ref()?;
        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut opaque = None;
        for caps in re.captures_iter(params) {
            let key = caps.get(1).map(|m| m.as_str().to_ascii_lowercase());
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string());
            match (key.as_deref(), value) {
                (Some("realm"), v) => realm = v,
                (Some("nonce"), v) => nonce = v,
                (Some("qop"), v) => qop = v,
                (Some("opaque"), v) => opaque = v,
                _ => {}
            }
        }
        Some(Challenge::Digest {
            realm: realm.unwrap_or_default(),
            nonce: nonce?,
            qop: qop.filter(|q| q.split(',').any(|o| o.trim() == "auth")),
            opaque,
        })
    }

    pub(crate) fn is_digest(&self) -> bool {
        matches!(self, Challenge::Digest { .. })
    }

    /// Pick the strongest scheme the camera offered.
    pub(crate) fn select<'a>(values: impl Iterator<Item = &'a str>) -> Option<Self> {
        let mut basic = None;
        for value in values {
            match Challenge::parse(value) {
                Some(digest @ Challenge::Digest { .. }) => return Some(digest),
                Some(Challenge::Basic) => basic = Some(Challenge::Basic),
                None => {}
            }
        }
        basic
    }

    pub(crate) fn authorization(&self, creds: &Credentials, method: &str, uri: &str) -> String {
        match self {
            Challenge::Basic => {
                let token = STANDARD.encode(format!("{}:{}", creds.username, creds.password));
                format!("Basic {token}")
            }
            Challenge::Digest {
                realm,
                nonce,
                qop,
                opaque,
            } => {
                let ha1 = md5_hex(&format!("{}:{}:{}", creds.username, realm, creds.password));
                let ha2 = md5_hex(&format!("{method}:{uri}"));
                let mut header = format!(
                    "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
                    creds.username, realm, nonce, uri
                );
                match qop {
                    Some(_) => {
                        let cnonce = client_nonce();
                        let nc = "00000001";
                        let response =
                            md5_hex(&format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}"));
                        header.push_str(&format!(
                            ", qop=auth, nc={nc}, cnonce=\"{cnonce}\", response=\"{response}\""
                        ));
                    }
                    None => {
                        let response = md5_hex(&format!("{ha1}:{nonce}:{ha2}"));
                        header.push_str(&format!(", response=\"{response}\""));
                    }
                }
                if let Some(opaque) = opaque {
                    header.push_str(&format!(", opaque=\"{opaque}\""));
                }
                header.push_str(", algorithm=MD5");
                header
            }
        }
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

fn client_nonce() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{:016x}", nanos as u64)
}

fn describe_request(uri: &str, cseq: u32, authorization: Option<&str>) -> String {
    let mut request = format!(
        "DESCRIBE {uri} RTSP/1.0\r\nCSeq: {cseq}\r\nAccept: application/sdp\r\nUser-Agent: {USER_AGENT}\r\n"
    );
    if let Some(auth) = authorization {
        request.push_str(&format!("Authorization: {auth}\r\n"));
    }
    request.push_str("\r\n");
    request
}

/// Reads one response head, then discards its body so the connection can be reused.
async fn read_response(stream: &mut TcpStream) -> Result<RtspResponse, RtspError> {
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 2048];
    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break Some(pos + 4);
        }
        if buf.len() >= MAX_RESPONSE_BYTES {
            break None;
        }
    };

    let head_len = head_end.unwrap_or(buf.len());
    let response = RtspResponse::parse(String::from_utf8_lossy(&buf[..head_len]).into_owned())?;

    if head_end.is_some() {
        let mut remaining = response
            .content_length()
            .min(MAX_RESPONSE_BYTES)
            .saturating_sub(buf.len() - head_len);
        while remaining > 0 {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            remaining = remaining.saturating_sub(n);
        }
    }
    Ok(response)
}

async fn connect(addr: &str) -> Result<TcpStream, RtspError> {
    TcpStream::connect(addr)
        .await
        .map_err(|source| RtspError::Connect {
            addr: addr.to_string(),
            source,
        })
}

async fn exchange(
    stream: &mut TcpStream,
    uri: &str,
    cseq: u32,
    authorization: Option<&str>,
) -> Result<RtspResponse, RtspError> {
    stream
        .write_all(describe_request(uri, cseq, authorization).as_bytes())
        .await?;
    read_response(stream).await
}

async fn describe(
    addr: &str,
    uri: &str,
    credentials: Option<&Credentials>,
) -> Result<RtspResponse, RtspError> {
    let mut stream = connect(addr).await?;
    let first = exchange(&mut stream, uri, 1, None).await?;

    let Some(creds) = credentials else {
        return Ok(first);
    };
    if first.status != 401 {
        return Ok(first);
    }
    let Some(challenge) = Challenge::select(first.headers_named("www-authenticate")) else {
        return Ok(first);
    };

    let authorization = challenge.authorization(creds, "DESCRIBE", uri);
    match exchange(&mut stream, uri, 2, Some(&authorization)).await {
        Ok(response) => Ok(response),
        Err(RtspError::Io(_)) | Err(RtspError::NoStatusLine) => {
            // camera closed the connection after the challenge
            let mut stream = connect(addr).await?;
            exchange(&mut stream, uri, 2, Some(&authorization)).await
        }
        Err(other) => Err(other),
    }
}

/// Probe `candidate` with an RTSP `DESCRIBE`, bounded by `timeout` including any retry.
pub async fn probe_describe(candidate: &Candidate, timeout: Duration) -> ProbeResult {
    let mut result = ProbeResult::for_candidate(candidate, ProbeType::RtspDescribe);
    let started = Instant::now();

    let target = candidate.bare_url().and_then(|url| {
        let host = url.host_str()?.to_string();
        let port = url.port().unwrap_or(DEFAULT_RTSP_PORT);
        Some((format!("{host}:{port}"), url.to_string()))
    });
    let Some((addr, uri)) = target else {
        result.diagnostic = RtspError::InvalidUrl.to_string();
        return result;
    };
    let credentials = candidate.credentials();

    let outcome = match tokio::time::timeout(timeout, describe(&addr, &uri, credentials.as_ref()))
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(RtspError::Timeout(timeout)),
    };
    result.latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(response) => {
            result.status_code = Some(response.status);
            result.content_type = response.header("content-type").map(str::to_string);
            result.success = (200..300).contains(&response.status);
            result.requires_auth = !result.success && response.requires_auth();
            result.diagnostic = response.status_line().to_string();
        }
        Err(err) => {
            result.diagnostic = err.to_string();
        }
    }

    debug!(
        url = %result.url,
        status = ?result.status_code,
        success = result.success,
        requires_auth = result.requires_auth,
        latency_ms = result.latency_ms,
        "rtsp describe finished"
    );
    result
}
