use common::Transport;
use reqwest::Url;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Username/password pair. The password never appears in `Debug` output or serialized form.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Replace the password part of a URL's userinfo with `***`.
pub fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

fn serialize_redacted<S: Serializer>(url: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&redact_url(url))
}

/// One URL hypothesis for a camera's live stream.
///
/// Immutable once built; two candidates are the same candidate when their URL strings match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    #[serde(serialize_with = "serialize_redacted")]
    url: String,
    transport: Transport,
}

impl Candidate {
    pub fn new(url: &Url, transport: Transport) -> Self {
        Self {
            url: url.to_string(),
            transport,
        }
    }

    /// Full URL including any embedded credentials. Do not log; use [`Self::redacted_url`].
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn redacted_url(&self) -> String {
        redact_url(&self.url)
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn parsed(&self) -> Option<Url> {
        Url::parse(&self.url).ok()
    }

    pub fn has_credentials(&self) -> bool {
        self.parsed().is_some_and(|u| !u.username().is_empty())
    }

    /// Decoded credentials embedded in the URL userinfo.
    pub fn credentials(&self) -> Option<Credentials> {
        let url = self.parsed()?;
        if url.username().is_empty() {
            return None;
        }
        let username = urlencoding::decode(url.username()).ok()?.into_owned();
        let password = match url.password() {
            Some(p) => urlencoding::decode(p).ok()?.into_owned(),
            None => String::new(),
        };
        Some(Credentials { username, password })
    }

    /// URL with userinfo stripped, as sent on the wire in request lines.
    pub fn bare_url(&self) -> Option<Url> {
        let mut url = self.parsed()?;
        let _ = url.set_username("");
        let _ = url.set_password(None);
        Some(url)
    }
}

/// Tier and technique of one probe attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProbeType {
    RtspDescribe,
    HttpHead,
    HttpGet,
    DeepDecode,
}

impl ProbeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeType::RtspDescribe => "rtsp_describe",
            ProbeType::HttpHead => "http_head",
            ProbeType::HttpGet => "http_get",
            ProbeType::DeepDecode => "deep_decode",
        }
    }

    pub fn tier(&self) -> u8 {
        match self {
            ProbeType::DeepDecode => 2,
            _ => 1,
        }
    }

    pub fn is_lightweight(&self) -> bool {
        self.tier() == 1
    }
}

/// Outcome of one probe attempt against one candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    /// Redacted candidate URL.
    pub url: String,
    pub transport: Transport,
    pub probe_type: ProbeType,
    pub success: bool,
    pub latency_ms: u64,
    pub requires_auth: bool,
    /// Whether the probed candidate carried credentials.
    pub credentialed: bool,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub diagnostic: String,
}

impl ProbeResult {
    /// Blank failed result for `candidate`; callers fill in what they observed.
    pub fn for_candidate(candidate: &Candidate, probe_type: ProbeType) -> Self {
        Self {
            url: candidate.redacted_url(),
            transport: candidate.transport(),
            probe_type,
            success: false,
            latency_ms: 0,
            requires_auth: false,
            credentialed: candidate.has_credentials(),
            status_code: None,
            content_type: None,
            diagnostic: String::new(),
        }
    }

    /// The endpoint answered at the protocol level.
    pub fn responded(&self) -> bool {
        self.status_code.is_some()
    }

    /// Neither a success nor an authentication challenge.
    pub fn is_inconclusive(&self) -> bool {
        !self.success && !self.requires_auth
    }

    pub fn result_label(&self) -> &'static str {
        if self.success {
            "success"
        } else if self.requires_auth {
            "auth_required"
        } else if self.responded() {
            "inconclusive"
        } else {
            "unreachable"
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbePass {
    Unauthenticated,
    Credentialed,
}

impl ProbePass {
    pub const SEQUENCE: [ProbePass; 2] = [ProbePass::Unauthenticated, ProbePass::Credentialed];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbePass::Unauthenticated => "unauthenticated",
            ProbePass::Credentialed => "credentialed",
        }
    }
}

/// Classification of a whole discovery run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// A candidate was verified; the report carries a winner.
    Verified,
    /// Something answered at the protocol level but nothing was verified.
    Reachable,
    /// The camera challenged for credentials and none were supplied.
    AuthenticationRequired,
    /// Supplied credentials were challenged again.
    CredentialsRejected,
    /// Nothing answered.
    Unreachable,
}

impl ProbeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeOutcome::Verified => "verified",
            ProbeOutcome::Reachable => "reachable",
            ProbeOutcome::AuthenticationRequired => "authentication_required",
            ProbeOutcome::CredentialsRejected => "credentials_rejected",
            ProbeOutcome::Unreachable => "unreachable",
        }
    }
}

/// Input to one discovery run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeRequest {
    /// Bare host, `host:port`, or full URL.
    pub target: String,
    #[serde(default)]
    pub transport: Option<Transport>,
    #[serde(default)]
    pub vendor_hint: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProbeRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_vendor_hint(mut self, hint: impl Into<String>) -> Self {
        self.vendor_hint = Some(hint.into());
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Credentials for the second pass. A username alone is enough; the password may be empty.
    pub fn credentials(&self) -> Option<Credentials> {
        let username = self.username.as_deref().filter(|u| !u.is_empty())?;
        Some(Credentials::new(
            username,
            self.password.clone().unwrap_or_default(),
        ))
    }
}

/// Everything a discovery run observed.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub outcome: ProbeOutcome,
    pub winner: Option<Candidate>,
    pub winning_pass: Option<ProbePass>,
    /// Best lightweight signal when nothing was verified.
    pub fallback: Option<Candidate>,
    pub deep_probe_available: bool,
    pub candidates_tried: usize,
    pub results: Vec<ProbeResult>,
}

impl ProbeReport {
    /// Human-readable explanation distinguishing the conditions callers act on differently.
    pub fn summary(&self) -> String {
        match self.outcome {
            ProbeOutcome::Verified => "stream verified".to_string(),
            ProbeOutcome::AuthenticationRequired => "camera requires credentials".to_string(),
            ProbeOutcome::CredentialsRejected => "camera rejected the supplied credentials".to_string(),
            ProbeOutcome::Reachable if !self.deep_probe_available => {
                "host reachable, no decode-verified stream (deep-probe tool unavailable)".to_string()
            }
            ProbeOutcome::Reachable => "host reachable, no candidate yielded decodable video".to_string(),
            ProbeOutcome::Unreachable => "host unreachable".to_string(),
        }
    }
}
