//! Text classifiers shared by the probe tiers.
//!
//! Vendor firmware and the deep-probe tool report credential problems in free text. The
//! patterns live here, and only here, so they can be tuned per vendor without touching the
//! prober or the scheduler.

use once_cell::sync::Lazy;
use regex::Regex;

/// Patterns that mean "the endpoint wants (other) credentials":
///
/// * a `401` status on an RTSP/HTTP status line or in a tool's "Server returned 401" message
/// * the words unauthorized/unauthorised
/// * a `WWW-Authenticate` header
/// * "authentication failed/required", "authorization failed"
/// * "invalid username/password/credentials"
static AUTH_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(?:RTSP|HTTP)/\d\.\d\s+401\b",
        r"(?i)returned\s+401\b",
        r"(?i)\bunauthori[sz]ed\b",
        r"(?im)^www-authenticate\s*:",
        r"(?i)authentication\s+(?:failed|required)",
        r"(?i)authori[sz]ation\s+failed",
        r"(?i)invalid\s+(?:user\s?name|password|credentials)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static STATUS_LINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?m)^(?:RTSP|HTTP)/\d\.\d\s+(\d{3})\b").ok());

/// Decode progress emitted by the deep-probe tool (`-progress` key/value output).
static PROGRESS_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^frame=\s*[1-9]\d*\s*$",
        r"^out_time_(?:us|ms)=\s*[1-9]\d*\s*$",
        r"^progress=end\s*$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Whether `text` reports a credential challenge or rejection.
pub fn detects_auth_challenge(text: &str) -> bool {
    AUTH_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Status code from the first RTSP/HTTP status line in `text`.
pub fn parse_status_line(text: &str) -> Option<u16> {
    STATUS_LINE
        .as_ref()?
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Whether one line of tool output shows frames actually being decoded.
pub fn is_progress_marker(line: &str) -> bool {
    let line = line.trim();
    PROGRESS_MARKERS.iter().any(|re| re.is_match(line))
}

/// Progress bookkeeping lines that are noise in diagnostics.
pub fn is_progress_line(line: &str) -> bool {
    let line = line.trim();
    match line.split_once('=') {
        Some((key, _)) => matches!(
            key,
            "frame" | "fps" | "bitrate" | "total_size" | "out_time_us" | "out_time_ms"
                | "out_time" | "dup_frames" | "drop_frames" | "speed" | "progress"
        ) || key.starts_with("stream_"),
        None => false,
    }
}

/// Content types that a 200 answer must carry to count as a stream.
/// A missing content type is accepted; plenty of cameras omit it.
pub fn is_media_content_type(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return true;
    };
    let ct = ct.trim().to_ascii_lowercase();
    ct.starts_with("multipart/x-mixed-replace")
        || ct.starts_with("image/")
        || ct.starts_with("video/")
        || ct.starts_with("application/octet-stream")
        || ct.starts_with("application/sdp")
}
