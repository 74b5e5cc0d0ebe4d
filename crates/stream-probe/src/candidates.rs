use common::Transport;
use reqwest::Url;
use std::collections::HashSet;
use thiserror::Error;

use crate::types::{Candidate, Credentials};

/// Upper bound on candidates per pass.
pub const MAX_CANDIDATES: usize = 40;

/// MJPEG and snapshot paths tried on a bare HTTP host.
const HTTP_SUFFIXES: &[(&str, Transport)] = &[
    ("/video.mjpg", Transport::HttpMjpeg),
    ("/mjpg/video.mjpg", Transport::HttpMjpeg),
    ("/video.cgi", Transport::HttpMjpeg),
    ("/videostream.cgi", Transport::HttpMjpeg),
    ("/stream.mjpg", Transport::HttpMjpeg),
    ("/mjpeg", Transport::HttpMjpeg),
    ("/video", Transport::HttpMjpeg),
    ("/axis-cgi/mjpg/video.cgi", Transport::HttpMjpeg),
    ("/cgi-bin/mjpg/video.cgi", Transport::HttpMjpeg),
    ("/nphMotionJpeg?Resolution=640x480&Quality=Standard", Transport::HttpMjpeg),
    ("/snapshot.jpg", Transport::HttpSnapshot),
    ("/snapshot.cgi", Transport::HttpSnapshot),
    ("/image.jpg", Transport::HttpSnapshot),
    ("/jpg/image.jpg", Transport::HttpSnapshot),
    ("/cgi-bin/snapshot.cgi", Transport::HttpSnapshot),
    ("/axis-cgi/jpg/image.cgi", Transport::HttpSnapshot),
    ("/ISAPI/Streaming/channels/101/picture", Transport::HttpSnapshot),
    ("/tmpfs/auto.jpg", Transport::HttpSnapshot),
];

/// Common RTSP stream paths.
const RTSP_SUFFIXES: &[&str] = &[
    "/stream1",
    "/stream2",
    "/live",
    "/live.sdp",
    "/h264",
    "/h264_stream",
    "/Streaming/Channels/1",
    "/Streaming/Channels/101",
    "/Streaming/Channels/102",
    "/cam/realmonitor?channel=1&subtype=0",
    "/cam/realmonitor?channel=1&subtype=1",
    "/onvif1",
    "/onvif/profile1/media.smp",
    "/MediaInput/h264",
    "/axis-media/media.amp",
    "/h264Preview_01_main",
    "/h264Preview_01_sub",
    "/videoMain",
    "/live/main",
    "/media/video1",
    "/ch01.264",
    "/0",
    "/1",
];

/// Paths used by OEM firmware on HiSilicon/XiongMai based boards.
const CHIPSET_RTSP_SUFFIXES: &[&str] = &[
    "/11",
    "/12",
    "/live/ch00_0",
    "/live/ch00_1",
    "/av0_0",
    "/av0_1",
    "/ch0_0.h264",
    "/user=admin&password=&channel=1&stream=0.sdp?",
];

/// Vendor name → URL substrings that identify its path conventions.
///
/// Ordering policy only: matching candidates move to the front of the list.
const VENDOR_HINTS: &[(&str, &[&str])] = &[
    ("hikvision", &["Streaming/Channels", "ISAPI"]),
    ("dahua", &["cam/realmonitor", "cgi-bin/mjpg", "cgi-bin/snapshot"]),
    ("amcrest", &["cam/realmonitor", "cgi-bin/mjpg", "cgi-bin/snapshot"]),
    ("axis", &["axis-media", "axis-cgi", "mjpg/video.mjpg", "jpg/image.jpg"]),
    ("reolink", &["h264Preview"]),
    ("tapo", &["/stream1", "/stream2"]),
    ("tp-link", &["/stream1", "/stream2"]),
    ("foscam", &["videoMain", "videostream.cgi", "snapshot.cgi"]),
    ("hanwha", &["profile1/media.smp"]),
    ("samsung", &["profile1/media.smp"]),
    ("panasonic", &["nphMotionJpeg", "MediaInput"]),
    ("xiongmai", &["/11", "/12", "user=admin", "tmpfs", "ch00_"]),
    ("hisilicon", &["/11", "/12", "user=admin", "tmpfs", "ch00_", "av0_"]),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CandidateError {
    #[error("target is empty")]
    EmptyTarget,
    #[error("invalid target '{0}'")]
    InvalidTarget(String),
    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),
}

/// Expands a bare host or URL into an ordered, de-duplicated candidate list.
#[derive(Debug, Clone)]
pub struct CandidateGenerator {
    max_candidates: usize,
}

impl Default for CandidateGenerator {
    fn default() -> Self {
        Self::new(MAX_CANDIDATES)
    }
}

impl CandidateGenerator {
    pub fn new(max_candidates: usize) -> Self {
        Self {
            max_candidates: max_candidates.clamp(1, MAX_CANDIDATES),
        }
    }

    pub fn max_candidates(&self) -> usize {
        self.max_candidates
    }

    /// First expansion pass.
    ///
    /// A URL with a non-root path is returned alone. A root HTTP URL gets the MJPEG/snapshot
    /// table, a root RTSP URL the common and chipset tables.
    pub fn generate(
        &self,
        target: &str,
        transport_hint: Option<Transport>,
        vendor_hint: Option<&str>,
    ) -> Result<Vec<Candidate>, CandidateError> {
        let seed = parse_target(target, transport_hint)?;
        let seed_transport = transport_for(&seed, transport_hint);
        let mut list = CandidateList::new(self.max_candidates);

        if !is_root(&seed) {
            list.push(Candidate::new(&seed, seed_transport));
            return Ok(list.into_vec());
        }

        let mut generated = vec![Candidate::new(&seed, seed_transport)];
        if seed_transport == Transport::Rtsp {
            for suffix in RTSP_SUFFIXES.iter().chain(CHIPSET_RTSP_SUFFIXES) {
                if let Some(url) = with_suffix(&seed, suffix) {
                    generated.push(Candidate::new(&url, Transport::Rtsp));
                }
            }
        } else {
            for (suffix, transport) in HTTP_SUFFIXES {
                if let Some(url) = with_suffix(&seed, suffix) {
                    generated.push(Candidate::new(&url, *transport));
                }
            }
        }

        if let Some(vendor) = vendor_hint {
            prioritize_vendor(&mut generated, vendor);
        }

        for candidate in generated {
            list.push(candidate);
        }
        Ok(list.into_vec())
    }

    /// Second expansion pass: embed `credentials` into every candidate that has none,
    /// skipping URLs already in `tried`.
    pub fn with_credentials(
        &self,
        candidates: &[Candidate],
        credentials: &Credentials,
        tried: &HashSet<String>,
    ) -> Vec<Candidate> {
        let mut list = CandidateList::new(self.max_candidates);
        for candidate in candidates {
            if candidate.has_credentials() {
                continue;
            }
            let Some(mut url) = candidate.parsed() else {
                continue;
            };
            if url.set_username(&credentials.username).is_err() {
                continue;
            }
            if url.set_password(Some(&credentials.password)).is_err() {
                continue;
            }
            if tried.contains(url.as_str()) {
                continue;
            }
            list.push(Candidate::new(&url, candidate.transport()));
        }
        list.into_vec()
    }
}

/// Ordered set of candidates keyed by exact URL string, capped at a maximum length.
struct CandidateList {
    seen: HashSet<String>,
    items: Vec<Candidate>,
    cap: usize,
}

impl CandidateList {
    fn new(cap: usize) -> Self {
        Self {
            seen: HashSet::new(),
            items: Vec::new(),
            cap,
        }
    }

    fn push(&mut self, candidate: Candidate) {
        if self.items.len() >= self.cap {
            return;
        }
        if self.seen.insert(candidate.url().to_string()) {
            self.items.push(candidate);
        }
    }

    fn into_vec(self) -> Vec<Candidate> {
        self.items
    }
}

fn parse_target(target: &str, transport_hint: Option<Transport>) -> Result<Url, CandidateError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(CandidateError::EmptyTarget);
    }

    let with_scheme = if target.contains("://") {
        target.to_string()
    } else {
        let scheme = transport_hint
            .unwrap_or(Transport::Rtsp)
            .default_scheme();
        format!("{scheme}://{target}")
    };

    let url = Url::parse(&with_scheme)
        .map_err(|_| CandidateError::InvalidTarget(target.to_string()))?;
    match url.scheme() {
        "rtsp" | "rtsps" | "http" | "https" => {}
        other => return Err(CandidateError::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(CandidateError::InvalidTarget(target.to_string()));
    }
    Ok(url)
}

fn transport_for(url: &Url, hint: Option<Transport>) -> Transport {
    if url.scheme().starts_with("rtsp") {
        return Transport::Rtsp;
    }
    if hint == Some(Transport::HttpSnapshot) || looks_like_snapshot(url) {
        Transport::HttpSnapshot
    } else {
        Transport::HttpMjpeg
    }
}

fn looks_like_snapshot(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    path.contains("snapshot")
        || path.contains("picture")
        || path.ends_with(".jpg")
        || path.ends_with(".jpeg")
        || path.ends_with("/image.cgi")
}

fn is_root(url: &Url) -> bool {
    (url.path().is_empty() || url.path() == "/") && url.query().is_none()
}

fn with_suffix(base: &Url, suffix: &str) -> Option<Url> {
    let mut url = base.clone();
    let (path, query) = match suffix.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (suffix, None),
    };
    url.set_path(path);
    url.set_query(query);
    url.set_fragment(None);
    Some(url)
}

/// Stable partition: candidates whose URL contains one of the vendor's substrings first.
fn prioritize_vendor(candidates: &mut Vec<Candidate>, vendor: &str) {
    let vendor = vendor.trim().to_ascii_lowercase();
    let Some((_, needles)) = VENDOR_HINTS
        .iter()
        .find(|(name, _)| vendor.contains(name))
    else {
        return;
    };

    let (mut preferred, rest): (Vec<Candidate>, Vec<Candidate>) = candidates
        .drain(..)
        .partition(|c| {
            let url = c.url().to_ascii_lowercase();
            needles.iter().any(|n| url.contains(&n.to_ascii_lowercase()))
        });
    preferred.extend(rest);
    *candidates = preferred;
}
