use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Distribution format a running ingest session is published as.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackTarget {
  Webrtc,
  Hls,
}

impl PlaybackTarget {
  pub const ALL: [PlaybackTarget; 2] = [PlaybackTarget::Webrtc, PlaybackTarget::Hls];

  pub fn as_str(&self) -> &'static str {
    match self {
      PlaybackTarget::Webrtc => "webrtc",
      PlaybackTarget::Hls => "hls",
    }
  }
}

impl fmt::Display for PlaybackTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for PlaybackTarget {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "webrtc" => Ok(PlaybackTarget::Webrtc),
      "hls" => Ok(PlaybackTarget::Hls),
      _ => Err(format!("unknown playback target '{s}'")),
    }
  }
}

/// Sorted, de-duplicated target set. An empty or missing request means every target.
pub fn normalize_targets(requested: Option<&[PlaybackTarget]>) -> Vec<PlaybackTarget> {
  let mut targets: Vec<PlaybackTarget> = match requested {
    Some(list) if !list.is_empty() => list.to_vec(),
    _ => PlaybackTarget::ALL.to_vec(),
  };
  targets.sort();
  targets.dedup();
  targets
}
