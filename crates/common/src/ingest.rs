use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::playback::PlaybackTarget;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
  #[default]
  Idle,
  Starting,
  Running,
  Stopping,
  Error,
}

impl IngestState {
  pub fn as_str(&self) -> &'static str {
    match self {
      IngestState::Idle => "idle",
      IngestState::Starting => "starting",
      IngestState::Running => "running",
      IngestState::Stopping => "stopping",
      IngestState::Error => "error",
    }
  }

  pub fn is_active(&self) -> bool {
    matches!(self, IngestState::Starting | IngestState::Running)
  }
}

impl fmt::Display for IngestState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for IngestState {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "idle" => Ok(IngestState::Idle),
      "starting" => Ok(IngestState::Starting),
      "running" => Ok(IngestState::Running),
      "stopping" => Ok(IngestState::Stopping),
      "error" => Ok(IngestState::Error),
      _ => Err(format!("unknown ingest state '{s}'")),
    }
  }
}

/// Body sent to the ingest worker to open a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestStartRequest {
  pub device_id: String,
  pub source_url: String,
  pub profile: String,
  pub targets: Vec<PlaybackTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestStopRequest {
  pub device_id: String,
}

/// The ingest worker's view of one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestSessionStatus {
  pub device_id: String,
  pub state: IngestState,
  #[serde(default)]
  pub fps: Option<f64>,
  #[serde(default)]
  pub bitrate_kbps: Option<u64>,
  #[serde(default)]
  pub last_keyframe_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub message: Option<String>,
}
