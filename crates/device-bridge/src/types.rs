use chrono::{DateTime, Utc};
use common::{IngestState, PlaybackTarget, Transport};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use stream_probe::redact_url;
use uuid::Uuid;

/// Live ingest view of a device. Every device carries one from creation on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceStatus {
    pub state: IngestState,
    pub fps: f64,
    pub bitrate_kbps: u64,
    pub last_keyframe_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub targets: Vec<PlaybackTarget>,
}

fn serialize_redacted_opt<S: Serializer>(url: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match url {
        Some(url) => serializer.serialize_some(&redact_url(url)),
        None => serializer.serialize_none(),
    }
}

/// Credential bundle. The password is accepted on input and never serialized back out.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceCredentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Resolved stream URL, filled in by discovery or supplied at creation.
    #[serde(default, serialize_with = "serialize_redacted_opt")]
    pub stream_url: Option<String>,
}

impl fmt::Debug for DeviceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("stream_url", &self.stream_url.as_deref().map(redact_url))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub transport: Transport,
    pub address: Option<String>,
    pub vendor: Option<String>,
    pub credentials: DeviceCredentials,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: DeviceStatus,
}

impl Device {
    pub fn new(req: CreateDeviceRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: req.name.trim().to_string(),
            transport: req.transport,
            address: req.address.filter(|a| !a.trim().is_empty()),
            vendor: req.vendor.filter(|v| !v.trim().is_empty()),
            credentials: DeviceCredentials {
                username: req.username.filter(|u| !u.is_empty()),
                password: req.password,
                stream_url: req.stream_url.filter(|u| !u.trim().is_empty()),
            },
            created_at: now,
            updated_at: now,
            status: DeviceStatus::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDeviceRequest {
    pub name: String,
    #[serde(default = "default_transport")]
    pub transport: Transport,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub stream_url: Option<String>,
}

fn default_transport() -> Transport {
    Transport::Rtsp
}

impl CreateDeviceRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if let Some(url) = self.stream_url.as_deref().filter(|u| !u.trim().is_empty()) {
            reqwest::Url::parse(url).map_err(|e| format!("invalid stream_url: {e}"))?;
        }
        if self.password.is_some() && self.username.as_deref().map_or(true, str::is_empty) {
            return Err("password given without username".to_string());
        }
        Ok(())
    }
}

/// Heartbeat from the ingest worker. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsUpdate {
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub bitrate_kbps: Option<u64>,
    #[serde(default)]
    pub last_keyframe_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: Option<IngestState>,
}

impl MetricsUpdate {
    pub fn validate(&self) -> Result<(), String> {
        match self.fps {
            Some(fps) if !fps.is_finite() || fps < 0.0 => Err("fps must be a non-negative number".to_string()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub targets: Option<Vec<PlaybackTarget>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfflineWebhook {
    pub device_id: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub scope: Option<Vec<PlaybackTarget>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoverRequest {
    #[serde(default)]
    pub transport: Option<Transport>,
    #[serde(default)]
    pub vendor_hint: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeQuery {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub target: Option<PlaybackTarget>,
}

/// Partial update of a [`DeviceStatus`]. Only the orchestrator builds these.
///
/// Fields that can be cleared use a nested `Option`: `Some(None)` clears, `None` keeps.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub state: Option<IngestState>,
    pub fps: Option<f64>,
    pub bitrate_kbps: Option<u64>,
    pub last_keyframe_at: Option<Option<DateTime<Utc>>>,
    pub last_heartbeat_at: Option<Option<DateTime<Utc>>>,
    pub last_error: Option<Option<String>>,
    pub targets: Option<Vec<PlaybackTarget>>,
}

impl StatusPatch {
    pub fn state(state: IngestState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn with_targets(mut self, targets: Vec<PlaybackTarget>) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.last_error = Some(error);
        self
    }

    pub fn with_heartbeat(mut self, at: DateTime<Utc>) -> Self {
        self.last_heartbeat_at = Some(Some(at));
        self
    }

    /// Zero the metrics and clear the target set.
    pub fn reset_session(mut self) -> Self {
        self.fps = Some(0.0);
        self.bitrate_kbps = Some(0);
        self.last_keyframe_at = Some(None);
        self.targets = Some(Vec::new());
        self
    }

    pub fn apply(&self, status: &mut DeviceStatus) {
        if let Some(state) = self.state {
            status.state = state;
        }
        if let Some(fps) = self.fps {
            status.fps = fps;
        }
        if let Some(bitrate) = self.bitrate_kbps {
            status.bitrate_kbps = bitrate;
        }
        if let Some(at) = self.last_keyframe_at {
            status.last_keyframe_at = at;
        }
        if let Some(at) = self.last_heartbeat_at {
            status.last_heartbeat_at = at;
        }
        if let Some(error) = &self.last_error {
            status.last_error = error.clone();
        }
        if let Some(targets) = &self.targets {
            status.targets = targets.clone();
        }
    }
}
