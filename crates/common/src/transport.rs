use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// How a camera delivers its video.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
  Rtsp,
  HttpMjpeg,
  HttpSnapshot,
}

impl Transport {
  pub fn as_str(&self) -> &'static str {
    match self {
      Transport::Rtsp => "rtsp",
      Transport::HttpMjpeg => "http-mjpeg",
      Transport::HttpSnapshot => "http-snapshot",
    }
  }

  /// URL scheme used when a bare host is given with this transport.
  pub fn default_scheme(&self) -> &'static str {
    match self {
      Transport::Rtsp => "rtsp",
      Transport::HttpMjpeg | Transport::HttpSnapshot => "http",
    }
  }
}

impl fmt::Display for Transport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Transport {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "rtsp" => Ok(Transport::Rtsp),
      "http" | "mjpeg" | "http-mjpeg" => Ok(Transport::HttpMjpeg),
      "snapshot" | "http-snapshot" => Ok(Transport::HttpSnapshot),
      _ => Err(format!("unknown transport '{s}'")),
    }
  }
}
