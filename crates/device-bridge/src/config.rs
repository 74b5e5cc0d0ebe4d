use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Url;
use std::{env, fmt, net::SocketAddr, path::PathBuf, time::Duration};
use stream_probe::ProbeConfig;

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceStoreType {
    Memory,
    Postgres,
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub bind_addr: SocketAddr,
    pub store_type: DeviceStoreType,
    pub database_url: Option<String>,
    pub ingest_worker_url: Url,
    pub ingest_timeout: Duration,
    pub media_base_url: Url,
    pub tokens: TokenConfig,
    pub probe: ProbeConfig,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self> {
        let bind = env::var("BRIDGE_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());
        let bind_addr: SocketAddr = bind.parse().context("invalid BRIDGE_ADDR")?;

        let store_type_str = env::var("DEVICE_STORE_TYPE").unwrap_or_else(|_| "memory".to_string());
        let store_type = match store_type_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DeviceStoreType::Postgres,
            _ => DeviceStoreType::Memory,
        };

        let database_url = if store_type == DeviceStoreType::Postgres {
            Some(env::var("DATABASE_URL").context("DATABASE_URL required for Postgres store")?)
        } else {
            env::var("DATABASE_URL").ok()
        };

        let worker = env::var("INGEST_WORKER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8091/".to_string());
        let ingest_worker_url = base_url(&worker).context("invalid INGEST_WORKER_URL")?;

        let ingest_timeout_secs = env::var("INGEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);

        let media = env::var("MEDIA_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8889/".to_string());
        let media_base_url = base_url(&media).context("invalid MEDIA_BASE_URL")?;

        Ok(Self {
            bind_addr,
            store_type,
            database_url,
            ingest_worker_url,
            ingest_timeout: Duration::from_secs(ingest_timeout_secs.max(1)),
            media_base_url,
            tokens: TokenConfig::from_env(),
            probe: ProbeConfig::from_env(),
        })
    }
}

/// Hard ceiling on playback token lifetime, whatever the environment says.
pub const TOKEN_TTL_CEILING_SECS: u64 = 7 * 24 * 60 * 60;

/// Parse a base URL, forcing a trailing slash so `join` appends instead of replacing.
pub fn base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// One half of the signing key pair, resolvable from several sources.
///
/// Resolution order: environment PEM, inline value, base64, file path. The first
/// non-empty source wins; later sources are not consulted.
#[derive(Clone, Default)]
pub struct KeyMaterial {
    pub env_pem: Option<String>,
    pub inline: Option<String>,
    pub base64: Option<String>,
    pub path: Option<PathBuf>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("env_pem", &self.env_pem.as_ref().map(|_| "<set>"))
            .field("inline", &self.inline.as_ref().map(|_| "<set>"))
            .field("base64", &self.base64.as_ref().map(|_| "<set>"))
            .field("path", &self.path)
            .finish()
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl KeyMaterial {
    /// Reads `{var}`, `{var}_B64` and `{var}_PATH`.
    pub fn from_env(var: &str) -> Self {
        Self {
            env_pem: env::var(var).ok(),
            inline: None,
            base64: env::var(format!("{var}_B64")).ok(),
            path: env::var(format!("{var}_PATH"))
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn inline(pem: impl Into<String>) -> Self {
        Self {
            inline: Some(pem.into()),
            ..Default::default()
        }
    }

    /// PEM text from the first non-empty source, `None` when nothing is configured.
    pub fn resolve(&self) -> Result<Option<String>> {
        if let Some(pem) = non_empty(self.env_pem.as_ref()) {
            // single-line env values carry escaped newlines
            return Ok(Some(pem.replace("\\n", "\n")));
        }
        if let Some(pem) = non_empty(self.inline.as_ref()) {
            return Ok(Some(pem.to_string()));
        }
        if let Some(encoded) = non_empty(self.base64.as_ref()) {
            let bytes = STANDARD
                .decode(encoded)
                .context("signing key is not valid base64")?;
            let pem = String::from_utf8(bytes).context("decoded signing key is not UTF-8")?;
            return Ok(Some(pem));
        }
        if let Some(path) = &self.path {
            let pem = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read signing key from {}", path.display()))?;
            return Ok(Some(pem));
        }
        Ok(None)
    }
}

#[derive(Clone, Debug)]
pub struct TokenConfig {
    pub issuer: String,
    pub audience: String,
    pub ttl_secs: u64,
    pub max_ttl_secs: u64,
    pub private_key: KeyMaterial,
    pub public_key: KeyMaterial,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "camera-bridge".to_string(),
            audience: "media-edge".to_string(),
            ttl_secs: 300,
            max_ttl_secs: 3600,
            private_key: KeyMaterial::default(),
            public_key: KeyMaterial::default(),
        }
    }
}

impl TokenConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let issuer = env::var("PLAYBACK_TOKEN_ISSUER").unwrap_or(defaults.issuer);
        let audience = env::var("PLAYBACK_TOKEN_AUDIENCE").unwrap_or(defaults.audience);

        let ttl_secs = env::var("PLAYBACK_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.ttl_secs);

        let max_ttl_secs = env::var("PLAYBACK_TOKEN_MAX_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.max_ttl_secs)
            .min(TOKEN_TTL_CEILING_SECS);

        Self {
            issuer,
            audience,
            ttl_secs,
            max_ttl_secs,
            private_key: KeyMaterial::from_env("PLAYBACK_PRIVATE_KEY"),
            public_key: KeyMaterial::from_env("PLAYBACK_PUBLIC_KEY"),
        }
    }

    /// Effective token lifetime: the configured TTL, never above the maximum.
    pub fn effective_ttl_secs(&self) -> u64 {
        let max = self.max_ttl_secs.clamp(1, TOKEN_TTL_CEILING_SECS);
        self.ttl_secs.clamp(1, max)
    }
}
