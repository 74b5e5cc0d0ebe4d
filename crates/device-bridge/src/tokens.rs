//! Playback tokens: short-lived RS256 JWTs binding a camera id to a playback scope.
//!
//! Tokens are never stored. Anything holding the public key can check one, and the media
//! edge does so through `GET /streams/:id/authorize`.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use common::{playback::normalize_targets, PlaybackTarget};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use telemetry::metrics::BRIDGE_PLAYBACK_TOKENS_ISSUED;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::TokenConfig;

const VERIFY_LEEWAY_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("playback signing key is not configured")]
    NotConfigured,

    #[error("failed to sign playback token: {0}")]
    Signing(String),

    #[error("invalid playback token: {0}")]
    Invalid(String),

    #[error("token subject does not match the camera")]
    SubjectMismatch,

    #[error("token scope does not include {0}")]
    ScopeDenied(PlaybackTarget),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub scope: Vec<PlaybackTarget>,
}

/// Where to fetch the stream once a token is in hand.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaybackLocators {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webrtc_signaling_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hls_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackGrant {
    pub token: String,
    pub token_type: &'static str,
    pub camera_id: String,
    pub scope: Vec<PlaybackTarget>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub expires_in: u64,
    pub playback: PlaybackLocators,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    Verified(PlaybackClaims),
    /// No public key configured; every request is let through.
    Disabled,
}

pub struct PlaybackTokenIssuer {
    issuer: String,
    audience: String,
    ttl_secs: u64,
    media_base: Url,
    encoding: Option<EncodingKey>,
    decoding: Option<DecodingKey>,
}

impl PlaybackTokenIssuer {
    pub fn from_config(config: &TokenConfig, media_base: Url) -> Result<Self> {
        let encoding = match config.private_key.resolve()? {
            Some(pem) => Some(
                EncodingKey::from_rsa_pem(pem.as_bytes())
                    .context("invalid playback private key")?,
            ),
            None => {
                warn!("playback private key not configured, token issuance disabled");
                None
            }
        };
        let decoding = match config.public_key.resolve()? {
            Some(pem) => Some(
                DecodingKey::from_rsa_pem(pem.as_bytes())
                    .context("invalid playback public key")?,
            ),
            None => {
                warn!("playback public key not configured, token verification disabled");
                None
            }
        };

        Ok(Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            ttl_secs: config.effective_ttl_secs(),
            media_base,
            encoding,
            decoding,
        })
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub fn verification_enabled(&self) -> bool {
        self.decoding.is_some()
    }

    /// Mint a token for `camera_id`. An empty or missing scope means every target.
    pub fn issue(
        &self,
        camera_id: &str,
        scope: Option<&[PlaybackTarget]>,
    ) -> Result<PlaybackGrant, TokenError> {
        let key = self.encoding.as_ref().ok_or(TokenError::NotConfigured)?;
        let scope = normalize_targets(scope);

        let issued_at = Utc::now();
        let expires_at = issued_at + Duration::seconds(self.ttl_secs as i64);
        let claims = PlaybackClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: camera_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            scope: scope.clone(),
        };

        let token = encode(&Header::new(Algorithm::RS256), &claims, key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        let playback = self.locators(camera_id, &scope, &token)?;

        BRIDGE_PLAYBACK_TOKENS_ISSUED.inc();
        info!(
            device_id = %camera_id,
            scope = ?scope,
            ttl_secs = self.ttl_secs,
            "playback token issued"
        );

        Ok(PlaybackGrant {
            token,
            token_type: "Bearer",
            camera_id: camera_id.to_string(),
            scope,
            issued_at,
            expires_at,
            expires_in: self.ttl_secs,
            playback,
        })
    }

    fn locators(
        &self,
        camera_id: &str,
        scope: &[PlaybackTarget],
        token: &str,
    ) -> Result<PlaybackLocators, TokenError> {
        let camera = urlencoding::encode(camera_id);
        let mut locators = PlaybackLocators::default();
        for target in scope {
            match target {
                PlaybackTarget::Webrtc => {
                    let url = self
                        .media_base
                        .join(&format!("{camera}/whep"))
                        .map_err(|e| TokenError::Signing(e.to_string()))?;
                    locators.webrtc_signaling_url = Some(url.to_string());
                }
                PlaybackTarget::Hls => {
                    let mut url = self
                        .media_base
                        .join(&format!("{camera}/index.m3u8"))
                        .map_err(|e| TokenError::Signing(e.to_string()))?;
                    url.query_pairs_mut().append_pair("token", token);
                    locators.hls_url = Some(url.to_string());
                }
            }
        }
        Ok(locators)
    }

    /// Check `token` for `camera_id` and, when given, that `target` is in its scope.
    pub fn verify(
        &self,
        token: &str,
        camera_id: &str,
        target: Option<PlaybackTarget>,
    ) -> Result<Verification, TokenError> {
        let Some(key) = self.decoding.as_ref() else {
            return Ok(Verification::Disabled);
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = VERIFY_LEEWAY_SECS;

        let claims = decode::<PlaybackClaims>(token, key, &validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?
            .claims;

        if claims.sub != camera_id {
            return Err(TokenError::SubjectMismatch);
        }
        if let Some(target) = target {
            if !claims.scope.contains(&target) {
                return Err(TokenError::ScopeDenied(target));
            }
        }
        Ok(Verification::Verified(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyMaterial;

    const PRIVATE_PEM: &str = include_str!("../fixtures/playback_private.pem");
    const PUBLIC_PEM: &str = include_str!("../fixtures/playback_public.pem");

    fn issuer_with(config: TokenConfig) -> PlaybackTokenIssuer {
        PlaybackTokenIssuer::from_config(&config, Url::parse("http://media.local:8889/").unwrap())
            .unwrap()
    }

    fn configured() -> PlaybackTokenIssuer {
        issuer_with(TokenConfig {
            private_key: KeyMaterial::inline(PRIVATE_PEM),
            public_key: KeyMaterial::inline(PUBLIC_PEM),
            ..Default::default()
        })
    }

    #[test]
    fn issued_token_binds_subject_and_ttl() {
        let issuer = configured();
        let before = Utc::now().timestamp();
        let grant = issuer.issue("cam-1", None).unwrap();

        let Verification::Verified(claims) = issuer.verify(&grant.token, "cam-1", None).unwrap()
        else {
            panic!("verification unexpectedly disabled");
        };
        assert_eq!(claims.sub, "cam-1");
        assert_eq!(claims.iss, "camera-bridge");
        assert_eq!(claims.aud, "media-edge");
        assert_eq!(claims.exp - claims.iat, 300);
        assert!((claims.exp - (before + 300)).abs() <= 1);
        assert_eq!(claims.scope, vec![PlaybackTarget::Webrtc, PlaybackTarget::Hls]);
    }

    #[test]
    fn locators_follow_scope() {
        let grant = configured().issue("cam-1", Some(&[PlaybackTarget::Hls])).unwrap();
        assert!(grant.playback.webrtc_signaling_url.is_none());
        let hls = grant.playback.hls_url.unwrap();
        assert!(hls.starts_with("http://media.local:8889/cam-1/index.m3u8?token="));
        assert!(hls.ends_with(&grant.token));

        let both = configured().issue("cam-1", Some(&[])).unwrap();
        assert_eq!(
            both.playback.webrtc_signaling_url.as_deref(),
            Some("http://media.local:8889/cam-1/whep")
        );
    }

    #[test]
    fn ttl_is_capped_by_max() {
        let issuer = issuer_with(TokenConfig {
            ttl_secs: 10_000,
            max_ttl_secs: 600,
            private_key: KeyMaterial::inline(PRIVATE_PEM),
            ..Default::default()
        });
        let grant = issuer.issue("cam-1", None).unwrap();
        assert_eq!(grant.expires_in, 600);
        assert!(grant.expires_at <= Utc::now() + Duration::seconds(601));
    }

    #[test]
    fn oversized_ttl_issues_at_ceiling() {
        let issuer = issuer_with(TokenConfig {
            ttl_secs: u64::MAX,
            max_ttl_secs: u64::MAX,
            private_key: KeyMaterial::inline(PRIVATE_PEM),
            ..Default::default()
        });
        let grant = issuer.issue("cam-1", None).unwrap();
        assert_eq!(grant.expires_in, crate::config::TOKEN_TTL_CEILING_SECS);
    }

    #[test]
    fn missing_private_key_refuses_to_issue() {
        let issuer = issuer_with(TokenConfig::default());
        assert!(matches!(issuer.issue("cam-1", None), Err(TokenError::NotConfigured)));
    }

    #[test]
    fn missing_public_key_disables_verification() {
        let issuer = issuer_with(TokenConfig {
            private_key: KeyMaterial::inline(PRIVATE_PEM),
            ..Default::default()
        });
        assert_eq!(
            issuer.verify("not-a-token", "cam-1", None).unwrap(),
            Verification::Disabled
        );
    }

    #[test]
    fn verification_checks_subject_scope_and_signature() {
        let issuer = configured();
        let grant = issuer.issue("cam-1", Some(&[PlaybackTarget::Webrtc])).unwrap();

        assert!(matches!(
            issuer.verify(&grant.token, "cam-2", None),
            Err(TokenError::SubjectMismatch)
        ));
        assert!(matches!(
            issuer.verify(&grant.token, "cam-1", Some(PlaybackTarget::Hls)),
            Err(TokenError::ScopeDenied(PlaybackTarget::Hls))
        ));
        let mut tampered = grant.token.clone();
        tampered.push('x');
        assert!(matches!(
            issuer.verify(&tampered, "cam-1", None),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn other_audience_is_rejected() {
        let minting = configured();
        let grant = minting.issue("cam-1", None).unwrap();
        let checking = issuer_with(TokenConfig {
            audience: "someone-else".into(),
            public_key: KeyMaterial::inline(PUBLIC_PEM),
            ..Default::default()
        });
        assert!(matches!(
            checking.verify(&grant.token, "cam-1", None),
            Err(TokenError::Invalid(_))
        ));
    }
}
