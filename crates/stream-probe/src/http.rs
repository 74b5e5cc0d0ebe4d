//! Tier 1 HTTP check: `HEAD`, falling back to `GET` when `HEAD` is refused or inconclusive.
//!
//! Credentialed candidates send Basic up front. A `401` carrying a Digest challenge is
//! answered once before the attempt is classified.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::{header, redirect, Client, Method, Response, StatusCode, Url};
use tracing::debug;

use crate::classify::is_media_content_type;
use crate::rtsp::Challenge;
use crate::types::{Candidate, Credentials, ProbeResult, ProbeType};

const MAX_REDIRECTS: usize = 3;

#[derive(Clone)]
pub struct HttpCheck {
    client: Client,
}

impl HttpCheck {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            // cameras ship self-signed certificates
            .danger_accept_invalid_certs(true)
            .user_agent(concat!("camera-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build probe HTTP client")?;
        Ok(Self { client })
    }

    /// One result for `HEAD`, plus one for `GET` when `HEAD` settled nothing.
    pub async fn probe(&self, candidate: &Candidate) -> Vec<ProbeResult> {
        let head = self.attempt(candidate, Method::HEAD).await;
        if !head.is_inconclusive() {
            return vec![head];
        }
        let get = self.attempt(candidate, Method::GET).await;
        vec![head, get]
    }

    async fn attempt(&self, candidate: &Candidate, method: Method) -> ProbeResult {
        let probe_type = if method == Method::HEAD {
            ProbeType::HttpHead
        } else {
            ProbeType::HttpGet
        };
        let mut result = ProbeResult::for_candidate(candidate, probe_type);

        let Some(url) = candidate.bare_url() else {
            result.diagnostic = "candidate is not a valid http url".to_string();
            return result;
        };

        let credentials = candidate.credentials();
        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(creds) = &credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let started = Instant::now();
        let mut response = request.send().await;
        let digest = match (&credentials, &response) {
            (Some(creds), Ok(first)) => digest_authorization(first, creds, &method, &url),
            _ => None,
        };
        if let Some(authorization) = digest {
            debug!(url = %result.url, "answering digest challenge");
            response = self
                .client
                .request(method, url)
                .header(header::AUTHORIZATION, authorization)
                .send()
                .await;
        }
        result.latency_ms = started.elapsed().as_millis() as u64;

        match response {
            Ok(response) => {
                let status = response.status();
                let content_type = response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let challenged = response.headers().contains_key(header::WWW_AUTHENTICATE);

                result.status_code = Some(status.as_u16());
                result.success = matches!(status, StatusCode::OK | StatusCode::PARTIAL_CONTENT)
                    && is_media_content_type(content_type.as_deref());
                result.requires_auth =
                    !result.success && (status == StatusCode::UNAUTHORIZED || challenged);
                result.diagnostic = match &content_type {
                    Some(ct) => format!("HTTP {status} ({ct})"),
                    None => format!("HTTP {status}"),
                };
                result.content_type = content_type;
                // body is never read; dropping the response closes streaming endpoints
                drop(response);
            }
            Err(err) => {
                result.diagnostic = err.without_url().to_string();
            }
        }

        debug!(
            url = %result.url,
            probe_type = result.probe_type.as_str(),
            status = ?result.status_code,
            success = result.success,
            requires_auth = result.requires_auth,
            latency_ms = result.latency_ms,
            "http probe finished"
        );
        result
    }
}

/// Digest `Authorization` for a `401` that offers Digest; `None` for anything else.
fn digest_authorization(
    response: &Response,
    creds: &Credentials,
    method: &Method,
    url: &Url,
) -> Option<String> {
    if response.status() != StatusCode::UNAUTHORIZED {
        return None;
    }
    let challenge = Challenge::select(
        response
            .headers()
            .get_all(header::WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok()),
    )
    .filter(Challenge::is_digest)?;
    let uri = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    };
    Some(challenge.authorization(creds, method.as_str(), &uri))
}
