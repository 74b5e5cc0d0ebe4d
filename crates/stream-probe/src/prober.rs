use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use common::Transport;
use telemetry::metrics::BRIDGE_PROBE_ATTEMPTS;

use crate::config::ProbeConfig;
use crate::deep::DeepProbeTool;
use crate::http::HttpCheck;
use crate::rtsp;
use crate::types::{Candidate, ProbeResult};

/// Verifies a single candidate. The scheduler only ever talks to this trait.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Bounded check whether decode verification can run on this host.
    async fn deep_probe_available(&self) -> bool;

    /// Every attempt made against `candidate`, in the order made.
    async fn probe(&self, candidate: &Candidate, deep_available: bool) -> Vec<ProbeResult>;
}

/// Tier 1: transport-level checks.
#[async_trait]
pub trait LightweightCheck: Send + Sync {
    async fn check(&self, candidate: &Candidate) -> Vec<ProbeResult>;
}

/// Tier 2: decode verification.
#[async_trait]
pub trait DeepCheck: Send + Sync {
    async fn available(&self) -> bool;
    async fn verify(&self, candidate: &Candidate) -> ProbeResult;
}

/// RTSP `DESCRIBE` for RTSP candidates, `HEAD`/`GET` for HTTP ones.
pub struct NetworkCheck {
    http: HttpCheck,
    rtsp_timeout: Duration,
}

impl NetworkCheck {
    pub fn new(light_timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: HttpCheck::new(light_timeout)?,
            rtsp_timeout: light_timeout,
        })
    }
}

#[async_trait]
impl LightweightCheck for NetworkCheck {
    async fn check(&self, candidate: &Candidate) -> Vec<ProbeResult> {
        match candidate.transport() {
            Transport::Rtsp => vec![rtsp::probe_describe(candidate, self.rtsp_timeout).await],
            Transport::HttpMjpeg | Transport::HttpSnapshot => self.http.probe(candidate).await,
        }
    }
}

/// Cheap check first; decode verification only when the cheap check settled nothing.
pub struct TieredProber {
    light: Arc<dyn LightweightCheck>,
    deep: Arc<dyn DeepCheck>,
}

impl TieredProber {
    pub fn new(light: Arc<dyn LightweightCheck>, deep: Arc<dyn DeepCheck>) -> Self {
        Self { light, deep }
    }

    pub fn from_config(config: &ProbeConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(NetworkCheck::new(config.light_timeout)?),
            Arc::new(DeepProbeTool::from_config(config)),
        ))
    }
}

#[async_trait]
impl Prober for TieredProber {
    async fn deep_probe_available(&self) -> bool {
        self.deep.available().await
    }

    async fn probe(&self, candidate: &Candidate, deep_available: bool) -> Vec<ProbeResult> {
        let mut results = self.light.check(candidate).await;

        let settled = results.iter().any(|r| r.success || r.requires_auth);
        if !settled && deep_available {
            results.push(self.deep.verify(candidate).await);
        }

        for result in &results {
            BRIDGE_PROBE_ATTEMPTS
                .with_label_values(&[result.probe_type.as_str(), result.result_label()])
                .inc();
        }
        results
    }
}
