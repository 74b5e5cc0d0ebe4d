use crate::orchestrator::DeviceOrchestrator;
use crate::repository::DeviceRepository;
use crate::tokens::PlaybackTokenIssuer;
use std::sync::Arc;
use stream_probe::ProbeScheduler;

#[derive(Clone)]
pub struct BridgeState {
    pub orchestrator: Arc<DeviceOrchestrator>,
    pub repo: Arc<dyn DeviceRepository>,
    pub tokens: Arc<PlaybackTokenIssuer>,
    pub scheduler: Arc<ProbeScheduler>,
}

impl BridgeState {
    pub fn new(
        orchestrator: Arc<DeviceOrchestrator>,
        tokens: Arc<PlaybackTokenIssuer>,
        scheduler: Arc<ProbeScheduler>,
    ) -> Self {
        let repo = orchestrator.repository();
        Self {
            orchestrator,
            repo,
            tokens,
            scheduler,
        }
    }
}
