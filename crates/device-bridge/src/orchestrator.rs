//! Per-device ingest session state machine.
//!
//! ```text
//! idle ──start──▶ starting ──worker ack──▶ running ──stop──▶ stopping ──worker ack──▶ idle
//!                                             │
//!                                             └──offline webhook──▶ error
//! ```
//!
//! Metrics heartbeats may overwrite any field, state included, without passing through the
//! transitions above. Start, stop and offline handling for one device are serialized by a
//! per-device async mutex; different devices never wait on each other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use common::{ingest::IngestStartRequest, playback::normalize_targets, IngestState};
use reqwest::Url;
use stream_probe::{ProbeReport, ProbeRequest, ProbeScheduler};
use telemetry::metrics::BRIDGE_INGEST_OPERATIONS;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::repository::DeviceRepository;
use crate::types::{
    CreateDeviceRequest, Device, DeviceStatus, DiscoverRequest, MetricsUpdate, OfflineWebhook,
    StartRequest, StatusPatch,
};
use crate::worker::{self, IngestWorker};

pub const DEFAULT_OFFLINE_ERROR: &str = "heartbeat missed";
pub const DEFAULT_PROFILE: &str = "default";

type DeviceLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

pub struct DeviceOrchestrator {
    repo: Arc<dyn DeviceRepository>,
    worker: Arc<dyn IngestWorker>,
    locks: DeviceLocks,
    ingest_timeout: Duration,
}

/// Held for the duration of one serialized operation. On drop the map entry is removed
/// once nobody else holds or waits on it.
struct DeviceLockGuard<'a> {
    locks: &'a DeviceLocks,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DeviceLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

impl DeviceOrchestrator {
    pub fn new(
        repo: Arc<dyn DeviceRepository>,
        worker: Arc<dyn IngestWorker>,
        ingest_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            worker,
            locks: Mutex::new(HashMap::new()),
            ingest_timeout,
        }
    }

    pub fn repository(&self) -> Arc<dyn DeviceRepository> {
        self.repo.clone()
    }

    /// Serialize on `id`. Unknown devices fail before any lock entry is created.
    async fn lock_device(&self, id: &str) -> BridgeResult<DeviceLockGuard<'_>> {
        self.load(id).await?;
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(id.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        Ok(DeviceLockGuard {
            locks: &self.locks,
            id: id.to_string(),
            guard: Some(guard),
        })
    }

    async fn load(&self, id: &str) -> BridgeResult<Device> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| BridgeError::device_not_found(id))
    }

    async fn merge(&self, id: &str, patch: StatusPatch) -> BridgeResult<Device> {
        self.repo
            .merge_status(id, &patch)
            .await?
            .ok_or_else(|| BridgeError::device_not_found(id))
    }

    /// Run one ingest worker call under the ingest timeout and count it.
    async fn call_worker<T, F>(&self, operation: &'static str, device_id: &str, call: F) -> BridgeResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let outcome = match tokio::time::timeout(self.ingest_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) if worker::is_timeout(&e) => Err(BridgeError::Timeout(format!(
                "ingest {operation} for device {device_id}: {e:#}"
            ))),
            Ok(Err(e)) => Err(BridgeError::Upstream(format!(
                "ingest {operation} for device {device_id} failed: {e:#}"
            ))),
            Err(_) => Err(BridgeError::Timeout(format!(
                "ingest {operation} for device {device_id} exceeded {:?}",
                self.ingest_timeout
            ))),
        };
        let status = if outcome.is_ok() { "ok" } else { "error" };
        BRIDGE_INGEST_OPERATIONS
            .with_label_values(&[operation, status])
            .inc();
        outcome
    }

    pub async fn create_device(&self, req: CreateDeviceRequest) -> BridgeResult<Device> {
        req.validate().map_err(BridgeError::Validation)?;
        let device = self.repo.create(Device::new(req)).await?;
        info!(
            device_id = %device.id,
            device_name = %device.name,
            transport = %device.transport,
            "device created"
        );
        Ok(device)
    }

    pub async fn get_device(&self, id: &str) -> BridgeResult<Device> {
        self.load(id).await
    }

    pub async fn list_devices(&self) -> BridgeResult<Vec<Device>> {
        Ok(self.repo.list().await?)
    }

    /// `idle|starting|error → starting → running`.
    ///
    /// A failed worker call leaves the device in `starting`; the caller may retry.
    pub async fn start(&self, id: &str, req: StartRequest) -> BridgeResult<Device> {
        let _lock = self.lock_device(id).await?;

        let device = self.load(id).await?;
        match device.status.state {
            IngestState::Running | IngestState::Stopping => {
                return Err(BridgeError::conflict(format!(
                    "device {id} is {}",
                    device.status.state
                )));
            }
            IngestState::Idle | IngestState::Starting | IngestState::Error => {}
        }

        let source_url = resolve_source_url(&device)?;
        let targets = normalize_targets(req.targets.as_deref());
        let profile = req
            .profile
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());

        self.merge(
            id,
            StatusPatch::state(IngestState::Starting)
                .with_targets(targets.clone())
                .with_error(None),
        )
        .await?;
        info!(device_id = %id, targets = ?targets, profile = %profile, "starting ingest");

        let request = IngestStartRequest {
            device_id: id.to_string(),
            source_url,
            profile,
            targets,
        };
        if let Err(e) = self
            .call_worker("start", id, self.worker.start(&request))
            .await
        {
            error!(device_id = %id, error = %e, "ingest start failed");
            return Err(e);
        }

        let device = self
            .merge(id, StatusPatch::state(IngestState::Running).with_heartbeat(Utc::now()))
            .await?;
        info!(device_id = %id, "ingest running");
        Ok(device)
    }

    /// `* → stopping → idle`. Stopping an idle device is a no-op that still answers `idle`.
    pub async fn stop(&self, id: &str) -> BridgeResult<Device> {
        let _lock = self.lock_device(id).await?;

        let device = self.load(id).await?;
        if device.status.state == IngestState::Idle {
            debug!(device_id = %id, "stop on idle device");
            return self.merge(id, idle_patch()).await;
        }

        self.merge(id, StatusPatch::state(IngestState::Stopping)).await?;
        info!(device_id = %id, from = %device.status.state, "stopping ingest");

        if let Err(e) = self.call_worker("stop", id, self.worker.stop(id)).await {
            error!(device_id = %id, error = %e, "ingest stop failed");
            return Err(e);
        }

        let device = self.merge(id, idle_patch()).await?;
        info!(device_id = %id, "ingest stopped");
        Ok(device)
    }

    /// Heartbeat from the ingest worker; any state.
    pub async fn record_metrics(&self, id: &str, update: MetricsUpdate) -> BridgeResult<Device> {
        update.validate().map_err(BridgeError::Validation)?;

        let patch = StatusPatch {
            state: update.state,
            fps: update.fps,
            bitrate_kbps: update.bitrate_kbps,
            last_keyframe_at: update.last_keyframe_at.map(Some),
            last_heartbeat_at: Some(Some(Utc::now())),
            ..Default::default()
        };
        let device = self.merge(id, patch).await?;
        debug!(
            device_id = %id,
            state = %device.status.state,
            fps = device.status.fps,
            bitrate_kbps = device.status.bitrate_kbps,
            "metrics recorded"
        );
        Ok(device)
    }

    /// `running|starting → error`. Targets stay as they were.
    pub async fn mark_offline(&self, webhook: OfflineWebhook) -> BridgeResult<Device> {
        let id = webhook.device_id.as_str();
        if id.trim().is_empty() {
            return Err(BridgeError::validation("device_id must not be empty"));
        }
        let _lock = self.lock_device(id).await?;

        let device = self.load(id).await?;
        if !device.status.state.is_active() {
            debug!(device_id = %id, state = %device.status.state, "offline webhook ignored");
            return Ok(device);
        }

        let message = webhook
            .error
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OFFLINE_ERROR.to_string());
        warn!(device_id = %id, error = %message, "device reported offline");
        self.merge(
            id,
            StatusPatch::state(IngestState::Error).with_error(Some(message)),
        )
        .await
    }

    /// Current status; with `refresh`, merged with the ingest worker's view first.
    pub async fn status(&self, id: &str, refresh: bool) -> BridgeResult<DeviceStatus> {
        if !refresh {
            return Ok(self.load(id).await?.status);
        }
        self.load(id).await?;

        let remote = self
            .call_worker("status", id, self.worker.status(id))
            .await?;
        let Some(remote) = remote else {
            debug!(device_id = %id, "ingest worker has no session");
            return Ok(self.load(id).await?.status);
        };

        let mut patch = StatusPatch {
            state: Some(remote.state),
            fps: remote.fps,
            bitrate_kbps: remote.bitrate_kbps,
            last_keyframe_at: remote.last_keyframe_at.map(Some),
            last_heartbeat_at: Some(Some(Utc::now())),
            ..Default::default()
        };
        if remote.state == IngestState::Error {
            patch.last_error = Some(remote.message);
        }
        Ok(self.merge(id, patch).await?.status)
    }

    pub async fn assign_stream_url(&self, id: &str, stream_url: &str) -> BridgeResult<Device> {
        let device = self
            .repo
            .set_stream_url(id, stream_url)
            .await?
            .ok_or_else(|| BridgeError::device_not_found(id))?;
        info!(device_id = %id, "stream url recorded");
        Ok(device)
    }

    /// Probe the device's address with its stored credentials and keep a verified URL.
    pub async fn discover(
        &self,
        id: &str,
        req: DiscoverRequest,
        scheduler: &ProbeScheduler,
    ) -> BridgeResult<ProbeReport> {
        let device = self.load(id).await?;
        let target = device
            .address
            .clone()
            .or_else(|| device.credentials.stream_url.clone())
            .ok_or_else(|| BridgeError::validation(format!("device {id} has no address")))?;

        let mut request = ProbeRequest::new(target)
            .with_transport(req.transport.unwrap_or(device.transport));
        if let Some(hint) = req.vendor_hint.or(device.vendor.clone()) {
            request = request.with_vendor_hint(hint);
        }
        if let Some(username) = device.credentials.username.clone() {
            request = request.with_credentials(
                username,
                device.credentials.password.clone().unwrap_or_default(),
            );
        }

        let report = scheduler
            .run(&request)
            .await
            .map_err(|e| BridgeError::validation(e.to_string()))?;

        match &report.winner {
            Some(winner) => {
                self.assign_stream_url(id, winner.url()).await?;
            }
            None => {
                warn!(device_id = %id, outcome = report.outcome.as_str(), "discovery found no stream");
            }
        }
        Ok(report)
    }

    /// Stop every running device. Individual failures are logged, never returned.
    pub async fn shutdown(&self) -> usize {
        let devices = match self.repo.list().await {
            Ok(devices) => devices,
            Err(e) => {
                error!(error = %e, "failed to list devices during shutdown");
                return 0;
            }
        };

        let mut stopped = 0;
        for device in devices
            .iter()
            .filter(|d| d.status.state == IngestState::Running)
        {
            match self.stop(&device.id).await {
                Ok(_) => stopped += 1,
                Err(e) => error!(device_id = %device.id, error = %e, "failed to stop device during shutdown"),
            }
        }
        info!(stopped, "running devices stopped");
        stopped
    }
}

fn idle_patch() -> StatusPatch {
    StatusPatch::state(IngestState::Idle)
        .with_error(None)
        .reset_session()
}

/// Source URL handed to the ingest worker: the resolved stream URL, else the address,
/// with stored credentials embedded when the URL carries none.
pub fn resolve_source_url(device: &Device) -> BridgeResult<String> {
    let raw = device
        .credentials
        .stream_url
        .as_deref()
        .or(device.address.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            BridgeError::validation(format!(
                "device {} has neither a stream url nor an address",
                device.id
            ))
        })?;

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("{}://{raw}", device.transport.default_scheme())
    };
    let mut url = Url::parse(&with_scheme)
        .map_err(|e| BridgeError::validation(format!("invalid source url: {e}")))?;

    if let Some(username) = device.credentials.username.as_deref() {
        if url.username().is_empty() {
            let embedded = url.set_username(username).is_ok()
                && url
                    .set_password(device.credentials.password.as_deref())
                    .is_ok();
            if !embedded {
                return Err(BridgeError::validation("source url cannot carry credentials"));
            }
        }
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryDeviceRepository;
    use async_trait::async_trait;
    use common::ingest::IngestSessionStatus;
    use common::{PlaybackTarget, Transport};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeWorker {
        calls: Mutex<Vec<String>>,
        started: Mutex<Vec<IngestStartRequest>>,
        fail: AtomicBool,
        delay: Option<Duration>,
        session: Mutex<Option<IngestSessionStatus>>,
    }

    impl FakeWorker {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IngestWorker for FakeWorker {
        async fn start(&self, request: &IngestStartRequest) -> anyhow::Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().unwrap().push(format!("start:{}", request.device_id));
            self.started.lock().unwrap().push(request.clone());
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("worker refused");
            }
            Ok(())
        }

        async fn stop(&self, device_id: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("stop:{device_id}"));
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("worker refused");
            }
            Ok(())
        }

        async fn status(&self, _device_id: &str) -> anyhow::Result<Option<IngestSessionStatus>> {
            Ok(self.session.lock().unwrap().clone())
        }
    }

    fn setup(worker: FakeWorker) -> (Arc<DeviceOrchestrator>, Arc<FakeWorker>) {
        let worker = Arc::new(worker);
        let orchestrator = DeviceOrchestrator::new(
            Arc::new(MemoryDeviceRepository::new()),
            worker.clone(),
            Duration::from_secs(2),
        );
        (Arc::new(orchestrator), worker)
    }

    async fn create(orchestrator: &DeviceOrchestrator) -> Device {
        orchestrator
            .create_device(CreateDeviceRequest {
                name: "Lobby".into(),
                transport: Transport::Rtsp,
                address: Some("10.0.0.2".into()),
                vendor: None,
                username: Some("admin".into()),
                password: Some("pw".into()),
                stream_url: Some("rtsp://10.0.0.2/stream1".into()),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn new_device_status_is_idle_and_empty() {
        let (orchestrator, _) = setup(FakeWorker::default());
        let device = create(&orchestrator).await;
        let status = orchestrator.status(&device.id, false).await.unwrap();
        assert_eq!(status.state, IngestState::Idle);
        assert_eq!(status.fps, 0.0);
        assert_eq!(status.bitrate_kbps, 0);
        assert!(status.targets.is_empty());
    }

    #[tokio::test]
    async fn start_runs_after_worker_ack() {
        let (orchestrator, worker) = setup(FakeWorker::default());
        let device = create(&orchestrator).await;

        let started = orchestrator
            .start(&device.id, StartRequest { profile: None, targets: Some(vec![PlaybackTarget::Hls]) })
            .await
            .unwrap();

        assert_eq!(started.status.state, IngestState::Running);
        assert_eq!(started.status.targets, vec![PlaybackTarget::Hls]);
        assert!(started.status.last_heartbeat_at.is_some());
        let sent = worker.started.lock().unwrap()[0].clone();
        assert_eq!(sent.source_url, "rtsp://admin:pw@10.0.0.2/stream1");
        assert_eq!(sent.profile, DEFAULT_PROFILE);
    }

    #[tokio::test]
    async fn failed_start_leaves_starting_and_surfaces_error() {
        let worker = FakeWorker::default();
        worker.fail.store(true, Ordering::SeqCst);
        let (orchestrator, _) = setup(worker);
        let device = create(&orchestrator).await;

        let err = orchestrator.start(&device.id, StartRequest::default()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Upstream(_)));
        let status = orchestrator.status(&device.id, false).await.unwrap();
        assert_eq!(status.state, IngestState::Starting);
        assert_eq!(status.targets, vec![PlaybackTarget::Webrtc, PlaybackTarget::Hls]);
    }

    #[tokio::test]
    async fn start_while_running_conflicts() {
        let (orchestrator, _) = setup(FakeWorker::default());
        let device = create(&orchestrator).await;
        orchestrator.start(&device.id, StartRequest::default()).await.unwrap();
        let err = orchestrator.start(&device.id, StartRequest::default()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Conflict(_)));
    }

    #[tokio::test]
    async fn stop_resets_metrics_and_targets() {
        let (orchestrator, worker) = setup(FakeWorker::default());
        let device = create(&orchestrator).await;
        orchestrator.start(&device.id, StartRequest::default()).await.unwrap();
        orchestrator
            .record_metrics(&device.id, MetricsUpdate { fps: Some(25.0), bitrate_kbps: Some(2048), ..Default::default() })
            .await
            .unwrap();

        let stopped = orchestrator.stop(&device.id).await.unwrap();
        assert_eq!(stopped.status.state, IngestState::Idle);
        assert_eq!(stopped.status.fps, 0.0);
        assert_eq!(stopped.status.bitrate_kbps, 0);
        assert!(stopped.status.targets.is_empty());
        assert_eq!(worker.calls(), vec![format!("start:{}", device.id), format!("stop:{}", device.id)]);
    }

    #[tokio::test]
    async fn stop_on_idle_device_is_idempotent() {
        let (orchestrator, worker) = setup(FakeWorker::default());
        let device = create(&orchestrator).await;
        let stopped = orchestrator.stop(&device.id).await.unwrap();
        assert_eq!(stopped.status.state, IngestState::Idle);
        assert!(worker.calls().is_empty());
    }

    #[tokio::test]
    async fn stop_from_error_reaches_idle() {
        let (orchestrator, _) = setup(FakeWorker::default());
        let device = create(&orchestrator).await;
        orchestrator.start(&device.id, StartRequest::default()).await.unwrap();
        orchestrator
            .mark_offline(OfflineWebhook { device_id: device.id.clone(), error: None })
            .await
            .unwrap();
        let stopped = orchestrator.stop(&device.id).await.unwrap();
        assert_eq!(stopped.status.state, IngestState::Idle);
        assert!(stopped.status.last_error.is_none());
    }

    #[tokio::test]
    async fn offline_webhook_keeps_targets() {
        let (orchestrator, _) = setup(FakeWorker::default());
        let device = create(&orchestrator).await;
        orchestrator
            .start(&device.id, StartRequest { profile: None, targets: Some(vec![PlaybackTarget::Webrtc]) })
            .await
            .unwrap();

        let failed = orchestrator
            .mark_offline(OfflineWebhook { device_id: device.id.clone(), error: None })
            .await
            .unwrap();
        assert_eq!(failed.status.state, IngestState::Error);
        assert_eq!(failed.status.last_error.as_deref(), Some(DEFAULT_OFFLINE_ERROR));
        assert_eq!(failed.status.targets, vec![PlaybackTarget::Webrtc]);
    }

    #[tokio::test]
    async fn offline_webhook_ignores_idle_device() {
        let (orchestrator, _) = setup(FakeWorker::default());
        let device = create(&orchestrator).await;
        let unchanged = orchestrator
            .mark_offline(OfflineWebhook { device_id: device.id.clone(), error: Some("gone".into()) })
            .await
            .unwrap();
        assert_eq!(unchanged.status.state, IngestState::Idle);
        assert!(unchanged.status.last_error.is_none());
    }

    #[tokio::test]
    async fn metrics_update_can_set_state() {
        let (orchestrator, _) = setup(FakeWorker::default());
        let device = create(&orchestrator).await;
        let updated = orchestrator
            .record_metrics(
                &device.id,
                MetricsUpdate { fps: Some(12.5), state: Some(IngestState::Running), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(updated.status.state, IngestState::Running);
        assert_eq!(updated.status.fps, 12.5);
        assert!(updated.status.last_heartbeat_at.is_some());

        let err = orchestrator
            .record_metrics(&device.id, MetricsUpdate { fps: Some(-1.0), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
    }

    #[tokio::test]
    async fn stop_waits_for_pending_start() {
        let (orchestrator, worker) = setup(FakeWorker {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let device = create(&orchestrator).await;

        let starter = {
            let orchestrator = orchestrator.clone();
            let id = device.id.clone();
            tokio::spawn(async move { orchestrator.start(&id, StartRequest::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stopped = orchestrator.stop(&device.id).await.unwrap();
        starter.await.unwrap().unwrap();

        assert_eq!(stopped.status.state, IngestState::Idle);
        assert_eq!(worker.calls(), vec![format!("start:{}", device.id), format!("stop:{}", device.id)]);
    }

    #[tokio::test]
    async fn slow_worker_times_out() {
        let worker = Arc::new(FakeWorker {
            delay: Some(Duration::from_millis(500)),
            ..Default::default()
        });
        let orchestrator = DeviceOrchestrator::new(
            Arc::new(MemoryDeviceRepository::new()),
            worker,
            Duration::from_millis(50),
        );
        let device = create(&orchestrator).await;
        let err = orchestrator.start(&device.id, StartRequest::default()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));
    }

    #[tokio::test]
    async fn refresh_merges_worker_view() {
        let (orchestrator, worker) = setup(FakeWorker::default());
        let device = create(&orchestrator).await;
        *worker.session.lock().unwrap() = Some(IngestSessionStatus {
            device_id: device.id.clone(),
            state: IngestState::Error,
            fps: Some(0.0),
            bitrate_kbps: Some(0),
            last_keyframe_at: None,
            message: Some("decoder crashed".into()),
        });

        let status = orchestrator.status(&device.id, true).await.unwrap();
        assert_eq!(status.state, IngestState::Error);
        assert_eq!(status.last_error.as_deref(), Some("decoder crashed"));
    }

    #[tokio::test]
    async fn shutdown_stops_running_devices_and_tolerates_failures() {
        let (orchestrator, worker) = setup(FakeWorker::default());
        let running = create(&orchestrator).await;
        let idle = create(&orchestrator).await;
        orchestrator.start(&running.id, StartRequest::default()).await.unwrap();

        assert_eq!(orchestrator.shutdown().await, 1);
        assert_eq!(orchestrator.status(&running.id, false).await.unwrap().state, IngestState::Idle);
        assert!(!worker.calls().contains(&format!("stop:{}", idle.id)));

        orchestrator.start(&running.id, StartRequest::default()).await.unwrap();
        worker.fail.store(true, Ordering::SeqCst);
        assert_eq!(orchestrator.shutdown().await, 0);
    }

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let (orchestrator, _) = setup(FakeWorker::default());
        assert!(matches!(
            orchestrator.start("missing", StartRequest::default()).await,
            Err(BridgeError::NotFound(_))
        ));
        assert!(matches!(orchestrator.stop("missing").await, Err(BridgeError::NotFound(_))));
    }

    fn lock_entries(orchestrator: &DeviceOrchestrator) -> usize {
        orchestrator.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn unknown_ids_leave_no_lock_entries() {
        let (orchestrator, _) = setup(FakeWorker::default());
        for i in 0..500 {
            let id = format!("ghost-{i}");
            assert!(orchestrator.stop(&id).await.is_err());
            assert!(orchestrator.start(&id, StartRequest::default()).await.is_err());
            assert!(orchestrator
                .mark_offline(OfflineWebhook { device_id: id, error: None })
                .await
                .is_err());
        }
        assert_eq!(lock_entries(&orchestrator), 0);
    }

    #[tokio::test]
    async fn lock_entries_are_released_after_use() {
        let (orchestrator, _) = setup(FakeWorker {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let device = create(&orchestrator).await;

        let starter = {
            let orchestrator = orchestrator.clone();
            let id = device.id.clone();
            tokio::spawn(async move { orchestrator.start(&id, StartRequest::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(lock_entries(&orchestrator), 1);

        orchestrator.stop(&device.id).await.unwrap();
        starter.await.unwrap().unwrap();
        assert_eq!(lock_entries(&orchestrator), 0);
    }

    #[test]
    fn bare_address_gets_transport_scheme() {
        let device = Device::new(CreateDeviceRequest {
            name: "Gate".into(),
            transport: Transport::HttpMjpeg,
            address: Some("10.0.0.9/video.mjpg".into()),
            vendor: None,
            username: None,
            password: None,
            stream_url: None,
        });
        assert_eq!(resolve_source_url(&device).unwrap(), "http://10.0.0.9/video.mjpg");
    }
}
