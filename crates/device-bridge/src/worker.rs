use anyhow::{Context, Result};
use async_trait::async_trait;
use common::ingest::{IngestSessionStatus, IngestStartRequest, IngestStopRequest};
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::{debug, instrument};

/// The external service that turns a source URL into WebRTC/HLS output.
#[async_trait]
pub trait IngestWorker: Send + Sync {
    async fn start(&self, request: &IngestStartRequest) -> Result<()>;
    /// Succeeds when the worker has no session for the device.
    async fn stop(&self, device_id: &str) -> Result<()>;
    /// `None` when the worker has no session for the device.
    async fn status(&self, device_id: &str) -> Result<Option<IngestSessionStatus>>;
}

pub struct HttpIngestWorker {
    base: Url,
    client: reqwest::Client,
}

impl HttpIngestWorker {
    pub fn new(base: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3).min(timeout))
            .timeout(timeout)
            .build()
            .context("failed to build ingest worker client")?;
        Ok(Self { base, client })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base.join(path).context("invalid ingest worker endpoint")
    }
}

#[async_trait]
impl IngestWorker for HttpIngestWorker {
    #[instrument(skip_all, fields(device_id = %request.device_id))]
    async fn start(&self, request: &IngestStartRequest) -> Result<()> {
        let resp = self
            .client
            .post(self.endpoint("sessions/start")?)
            .json(request)
            .send()
            .await
            .context("ingest start request failed")?;
        resp.error_for_status()
            .context("ingest start returned error status")?;
        Ok(())
    }

    #[instrument(skip_all, fields(device_id = %device_id))]
    async fn stop(&self, device_id: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.endpoint("sessions/stop")?)
            .json(&IngestStopRequest {
                device_id: device_id.to_string(),
            })
            .send()
            .await
            .context("ingest stop request failed")?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("ingest worker had no session to stop");
            return Ok(());
        }
        resp.error_for_status()
            .context("ingest stop returned error status")?;
        Ok(())
    }

    #[instrument(skip_all, fields(device_id = %device_id))]
    async fn status(&self, device_id: &str) -> Result<Option<IngestSessionStatus>> {
        let url = self.endpoint(&format!("sessions/{}", urlencoding::encode(device_id)))?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("ingest status request failed")?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp
            .error_for_status()
            .context("ingest status returned error status")?
            .json::<IngestSessionStatus>()
            .await
            .context("invalid ingest status body")?;
        Ok(Some(status))
    }
}

/// Whether `err` was caused by an HTTP timeout.
pub fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
        .any(|e| e.is_timeout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::StatusCode as AxumStatus,
        routing::{get, post},
        Json, Router,
    };
    use common::{IngestState, PlaybackTarget};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    async fn spawn(router: Router) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service()).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/api/")).unwrap()
    }

    fn start_request() -> IngestStartRequest {
        IngestStartRequest {
            device_id: "cam-1".into(),
            source_url: "rtsp://10.0.0.2/stream1".into(),
            profile: "default".into(),
            targets: vec![PlaybackTarget::Hls],
        }
    }

    #[tokio::test]
    async fn start_posts_json_and_surfaces_errors() {
        let seen = Arc::new(Mutex::new(Vec::<IngestStartRequest>::new()));
        let log = seen.clone();
        let router = Router::new().route(
            "/api/sessions/start",
            post(move |Json(req): Json<IngestStartRequest>| {
                let log = log.clone();
                async move {
                    let reject = req.source_url.contains("bad");
                    log.lock().unwrap().push(req);
                    if reject {
                        AxumStatus::UNPROCESSABLE_ENTITY
                    } else {
                        AxumStatus::ACCEPTED
                    }
                }
            }),
        );
        let worker = HttpIngestWorker::new(spawn(router).await, Duration::from_secs(2)).unwrap();

        worker.start(&start_request()).await.unwrap();
        let mut bad = start_request();
        bad.source_url = "rtsp://bad/".into();
        assert!(worker.start(&bad).await.is_err());
        assert_eq!(seen.lock().unwrap()[0].targets, vec![PlaybackTarget::Hls]);
    }

    #[tokio::test]
    async fn stop_treats_missing_session_as_done() {
        let router = Router::new().route("/api/sessions/stop", post(|| async { AxumStatus::NOT_FOUND }));
        let worker = HttpIngestWorker::new(spawn(router).await, Duration::from_secs(2)).unwrap();
        worker.stop("cam-1").await.unwrap();
    }

    #[tokio::test]
    async fn status_decodes_session() {
        let router = Router::new().route(
            "/api/sessions/:id",
            get(|Path(id): Path<String>| async move {
                if id != "cam-1" {
                    return Err(AxumStatus::NOT_FOUND);
                }
                Ok(Json(IngestSessionStatus {
                    device_id: id,
                    state: IngestState::Running,
                    fps: Some(25.0),
                    bitrate_kbps: Some(2048),
                    last_keyframe_at: None,
                    message: None,
                }))
            }),
        );
        let worker = HttpIngestWorker::new(spawn(router).await, Duration::from_secs(2)).unwrap();

        let status = worker.status("cam-1").await.unwrap().unwrap();
        assert_eq!(status.state, IngestState::Running);
        assert_eq!(status.bitrate_kbps, Some(2048));
        assert!(worker.status("cam-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn slow_worker_reports_timeout() {
        let router = Router::new().route(
            "/api/sessions/start",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                AxumStatus::OK
            }),
        );
        let worker = HttpIngestWorker::new(spawn(router).await, Duration::from_millis(200)).unwrap();
        let err = worker.start(&start_request()).await.unwrap_err();
        assert!(is_timeout(&err));
    }
}
