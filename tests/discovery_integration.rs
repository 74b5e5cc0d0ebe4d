//! Stream discovery against a loopback camera that challenges for Basic credentials.

use anyhow::Result;
use common::Transport;
use std::time::Duration;
use stream_probe::{ProbeConfig, ProbeOutcome, ProbePass, ProbeRequest, ProbeScheduler};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// base64("admin:pw")
const EXPECTED_AUTH: &str = "Authorization: Basic YWRtaW46cHc=";

async fn read_request(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            return Some(String::from_utf8_lossy(&buf).into_owned());
        }
    }
}

fn cseq(request: &str) -> &str {
    request
        .lines()
        .find_map(|l| l.strip_prefix("CSeq:"))
        .map(str::trim)
        .unwrap_or("1")
}

async fn serve_camera(mut socket: TcpStream) {
    while let Some(request) = read_request(&mut socket).await {
        let request_line = request.lines().next().unwrap_or_default();
        let response = if !request.contains(EXPECTED_AUTH) {
            format!(
                "RTSP/1.0 401 Unauthorized\r\nCSeq: {}\r\nWWW-Authenticate: Basic realm=\"camera\"\r\n\r\n",
                cseq(&request)
            )
        } else if request_line.contains("/stream1 ") {
            format!(
                "RTSP/1.0 200 OK\r\nCSeq: {}\r\nContent-Type: application/sdp\r\nContent-Length: 0\r\n\r\n",
                cseq(&request)
            )
        } else {
            format!("RTSP/1.0 404 Not Found\r\nCSeq: {}\r\n\r\n", cseq(&request))
        };
        if socket.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

async fn spawn_camera() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_camera(socket));
        }
    });
    Ok(port)
}

fn scheduler() -> Result<ProbeScheduler> {
    ProbeScheduler::from_config(&ProbeConfig {
        light_timeout: Duration::from_secs(2),
        deep_probe_bin: "/nonexistent/deep-probe".into(),
        ..Default::default()
    })
}

#[tokio::test]
async fn credentials_unlock_stream_path() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let port = spawn_camera().await?;

    let request = ProbeRequest::new(format!("127.0.0.1:{port}"))
        .with_transport(Transport::Rtsp)
        .with_credentials("admin", "pw");
    let report = scheduler()?.run(&request).await?;

    assert_eq!(report.outcome, ProbeOutcome::Verified);
    assert_eq!(report.winning_pass, Some(ProbePass::Credentialed));
    assert!(!report.deep_probe_available);
    let winner = report.winner.as_ref().map(|c| c.url().to_string()).unwrap_or_default();
    assert_eq!(winner, format!("rtsp://admin:pw@127.0.0.1:{port}/stream1"));
    Ok(())
}

#[tokio::test]
async fn missing_credentials_reported_as_auth_required() -> Result<()> {
    let port = spawn_camera().await?;

    let request = ProbeRequest::new(format!("127.0.0.1:{port}")).with_transport(Transport::Rtsp);
    let report = scheduler()?.run(&request).await?;

    assert_eq!(report.outcome, ProbeOutcome::AuthenticationRequired);
    assert!(report.winner.is_none());
    assert!(report.results.iter().all(|r| r.requires_auth));
    assert!(report.results.iter().all(|r| r.probe_type.is_lightweight()));
    Ok(())
}

#[tokio::test]
async fn wrong_credentials_reported_as_rejected() -> Result<()> {
    let port = spawn_camera().await?;

    let request = ProbeRequest::new(format!("127.0.0.1:{port}"))
        .with_transport(Transport::Rtsp)
        .with_credentials("admin", "wrong");
    let report = scheduler()?.run(&request).await?;

    assert_eq!(report.outcome, ProbeOutcome::CredentialsRejected);
    assert!(report.winner.is_none());
    Ok(())
}
