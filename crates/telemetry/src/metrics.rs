use lazy_static::lazy_static;
use prometheus::{GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Device metrics ====
    pub static ref BRIDGE_DEVICES: IntGauge = {
        let metric = IntGauge::new("bridge_devices", "Number of registered devices")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref BRIDGE_DEVICE_FPS: GaugeVec = {
        let metric = GaugeVec::new(
            Opts::new("bridge_device_fps", "Last reported ingest frame rate per device"),
            &["device_id"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref BRIDGE_DEVICE_BITRATE: GaugeVec = {
        let metric = GaugeVec::new(
            Opts::new(
                "bridge_device_bitrate_kbps",
                "Last reported ingest bitrate per device in kbit/s",
            ),
            &["device_id"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Probe metrics ====
    pub static ref BRIDGE_PROBE_ATTEMPTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "bridge_probe_attempts_total",
                "Total number of candidate probe attempts",
            ),
            &["probe_type", "result"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref BRIDGE_PROBE_RUNS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("bridge_probe_runs_total", "Total number of discovery runs"),
            &["outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Ingest / playback metrics ====
    pub static ref BRIDGE_INGEST_OPERATIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "bridge_ingest_operations_total",
                "Total number of ingest worker operations",
            ),
            &["operation", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref BRIDGE_PLAYBACK_TOKENS_ISSUED: IntCounter = {
        let metric = IntCounter::new(
            "bridge_playback_tokens_issued_total",
            "Total number of playback tokens issued",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Helper function to encode metrics for Prometheus scraping
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_gauges_accessible() {
        BRIDGE_DEVICE_FPS.with_label_values(&["cam-test"]).set(12.5);
        assert_eq!(BRIDGE_DEVICE_FPS.with_label_values(&["cam-test"]).get(), 12.5);
    }

    #[test]
    fn test_probe_counters_accessible() {
        let before = BRIDGE_PROBE_ATTEMPTS
            .with_label_values(&["rtsp_describe", "success"])
            .get();
        BRIDGE_PROBE_ATTEMPTS
            .with_label_values(&["rtsp_describe", "success"])
            .inc();
        assert_eq!(
            BRIDGE_PROBE_ATTEMPTS
                .with_label_values(&["rtsp_describe", "success"])
                .get(),
            before + 1
        );
    }

    #[test]
    fn test_encode_metrics_contains_device_gauge() {
        BRIDGE_DEVICES.set(2);
        let encoded = encode_metrics().expect("metrics should encode");
        assert!(encoded.contains("bridge_devices"));
    }
}
