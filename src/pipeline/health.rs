//! Health monitoring and metrics for pipeline

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::MediaKind;
use crate::assets::{HEALTH_INTERVAL, STALL_THRESHOLD};

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Health metrics for a pipeline
///
/// Counters of one run, updated by the stage threads and read by the
/// monitor. All fields use atomic operations for thread-safe access.
pub struct PipelineHealth {
    /// Frames turned into bitmaps
    pub frames_dithered: AtomicU64,

    /// PCM windows turned into tone bytes
    pub windows_analyzed: AtomicU64,

    /// Packets written to the sink
    pub packets_sent: AtomicU64,

    /// Bytes written to the sink
    pub bytes_sent: AtomicU64,

    /// Channel items discarded at shutdown (partial units)
    pub units_discarded: AtomicU64,

    /// Failed sink writes
    pub sink_failures: AtomicU64,

    /// Timestamp (as Unix microseconds) of the last packet written
    pub last_packet_time: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self {
            frames_dithered: AtomicU64::new(0),
            windows_analyzed: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            units_discarded: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            last_packet_time: AtomicU64::new(now_micros()),
        }
    }

    /// Record one unit converted by a transform stage
    pub fn record_unit(&self, kind: MediaKind) {
        match kind {
            MediaKind::Video => self.frames_dithered.fetch_add(1, Ordering::Relaxed),
            MediaKind::Audio => self.windows_analyzed.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a packet written to the sink
    pub fn record_packet(&self, size: usize) {
        self.last_packet_time.store(now_micros(), Ordering::Relaxed);
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_discarded(&self, items: usize) {
        self.units_discarded
            .fetch_add(items as u64, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_dithered(&self) -> u64 {
        self.frames_dithered.load(Ordering::Relaxed)
    }

    pub fn windows_analyzed(&self) -> u64 {
        self.windows_analyzed.load(Ordering::Relaxed)
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn units_discarded(&self) -> u64 {
        self.units_discarded.load(Ordering::Relaxed)
    }

    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    /// Get the timestamp of the last packet (Unix microseconds)
    pub fn last_packet_time(&self) -> u64 {
        self.last_packet_time.load(Ordering::Relaxed)
    }

    /// Check if the output has stalled (no packet for given duration)
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let elapsed_micros = now_micros().saturating_sub(self.last_packet_time());
        elapsed_micros > threshold.as_micros() as u64
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_dithered: self.frames_dithered(),
            windows_analyzed: self.windows_analyzed(),
            packets_sent: self.packets_sent(),
            bytes_sent: self.bytes_sent(),
            units_discarded: self.units_discarded(),
            sink_failures: self.sink_failures(),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSummary {
    pub frames_dithered: u64,
    pub windows_analyzed: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub units_discarded: u64,
    pub sink_failures: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} packets ({} bytes), {} frames dithered, {} windows analyzed, {} items discarded, {} sink failures",
            self.packets_sent,
            self.bytes_sent,
            self.frames_dithered,
            self.windows_analyzed,
            self.units_discarded,
            self.sink_failures
        )
    }
}

/// Health alert types
#[derive(Debug, Clone, PartialEq)]
pub enum HealthAlert {
    /// No packet was written for the threshold duration
    Stalled { duration: Duration },

    /// New sink write failures since the last check
    SinkFailures { count: u64 },
}

impl std::fmt::Display for HealthAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthAlert::Stalled { duration } => {
                write!(f, "No packet written for {:?}", duration)
            }
            HealthAlert::SinkFailures { count } => {
                write!(f, "Sink write failures: {}", count)
            }
        }
    }
}

/// Health monitoring service
///
/// Periodically checks pipeline health and sends alerts when issues are detected.
pub struct HealthMonitor {
    health: Arc<PipelineHealth>,
    alert_tx: mpsc::Sender<HealthAlert>,
    check_interval: Duration,
    stall_threshold: Duration,
}

impl HealthMonitor {
    pub fn new(health: Arc<PipelineHealth>, alert_tx: mpsc::Sender<HealthAlert>) -> Self {
        Self {
            health,
            alert_tx,
            check_interval: HEALTH_INTERVAL,
            stall_threshold: STALL_THRESHOLD,
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }

    /// Run the health monitor until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.check_interval);
        // the first tick completes immediately
        interval.tick().await;
        let mut last_sink_failures = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if self.health.is_stalled(self.stall_threshold) {
                let _ = self
                    .alert_tx
                    .send(HealthAlert::Stalled {
                        duration: self.stall_threshold,
                    })
                    .await;
            }

            let sink_failures = self.health.sink_failures();
            if sink_failures > last_sink_failures {
                let _ = self
                    .alert_tx
                    .send(HealthAlert::SinkFailures {
                        count: sink_failures - last_sink_failures,
                    })
                    .await;
                last_sink_failures = sink_failures;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_metrics() {
        let health = PipelineHealth::new();

        health.record_unit(MediaKind::Video);
        health.record_unit(MediaKind::Video);
        health.record_unit(MediaKind::Audio);
        health.record_packet(1025);
        health.record_packet(1025);
        health.record_discarded(300);
        health.record_sink_failure();

        let summary = health.summary();
        assert_eq!(summary.frames_dithered, 2);
        assert_eq!(summary.windows_analyzed, 1);
        assert_eq!(summary.packets_sent, 2);
        assert_eq!(summary.bytes_sent, 2050);
        assert_eq!(summary.units_discarded, 300);
        assert_eq!(summary.sink_failures, 1);
        assert!(summary.to_string().starts_with("Health: 2 packets (2050 bytes)"));
    }

    #[test]
    fn test_stall_detection() {
        let health = PipelineHealth::new();

        assert!(!health.is_stalled(Duration::from_secs(1)));

        health.record_packet(10);
        std::thread::sleep(Duration::from_millis(150));

        assert!(health.is_stalled(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_monitor_reports_sink_failures() {
        let health = Arc::new(PipelineHealth::new());
        let (alert_tx, mut alert_rx) = mpsc::channel(8);
        let monitor = HealthMonitor::new(health.clone(), alert_tx)
            .with_check_interval(Duration::from_millis(10))
            .with_stall_threshold(Duration::from_secs(60));

        health.record_sink_failure();
        health.record_sink_failure();

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };

        let alert = alert_rx.recv().await.unwrap();
        assert_eq!(alert, HealthAlert::SinkFailures { count: 2 });

        cancel.cancel();
        task.await.unwrap();
    }
}
