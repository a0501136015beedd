//! Metrics collection and reporting for the link simulator.
//!
//! This module provides observable insights into link behavior:
//! - Throughput (bytes sent over the serial link)
//! - Frame-level statistics (sent, received, dropped)
//! - Error control outcomes (corrected, unreliable, undecodable)
//! - Contention and ring recovery counters
//!
//! # Thread Safety
//!
//! `LinkMetrics` is a plain struct. The sender, the receive task and the ring
//! scheduler share one instance through [`SharedMetrics`] and update it with
//! [`record`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Counters for one simulated link session.
#[derive(Debug, Clone)]
pub struct LinkMetrics {
    // === Timing ===
    /// When the session started
    pub start_time: Instant,

    /// When the session ended (set on completion)
    pub end_time: Option<Instant>,

    // === Sending ===
    /// Stuffed frame bytes written to the transport (jams excluded)
    pub bytes_sent: u64,

    /// Frames written to the transport
    pub frames_sent: u64,

    /// Frames abandoned after the collision limit
    pub frames_dropped: u64,

    /// Collisions signalled during send attempts
    pub collisions: u64,

    /// Jam markers written
    pub jams_sent: u64,

    // === Receiving ===
    /// Frames decoded by a receiver
    pub frames_received: u64,

    /// Frames whose single-bit error was repaired
    pub frames_corrected: u64,

    /// Frames delivered with an FCS mismatch left standing
    pub frames_unreliable: u64,

    /// Inbound byte blocks that failed to destuff or parse
    pub decode_failures: u64,

    /// Jam markers seen on the receive side
    pub jams_detected: u64,

    // === Ring ===
    /// Ring frames copied by their destination
    pub ring_deliveries: u64,

    /// Tokens issued by the monitor after a timeout
    pub tokens_regenerated: u64,

    /// Duplicate-token sets collapsed by the monitor
    pub duplicates_collapsed: u64,
}

impl LinkMetrics {
    /// Create new metrics with start time set to now.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            end_time: None,
            bytes_sent: 0,
            frames_sent: 0,
            frames_dropped: 0,
            collisions: 0,
            jams_sent: 0,
            frames_received: 0,
            frames_corrected: 0,
            frames_unreliable: 0,
            decode_failures: 0,
            jams_detected: 0,
            ring_deliveries: 0,
            tokens_regenerated: 0,
            duplicates_collapsed: 0,
        }
    }

    /// Mark the session as complete.
    pub fn complete(&mut self) {
        self.end_time = Some(Instant::now());
    }

    /// Get total duration (or current elapsed if not complete).
    pub fn duration(&self) -> Duration {
        match self.end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    /// Fraction of send attempts that ended in a drop.
    pub fn drop_rate(&self) -> f64 {
        let attempts = self.frames_sent + self.frames_dropped;
        if attempts == 0 {
            0.0
        } else {
            self.frames_dropped as f64 / attempts as f64
        }
    }

    /// Compute throughput in bytes/second.
    pub fn throughput_bps(&self) -> f64 {
        let duration_secs = self.duration().as_secs_f64();
        if duration_secs == 0.0 {
            0.0
        } else {
            self.bytes_sent as f64 / duration_secs
        }
    }

    /// One-line status shown under the send controls.
    pub fn status_line(&self, baud: u32) -> String {
        format!("Rate: {} baud | Bytes sent: {}", baud, self.bytes_sent)
    }

    /// Print a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n=== Link Summary ===");
        println!("Duration: {} ms", self.duration().as_millis());
        println!();

        println!("=== Sending ===");
        println!("Frames sent: {}", self.frames_sent);
        println!("Bytes sent: {}", self.bytes_sent);
        println!("Frames dropped: {} ({:.2}%)", self.frames_dropped, self.drop_rate() * 100.0);
        println!("Collisions: {}", self.collisions);
        println!("Jams sent: {}", self.jams_sent);
        println!();

        println!("=== Receiving ===");
        println!("Frames received: {}", self.frames_received);
        println!("Corrected: {}", self.frames_corrected);
        println!("Unreliable: {}", self.frames_unreliable);
        println!("Decode failures: {}", self.decode_failures);
        println!("Jams detected: {}", self.jams_detected);
        println!();

        if self.ring_deliveries + self.tokens_regenerated + self.duplicates_collapsed > 0 {
            println!("=== Ring ===");
            println!("Deliveries: {}", self.ring_deliveries);
            println!("Tokens regenerated: {}", self.tokens_regenerated);
            println!("Duplicate sets collapsed: {}", self.duplicates_collapsed);
            println!();
        }
    }

    /// Export metrics as a simple text format (for parsing/testing).
    pub fn export_text(&self) -> String {
        format!(
            "duration_ms={}\n\
             bytes_sent={}\n\
             frames_sent={}\n\
             frames_dropped={}\n\
             drop_rate={:.4}\n\
             collisions={}\n\
             jams_sent={}\n\
             frames_received={}\n\
             frames_corrected={}\n\
             frames_unreliable={}\n\
             decode_failures={}\n\
             jams_detected={}\n\
             ring_deliveries={}\n\
             tokens_regenerated={}\n\
             duplicates_collapsed={}\n",
            self.duration().as_millis(),
            self.bytes_sent,
            self.frames_sent,
            self.frames_dropped,
            self.drop_rate(),
            self.collisions,
            self.jams_sent,
            self.frames_received,
            self.frames_corrected,
            self.frames_unreliable,
            self.decode_failures,
            self.jams_detected,
            self.ring_deliveries,
            self.tokens_regenerated,
            self.duplicates_collapsed,
        )
    }
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics shared between tasks.
pub type SharedMetrics = Arc<Mutex<LinkMetrics>>;

/// Fresh shared metrics.
pub fn shared() -> SharedMetrics {
    Arc::new(Mutex::new(LinkMetrics::new()))
}

/// Apply an update to shared metrics.
pub fn record(metrics: &SharedMetrics, update: impl FnOnce(&mut LinkMetrics)) {
    let mut guard = metrics.lock().unwrap_or_else(PoisonError::into_inner);
    update(&mut guard);
}

/// Copy of the current counters.
pub fn snapshot(metrics: &SharedMetrics) -> LinkMetrics {
    metrics
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = LinkMetrics::new();
        assert!(metrics.end_time.is_none());
        assert!(metrics.duration().as_millis() < 100);
    }

    #[test]
    fn test_status_line() {
        let mut metrics = LinkMetrics::new();
        metrics.bytes_sent = 42;
        assert_eq!(metrics.status_line(9600), "Rate: 9600 baud | Bytes sent: 42");
    }

    #[test]
    fn test_drop_rate() {
        let mut metrics = LinkMetrics::new();
        assert_eq!(metrics.drop_rate(), 0.0);

        metrics.frames_sent = 3;
        metrics.frames_dropped = 1;
        assert_eq!(metrics.drop_rate(), 0.25);
    }

    #[test]
    fn test_throughput() {
        let mut metrics = LinkMetrics::new();
        metrics.bytes_sent = 1000;

        std::thread::sleep(Duration::from_millis(20));
        metrics.complete();

        assert!(metrics.throughput_bps() > 0.0);
    }

    #[test]
    fn test_shared_record() {
        let metrics = shared();
        record(&metrics, |m| m.collisions += 2);
        record(&metrics, |m| m.collisions += 1);
        assert_eq!(snapshot(&metrics).collisions, 3);
    }

    #[test]
    fn test_export_text() {
        let mut metrics = LinkMetrics::new();
        metrics.bytes_sent = 110;
        metrics.frames_sent = 10;
        metrics.jams_detected = 2;

        let text = metrics.export_text();
        assert!(text.contains("bytes_sent=110"));
        assert!(text.contains("frames_sent=10"));
        assert!(text.contains("jams_detected=2"));
    }
}
