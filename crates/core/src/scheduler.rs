//! Scheduler task that drives a [`TokenRing`].
//!
//! The task owns the ring outright. Operators talk to it through the command
//! channel; observers read the latest [`RingSnapshot`] from a watch channel
//! and copied frames from the delivery channel. Between ticks the task rests
//! for the dwell time, which is how long the token stays at a station.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::token_ring::{RingCommand, RingDelivery, RingSnapshot, TokenRing};

/// Handles returned by [`spawn_ring`].
pub struct RingChannels {
    /// Operator commands, applied at the start of the next tick
    pub commands: mpsc::UnboundedSender<RingCommand>,
    /// Ring state after the most recent tick
    pub snapshots: watch::Receiver<Arc<RingSnapshot>>,
    /// Frames copied by their destination
    pub deliveries: mpsc::UnboundedReceiver<RingDelivery>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
    /// Resolves to the ring once the task stops
    pub join: JoinHandle<TokenRing>,
}

/// Spawn the ring scheduler.
pub fn spawn_ring(ring: TokenRing, dwell: Duration) -> RingChannels {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(ring.snapshot()));
    let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let join = tokio::spawn(run(
        ring,
        dwell,
        command_rx,
        snapshot_tx,
        delivery_tx,
        cancel.clone(),
    ));

    RingChannels {
        commands: command_tx,
        snapshots: snapshot_rx,
        deliveries: delivery_rx,
        cancel,
        join,
    }
}

async fn run(
    mut ring: TokenRing,
    dwell: Duration,
    mut commands: mpsc::UnboundedReceiver<RingCommand>,
    snapshots: watch::Sender<Arc<RingSnapshot>>,
    deliveries: mpsc::UnboundedSender<RingDelivery>,
    cancel: CancellationToken,
) -> TokenRing {
    info!(dwell_ms = dwell.as_millis() as u64, "ring scheduler started");
    let mut ticks = 0u64;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        while let Ok(command) = commands.try_recv() {
            ring.submit(command);
        }

        ticks += 1;
        match ring.tick(Instant::now()) {
            Ok(report) => {
                debug!(
                    tick = ticks,
                    visited = report.visited.as_deref().unwrap_or("-"),
                    delivered = report.delivered.len(),
                    held = report.held,
                    "ring tick"
                );
                for delivery in report.delivered {
                    // Nobody listening is fine
                    let _ = deliveries.send(delivery);
                }
            }
            Err(e) => error!(tick = ticks, "ring halted: {e}"),
        }
        let _ = snapshots.send(Arc::new(ring.snapshot()));

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(dwell) => {}
        }
    }

    info!(ticks, "ring scheduler stopped");
    ring
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RingConfig;
    use crate::events::MemorySink;
    use crate::metrics::shared;
    use crate::token_ring::{RingCondition, Station};

    fn ring() -> TokenRing {
        TokenRing::new(
            vec![
                Station::new("A", 1, 1),
                Station::new("B", 2, 1),
                Station::new("C", 3, 1),
            ],
            &RingConfig::default(),
            Arc::new(MemorySink::new()),
            shared(),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_circulates() {
        let mut channels = spawn_ring(ring(), Duration::from_secs(3));

        let mut holders = Vec::new();
        for _ in 0..4 {
            channels.snapshots.changed().await.unwrap();
            let snapshot = channels.snapshots.borrow_and_update().clone();
            assert_eq!(snapshot.condition, RingCondition::Normal);
            holders.push(snapshot.holder().map(|s| s.name.clone()).unwrap());
        }

        assert_eq!(holders, vec!["B", "C", "A", "B"]);
        channels.cancel.cancel();
        channels.join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_delivered_through_channels() {
        let mut channels = spawn_ring(ring(), Duration::from_secs(3));

        // After the first tick the token rests at B
        channels.snapshots.changed().await.unwrap();
        channels
            .commands
            .send(RingCommand::Send {
                from: 2,
                to: 1,
                message: "hello A".to_string(),
            })
            .unwrap();

        let delivery = channels.deliveries.recv().await.unwrap();
        assert_eq!(delivery.station, "A");
        assert_eq!(delivery.frame.text(), "hello A");
        assert!(delivery.integrity.is_ok());

        channels.cancel.cancel();
        let ring = channels.join.await.unwrap();
        assert_eq!(ring.queue_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_task() {
        let channels = spawn_ring(ring(), Duration::from_secs(3));
        channels.cancel.cancel();
        let ring = channels.join.await.unwrap();
        assert_eq!(ring.token_count(), 1);
    }
}
