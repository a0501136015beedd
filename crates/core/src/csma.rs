//! CSMA/CD channel access.
//!
//! One call to [`CsmaSender::send`] walks a single frame through the
//! contention state machine:
//!
//! ```text
//!            busy: wait busy_poll
//!           +-------------------+
//!           v                   |
//!  +---> SENSING ---------------+
//!  |        | idle
//!  |        v
//!  |   collision? --no--> TRANSMITTED
//!  |        | yes
//!  |        v
//!  |   send JAM, attempt += 1
//!  |        |
//!  |        +--- attempt == max --> DROPPED
//!  |        v
//!  +--- wait backoff(attempt)
//! ```
//!
//! Carrier sense and collision detection are questions put to a
//! [`FaultModel`]; backoff sampling uses its own seeded RNG. A dropped frame
//! is a normal outcome, not an error. Only transport failures are errors.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::LinkConfig;
use crate::error::TransportError;
use crate::events::{LinkEvent, SharedSink};
use crate::fault::{FaultModel, RandomFaults};
use crate::metrics::{record, SharedMetrics};
use crate::transport::Transport;

/// Reserved collision marker. Sent unstuffed; a stuffed frame never starts with it.
pub const JAM_SIGNAL: &[u8] = b"JAM";

/// Backoff exponent cap.
pub const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Backoff slots are hundredths of a second.
const SLOT: Duration = Duration::from_millis(10);

/// Sample the binary exponential backoff delay after `attempt` collisions.
///
/// Uniform over `[0, 2^min(attempt, 10) - 1]` slots of 10 ms.
pub fn backoff<R: Rng + ?Sized>(attempt: u32, rng: &mut R) -> Duration {
    let k = attempt.min(MAX_BACKOFF_EXPONENT);
    let upper = (1u32 << k) - 1;
    if upper == 0 {
        return Duration::ZERO;
    }
    SLOT * rng.gen_range(0..=upper)
}

/// Largest delay [`backoff`] can return for `attempt`.
pub fn max_backoff(attempt: u32) -> Duration {
    SLOT * ((1u32 << attempt.min(MAX_BACKOFF_EXPONENT)) - 1)
}

/// Per-frame contention record; discarded when the send finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelState {
    pub attempt_count: u32,
    pub last_backoff: Duration,
}

/// Terminal state of one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame written after `collisions` collided attempts
    Transmitted { collisions: u32, bytes: usize },
    /// Frame abandoned after `attempts` collisions
    Dropped { attempts: u32 },
}

/// Contention-based sender bound to one transport.
pub struct CsmaSender<T: Transport> {
    transport: T,
    faults: Box<dyn FaultModel>,
    rng: ChaCha8Rng,
    busy_poll: Duration,
    max_attempts: u32,
    sink: SharedSink,
    metrics: SharedMetrics,
}

impl<T: Transport> CsmaSender<T> {
    /// Sender with the reference timing: 500 ms busy poll, drop on the 2nd collision.
    pub fn new(
        transport: T,
        faults: Box<dyn FaultModel>,
        seed: u64,
        sink: SharedSink,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            transport,
            faults,
            rng: ChaCha8Rng::seed_from_u64(seed),
            busy_poll: Duration::from_millis(500),
            max_attempts: 2,
            sink,
            metrics,
        }
    }

    /// Sender whose channel follows the configured random fault model.
    pub fn from_config(
        transport: T,
        config: &LinkConfig,
        sink: SharedSink,
        metrics: SharedMetrics,
    ) -> Self {
        let faults = RandomFaults::new(config.fault_config());
        // Offset keeps the backoff stream independent of the fault stream
        Self::new(
            transport,
            Box::new(faults),
            config.csma.seed.wrapping_add(1),
            sink,
            metrics,
        )
        .with_busy_poll(config.csma.busy_poll())
        .with_max_attempts(config.csma.max_attempts)
    }

    pub fn with_busy_poll(mut self, busy_poll: Duration) -> Self {
        self.busy_poll = busy_poll;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Send one stuffed frame through the contention state machine.
    ///
    /// # Errors
    /// Any transport failure, after reporting it to the event sink.
    pub async fn send(&mut self, stuffed: &[u8]) -> Result<SendOutcome, TransportError> {
        let mut state = ChannelState::default();

        loop {
            if self.faults.is_channel_busy() {
                debug!(wait_ms = self.busy_poll.as_millis() as u64, "channel busy");
                self.sink.emit(LinkEvent::ChannelBusy {
                    wait: self.busy_poll,
                });
                sleep(self.busy_poll).await;
                continue;
            }

            if self.faults.is_collision() {
                self.write(JAM_SIGNAL).await?;
                state.attempt_count += 1;
                record(&self.metrics, |m| {
                    m.collisions += 1;
                    m.jams_sent += 1;
                });

                if state.attempt_count >= self.max_attempts {
                    warn!(attempts = state.attempt_count, "frame dropped");
                    record(&self.metrics, |m| m.frames_dropped += 1);
                    self.sink.emit(LinkEvent::FrameDropped {
                        attempts: state.attempt_count,
                    });
                    return Ok(SendOutcome::Dropped {
                        attempts: state.attempt_count,
                    });
                }

                state.last_backoff = backoff(state.attempt_count, &mut self.rng);
                debug!(
                    attempt = state.attempt_count,
                    backoff_ms = state.last_backoff.as_millis() as u64,
                    "collision"
                );
                self.sink.emit(LinkEvent::Collision {
                    attempt: state.attempt_count,
                    backoff: state.last_backoff,
                });
                sleep(state.last_backoff).await;
                continue;
            }

            self.write(stuffed).await?;
            record(&self.metrics, |m| {
                m.bytes_sent += stuffed.len() as u64;
                m.frames_sent += 1;
            });
            self.sink.emit(LinkEvent::FrameSent {
                port: self.transport.name().to_string(),
                bytes: stuffed.len(),
            });
            return Ok(SendOutcome::Transmitted {
                collisions: state.attempt_count,
                bytes: stuffed.len(),
            });
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if let Err(e) = self.transport.transmit(bytes).await {
            self.sink.emit(LinkEvent::TransportFailed {
                port: self.transport.name().to_string(),
                reason: e.to_string(),
            });
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::fault::ScriptedFaults;
    use crate::metrics::{shared, snapshot};
    use crate::transport::SerialLink;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn sender(
        faults: ScriptedFaults,
    ) -> (
        CsmaSender<crate::transport::SerialPort>,
        crate::transport::SerialPort,
        MemorySink,
        SharedMetrics,
    ) {
        let (com1, com2) = SerialLink::pair("COM1", "COM2");
        let sink = MemorySink::new();
        let metrics = shared();
        let sender = CsmaSender::new(
            com1,
            Box::new(faults),
            7,
            Arc::new(sink.clone()),
            metrics.clone(),
        );
        (sender, com2, sink, metrics)
    }

    #[test]
    fn test_first_attempt_backoff_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..100 {
            let d = backoff(1, &mut rng);
            assert!(d == Duration::ZERO || d == Duration::from_millis(10));
        }
        assert_eq!(backoff(0, &mut rng), Duration::ZERO);
    }

    #[test]
    fn test_backoff_cap() {
        assert_eq!(max_backoff(10), Duration::from_millis(10_230));
        assert_eq!(max_backoff(16), max_backoff(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_channel_transmits() {
        let (mut sender, mut com2, sink, metrics) = sender(ScriptedFaults::new());

        let outcome = sender.send(b"frame").await.unwrap();

        assert_eq!(
            outcome,
            SendOutcome::Transmitted {
                collisions: 0,
                bytes: 5
            }
        );
        assert_eq!(com2.read_available().await.unwrap(), b"frame");
        assert_eq!(snapshot(&metrics).bytes_sent, 5);
        assert_eq!(sink.count(|e| matches!(e, LinkEvent::FrameSent { .. })), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_colliding_channel_drops_after_two() {
        let (mut sender, mut com2, sink, metrics) =
            sender(ScriptedFaults::new().collide_always());

        let outcome = sender.send(b"frame").await.unwrap();

        assert_eq!(outcome, SendOutcome::Dropped { attempts: 2 });
        // Two jams and never the frame itself
        assert_eq!(sender.transport().stats().writes, 2);
        assert_eq!(com2.read_available().await.unwrap(), b"JAMJAM");

        let m = snapshot(&metrics);
        assert_eq!(m.collisions, 2);
        assert_eq!(m.frames_dropped, 1);
        assert_eq!(m.bytes_sent, 0);
        assert_eq!(sink.count(|e| matches!(e, LinkEvent::Collision { .. })), 1);
        assert_eq!(
            sink.count(|e| matches!(e, LinkEvent::FrameDropped { attempts: 2 })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_does_not_count_as_attempt() {
        let faults = ScriptedFaults::new()
            .busy([true, true, true, false, false])
            .collisions([true, false]);
        let (mut sender, mut com2, sink, _) = sender(faults);

        let outcome = sender.send(b"x").await.unwrap();

        assert_eq!(
            outcome,
            SendOutcome::Transmitted {
                collisions: 1,
                bytes: 1
            }
        );
        assert_eq!(sink.count(|e| matches!(e, LinkEvent::ChannelBusy { .. })), 3);
        assert_eq!(com2.read_available().await.unwrap(), b"JAMx");
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_wait_uses_poll_interval() {
        let faults = ScriptedFaults::new().busy([true, true]);
        let (sender, _com2, _, _) = sender(faults);
        let mut sender = sender.with_busy_poll(Duration::from_millis(500));

        let start = tokio::time::Instant::now();
        sender.send(b"x").await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_propagates() {
        let (mut sender, mut com2, sink, _) = sender(ScriptedFaults::new());
        com2.close().await;

        let result = sender.send(b"x").await;

        assert!(matches!(result, Err(TransportError::Closed { .. })));
        assert_eq!(
            sink.count(|e| matches!(e, LinkEvent::TransportFailed { .. })),
            1
        );
    }

    proptest! {
        #[test]
        fn prop_backoff_within_bound(attempt in 0u32..40, seed in any::<u64>()) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let d = backoff(attempt, &mut rng);
            let bound = ((1u64 << attempt.min(10)) - 1) as f64 / 100.0;
            prop_assert!(d.as_secs_f64() <= bound + 1e-9);
            prop_assert!(d <= max_backoff(attempt));
        }
    }
}
