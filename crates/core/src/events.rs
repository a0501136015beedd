//! Human-readable status events and the sinks that receive them.
//!
//! The engine reports what it is doing as [`LinkEvent`] values. A UI renders
//! their `Display` form as status lines; [`TracingSink`] routes them into the
//! `tracing` pipeline at the level returned by [`LinkEvent::level`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Level;

use crate::crc::BitPosition;

/// Something worth telling the operator about.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Frame handed to the transport
    FrameSent { port: String, bytes: usize },

    /// Carrier sense found the medium busy
    ChannelBusy { wait: Duration },

    /// Transmission collided; a jam was sent and backoff chosen
    Collision { attempt: u32, backoff: Duration },

    /// Frame abandoned after the collision limit
    FrameDropped { attempts: u32 },

    /// Jam marker seen on the receive side
    JamDetected { port: String },

    /// Bus frame decoded
    FrameReceived {
        /// Decoded flag, e.g. "$f"
        flag: String,
        destination: u8,
        source: u8,
        text: String,
        fcs_hex: String,
        status: String,
    },

    /// Single-bit error repaired
    ErrorCorrected { position: BitPosition },

    /// Inbound bytes could not be decoded and were discarded
    DecodeFailed { reason: String, raw_hex: String },

    /// Station received the token
    TokenReceived { station: String },

    /// Token moved on
    TokenPassed { from: String, to: String },

    /// Station tried to send without the token
    NoToken { station: String },

    /// Ring frames placed on the ring
    RingFrameQueued {
        source: String,
        destination: String,
        segments: usize,
        priority: u8,
    },

    /// Priority gate kept a frame on the ring
    PriorityHeld {
        station: String,
        source: String,
        destination: String,
    },

    /// Ring frame copied by its destination
    RingFrameDelivered {
        station: String,
        source: String,
        sequence: u8,
        text: String,
        status: String,
    },

    /// Nothing to do at this station
    NothingQueued { station: String },

    /// Station skipped because it is inactive
    StationSkipped { station: String },

    /// Station became the ring monitor
    MonitorElected { station: String },

    /// Monitor left the ring
    MonitorLost { station: String },

    /// No active station can be monitor
    MonitorAbsent,

    /// Monitor found no token within the timeout and issued a new one
    TokenRegenerated { station: String, idle: Duration },

    /// Monitor found several tokens and collapsed them to one
    DuplicateTokensCollapsed { count: usize, station: String },

    /// Operator fabricated an extra token
    DuplicateTokenCreated { station: String },

    /// Operator removed the circulating token
    TokenDropped,

    /// Operator changed a station
    StationUpdated { station: String, detail: String },

    /// Operator command was refused
    CommandRejected { reason: String },

    /// Transport failed; the task reporting it has stopped
    TransportFailed { port: String, reason: String },
}

impl LinkEvent {
    /// Log level for this event.
    pub fn level(&self) -> Level {
        match self {
            LinkEvent::TransportFailed { .. } | LinkEvent::MonitorAbsent => Level::ERROR,
            LinkEvent::FrameDropped { .. }
            | LinkEvent::DecodeFailed { .. }
            | LinkEvent::NoToken { .. }
            | LinkEvent::MonitorLost { .. }
            | LinkEvent::TokenRegenerated { .. }
            | LinkEvent::DuplicateTokensCollapsed { .. }
            | LinkEvent::CommandRejected { .. } => Level::WARN,
            LinkEvent::ChannelBusy { .. }
            | LinkEvent::TokenReceived { .. }
            | LinkEvent::TokenPassed { .. }
            | LinkEvent::PriorityHeld { .. }
            | LinkEvent::NothingQueued { .. }
            | LinkEvent::StationSkipped { .. } => Level::DEBUG,
            _ => Level::INFO,
        }
    }
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::FrameSent { port, bytes } => write!(f, "{port}: frame sent ({bytes} bytes)"),
            LinkEvent::ChannelBusy { wait } => {
                write!(f, "Channel busy, waiting {:.3} s", wait.as_secs_f64())
            }
            LinkEvent::Collision { attempt, backoff } => write!(
                f,
                "Jam signal sent. Collision {attempt}, waiting {:.3} s",
                backoff.as_secs_f64()
            ),
            LinkEvent::FrameDropped { attempts } => {
                write!(f, "Frame dropped after {attempts} attempts")
            }
            LinkEvent::JamDetected { port } => {
                write!(f, "{port}: jam signal detected, collision occurred")
            }
            LinkEvent::FrameReceived {
                flag,
                destination,
                source,
                text,
                fcs_hex,
                status,
            } => write!(
                f,
                "{flag} | Dest: {destination} | Src: {source} | Data: {text} | FCS: {fcs_hex} [{status}]"
            ),
            LinkEvent::ErrorCorrected { position } => write!(
                f,
                "Single-bit error corrected at byte {}, bit {}",
                position.byte, position.bit
            ),
            LinkEvent::DecodeFailed { reason, raw_hex } => {
                write!(f, "Discarded frame ({reason}): {raw_hex}")
            }
            LinkEvent::TokenReceived { station } => write!(f, "Station {station} received the token"),
            LinkEvent::TokenPassed { from, to } => {
                write!(f, "Station {from} passed the token to Station {to}")
            }
            LinkEvent::NoToken { station } => {
                write!(f, "Station {station}: no token, cannot send")
            }
            LinkEvent::RingFrameQueued {
                source,
                destination,
                segments,
                priority,
            } => write!(
                f,
                "Station {source} queued {segments} frame(s) for Station {destination} with priority {priority}"
            ),
            LinkEvent::PriorityHeld {
                station,
                source,
                destination,
            } => write!(
                f,
                "Token at Station {station}. Frame {source} -> {destination} held by priority, re-queued"
            ),
            LinkEvent::RingFrameDelivered {
                station,
                source,
                sequence,
                text,
                status,
            } => write!(
                f,
                "Station {station} received #{sequence} from Station {source}: {text} [{status}]"
            ),
            LinkEvent::NothingQueued { station } => {
                write!(f, "Token at Station {station}. No frames to process")
            }
            LinkEvent::StationSkipped { station } => {
                write!(f, "Station {station} is inactive. Skipping")
            }
            LinkEvent::MonitorElected { station } => {
                write!(f, "Station {station} has become the monitor")
            }
            LinkEvent::MonitorLost { station } => write!(
                f,
                "Station {station} (monitor) is now inactive. A new monitor will be selected"
            ),
            LinkEvent::MonitorAbsent => write!(f, "No active station can serve as monitor"),
            LinkEvent::TokenRegenerated { station, idle } => write!(
                f,
                "Monitor {station} detected lost token after {:.1} s. New token generated",
                idle.as_secs_f64()
            ),
            LinkEvent::DuplicateTokensCollapsed { count, station } => write!(
                f,
                "Monitor detected {count} tokens. Excess removed, single token issued to Station {station}"
            ),
            LinkEvent::DuplicateTokenCreated { station } => {
                write!(f, "Station {station} created a duplicate token manually")
            }
            LinkEvent::TokenDropped => write!(f, "Token removed from the ring"),
            LinkEvent::StationUpdated { station, detail } => write!(f, "Station {station}: {detail}"),
            LinkEvent::CommandRejected { reason } => write!(f, "Command rejected: {reason}"),
            LinkEvent::TransportFailed { port, reason } => {
                write!(f, "{port}: transport failed: {reason}")
            }
        }
    }
}

/// Receiver of status events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LinkEvent);
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn EventSink>;

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: LinkEvent) {
        match event.level() {
            Level::ERROR => tracing::error!(target: "linksim::events", "{event}"),
            Level::WARN => tracing::warn!(target: "linksim::events", "{event}"),
            Level::INFO => tracing::info!(target: "linksim::events", "{event}"),
            Level::DEBUG => tracing::debug!(target: "linksim::events", "{event}"),
            _ => tracing::trace!(target: "linksim::events", "{event}"),
        }
    }
}

/// Records events in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LinkEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<LinkEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Status lines recorded so far.
    pub fn lines(&self) -> Vec<String> {
        self.events().iter().map(ToString::to_string).collect()
    }

    /// Count of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&LinkEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: LinkEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl EventSink for mpsc::UnboundedSender<LinkEvent> {
    fn emit(&self, event: LinkEvent) {
        // A dropped receiver means nobody is displaying events any more
        let _ = self.send(event);
    }
}

/// Fans each event out to several sinks.
pub struct FanoutSink {
    sinks: Vec<SharedSink>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<SharedSink>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: LinkEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
