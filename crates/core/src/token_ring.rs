//! Token ring media access controller.
//!
//! [`TokenRing`] owns the station table, the frame queue standing in for the
//! ring medium, and the token. Nothing else writes to them: operator actions
//! are queued as [`RingCommand`]s and applied at the start of the next
//! [`TokenRing::tick`].
//!
//! # One tick
//!
//! ```text
//! 1. elect a monitor if there is none, then apply queued commands
//! 2. re-elect if a command removed the monitor (first active station)
//! 3. monitor check
//!      >1 holders          -> clear all, issue one token
//!      0 holders, timeout  -> regenerate the token at the monitor
//! 4. visit the holder: drain the current queue depth
//!      addressed here + source.priority >= destination.priority -> deliver
//!      otherwise                                                -> re-queue
//! 5. pass the token to the next active station
//! ```
//!
//! # Priority gate
//!
//! A frame is delivered only if its source station's priority is at least the
//! destination's, evaluated against the live station table on every visit.
//! This gates reception rather than token seizure, unlike IEEE 802.5. Frames
//! that fail the gate circulate until a priority changes.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::RingConfig;
use crate::error::{ChecksumError, Error, RingError, Result};
use crate::events::{LinkEvent, SharedSink};
use crate::fault::{FaultModel, NoFaults};
use crate::metrics::{record, SharedMetrics};
use crate::ring_frame::{segment, FrameStatus, RingFrame};

/// A node on the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Station {
    pub name: String,
    /// Ring address (below 0x80)
    pub address: u8,
    /// 1 is low, 2 is high
    pub priority: u8,
    pub has_token: bool,
    pub is_monitor: bool,
    pub is_active: bool,
}

impl Station {
    /// Active station without token or monitor role.
    pub fn new(name: impl Into<String>, address: u8, priority: u8) -> Self {
        Self {
            name: name.into(),
            address,
            priority,
            has_token: false,
            is_monitor: false,
            is_active: true,
        }
    }
}

/// Operator action, applied at the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingCommand {
    /// Queue a message; the sender must hold the token
    Send { from: u8, to: u8, message: String },
    SetPriority { station: u8, priority: u8 },
    SetActive { station: u8, active: bool },
    /// Give the station an extra token
    InjectDuplicateToken { station: u8 },
    /// Remove every token from the ring
    DropToken,
    BecomeMonitor { station: u8 },
}

/// Ring-wide health as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingCondition {
    Normal,
    MonitorAbsent,
    TokenLost,
    MultipleTokens,
}

/// A frame copied by its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingDelivery {
    pub station: String,
    pub frame: RingFrame,
    /// FCS verdict; mismatches are reported, never corrected
    pub integrity: std::result::Result<(), ChecksumError>,
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Station visited with the token
    pub visited: Option<String>,
    pub delivered: Vec<RingDelivery>,
    /// Frames held back by the priority gate
    pub held: usize,
    /// Station now holding the token
    pub passed_to: Option<String>,
    /// Commands that could not be applied
    pub rejected: Vec<Error>,
}

/// Read-only view of the ring for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingSnapshot {
    pub stations: Vec<Station>,
    pub queue_depth: usize,
    pub condition: RingCondition,
}

impl RingSnapshot {
    pub fn holder(&self) -> Option<&Station> {
        self.stations.iter().find(|s| s.has_token)
    }

    pub fn monitor(&self) -> Option<&Station> {
        self.stations.iter().find(|s| s.is_monitor)
    }
}

/// Centralized token ring state machine.
pub struct TokenRing {
    stations: Vec<Station>,
    /// Encoded frames in transit
    queue: VecDeque<Vec<u8>>,
    commands: VecDeque<RingCommand>,
    current: usize,
    last_token_pass: Instant,
    token_timeout: Duration,
    segment_len: usize,
    faults: Box<dyn FaultModel>,
    rng: ChaCha8Rng,
    sink: SharedSink,
    metrics: SharedMetrics,
}

impl TokenRing {
    /// Build a ring; the first active station starts with the token.
    ///
    /// # Errors
    /// `Error::Config` for an empty ring, a duplicate address or an address
    /// with bit 7 set.
    pub fn new(
        mut stations: Vec<Station>,
        config: &RingConfig,
        sink: SharedSink,
        metrics: SharedMetrics,
    ) -> Result<Self> {
        if stations.is_empty() {
            return Err(Error::Config("ring needs at least one station".into()));
        }
        for (i, station) in stations.iter().enumerate() {
            if station.address & 0x80 != 0 {
                return Err(Error::Config(format!(
                    "station {} address {:#04x} must be below 0x80",
                    station.name, station.address
                )));
            }
            if stations[..i].iter().any(|s| s.address == station.address) {
                return Err(Error::Config(format!(
                    "duplicate station address {:#04x}",
                    station.address
                )));
            }
        }

        for station in &mut stations {
            station.has_token = false;
        }
        let current = stations.iter().position(|s| s.is_active).unwrap_or(0);
        if let Some(first) = stations.get_mut(current).filter(|s| s.is_active) {
            first.has_token = true;
        }

        Ok(Self {
            stations,
            queue: VecDeque::new(),
            commands: VecDeque::new(),
            current,
            last_token_pass: Instant::now(),
            token_timeout: config.token_timeout(),
            segment_len: config.segment_len,
            faults: Box::new(NoFaults),
            rng: ChaCha8Rng::seed_from_u64(0),
            sink,
            metrics,
        })
    }

    /// Corrupt delivered information fields through `faults`.
    pub fn with_faults(mut self, faults: Box<dyn FaultModel>) -> Self {
        self.faults = faults;
        self
    }

    /// Seed for routing information values.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Queue a command for the next tick.
    pub fn submit(&mut self, command: RingCommand) {
        self.commands.push_back(command);
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn last_token_pass(&self) -> Instant {
        self.last_token_pass
    }

    /// Number of stations currently marked as holding a token.
    pub fn token_count(&self) -> usize {
        self.stations.iter().filter(|s| s.has_token).count()
    }

    pub fn holder(&self) -> Option<&Station> {
        self.stations.iter().find(|s| s.has_token)
    }

    pub fn monitor(&self) -> Option<&Station> {
        self.stations.iter().find(|s| s.is_monitor)
    }

    pub fn condition(&self) -> RingCondition {
        if self.monitor().is_none() {
            return RingCondition::MonitorAbsent;
        }
        match self.token_count() {
            0 => RingCondition::TokenLost,
            1 => RingCondition::Normal,
            _ => RingCondition::MultipleTokens,
        }
    }

    pub fn snapshot(&self) -> RingSnapshot {
        RingSnapshot {
            stations: self.stations.clone(),
            queue_depth: self.queue.len(),
            condition: self.condition(),
        }
    }

    /// Run one scheduling step at time `now`.
    ///
    /// # Errors
    /// `RingError::MonitorAbsent` when no active station is left. Queued
    /// commands have been applied by then.
    pub fn tick(&mut self, now: Instant) -> std::result::Result<TickReport, RingError> {
        let mut report = TickReport::default();

        // Frames queued this tick carry AC.M from the elected monitor
        if self.stations.iter().any(|s| s.is_active) {
            self.elect_monitor()?;
        }
        while let Some(command) = self.commands.pop_front() {
            if let Err(e) = self.apply(command) {
                warn!(error = %e, "ring command rejected");
                if !matches!(e, Error::Ring(RingError::NoToken { .. })) {
                    self.sink.emit(LinkEvent::CommandRejected {
                        reason: e.to_string(),
                    });
                }
                report.rejected.push(e);
            }
        }

        self.elect_monitor()?;
        self.monitor_check(now);

        let Some(holder) = self.stations.iter().position(|s| s.has_token) else {
            trace!("no token on the ring");
            return Ok(report);
        };
        self.current = holder;
        report.visited = Some(self.stations[holder].name.clone());
        self.sink.emit(LinkEvent::TokenReceived {
            station: self.stations[holder].name.clone(),
        });

        self.visit(holder, &mut report);
        report.passed_to = self.pass_token(holder, now);
        Ok(report)
    }

    fn index_of(&self, address: u8) -> Result<usize> {
        self.stations
            .iter()
            .position(|s| s.address == address)
            .ok_or(Error::Ring(RingError::UnknownStation { address }))
    }

    fn apply(&mut self, command: RingCommand) -> Result<()> {
        match command {
            RingCommand::Send { from, to, message } => self.enqueue(from, to, &message),
            RingCommand::SetPriority { station, priority } => {
                let i = self.index_of(station)?;
                self.stations[i].priority = priority;
                self.sink.emit(LinkEvent::StationUpdated {
                    station: self.stations[i].name.clone(),
                    detail: format!("priority set to {priority}"),
                });
                Ok(())
            }
            RingCommand::SetActive { station, active } => {
                let i = self.index_of(station)?;
                self.set_active(i, active);
                Ok(())
            }
            RingCommand::InjectDuplicateToken { station } => {
                let i = self.index_of(station)?;
                let s = &mut self.stations[i];
                if !s.is_active {
                    return Err(RingError::InactiveStation {
                        station: s.name.clone(),
                    }
                    .into());
                }
                s.has_token = true;
                info!(station = %s.name, "duplicate token injected");
                self.sink.emit(LinkEvent::DuplicateTokenCreated {
                    station: s.name.clone(),
                });
                Ok(())
            }
            RingCommand::DropToken => {
                for s in &mut self.stations {
                    s.has_token = false;
                }
                info!("token dropped");
                self.sink.emit(LinkEvent::TokenDropped);
                Ok(())
            }
            RingCommand::BecomeMonitor { station } => {
                let i = self.index_of(station)?;
                if !self.stations[i].is_active {
                    return Err(RingError::InactiveStation {
                        station: self.stations[i].name.clone(),
                    }
                    .into());
                }
                if self.stations[i].is_monitor {
                    return Ok(());
                }
                for s in &mut self.stations {
                    s.is_monitor = false;
                }
                self.stations[i].is_monitor = true;
                self.sink.emit(LinkEvent::MonitorElected {
                    station: self.stations[i].name.clone(),
                });
                Ok(())
            }
        }
    }

    fn set_active(&mut self, i: usize, active: bool) {
        let s = &mut self.stations[i];
        if s.is_active == active {
            return;
        }
        s.is_active = active;
        let detail = if active { "now active" } else { "now inactive" };
        self.sink.emit(LinkEvent::StationUpdated {
            station: s.name.clone(),
            detail: detail.to_string(),
        });
        if active {
            return;
        }

        // An inactive station can neither hold the token nor watch the ring
        if s.has_token {
            s.has_token = false;
            debug!(station = %s.name, "token lost with its holder");
        }
        if s.is_monitor {
            s.is_monitor = false;
            self.sink.emit(LinkEvent::MonitorLost {
                station: s.name.clone(),
            });
        }
    }

    fn enqueue(&mut self, from: u8, to: u8, message: &str) -> Result<()> {
        let src = self.index_of(from)?;
        self.index_of(to)?;

        let sender = &self.stations[src];
        if !sender.is_active {
            return Err(RingError::InactiveStation {
                station: sender.name.clone(),
            }
            .into());
        }
        if !sender.has_token {
            self.sink.emit(LinkEvent::NoToken {
                station: sender.name.clone(),
            });
            return Err(RingError::NoToken {
                station: sender.name.clone(),
            }
            .into());
        }

        let segments = segment(message, self.segment_len)?;
        if segments.is_empty() {
            debug!(station = %sender.name, "empty message ignored");
            return Ok(());
        }

        let (priority, monitor) = (sender.priority, sender.is_monitor);
        let mut encoded = Vec::with_capacity(segments.len());
        for (i, piece) in segments.iter().enumerate() {
            // segment() caps the count at u8::MAX
            let sequence = (i + 1) as u8;
            let frame = RingFrame::new(from, to, priority, sequence, piece.as_bytes().to_vec())
                .with_monitor(monitor)
                .with_routing(self.rng.gen_range(0x100..=0xFFF));
            encoded.push(frame.encode()?);
        }
        self.queue.extend(encoded);

        let destination = self.stations.iter().find(|s| s.address == to).map(|s| s.name.clone());
        self.sink.emit(LinkEvent::RingFrameQueued {
            source: self.stations[src].name.clone(),
            destination: destination.unwrap_or_default(),
            segments: segments.len(),
            priority,
        });
        Ok(())
    }

    fn elect_monitor(&mut self) -> std::result::Result<(), RingError> {
        if self.stations.iter().any(|s| s.is_monitor && s.is_active) {
            return Ok(());
        }
        for s in &mut self.stations {
            s.is_monitor = false;
        }
        match self.stations.iter_mut().find(|s| s.is_active) {
            Some(station) => {
                station.is_monitor = true;
                info!(station = %station.name, "monitor elected");
                self.sink.emit(LinkEvent::MonitorElected {
                    station: station.name.clone(),
                });
                Ok(())
            }
            None => {
                warn!("no active station can be monitor");
                self.sink.emit(LinkEvent::MonitorAbsent);
                Err(RingError::MonitorAbsent)
            }
        }
    }

    fn monitor_check(&mut self, now: Instant) {
        let Some(monitor) = self.stations.iter().position(|s| s.is_monitor) else {
            return;
        };
        let monitor_name = self.stations[monitor].name.clone();

        let holders = self.token_count();
        if holders > 1 {
            for s in &mut self.stations {
                s.has_token = false;
            }
            let recipient = if self.stations[self.current].is_active {
                self.current
            } else {
                monitor
            };
            self.stations[recipient].has_token = true;
            self.current = recipient;
            self.last_token_pass = now;
            warn!(count = holders, monitor = %monitor_name, "duplicate tokens collapsed");
            record(&self.metrics, |m| m.duplicates_collapsed += 1);
            self.sink.emit(LinkEvent::DuplicateTokensCollapsed {
                count: holders,
                station: self.stations[recipient].name.clone(),
            });
        } else if holders == 0 {
            let idle = now.saturating_duration_since(self.last_token_pass);
            if idle > self.token_timeout {
                self.stations[monitor].has_token = true;
                self.current = monitor;
                self.last_token_pass = now;
                warn!(monitor = %monitor_name, idle_ms = idle.as_millis() as u64, "token regenerated");
                record(&self.metrics, |m| m.tokens_regenerated += 1);
                self.sink.emit(LinkEvent::TokenRegenerated {
                    station: monitor_name,
                    idle,
                });
            }
        }
    }

    /// Drain the queue depth seen on arrival at `holder`.
    fn visit(&mut self, holder: usize, report: &mut TickReport) {
        let depth = self.queue.len();
        if depth == 0 {
            self.sink.emit(LinkEvent::NothingQueued {
                station: self.stations[holder].name.clone(),
            });
            return;
        }

        for _ in 0..depth {
            let Some(raw) = self.queue.pop_front() else {
                break;
            };
            let mut frame = match RingFrame::decode(&raw) {
                Ok(frame) => frame,
                Err(e) => {
                    let raw_hex = hex::encode(&raw);
                    warn!(error = %e, raw = %raw_hex, "discarding ring frame");
                    record(&self.metrics, |m| m.decode_failures += 1);
                    self.sink.emit(LinkEvent::DecodeFailed {
                        reason: e.to_string(),
                        raw_hex,
                    });
                    continue;
                }
            };

            let here = &self.stations[holder];
            if frame.destination != here.address {
                trace!(station = %here.name, destination = frame.destination, "frame forwarded");
                self.queue.push_back(raw);
                continue;
            }

            let source = self.stations.iter().find(|s| s.address == frame.source);
            let admitted = source.is_some_and(|s| s.priority >= here.priority);
            if !admitted {
                report.held += 1;
                self.sink.emit(LinkEvent::PriorityHeld {
                    station: here.name.clone(),
                    source: source.map_or_else(|| format!("{:#04x}", frame.source), |s| s.name.clone()),
                    destination: here.name.clone(),
                });
                self.queue.push_back(raw);
                continue;
            }
            let source_name = source.map(|s| s.name.clone()).unwrap_or_default();
            let station_name = here.name.clone();

            frame.info = self.faults.corrupt(&frame.info);
            let integrity = frame.verify();
            frame.status = FrameStatus {
                address_recognized: true,
                frame_copied: true,
            };

            let status = match &integrity {
                Ok(()) => "FCS valid".to_string(),
                Err(e) => format!("unreliable: {e}"),
            };
            record(&self.metrics, |m| {
                m.ring_deliveries += 1;
                if integrity.is_err() {
                    m.frames_unreliable += 1;
                }
            });
            info!(station = %station_name, sequence = frame.sequence, "ring frame delivered");
            self.sink.emit(LinkEvent::RingFrameDelivered {
                station: station_name.clone(),
                source: source_name,
                sequence: frame.sequence,
                text: frame.text(),
                status,
            });
            report.delivered.push(RingDelivery {
                station: station_name,
                frame,
                integrity,
            });
        }
    }

    /// Hand the token to the next active station after `holder`.
    fn pass_token(&mut self, holder: usize, now: Instant) -> Option<String> {
        let n = self.stations.len();
        let mut next = holder;
        for step in 1..=n {
            let candidate = (holder + step) % n;
            if self.stations[candidate].is_active {
                next = candidate;
                break;
            }
            self.sink.emit(LinkEvent::StationSkipped {
                station: self.stations[candidate].name.clone(),
            });
        }

        self.stations[holder].has_token = false;
        self.stations[next].has_token = true;
        self.current = next;
        self.last_token_pass = now;

        let (from, to) = (self.stations[holder].name.clone(), self.stations[next].name.clone());
        self.sink.emit(LinkEvent::TokenPassed {
            from,
            to: to.clone(),
        });
        Some(to)
    }
}
