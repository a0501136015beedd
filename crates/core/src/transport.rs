//! Transport collaborator and an in-memory serial link.
//!
//! The protocol engine only ever sees the [`Transport`] trait: write a byte
//! block, ask how many bytes are waiting, read everything that is waiting.
//! Real serial port handling lives outside this crate.
//!
//! [`SerialLink::pair`] builds two connected [`SerialPort`] endpoints, like a
//! null-modem cable between two COM ports. Each direction is an ordered byte
//! lane, so bytes arrive in exactly the order they were written. Closing
//! either end closes the cable: every later call on either end fails with
//! [`TransportError::Closed`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use crate::error::TransportError;

/// Byte-oriented link endpoint.
///
/// Errors are never swallowed: callers propagate them to whoever owns the
/// task so they can be shown to the user.
#[async_trait]
pub trait Transport: Send {
    /// Endpoint name used in logs (e.g. "COM1").
    fn name(&self) -> &str;

    /// Write a block of bytes to the peer.
    async fn transmit(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Bytes currently waiting to be read.
    fn bytes_available(&self) -> usize;

    /// Fails once the endpoint can no longer be used.
    fn ensure_open(&self) -> Result<(), TransportError>;

    /// Read every waiting byte; empty when nothing arrived.
    async fn read_available(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Close the endpoint.
    async fn close(&mut self);
}

/// One direction of the cable.
#[derive(Debug, Default)]
struct Lane {
    buffer: VecDeque<u8>,
    writes: u64,
    bytes: u64,
}

/// Counters for the lane an endpoint writes into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Number of `transmit` calls that succeeded
    pub writes: u64,

    /// Total bytes written
    pub bytes_written: u64,

    /// Bytes written but not yet read by the peer
    pub bytes_in_flight: usize,
}

fn lock(lane: &Mutex<Lane>) -> MutexGuard<'_, Lane> {
    lane.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Factory for connected serial endpoints.
pub struct SerialLink;

impl SerialLink {
    /// Create two endpoints wired to each other.
    pub fn pair(first: impl Into<String>, second: impl Into<String>) -> (SerialPort, SerialPort) {
        let forward = Arc::new(Mutex::new(Lane::default()));
        let backward = Arc::new(Mutex::new(Lane::default()));
        let closed = Arc::new(AtomicBool::new(false));

        let a = SerialPort {
            name: first.into(),
            tx: Arc::clone(&forward),
            rx: Arc::clone(&backward),
            closed: Arc::clone(&closed),
        };
        let b = SerialPort {
            name: second.into(),
            tx: backward,
            rx: forward,
            closed,
        };
        (a, b)
    }
}

/// In-memory serial endpoint.
#[derive(Debug)]
pub struct SerialPort {
    name: String,
    tx: Arc<Mutex<Lane>>,
    rx: Arc<Mutex<Lane>>,
    closed: Arc<AtomicBool>,
}

impl SerialPort {
    /// Whether the cable has been closed from either end.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Statistics for bytes written by this endpoint.
    pub fn stats(&self) -> LinkStats {
        let lane = lock(&self.tx);
        LinkStats {
            writes: lane.writes,
            bytes_written: lane.bytes,
            bytes_in_flight: lane.buffer.len(),
        }
    }
}

#[async_trait]
impl Transport for SerialPort {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transmit(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut lane = lock(&self.tx);
        lane.buffer.extend(bytes.iter().copied());
        lane.writes += 1;
        lane.bytes += bytes.len() as u64;
        trace!(port = %self.name, len = bytes.len(), "bytes written");
        Ok(())
    }

    fn bytes_available(&self) -> usize {
        lock(&self.rx).buffer.len()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed {
                port: self.name.clone(),
            })
        } else {
            Ok(())
        }
    }

    async fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        let mut lane = lock(&self.rx);
        Ok(lane.buffer.drain(..).collect())
    }

    async fn close(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(port = %self.name, "serial link closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bytes_cross_the_cable() {
        let (mut com1, mut com2) = SerialLink::pair("COM1", "COM2");

        com1.transmit(b"abc").await.unwrap();
        com1.transmit(b"de").await.unwrap();

        assert_eq!(com2.bytes_available(), 5);
        assert_eq!(com1.bytes_available(), 0);
        assert_eq!(com2.read_available().await.unwrap(), b"abcde");
        assert_eq!(com2.bytes_available(), 0);
        assert!(com2.read_available().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_duplex() {
        let (mut com5, mut com6) = SerialLink::pair("COM5", "COM6");

        com6.transmit(b"ping").await.unwrap();
        com5.transmit(b"pong").await.unwrap();

        assert_eq!(com5.read_available().await.unwrap(), b"ping");
        assert_eq!(com6.read_available().await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_stats() {
        let (mut com1, mut com2) = SerialLink::pair("COM1", "COM2");

        com1.transmit(&[1, 2, 3]).await.unwrap();
        com1.transmit(&[4]).await.unwrap();

        let stats = com1.stats();
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.bytes_written, 4);
        assert_eq!(stats.bytes_in_flight, 4);

        com2.read_available().await.unwrap();
        assert_eq!(com1.stats().bytes_in_flight, 0);
    }

    #[tokio::test]
    async fn test_closed_link_errors() {
        let (mut com1, mut com2) = SerialLink::pair("COM1", "COM2");

        com2.close().await;

        assert!(com1.is_closed());
        assert_eq!(
            com1.transmit(b"x").await,
            Err(TransportError::Closed {
                port: "COM1".to_string()
            })
        );
        assert!(com2.read_available().await.is_err());
        assert!(com2.ensure_open().is_err());
    }
}
