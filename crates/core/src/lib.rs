//! linksim-core: Educational data-link layer protocol engine
//!
//! This library provides the protocol mechanics of a simulated serial link:
//! - Byte-stuffed framing with a configurable frame check sequence
//! - CRC-8 error detection with single-bit correction
//! - CSMA/CD channel access with jamming and binary exponential backoff
//! - A token ring with monitor election, lost and duplicate token recovery,
//!   and priority-gated delivery
//!
//! # Architecture
//!
//! The system is designed around clear module boundaries:
//! - `framing`: Bus frame build/parse and byte stuffing
//! - `crc`: CRC-8 and single-bit correction
//! - `fault`: Injectable channel fault models
//! - `transport`: Transport trait and in-memory serial link
//! - `bus`: Direct sender, receive pipeline and receive-poll task
//! - `csma`: Contention state machine and backoff
//! - `ring_frame`: Token ring frame format and segmentation
//! - `token_ring`: Token ring media access controller
//! - `scheduler`: Async task driving the ring
//! - `events`, `metrics`, `config`: Status lines, counters and settings
//!
//! # Design Principles
//!
//! - **No panics**: All errors are structured and recoverable
//! - **Single writer**: Ring state is only mutated by its scheduler tick
//! - **Deterministic**: Seeded or scripted fault models make runs reproducible
//! - **Observable**: Every protocol step is reported as a `LinkEvent`

pub mod bus;
pub mod config;
pub mod crc;
pub mod csma;
pub mod error;
pub mod events;
pub mod fault;
pub mod framing;
pub mod metrics;
pub mod ring_frame;
pub mod scheduler;
pub mod token_ring;
pub mod transport;

// Re-export commonly used types
pub use config::LinkConfig;
pub use error::{Error, Result};
pub use events::{EventSink, LinkEvent};
pub use framing::FrameCodec;
pub use transport::{SerialLink, SerialPort, Transport};
