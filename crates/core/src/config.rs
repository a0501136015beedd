//! In-memory link configuration.
//!
//! Every field has a default, so an empty document is a valid configuration.
//! YAML loading goes through `serde_yaml_ng`; the result is validated before
//! it is handed back.
//!
//! ```yaml
//! direction: six-to-five
//! transfer_rate: 19200
//! block_size: 5
//! fcs: crc8
//! csma:
//!   seed: 7
//! ring:
//!   dwell_ms: 1000
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::fault::FaultConfig;
use crate::framing::{FcsScheme, FrameCodec, DEFAULT_BLOCK_SIZE};
use crate::ring_frame::SEGMENT_LEN;

/// Largest block parameter whose flag letter stays within 'a'..='z'.
pub const MAX_BLOCK_SIZE: u8 = 25;

/// Which of the two fixed serial topologies is in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// COM1 sends to COM2
    #[default]
    OneToTwo,
    /// COM6 sends to COM5
    SixToFive,
}

impl Direction {
    /// Port that writes frames.
    pub fn source_port(&self) -> &'static str {
        match self {
            Direction::OneToTwo => "COM1",
            Direction::SixToFive => "COM6",
        }
    }

    /// Port that reads frames.
    pub fn destination_port(&self) -> &'static str {
        match self {
            Direction::OneToTwo => "COM2",
            Direction::SixToFive => "COM5",
        }
    }

    /// Frame address of the sender (last digit of its port name).
    pub fn source_address(&self) -> u8 {
        match self {
            Direction::OneToTwo => 1,
            Direction::SixToFive => 6,
        }
    }

    /// Frame address of the receiver.
    pub fn destination_address(&self) -> u8 {
        match self {
            Direction::OneToTwo => 2,
            Direction::SixToFive => 5,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::OneToTwo => write!(f, "1 -> 2"),
            Direction::SixToFive => write!(f, "5 <- 6"),
        }
    }
}

/// Supported baud-equivalent transfer rates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum TransferRate {
    #[default]
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
}

impl TransferRate {
    pub const ALL: [TransferRate; 5] = [
        TransferRate::B9600,
        TransferRate::B19200,
        TransferRate::B38400,
        TransferRate::B57600,
        TransferRate::B115200,
    ];

    pub fn baud(&self) -> u32 {
        match self {
            TransferRate::B9600 => 9600,
            TransferRate::B19200 => 19200,
            TransferRate::B38400 => 38400,
            TransferRate::B57600 => 57600,
            TransferRate::B115200 => 115200,
        }
    }
}

impl TryFrom<u32> for TransferRate {
    type Error = Error;

    fn try_from(baud: u32) -> Result<Self> {
        TransferRate::ALL
            .into_iter()
            .find(|rate| rate.baud() == baud)
            .ok_or_else(|| Error::Config(format!("unsupported transfer rate: {baud} baud")))
    }
}

impl From<TransferRate> for u32 {
    fn from(rate: TransferRate) -> u32 {
        rate.baud()
    }
}

/// Frame check sequence carried by bus frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FcsMode {
    #[default]
    Crc8,
    /// Four zero bytes, never checked
    ZeroPlaceholder,
}

impl FcsMode {
    pub fn scheme(&self) -> FcsScheme {
        match self {
            FcsMode::Crc8 => FcsScheme::Crc8,
            FcsMode::ZeroPlaceholder => FcsScheme::LEGACY,
        }
    }
}

/// Contention channel parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsmaConfig {
    pub busy_probability: f64,
    pub collision_probability: f64,
    /// Receive-side single-bit corruption rate
    pub corruption_probability: f64,
    pub busy_poll_ms: u64,
    /// Collisions tolerated before the frame is dropped
    pub max_attempts: u32,
    pub seed: u64,
}

impl Default for CsmaConfig {
    fn default() -> Self {
        Self {
            busy_probability: 0.5,
            collision_probability: 0.6,
            corruption_probability: 0.0,
            busy_poll_ms: 500,
            max_attempts: 2,
            seed: 42,
        }
    }
}

impl CsmaConfig {
    pub fn busy_poll(&self) -> Duration {
        Duration::from_millis(self.busy_poll_ms)
    }
}

/// Token ring timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Time the token rests at each station
    pub dwell_ms: u64,
    /// Idle time after which the monitor regenerates the token
    pub token_timeout_ms: u64,
    /// Characters of message text per ring frame
    pub segment_len: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            dwell_ms: 3000,
            token_timeout_ms: 5000,
            segment_len: SEGMENT_LEN,
        }
    }
}

impl RingConfig {
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_millis(self.token_timeout_ms)
    }
}

/// Complete link configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub direction: Direction,
    pub transfer_rate: TransferRate,
    /// Block parameter `n`; payload holds `n + 1` bytes
    pub block_size: u8,
    pub fcs: FcsMode,
    pub receive_poll_ms: u64,
    pub csma: CsmaConfig,
    pub ring: RingConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            direction: Direction::default(),
            transfer_rate: TransferRate::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            fcs: FcsMode::default(),
            receive_poll_ms: 100,
            csma: CsmaConfig::default(),
            ring: RingConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: LinkConfig =
            serde_yaml_ng::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(Error::Config(format!(
                "block_size must be between 1 and {MAX_BLOCK_SIZE}, got {}",
                self.block_size
            )));
        }
        if self.receive_poll_ms == 0 {
            return Err(Error::Config("receive_poll_ms must be positive".into()));
        }

        for (name, p) in [
            ("busy_probability", self.csma.busy_probability),
            ("collision_probability", self.csma.collision_probability),
            ("corruption_probability", self.csma.corruption_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::Config(format!("{name} must be in [0, 1], got {p}")));
            }
        }
        if self.csma.busy_probability >= 1.0 {
            // The sender would sense a busy medium forever
            return Err(Error::Config("busy_probability must be below 1".into()));
        }
        if self.csma.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }

        if self.ring.segment_len == 0 || self.ring.segment_len > SEGMENT_LEN {
            return Err(Error::Config(format!(
                "segment_len must be between 1 and {SEGMENT_LEN}, got {}",
                self.ring.segment_len
            )));
        }
        if self.ring.token_timeout_ms == 0 {
            return Err(Error::Config("token_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Bus frame codec for this configuration.
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.block_size, self.fcs.scheme())
    }

    /// Fault model probabilities for the contention channel.
    pub fn fault_config(&self) -> FaultConfig {
        FaultConfig {
            busy_probability: self.csma.busy_probability,
            collision_probability: self.csma.collision_probability,
            corruption_probability: self.csma.corruption_probability,
            seed: self.csma.seed,
        }
    }

    pub fn receive_poll(&self) -> Duration {
        Duration::from_millis(self.receive_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.codec(), FrameCodec::default());
        assert_eq!(config.transfer_rate.baud(), 9600);
        assert_eq!(config.ring.token_timeout(), Duration::from_secs(5));
        assert_eq!(config.csma.max_attempts, 2);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = LinkConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, LinkConfig::default());
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = "
direction: six-to-five
transfer_rate: 57600
block_size: 7
fcs: zero-placeholder
csma:
  seed: 9
  collision_probability: 1.0
ring:
  dwell_ms: 10
";
        let config = LinkConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.direction, Direction::SixToFive);
        assert_eq!(config.transfer_rate, TransferRate::B57600);
        assert_eq!(config.csma.seed, 9);
        assert_eq!(config.csma.busy_probability, 0.5);
        assert_eq!(config.ring.dwell(), Duration::from_millis(10));

        let codec = config.codec();
        assert_eq!(&codec.flag, b"$h");
        assert_eq!(codec.data_length, 8);
        assert_eq!(codec.fcs, FcsScheme::LEGACY);
    }

    #[test]
    fn test_unsupported_rate() {
        assert!(LinkConfig::from_yaml_str("transfer_rate: 1200").is_err());
        assert!(matches!(TransferRate::try_from(4800), Err(Error::Config(_))));
    }

    #[test]
    fn test_block_size_bounds() {
        assert!(LinkConfig::from_yaml_str("block_size: 0").is_err());
        assert!(LinkConfig::from_yaml_str("block_size: 26").is_err());
        assert!(LinkConfig::from_yaml_str("block_size: 25").is_ok());
    }

    #[test]
    fn test_probability_bounds() {
        let mut config = LinkConfig::default();
        config.csma.collision_probability = 1.5;
        assert!(config.validate().is_err());

        config.csma.collision_probability = 1.0;
        assert!(config.validate().is_ok());

        config.csma.busy_probability = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_directions() {
        assert_eq!(Direction::OneToTwo.source_port(), "COM1");
        assert_eq!(Direction::OneToTwo.destination_address(), 2);
        assert_eq!(Direction::SixToFive.source_address(), 6);
        assert_eq!(Direction::SixToFive.destination_port(), "COM5");
        assert_eq!(Direction::SixToFive.to_string(), "5 <- 6");
    }
}
