//! Token ring frame format and message segmentation.
//!
//! Messages longer than one information field are split into segments, each
//! carried by its own frame with an increasing sequence number (starting at 1).
//!
//! # Frame Format
//!
//! ```text
//! +---------------+
//! | SD (1)        |  0x7E start delimiter
//! +---------------+
//! | AC (1)        |  P T M r r r r r
//! +---------------+
//! | FC (1)        |  0x08
//! +---------------+
//! | DA (1)        |  destination station address
//! +---------------+
//! | SA (1)        |  source address; bit 7 set when RI follows
//! +---------------+
//! | RI (2)        |  optional routing information, big-endian
//! +---------------+
//! | priority (1)  |  sender priority when the frame was queued
//! +---------------+
//! | sequence (1)  |  segment number, 1-based
//! +---------------+
//! | INFO (<= 20)  |  message segment
//! +---------------+
//! | FCS (1)       |  CRC-8 over INFO
//! +---------------+
//! | ED (1)        |  0x7E end delimiter
//! +---------------+
//! | FS (1)        |  A r r C A r r C
//! +---------------+
//! ```
//!
//! INFO is variable length, so the trailer is located from the end of the
//! buffer. Station addresses must stay below 0x80 because bit 7 of SA is the
//! routing information indicator.

use crate::crc::{crc8, verify};
use crate::error::{ChecksumError, FramingError};

/// Start delimiter.
pub const START_DELIMITER: u8 = 0x7E;

/// End delimiter.
pub const END_DELIMITER: u8 = 0x7E;

/// Frame control for data frames.
pub const FRAME_CONTROL: u8 = 0x08;

/// Information field limit per frame.
pub const SEGMENT_LEN: usize = 20;

/// Largest sequence number a frame can carry.
pub const MAX_SEGMENTS: usize = u8::MAX as usize;

/// Routing information indicator in the SA byte.
const RII: u8 = 0x80;

/// SD AC FC DA SA
const HEADER_LEN: usize = 5;

/// FCS ED FS
const TRAILER_LEN: usize = 3;

/// Access control byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessControl {
    /// P: high-priority sender
    pub priority: bool,
    /// T: data frame
    pub frame_type: bool,
    /// M: sent by the monitor
    pub monitor: bool,
}

impl AccessControl {
    pub fn to_byte(self) -> u8 {
        (u8::from(self.priority) << 7) | (u8::from(self.frame_type) << 6) | (u8::from(self.monitor) << 5)
    }

    /// Reserved bits are ignored.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            priority: byte & 0x80 != 0,
            frame_type: byte & 0x40 != 0,
            monitor: byte & 0x20 != 0,
        }
    }
}

/// Frame status byte; each flag is carried twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStatus {
    pub address_recognized: bool,
    pub frame_copied: bool,
}

impl FrameStatus {
    pub fn to_byte(self) -> u8 {
        let a = if self.address_recognized { 0b1000_1000 } else { 0 };
        let c = if self.frame_copied { 0b0001_0001 } else { 0 };
        a | c
    }

    /// A flag counts as set if either copy is set.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            address_recognized: byte & 0b1000_1000 != 0,
            frame_copied: byte & 0b0001_0001 != 0,
        }
    }
}

/// One token ring data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingFrame {
    pub access_control: AccessControl,
    pub frame_control: u8,
    pub destination: u8,
    pub source: u8,
    pub routing: Option<u16>,
    pub priority: u8,
    pub sequence: u8,
    pub info: Vec<u8>,
    pub fcs: u8,
    pub status: FrameStatus,
}

impl RingFrame {
    /// Data frame with its FCS computed over `info`.
    ///
    /// AC.P is set for priority-2 senders.
    pub fn new(source: u8, destination: u8, priority: u8, sequence: u8, info: Vec<u8>) -> Self {
        Self {
            access_control: AccessControl {
                priority: priority == 2,
                frame_type: true,
                monitor: false,
            },
            frame_control: FRAME_CONTROL,
            destination,
            source,
            routing: None,
            priority,
            sequence,
            fcs: crc8(&info),
            info,
            status: FrameStatus::default(),
        }
    }

    /// Mark the frame as sent by the ring monitor.
    pub fn with_monitor(mut self, monitor: bool) -> Self {
        self.access_control.monitor = monitor;
        self
    }

    pub fn with_routing(mut self, routing: u16) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Information field as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.info).into_owned()
    }

    /// Check the carried FCS against the information field.
    pub fn verify(&self) -> Result<(), ChecksumError> {
        verify(&self.info, self.fcs)
    }

    /// Serialize for the ring.
    ///
    /// # Errors
    /// - `FramingError::InfoTooLong` if INFO exceeds [`SEGMENT_LEN`]
    pub fn encode(&self) -> Result<Vec<u8>, FramingError> {
        if self.info.len() > SEGMENT_LEN {
            return Err(FramingError::InfoTooLong {
                max: SEGMENT_LEN,
                actual: self.info.len(),
            });
        }

        let mut bytes = Vec::with_capacity(HEADER_LEN + 4 + self.info.len() + TRAILER_LEN);
        bytes.push(START_DELIMITER);
        bytes.push(self.access_control.to_byte());
        bytes.push(self.frame_control);
        bytes.push(self.destination);
        match self.routing {
            Some(ri) => {
                bytes.push(self.source | RII);
                bytes.extend_from_slice(&ri.to_be_bytes());
            }
            None => bytes.push(self.source & !RII),
        }
        bytes.push(self.priority);
        bytes.push(self.sequence);
        bytes.extend_from_slice(&self.info);
        bytes.push(self.fcs);
        bytes.push(END_DELIMITER);
        bytes.push(self.status.to_byte());
        Ok(bytes)
    }

    /// Parse a frame taken off the ring.
    ///
    /// # Errors
    /// - `FramingError::TooShort` if a fixed field is missing
    /// - `FramingError::InvalidDelimiter` on a wrong SD or ED
    /// - `FramingError::InfoTooLong` if INFO exceeds [`SEGMENT_LEN`]
    pub fn decode(bytes: &[u8]) -> Result<Self, FramingError> {
        let min = HEADER_LEN + 2 + TRAILER_LEN;
        if bytes.len() < min {
            return Err(FramingError::TooShort {
                required: min,
                actual: bytes.len(),
            });
        }
        if bytes[0] != START_DELIMITER {
            return Err(FramingError::InvalidDelimiter {
                field: "start",
                expected: START_DELIMITER,
                actual: bytes[0],
            });
        }

        let sa = bytes[4];
        let (routing, body) = if sa & RII != 0 {
            let required = min + 2;
            if bytes.len() < required {
                return Err(FramingError::TooShort {
                    required,
                    actual: bytes.len(),
                });
            }
            (Some(u16::from_be_bytes([bytes[5], bytes[6]])), HEADER_LEN + 2)
        } else {
            (None, HEADER_LEN)
        };

        let trailer = bytes.len() - TRAILER_LEN;
        if bytes[trailer + 1] != END_DELIMITER {
            return Err(FramingError::InvalidDelimiter {
                field: "end",
                expected: END_DELIMITER,
                actual: bytes[trailer + 1],
            });
        }

        let info = &bytes[body + 2..trailer];
        if info.len() > SEGMENT_LEN {
            return Err(FramingError::InfoTooLong {
                max: SEGMENT_LEN,
                actual: info.len(),
            });
        }

        Ok(Self {
            access_control: AccessControl::from_byte(bytes[1]),
            frame_control: bytes[2],
            destination: bytes[3],
            source: sa & !RII,
            routing,
            priority: bytes[body],
            sequence: bytes[body + 1],
            info: info.to_vec(),
            fcs: bytes[trailer],
            status: FrameStatus::from_byte(bytes[trailer + 2]),
        })
    }
}

/// Split `message` into pieces of at most `max` bytes without breaking a character.
///
/// # Errors
/// - `FramingError::InfoTooLong` if one character alone exceeds `max`
/// - `FramingError::TooManySegments` past [`MAX_SEGMENTS`] pieces
pub fn segment(message: &str, max: usize) -> Result<Vec<&str>, FramingError> {
    let mut segments = Vec::new();
    let mut rest = message;

    while !rest.is_empty() {
        let mut cut = max.min(rest.len());
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            let width = rest.chars().next().map_or(0, char::len_utf8);
            return Err(FramingError::InfoTooLong { max, actual: width });
        }
        let (head, tail) = rest.split_at(cut);
        segments.push(head);
        rest = tail;
    }

    if segments.len() > MAX_SEGMENTS {
        return Err(FramingError::TooManySegments {
            segments: segments.len(),
            max: MAX_SEGMENTS,
        });
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_control_bits() {
        let ac = AccessControl {
            priority: true,
            frame_type: true,
            monitor: false,
        };
        assert_eq!(ac.to_byte(), 0b1100_0000);
        assert!(AccessControl::from_byte(0b0110_0000).monitor);
        assert!(!AccessControl::from_byte(0b0111_1111).priority);
    }

    #[test]
    fn test_frame_status_layout() {
        let fs = FrameStatus {
            address_recognized: true,
            frame_copied: true,
        };
        assert_eq!(fs.to_byte(), 0b1001_1001);
        assert_eq!(FrameStatus::default().to_byte(), 0);
        assert!(FrameStatus::from_byte(0b0000_1000).address_recognized);
    }

    #[test]
    fn test_priority_bit_from_sender() {
        assert!(RingFrame::new(1, 3, 2, 1, b"x".to_vec()).access_control.priority);
        assert!(!RingFrame::new(1, 3, 1, 1, b"x".to_vec()).access_control.priority);
    }

    #[test]
    fn test_encode_layout() {
        let frame = RingFrame::new(0x0A, 0x0C, 1, 1, b"HI".to_vec());
        let bytes = frame.encode().unwrap();
        assert_eq!(
            bytes,
            vec![0x7E, 0x40, 0x08, 0x0C, 0x0A, 1, 1, b'H', b'I', crc8(b"HI"), 0x7E, 0x00]
        );
        assert_eq!(RingFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_routing_information() {
        let frame = RingFrame::new(0x0A, 0x0B, 1, 3, b"route".to_vec()).with_routing(0x0ABC);
        let bytes = frame.encode().unwrap();

        assert_eq!(bytes[4], 0x8A);
        assert_eq!(&bytes[5..7], &[0x0A, 0xBC]);

        let decoded = RingFrame::decode(&bytes).unwrap();
        assert_eq!(decoded.source, 0x0A);
        assert_eq!(decoded.routing, Some(0x0ABC));
        assert_eq!(decoded.sequence, 3);
        assert_eq!(decoded.text(), "route");
    }

    #[test]
    fn test_info_containing_delimiter() {
        let frame = RingFrame::new(1, 2, 1, 1, b"~~~".to_vec());
        let decoded = RingFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.info, b"~~~");
        assert!(decoded.verify().is_ok());
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            RingFrame::decode(&[0x7E, 0x40, 0x08]),
            Err(FramingError::TooShort { required: 10, actual: 3 })
        ));

        let mut bytes = RingFrame::new(1, 2, 1, 1, b"x".to_vec()).encode().unwrap();
        bytes[0] = 0x00;
        assert!(matches!(
            RingFrame::decode(&bytes),
            Err(FramingError::InvalidDelimiter { field: "start", .. })
        ));

        let mut bytes = RingFrame::new(1, 2, 1, 1, b"x".to_vec()).encode().unwrap();
        let ed = bytes.len() - 2;
        bytes[ed] = 0x00;
        assert!(matches!(
            RingFrame::decode(&bytes),
            Err(FramingError::InvalidDelimiter { field: "end", .. })
        ));
    }

    #[test]
    fn test_oversized_info_rejected() {
        let frame = RingFrame::new(1, 2, 1, 1, vec![b'a'; 21]);
        assert_eq!(
            frame.encode(),
            Err(FramingError::InfoTooLong { max: 20, actual: 21 })
        );
    }

    #[test]
    fn test_fcs_mismatch_detected() {
        let mut frame = RingFrame::new(1, 2, 1, 1, b"data".to_vec());
        frame.info[0] ^= 0x01;
        assert!(matches!(frame.verify(), Err(ChecksumError::Mismatch { .. })));
    }

    #[test]
    fn test_segment_ascii() {
        let message = "a".repeat(45);
        let segments = segment(&message, 20).unwrap();
        assert_eq!(segments.iter().map(|s| s.len()).collect::<Vec<_>>(), vec![20, 20, 5]);
        assert!(segment("", 20).unwrap().is_empty());
    }

    #[test]
    fn test_segment_respects_char_boundaries() {
        // 11 two-byte characters
        let message = "ж".repeat(11);
        let segments = segment(&message, 20).unwrap();
        assert_eq!(segments, vec!["ж".repeat(10), "ж".to_string()]);
        assert!(matches!(segment("ж", 1), Err(FramingError::InfoTooLong { max: 1, actual: 2 })));
    }

    #[test]
    fn test_too_many_segments() {
        let message = "a".repeat(256);
        assert_eq!(
            segment(&message, 1),
            Err(FramingError::TooManySegments {
                segments: 256,
                max: 255
            })
        );
    }
}
