//! CRC-8 error detection with single-bit correction.
//!
//! The checksum is the plain bit-at-a-time CRC-8 (CRC-8/GSM-A parameters):
//! MSB first, initial register 0, no reflection, no final XOR, generator
//! 0x1D by default. Because the register starts at zero, a block of zero bytes
//! always checksums to zero.
//!
//! # Correction
//!
//! Correction is brute force: every bit of the block is flipped in turn and
//! the CRC recomputed. The generator x^8+x^4+x^3+x^2+1 is primitive (period
//! 255), so for blocks of up to 31 bytes each single-bit error has a distinct
//! syndrome and the search recovers the original exactly. Multi-bit damage can
//! still alias onto some unrelated single-bit flip; such a "correction" is
//! wrong and nothing here can tell. Callers treat a correction as a best
//! effort, not a guarantee.

use crate::error::ChecksumError;

/// Default CRC-8 generator polynomial (x^8 + x^4 + x^3 + x^2 + 1).
pub const CRC8_POLYNOMIAL: u8 = 0x1D;

/// Compute CRC-8 over `data` with the default polynomial.
pub fn crc8(data: &[u8]) -> u8 {
    crc8_with(data, CRC8_POLYNOMIAL)
}

/// Compute CRC-8 over `data` with an explicit generator polynomial.
pub fn crc8_with(data: &[u8], polynomial: u8) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ polynomial
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Location of a single flipped bit (`bit` 0 is the LSB).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitPosition {
    pub byte: usize,
    pub bit: u8,
}

/// Find the first single-bit flip of `data` whose CRC equals `received_fcs`.
///
/// Candidates are tried byte-ascending, then bit-ascending.
pub fn locate_single_bit_error(data: &[u8], received_fcs: u8) -> Option<BitPosition> {
    let mut candidate = data.to_vec();
    for byte in 0..candidate.len() {
        for bit in 0..8u8 {
            candidate[byte] ^= 1 << bit;
            let matches = crc8(&candidate) == received_fcs;
            candidate[byte] ^= 1 << bit;
            if matches {
                return Some(BitPosition { byte, bit });
            }
        }
    }
    None
}

/// Try to repair a single-bit error in `data` given the FCS it was sent with.
///
/// Returns the corrected block and `true` when some single-bit flip
/// reproduces `received_fcs`; otherwise the original block and `false`.
pub fn correct_single_bit_error(data: &[u8], received_fcs: u8) -> (Vec<u8>, bool) {
    let mut corrected = data.to_vec();
    match locate_single_bit_error(data, received_fcs) {
        Some(pos) => {
            corrected[pos.byte] ^= 1 << pos.bit;
            (corrected, true)
        }
        None => (corrected, false),
    }
}

/// Check `data` against a carried FCS without attempting correction.
pub fn verify(data: &[u8], carried: u8) -> Result<(), ChecksumError> {
    let computed = crc8(data);
    if computed == carried {
        Ok(())
    } else {
        Err(ChecksumError::Mismatch { carried, computed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_block_checksums_to_zero() {
        for len in [0, 1, 6, 20, 64] {
            assert_eq!(crc8(&vec![0u8; len]), 0x00);
        }
    }

    #[test]
    fn test_check_value() {
        // CRC-8/GSM-A catalogue check value
        assert_eq!(crc8(b"123456789"), 0x37);
    }

    #[test]
    fn test_single_byte_is_table_entry() {
        // One byte through the register is a pure shift/reduce of that byte
        assert_eq!(crc8(&[0x01]), 0x1D);
        assert_eq!(crc8(&[0x80]), crc8_with(&[0x80], CRC8_POLYNOMIAL));
    }

    #[test]
    fn test_verify() {
        let data = b"hello\0";
        let fcs = crc8(data);
        assert!(verify(data, fcs).is_ok());
        assert_eq!(
            verify(data, fcs ^ 0xFF),
            Err(ChecksumError::Mismatch {
                carried: fcs ^ 0xFF,
                computed: fcs
            })
        );
    }

    #[test]
    fn test_correct_known_flip() {
        let original = b"HELLO!".to_vec();
        let fcs = crc8(&original);

        let mut damaged = original.clone();
        damaged[3] ^= 0b0000_0100;

        assert_eq!(
            locate_single_bit_error(&damaged, fcs),
            Some(BitPosition { byte: 3, bit: 2 })
        );
        assert_eq!(correct_single_bit_error(&damaged, fcs), (original, true));
    }

    #[test]
    fn test_clean_block_is_not_flipped() {
        // An intact block has no single-bit neighbour with the same CRC
        let data = b"abcdef";
        let (out, fixed) = correct_single_bit_error(data, crc8(data));
        assert!(!fixed);
        assert_eq!(out, data);
    }

    #[test]
    fn test_multi_bit_damage_terminates() {
        // Not guaranteed to repair; only guaranteed to return something
        let original = b"WORLD!".to_vec();
        let fcs = crc8(&original);
        let mut damaged = original.clone();
        damaged[0] ^= 0x01;
        damaged[4] ^= 0x40;

        let (out, fixed) = correct_single_bit_error(&damaged, fcs);
        assert_eq!(out.len(), damaged.len());
        if !fixed {
            assert_eq!(out, damaged);
        }
    }

    proptest! {
        #[test]
        fn prop_single_bit_error_is_corrected(
            data in prop::collection::vec(any::<u8>(), 1..=31),
            byte_seed in any::<usize>(),
            bit in 0u8..8,
        ) {
            let fcs = crc8(&data);
            let byte = byte_seed % data.len();
            let mut damaged = data.clone();
            damaged[byte] ^= 1 << bit;

            let (corrected, fixed) = correct_single_bit_error(&damaged, fcs);
            prop_assert!(fixed);
            prop_assert_eq!(corrected, data);
        }
    }
}
