//! Register codec: IEEE-754 single-precision values packed into pairs of
//! 16-bit holding registers.
//!
//! Byte order applies inside each 16-bit word; word order decides which half
//! of the 32-bit value is transmitted first. The default (big byte order,
//! little word order) is a wire-compatibility requirement with the field-bus
//! peers and must be reproduced bit for bit.
//!
//! NaN and infinities are not special-cased: their bit patterns pass through
//! unchanged.

use serde::{Deserialize, Serialize};

/// Number of registers occupied by one `f32`.
pub const REGISTERS_PER_FLOAT: usize = 2;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while decoding register payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The payload length does not match the requested value count.
    #[error("malformed register data: expected {expected} registers, got {actual}")]
    MalformedRegisterData { expected: usize, actual: usize },
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

/// Endianness of either the bytes within a word or the words within a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Big,
    Little,
}

// ---------------------------------------------------------------------------
// RegisterCodec
// ---------------------------------------------------------------------------

/// Packs and unpacks `f32` values to and from registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterCodec {
    /// Order of the two bytes inside each register.
    pub byte_order: Endian,
    /// Order of the two registers inside each value.
    pub word_order: Endian,
}

impl Default for RegisterCodec {
    fn default() -> Self {
        Self {
            byte_order: Endian::Big,
            word_order: Endian::Little,
        }
    }
}

impl RegisterCodec {
    pub const fn new(byte_order: Endian, word_order: Endian) -> Self {
        Self {
            byte_order,
            word_order,
        }
    }

    /// Encode one value into two registers, in transmission order.
    pub fn encode_float(&self, value: f32) -> [u16; 2] {
        let bits = value.to_bits();
        let mut high = (bits >> 16) as u16;
        let mut low = bits as u16;
        if self.byte_order == Endian::Little {
            high = high.swap_bytes();
            low = low.swap_bytes();
        }
        match self.word_order {
            Endian::Big => [high, low],
            Endian::Little => [low, high],
        }
    }

    /// Decode one value from two registers given in transmission order.
    pub fn decode_float(&self, words: [u16; 2]) -> f32 {
        let (mut high, mut low) = match self.word_order {
            Endian::Big => (words[0], words[1]),
            Endian::Little => (words[1], words[0]),
        };
        if self.byte_order == Endian::Little {
            high = high.swap_bytes();
            low = low.swap_bytes();
        }
        f32::from_bits(((high as u32) << 16) | low as u32)
    }

    /// Encode consecutive values into `2 * values.len()` registers.
    pub fn encode_floats(&self, values: &[f32]) -> Vec<u16> {
        let mut registers = Vec::with_capacity(values.len() * REGISTERS_PER_FLOAT);
        for &value in values {
            registers.extend_from_slice(&self.encode_float(value));
        }
        registers
    }

    /// Decode `count` consecutive values. The register slice must hold
    /// exactly `2 * count` words.
    pub fn decode_floats(&self, registers: &[u16], count: usize) -> Result<Vec<f32>, CodecError> {
        // A count too large to address can never match the slice.
        let expected = count.checked_mul(REGISTERS_PER_FLOAT);
        if expected != Some(registers.len()) {
            return Err(CodecError::MalformedRegisterData {
                expected: expected.unwrap_or(usize::MAX),
                actual: registers.len(),
            });
        }
        Ok(registers
            .chunks_exact(REGISTERS_PER_FLOAT)
            .map(|pair| self.decode_float([pair[0], pair[1]]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_ORDERS: [RegisterCodec; 4] = [
        RegisterCodec::new(Endian::Big, Endian::Big),
        RegisterCodec::new(Endian::Big, Endian::Little),
        RegisterCodec::new(Endian::Little, Endian::Big),
        RegisterCodec::new(Endian::Little, Endian::Little),
    ];

    #[test]
    fn default_is_big_bytes_little_words() {
        let codec = RegisterCodec::default();
        assert_eq!(codec.byte_order, Endian::Big);
        assert_eq!(codec.word_order, Endian::Little);
    }

    #[test]
    fn default_wire_layout_of_one() {
        // 1.0f32 = 0x3F80_0000: low word first, each word MSB first.
        let codec = RegisterCodec::default();
        assert_eq!(codec.encode_float(1.0), [0x0000, 0x3F80]);
    }

    #[test]
    fn default_wire_layout_of_mixed_bytes() {
        // 0x4049_0FDB (pi)
        let codec = RegisterCodec::default();
        assert_eq!(codec.encode_float(std::f32::consts::PI), [0x0FDB, 0x4049]);
    }

    #[test]
    fn every_order_lays_out_differently() {
        let value = f32::from_bits(0x1122_3344);
        let layouts: Vec<[u16; 2]> = ALL_ORDERS.iter().map(|c| c.encode_float(value)).collect();
        assert_eq!(layouts[0], [0x1122, 0x3344]);
        assert_eq!(layouts[1], [0x3344, 0x1122]);
        assert_eq!(layouts[2], [0x2211, 0x4433]);
        assert_eq!(layouts[3], [0x4433, 0x2211]);
    }

    #[test]
    fn every_order_round_trips() {
        for codec in ALL_ORDERS {
            for value in [0.0f32, -0.0, 1.5, -273.15, f32::MAX, f32::MIN_POSITIVE] {
                let decoded = codec.decode_float(codec.encode_float(value));
                assert_eq!(decoded.to_bits(), value.to_bits(), "{codec:?} {value}");
            }
        }
    }

    #[test]
    fn non_finite_bit_patterns_pass_through() {
        let codec = RegisterCodec::default();
        let quiet_nan = f32::from_bits(0x7FC0_0001);
        for value in [f32::INFINITY, f32::NEG_INFINITY, quiet_nan] {
            let decoded = codec.decode_float(codec.encode_float(value));
            assert_eq!(decoded.to_bits(), value.to_bits());
        }
    }

    #[test]
    fn array_encoding_is_concatenation() {
        let codec = RegisterCodec::default();
        let words = codec.encode_floats(&[0.0, 10.0]);
        assert_eq!(words.len(), 4);
        assert_eq!(&words[..2], &codec.encode_float(0.0));
        assert_eq!(&words[2..], &codec.encode_float(10.0));
    }

    #[test]
    fn array_round_trip() {
        let codec = RegisterCodec::default();
        let values: Vec<f32> = (0..16).map(|i| i as f32 * 0.25 - 2.0).collect();
        let decoded = codec.decode_floats(&codec.encode_floats(&values), values.len());
        assert_eq!(decoded, Ok(values));
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let codec = RegisterCodec::default();
        let err = codec.decode_floats(&[0, 0, 0], 2).unwrap_err();
        assert_eq!(
            err,
            CodecError::MalformedRegisterData {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn decode_rejects_unaddressable_count() {
        let codec = RegisterCodec::default();
        for count in [usize::MAX, usize::MAX / 2 + 1] {
            assert_eq!(
                codec.decode_floats(&[0, 0], count),
                Err(CodecError::MalformedRegisterData {
                    expected: usize::MAX,
                    actual: 2
                })
            );
        }
    }

    #[test]
    fn decode_zero_values_needs_no_registers() {
        let codec = RegisterCodec::default();
        assert_eq!(codec.decode_floats(&[], 0), Ok(Vec::new()));
        assert!(codec.decode_floats(&[7], 0).is_err());
    }
}
