//! LSB-first bit packing.

use crate::error::RfError;

/// Smallest width that holds `value`, never less than 1.
#[must_use]
pub fn bits_for(value: u64) -> u8 {
    (64 - value.leading_zeros()).max(1) as u8
}

/// Appends fields LSB first into a byte buffer.
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the low `width` bits of `value`. `width` is at most 64.
    pub fn write_bits(&mut self, value: u64, width: u8) {
        debug_assert!(width <= 64);
        for bit in 0..width {
            if self.bit_len % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> bit) & 1 == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << (self.bit_len % 8);
            }
            self.bit_len += 1;
        }
    }

    /// Skip to the next byte boundary.
    pub fn align(&mut self) {
        self.bit_len = self.bytes.len() * 8;
    }

    /// Number of bits written, padding included.
    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Return the packed bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Reads LSB-first fields from a byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Start reading at bit 0 of `bytes`.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Start reading at `bit_offset`.
    #[must_use]
    pub fn at(bytes: &'a [u8], bit_offset: usize) -> Self {
        Self {
            bytes,
            pos: bit_offset,
        }
    }

    /// Read a `width`-bit field.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::MalformedForest`] when the field runs past the end.
    pub fn read_bits(&mut self, width: u8) -> Result<u64, RfError> {
        if self.pos + width as usize > self.bytes.len() * 8 {
            return Err(RfError::MalformedForest {
                reason: format!(
                    "read of {width} bits at bit {} overruns {} bytes",
                    self.pos,
                    self.bytes.len()
                ),
            });
        }
        let mut value = 0u64;
        for bit in 0..width {
            let byte = self.bytes[self.pos / 8];
            if (byte >> (self.pos % 8)) & 1 == 1 {
                value |= 1 << bit;
            }
            self.pos += 1;
        }
        Ok(value)
    }

    /// Read a single flag bit.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::MalformedForest`] past the end of the slice.
    pub fn read_flag(&mut self) -> Result<bool, RfError> {
        Ok(self.read_bits(1)? == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_for_values() {
        assert_eq!(bits_for(0), 1);
        assert_eq!(bits_for(1), 1);
        assert_eq!(bits_for(2), 2);
        assert_eq!(bits_for(255), 8);
        assert_eq!(bits_for(256), 9);
    }

    #[test]
    fn lsb_first_layout() {
        let mut w = BitWriter::new();
        w.write_bits(1, 1);
        w.write_bits(0b10, 2);
        w.write_bits(0x1f, 5);
        // 1 | 10 << 1 | 11111 << 3 = 0b1111_1101
        assert_eq!(w.into_bytes(), vec![0b1111_1101]);
    }

    #[test]
    fn fields_cross_byte_boundaries() {
        let mut w = BitWriter::new();
        w.write_bits(0x5, 3);
        w.write_bits(0x2ab, 10);
        w.write_bits(0x1_0000_0001, 33);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 6);
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_bits(3).unwrap(), 0x5);
        assert_eq!(r.read_bits(10).unwrap(), 0x2ab);
        assert_eq!(r.read_bits(33).unwrap(), 0x1_0000_0001);
    }

    #[test]
    fn align_pads_to_byte() {
        let mut w = BitWriter::new();
        w.write_bits(1, 3);
        w.align();
        assert_eq!(w.bit_len(), 8);
        w.write_bits(1, 1);
        assert_eq!(w.into_bytes(), vec![1, 1]);
    }

    #[test]
    fn overrun_is_malformed() {
        let bytes = [0xffu8];
        let mut r = BitReader::at(&bytes, 4);
        assert_eq!(r.read_bits(4).unwrap(), 0xf);
        assert!(matches!(r.read_flag(), Err(RfError::MalformedForest { .. })));
    }
}
