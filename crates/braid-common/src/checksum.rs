//! CRC-32 checksums for WAL records and snapshot entries.
//!
//! Uses the IEEE 802.3 polynomial (reflected form 0xEDB88320, init and
//! final XOR 0xFFFFFFFF), so output is bit-identical across platforms and
//! across reimplementations of the on-disk formats.

/// Computes the CRC-32 of a byte buffer in one shot.
#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Streaming CRC-32 for callers that see a record one field at a time.
#[derive(Debug, Default)]
pub struct Crc32 {
    inner: crc32fast::Hasher,
}

impl Crc32 {
    /// Creates a hasher with the initial register value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes into the running checksum.
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Consumes the hasher and returns the final checksum.
    pub fn finalize(self) -> u32 {
        self.inner.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_answer() {
        // Standard CRC-32 check value.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn test_deterministic() {
        let data = b"the same bytes every time";
        assert_eq!(crc32(data), crc32(data));
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let mut hasher = Crc32::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), crc32(b"hello world"));
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let mut data = vec![0u8; 64];
        data[17] = 0x42;
        let original = crc32(&data);

        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut flipped = data.clone();
                flipped[byte] ^= 1 << bit;
                assert_ne!(
                    crc32(&flipped),
                    original,
                    "bit flip at byte {} bit {} went undetected",
                    byte,
                    bit
                );
            }
        }
    }
}
