//! Stable FNV-1a hashing for cache keys.
//!
//! Weight matrices may be persisted between runs, so their keys must not
//! depend on the process-seeded `std` hasher.

pub const FNV1A_OFFSET_BASIS_64: u64 = 0xcbf29ce484222325;
pub const FNV1A_PRIME_64: u64 = 0x0000_0100_0000_01B3;

/// Incremental FNV-1a 64-bit hasher.
#[derive(Debug, Clone, Copy)]
pub struct StableHasher {
    state: u64,
}

impl StableHasher {
    pub fn new() -> Self {
        Self {
            state: FNV1A_OFFSET_BASIS_64,
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= *byte as u64;
            self.state = self.state.wrapping_mul(FNV1A_PRIME_64);
        }
    }

    pub fn write_str(&mut self, s: &str) {
        // length prefix keeps ("ab", "c") and ("a", "bc") apart
        self.write_u64(s.len() as u64);
        self.write(s.as_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    pub fn finish(&self) -> u64 {
        self.state
    }
}

impl Default for StableHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_hash_is_offset_basis() {
        assert_eq!(StableHasher::new().finish(), FNV1A_OFFSET_BASIS_64);
    }

    #[test]
    fn test_reference_value() {
        let mut hasher = StableHasher::new();
        hasher.write(b"hello");
        assert_eq!(hasher.finish(), 11831194018420276491);
    }

    #[test]
    fn test_string_boundaries_are_distinguished() {
        let mut a = StableHasher::new();
        a.write_str("ab");
        a.write_str("c");

        let mut b = StableHasher::new();
        b.write_str("a");
        b.write_str("bc");

        assert_ne!(a.finish(), b.finish());
    }
}
