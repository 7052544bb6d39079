//! Blake2b hashing helpers.

/// Compute a 256-bit Blake2b hash of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    strand_types::digest(data)
}

/// Hash multiple byte slices in sequence (avoids concatenation allocation).
pub fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    strand_types::digest_multi(parts)
}

/// Hex-encoded Blake2b-256 over `parts`, the form carried in envelopes and
/// route-table broadcasts.
pub fn integrity_hash(parts: &[&[u8]]) -> String {
    hex::encode(blake2b_256_multi(parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake2b_deterministic() {
        assert_eq!(blake2b_256(b"hello strand"), blake2b_256(b"hello strand"));
    }

    #[test]
    fn blake2b_empty_is_not_zero() {
        assert_ne!(blake2b_256(b""), [0u8; 32]);
    }

    #[test]
    fn integrity_hash_is_hex() {
        let h = integrity_hash(&[b"a", b"b"]);
        assert_eq!(h.len(), 64);
        assert_eq!(h, hex::encode(blake2b_256(b"ab")));
    }
}
