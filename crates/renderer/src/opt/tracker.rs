use std::collections::HashMap;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over the raw uniform bytes. Fast, non-cryptographic; collisions
/// merely cost one redundant upload.
pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Remembers the last-written hash per named uniform block so a GPU write is
/// only issued when the block's bytes actually changed.
pub(crate) struct UniformTracker {
    last: HashMap<&'static str, u64>,
}

impl UniformTracker {
    pub fn new() -> Self {
        Self {
            last: HashMap::new(),
        }
    }

    /// Returns `true` (and records the new hash) when `bytes` differ from the
    /// previous write of `block`.
    pub fn changed(&mut self, block: &'static str, bytes: &[u8]) -> bool {
        let hash = fnv1a(bytes);
        match self.last.insert(block, hash) {
            Some(previous) => previous != hash,
            None => true,
        }
    }

    /// Forgets all recorded hashes; the next frame rewrites every block.
    pub fn reset(&mut self) {
        self.last.clear();
    }
}
