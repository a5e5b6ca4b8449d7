//! Deterministic per-stream randomness and bag fingerprints.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const GOLDEN_GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

pub(crate) const FNV_OFFSET: u64 = 14_695_981_039_346_656_037;
pub(crate) const FNV_PRIME: u64 = 1_099_511_628_211;

/// Salt separating the feature-subset streams from the bag streams.
pub(crate) const FEATURE_STREAM_SALT: u64 = 0x5eed_f0e5_7000_0001;

/// SplitMix64 finalizer.
pub(crate) fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(GOLDEN_GAMMA);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Build an independent generator for `(stream, nonce)` under `base_seed`.
///
/// The same triple always yields the same sequence, regardless of which
/// worker thread asks for it.
pub(crate) fn derive_rng(base_seed: u64, stream: u64, nonce: u64) -> ChaCha8Rng {
    let mixed = base_seed ^ stream.wrapping_mul(GOLDEN_GAMMA).wrapping_add(nonce);
    ChaCha8Rng::seed_from_u64(splitmix64(mixed))
}

/// Incremental FNV-1a over little-endian integer bytes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fnv1a(u64);

impl Fnv1a {
    pub(crate) fn new() -> Self {
        Self(FNV_OFFSET)
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= u64::from(byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    pub(crate) fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub(crate) fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub(crate) fn finish(self) -> u64 {
        self.0
    }
}
