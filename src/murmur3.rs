//! MurmurHash3 (x86 variants) as used for bucketing.
//!
//! Bucket assignment must agree bit-for-bit with every other SDK and with the backend. Keys are
//! hashed as their UTF-8 bytes.

use log::error;

/// Hash `key` with MurmurHash3 x86 32-bit. Seeds are signed in flag definitions and are
/// reinterpreted as unsigned.
pub fn hash(key: &str, seed: i32) -> u32 {
    murmur3_x86_32(key.as_bytes(), seed as u32)
}

/// Map `key` and `seed` to a bucket in `1..=100`.
pub fn bucket(key: &str, seed: i32) -> u32 {
    hash(key, seed) % 100 + 1
}

pub fn murmur3_x86_32(mut data: &[u8], seed: u32) -> u32 {
    ::murmur3::murmur3_32(&mut data, seed).unwrap_or_else(|e| {
        error!("failed to hash key bytes: {}", e);
        0
    })
}

/// Hash `key` with MurmurHash3 x86 128-bit, returning the four 32-bit words `h1..h4`.
pub fn hash128(key: &str, seed: u32) -> [u32; 4] {
    murmur3_x86_128(key.as_bytes(), seed)
}

/// The 128-bit hash as 32 lowercase hex digits (`h1`, `h2`, `h3`, `h4`, each zero padded).
pub fn hash128_hex(key: &str, seed: u32) -> String {
    hash128(key, seed)
        .iter()
        .map(|word| format!("{:08x}", word))
        .collect()
}

/// The first 64 bits of the 128-bit hash of `key` with seed 0.
pub fn hash64(key: &str) -> u64 {
    let [h1, h2, _, _] = hash128(key, 0);
    (u64::from(h1) << 32) | u64::from(h2)
}

pub fn murmur3_x86_128(mut data: &[u8], seed: u32) -> [u32; 4] {
    // packed as h4 | h3 | h2 | h1, most significant first
    let packed = ::murmur3::murmur3_x86_128(&mut data, seed).unwrap_or_else(|e| {
        error!("failed to hash key bytes: {}", e);
        0
    });
    [
        packed as u32,
        (packed >> 32) as u32,
        (packed >> 64) as u32,
        (packed >> 96) as u32,
    ]
}
