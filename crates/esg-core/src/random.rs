//! Alphabet-uniform random values from the OS CSPRNG.
//!
//! One alphabet symbol is drawn per accepted 32-bit sample. Samples that fall
//! in the incomplete top bucket (`x >= 2^32 - 2^32 mod n`) are rejected so
//! every symbol has exactly the same probability regardless of alphabet size.

use crate::error::RandomError;
use crate::secret::SecretValue;

/// The alphabet used when a generator declares no charset.
pub const DEFAULT_CHARSET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Bytes fetched from the OS per refill.
const POOL_SIZE: usize = 256;

/// Buffered reader over `getrandom` yielding `u32` samples.
struct EntropyPool {
    buf: [u8; POOL_SIZE],
    pos: usize,
}

impl EntropyPool {
    fn new() -> Self {
        Self {
            buf: [0u8; POOL_SIZE],
            pos: POOL_SIZE,
        }
    }

    fn next_u32(&mut self) -> Result<u32, RandomError> {
        if self.pos + 4 > POOL_SIZE {
            getrandom::fill(&mut self.buf).map_err(|e| RandomError::Entropy {
                reason: e.to_string(),
            })?;
            self.pos = 0;
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_le_bytes(word))
    }
}

impl Drop for EntropyPool {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.buf);
    }
}

/// Draw a uniformly distributed index in `0..n` by rejection sampling.
fn sample_index(pool: &mut EntropyPool, n: u64) -> Result<usize, RandomError> {
    const RANGE: u64 = 1 << 32;
    let limit = RANGE - RANGE % n;
    loop {
        let x = u64::from(pool.next_u32()?);
        if x < limit {
            // x % n < n <= u32::MAX + 1, always fits in usize on supported targets.
            #[allow(clippy::cast_possible_truncation)]
            return Ok((x % n) as usize);
        }
    }
}

/// Generate a value of exactly `length` characters drawn from `charset`.
///
/// Each character is an independent uniform draw over the Unicode scalar
/// values of `charset`. Duplicate characters are not filtered here; spec
/// validation rejects them before evaluation.
///
/// # Errors
///
/// - [`RandomError::EmptyCharset`] if `charset` is empty.
/// - [`RandomError::CharsetTooLarge`] if it has more than 2^32 symbols.
/// - [`RandomError::Entropy`] if the OS entropy source fails.
pub fn generate(length: usize, charset: &str) -> Result<SecretValue, RandomError> {
    let alphabet: Vec<char> = charset.chars().collect();
    if alphabet.is_empty() {
        return Err(RandomError::EmptyCharset);
    }
    let n = u64::try_from(alphabet.len())
        .ok()
        .filter(|n| *n <= 1 << 32)
        .ok_or(RandomError::CharsetTooLarge {
            size: alphabet.len(),
        })?;

    let mut pool = EntropyPool::new();
    let mut out = String::with_capacity(length);
    for _ in 0..length {
        let idx = sample_index(&mut pool, n)?;
        out.push(alphabet[idx]);
    }
    Ok(SecretValue::new(out))
}
