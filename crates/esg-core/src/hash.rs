//! PBKDF2 hash transform producing self-describing digests.
//!
//! Digests use the crypt-style encoding understood by Authelia and passlib:
//!
//! ```text
//! $pbkdf2-<variant>$<iterations>$<salt>$<key>
//! ```
//!
//! Salt and key are "adapted base64": the standard alphabet with `.` in place
//! of `+` and no padding. The salt is drawn fresh for every digest, so the
//! encoded string alone is enough to verify a candidate later.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::{Sha224, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::HashError;

/// Default PBKDF2 iteration count.
pub const DEFAULT_ITERATIONS: u32 = 310_000;

/// Default salt length in bytes.
pub const DEFAULT_SALT_LENGTH: usize = 16;

/// Smallest accepted salt length in bytes.
pub const MIN_SALT_LENGTH: usize = 8;

/// Largest accepted salt length in bytes.
pub const MAX_SALT_LENGTH: usize = 1024;

/// HMAC digest used inside PBKDF2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashVariant {
    Sha224,
    Sha256,
    Sha384,
    #[default]
    Sha512,
}

impl HashVariant {
    /// Name used in the encoded digest identifier.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Derived key length in bytes, equal to the digest output size.
    #[must_use]
    pub fn key_length(self) -> usize {
        match self {
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    fn from_identifier(id: &str) -> Option<Self> {
        match id.strip_prefix("pbkdf2-")? {
            "sha224" => Some(Self::Sha224),
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    fn derive(self, input: &[u8], salt: &[u8], rounds: u32, out: &mut [u8]) {
        match self {
            Self::Sha224 => pbkdf2_hmac::<Sha224>(input, salt, rounds, out),
            Self::Sha256 => pbkdf2_hmac::<Sha256>(input, salt, rounds, out),
            Self::Sha384 => pbkdf2_hmac::<Sha384>(input, salt, rounds, out),
            Self::Sha512 => pbkdf2_hmac::<Sha512>(input, salt, rounds, out),
        }
    }
}

impl fmt::Display for HashVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved PBKDF2 parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    pub iterations: u32,
    pub salt_length: usize,
    pub variant: HashVariant,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            salt_length: DEFAULT_SALT_LENGTH,
            variant: HashVariant::default(),
        }
    }
}

impl HashParams {
    /// Check the parameters can build a hasher.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::Construction`] for zero iterations or a salt
    /// length outside `MIN_SALT_LENGTH..=MAX_SALT_LENGTH`.
    pub fn check(&self) -> Result<(), HashError> {
        if self.iterations == 0 {
            return Err(HashError::Construction {
                reason: "iterations must be at least 1".to_owned(),
            });
        }
        if !(MIN_SALT_LENGTH..=MAX_SALT_LENGTH).contains(&self.salt_length) {
            return Err(HashError::Construction {
                reason: format!(
                    "salt length {} outside {MIN_SALT_LENGTH}..={MAX_SALT_LENGTH}",
                    self.salt_length
                ),
            });
        }
        Ok(())
    }
}

/// Hash `input` with a fresh random salt and return the encoded digest.
///
/// # Errors
///
/// - [`HashError::Construction`] if `params` fail [`HashParams::check`].
/// - [`HashError::Compute`] if the entropy source fails while drawing the salt.
pub fn hash(input: &[u8], params: &HashParams) -> Result<String, HashError> {
    params.check()?;

    let mut salt = vec![0u8; params.salt_length];
    getrandom::fill(&mut salt).map_err(|e| HashError::Compute {
        reason: format!("salt generation failed: {e}"),
    })?;

    let mut key = Zeroizing::new(vec![0u8; params.variant.key_length()]);
    params
        .variant
        .derive(input, &salt, params.iterations, key.as_mut_slice());

    Ok(format!(
        "$pbkdf2-{}${}${}${}",
        params.variant,
        params.iterations,
        encode_ab64(&salt),
        encode_ab64(&key)
    ))
}

/// Check `input` against an encoded digest produced by [`hash`].
///
/// Returns `Ok(false)` on mismatch. The comparison is constant time.
///
/// # Errors
///
/// Returns [`HashError::MalformedDigest`] if `encoded` cannot be parsed.
pub fn verify(input: &[u8], encoded: &str) -> Result<bool, HashError> {
    let parsed = ParsedDigest::parse(encoded)?;

    let mut candidate = Zeroizing::new(vec![0u8; parsed.key.len()]);
    parsed
        .variant
        .derive(input, &parsed.salt, parsed.iterations, candidate.as_mut_slice());

    Ok(bool::from(candidate.as_slice().ct_eq(&parsed.key)))
}

struct ParsedDigest {
    variant: HashVariant,
    iterations: u32,
    salt: Vec<u8>,
    key: Vec<u8>,
}

impl ParsedDigest {
    fn parse(encoded: &str) -> Result<Self, HashError> {
        let malformed = |reason: &str| HashError::MalformedDigest {
            reason: reason.to_owned(),
        };

        let mut parts = encoded.split('$');
        if parts.next() != Some("") {
            return Err(malformed("digest must start with '$'"));
        }
        let (Some(id), Some(iterations), Some(salt), Some(key), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(malformed("expected four '$'-separated fields"));
        };

        let variant =
            HashVariant::from_identifier(id).ok_or_else(|| malformed("unknown identifier"))?;
        let iterations: u32 = iterations
            .parse()
            .map_err(|_| malformed("iteration count is not a number"))?;
        if iterations == 0 {
            return Err(malformed("iteration count is zero"));
        }
        let salt = decode_ab64(salt).ok_or_else(|| malformed("salt is not adapted base64"))?;
        let key = decode_ab64(key).ok_or_else(|| malformed("key is not adapted base64"))?;
        if key.is_empty() {
            return Err(malformed("key is empty"));
        }

        Ok(Self {
            variant,
            iterations,
            salt,
            key,
        })
    }
}

fn encode_ab64(bytes: &[u8]) -> String {
    STANDARD_NO_PAD.encode(bytes).replace('+', ".")
}

fn decode_ab64(text: &str) -> Option<Vec<u8>> {
    STANDARD_NO_PAD.decode(text.replace('.', "+")).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fast(variant: HashVariant) -> HashParams {
        HashParams {
            iterations: 1_000,
            salt_length: 16,
            variant,
        }
    }

    #[test]
    fn default_digest_is_self_describing() {
        let digest = hash(b"correct horse", &HashParams::default()).unwrap();
        let fields: Vec<&str> = digest.split('$').collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[1], "pbkdf2-sha512");
        assert_eq!(fields[2], "310000");
        // 16 bytes → 22 chars, 64 bytes → 86 chars without padding.
        assert_eq!(fields[3].len(), 22);
        assert_eq!(fields[4].len(), 86);
        assert!(verify(b"correct horse", &digest).unwrap());
    }

    #[test]
    fn verify_round_trips_every_variant() {
        for variant in [
            HashVariant::Sha224,
            HashVariant::Sha256,
            HashVariant::Sha384,
            HashVariant::Sha512,
        ] {
            let digest = hash(b"s3cr3t", &fast(variant)).unwrap();
            assert!(digest.starts_with(&format!("$pbkdf2-{variant}$1000$")));
            assert!(verify(b"s3cr3t", &digest).unwrap());
            assert!(!verify(b"s3cr3T", &digest).unwrap());
        }
    }

    #[test]
    fn fresh_salt_per_digest() {
        let a = hash(b"same", &fast(HashVariant::Sha256)).unwrap();
        let b = hash(b"same", &fast(HashVariant::Sha256)).unwrap();
        assert_ne!(a, b);
        assert!(verify(b"same", &a).unwrap());
        assert!(verify(b"same", &b).unwrap());
    }

    #[test]
    fn known_vector_verifies() {
        // RFC 6070-style check through the encoder: PBKDF2-HMAC-SHA256,
        // password "password", salt "salt", 1 iteration.
        let mut key = [0u8; 32];
        HashVariant::Sha256.derive(b"password", b"salt", 1, &mut key);
        let encoded = format!(
            "$pbkdf2-sha256$1${}${}",
            encode_ab64(b"salt"),
            encode_ab64(&key)
        );
        assert!(verify(b"password", &encoded).unwrap());
        assert_eq!(
            key[..4],
            [0x12, 0x0f, 0xb6, 0xcf],
            "PBKDF2-HMAC-SHA256 test vector prefix"
        );
    }

    #[test]
    fn adapted_base64_replaces_plus() {
        // 0xfb 0xef encodes to "++8" in standard base64.
        assert_eq!(encode_ab64(&[0xfb, 0xef]), "..8");
        assert_eq!(decode_ab64("..8").unwrap(), vec![0xfb, 0xef]);
    }

    #[test]
    fn zero_iterations_fail_construction() {
        let params = HashParams {
            iterations: 0,
            ..HashParams::default()
        };
        assert!(matches!(
            hash(b"x", &params),
            Err(HashError::Construction { .. })
        ));
    }

    #[test]
    fn short_salt_fails_construction() {
        let params = HashParams {
            salt_length: 4,
            ..fast(HashVariant::Sha512)
        };
        assert!(matches!(
            hash(b"x", &params),
            Err(HashError::Construction { .. })
        ));
    }

    #[test]
    fn malformed_digests_are_rejected() {
        for bad in [
            "",
            "pbkdf2-sha512$1$c2FsdA$a2V5",
            "$pbkdf2-md5$1$c2FsdA$a2V5",
            "$pbkdf2-sha512$many$c2FsdA$a2V5",
            "$pbkdf2-sha512$0$c2FsdA$a2V5",
            "$pbkdf2-sha512$1$c2FsdA",
            "$pbkdf2-sha512$1$c2FsdA$a2V5$extra",
            "$pbkdf2-sha512$1$!!$a2V5",
        ] {
            assert!(
                matches!(verify(b"x", bad), Err(HashError::MalformedDigest { .. })),
                "accepted {bad:?}"
            );
        }
    }
}
