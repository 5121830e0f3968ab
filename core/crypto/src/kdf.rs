//! Passphrase key derivation.
//!
//! Argon2id is the default: a memory-hard function resistant to GPU and
//! time-memory trade-off attacks. scrypt is available for interoperability.
//! Cost parameters travel with every locked stream, so they are also bounded
//! by [`KdfLimits`] before any derivation runs.

use argon2::{Algorithm as Argon2Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use flintlock_common::{Error, Result};

use crate::keys::{Passphrase, Salt, SessionKey};

/// Size of the cost-parameter block persisted in stream headers.
pub const ENCODED_PARAMS_LEN: usize = 12;

/// Cost parameters of the passphrase KDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kdf", rename_all = "snake_case")]
pub enum KdfParams {
    /// Argon2id (version 0x13).
    Argon2id {
        /// Memory cost in KiB (e.g., 65536 = 64 MiB).
        memory_cost: u32,
        /// Number of iterations.
        time_cost: u32,
        /// Degree of parallelism.
        parallelism: u32,
    },
    /// scrypt.
    Scrypt {
        /// Base-2 logarithm of the CPU/memory cost N.
        log_n: u8,
        /// Block size.
        r: u32,
        /// Parallelization.
        p: u32,
    },
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self::Argon2id {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self::Argon2id {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for constrained devices.
    pub fn moderate() -> Self {
        Self::Argon2id {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// scrypt with the commonly recommended interactive cost (N = 2^15).
    pub fn scrypt_interactive() -> Self {
        Self::Scrypt {
            log_n: 15,
            r: 8,
            p: 1,
        }
    }

    /// Key-source id persisted in stream headers.
    pub fn id(&self) -> u8 {
        match self {
            Self::Argon2id { .. } => 1,
            Self::Scrypt { .. } => 2,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Argon2id { .. } => "argon2id",
            Self::Scrypt { .. } => "scrypt",
        }
    }

    /// Encode into the fixed header block (three little-endian u32 slots).
    pub fn encode(&self) -> [u8; ENCODED_PARAMS_LEN] {
        let (a, b, c) = match *self {
            Self::Argon2id {
                memory_cost,
                time_cost,
                parallelism,
            } => (memory_cost, time_cost, parallelism),
            Self::Scrypt { log_n, r, p } => (u32::from(log_n), r, p),
        };
        let mut out = [0u8; ENCODED_PARAMS_LEN];
        out[0..4].copy_from_slice(&a.to_le_bytes());
        out[4..8].copy_from_slice(&b.to_le_bytes());
        out[8..12].copy_from_slice(&c.to_le_bytes());
        out
    }

    /// Decode a header block for the given key-source id.
    ///
    /// # Errors
    /// - [`Error::MalformedHeader`] for an unknown id
    /// - [`Error::KeyDerivation`] if scrypt's `log_n` does not fit a byte
    pub fn decode(id: u8, bytes: &[u8; ENCODED_PARAMS_LEN]) -> Result<Self> {
        let slot = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let (a, b, c) = (slot(0), slot(4), slot(8));
        match id {
            1 => Ok(Self::Argon2id {
                memory_cost: a,
                time_cost: b,
                parallelism: c,
            }),
            2 => {
                let log_n = u8::try_from(a)
                    .map_err(|_| Error::KeyDerivation(format!("scrypt log_n out of range: {}", a)))?;
                Ok(Self::Scrypt { log_n, r: b, p: c })
            }
            other => Err(Error::MalformedHeader(format!(
                "unknown key source id {}",
                other
            ))),
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Upper bounds on accepted KDF cost parameters.
///
/// Applied both when locking and when a header asks for a derivation, so a
/// crafted stream cannot demand unbounded memory or time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfLimits {
    /// Largest Argon2id memory cost in KiB.
    pub max_argon2_memory_kib: u32,
    /// Largest Argon2id iteration count.
    pub max_argon2_time_cost: u32,
    /// Largest parallelism / lane count for either KDF.
    pub max_parallelism: u32,
    /// Largest scrypt `log_n`.
    pub max_scrypt_log_n: u8,
    /// Largest scrypt block size `r`.
    pub max_scrypt_r: u32,
    /// Largest scrypt working set, `128 * r * 2^log_n` bytes.
    pub max_scrypt_memory_bytes: u64,
}

impl Default for KdfLimits {
    fn default() -> Self {
        Self {
            max_argon2_memory_kib: 1024 * 1024, // 1 GiB
            max_argon2_time_cost: 16,
            max_parallelism: 16,
            max_scrypt_log_n: 22,
            max_scrypt_r: 32,
            max_scrypt_memory_bytes: 1 << 30, // 1 GiB
        }
    }
}

impl KdfLimits {
    /// Check `params` against these limits.
    ///
    /// # Errors
    /// - [`Error::KeyDerivation`] naming the first parameter out of bounds
    pub fn check(&self, params: &KdfParams) -> Result<()> {
        match *params {
            KdfParams::Argon2id {
                memory_cost,
                time_cost,
                parallelism,
            } => {
                bounded("argon2 memory_cost", memory_cost, 1, self.max_argon2_memory_kib)?;
                bounded("argon2 time_cost", time_cost, 1, self.max_argon2_time_cost)?;
                bounded("argon2 parallelism", parallelism, 1, self.max_parallelism)?;
            }
            KdfParams::Scrypt { log_n, r, p } => {
                bounded(
                    "scrypt log_n",
                    u32::from(log_n),
                    1,
                    u32::from(self.max_scrypt_log_n),
                )?;
                bounded("scrypt r", r, 1, self.max_scrypt_r)?;
                bounded("scrypt p", p, 1, self.max_parallelism)?;

                let memory = 1u128
                    .checked_shl(u32::from(log_n))
                    .unwrap_or(u128::MAX)
                    .saturating_mul(128 * u128::from(r));
                if memory > u128::from(self.max_scrypt_memory_bytes) {
                    return Err(Error::KeyDerivation(format!(
                        "scrypt memory {} bytes exceeds limit of {} bytes",
                        memory, self.max_scrypt_memory_bytes
                    )));
                }
            }
        }
        Ok(())
    }
}

fn bounded(name: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if value < min || value > max {
        return Err(Error::KeyDerivation(format!(
            "{} = {} outside [{}, {}]",
            name, value, min, max
        )));
    }
    Ok(())
}

/// Derive a session key of `key_len` bytes from a passphrase and salt.
///
/// # Preconditions
/// - `passphrase` must not be empty
/// - `params` should already have passed [`KdfLimits::check`]
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - [`Error::InvalidInput`] if the passphrase is empty
/// - [`Error::KeyDerivation`] if the KDF rejects the parameters
///
/// # Security
/// - Passphrase is not stored or logged
pub fn derive_key(
    passphrase: &Passphrase,
    salt: &Salt,
    params: &KdfParams,
    key_len: usize,
) -> Result<SessionKey> {
    if passphrase.as_bytes().is_empty() {
        return Err(Error::InvalidInput("Passphrase cannot be empty".to_string()));
    }

    let mut key_bytes = zeroize::Zeroizing::new(vec![0u8; key_len]);

    match *params {
        KdfParams::Argon2id {
            memory_cost,
            time_cost,
            parallelism,
        } => {
            let argon2_params = Params::new(memory_cost, time_cost, parallelism, Some(key_len))
                .map_err(|e| Error::KeyDerivation(format!("Invalid KDF parameters: {}", e)))?;

            let argon2 = Argon2::new(Argon2Algorithm::Argon2id, Version::V0x13, argon2_params);

            argon2
                .hash_password_into(passphrase.as_bytes(), salt.as_bytes(), &mut key_bytes)
                .map_err(|e| Error::KeyDerivation(format!("Key derivation failed: {}", e)))?;
        }
        KdfParams::Scrypt { log_n, r, p } => {
            let scrypt_params = scrypt::Params::new(log_n, r, p, key_len)
                .map_err(|e| Error::KeyDerivation(format!("Invalid KDF parameters: {}", e)))?;

            scrypt::scrypt(
                passphrase.as_bytes(),
                salt.as_bytes(),
                &scrypt_params,
                &mut key_bytes,
            )
            .map_err(|e| Error::KeyDerivation(format!("Key derivation failed: {}", e)))?;
        }
    }

    Ok(SessionKey::from_bytes(key_bytes.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_argon2() -> KdfParams {
        KdfParams::Argon2id {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn cheap_scrypt() -> KdfParams {
        KdfParams::Scrypt {
            log_n: 8,
            r: 8,
            p: 1,
        }
    }

    #[test]
    fn test_derive_key_deterministic() {
        let passphrase = Passphrase::from("test-password-123");
        let salt = Salt::from_bytes([42u8; 32]);

        for params in [cheap_argon2(), cheap_scrypt()] {
            let key1 = derive_key(&passphrase, &salt, &params, 32).unwrap();
            let key2 = derive_key(&passphrase, &salt, &params, 32).unwrap();
            assert_eq!(key1.as_bytes(), key2.as_bytes());
        }
    }

    #[test]
    fn test_derive_key_different_salt() {
        let passphrase = Passphrase::from("test-password-123");
        let salt1 = Salt::from_bytes([1u8; 32]);
        let salt2 = Salt::from_bytes([2u8; 32]);
        let params = cheap_argon2();

        let key1 = derive_key(&passphrase, &salt1, &params, 32).unwrap();
        let key2 = derive_key(&passphrase, &salt2, &params, 32).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_kdf() {
        let passphrase = Passphrase::from("same");
        let salt = Salt::from_bytes([7u8; 32]);

        let key1 = derive_key(&passphrase, &salt, &cheap_argon2(), 32).unwrap();
        let key2 = derive_key(&passphrase, &salt, &cheap_scrypt(), 32).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_length_follows_request() {
        let passphrase = Passphrase::from("siv wants more");
        let salt = Salt::generate();

        let key = derive_key(&passphrase, &salt, &cheap_scrypt(), 64).unwrap();
        assert_eq!(key.len(), 64);
    }

    #[test]
    fn test_derive_key_empty_password_fails() {
        let salt = Salt::generate();

        assert!(matches!(
            derive_key(&Passphrase::from(""), &salt, &cheap_argon2(), 32),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_params_encode_decode() {
        for params in [KdfParams::interactive(), KdfParams::scrypt_interactive()] {
            let decoded = KdfParams::decode(params.id(), &params.encode()).unwrap();
            assert_eq!(decoded, params);
        }
        assert!(matches!(
            KdfParams::decode(9, &[0u8; ENCODED_PARAMS_LEN]),
            Err(Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_limits_reject_excessive_costs() {
        let limits = KdfLimits::default();
        assert!(limits.check(&KdfParams::interactive()).is_ok());
        assert!(limits.check(&KdfParams::sensitive()).is_ok());
        assert!(limits.check(&KdfParams::scrypt_interactive()).is_ok());

        let greedy = KdfParams::Argon2id {
            memory_cost: u32::MAX,
            time_cost: 3,
            parallelism: 4,
        };
        assert!(matches!(limits.check(&greedy), Err(Error::KeyDerivation(_))));

        let zero_lanes = KdfParams::Argon2id {
            memory_cost: 4096,
            time_cost: 1,
            parallelism: 0,
        };
        assert!(limits.check(&zero_lanes).is_err());

        let huge_n = KdfParams::Scrypt {
            log_n: 40,
            r: 8,
            p: 1,
        };
        assert!(limits.check(&huge_n).is_err());
    }

    #[test]
    fn test_limits_bound_scrypt_memory() {
        let limits = KdfLimits::default();

        // Each factor is within its own bound but the product is 16 GiB.
        let wide = KdfParams::Scrypt {
            log_n: 22,
            r: 32,
            p: 16,
        };
        assert!(matches!(limits.check(&wide), Err(Error::KeyDerivation(_))));

        // Exactly 1 GiB is accepted.
        let edge = KdfParams::Scrypt {
            log_n: 20,
            r: 8,
            p: 1,
        };
        assert!(limits.check(&edge).is_ok());

        let tighter = KdfLimits {
            max_scrypt_memory_bytes: 1 << 20,
            ..KdfLimits::default()
        };
        assert!(tighter.check(&KdfParams::scrypt_interactive()).is_err());
    }

    #[test]
    fn test_params_serde() {
        let json = serde_json::to_string(&KdfParams::scrypt_interactive()).unwrap();
        assert!(json.contains("\"kdf\":\"scrypt\""));
        let back: KdfParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, KdfParams::scrypt_interactive());
    }
}
