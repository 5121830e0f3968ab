//! Cryptographic engine for Flintlock.
//!
//! This module provides:
//! - An algorithm catalogue with wire ids and tuned chunk sizes
//! - Two provider backends with one calling convention
//! - A cipher state machine enforcing the AEAD call protocol
//! - Chunked streaming encryption over `Read`/`Write`
//! - Key derivation using Argon2id or scrypt, with cost bounds
//! - Message digests, including SHAKE and variable-length BLAKE2
//! - RSA (OAEP, PSS) and P-256/P-384 (ECDSA, ECDH) keys with PKCS#8/PEM
//!   serialization
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Tags are compared in constant time

pub mod algorithm;
pub mod asymmetric;
pub mod backend;
pub mod hash;
pub mod kdf;
pub mod keys;
pub mod provider;
pub mod session;
pub mod stream;

pub use algorithm::{Algorithm, AlgorithmSpec, ALGORITHMS};
pub use asymmetric::{Encoding, PrivateFormat, PublicFormat};
pub use backend::{BackendKind, DEFAULT_DETACHED_LIMIT};
pub use hash::{HashAlgorithm, Hasher};
pub use kdf::{derive_key, KdfLimits, KdfParams};
pub use keys::{KeyMaterial, Nonce, Passphrase, Salt, SessionKey};
pub use provider::{AeadProvider, Direction, Sealed, Verified};
pub use session::{CipherSession, Phase};
pub use stream::{ChunkedDriver, MAX_CHUNK_SIZE};
