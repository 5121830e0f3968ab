//! Cipher state machine.
//!
//! A [`CipherSession`] owns one provider and the key it was started with, and
//! enforces a single call protocol regardless of which backend serves it:
//!
//! ```text
//! Idle -> Authenticating -> Processing -> Finalizing -> ClosedOk
//!   \__________\______________\______________\-------> ClosedFailed
//! ```
//!
//! Sessions are single-use. Closing, on any path, drops the provider and
//! zeroizes the key.

use tracing::{debug, warn};

use flintlock_common::{Error, Result};

use crate::algorithm::AlgorithmSpec;
use crate::backend::{BackendKind, DEFAULT_DETACHED_LIMIT};
use crate::keys::{Nonce, SessionKey};
use crate::provider::{AeadProvider, Direction, Sealed, Verified};

/// Lifecycle phase of a [`CipherSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Started, nothing fed yet.
    Idle,
    /// Associated data is being fed.
    Authenticating,
    /// Data is being transformed; associated data is frozen.
    Processing,
    /// A finalize call is in progress.
    Finalizing,
    /// Finalized successfully.
    ClosedOk,
    /// Aborted, failed, or rejected.
    ClosedFailed,
}

impl Phase {
    /// Whether the session can no longer be used.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::ClosedOk | Self::ClosedFailed)
    }
}

/// One live encryption or decryption.
pub struct CipherSession {
    spec: &'static AlgorithmSpec,
    backend: BackendKind,
    direction: Direction,
    key: Option<SessionKey>,
    provider: Option<Box<dyn AeadProvider>>,
    phase: Phase,
    aad_len: u64,
    processed: u64,
}

impl CipherSession {
    /// Start a session.
    ///
    /// # Preconditions
    /// - `key` and `nonce` lengths match `spec`
    ///
    /// # Errors
    /// - [`Error::UnsupportedAlgorithm`] if `backend` cannot serve `spec`
    /// - [`Error::InvalidInput`] on key or nonce length mismatch
    pub fn begin(
        spec: &'static AlgorithmSpec,
        backend: BackendKind,
        key: SessionKey,
        nonce: &Nonce,
        direction: Direction,
    ) -> Result<Self> {
        Self::begin_bounded(spec, backend, key, nonce, direction, DEFAULT_DETACHED_LIMIT)
    }

    /// Start a session whose one-shot provider, if any, buffers at most
    /// `detached_limit` bytes of associated data and message.
    ///
    /// # Errors
    /// - As [`CipherSession::begin`]
    pub fn begin_bounded(
        spec: &'static AlgorithmSpec,
        backend: BackendKind,
        key: SessionKey,
        nonce: &Nonce,
        direction: Direction,
        detached_limit: usize,
    ) -> Result<Self> {
        let backend = backend.resolve(spec)?;
        let provider = backend.begin(spec, &key, nonce, direction, detached_limit)?;

        debug!(
            algorithm = spec.name,
            backend = %backend,
            direction = direction.as_str(),
            "Cipher session started"
        );

        Ok(Self {
            spec,
            backend,
            direction,
            key: Some(key),
            provider: Some(provider),
            phase: Phase::Idle,
            aad_len: 0,
            processed: 0,
        })
    }

    /// Start an encrypting session.
    pub fn encrypt(
        spec: &'static AlgorithmSpec,
        backend: BackendKind,
        key: SessionKey,
        nonce: &Nonce,
    ) -> Result<Self> {
        Self::begin(spec, backend, key, nonce, Direction::Encrypt)
    }

    /// Start a decrypting session.
    pub fn decrypt(
        spec: &'static AlgorithmSpec,
        backend: BackendKind,
        key: SessionKey,
        nonce: &Nonce,
    ) -> Result<Self> {
        Self::begin(spec, backend, key, nonce, Direction::Decrypt)
    }

    pub fn spec(&self) -> &'static AlgorithmSpec {
        self.spec
    }

    /// Concrete backend serving this session.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Body bytes fed through `update` so far.
    pub fn bytes_processed(&self) -> u64 {
        self.processed
    }

    /// Whether the session still holds its key. False once closed.
    pub fn holds_key(&self) -> bool {
        self.key.is_some()
    }

    /// Associated data bytes fed so far.
    pub fn aad_len(&self) -> u64 {
        self.aad_len
    }

    /// Authenticate a segment of associated data.
    ///
    /// May be called repeatedly to stream associated data.
    ///
    /// # Errors
    /// - [`Error::ProtocolViolation`] once data has been processed or the
    ///   session is closed
    /// - [`Error::InvalidInput`] for non-empty associated data when the
    ///   algorithm does not authenticate any
    pub fn authenticate(&mut self, aad: &[u8]) -> Result<()> {
        match self.phase {
            Phase::Idle | Phase::Authenticating => {}
            Phase::Processing => {
                return Err(Error::protocol(
                    "associated data cannot be added after data has been processed",
                ))
            }
            other => return Err(closed(other)),
        }
        if !self.spec.supports_aad && !aad.is_empty() {
            return Err(Error::InvalidInput(format!(
                "{} does not authenticate associated data",
                self.spec.name
            )));
        }

        let result = self.provider()?.update_aad(aad);
        self.guard(result)?;
        self.aad_len += aad.len() as u64;
        self.phase = Phase::Authenticating;
        Ok(())
    }

    /// Transform a chunk of data.
    ///
    /// Freezes associated data. The returned bytes may be empty for backends
    /// that defer output to finalization.
    ///
    /// # Errors
    /// - [`Error::ProtocolViolation`] if the session is finalizing or closed
    pub fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match self.phase {
            Phase::Idle | Phase::Authenticating | Phase::Processing => {}
            other => return Err(closed(other)),
        }

        let result = self.provider()?.update(data);
        let output = self.guard(result)?;
        self.processed += data.len() as u64;
        self.phase = Phase::Processing;
        Ok(output)
    }

    /// Finish an encrypting session.
    ///
    /// # Postconditions
    /// - The session is closed and its key wiped
    ///
    /// # Errors
    /// - [`Error::ProtocolViolation`] on a decrypting or closed session
    pub fn finalize_encrypt(&mut self) -> Result<Sealed> {
        self.check_finalize(Direction::Encrypt)?;
        self.phase = Phase::Finalizing;

        let result = self.provider()?.finalize_encrypt();
        let sealed = self.guard(result)?;
        self.close(Phase::ClosedOk);
        Ok(sealed)
    }

    /// Finish a decrypting session, verifying `tag` in constant time.
    ///
    /// Returns plaintext the backend deferred until now.
    ///
    /// # Postconditions
    /// - The session is closed and its key wiped
    ///
    /// # Errors
    /// - [`Error::Authentication`] on tag mismatch; the session is
    ///   `ClosedFailed` and every byte returned by `update` must be discarded
    /// - [`Error::ProtocolViolation`] on an encrypting or closed session
    pub fn finalize_decrypt(&mut self, tag: &[u8]) -> Result<Vec<u8>> {
        self.check_finalize(Direction::Decrypt)?;
        self.phase = Phase::Finalizing;

        let result = self.provider()?.finalize_decrypt(tag);
        match self.guard(result)? {
            Verified::Authentic(output) => {
                self.close(Phase::ClosedOk);
                Ok(output)
            }
            Verified::Rejected => {
                warn!(algorithm = self.spec.name, "Authentication failed");
                self.close(Phase::ClosedFailed);
                Err(Error::Authentication)
            }
        }
    }

    /// Abandon the session. No tag is produced.
    ///
    /// Has no effect on an already closed session.
    pub fn abort(&mut self) {
        if !self.phase.is_closed() {
            self.close(Phase::ClosedFailed);
        }
    }

    fn check_finalize(&self, direction: Direction) -> Result<()> {
        match self.phase {
            Phase::Idle | Phase::Authenticating | Phase::Processing => {}
            other => return Err(closed(other)),
        }
        if self.direction != direction {
            return Err(Error::protocol(format!(
                "cannot finalize a {} session as {}",
                self.direction.as_str(),
                direction.as_str()
            )));
        }
        Ok(())
    }

    fn provider(&mut self) -> Result<&mut Box<dyn AeadProvider>> {
        self.provider
            .as_mut()
            .ok_or_else(|| Error::protocol("session is closed"))
    }

    /// Close the session as failed if a provider call errored.
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.close(Phase::ClosedFailed);
        }
        result
    }

    fn close(&mut self, phase: Phase) {
        self.provider = None;
        self.key = None;
        self.phase = phase;
        debug!(
            algorithm = self.spec.name,
            direction = self.direction.as_str(),
            bytes = self.processed,
            phase = ?phase,
            "Cipher session closed"
        );
    }
}

impl std::fmt::Debug for CipherSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherSession")
            .field("algorithm", &self.spec.name)
            .field("backend", &self.backend)
            .field("direction", &self.direction)
            .field("phase", &self.phase)
            .field("processed", &self.processed)
            .finish_non_exhaustive()
    }
}

fn closed(phase: Phase) -> Error {
    Error::protocol(format!("session is not accepting calls in phase {:?}", phase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Algorithm;

    fn pair(
        algorithm: Algorithm,
        backend: BackendKind,
    ) -> (CipherSession, CipherSession) {
        let spec = algorithm.spec();
        let key = SessionKey::generate(spec);
        let nonce = Nonce::generate(spec);
        (
            CipherSession::encrypt(spec, backend, key.clone(), &nonce).unwrap(),
            CipherSession::decrypt(spec, backend, key, &nonce).unwrap(),
        )
    }

    fn backends(algorithm: Algorithm) -> Vec<BackendKind> {
        let spec = algorithm.spec();
        let mut kinds = Vec::new();
        if spec.incremental {
            kinds.push(BackendKind::Streaming);
        }
        if spec.detached {
            kinds.push(BackendKind::Detached);
        }
        kinds
    }

    #[test]
    fn test_phases_through_roundtrip() {
        for algorithm in Algorithm::all() {
            for backend in backends(algorithm) {
                let (mut enc, mut dec) = pair(algorithm, backend);
                assert_eq!(enc.phase(), Phase::Idle);

                enc.authenticate(b"header").unwrap();
                assert_eq!(enc.phase(), Phase::Authenticating);
                let mut ct = enc.update(b"hello ").unwrap();
                ct.extend(enc.update(b"world").unwrap());
                assert_eq!(enc.phase(), Phase::Processing);
                assert_eq!(enc.bytes_processed(), 11);

                let sealed = enc.finalize_encrypt().unwrap();
                assert_eq!(enc.phase(), Phase::ClosedOk);
                ct.extend(sealed.output);

                dec.authenticate(b"header").unwrap();
                let mut pt = dec.update(&ct).unwrap();
                pt.extend(dec.finalize_decrypt(&sealed.tag).unwrap());
                assert_eq!(dec.phase(), Phase::ClosedOk);
                assert!(!dec.holds_key());
                assert_eq!(pt, b"hello world");
            }
        }
    }

    #[test]
    fn test_authenticate_after_update_is_violation() {
        for algorithm in Algorithm::all() {
            for backend in backends(algorithm) {
                let (mut enc, _) = pair(algorithm, backend);
                enc.update(b"data").unwrap();
                assert!(matches!(
                    enc.authenticate(b"late"),
                    Err(Error::ProtocolViolation(_))
                ));
                assert_eq!(enc.phase(), Phase::Processing);
            }
        }
    }

    #[test]
    fn test_closed_session_rejects_everything() {
        let (mut enc, _) = pair(Algorithm::Aes256Gcm, BackendKind::Streaming);
        enc.finalize_encrypt().unwrap();

        assert!(matches!(enc.update(b"x"), Err(Error::ProtocolViolation(_))));
        assert!(matches!(
            enc.authenticate(b"x"),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(matches!(
            enc.finalize_encrypt(),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_direction_mismatch() {
        let (mut enc, mut dec) = pair(Algorithm::ChaCha20Poly1305, BackendKind::Auto);
        assert!(matches!(
            enc.finalize_decrypt(&[0u8; 16]),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(matches!(
            dec.finalize_encrypt(),
            Err(Error::ProtocolViolation(_))
        ));
        // A mismatched finalize leaves the session usable.
        assert_eq!(enc.phase(), Phase::Idle);
        enc.finalize_encrypt().unwrap();
    }

    #[test]
    fn test_bad_tag_closes_failed() {
        for algorithm in Algorithm::all() {
            for backend in backends(algorithm) {
                let (mut enc, mut dec) = pair(algorithm, backend);
                let mut ct = enc.update(b"payload").unwrap();
                let sealed = enc.finalize_encrypt().unwrap();
                ct.extend(sealed.output);

                let mut tag = sealed.tag.clone();
                tag[5] ^= 0x10;
                dec.update(&ct).unwrap();
                assert!(matches!(
                    dec.finalize_decrypt(&tag),
                    Err(Error::Authentication)
                ));
                assert_eq!(dec.phase(), Phase::ClosedFailed);
                assert!(matches!(dec.update(b"x"), Err(Error::ProtocolViolation(_))));
            }
        }
    }

    #[test]
    fn test_abort() {
        let (mut enc, _) = pair(Algorithm::XChaCha20Poly1305, BackendKind::Auto);
        enc.update(b"partial").unwrap();
        assert!(enc.holds_key());
        enc.abort();
        assert_eq!(enc.phase(), Phase::ClosedFailed);
        assert!(!enc.holds_key());
        assert!(matches!(
            enc.finalize_encrypt(),
            Err(Error::ProtocolViolation(_))
        ));

        // Aborting a closed session changes nothing.
        let (mut done, _) = pair(Algorithm::XChaCha20Poly1305, BackendKind::Auto);
        done.finalize_encrypt().unwrap();
        done.abort();
        assert_eq!(done.phase(), Phase::ClosedOk);
    }

    #[test]
    fn test_debug_hides_key() {
        let (enc, _) = pair(Algorithm::Aes128Gcm, BackendKind::Auto);
        let shown = format!("{:?}", enc);
        assert!(shown.contains("aes-128-gcm"));
        assert!(!shown.contains("key"));
    }

    #[test]
    fn test_associated_data_refused_without_support() {
        let spec: &'static AlgorithmSpec = Box::leak(Box::new(AlgorithmSpec {
            supports_aad: false,
            ..*Algorithm::ChaCha20Poly1305.spec()
        }));
        let key = SessionKey::generate(spec);
        let nonce = Nonce::generate(spec);
        let mut enc = CipherSession::encrypt(spec, BackendKind::Auto, key, &nonce).unwrap();

        enc.authenticate(b"").unwrap();
        assert!(matches!(
            enc.authenticate(b"header"),
            Err(Error::InvalidInput(_))
        ));
        // Refusal happens before the provider sees anything.
        assert_eq!(enc.aad_len(), 0);
        assert!(!enc.phase().is_closed());
        enc.update(b"body").unwrap();
        enc.finalize_encrypt().unwrap();
    }

    #[test]
    fn test_detached_limit_closes_session() {
        let spec = Algorithm::Aes256Siv.spec();
        let key = SessionKey::generate(spec);
        let nonce = Nonce::generate(spec);
        let mut enc = CipherSession::begin_bounded(
            spec,
            BackendKind::Auto,
            key,
            &nonce,
            Direction::Encrypt,
            32,
        )
        .unwrap();
        enc.update(&[0u8; 32]).unwrap();
        assert!(matches!(enc.update(b"x"), Err(Error::InvalidInput(_))));
        assert_eq!(enc.phase(), Phase::ClosedFailed);
        assert!(!enc.holds_key());
    }

    #[test]
    fn test_session_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CipherSession>();
    }
}
