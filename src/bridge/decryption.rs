//! Decryption bridge: owns the local key pair and opens encrypted messages.

use tracing::{debug, error, warn};
use zeroize::Zeroizing;

use crate::bridge::{ContextState, EncryptedMessage, Entry, lock_live};
use crate::buffer::ScratchBuffer;
use crate::engine::PkEngine;
use crate::error::PkError;
use crate::handle::{Handle, HandleArena};
use crate::pk::OlmPk;
use crate::random::{SecureRandom, random_buffer};

/// Tag carried by every decryption handle.
pub const DECRYPTION_TAG: u8 = 0x44;

pub struct DecryptionBridge<E: PkEngine = OlmPk> {
    engine: E,
    contexts: HandleArena<Entry<E::Decryption>>,
}

impl Default for DecryptionBridge<OlmPk> {
    fn default() -> Self {
        Self::new(OlmPk)
    }
}

impl<E: PkEngine> DecryptionBridge<E> {
    pub fn new(engine: E) -> Self {
        DecryptionBridge {
            engine,
            contexts: HandleArena::new(DECRYPTION_TAG),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Number of live decryption contexts.
    pub fn live_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Creates a decryption context and returns its handle.
    pub fn create(&self) -> Result<Handle, PkError> {
        let entry = Entry::new(self.engine.new_decryption());
        match self.contexts.insert(entry) {
            Ok(handle) => {
                debug!(?handle, "decryption context created");
                Ok(handle)
            }
            Err(e) => {
                error!("init decryption failed: {e}");
                Err(e)
            }
        }
    }

    /// Clears and frees the context. Null and stale handles are ignored.
    /// An operation already running on the context finishes first.
    pub fn release(&self, handle: Handle) {
        match self.contexts.remove(handle) {
            Some(shared) => {
                let mut entry = shared.lock();
                if entry.state != ContextState::Released {
                    self.engine.clear_decryption(&mut entry.ctx);
                    entry.state = ContextState::Released;
                }
                debug!(?handle, "decryption context released");
            }
            None => warn!(?handle, "release of invalid decryption handle"),
        }
    }

    pub fn state(&self, handle: Handle) -> ContextState {
        if handle.is_null() {
            return ContextState::Uninitialized;
        }
        self.contexts
            .resolve(handle)
            .map_or(ContextState::Released, |shared| shared.lock().state)
    }

    /// Generates a key pair and returns the encoded public key.
    ///
    /// A context that fails to produce a key pair is not reused: on any
    /// failure past handle resolution the context is cleared and released,
    /// and the handle becomes stale.
    pub fn generate_key<R>(&self, handle: Handle, rng: &mut R) -> Result<Vec<u8>, PkError>
    where
        R: SecureRandom + ?Sized,
    {
        let shared = match self.contexts.resolve(handle) {
            Ok(shared) => shared,
            Err(e) => {
                error!(?handle, "generate key failed: {e}");
                return Err(e);
            }
        };
        let mut entry = match lock_live(&shared) {
            Ok(entry) => entry,
            Err(e) => {
                error!(?handle, "generate key failed: {e}");
                return Err(e);
            }
        };

        match self.generate(&mut entry.ctx, rng) {
            Ok(public_key) => {
                entry.state = ContextState::Ready;
                debug!(?handle, "public key generated");
                Ok(public_key)
            }
            Err(e) => {
                error!(?handle, "generate key failed, releasing context: {e}");
                self.engine.clear_decryption(&mut entry.ctx);
                entry.state = ContextState::Released;
                drop(entry);
                self.contexts.remove(handle);
                Err(e)
            }
        }
    }

    fn generate<R>(&self, ctx: &mut E::Decryption, rng: &mut R) -> Result<Vec<u8>, PkError>
    where
        R: SecureRandom + ?Sized,
    {
        let random = random_buffer(rng, self.engine.generate_key_random_length())?;
        let mut public_key = ScratchBuffer::zeroed(self.engine.key_length())?;
        let written = self.engine.generate_key(ctx, &mut public_key, &random)?;
        Ok(public_key[..written].to_vec())
    }

    /// Installs a raw private key and returns the matching encoded public
    /// key. A rejected key leaves the context as it was.
    pub fn set_private_key(
        &self,
        handle: Handle,
        private_key: Option<&[u8]>,
    ) -> Result<Vec<u8>, PkError> {
        let result = self.contexts.resolve(handle).and_then(|shared| {
            let mut entry = lock_live(&shared)?;
            let private_key = match private_key {
                Some(key) if !key.is_empty() => key,
                _ => return Err(PkError::InvalidKey),
            };
            let mut public_key = ScratchBuffer::zeroed(self.engine.key_length())?;
            let written = self
                .engine
                .key_from_private(&mut entry.ctx, &mut public_key, private_key)?;
            entry.state = ContextState::Ready;
            Ok(public_key[..written].to_vec())
        });
        match &result {
            Ok(_) => debug!(?handle, "private key imported"),
            Err(e) => error!(?handle, "set private key failed: {e}"),
        }
        result
    }

    /// Exports the raw private key of a keyed context.
    pub fn private_key(&self, handle: Handle) -> Result<Zeroizing<Vec<u8>>, PkError> {
        let result = self.contexts.resolve(handle).and_then(|shared| {
            let mut entry = lock_live(&shared)?;
            if entry.state != ContextState::Ready {
                return Err(PkError::InvalidKey);
            }
            let mut out = ScratchBuffer::zeroed(self.engine.private_key_length())?;
            let written = self.engine.private_key(&mut entry.ctx, &mut out)?;
            Ok(Zeroizing::new(out[..written].to_vec()))
        });
        if let Err(e) = &result {
            error!(?handle, "private key export failed: {e}");
        }
        result
    }

    /// Verifies and decrypts `message`, returning exactly the plaintext
    /// bytes the engine reports.
    pub fn decrypt(
        &self,
        handle: Handle,
        message: Option<&EncryptedMessage>,
    ) -> Result<Vec<u8>, PkError> {
        let result = self.contexts.resolve(handle).and_then(|shared| {
            let mut entry = lock_live(&shared)?;
            let message = message.ok_or(PkError::InvalidArgument("null encrypted message"))?;
            if entry.state != ContextState::Ready {
                return Err(PkError::InvalidKey);
            }
            self.open(&mut entry.ctx, message)
        });
        match &result {
            Ok(plaintext) => debug!(?handle, length = plaintext.len(), "decrypt succeeded"),
            Err(e) => error!(?handle, "decrypt failed: {e}"),
        }
        result
    }

    fn open(
        &self,
        ctx: &mut E::Decryption,
        message: &EncryptedMessage,
    ) -> Result<Vec<u8>, PkError> {
        let max_plaintext_length = self
            .engine
            .max_plaintext_length(ctx, message.ciphertext.len())?;

        let mut plaintext = ScratchBuffer::zeroed(max_plaintext_length)?;
        // The engine decodes its ciphertext input in place.
        let mut ciphertext = ScratchBuffer::copy_of(&message.ciphertext)?;

        let length = self.engine.decrypt(
            ctx,
            message.ephemeral_key.as_bytes(),
            message.mac.as_bytes(),
            &mut ciphertext,
            &mut plaintext,
        )?;
        Ok(plaintext[..length].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::OsRandom;

    #[test]
    fn test_generate_key_moves_to_ready() {
        let bridge = DecryptionBridge::new(OlmPk);
        let handle = bridge.create().unwrap();
        assert_eq!(bridge.state(handle), ContextState::Allocated);

        let public_key = bridge.generate_key(handle, &mut OsRandom).unwrap();
        assert_eq!(public_key.len(), 43);
        assert_eq!(bridge.state(handle), ContextState::Ready);
    }

    #[test]
    fn test_decrypt_before_key_pair() {
        let bridge = DecryptionBridge::new(OlmPk);
        let handle = bridge.create().unwrap();
        let message = EncryptedMessage::new(b"AAAA".to_vec(), "AAAA".into(), "AAAA".into());
        assert_eq!(
            bridge.decrypt(handle, Some(&message)),
            Err(PkError::InvalidKey)
        );
        assert_eq!(bridge.state(handle), ContextState::Allocated);
    }

    #[test]
    fn test_null_message() {
        let bridge = DecryptionBridge::new(OlmPk);
        let handle = bridge.create().unwrap();
        bridge.generate_key(handle, &mut OsRandom).unwrap();
        assert_eq!(
            bridge.decrypt(handle, None),
            Err(PkError::InvalidArgument("null encrypted message"))
        );
    }

    #[test]
    fn test_invalid_ciphertext_length_is_engine_error() {
        let bridge = DecryptionBridge::new(OlmPk);
        let handle = bridge.create().unwrap();
        bridge.generate_key(handle, &mut OsRandom).unwrap();
        // No base64 text is 5 characters long.
        let message = EncryptedMessage::new(b"AAAAA".to_vec(), "AAAA".into(), "AAAA".into());
        assert_eq!(
            bridge.decrypt(handle, Some(&message)),
            Err(PkError::EngineError("INVALID_BASE64".into()))
        );
        assert_eq!(bridge.state(handle), ContextState::Ready);
    }

    #[test]
    fn test_private_key_requires_key_pair() {
        let bridge = DecryptionBridge::new(OlmPk);
        let handle = bridge.create().unwrap();
        assert_eq!(bridge.private_key(handle).unwrap_err(), PkError::InvalidKey);
        assert_eq!(
            bridge.set_private_key(handle, None).unwrap_err(),
            PkError::InvalidKey
        );
        assert_eq!(
            bridge
                .set_private_key(handle, Some([7u8; 16].as_slice()))
                .unwrap_err(),
            PkError::EngineError("INPUT_BUFFER_TOO_SMALL".into())
        );
        assert_eq!(bridge.state(handle), ContextState::Allocated);
    }
}
