//! Encryption bridge: recipient key in, encrypted messages out.

use tracing::{debug, error, warn};

use crate::bridge::{ContextState, EncryptedMessage, Entry, lock_live};
use crate::buffer::ScratchBuffer;
use crate::engine::PkEngine;
use crate::error::PkError;
use crate::handle::{Handle, HandleArena};
use crate::pk::OlmPk;
use crate::random::{SecureRandom, random_buffer};

/// Tag carried by every encryption handle.
pub const ENCRYPTION_TAG: u8 = 0x45;

pub struct EncryptionBridge<E: PkEngine = OlmPk> {
    engine: E,
    contexts: HandleArena<Entry<E::Encryption>>,
}

impl Default for EncryptionBridge<OlmPk> {
    fn default() -> Self {
        Self::new(OlmPk)
    }
}

impl<E: PkEngine> EncryptionBridge<E> {
    pub fn new(engine: E) -> Self {
        EncryptionBridge {
            engine,
            contexts: HandleArena::new(ENCRYPTION_TAG),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Number of live encryption contexts.
    pub fn live_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Creates an encryption context and returns its handle.
    pub fn create(&self) -> Result<Handle, PkError> {
        let entry = Entry::new(self.engine.new_encryption());
        match self.contexts.insert(entry) {
            Ok(handle) => {
                debug!(?handle, "encryption context created");
                Ok(handle)
            }
            Err(e) => {
                error!("init encryption failed: {e}");
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
                    self.engine.clear_encryption(&mut entry.ctx);
                    entry.state = ContextState::Released;
                }
                debug!(?handle, "encryption context released");
            }
            None => warn!(?handle, "release of invalid encryption handle"),
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

    /// Sets the recipient public key (engine encoding, e.g. base64 text).
    pub fn set_recipient_key(&self, handle: Handle, key: Option<&[u8]>) -> Result<(), PkError> {
        let result = self.contexts.resolve(handle).and_then(|shared| {
            let mut entry = lock_live(&shared)?;
            let key = match key {
                Some(key) if !key.is_empty() => key,
                _ => return Err(PkError::InvalidKey),
            };
            self.engine.set_recipient_key(&mut entry.ctx, key)?;
            entry.state = ContextState::Ready;
            Ok(())
        });
        match &result {
            Ok(()) => debug!(?handle, "recipient key set"),
            Err(e) => error!(?handle, "set recipient key failed: {e}"),
        }
        result
    }

    /// Encrypts `plaintext` for the recipient, drawing the ephemeral key
    /// material from `rng`.
    pub fn encrypt<R>(
        &self,
        handle: Handle,
        plaintext: Option<&[u8]>,
        rng: &mut R,
    ) -> Result<EncryptedMessage, PkError>
    where
        R: SecureRandom + ?Sized,
    {
        let result = self.contexts.resolve(handle).and_then(|shared| {
            let mut entry = lock_live(&shared)?;
            let plaintext = plaintext.ok_or(PkError::InvalidArgument("null plaintext"))?;
            if entry.state != ContextState::Ready {
                return Err(PkError::InvalidKey);
            }
            self.seal(&mut entry.ctx, plaintext, rng)
        });
        if let Err(e) = &result {
            error!(?handle, "encrypt failed: {e}");
        }
        result
    }

    fn seal<R>(
        &self,
        ctx: &mut E::Encryption,
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<EncryptedMessage, PkError>
    where
        R: SecureRandom + ?Sized,
    {
        let ciphertext_length = self.engine.ciphertext_length(ctx, plaintext.len());
        let mac_length = self.engine.mac_length(ctx);
        let ephemeral_length = self.engine.key_length();
        let random_length = self.engine.encrypt_random_length(ctx);
        debug!(
            plaintext_length = plaintext.len(),
            ciphertext_length, random_length, "sizing encrypt buffers"
        );

        let mut ciphertext = ScratchBuffer::zeroed(ciphertext_length)?;
        let mut mac = ScratchBuffer::terminated(mac_length)?;
        let mut ephemeral = ScratchBuffer::terminated(ephemeral_length)?;
        let random = random_buffer(rng, random_length)?;

        mac[mac_length] = 0;
        ephemeral[ephemeral_length] = 0;

        let written = self.engine.encrypt(
            ctx,
            plaintext,
            &mut ciphertext,
            &mut mac[..mac_length],
            &mut ephemeral[..ephemeral_length],
            &random,
        )?;

        Ok(EncryptedMessage::new(
            ciphertext[..written].to_vec(),
            mac.to_text()?,
            ephemeral.to_text()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::live_scratch_buffers;
    use crate::random::OsRandom;

    const RECIPIENT: &[u8] = b"3p7bfXt9wbTTW2HC7OQ1Nz+DQ8hbeGdNrfx+FG+IK08";

    #[test]
    fn test_lifecycle_states() {
        let bridge = EncryptionBridge::new(OlmPk);
        assert_eq!(bridge.state(Handle::NULL), ContextState::Uninitialized);

        let handle = bridge.create().unwrap();
        assert_eq!(bridge.state(handle), ContextState::Allocated);

        bridge.set_recipient_key(handle, Some(RECIPIENT)).unwrap();
        assert_eq!(bridge.state(handle), ContextState::Ready);

        bridge.release(handle);
        assert_eq!(bridge.state(handle), ContextState::Released);
        assert_eq!(bridge.live_contexts(), 0);
    }

    #[test]
    fn test_missing_key_buffer() {
        let bridge = EncryptionBridge::new(OlmPk);
        let handle = bridge.create().unwrap();
        assert_eq!(
            bridge.set_recipient_key(handle, None),
            Err(PkError::InvalidKey)
        );
        assert_eq!(
            bridge.set_recipient_key(handle, Some(b"".as_slice())),
            Err(PkError::InvalidKey)
        );
        assert_eq!(bridge.state(handle), ContextState::Allocated);
    }

    #[test]
    fn test_engine_rejection_keeps_prior_key() {
        let bridge = EncryptionBridge::new(OlmPk);
        let handle = bridge.create().unwrap();
        bridge.set_recipient_key(handle, Some(RECIPIENT)).unwrap();

        assert_eq!(
            bridge.set_recipient_key(handle, Some(b"too short".as_slice())),
            Err(PkError::EngineError("INPUT_BUFFER_TOO_SMALL".into()))
        );
        assert_eq!(bridge.state(handle), ContextState::Ready);
        assert!(bridge.encrypt(handle, Some(b"still works".as_slice()), &mut OsRandom).is_ok());
    }

    #[test]
    fn test_encrypt_outputs_are_text() {
        let bridge = EncryptionBridge::new(OlmPk);
        let handle = bridge.create().unwrap();
        bridge.set_recipient_key(handle, Some(RECIPIENT)).unwrap();

        let message = bridge.encrypt(handle, Some(b"hello".as_slice()), &mut OsRandom).unwrap();
        assert_eq!(message.ciphertext.len(), 22);
        assert_eq!(message.mac.len(), 11);
        assert_eq!(message.ephemeral_key.len(), 43);
        assert!(message.ciphertext.is_ascii());
        assert_eq!(live_scratch_buffers(), 0);
    }

    #[test]
    fn test_null_plaintext() {
        let bridge = EncryptionBridge::new(OlmPk);
        let handle = bridge.create().unwrap();
        bridge.set_recipient_key(handle, Some(RECIPIENT)).unwrap();
        assert_eq!(
            bridge.encrypt(handle, None, &mut OsRandom),
            Err(PkError::InvalidArgument("null plaintext"))
        );
    }
}
