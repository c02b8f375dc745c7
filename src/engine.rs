//! The cryptographic engine seam.
//!
//! The bridges in [`crate::bridge`] never touch key material directly. They
//! size buffers, supply randomness and hand everything to a [`PkEngine`],
//! which owns the contexts and the actual primitives. [`crate::pk::OlmPk`]
//! is the engine shipped with this crate.

use std::borrow::Cow;
use std::fmt;

/// Outcome of a fallible engine call.
///
/// A failure carries the engine's diagnostic for that call, so callers never
/// have to consult a separate "last error" slot that a later call could
/// overwrite.
pub type EngineResult<T> = Result<T, EngineFailure>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFailure {
    message: Cow<'static, str>,
}

impl EngineFailure {
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Operations the bridges require from an anonymous-sender pk engine.
///
/// Output buffers are provided by the caller at the sizes reported by the
/// length queries. Length queries depend only on the context and public
/// lengths, never on secret data.
pub trait PkEngine {
    /// Encryption context: holds the recipient public key.
    type Encryption: Send;
    /// Decryption context: holds the local key pair.
    type Decryption: Send;

    fn new_encryption(&self) -> Self::Encryption;

    /// Wipes all key material held by the context.
    fn clear_encryption(&self, ctx: &mut Self::Encryption);

    fn new_decryption(&self) -> Self::Decryption;

    /// Wipes all key material held by the context.
    fn clear_decryption(&self, ctx: &mut Self::Decryption);

    /// Length of an encoded public (or ephemeral) key.
    fn key_length(&self) -> usize;

    /// Length of a raw private key.
    fn private_key_length(&self) -> usize;

    fn ciphertext_length(&self, ctx: &Self::Encryption, plaintext_length: usize) -> usize;

    fn mac_length(&self, ctx: &Self::Encryption) -> usize;

    fn encrypt_random_length(&self, ctx: &Self::Encryption) -> usize;

    fn generate_key_random_length(&self) -> usize;

    /// Upper bound on the plaintext recovered from `ciphertext_length` bytes
    /// of encoded ciphertext. Fails if no ciphertext can have that length.
    fn max_plaintext_length(
        &self,
        ctx: &Self::Decryption,
        ciphertext_length: usize,
    ) -> EngineResult<usize>;

    fn set_recipient_key(&self, ctx: &mut Self::Encryption, key: &[u8]) -> EngineResult<()>;

    /// Encrypts `plaintext`, filling the three output buffers. Returns the
    /// number of ciphertext bytes written.
    fn encrypt(
        &self,
        ctx: &mut Self::Encryption,
        plaintext: &[u8],
        ciphertext: &mut [u8],
        mac: &mut [u8],
        ephemeral_key: &mut [u8],
        random: &[u8],
    ) -> EngineResult<usize>;

    /// Creates a fresh key pair from `random` and writes the encoded public
    /// key. Returns the number of bytes written.
    fn generate_key(
        &self,
        ctx: &mut Self::Decryption,
        public_key: &mut [u8],
        random: &[u8],
    ) -> EngineResult<usize>;

    /// Installs a raw private key and writes the matching encoded public key.
    fn key_from_private(
        &self,
        ctx: &mut Self::Decryption,
        public_key: &mut [u8],
        private_key: &[u8],
    ) -> EngineResult<usize>;

    /// Writes the raw private key of the context.
    fn private_key(&self, ctx: &mut Self::Decryption, out: &mut [u8]) -> EngineResult<usize>;

    /// Decrypts into `plaintext` and returns the number of bytes written.
    /// `ciphertext` is consumed as scratch space and left in an unspecified
    /// state.
    fn decrypt(
        &self,
        ctx: &mut Self::Decryption,
        ephemeral_key: &[u8],
        mac: &[u8],
        ciphertext: &mut [u8],
        plaintext: &mut [u8],
    ) -> EngineResult<usize>;
}
