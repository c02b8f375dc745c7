//! Secure random injection.
//!
//! Randomness is supplied by the caller's runtime on every operation that
//! needs it, so a JNI caller can hand in `java.security.SecureRandom` while
//! native callers use the operating system generator.

use rand_core::{OsRng, RngCore};
use tracing::error;

use crate::buffer::ScratchBuffer;
use crate::error::PkError;

/// A source of cryptographically secure random bytes.
///
/// Implementations must fill the whole buffer or fail; returning
/// low-entropy data is never acceptable.
pub trait SecureRandom {
    fn fill(&mut self, dest: &mut [u8]) -> Result<(), PkError>;
}

/// The operating system generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl SecureRandom for OsRandom {
    fn fill(&mut self, dest: &mut [u8]) -> Result<(), PkError> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| PkError::RandomSourceError(e.to_string()))
    }
}

/// Random bytes already drawn by the caller, handed out in order.
///
/// Lets a foreign runtime bring its own generator over the C ABI. Running
/// out of bytes is a random source failure.
pub struct FixedRandom<'a> {
    bytes: &'a [u8],
}

impl<'a> FixedRandom<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        FixedRandom { bytes }
    }

    /// Bytes not handed out yet.
    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }
}

impl SecureRandom for FixedRandom<'_> {
    fn fill(&mut self, dest: &mut [u8]) -> Result<(), PkError> {
        if self.bytes.len() < dest.len() {
            return Err(PkError::RandomSourceError(format!(
                "{} random bytes supplied, {} needed",
                self.bytes.len(),
                dest.len()
            )));
        }
        let (head, tail) = self.bytes.split_at(dest.len());
        dest.copy_from_slice(head);
        self.bytes = tail;
        Ok(())
    }
}

/// Allocates a scratch buffer of exactly `length` bytes and fills it from
/// `rng`. The buffer is zeroed when dropped.
pub fn random_buffer<R>(rng: &mut R, length: usize) -> Result<ScratchBuffer, PkError>
where
    R: SecureRandom + ?Sized,
{
    let mut buffer = ScratchBuffer::zeroed(length)?;
    if let Err(e) = rng.fill(&mut buffer) {
        error!(length, "random buffer init failed: {e}");
        return Err(e);
    }
    Ok(buffer)
}
