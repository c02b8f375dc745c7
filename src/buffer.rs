//! Scratch buffers for marshalling across the engine boundary.
//!
//! Every buffer an operation needs (ciphertext, MAC, ephemeral key, random
//! input, plaintext) is a [`ScratchBuffer`]. Allocation is fallible and
//! reports [`PkError::OutOfMemory`] instead of aborting. Contents are zeroed
//! when the buffer is dropped, whichever way the operation exits.

use std::cell::Cell;
use std::ffi::CStr;
use std::fmt;
use std::ops::{Deref, DerefMut};

use zeroize::Zeroize;

use crate::error::PkError;

thread_local! {
    static LIVE_SCRATCH: Cell<usize> = const { Cell::new(0) };
}

/// Number of scratch buffers alive on the current thread.
pub fn live_scratch_buffers() -> usize {
    LIVE_SCRATCH.with(Cell::get)
}

pub struct ScratchBuffer {
    bytes: Vec<u8>,
}

impl fmt::Debug for ScratchBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScratchBuffer(len={})", self.bytes.len())
    }
}

impl ScratchBuffer {
    /// Allocates `length` zero bytes.
    pub fn zeroed(length: usize) -> Result<Self, PkError> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(length)
            .map_err(|_| PkError::OutOfMemory)?;
        bytes.resize(length, 0);
        LIVE_SCRATCH.with(|live| live.set(live.get() + 1));
        Ok(ScratchBuffer { bytes })
    }

    /// Allocates `length` bytes followed by a NUL terminator, for engine
    /// outputs that are read back as text. Derefs to all `length + 1` bytes.
    pub fn terminated(length: usize) -> Result<Self, PkError> {
        let total = length.checked_add(1).ok_or(PkError::OutOfMemory)?;
        Self::zeroed(total)
    }

    /// Allocates a copy of `source`.
    pub fn copy_of(source: &[u8]) -> Result<Self, PkError> {
        let mut buffer = Self::zeroed(source.len())?;
        buffer.copy_from_slice(source);
        Ok(buffer)
    }

    /// Reads a NUL-terminated buffer as text, up to the first NUL.
    pub fn to_text(&self) -> Result<String, PkError> {
        let text = CStr::from_bytes_until_nul(&self.bytes)
            .map_err(|_| PkError::InvalidArgument("unterminated text buffer"))?;
        text.to_str()
            .map(str::to_owned)
            .map_err(|_| PkError::InvalidArgument("engine produced non-UTF-8 text"))
    }
}

impl Deref for ScratchBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for ScratchBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for ScratchBuffer {
    fn drop(&mut self) {
        self.bytes.zeroize();
        LIVE_SCRATCH.with(|live| live.set(live.get().saturating_sub(1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_allocation_reports_oom() {
        assert!(matches!(
            ScratchBuffer::zeroed(usize::MAX),
            Err(PkError::OutOfMemory)
        ));
        assert!(matches!(
            ScratchBuffer::terminated(usize::MAX),
            Err(PkError::OutOfMemory)
        ));
        assert_eq!(live_scratch_buffers(), 0);
    }

    #[test]
    fn test_live_count_follows_drops() {
        let a = ScratchBuffer::zeroed(8).unwrap();
        let b = ScratchBuffer::copy_of(b"abc").unwrap();
        assert_eq!(live_scratch_buffers(), 2);
        assert_eq!(&b[..], b"abc");
        drop(a);
        assert_eq!(live_scratch_buffers(), 1);
        drop(b);
        assert_eq!(live_scratch_buffers(), 0);
    }

    #[test]
    fn test_terminated_text() {
        let mut buffer = ScratchBuffer::terminated(3).unwrap();
        assert_eq!(buffer.len(), 4);
        buffer[..3].copy_from_slice(b"mac");
        assert_eq!(buffer.to_text().unwrap(), "mac");
    }
}
