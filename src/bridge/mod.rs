//! Handle-based bridges over a [`PkEngine`](crate::engine::PkEngine).
//!
//! Foreign callers never hold a context, only a [`Handle`](crate::handle::Handle).
//! Each operation resolves the handle, sizes and allocates the scratch
//! buffers the engine needs, injects randomness, runs the engine and turns
//! its outcome into either a result or a single [`PkError`](crate::error::PkError).

pub mod decryption;
pub mod encryption;

pub use decryption::DecryptionBridge;
pub use encryption::EncryptionBridge;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::error::PkError;

/// Lifecycle of a context as seen through its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// The null handle: nothing was ever created.
    Uninitialized,
    /// Created, but no key set or generated yet.
    Allocated,
    /// Keyed and usable.
    Ready,
    /// Released, or never issued by this bridge. Terminal.
    Released,
}

pub(crate) struct Entry<C> {
    pub(crate) ctx: C,
    pub(crate) state: ContextState,
}

impl<C> Entry<C> {
    pub(crate) fn new(ctx: C) -> Self {
        Entry {
            ctx,
            state: ContextState::Allocated,
        }
    }
}

/// Locks a resolved context for one operation. A context released while
/// the caller waited for the lock counts as an invalid handle.
pub(crate) fn lock_live<C>(shared: &Mutex<Entry<C>>) -> Result<MutexGuard<'_, Entry<C>>, PkError> {
    let entry = shared.lock();
    if entry.state == ContextState::Released {
        return Err(PkError::InvalidArgument("invalid handle"));
    }
    Ok(entry)
}

/// Output of an encryption, input of a decryption.
///
/// Every field is ASCII base64 text by construction. The JSON form uses the
/// field names `ciphertext`, `mac` and `ephemeral`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    #[serde(with = "text_bytes")]
    pub ciphertext: Vec<u8>,
    pub mac: String,
    #[serde(rename = "ephemeral")]
    pub ephemeral_key: String,
}

impl EncryptedMessage {
    pub fn new(ciphertext: Vec<u8>, mac: String, ephemeral_key: String) -> Self {
        EncryptedMessage {
            ciphertext,
            mac,
            ephemeral_key,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

mod text_bytes {
    use serde::{Deserialize, Deserializer, Serializer, ser::Error as _};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let text = std::str::from_utf8(bytes).map_err(S::Error::custom)?;
        serializer.serialize_str(text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        String::deserialize(deserializer).map(String::into_bytes)
    }
}
