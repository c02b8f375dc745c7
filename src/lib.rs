//! # Olm PK Bridge
//!
//! Handle-based bindings for the Olm "pk" public-key encryption scheme,
//! built to be exposed to managed runtimes through C and JNI.
//!
//! ## Modules
//!
//! * `pk` - The native engine: X25519, HKDF-SHA256, AES-256-CBC and a truncated HMAC-SHA256.
//! * `engine` - The `PkEngine` trait the bridges are written against.
//! * `bridge` - Encryption and decryption bridges over opaque handles.
//! * `handle` - Generation-checked handle arena.
//! * `buffer` - Zero-on-drop scratch buffers with fallible allocation.
//! * `random` - Injected secure random sources.
//! * `ffi` - C ABI and Android JNI entry points.

pub mod bridge;
pub mod buffer;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod logging;
pub mod pk;
pub mod random;

pub use bridge::{ContextState, DecryptionBridge, EncryptedMessage, EncryptionBridge};
pub use error::PkError;
pub use handle::Handle;
pub use pk::OlmPk;
pub use random::{FixedRandom, OsRandom, SecureRandom};
