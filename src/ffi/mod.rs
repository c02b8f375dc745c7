//! FFI module - C and JNI bindings for the pk bridges.
//!
//! Both surfaces share one process-wide encryption bridge and one
//! decryption bridge, so a handle obtained through either surface is valid
//! in both.

use once_cell::sync::Lazy;

use crate::bridge::{DecryptionBridge, EncryptionBridge};

pub mod pk;

#[cfg(target_os = "android")]
pub mod android;

pub(crate) static ENCRYPTION: Lazy<EncryptionBridge> = Lazy::new(EncryptionBridge::default);
pub(crate) static DECRYPTION: Lazy<DecryptionBridge> = Lazy::new(DecryptionBridge::default);
