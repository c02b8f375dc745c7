//! C FFI bindings for the pk bridges.
//!
//! Handles are plain `u64` values, `0` meaning "no context". Functions that
//! produce data fill a caller-provided result struct whose buffers are
//! allocated by Rust; the caller MUST hand them back to the matching free
//! function.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::slice;

use zeroize::Zeroize;

use super::{DECRYPTION, ENCRYPTION};
use crate::bridge::EncryptedMessage;
use crate::engine::PkEngine;
use crate::error::PkError;
use crate::handle::Handle;
use crate::logging;
use crate::pk::ENCRYPT_RANDOM_LENGTH;
use crate::random::{FixedRandom, OsRandom, SecureRandom};

// ============================================================================
// C FFI Types
// ============================================================================

pub const PK_SUCCESS: i32 = 0;
pub const PK_ERR_OUT_OF_MEMORY: i32 = -1;
pub const PK_ERR_INVALID_ARGUMENT: i32 = -2;
pub const PK_ERR_INVALID_KEY: i32 = -3;
pub const PK_ERR_ENGINE: i32 = -4;
pub const PK_ERR_RANDOM_SOURCE: i32 = -5;
pub const PK_ERR_NULL_POINTER: i32 = -100;

/// Result of `pk_encrypt`. Free with `pk_free_encrypt_result`.
#[repr(C)]
pub struct PkEncryptResult {
    pub ciphertext: *mut u8,
    pub ciphertext_len: usize,
    /// NUL-terminated base64 MAC.
    pub mac: *mut c_char,
    /// NUL-terminated base64 ephemeral public key.
    pub ephemeral_key: *mut c_char,
    pub status: i32, // 0 = Success, Error codes < 0
}

/// Byte buffer result. Free with `pk_free_buffer`.
#[repr(C)]
pub struct PkBuffer {
    pub data: *mut u8,
    pub len: usize,
    pub status: i32, // 0 = Success, Error codes < 0
}

fn map_error(e: &PkError) -> i32 {
    match e {
        PkError::OutOfMemory => PK_ERR_OUT_OF_MEMORY,
        PkError::InvalidArgument(_) => PK_ERR_INVALID_ARGUMENT,
        PkError::InvalidKey => PK_ERR_INVALID_KEY,
        PkError::EngineError(_) => PK_ERR_ENGINE,
        PkError::RandomSourceError(_) => PK_ERR_RANDOM_SOURCE,
    }
}

/// A null pointer is "no buffer"; a non-null pointer with length 0 is an
/// empty buffer.
unsafe fn optional_slice<'a>(data: *const u8, len: usize) -> Option<&'a [u8]> {
    if data.is_null() {
        None
    } else if len == 0 {
        Some(&[])
    } else {
        Some(unsafe { slice::from_raw_parts(data, len) })
    }
}

unsafe fn optional_str(text: *const c_char) -> Result<Option<String>, PkError> {
    if text.is_null() {
        return Ok(None);
    }
    let c_str = unsafe { CStr::from_ptr(text) };
    c_str
        .to_str()
        .map(|s| Some(s.to_owned()))
        .map_err(|_| PkError::InvalidArgument("text is not UTF-8"))
}

fn leak_bytes(bytes: Vec<u8>) -> (*mut u8, usize) {
    let boxed = bytes.into_boxed_slice();
    let len = boxed.len();
    (Box::into_raw(boxed) as *mut u8, len)
}

unsafe fn reclaim_bytes(data: *mut u8, len: usize) {
    if !data.is_null() {
        let mut boxed = unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(data, len)) };
        boxed.zeroize();
    }
}

unsafe fn write_buffer(output: *mut PkBuffer, result: Result<Vec<u8>, PkError>) -> i32 {
    let (data, len, status) = match result {
        Ok(bytes) => {
            let (data, len) = leak_bytes(bytes);
            (data, len, PK_SUCCESS)
        }
        Err(e) => (ptr::null_mut(), 0, map_error(&e)),
    };
    unsafe {
        (*output).data = data;
        (*output).len = len;
        (*output).status = status;
    }
    status
}

/// Free the buffers of a `PkEncryptResult`. The struct itself is reset.
///
/// # Safety
/// `result` must be null or point to a result filled by `pk_encrypt` whose
/// buffers have not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pk_free_encrypt_result(result: *mut PkEncryptResult) {
    if result.is_null() {
        return;
    }
    unsafe {
        let result = &mut *result;
        reclaim_bytes(result.ciphertext, result.ciphertext_len);
        if !result.mac.is_null() {
            drop(CString::from_raw(result.mac));
        }
        if !result.ephemeral_key.is_null() {
            drop(CString::from_raw(result.ephemeral_key));
        }
        result.ciphertext = ptr::null_mut();
        result.ciphertext_len = 0;
        result.mac = ptr::null_mut();
        result.ephemeral_key = ptr::null_mut();
    }
}

/// Zero and free a `PkBuffer`. The struct itself is reset.
///
/// # Safety
/// `buffer` must be null or point to a buffer filled by this library whose
/// data has not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pk_free_buffer(buffer: *mut PkBuffer) {
    if buffer.is_null() {
        return;
    }
    unsafe {
        let buffer = &mut *buffer;
        reclaim_bytes(buffer.data, buffer.len);
        buffer.data = ptr::null_mut();
        buffer.len = 0;
    }
}

// ============================================================================
// Encryption
// ============================================================================

/// Create an encryption context. Returns 0 on failure.
#[unsafe(no_mangle)]
pub extern "C" fn pk_encryption_new() -> u64 {
    logging::init();
    ENCRYPTION.create().map_or(0, Handle::into_raw)
}

/// Clear and free an encryption context. Unknown handles are ignored.
#[unsafe(no_mangle)]
pub extern "C" fn pk_encryption_free(handle: u64) {
    ENCRYPTION.release(Handle::from_raw(handle));
}

/// Set the recipient public key (base64 text, not NUL-terminated).
///
/// # Safety
/// `key` must be null or valid for reads of `key_len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pk_encryption_set_recipient_key(
    handle: u64,
    key: *const u8,
    key_len: usize,
) -> i32 {
    let key = unsafe { optional_slice(key, key_len) };
    match ENCRYPTION.set_recipient_key(Handle::from_raw(handle), key) {
        Ok(()) => PK_SUCCESS,
        Err(e) => map_error(&e),
    }
}

/// Random bytes `pk_encrypt_with_random` consumes per call.
#[unsafe(no_mangle)]
pub extern "C" fn pk_encrypt_random_length() -> usize {
    ENCRYPT_RANDOM_LENGTH
}

/// Encrypt a message for the recipient.
/// Caller MUST free the result using `pk_free_encrypt_result`.
///
/// # Safety
/// `plaintext` must be null or valid for reads of `plaintext_len` bytes.
/// `output` must point to a writable `PkEncryptResult`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pk_encrypt(
    handle: u64,
    plaintext: *const u8,
    plaintext_len: usize,
    output: *mut PkEncryptResult,
) -> i32 {
    unsafe { encrypt_into(handle, plaintext, plaintext_len, output, &mut OsRandom) }
}

/// Like `pk_encrypt`, with the ephemeral key material drawn by the caller.
/// `random` must hold at least `pk_encrypt_random_length()` bytes.
///
/// # Safety
/// `plaintext` must be null or valid for reads of `plaintext_len` bytes.
/// `random` must be null or valid for reads of `random_len` bytes.
/// `output` must point to a writable `PkEncryptResult`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pk_encrypt_with_random(
    handle: u64,
    plaintext: *const u8,
    plaintext_len: usize,
    random: *const u8,
    random_len: usize,
    output: *mut PkEncryptResult,
) -> i32 {
    let random = unsafe { optional_slice(random, random_len) }.unwrap_or_default();
    let mut rng = FixedRandom::new(random);
    unsafe { encrypt_into(handle, plaintext, plaintext_len, output, &mut rng) }
}

unsafe fn encrypt_into(
    handle: u64,
    plaintext: *const u8,
    plaintext_len: usize,
    output: *mut PkEncryptResult,
    rng: &mut dyn SecureRandom,
) -> i32 {
    if output.is_null() {
        return PK_ERR_NULL_POINTER;
    }
    let plaintext = unsafe { optional_slice(plaintext, plaintext_len) };

    let result = ENCRYPTION
        .encrypt(Handle::from_raw(handle), plaintext, rng)
        .and_then(|message| {
            let mac = CString::new(message.mac)
                .map_err(|_| PkError::InvalidArgument("MAC contains NUL"))?;
            let ephemeral_key = CString::new(message.ephemeral_key)
                .map_err(|_| PkError::InvalidArgument("ephemeral key contains NUL"))?;
            Ok((message.ciphertext, mac, ephemeral_key))
        });

    match result {
        Ok((ciphertext, mac, ephemeral_key)) => {
            let (ciphertext, ciphertext_len) = leak_bytes(ciphertext);
            unsafe {
                (*output).ciphertext = ciphertext;
                (*output).ciphertext_len = ciphertext_len;
                (*output).mac = mac.into_raw();
                (*output).ephemeral_key = ephemeral_key.into_raw();
                (*output).status = PK_SUCCESS;
            }
            PK_SUCCESS
        }
        Err(e) => {
            let status = map_error(&e);
            unsafe {
                (*output).ciphertext = ptr::null_mut();
                (*output).ciphertext_len = 0;
                (*output).mac = ptr::null_mut();
                (*output).ephemeral_key = ptr::null_mut();
                (*output).status = status;
            }
            status
        }
    }
}

// ============================================================================
// Decryption
// ============================================================================

/// Create a decryption context. Returns 0 on failure.
#[unsafe(no_mangle)]
pub extern "C" fn pk_decryption_new() -> u64 {
    logging::init();
    DECRYPTION.create().map_or(0, Handle::into_raw)
}

/// Clear and free a decryption context. Unknown handles are ignored.
#[unsafe(no_mangle)]
pub extern "C" fn pk_decryption_free(handle: u64) {
    DECRYPTION.release(Handle::from_raw(handle));
}

/// Random bytes `pk_generate_key_with_random` consumes per call.
#[unsafe(no_mangle)]
pub extern "C" fn pk_generate_key_random_length() -> usize {
    DECRYPTION.engine().generate_key_random_length()
}

/// Generate a key pair; `output` receives the base64 public key.
/// On failure the context is released and `handle` becomes invalid.
/// Caller MUST free the buffer using `pk_free_buffer`.
///
/// # Safety
/// `output` must point to a writable `PkBuffer`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pk_generate_key(handle: u64, output: *mut PkBuffer) -> i32 {
    if output.is_null() {
        return PK_ERR_NULL_POINTER;
    }
    let result = DECRYPTION.generate_key(Handle::from_raw(handle), &mut OsRandom);
    unsafe { write_buffer(output, result) }
}

/// Like `pk_generate_key`, with the private key drawn by the caller.
/// `random` must hold at least `pk_generate_key_random_length()` bytes;
/// too few bytes release the context like any other failure.
///
/// # Safety
/// `random` must be null or valid for reads of `random_len` bytes.
/// `output` must point to a writable `PkBuffer`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pk_generate_key_with_random(
    handle: u64,
    random: *const u8,
    random_len: usize,
    output: *mut PkBuffer,
) -> i32 {
    if output.is_null() {
        return PK_ERR_NULL_POINTER;
    }
    let random = unsafe { optional_slice(random, random_len) }.unwrap_or_default();
    let mut rng = FixedRandom::new(random);
    let result = DECRYPTION.generate_key(Handle::from_raw(handle), &mut rng);
    unsafe { write_buffer(output, result) }
}

/// Import a raw private key; `output` receives the base64 public key.
/// Caller MUST free the buffer using `pk_free_buffer`.
///
/// # Safety
/// `key` must be null or valid for reads of `key_len` bytes.
/// `output` must point to a writable `PkBuffer`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pk_decryption_set_private_key(
    handle: u64,
    key: *const u8,
    key_len: usize,
    output: *mut PkBuffer,
) -> i32 {
    if output.is_null() {
        return PK_ERR_NULL_POINTER;
    }
    let key = unsafe { optional_slice(key, key_len) };
    let result = DECRYPTION.set_private_key(Handle::from_raw(handle), key);
    unsafe { write_buffer(output, result) }
}

/// Export the raw private key.
/// Caller MUST free the buffer using `pk_free_buffer`, which zeroes it.
///
/// # Safety
/// `output` must point to a writable `PkBuffer`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pk_decryption_private_key(handle: u64, output: *mut PkBuffer) -> i32 {
    if output.is_null() {
        return PK_ERR_NULL_POINTER;
    }
    let result = DECRYPTION
        .private_key(Handle::from_raw(handle))
        .map(|key| key.to_vec());
    unsafe { write_buffer(output, result) }
}

/// Decrypt a message given as three NUL-terminated base64 strings.
/// Caller MUST free the buffer using `pk_free_buffer`.
///
/// # Safety
/// The three strings must be null or valid NUL-terminated strings.
/// `output` must point to a writable `PkBuffer`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pk_decrypt(
    handle: u64,
    ciphertext: *const c_char,
    mac: *const c_char,
    ephemeral_key: *const c_char,
    output: *mut PkBuffer,
) -> i32 {
    if output.is_null() {
        return PK_ERR_NULL_POINTER;
    }

    let fields = unsafe {
        optional_str(ciphertext).and_then(|ciphertext| {
            Ok((ciphertext, optional_str(mac)?, optional_str(ephemeral_key)?))
        })
    };
    let result = fields.and_then(|fields| {
        let message = match fields {
            (Some(ciphertext), Some(mac), Some(ephemeral_key)) => Some(EncryptedMessage::new(
                ciphertext.into_bytes(),
                mac,
                ephemeral_key,
            )),
            _ => None,
        };
        DECRYPTION.decrypt(Handle::from_raw(handle), message.as_ref())
    });
    unsafe { write_buffer(output, result) }
}
