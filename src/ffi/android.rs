//! JNI bindings for `org.matrix.olm.OlmPkEncryption` and
//! `org.matrix.olm.OlmPkDecryption`.
//!
//! The Java objects keep their handle in a `long mNativeId` field. Every
//! failure is raised as a `java.lang.Exception` carrying the error text,
//! and randomness is drawn from `java.security.SecureRandom`.

use jni::JNIEnv;
use jni::objects::{JByteArray, JObject, JString, JValue};
use jni::sys::{jbyteArray, jlong};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::{DECRYPTION, ENCRYPTION};
use crate::bridge::EncryptedMessage;
use crate::error::PkError;
use crate::handle::Handle;
use crate::logging;
use crate::random::SecureRandom;

const NATIVE_ID_FIELD: &str = "mNativeId";
const CIPHERTEXT_FIELD: &str = "mCipherText";
const MAC_FIELD: &str = "mMac";
const EPHEMERAL_KEY_FIELD: &str = "mEphemeralKey";

const STRING_SIG: &str = "Ljava/lang/String;";
const EXCEPTION_CLASS: &str = "java/lang/Exception";
const SECURE_RANDOM_CLASS: &str = "java/security/SecureRandom";

// ============================================================================
// Helpers
// ============================================================================

/// `java.security.SecureRandom` as a [`SecureRandom`].
struct JavaSecureRandom<'a, 'local> {
    env: &'a mut JNIEnv<'local>,
}

impl SecureRandom for JavaSecureRandom<'_, '_> {
    fn fill(&mut self, dest: &mut [u8]) -> Result<(), PkError> {
        let length = i32::try_from(dest.len())
            .map_err(|_| PkError::RandomSourceError("random length exceeds jsize".into()))?;
        draw_secure_random(self.env, length, dest).map_err(|e| {
            clear_pending_exception(self.env);
            PkError::RandomSourceError(e.to_string())
        })
    }
}

fn draw_secure_random(env: &mut JNIEnv, length: i32, dest: &mut [u8]) -> jni::errors::Result<()> {
    let random = env.new_object(SECURE_RANDOM_CLASS, "()V", &[])?;
    let array = env.new_byte_array(length)?;
    env.call_method(&random, "nextBytes", "([B)V", &[JValue::Object(&array)])?;

    let drawn = Zeroizing::new(env.convert_byte_array(&array)?);
    dest.copy_from_slice(&drawn);

    // Don't leave key material on the Java heap.
    let zeros = vec![0i8; dest.len()];
    env.set_byte_array_region(&array, 0, &zeros)?;
    Ok(())
}

fn clear_pending_exception(env: &mut JNIEnv) {
    if env.exception_check().unwrap_or(false) {
        let _ = env.exception_clear();
    }
}

/// Throws `error` unless a Java exception is already pending.
fn throw(env: &mut JNIEnv, error: &PkError) {
    if env.exception_check().unwrap_or(false) {
        return;
    }
    if let Err(e) = env.throw_new(EXCEPTION_CLASS, error.to_string()) {
        warn!("unable to throw {error}: {e}");
    }
}

fn jni_failure(context: &'static str) -> impl Fn(jni::errors::Error) -> PkError {
    move |e| {
        debug!("JNI call failed: {e}");
        PkError::InvalidArgument(context)
    }
}

fn native_handle(env: &mut JNIEnv, thiz: &JObject) -> Handle {
    env.get_field(thiz, NATIVE_ID_FIELD, "J")
        .and_then(|value| value.j())
        .map(|id| Handle::from_raw(id as u64))
        .unwrap_or(Handle::NULL)
}

fn get_byte_array(
    env: &mut JNIEnv,
    arr: jbyteArray,
) -> Result<Option<Zeroizing<Vec<u8>>>, PkError> {
    if arr.is_null() {
        return Ok(None);
    }
    let obj = unsafe { JByteArray::from_raw(arr) };
    env.convert_byte_array(&obj)
        .map(|bytes| Some(Zeroizing::new(bytes)))
        .map_err(|_| PkError::OutOfMemory)
}

fn create_byte_array(env: &mut JNIEnv, bytes: &[u8]) -> Result<jbyteArray, PkError> {
    env.byte_array_from_slice(bytes)
        .map(JByteArray::into_raw)
        .map_err(|_| PkError::OutOfMemory)
}

fn get_string_field(
    env: &mut JNIEnv,
    obj: &JObject,
    name: &'static str,
) -> Result<Option<String>, PkError> {
    let value = env
        .get_field(obj, name, STRING_SIG)
        .and_then(|value| value.l())
        .map_err(jni_failure(name))?;
    if value.is_null() {
        return Ok(None);
    }
    let text = env
        .get_string(&JString::from(value))
        .map_err(jni_failure(name))?;
    Ok(Some(text.into()))
}

fn set_string_field(
    env: &mut JNIEnv,
    obj: &JObject,
    name: &'static str,
    text: &str,
) -> Result<(), PkError> {
    let value = env.new_string(text).map_err(|_| PkError::OutOfMemory)?;
    env.set_field(obj, name, STRING_SIG, JValue::Object(&value))
        .map_err(jni_failure(name))
}

fn read_message(env: &mut JNIEnv, message: &JObject) -> Result<Option<EncryptedMessage>, PkError> {
    if message.is_null() {
        return Ok(None);
    }
    let ciphertext = get_string_field(env, message, CIPHERTEXT_FIELD)?;
    let mac = get_string_field(env, message, MAC_FIELD)?;
    let ephemeral_key = get_string_field(env, message, EPHEMERAL_KEY_FIELD)?;
    match (ciphertext, mac, ephemeral_key) {
        (Some(ciphertext), Some(mac), Some(ephemeral_key)) => Ok(Some(EncryptedMessage::new(
            ciphertext.into_bytes(),
            mac,
            ephemeral_key,
        ))),
        _ => Err(PkError::InvalidArgument("incomplete encrypted message")),
    }
}

fn or_throw<T>(env: &mut JNIEnv, result: Result<T, PkError>, fallback: T) -> T {
    result.unwrap_or_else(|e| {
        throw(env, &e);
        fallback
    })
}

// ============================================================================
// OlmPkEncryption
// ============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn Java_org_matrix_olm_OlmPkEncryption_createNewPkEncryptionJni(
    mut env: JNIEnv,
    _thiz: JObject,
) -> jlong {
    logging::init();
    let result = ENCRYPTION.create().map(|handle| handle.into_raw() as jlong);
    or_throw(&mut env, result, 0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn Java_org_matrix_olm_OlmPkEncryption_releasePkEncryptionJni(
    mut env: JNIEnv,
    thiz: JObject,
) {
    let handle = native_handle(&mut env, &thiz);
    ENCRYPTION.release(handle);
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn Java_org_matrix_olm_OlmPkEncryption_setRecipientKeyJni(
    mut env: JNIEnv,
    thiz: JObject,
    key_arr: jbyteArray,
) {
    let handle = native_handle(&mut env, &thiz);
    let result = get_byte_array(&mut env, key_arr)
        .and_then(|key| ENCRYPTION.set_recipient_key(handle, key.as_ref().map(|k| k.as_slice())));
    or_throw(&mut env, result, ());
}

/// Encrypts `plaintext`, stores the MAC and ephemeral key into `message`
/// and returns the ciphertext.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Java_org_matrix_olm_OlmPkEncryption_encryptJni(
    mut env: JNIEnv,
    thiz: JObject,
    plaintext_arr: jbyteArray,
    message: JObject,
) -> jbyteArray {
    let handle = native_handle(&mut env, &thiz);

    let result = get_byte_array(&mut env, plaintext_arr).and_then(|plaintext| {
        if message.is_null() {
            return Err(PkError::InvalidArgument("null encrypted message"));
        }
        let encrypted = {
            let mut rng = JavaSecureRandom { env: &mut env };
            ENCRYPTION.encrypt(handle, plaintext.as_ref().map(|p| p.as_slice()), &mut rng)?
        };
        set_string_field(&mut env, &message, MAC_FIELD, &encrypted.mac)?;
        set_string_field(&mut env, &message, EPHEMERAL_KEY_FIELD, &encrypted.ephemeral_key)?;
        create_byte_array(&mut env, &encrypted.ciphertext)
    });
    or_throw(&mut env, result, JObject::null().into_raw())
}

// ============================================================================
// OlmPkDecryption
// ============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn Java_org_matrix_olm_OlmPkDecryption_createNewPkDecryptionJni(
    mut env: JNIEnv,
    _thiz: JObject,
) -> jlong {
    logging::init();
    let result = DECRYPTION.create().map(|handle| handle.into_raw() as jlong);
    or_throw(&mut env, result, 0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn Java_org_matrix_olm_OlmPkDecryption_releasePkDecryptionJni(
    mut env: JNIEnv,
    thiz: JObject,
) {
    let handle = native_handle(&mut env, &thiz);
    DECRYPTION.release(handle);
}

/// Returns the new public key. A failed generation releases the context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Java_org_matrix_olm_OlmPkDecryption_generateKeyJni(
    mut env: JNIEnv,
    thiz: JObject,
) -> jbyteArray {
    let handle = native_handle(&mut env, &thiz);
    let generated = {
        let mut rng = JavaSecureRandom { env: &mut env };
        DECRYPTION.generate_key(handle, &mut rng)
    };
    let result = generated.and_then(|public_key| create_byte_array(&mut env, &public_key));
    or_throw(&mut env, result, JObject::null().into_raw())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn Java_org_matrix_olm_OlmPkDecryption_setPrivateKeyJni(
    mut env: JNIEnv,
    thiz: JObject,
    key_arr: jbyteArray,
) -> jbyteArray {
    let handle = native_handle(&mut env, &thiz);
    let result = get_byte_array(&mut env, key_arr)
        .and_then(|key| DECRYPTION.set_private_key(handle, key.as_ref().map(|k| k.as_slice())))
        .and_then(|public_key| create_byte_array(&mut env, &public_key));
    or_throw(&mut env, result, JObject::null().into_raw())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn Java_org_matrix_olm_OlmPkDecryption_privateKeyJni(
    mut env: JNIEnv,
    thiz: JObject,
) -> jbyteArray {
    let handle = native_handle(&mut env, &thiz);
    let result = DECRYPTION
        .private_key(handle)
        .and_then(|private_key| create_byte_array(&mut env, &private_key));
    or_throw(&mut env, result, JObject::null().into_raw())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn Java_org_matrix_olm_OlmPkDecryption_decryptJni(
    mut env: JNIEnv,
    thiz: JObject,
    message: JObject,
) -> jbyteArray {
    let handle = native_handle(&mut env, &thiz);
    let result = read_message(&mut env, &message).and_then(|message| {
        let plaintext = Zeroizing::new(DECRYPTION.decrypt(handle, message.as_ref())?);
        create_byte_array(&mut env, &plaintext)
    });
    or_throw(&mut env, result, JObject::null().into_raw())
}
