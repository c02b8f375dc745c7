//! Native anonymous-sender public-key encryption.
//!
//! A sender holding only the recipient's Curve25519 public key encrypts a
//! message by generating a one-time (ephemeral) key pair, agreeing a shared
//! secret with the recipient key and deriving symmetric keys from it:
//!
//! * HKDF-SHA-256 (no salt, empty info) expands the X25519 output to 80 bytes:
//!   AES key (32) || MAC key (32) || IV (16).
//! * The plaintext is encrypted with AES-256-CBC and PKCS#7 padding.
//! * HMAC-SHA-256 over the raw ciphertext, truncated to 8 bytes, is the MAC.
//!
//! Keys, MACs and ciphertexts travel as unpadded standard base64 text. The
//! recipient needs the ephemeral public key, the MAC and the ciphertext.

use aes::Aes256;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::engine::{EngineFailure, EngineResult, PkEngine};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Raw Curve25519 public key length.
pub const KEY_LENGTH: usize = 32;
/// Raw Curve25519 private key length.
pub const PRIVATE_KEY_LENGTH: usize = 32;
/// Raw (truncated) MAC length.
pub const MAC_LENGTH: usize = 8;
/// Random bytes consumed per encryption (the ephemeral private key).
pub const ENCRYPT_RANDOM_LENGTH: usize = PRIVATE_KEY_LENGTH;
/// Random bytes consumed per key generation.
pub const GENERATE_KEY_RANDOM_LENGTH: usize = PRIVATE_KEY_LENGTH;

const AES_BLOCK_LENGTH: usize = 16;
const KDF_INFO: &[u8] = b"";

// ----------------------------------------------------------------------------
// Diagnostics
// ----------------------------------------------------------------------------

/// Engine diagnostics. The string form is what callers see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkErrorCode {
    Success,
    NotEnoughRandom,
    OutputBufferTooSmall,
    InputBufferTooSmall,
    InvalidBase64,
    BadMessageMac,
    BadMessageFormat,
    MissingRecipientKey,
    MissingKeyPair,
}

impl PkErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            PkErrorCode::Success => "SUCCESS",
            PkErrorCode::NotEnoughRandom => "NOT_ENOUGH_RANDOM",
            PkErrorCode::OutputBufferTooSmall => "OUTPUT_BUFFER_TOO_SMALL",
            PkErrorCode::InputBufferTooSmall => "INPUT_BUFFER_TOO_SMALL",
            PkErrorCode::InvalidBase64 => "INVALID_BASE64",
            PkErrorCode::BadMessageMac => "BAD_MESSAGE_MAC",
            PkErrorCode::BadMessageFormat => "BAD_MESSAGE_FORMAT",
            PkErrorCode::MissingRecipientKey => "MISSING_RECIPIENT_KEY",
            PkErrorCode::MissingKeyPair => "MISSING_KEY_PAIR",
        }
    }
}

impl From<PkErrorCode> for EngineFailure {
    fn from(code: PkErrorCode) -> Self {
        EngineFailure::new(code.as_str())
    }
}

// ----------------------------------------------------------------------------
// Length helpers
// ----------------------------------------------------------------------------

/// Length of the unpadded base64 encoding of `raw` bytes.
pub fn encoded_length(raw: usize) -> usize {
    let tail = match raw % 3 {
        0 => 0,
        1 => 2,
        _ => 3,
    };
    (raw / 3).saturating_mul(4).saturating_add(tail)
}

/// Number of bytes encoded by `encoded` unpadded base64 characters, or `None`
/// if no encoding has that length.
pub fn decoded_length(encoded: usize) -> Option<usize> {
    let tail = match encoded % 4 {
        0 => 0,
        1 => return None,
        2 => 1,
        _ => 2,
    };
    Some(encoded / 4 * 3 + tail)
}

/// AES-CBC with PKCS#7 always adds between 1 and 16 bytes of padding.
fn raw_ciphertext_length(plaintext_length: usize) -> usize {
    (plaintext_length / AES_BLOCK_LENGTH)
        .saturating_add(1)
        .saturating_mul(AES_BLOCK_LENGTH)
}

fn decode_exact<const N: usize>(encoded: &[u8]) -> Result<Zeroizing<[u8; N]>, PkErrorCode> {
    let decoded = Zeroizing::new(
        STANDARD_NO_PAD
            .decode(encoded)
            .map_err(|_| PkErrorCode::InvalidBase64)?,
    );
    if decoded.len() != N {
        return Err(PkErrorCode::InvalidBase64);
    }
    let mut out = Zeroizing::new([0u8; N]);
    out.copy_from_slice(&decoded);
    Ok(out)
}

fn encode_into(raw: &[u8], out: &mut [u8]) -> Result<usize, PkErrorCode> {
    STANDARD_NO_PAD
        .encode_slice(raw, out)
        .map_err(|_| PkErrorCode::OutputBufferTooSmall)
}

// ----------------------------------------------------------------------------
// Key derivation
// ----------------------------------------------------------------------------

#[derive(Zeroize, ZeroizeOnDrop)]
struct DerivedKeys {
    aes_key: [u8; 32],
    mac_key: [u8; 32],
    iv: [u8; 16],
}

impl DerivedKeys {
    fn from_shared_secret(shared_secret: &[u8; 32]) -> Self {
        let hk = Hkdf::<Sha256>::new(None, shared_secret);
        let mut okm = Zeroizing::new([0u8; 80]);
        hk.expand(KDF_INFO, &mut okm[..])
            .expect("80 bytes is a valid HKDF-SHA-256 output length");

        let mut keys = DerivedKeys {
            aes_key: [0u8; 32],
            mac_key: [0u8; 32],
            iv: [0u8; 16],
        };
        keys.aes_key.copy_from_slice(&okm[0..32]);
        keys.mac_key.copy_from_slice(&okm[32..64]);
        keys.iv.copy_from_slice(&okm[64..80]);
        keys
    }

    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        type Aes256CbcEnc = cbc::Encryptor<Aes256>;

        let cipher = Aes256CbcEnc::new((&self.aes_key).into(), (&self.iv).into());
        cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, PkErrorCode> {
        type Aes256CbcDec = cbc::Decryptor<Aes256>;

        let cipher = Aes256CbcDec::new((&self.aes_key).into(), (&self.iv).into());
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| PkErrorCode::BadMessageFormat)
    }

    /// HMAC-SHA-256 over the raw ciphertext, truncated to [`MAC_LENGTH`].
    ///
    /// libolm's pk MAC, the one carried by existing Matrix key backups, is
    /// computed over an empty input instead. Messages sealed by libolm
    /// therefore fail here with `BAD_MESSAGE_MAC`, and the reverse holds.
    fn mac(&self, ciphertext: &[u8]) -> [u8; MAC_LENGTH] {
        type HmacSha256 = Hmac<Sha256>;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key)
            .expect("HMAC accepts keys of any length");
        mac.update(ciphertext);
        let full = mac.finalize().into_bytes();

        let mut truncated = [0u8; MAC_LENGTH];
        truncated.copy_from_slice(&full[..MAC_LENGTH]);
        truncated
    }
}

fn shared_secret(private_key: &[u8; 32], public_key: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    let secret = StaticSecret::from(*private_key);
    let shared = secret.diffie_hellman(&PublicKey::from(*public_key));
    Zeroizing::new(*shared.as_bytes())
}

// ----------------------------------------------------------------------------
// Encryption
// ----------------------------------------------------------------------------

/// Sender-side context. Holds the recipient public key once set.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PkEncryption {
    recipient_key: Option<[u8; KEY_LENGTH]>,
    #[zeroize(skip)]
    last_error: PkErrorCode,
}

impl Default for PkEncryption {
    fn default() -> Self {
        Self::new()
    }
}

impl PkEncryption {
    pub fn new() -> Self {
        PkEncryption {
            recipient_key: None,
            last_error: PkErrorCode::Success,
        }
    }

    /// Diagnostic of the most recent failed call on this context.
    pub fn last_error(&self) -> &'static str {
        self.last_error.as_str()
    }

    pub fn has_recipient_key(&self) -> bool {
        self.recipient_key.is_some()
    }

    fn fail<T>(&mut self, code: PkErrorCode) -> EngineResult<T> {
        self.last_error = code;
        Err(code.into())
    }

    /// Sets the recipient from its base64 public key. Only the first
    /// [`encoded_length`]`(KEY_LENGTH)` bytes are read.
    pub fn set_recipient_key(&mut self, key: &[u8]) -> EngineResult<()> {
        let encoded = encoded_length(KEY_LENGTH);
        if key.len() < encoded {
            return self.fail(PkErrorCode::InputBufferTooSmall);
        }
        match decode_exact::<KEY_LENGTH>(&key[..encoded]) {
            Ok(raw) => {
                self.recipient_key = Some(*raw);
                Ok(())
            }
            Err(code) => self.fail(code),
        }
    }

    pub fn ciphertext_length(&self, plaintext_length: usize) -> usize {
        encoded_length(raw_ciphertext_length(plaintext_length))
    }

    pub fn mac_length(&self) -> usize {
        encoded_length(MAC_LENGTH)
    }

    pub fn random_length(&self) -> usize {
        ENCRYPT_RANDOM_LENGTH
    }

    /// Encrypts `plaintext` for the recipient. `random` supplies the
    /// ephemeral private key. Returns the ciphertext length written.
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        ciphertext: &mut [u8],
        mac: &mut [u8],
        ephemeral_key: &mut [u8],
        random: &[u8],
    ) -> EngineResult<usize> {
        let recipient_key = match self.recipient_key {
            Some(key) => key,
            None => return self.fail(PkErrorCode::MissingRecipientKey),
        };

        let ciphertext_length = self.ciphertext_length(plaintext.len());
        if ciphertext.len() < ciphertext_length
            || mac.len() < self.mac_length()
            || ephemeral_key.len() < encoded_length(KEY_LENGTH)
        {
            return self.fail(PkErrorCode::OutputBufferTooSmall);
        }
        if random.len() < ENCRYPT_RANDOM_LENGTH {
            return self.fail(PkErrorCode::NotEnoughRandom);
        }

        let mut ephemeral_private = Zeroizing::new([0u8; PRIVATE_KEY_LENGTH]);
        ephemeral_private.copy_from_slice(&random[..ENCRYPT_RANDOM_LENGTH]);
        let ephemeral_public =
            PublicKey::from(&StaticSecret::from(*ephemeral_private)).to_bytes();

        let secret = shared_secret(&ephemeral_private, &recipient_key);
        let keys = DerivedKeys::from_shared_secret(&secret);
        let raw_ciphertext = keys.encrypt(plaintext);
        let raw_mac = keys.mac(&raw_ciphertext);

        let written = encode_into(&raw_ciphertext, &mut ciphertext[..ciphertext_length])
            .and_then(|written| {
                encode_into(&raw_mac, mac)?;
                encode_into(&ephemeral_public, ephemeral_key)?;
                Ok(written)
            });
        match written {
            Ok(written) => Ok(written),
            Err(code) => self.fail(code),
        }
    }
}

// ----------------------------------------------------------------------------
// Decryption
// ----------------------------------------------------------------------------

#[derive(Zeroize)]
struct KeyPair {
    private: [u8; PRIVATE_KEY_LENGTH],
    public: [u8; KEY_LENGTH],
}

/// Recipient-side context. Holds the local key pair once generated or
/// imported.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PkDecryption {
    key_pair: Option<KeyPair>,
    #[zeroize(skip)]
    last_error: PkErrorCode,
}

impl Default for PkDecryption {
    fn default() -> Self {
        Self::new()
    }
}

impl PkDecryption {
    pub fn new() -> Self {
        PkDecryption {
            key_pair: None,
            last_error: PkErrorCode::Success,
        }
    }

    /// Diagnostic of the most recent failed call on this context.
    pub fn last_error(&self) -> &'static str {
        self.last_error.as_str()
    }

    pub fn has_key_pair(&self) -> bool {
        self.key_pair.is_some()
    }

    fn fail<T>(&mut self, code: PkErrorCode) -> EngineResult<T> {
        self.last_error = code;
        Err(code.into())
    }

    pub fn max_plaintext_length(&self, ciphertext_length: usize) -> EngineResult<usize> {
        decoded_length(ciphertext_length).ok_or_else(|| PkErrorCode::InvalidBase64.into())
    }

    /// Generates a key pair, using `random` as the private key. Writes the
    /// base64 public key.
    pub fn generate_key(&mut self, public_key: &mut [u8], random: &[u8]) -> EngineResult<usize> {
        if public_key.len() < encoded_length(KEY_LENGTH) {
            return self.fail(PkErrorCode::OutputBufferTooSmall);
        }
        if random.len() < GENERATE_KEY_RANDOM_LENGTH {
            return self.fail(PkErrorCode::NotEnoughRandom);
        }
        self.key_from_private(public_key, &random[..GENERATE_KEY_RANDOM_LENGTH])
    }

    /// Installs a raw private key and writes the base64 public key.
    pub fn key_from_private(
        &mut self,
        public_key: &mut [u8],
        private_key: &[u8],
    ) -> EngineResult<usize> {
        if public_key.len() < encoded_length(KEY_LENGTH) {
            return self.fail(PkErrorCode::OutputBufferTooSmall);
        }
        if private_key.len() < PRIVATE_KEY_LENGTH {
            return self.fail(PkErrorCode::InputBufferTooSmall);
        }

        let mut pair = KeyPair {
            private: [0u8; PRIVATE_KEY_LENGTH],
            public: [0u8; KEY_LENGTH],
        };
        pair.private.copy_from_slice(&private_key[..PRIVATE_KEY_LENGTH]);
        pair.public = PublicKey::from(&StaticSecret::from(pair.private)).to_bytes();

        match encode_into(&pair.public, public_key) {
            Ok(written) => {
                if let Some(mut old) = self.key_pair.replace(pair) {
                    old.zeroize();
                }
                Ok(written)
            }
            Err(code) => {
                pair.zeroize();
                self.fail(code)
            }
        }
    }

    /// Writes the raw private key.
    pub fn private_key(&mut self, out: &mut [u8]) -> EngineResult<usize> {
        let private = match &self.key_pair {
            Some(pair) => Zeroizing::new(pair.private),
            None => return self.fail(PkErrorCode::MissingKeyPair),
        };
        if out.len() < PRIVATE_KEY_LENGTH {
            return self.fail(PkErrorCode::OutputBufferTooSmall);
        }
        out[..PRIVATE_KEY_LENGTH].copy_from_slice(&private[..]);
        Ok(PRIVATE_KEY_LENGTH)
    }

    /// Verifies and decrypts a message. `ciphertext` is base64-decoded in
    /// place, so its contents are destroyed.
    pub fn decrypt(
        &mut self,
        ephemeral_key: &[u8],
        mac: &[u8],
        ciphertext: &mut [u8],
        plaintext: &mut [u8],
    ) -> EngineResult<usize> {
        let private = match &self.key_pair {
            Some(pair) => Zeroizing::new(pair.private),
            None => return self.fail(PkErrorCode::MissingKeyPair),
        };
        match Self::open(&private, ephemeral_key, mac, ciphertext, plaintext) {
            Ok(length) => Ok(length),
            Err(code) => self.fail(code),
        }
    }

    fn open(
        private: &[u8; PRIVATE_KEY_LENGTH],
        ephemeral_key: &[u8],
        mac: &[u8],
        ciphertext: &mut [u8],
        plaintext: &mut [u8],
    ) -> Result<usize, PkErrorCode> {
        let max_plaintext_length =
            decoded_length(ciphertext.len()).ok_or(PkErrorCode::InvalidBase64)?;
        if plaintext.len() < max_plaintext_length {
            return Err(PkErrorCode::OutputBufferTooSmall);
        }
        if ephemeral_key.len() != encoded_length(KEY_LENGTH)
            || mac.len() != encoded_length(MAC_LENGTH)
        {
            return Err(PkErrorCode::InvalidBase64);
        }

        let ephemeral = decode_exact::<KEY_LENGTH>(ephemeral_key)?;
        let received_mac = decode_exact::<MAC_LENGTH>(mac)?;

        let raw = STANDARD_NO_PAD
            .decode(&*ciphertext)
            .map_err(|_| PkErrorCode::InvalidBase64)?;
        let raw_length = raw.len();
        ciphertext[..raw_length].copy_from_slice(&raw);
        let raw_ciphertext = &ciphertext[..raw_length];

        let secret = shared_secret(private, &ephemeral);
        let keys = DerivedKeys::from_shared_secret(&secret);

        let expected_mac = keys.mac(raw_ciphertext);
        if !bool::from(expected_mac[..].ct_eq(&received_mac[..])) {
            return Err(PkErrorCode::BadMessageMac);
        }

        let decrypted = keys.decrypt(raw_ciphertext)?;
        plaintext[..decrypted.len()].copy_from_slice(&decrypted);
        Ok(decrypted.len())
    }
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

/// The [`PkEngine`] backed by [`PkEncryption`] and [`PkDecryption`].
#[derive(Debug, Default, Clone, Copy)]
pub struct OlmPk;

impl PkEngine for OlmPk {
    type Encryption = PkEncryption;
    type Decryption = PkDecryption;

    fn new_encryption(&self) -> PkEncryption {
        PkEncryption::new()
    }

    fn clear_encryption(&self, ctx: &mut PkEncryption) {
        ctx.zeroize();
    }

    fn new_decryption(&self) -> PkDecryption {
        PkDecryption::new()
    }

    fn clear_decryption(&self, ctx: &mut PkDecryption) {
        ctx.zeroize();
    }

    fn key_length(&self) -> usize {
        encoded_length(KEY_LENGTH)
    }

    fn private_key_length(&self) -> usize {
        PRIVATE_KEY_LENGTH
    }

    fn ciphertext_length(&self, ctx: &PkEncryption, plaintext_length: usize) -> usize {
        ctx.ciphertext_length(plaintext_length)
    }

    fn mac_length(&self, ctx: &PkEncryption) -> usize {
        ctx.mac_length()
    }

    fn encrypt_random_length(&self, ctx: &PkEncryption) -> usize {
        ctx.random_length()
    }

    fn generate_key_random_length(&self) -> usize {
        GENERATE_KEY_RANDOM_LENGTH
    }

    fn max_plaintext_length(
        &self,
        ctx: &PkDecryption,
        ciphertext_length: usize,
    ) -> EngineResult<usize> {
        ctx.max_plaintext_length(ciphertext_length)
    }

    fn set_recipient_key(&self, ctx: &mut PkEncryption, key: &[u8]) -> EngineResult<()> {
        ctx.set_recipient_key(key)
    }

    fn encrypt(
        &self,
        ctx: &mut PkEncryption,
        plaintext: &[u8],
        ciphertext: &mut [u8],
        mac: &mut [u8],
        ephemeral_key: &mut [u8],
        random: &[u8],
    ) -> EngineResult<usize> {
        ctx.encrypt(plaintext, ciphertext, mac, ephemeral_key, random)
    }

    fn generate_key(
        &self,
        ctx: &mut PkDecryption,
        public_key: &mut [u8],
        random: &[u8],
    ) -> EngineResult<usize> {
        ctx.generate_key(public_key, random)
    }

    fn key_from_private(
        &self,
        ctx: &mut PkDecryption,
        public_key: &mut [u8],
        private_key: &[u8],
    ) -> EngineResult<usize> {
        ctx.key_from_private(public_key, private_key)
    }

    fn private_key(&self, ctx: &mut PkDecryption, out: &mut [u8]) -> EngineResult<usize> {
        ctx.private_key(out)
    }

    fn decrypt(
        &self,
        ctx: &mut PkDecryption,
        ephemeral_key: &[u8],
        mac: &[u8],
        ciphertext: &mut [u8],
        plaintext: &mut [u8],
    ) -> EngineResult<usize> {
        ctx.decrypt(ephemeral_key, mac, ciphertext, plaintext)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::{OsRng, RngCore};

    // RFC 7748 section 6.1 key pairs.
    const ALICE_PRIVATE: [u8; 32] = [
        0x77, 0x07, 0x6d, 0x0a, 0x73, 0x18, 0xa5, 0x7d, 0x3c, 0x16, 0xc1, 0x72, 0x51, 0xb2, 0x66,
        0x45, 0xdf, 0x4c, 0x2f, 0x87, 0xeb, 0xc0, 0x99, 0x2a, 0xb1, 0x77, 0xfb, 0xa5, 0x1d, 0xb9,
        0x2c, 0x2a,
    ];
    const ALICE_PUBLIC: &str = "hSDwCYkwp1R0i33ctD73Wg2/Og0mOBr066SpjqqbTmo";
    const BOB_PRIVATE: [u8; 32] = [
        0x5d, 0xab, 0x08, 0x7e, 0x62, 0x4a, 0x8a, 0x4b, 0x79, 0xe1, 0x7f, 0x8b, 0x83, 0x80, 0x0e,
        0xe6, 0x6f, 0x3b, 0xb1, 0x29, 0x26, 0x18, 0xb6, 0xfd, 0x1c, 0x2f, 0x8b, 0x27, 0xff, 0x88,
        0xe0, 0xeb,
    ];
    const BOB_PUBLIC: &str = "3p7bfXt9wbTTW2HC7OQ1Nz+DQ8hbeGdNrfx+FG+IK08";

    struct Sealed {
        ciphertext: Vec<u8>,
        mac: Vec<u8>,
        ephemeral: Vec<u8>,
    }

    fn seal(encryption: &mut PkEncryption, plaintext: &[u8], random: &[u8]) -> Sealed {
        let mut ciphertext = vec![0u8; encryption.ciphertext_length(plaintext.len())];
        let mut mac = vec![0u8; encryption.mac_length()];
        let mut ephemeral = vec![0u8; encoded_length(KEY_LENGTH)];
        let written = encryption
            .encrypt(plaintext, &mut ciphertext, &mut mac, &mut ephemeral, random)
            .expect("encrypt");
        assert_eq!(written, ciphertext.len());
        Sealed {
            ciphertext,
            mac,
            ephemeral,
        }
    }

    fn open(decryption: &mut PkDecryption, sealed: &Sealed) -> EngineResult<Vec<u8>> {
        let mut scratch = sealed.ciphertext.clone();
        let max = decryption.max_plaintext_length(scratch.len())?;
        let mut plaintext = vec![0u8; max];
        let length =
            decryption.decrypt(&sealed.ephemeral, &sealed.mac, &mut scratch, &mut plaintext)?;
        plaintext.truncate(length);
        Ok(plaintext)
    }

    #[test]
    fn test_lengths() {
        let encryption = PkEncryption::new();
        assert_eq!(encoded_length(KEY_LENGTH), 43);
        assert_eq!(encryption.mac_length(), 11);
        assert_eq!(encryption.ciphertext_length(0), 22);
        assert_eq!(encryption.ciphertext_length(15), 22);
        assert_eq!(encryption.ciphertext_length(16), 43);
        assert_eq!(decoded_length(22), Some(16));
        assert_eq!(decoded_length(43), Some(32));
        assert_eq!(decoded_length(5), None);
    }

    #[test]
    fn test_known_key_pairs() {
        let mut decryption = PkDecryption::new();
        let mut public = [0u8; 43];
        decryption
            .key_from_private(&mut public, &ALICE_PRIVATE)
            .expect("import");
        assert_eq!(&public[..], ALICE_PUBLIC.as_bytes());

        let mut encryption = PkEncryption::new();
        encryption
            .set_recipient_key(ALICE_PUBLIC.as_bytes())
            .expect("recipient");
        // The random input becomes the ephemeral private key.
        let sealed = seal(&mut encryption, b"This is a test", &BOB_PRIVATE);
        assert_eq!(&sealed.ephemeral[..], BOB_PUBLIC.as_bytes());

        assert_eq!(open(&mut decryption, &sealed).unwrap(), b"This is a test");
    }

    #[test]
    fn test_round_trip_various_lengths() {
        let mut decryption = PkDecryption::new();
        let mut random = [0u8; 32];
        OsRng.fill_bytes(&mut random);
        let mut public = [0u8; 43];
        decryption.generate_key(&mut public, &random).unwrap();

        let mut encryption = PkEncryption::new();
        encryption.set_recipient_key(&public).unwrap();

        for length in [0usize, 1, 15, 16, 17, 100] {
            let plaintext = vec![0x42u8; length];
            OsRng.fill_bytes(&mut random);
            let sealed = seal(&mut encryption, &plaintext, &random);
            assert_eq!(open(&mut decryption, &sealed).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_encrypt_without_recipient_key() {
        let mut encryption = PkEncryption::new();
        let mut ciphertext = [0u8; 22];
        let mut mac = [0u8; 11];
        let mut ephemeral = [0u8; 43];
        let err = encryption
            .encrypt(b"hi", &mut ciphertext, &mut mac, &mut ephemeral, &[1u8; 32])
            .unwrap_err();
        assert_eq!(err.message(), "MISSING_RECIPIENT_KEY");
        assert_eq!(encryption.last_error(), "MISSING_RECIPIENT_KEY");
    }

    #[test]
    fn test_encrypt_short_random() {
        let mut encryption = PkEncryption::new();
        encryption.set_recipient_key(BOB_PUBLIC.as_bytes()).unwrap();
        let mut ciphertext = [0u8; 22];
        let mut mac = [0u8; 11];
        let mut ephemeral = [0u8; 43];
        let err = encryption
            .encrypt(b"hi", &mut ciphertext, &mut mac, &mut ephemeral, &[1u8; 31])
            .unwrap_err();
        assert_eq!(err.message(), "NOT_ENOUGH_RANDOM");
    }

    #[test]
    fn test_set_recipient_key_rejects_bad_input() {
        let mut encryption = PkEncryption::new();
        let err = encryption.set_recipient_key(b"short").unwrap_err();
        assert_eq!(err.message(), "INPUT_BUFFER_TOO_SMALL");
        assert!(!encryption.has_recipient_key());

        let err = encryption.set_recipient_key(&[b'!'; 43]).unwrap_err();
        assert_eq!(err.message(), "INVALID_BASE64");
        assert_eq!(encryption.last_error(), "INVALID_BASE64");
    }

    #[test]
    fn test_tampered_mac_is_rejected() {
        let mut decryption = PkDecryption::new();
        let mut public = [0u8; 43];
        decryption.key_from_private(&mut public, &ALICE_PRIVATE).unwrap();

        let mut encryption = PkEncryption::new();
        encryption.set_recipient_key(&public).unwrap();
        let mut sealed = seal(&mut encryption, b"secret", &BOB_PRIVATE);

        let mut raw_mac = STANDARD_NO_PAD.decode(&sealed.mac).unwrap();
        raw_mac[0] ^= 0x01;
        sealed.mac = STANDARD_NO_PAD.encode(&raw_mac).into_bytes();

        let err = open(&mut decryption, &sealed).unwrap_err();
        assert_eq!(err.message(), "BAD_MESSAGE_MAC");
        assert_eq!(decryption.last_error(), "BAD_MESSAGE_MAC");
    }

    #[test]
    fn test_decrypt_without_key_pair() {
        let mut decryption = PkDecryption::new();
        let mut plaintext = [0u8; 16];
        let mut ciphertext = *b"AAAAAAAAAAAAAAAAAAAAAA";
        let err = decryption
            .decrypt(BOB_PUBLIC.as_bytes(), b"AAAAAAAAAAA", &mut ciphertext, &mut plaintext)
            .unwrap_err();
        assert_eq!(err.message(), "MISSING_KEY_PAIR");
    }

    #[test]
    fn test_private_key_export() {
        let mut decryption = PkDecryption::new();
        let mut out = [0u8; 32];
        assert_eq!(
            decryption.private_key(&mut out).unwrap_err().message(),
            "MISSING_KEY_PAIR"
        );

        let mut public = [0u8; 43];
        decryption.key_from_private(&mut public, &BOB_PRIVATE).unwrap();
        decryption.private_key(&mut out).unwrap();
        assert_eq!(out, BOB_PRIVATE);
    }

    #[test]
    fn test_zeroize_clears_keys() {
        let mut decryption = PkDecryption::new();
        let mut public = [0u8; 43];
        decryption.key_from_private(&mut public, &BOB_PRIVATE).unwrap();
        OlmPk.clear_decryption(&mut decryption);
        assert!(!decryption.has_key_pair());

        let mut encryption = PkEncryption::new();
        encryption.set_recipient_key(&public).unwrap();
        OlmPk.clear_encryption(&mut encryption);
        assert!(!encryption.has_recipient_key());
    }
}
