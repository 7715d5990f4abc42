//! # Encryption Envelope
//!
//! AES-256-CBC (PKCS#7) envelope for relayed frames.
//!
//! ## Wire Format
//! ```text
//! [Key(32)] [IV(16)] [Ciphertext(N * 16)]
//! ```
//!
//! There is no length prefix: the ciphertext is everything after the first 48
//! bytes. Every [`encode`] call draws a fresh key and IV, so each envelope is
//! self-contained and there is no session key.
//!
//! ## Security
//! The key travels in the clear next to the ciphertext. Anyone who can read the
//! wire and knows the layout can decrypt every message. The envelope only keeps
//! message text out of naive packet captures; it provides no confidentiality
//! and no integrity.

use crate::error::{constants, RelayError, Result};
use cbc::cipher::block_padding::{NoPadding, Padding, Pkcs7};
use cbc::cipher::consts::U16;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256 key length
pub const KEY_LEN: usize = 32;
/// CBC initialization vector length
pub const IV_LEN: usize = 16;
/// Bytes preceding the ciphertext in an envelope
pub const HEADER_LEN: usize = KEY_LEN + IV_LEN;
/// AES block size
pub const BLOCK_LEN: usize = 16;
/// Smallest well-formed envelope: header plus one padded block
pub const MIN_ENVELOPE_LEN: usize = HEADER_LEN + BLOCK_LEN;

/// Key and IV for a single envelope. Wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Crypto {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl Crypto {
    pub fn new(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Self {
        Self { key: *key, iv: *iv }
    }

    /// Build from the raw header fields of a received envelope.
    pub fn from_slices(key: &[u8], iv: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| {
            debug!(len = key.len(), "{}", constants::ERR_ENVELOPE_TOO_SHORT);
            RelayError::DecryptionFailure
        })?;
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| {
            debug!(len = iv.len(), "{}", constants::ERR_ENVELOPE_TOO_SHORT);
            RelayError::DecryptionFailure
        })?;
        Ok(Self { key, iv })
    }

    /// Fresh key and IV from the OS random source
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        getrandom::fill(&mut key).map_err(|e| {
            debug!(error = %e, "{}", constants::ERR_RANDOM_SOURCE);
            RelayError::EncryptionFailure
        })?;
        getrandom::fill(&mut iv).map_err(|e| {
            debug!(error = %e, "{}", constants::ERR_RANDOM_SOURCE);
            RelayError::EncryptionFailure
        })?;
        let crypto = Self::new(&key, &iv);
        key.zeroize();
        iv.zeroize();
        Ok(crypto)
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes256CbcEnc::new(
            GenericArray::from_slice(&self.key),
            GenericArray::from_slice(&self.iv),
        )
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            debug!(len = ciphertext.len(), "{}", constants::ERR_ENVELOPE_ALIGNMENT);
            return Err(RelayError::DecryptionFailure);
        }
        Aes256CbcDec::new(
            GenericArray::from_slice(&self.key),
            GenericArray::from_slice(&self.iv),
        )
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| RelayError::DecryptionFailure)
    }

    /// Decrypt whole blocks without checking or removing padding.
    ///
    /// CBC block `i` depends only on ciphertext blocks `i` and `i - 1`, so the
    /// output for any block-aligned prefix is a prefix of this output.
    fn decrypt_blocks(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Aes256CbcDec::new(
            GenericArray::from_slice(&self.key),
            GenericArray::from_slice(&self.iv),
        )
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| RelayError::DecryptionFailure)
    }
}

/// Encrypt `plaintext` under a fresh key and IV, returning `key ‖ iv ‖ ciphertext`.
pub fn encode(plaintext: &str) -> Result<Vec<u8>> {
    let crypto = Crypto::generate()?;
    let ciphertext = crypto.encrypt(plaintext.as_bytes());

    let mut envelope = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    envelope.extend_from_slice(crypto.key());
    envelope.extend_from_slice(crypto.iv());
    envelope.extend_from_slice(&ciphertext);
    trace!(len = envelope.len(), "sealed envelope");
    Ok(envelope)
}

/// Open an envelope and return its text.
pub fn decode(buffer: &[u8]) -> Result<String> {
    if buffer.len() < HEADER_LEN {
        debug!(len = buffer.len(), "{}", constants::ERR_ENVELOPE_TOO_SHORT);
        return Err(RelayError::DecryptionFailure);
    }
    let (header, ciphertext) = buffer.split_at(HEADER_LEN);
    let crypto = Crypto::from_slices(&header[..KEY_LEN], &header[KEY_LEN..])?;
    let plaintext = crypto.decrypt(ciphertext)?;
    String::from_utf8(plaintext).map_err(|_| RelayError::DecryptionFailure)
}

/// Find the shortest envelope at the start of `buffer` whose text contains `delimiter`.
///
/// Returns the envelope length on the wire and its decrypted text. `None` means
/// no complete envelope is present yet (or the bytes are not an envelope).
pub fn locate(buffer: &[u8], delimiter: &[u8]) -> Option<(usize, String)> {
    if buffer.len() < MIN_ENVELOPE_LEN || delimiter.is_empty() {
        return None;
    }
    let (header, rest) = buffer.split_at(HEADER_LEN);
    let aligned = rest.len() - rest.len() % BLOCK_LEN;
    let crypto = Crypto::from_slices(&header[..KEY_LEN], &header[KEY_LEN..]).ok()?;
    let blocks = crypto.decrypt_blocks(&rest[..aligned]).ok()?;

    let marker = blocks
        .windows(delimiter.len())
        .position(|window| window == delimiter)?;
    let needed = marker + delimiter.len();

    for end in (BLOCK_LEN..=blocks.len()).step_by(BLOCK_LEN) {
        if end <= needed {
            continue;
        }
        let last = GenericArray::<u8, U16>::from_slice(&blocks[end - BLOCK_LEN..end]);
        let Ok(kept) = <Pkcs7 as Padding<U16>>::unpad(last) else {
            continue;
        };
        let text_len = end - BLOCK_LEN + kept.len();
        if text_len < needed {
            continue;
        }
        if let Ok(text) = std::str::from_utf8(&blocks[..text_len]) {
            return Some((HEADER_LEN + end, text.to_owned()));
        }
    }
    None
}
