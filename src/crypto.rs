//! Cryptographic primitives: HMAC-SHA256 and AES-256-GCM with a prepended
//! random nonce.

use aes_gcm::Aes256Gcm;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use thiserror::Error;

/// AES-GCM nonce length (96 bits).
pub const NONCE_LEN: usize = 12;

/// Low-level crypto failures. Callers translate these into the error that
/// fits their context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key has the wrong length for the primitive
    #[error("invalid key length")]
    InvalidKeyLength,

    /// Sealed input is shorter than its nonce prefix
    #[error("ciphertext shorter than nonce")]
    Truncated,

    /// Authentication tag mismatch or cipher failure
    #[error("AEAD operation failed")]
    Aead,

    /// The OS randomness source failed
    #[error("randomness source failed: {0}")]
    Rng(String),
}

/// Fill `buf` from the operating system RNG.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::Rng(e.to_string()))
}

/// HMAC-SHA256 of `data` under `key`.
pub fn sign(data: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    // hmac and aes-gcm pull in different `KeyInit` traits
    use hmac::{KeyInit as _, Mac};

    let mut mac = hmac::Hmac::<Sha256>::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Recompute the MAC and compare it with `signature` in constant time.
pub fn verify(data: &[u8], signature: &[u8], key: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    sign(data, key).is_ok_and(|expected| expected.as_slice().ct_eq(signature).into())
}

/// Encrypt with AES-256-GCM. Output is `nonce || ciphertext || tag`.
pub fn seal(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?;

    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;

    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Aead)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt output of [`seal`].
pub fn open(sealed: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::Truncated);
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?;
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    cipher
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Aead)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: [u8; 32] = [7u8; 32];
    const KEY_B: [u8; 32] = [9u8; 32];

    #[test]
    fn hmac_matches_rfc4231_case_2() {
        // RFC 4231 test case 2
        let mac = sign(b"what do ya want for nothing?", b"Jefe").unwrap();
        assert_eq!(
            mac,
            [
                0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95,
                0x75, 0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9,
                0x64, 0xec, 0x38, 0x43,
            ]
        );
    }

    #[test]
    fn hmac_keys_of_any_length_are_accepted() {
        // HMAC pads or hashes the key, so only the AEAD has a fixed key size
        for len in [0, 1, 32, 100] {
            let key = vec![0x0bu8; len];
            let mac = sign(b"data", &key).unwrap();
            assert_eq!(mac.len(), 32);
            assert!(verify(b"data", &mac, &key));
        }
    }

    #[test]
    fn verify_rejects_other_key_and_truncated_signature() {
        let sig = sign(b"payload", &KEY_A).unwrap();

        assert!(verify(b"payload", &sig, &KEY_A));
        assert!(!verify(b"payload", &sig, &KEY_B));
        assert!(!verify(b"payload", &sig[..31], &KEY_A));
        assert!(!verify(b"payload!", &sig, &KEY_A));
    }

    #[test]
    fn seal_prepends_fresh_nonce() {
        let a = seal(b"hello", &KEY_A).unwrap();
        let b = seal(b"hello", &KEY_A).unwrap();

        // nonce + 5 bytes plaintext + 16 byte tag
        assert_eq!(a.len(), NONCE_LEN + 5 + 16);
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_eq!(open(&a, &KEY_A).unwrap(), b"hello");
        assert_eq!(open(&b, &KEY_A).unwrap(), b"hello");
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let sealed = seal(b"secret", &KEY_A).unwrap();
        assert_eq!(open(&sealed, &KEY_B), Err(CryptoError::Aead));
    }

    #[test]
    fn open_rejects_input_shorter_than_nonce() {
        assert_eq!(open(&[0u8; NONCE_LEN - 1], &KEY_A), Err(CryptoError::Truncated));
    }

    #[test]
    fn seal_rejects_short_key() {
        assert_eq!(seal(b"x", &[0u8; 16]), Err(CryptoError::InvalidKeyLength));
    }
}
