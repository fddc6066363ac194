// Cipher suite - raw seal/open for every supported algorithm

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::types::EncryptionAlgorithm;
use crate::{Result, SafeguardError};

pub(crate) const AES_NONCE_LEN: usize = 12;
pub(crate) const XCHACHA_NONCE_LEN: usize = 24;
pub(crate) const SYMMETRIC_KEY_LEN: usize = 32;

/// Output of a seal operation
#[derive(Debug)]
pub(crate) struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub wrapped_key: Option<Vec<u8>>,
}

fn crypto_err(context: &str, e: impl std::fmt::Display) -> SafeguardError {
    SafeguardError::Crypto(format!("{}: {}", context, e))
}

pub(crate) fn random_bytes(len: usize) -> Zeroizing<Vec<u8>> {
    let mut bytes = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Fresh key material. RSA material is the PKCS#8 DER private key; this is
/// CPU-heavy and should run off the async executor.
pub(crate) fn generate_material(algorithm: EncryptionAlgorithm) -> Result<Zeroizing<Vec<u8>>> {
    let bits = match algorithm {
        EncryptionAlgorithm::XChaCha20Poly1305 | EncryptionAlgorithm::Aes256Gcm => {
            return Ok(random_bytes(SYMMETRIC_KEY_LEN))
        }
        EncryptionAlgorithm::Rsa2048 => 2048,
        EncryptionAlgorithm::Rsa4096 => 4096,
    };

    let mut rng = rsa::rand_core::OsRng;
    let private = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| crypto_err("RSA key generation failed", e))?;
    let der = private
        .to_pkcs8_der()
        .map_err(|e| crypto_err("RSA key encoding failed", e))?;
    Ok(Zeroizing::new(der.as_bytes().to_vec()))
}

/// AES-256-GCM with optional associated data; output is nonce || ciphertext || tag
pub(crate) fn aes_seal(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| crypto_err("Invalid AES key", e))?;
    let mut nonce_bytes = [0u8; AES_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| crypto_err("AES-GCM encryption failed", e))?;

    let mut out = Vec::with_capacity(AES_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`aes_seal`]
pub(crate) fn aes_open(key: &[u8], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    // nonce + 16-byte tag
    if sealed.len() < AES_NONCE_LEN + 16 {
        return Err(SafeguardError::Crypto("Sealed data too short".into()));
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| crypto_err("Invalid AES key", e))?;
    let (nonce, ciphertext) = sealed.split_at(AES_NONCE_LEN);
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|e| crypto_err("AES-GCM decryption failed", e))
}

/// Encrypt a payload under `material` for the given algorithm
pub(crate) fn seal(
    algorithm: EncryptionAlgorithm,
    material: &[u8],
    plaintext: &[u8],
) -> Result<Sealed> {
    match algorithm {
        EncryptionAlgorithm::XChaCha20Poly1305 => {
            let cipher = XChaCha20Poly1305::new_from_slice(material)
                .map_err(|e| crypto_err("Invalid XChaCha20 key", e))?;
            let mut nonce = vec![0u8; XCHACHA_NONCE_LEN];
            OsRng.fill_bytes(&mut nonce);
            let ciphertext = cipher
                .encrypt(XNonce::from_slice(&nonce), plaintext)
                .map_err(|e| crypto_err("XChaCha20-Poly1305 encryption failed", e))?;
            Ok(Sealed {
                ciphertext,
                iv: nonce,
                wrapped_key: None,
            })
        }
        EncryptionAlgorithm::Aes256Gcm => {
            let mut sealed = aes_seal(material, plaintext, &[])?;
            let ciphertext = sealed.split_off(AES_NONCE_LEN);
            Ok(Sealed {
                ciphertext,
                iv: sealed,
                wrapped_key: None,
            })
        }
        EncryptionAlgorithm::Rsa2048 | EncryptionAlgorithm::Rsa4096 => {
            let private = RsaPrivateKey::from_pkcs8_der(material)
                .map_err(|e| crypto_err("Invalid RSA key", e))?;
            let public = RsaPublicKey::from(&private);

            let data_key = random_bytes(SYMMETRIC_KEY_LEN);
            let mut rng = rsa::rand_core::OsRng;
            let wrapped = public
                .encrypt(&mut rng, Oaep::new::<Sha256>(), &data_key)
                .map_err(|e| crypto_err("RSA-OAEP key wrap failed", e))?;

            let mut sealed = aes_seal(&data_key, plaintext, &[])?;
            let ciphertext = sealed.split_off(AES_NONCE_LEN);
            Ok(Sealed {
                ciphertext,
                iv: sealed,
                wrapped_key: Some(wrapped),
            })
        }
    }
}

/// Decrypt a payload produced by [`seal`]
pub(crate) fn open(
    algorithm: EncryptionAlgorithm,
    material: &[u8],
    ciphertext: &[u8],
    iv: &[u8],
    wrapped_key: Option<&[u8]>,
) -> Result<Vec<u8>> {
    match algorithm {
        EncryptionAlgorithm::XChaCha20Poly1305 => {
            if iv.len() != XCHACHA_NONCE_LEN {
                return Err(SafeguardError::Crypto(format!(
                    "XChaCha20 nonce must be {} bytes, got {}",
                    XCHACHA_NONCE_LEN,
                    iv.len()
                )));
            }
            let cipher = XChaCha20Poly1305::new_from_slice(material)
                .map_err(|e| crypto_err("Invalid XChaCha20 key", e))?;
            cipher
                .decrypt(XNonce::from_slice(iv), ciphertext)
                .map_err(|e| crypto_err("XChaCha20-Poly1305 decryption failed", e))
        }
        EncryptionAlgorithm::Aes256Gcm => aes_open(material, &join_nonce(iv, ciphertext)?, &[]),
        EncryptionAlgorithm::Rsa2048 | EncryptionAlgorithm::Rsa4096 => {
            let wrapped = wrapped_key
                .ok_or_else(|| SafeguardError::Crypto("Missing wrapped data key".into()))?;
            let private = RsaPrivateKey::from_pkcs8_der(material)
                .map_err(|e| crypto_err("Invalid RSA key", e))?;
            let data_key = Zeroizing::new(
                private
                    .decrypt(Oaep::new::<Sha256>(), wrapped)
                    .map_err(|e| crypto_err("RSA-OAEP key unwrap failed", e))?,
            );
            aes_open(&data_key, &join_nonce(iv, ciphertext)?, &[])
        }
    }
}

fn join_nonce(iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if iv.len() != AES_NONCE_LEN {
        return Err(SafeguardError::Crypto(format!(
            "AES-GCM nonce must be {} bytes, got {}",
            AES_NONCE_LEN,
            iv.len()
        )));
    }
    let mut joined = Vec::with_capacity(iv.len() + ciphertext.len());
    joined.extend_from_slice(iv);
    joined.extend_from_slice(ciphertext);
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aes_layout_appends_tag() {
        let key = random_bytes(SYMMETRIC_KEY_LEN);
        let sealed = seal(EncryptionAlgorithm::Aes256Gcm, &key, b"hello").unwrap();
        assert_eq!(sealed.iv.len(), AES_NONCE_LEN);
        assert_eq!(sealed.ciphertext.len(), 5 + 16);

        let plain = open(EncryptionAlgorithm::Aes256Gcm, &key, &sealed.ciphertext, &sealed.iv, None)
            .unwrap();
        assert_eq!(plain, b"hello");
    }

    #[test]
    fn test_xchacha_round_trip() {
        let key = random_bytes(SYMMETRIC_KEY_LEN);
        let sealed = seal(EncryptionAlgorithm::XChaCha20Poly1305, &key, b"case notes").unwrap();
        assert_eq!(sealed.iv.len(), XCHACHA_NONCE_LEN);

        let plain = open(
            EncryptionAlgorithm::XChaCha20Poly1305,
            &key,
            &sealed.ciphertext,
            &sealed.iv,
            None,
        )
        .unwrap();
        assert_eq!(plain, b"case notes");
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let key = random_bytes(SYMMETRIC_KEY_LEN);
        let mut sealed = seal(EncryptionAlgorithm::Aes256Gcm, &key, b"evidence").unwrap();
        sealed.ciphertext[0] ^= 0xff;
        assert!(open(EncryptionAlgorithm::Aes256Gcm, &key, &sealed.ciphertext, &sealed.iv, None)
            .is_err());
    }

    #[test]
    fn test_associated_data_binds_key_file() {
        let key = random_bytes(SYMMETRIC_KEY_LEN);
        let sealed = aes_seal(&key, b"material", b"key-1").unwrap();
        assert!(aes_open(&key, &sealed, b"key-1").is_ok());
        assert!(aes_open(&key, &sealed, b"key-2").is_err());
    }

    #[test]
    fn test_rsa_hybrid_round_trip() {
        let material = generate_material(EncryptionAlgorithm::Rsa2048).unwrap();
        let sealed = seal(EncryptionAlgorithm::Rsa2048, &material, b"privileged").unwrap();
        assert!(sealed.wrapped_key.is_some());

        let plain = open(
            EncryptionAlgorithm::Rsa2048,
            &material,
            &sealed.ciphertext,
            &sealed.iv,
            sealed.wrapped_key.as_deref(),
        )
        .unwrap();
        assert_eq!(plain, b"privileged");
    }
}
