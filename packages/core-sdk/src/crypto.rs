//! Passphrase-based AES used to obfuscate stored API keys.
//!
//! The passphrase is a fixed string compiled into the binary (overridable only
//! through the `ULTIMATEAI_ENCRYPTION_KEY` variable at build time). Anyone who
//! can run the binary can decrypt the stored keys; this only keeps them out of
//! plain sight in the local storage file.
//!
//! The encoded form matches the OpenSSL `enc` / CryptoJS passphrase format:
//! base64(`Salted__` || salt[8] || AES-256-CBC ciphertext), with key and IV
//! derived through MD5-based `EVP_BytesToKey`.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use anyhow::{anyhow, bail, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const SALT_MAGIC: &[u8] = b"Salted__";
const SALT_LEN: usize = 8;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/**
 * \brief Passphrase baked in at build time.
 */
pub const ENCRYPTION_PASSPHRASE: &str = match option_env!("ULTIMATEAI_ENCRYPTION_KEY") {
    Some(key) => key,
    None => "ultimate-ai-secure-key-v1",
};

/**
 * \brief Encrypt an API key with the built-in passphrase.
 */
pub fn encrypt_api_key(api_key: &str) -> Result<String> {
    encrypt_with_passphrase(api_key, ENCRYPTION_PASSPHRASE)
}

/**
 * \brief Decrypt a value produced by [`encrypt_api_key`].
 */
pub fn decrypt_api_key(encrypted: &str) -> Result<String> {
    decrypt_with_passphrase(encrypted, ENCRYPTION_PASSPHRASE)
}

pub fn encrypt_with_passphrase(plaintext: &str, passphrase: &str) -> Result<String> {
    let salt: [u8; SALT_LEN] = rand::random();
    let (key, iv) = derive_key_iv(passphrase.as_bytes(), &salt);
    let cipher = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|e| anyhow!("failed to encrypt API key: {}", e))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut out = Vec::with_capacity(SALT_MAGIC.len() + SALT_LEN + ciphertext.len());
    out.extend_from_slice(SALT_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(out))
}

pub fn decrypt_with_passphrase(encoded: &str, passphrase: &str) -> Result<String> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| anyhow!("invalid encrypted key: {}", e))?;
    if raw.len() <= SALT_MAGIC.len() + SALT_LEN || !raw.starts_with(SALT_MAGIC) {
        bail!("invalid encrypted key: missing salt header");
    }
    let salt = &raw[SALT_MAGIC.len()..SALT_MAGIC.len() + SALT_LEN];
    let ciphertext = &raw[SALT_MAGIC.len() + SALT_LEN..];

    let (key, iv) = derive_key_iv(passphrase.as_bytes(), salt);
    let cipher = Aes256CbcDec::new_from_slices(&key, &iv)
        .map_err(|e| anyhow!("failed to decrypt API key: {}", e))?;
    let plain = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| anyhow!("failed to decrypt API key"))?;
    let text = String::from_utf8(plain).map_err(|_| anyhow!("failed to decrypt API key"))?;
    if text.is_empty() {
        bail!("invalid encrypted key");
    }
    Ok(text)
}

/// OpenSSL `EVP_BytesToKey` with MD5 and a single iteration.
fn derive_key_iv(passphrase: &[u8], salt: &[u8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut material = Vec::with_capacity(KEY_LEN + IV_LEN);
    let mut prev: Vec<u8> = Vec::new();
    while material.len() < KEY_LEN + IV_LEN {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(passphrase);
        hasher.update(salt);
        prev = hasher.finalize().to_vec();
        material.extend_from_slice(&prev);
    }
    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&material[..KEY_LEN]);
    iv.copy_from_slice(&material[KEY_LEN..KEY_LEN + IV_LEN]);
    (key, iv)
}
