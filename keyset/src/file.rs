use openssl::{
    hash::MessageDigest,
    pkcs5::pbkdf2_hmac,
    rand::rand_bytes,
    symm::{decrypt_aead, encrypt_aead, Cipher},
};
use serde::Deserialize;
use serde_bytes::ByteBuf;
use serde_repr::{Deserialize_repr, Serialize_repr};
use serde_tuple::Serialize_tuple;
use zeroize::Zeroizing;

use crate::errors::{KeysetError, Result};

pub(crate) const MAGIC: &str = "KEYPORT-KEYSET";
pub(crate) const FORMAT_VERSION: u16 = 1;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Debug, Serialize_tuple, Deserialize)]
pub(crate) struct KeysetFile {
    pub magic: String,
    pub version: u16,
    pub entries: Vec<StoredEntry>,
}

impl KeysetFile {
    pub fn new(entries: Vec<StoredEntry>) -> Self {
        KeysetFile {
            magic: MAGIC.to_string(),
            version: FORMAT_VERSION,
            entries,
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(KeysetError::InvalidFormat("bad magic".to_string()));
        }
        if self.version != FORMAT_VERSION {
            return Err(KeysetError::InvalidFormat(format!(
                "unsupported version {}",
                self.version
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize_tuple, Deserialize)]
pub(crate) struct StoredEntry {
    pub label: String,
    #[serde(with = "serde_bytes")]
    pub key_id: Vec<u8>,
    pub protection: KeyProtection,
    #[serde(with = "serde_bytes")]
    pub encrypted_key: Vec<u8>,
    pub certificate: Option<ByteBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub(crate) enum KdfAlgorithm {
    Pbkdf2HmacSha256 = 1,
}

#[derive(Debug, Clone, Serialize_tuple, Deserialize)]
pub(crate) struct KeyProtection {
    pub kdf: KdfAlgorithm,
    pub iterations: u32,
    #[serde(with = "serde_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub tag: Vec<u8>,
}

impl KeyProtection {
    fn derive_key(&self, password: &str) -> Result<Zeroizing<Vec<u8>>> {
        let mut key = Zeroizing::new(vec![0; KEY_LEN]);
        match self.kdf {
            KdfAlgorithm::Pbkdf2HmacSha256 => pbkdf2_hmac(
                password.as_bytes(),
                &self.salt,
                self.iterations as usize,
                MessageDigest::sha256(),
                &mut key,
            )?,
        }
        Ok(key)
    }
}

fn additional_data(label: &str, key_id: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(label.len() + key_id.len());
    aad.extend_from_slice(label.as_bytes());
    aad.extend_from_slice(key_id);
    aad
}

/// Encrypts a private key for storage under `label`.
pub(crate) fn seal(
    label: &str,
    key_id: &[u8],
    plaintext: &[u8],
    password: &str,
    iterations: u32,
) -> Result<(KeyProtection, Vec<u8>)> {
    let mut salt = vec![0; SALT_LEN];
    rand_bytes(&mut salt)?;
    let mut nonce = vec![0; NONCE_LEN];
    rand_bytes(&mut nonce)?;

    let mut protection = KeyProtection {
        kdf: KdfAlgorithm::Pbkdf2HmacSha256,
        iterations,
        salt,
        nonce,
        tag: vec![0; TAG_LEN],
    };
    let key = protection.derive_key(password)?;
    let ciphertext = encrypt_aead(
        Cipher::aes_256_gcm(),
        &key,
        Some(protection.nonce.as_slice()),
        &additional_data(label, key_id),
        plaintext,
        &mut protection.tag,
    )?;
    Ok((protection, ciphertext))
}

/// Decrypts the private key of an entry. Any authentication failure is
/// reported as a wrong password.
pub(crate) fn unseal(entry: &StoredEntry, password: &str) -> Result<Zeroizing<Vec<u8>>> {
    let protection = &entry.protection;
    if protection.nonce.len() != NONCE_LEN || protection.tag.len() != TAG_LEN {
        return Err(KeysetError::InvalidFormat(format!(
            "bad key protection parameters for '{}'",
            entry.label
        )));
    }
    let key = protection.derive_key(password)?;
    decrypt_aead(
        Cipher::aes_256_gcm(),
        &key,
        Some(protection.nonce.as_slice()),
        &additional_data(&entry.label, &entry.key_id),
        &entry.encrypted_key,
        &protection.tag,
    )
    .map(Zeroizing::new)
    .map_err(|_| KeysetError::WrongPassword)
}
