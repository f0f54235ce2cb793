//! Integrity check of a PKCS#12 PFX in password mode (RFC 7292).
//!
//! The MAC is verified against the raw authSafe bytes before anything in the
//! container is decrypted. Besides the classic MAC keyed by the RFC 7292
//! Appendix B derivation, PBMAC1 (RFC 9579) is accepted.

use openssl::{
    error::ErrorStack,
    hash::{Hasher, MessageDigest},
    memcmp, pkcs5,
    pkey::PKey,
    sign::Signer,
};
use yasna::{models::ObjectIdentifier, Tag};
use zeroize::Zeroizing;

use crate::errors::{Error, Result};

const OID_DATA: &[u64] = &[1, 2, 840, 113549, 1, 7, 1];

const OID_SHA1: &[u64] = &[1, 3, 14, 3, 2, 26];
const OID_SHA224: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 4];
const OID_SHA256: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 1];
const OID_SHA384: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 2];
const OID_SHA512: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 3];

const OID_PBKDF2: &[u64] = &[1, 2, 840, 113549, 1, 5, 12];
const OID_PBMAC1: &[u64] = &[1, 2, 840, 113549, 1, 5, 14];

const OID_HMAC_SHA1: &[u64] = &[1, 2, 840, 113549, 2, 7];
const OID_HMAC_SHA224: &[u64] = &[1, 2, 840, 113549, 2, 8];
const OID_HMAC_SHA256: &[u64] = &[1, 2, 840, 113549, 2, 9];
const OID_HMAC_SHA384: &[u64] = &[1, 2, 840, 113549, 2, 10];
const OID_HMAC_SHA512: &[u64] = &[1, 2, 840, 113549, 2, 11];

const PFX_VERSION: u32 = 3;
const ID_MAC: u8 = 3;

fn digest_for_oid(oid: &ObjectIdentifier) -> Option<MessageDigest> {
    let components = oid.components().as_slice();
    Some(match components {
        c if c == OID_SHA1 => MessageDigest::sha1(),
        c if c == OID_SHA224 => MessageDigest::sha224(),
        c if c == OID_SHA256 => MessageDigest::sha256(),
        c if c == OID_SHA384 => MessageDigest::sha384(),
        c if c == OID_SHA512 => MessageDigest::sha512(),
        _ => return None,
    })
}

fn hmac_digest_for_oid(oid: &ObjectIdentifier) -> Option<MessageDigest> {
    let components = oid.components().as_slice();
    Some(match components {
        c if c == OID_HMAC_SHA1 => MessageDigest::sha1(),
        c if c == OID_HMAC_SHA224 => MessageDigest::sha224(),
        c if c == OID_HMAC_SHA256 => MessageDigest::sha256(),
        c if c == OID_HMAC_SHA384 => MessageDigest::sha384(),
        c if c == OID_HMAC_SHA512 => MessageDigest::sha512(),
        _ => return None,
    })
}

enum MacScheme {
    /// HMAC keyed by the RFC 7292 Appendix B derivation of the BMP password.
    Pkcs12 {
        digest: MessageDigest,
        salt: Vec<u8>,
        iterations: u32,
    },
    /// HMAC keyed by PBKDF2 over the UTF-8 password. The MacData salt and
    /// iteration count are unused.
    Pbmac1 {
        hmac: MessageDigest,
        prf: MessageDigest,
        salt: Vec<u8>,
        iterations: u32,
        key_len: usize,
    },
}

pub(crate) struct MacData {
    scheme: MacScheme,
    value: Vec<u8>,
}

pub(crate) struct Pfx {
    auth_safe: Vec<u8>,
    mac: Option<MacData>,
}

type AlgorithmIdentifier = (ObjectIdentifier, Option<Vec<u8>>);

struct RawMacData {
    algorithm: AlgorithmIdentifier,
    value: Vec<u8>,
    salt: Vec<u8>,
    iterations: u32,
}

struct RawPfx {
    version: u32,
    content_type: ObjectIdentifier,
    auth_safe: Option<Vec<u8>>,
    mac: Option<RawMacData>,
}

struct Pbkdf2Params {
    salt: Vec<u8>,
    iterations: u32,
    key_len: Option<u32>,
    prf: Option<ObjectIdentifier>,
}

fn read_algorithm(r: yasna::BERReader) -> yasna::ASN1Result<AlgorithmIdentifier> {
    r.read_sequence(|r| {
        let oid = r.next().read_oid()?;
        let params = r.read_optional(|r| r.read_der())?;
        Ok((oid, params))
    })
}

fn read_mac_data(r: yasna::BERReader) -> yasna::ASN1Result<RawMacData> {
    r.read_sequence(|r| {
        let (algorithm, value) = r.next().read_sequence(|r| {
            let algorithm = read_algorithm(r.next())?;
            let value = r.next().read_bytes()?;
            Ok((algorithm, value))
        })?;
        let salt = r.next().read_bytes()?;
        let iterations = r.read_optional(|r| r.read_u32())?.unwrap_or(1);
        Ok(RawMacData {
            algorithm,
            value,
            salt,
            iterations,
        })
    })
}

fn read_pbkdf2_params(r: yasna::BERReader) -> yasna::ASN1Result<Pbkdf2Params> {
    r.read_sequence(|r| {
        let salt = r.next().read_bytes()?;
        let iterations = r.next().read_u32()?;
        let key_len = r.read_optional(|r| r.read_u32())?;
        let prf = r.read_optional(read_algorithm)?.map(|(oid, _)| oid);
        Ok(Pbkdf2Params {
            salt,
            iterations,
            key_len,
            prf,
        })
    })
}

fn unsupported(what: &str, oid: &ObjectIdentifier) -> Error {
    Error::OpenFailed(format!("unsupported MAC algorithm: {} {}", what, oid))
}

fn invalid_pbmac1(e: yasna::ASN1Error) -> Error {
    Error::OpenFailed(format!("invalid PBMAC1 parameters: {}", e))
}

fn pbmac1_scheme(params: Option<&[u8]>) -> Result<MacScheme> {
    let params =
        params.ok_or_else(|| Error::OpenFailed("PBMAC1 without parameters".to_string()))?;
    let (kdf, auth) = yasna::parse_ber(params, |r| {
        r.read_sequence(|r| {
            let kdf = read_algorithm(r.next())?;
            let auth = read_algorithm(r.next())?;
            Ok((kdf, auth))
        })
    })
    .map_err(invalid_pbmac1)?;

    let hmac =
        hmac_digest_for_oid(&auth.0).ok_or_else(|| unsupported("PBMAC1 scheme", &auth.0))?;
    if kdf.0.components().as_slice() != OID_PBKDF2 {
        return Err(unsupported("PBMAC1 key derivation", &kdf.0));
    }
    let kdf_params = kdf
        .1
        .ok_or_else(|| Error::OpenFailed("PBKDF2 without parameters".to_string()))?;
    let kdf_params =
        yasna::parse_ber(&kdf_params, read_pbkdf2_params).map_err(invalid_pbmac1)?;

    let prf = match &kdf_params.prf {
        None => MessageDigest::sha1(),
        Some(oid) => {
            hmac_digest_for_oid(oid).ok_or_else(|| unsupported("PBKDF2 PRF", oid))?
        }
    };
    let key_len = kdf_params
        .key_len
        .filter(|len| *len > 0)
        .ok_or_else(|| Error::OpenFailed("PBMAC1 key length missing".to_string()))?;
    Ok(MacScheme::Pbmac1 {
        hmac,
        prf,
        salt: kdf_params.salt,
        iterations: kdf_params.iterations.max(1),
        key_len: key_len as usize,
    })
}

impl MacData {
    fn from_raw(raw: RawMacData) -> Result<Self> {
        let (oid, params) = raw.algorithm;
        let scheme = if oid.components().as_slice() == OID_PBMAC1 {
            pbmac1_scheme(params.as_deref())?
        } else {
            MacScheme::Pkcs12 {
                digest: digest_for_oid(&oid).ok_or_else(|| unsupported("digest", &oid))?,
                salt: raw.salt,
                iterations: raw.iterations.max(1),
            }
        };
        Ok(MacData {
            scheme,
            value: raw.value,
        })
    }

    fn password_candidates(&self, password: &str) -> Vec<Zeroizing<Vec<u8>>> {
        match self.scheme {
            MacScheme::Pkcs12 { .. } => password_candidates(password),
            MacScheme::Pbmac1 { .. } => vec![Zeroizing::new(password.as_bytes().to_vec())],
        }
    }

    fn compute(&self, password: &[u8], data: &[u8]) -> std::result::Result<Vec<u8>, ErrorStack> {
        let (digest, key) = match &self.scheme {
            MacScheme::Pkcs12 {
                digest,
                salt,
                iterations,
            } => (
                *digest,
                pkcs12_kdf(*digest, ID_MAC, password, salt, *iterations, digest.size())?,
            ),
            MacScheme::Pbmac1 {
                hmac,
                prf,
                salt,
                iterations,
                key_len,
            } => {
                let mut key = Zeroizing::new(vec![0u8; *key_len]);
                pkcs5::pbkdf2_hmac(
                    password,
                    salt,
                    *iterations as usize,
                    *prf,
                    key.as_mut_slice(),
                )?;
                (*hmac, key)
            }
        };
        let key = PKey::hmac(&key)?;
        let mut signer = Signer::new(digest, &key)?;
        signer.update(data)?;
        signer.sign_to_vec()
    }
}

impl Pfx {
    pub(crate) fn parse(raw: &[u8]) -> Result<Self> {
        let data_oid = ObjectIdentifier::from_slice(OID_DATA);
        let pfx = yasna::parse_ber(raw, |r| {
            r.read_sequence(|r| {
                let version = r.next().read_u32()?;
                let (content_type, auth_safe) = r.next().read_sequence(|r| {
                    let content_type = r.next().read_oid()?;
                    let auth_safe = if content_type == data_oid {
                        Some(r.next().read_tagged(Tag::context(0), |r| r.read_bytes())?)
                    } else {
                        r.read_optional(|r| r.read_der())?;
                        None
                    };
                    Ok((content_type, auth_safe))
                })?;
                let mac = r.read_optional(read_mac_data)?;
                Ok(RawPfx {
                    version,
                    content_type,
                    auth_safe,
                    mac,
                })
            })
        })
        .map_err(|e| Error::OpenFailed(format!("invalid PFX structure: {}", e)))?;

        if pfx.version != PFX_VERSION {
            return Err(Error::OpenFailed(format!(
                "unsupported PFX version {}",
                pfx.version
            )));
        }
        let RawPfx {
            content_type,
            auth_safe,
            mac,
            ..
        } = pfx;
        let auth_safe = auth_safe.ok_or_else(|| {
            Error::OpenFailed(format!(
                "authSafe content type {} is not data (public-key integrity mode is not supported)",
                content_type
            ))
        })?;
        let mac = mac.map(MacData::from_raw).transpose()?;
        Ok(Pfx { auth_safe, mac })
    }

    pub(crate) fn has_mac(&self) -> bool {
        self.mac.is_some()
    }

    /// Checks the MAC under `password`. A PFX without a MAC never verifies.
    pub(crate) fn verify(&self, password: &str) -> Result<()> {
        let mac = self.mac.as_ref().ok_or(Error::MacInvalid)?;
        for candidate in mac.password_candidates(password) {
            let computed = mac.compute(&candidate, &self.auth_safe)?;
            if computed.len() == mac.value.len() && memcmp::eq(&computed, &mac.value) {
                return Ok(());
            }
        }
        Err(Error::MacInvalid)
    }
}

/// BMPString encoding with the two-byte terminator.
fn bmp_password(password: &str) -> Zeroizing<Vec<u8>> {
    let mut bmp = Zeroizing::new(Vec::with_capacity(password.len() * 2 + 2));
    for unit in password.encode_utf16() {
        bmp.extend_from_slice(&unit.to_be_bytes());
    }
    bmp.extend_from_slice(&[0, 0]);
    bmp
}

// OpenSSL also accepts an empty password given as no password at all.
fn password_candidates(password: &str) -> Vec<Zeroizing<Vec<u8>>> {
    let mut candidates = vec![bmp_password(password)];
    if password.is_empty() {
        candidates.push(Zeroizing::new(Vec::new()));
    }
    candidates
}

fn repeat_to_block(data: &[u8], v: usize) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let len = (data.len() + v - 1) / v * v;
    data.iter().copied().cycle().take(len).collect()
}

/// Key derivation of RFC 7292 Appendix B.2.
fn pkcs12_kdf(
    digest: MessageDigest,
    id: u8,
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    len: usize,
) -> std::result::Result<Zeroizing<Vec<u8>>, ErrorStack> {
    let u = digest.size();
    let v = digest.block_size();

    let d = vec![id; v];
    let mut i = Zeroizing::new(repeat_to_block(salt, v));
    i.extend_from_slice(&repeat_to_block(password, v));

    let mut out = Zeroizing::new(Vec::with_capacity(len + u));
    loop {
        let mut hasher = Hasher::new(digest)?;
        hasher.update(&d)?;
        hasher.update(&i)?;
        let mut a = hasher.finish()?;
        for _ in 1..iterations {
            let mut hasher = Hasher::new(digest)?;
            hasher.update(&a)?;
            a = hasher.finish()?;
        }
        out.extend_from_slice(&a);
        if out.len() >= len {
            break;
        }

        // I_j = (I_j + B + 1) mod 2^(8v)
        let b = repeat_to_block(&a, v);
        for block in i.chunks_mut(v) {
            let mut carry = 1u16;
            for (byte, add) in block.iter_mut().zip(b.iter()).rev() {
                let sum = *byte as u16 + *add as u16 + carry;
                *byte = sum as u8;
                carry = sum >> 8;
            }
        }
    }
    out.truncate(len);
    Ok(out)
}
