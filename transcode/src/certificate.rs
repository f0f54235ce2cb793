use bitflags::bitflags;
use keyport_keyset::certificate::display_name;
use openssl::x509::X509Ref;
use yasna::{models::ObjectIdentifier, Tag};

use crate::errors::{Error, Result};

const OID_KEY_USAGE: &[u64] = &[2, 5, 29, 15];

bitflags! {
    /// X.509 key usage bits, in the order of RFC 5280 section 4.2.1.3.
    pub struct KeyUsage: u16 {
        const DIGITAL_SIGNATURE = 1 << 0;
        const NON_REPUDIATION = 1 << 1;
        const KEY_ENCIPHERMENT = 1 << 2;
        const DATA_ENCIPHERMENT = 1 << 3;
        const KEY_AGREEMENT = 1 << 4;
        const KEY_CERT_SIGN = 1 << 5;
        const CRL_SIGN = 1 << 6;
        const ENCIPHER_ONLY = 1 << 7;
        const DECIPHER_ONLY = 1 << 8;
    }
}

impl KeyUsage {
    fn from_bit_string(bytes: &[u8], len: usize) -> Self {
        let mut usage = KeyUsage::empty();
        for bit in 0..len.min(9) {
            if bytes[bit / 8] & (0x80 >> (bit % 8)) != 0 {
                usage |= KeyUsage::from_bits_truncate(1 << bit);
            }
        }
        usage
    }

    pub fn permits_signing(&self) -> bool {
        self.intersects(KeyUsage::DIGITAL_SIGNATURE | KeyUsage::NON_REPUDIATION)
    }

    pub fn permits_decryption(&self) -> bool {
        self.intersects(KeyUsage::KEY_ENCIPHERMENT | KeyUsage::DATA_ENCIPHERMENT)
    }
}

/// Returns the TBSCertificate element tagged `[3]`, if any.
fn extensions_field(der: &[u8]) -> yasna::ASN1Result<Option<Vec<u8>>> {
    let tbs = yasna::parse_ber(der, |r| {
        r.read_sequence(|r| {
            let tbs = r.next().read_der()?;
            r.next().read_der()?;
            r.next().read_der()?;
            Ok(tbs)
        })
    })?;
    let fields = yasna::parse_ber(&tbs, |r| {
        r.read_sequence(|r| {
            let mut fields = Vec::new();
            while let Some(field) = r.read_optional(|r| r.read_der())? {
                fields.push(field);
            }
            Ok(fields)
        })
    })?;
    Ok(fields.into_iter().find(|field| field.first() == Some(&0xa3)))
}

fn read_key_usage(der: &[u8]) -> Result<Option<KeyUsage>> {
    let malformed = |e: yasna::ASN1Error| {
        Error::EncodingFailed(format!("unable to read certificate extensions: {}", e))
    };
    let extensions = match extensions_field(der).map_err(malformed)? {
        None => return Ok(None),
        Some(extensions) => extensions,
    };

    let key_usage_oid = ObjectIdentifier::from_slice(OID_KEY_USAGE);
    let value = yasna::parse_ber(&extensions, |r| {
        r.read_tagged(Tag::context(3), |r| {
            r.collect_sequence_of(|r| {
                r.read_sequence(|r| {
                    let oid = r.next().read_oid()?;
                    r.read_optional(|r| r.read_bool())?;
                    let value = r.next().read_bytes()?;
                    Ok((oid, value))
                })
            })
        })
    })
    .map_err(malformed)?
    .into_iter()
    .find(|(oid, _)| *oid == key_usage_oid)
    .map(|(_, value)| value);

    let value = match value {
        None => return Ok(None),
        Some(value) => value,
    };
    let (bytes, len) = yasna::parse_ber(&value, |r| r.read_bitvec_bytes())
        .map_err(|e| Error::EncodingFailed(format!("malformed key usage extension: {}", e)))?;
    Ok(Some(KeyUsage::from_bit_string(&bytes, len)))
}

/// The leaf certificate in canonical DER form.
#[derive(Debug, Clone)]
pub struct LeafCertificate {
    der: Vec<u8>,
    key_usage: Option<KeyUsage>,
    subject: String,
}

impl LeafCertificate {
    pub fn canonicalize(cert: &X509Ref) -> Result<Self> {
        let der = cert
            .to_der()
            .map_err(|e| Error::EncodingFailed(e.to_string()))?;
        if der.is_empty() {
            return Err(Error::EncodingFailed(
                "certificate encoded to zero bytes".to_string(),
            ));
        }
        let key_usage = read_key_usage(&der)?;
        let subject = display_name(cert.subject_name());
        log::trace!(
            "Canonicalized certificate '{}' ({} bytes, key usage {:?})",
            subject,
            der.len(),
            key_usage
        );

        Ok(LeafCertificate {
            der,
            key_usage,
            subject,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// `None` when the certificate carries no key usage extension.
    pub fn key_usage(&self) -> Option<KeyUsage> {
        self.key_usage
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}
