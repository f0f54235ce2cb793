use openssl::{
    nid::Nid,
    x509::{X509NameRef, X509},
};

use crate::{
    context::key_id_for_spki,
    errors::{KeysetError, Result},
};

/// Formats a name as `CN=alice, O=Example`.
pub fn display_name(name: &X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let field = entry
                .object()
                .nid()
                .short_name()
                .map(str::to_string)
                .unwrap_or_else(|_| entry.object().to_string());
            let value = entry
                .data()
                .to_string()
                .unwrap_or_else(|_| hex::encode(entry.data().as_slice()));
            format!("{}={}", field, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// An imported X.509 certificate.
#[derive(Debug, Clone)]
pub struct Certificate {
    x509: X509,
    der: Vec<u8>,
    key_id: Vec<u8>,
}

impl Certificate {
    pub fn import(der: &[u8]) -> Result<Self> {
        let x509 = X509::from_der(der).map_err(KeysetError::InvalidCertificate)?;
        let spki = x509
            .public_key()
            .and_then(|key| key.public_key_to_der())
            .map_err(KeysetError::InvalidCertificate)?;
        Ok(Certificate {
            x509,
            der: der.to_vec(),
            key_id: key_id_for_spki(&spki)?,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn key_id(&self) -> &[u8] {
        &self.key_id
    }

    pub fn subject(&self) -> String {
        display_name(self.x509.subject_name())
    }

    pub fn common_name(&self) -> Option<String> {
        self.x509
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().to_string().ok())
    }
}
