use keyport_keyset::certificate::display_name;
use openssl::{
    pkcs12::Pkcs12,
    pkey::{PKey, PKeyRef, Private},
    x509::{X509Ref, X509},
};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    errors::{Error, ParseFailure, Result},
    mac::Pfx,
};

/// An authenticated and unpacked PKCS#12 container.
pub struct SourceContainer {
    key: PKey<Private>,
    leaf: X509,
    chain: Vec<X509>,
}

impl std::fmt::Debug for SourceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceContainer")
            .field("leaf", &display_name(self.leaf.subject_name()))
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

fn pairs_with(cert: &X509Ref, key: &PKeyRef<Private>) -> bool {
    cert.public_key()
        .map(|public| public.public_eq(key))
        .unwrap_or(false)
}

/// Older tools encrypt the bags with RC2 or 3DES, which OpenSSL 3 only offers
/// through the legacy provider. The provider stays loaded while the returned
/// handle lives.
#[cfg(ossl300)]
fn legacy_provider() -> Option<openssl::provider::Provider> {
    match openssl::provider::Provider::try_load(None, "legacy", true) {
        Ok(provider) => Some(provider),
        Err(e) => {
            log::debug!("Legacy PKCS#12 algorithms unavailable: {}", e);
            None
        }
    }
}

impl SourceContainer {
    /// Verifies the container MAC under `password` and unpacks it.
    ///
    /// If the container holds more than one key only the first is used. The
    /// leaf is the certificate paired with that key, by local key ID or by
    /// public key; every other certificate becomes part of the chain.
    pub fn open(raw: &[u8], password: &SecretString, source_name: &str) -> Result<Self> {
        let p12 = Pkcs12::from_der(raw)
            .map_err(|e| Error::OpenFailed(format!("{}: {}", source_name, e)))?;

        let pfx = Pfx::parse(raw)?;
        if !pfx.has_mac() {
            log::debug!("{} carries no MAC", source_name);
        }
        pfx.verify(password.expose_secret())?;
        log::trace!("MAC of {} verified", source_name);

        #[cfg(ossl300)]
        let _legacy = legacy_provider();
        let parsed = p12
            .parse2(password.expose_secret())
            .map_err(|e| Error::ParseFailed(ParseFailure::Contents(e)))?;

        let key = parsed
            .pkey
            .ok_or(Error::ParseFailed(ParseFailure::NoPrivateKey))?;
        let mut chain: Vec<X509> = match parsed.ca {
            Some(ca) => ca.into_iter().collect(),
            None => Vec::new(),
        };
        let leaf = match parsed.cert {
            Some(cert) => cert,
            None => {
                let position = chain
                    .iter()
                    .position(|cert| pairs_with(cert, &key))
                    .ok_or(Error::ParseFailed(ParseFailure::NoCertificate))?;
                log::debug!("Leaf certificate located by public key");
                chain.remove(position)
            }
        };

        log::debug!(
            "Unpacked {}: key, leaf certificate and {} chain certificate(s)",
            source_name,
            chain.len()
        );
        Ok(SourceContainer { key, leaf, chain })
    }

    pub fn private_key(&self) -> &PKeyRef<Private> {
        &self.key
    }

    pub fn leaf(&self) -> &X509Ref {
        &self.leaf
    }

    pub fn chain(&self) -> &[X509] {
        &self.chain
    }
}
