use std::path::Path;

use keyport_keyset::{Certificate, CreateOptions, KeyContext, Keyset};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    certificate::LeafCertificate,
    errors::{Error, Result},
    material::PrivateKeyMaterial,
};

#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    pub overwrite: bool,
    pub kdf_iterations: u32,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        let defaults = CreateOptions::default();
        AssemblyOptions {
            overwrite: defaults.overwrite,
            kdf_iterations: defaults.kdf_iterations,
        }
    }
}

/// Writes the key and its certificate to a new keyset at `destination`.
///
/// Nothing appears at `destination` unless every step succeeded.
pub fn build(
    destination: &Path,
    label: &str,
    password: &SecretString,
    material: &PrivateKeyMaterial,
    leaf: &LeafCertificate,
    options: &AssemblyOptions,
) -> Result<()> {
    let mut keyset = Keyset::create(
        destination,
        &CreateOptions {
            overwrite: options.overwrite,
            kdf_iterations: options.kdf_iterations,
        },
    )
    .map_err(Error::CreateFailed)?;

    let context = KeyContext::builder()
        .set_label(label)
        .and_then(|builder| builder.set_components(material.components()))
        .and_then(|builder| builder.build())
        .map_err(Error::KeyRejected)?;
    keyset
        .add_private_key(&context, password.expose_secret())
        .map_err(Error::KeyRejected)?;
    log::debug!("Added private key '{}'", label);

    let certificate = Certificate::import(leaf.der()).map_err(Error::CertRejected)?;
    keyset
        .add_public_key(&certificate)
        .map_err(Error::CertRejected)?;
    log::debug!("Added certificate '{}'", leaf.subject());

    keyset.close().map_err(Error::PersistFailed)
}
