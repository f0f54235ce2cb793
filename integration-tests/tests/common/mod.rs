#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context as _, Result};
use keyport_keyset::MIN_KDF_ITERATIONS;
use keyport_transcode::{ConversionRequest, ConversionSettings};
use openssl::{
    asn1::{Asn1Integer, Asn1Time},
    bn::BigNum,
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkcs12::Pkcs12,
    pkey::{PKey, Private},
    rsa::Rsa,
    stack::Stack,
    x509::{extension, X509Builder, X509NameBuilder, X509},
};
use secrecy::SecretString;

#[derive(Debug, Clone, Copy)]
pub enum Usage {
    Absent,
    SignAndEncrypt,
    CertificateSigning,
}

pub struct TestContext {
    testdir: tempfile::TempDir,
}

impl TestContext {
    pub fn new() -> Result<Self> {
        let testdir = tempfile::Builder::new()
            .prefix("keyport-integration-test-")
            .tempdir()
            .context("Error creating temporary directory")?;
        Ok(TestContext { testdir })
    }

    pub fn testpath(&self) -> &Path {
        self.testdir.path()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.testpath().join(name)
    }

    pub fn entries(&self) -> Result<Vec<String>> {
        let mut names = fs::read_dir(self.testpath())?
            .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
            .collect::<Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    pub fn write_p12(
        &self,
        name: &str,
        key: Option<&PKey<Private>>,
        cert: Option<&X509>,
        chain: &[X509],
        password: &str,
    ) -> Result<PathBuf> {
        let mut builder = Pkcs12::builder();
        builder.name("alice");
        if let Some(key) = key {
            builder.pkey(key);
        }
        if let Some(cert) = cert {
            builder.cert(cert);
        }
        if !chain.is_empty() {
            let mut stack = Stack::new().context("Error creating certificate stack")?;
            for cert in chain {
                stack
                    .push(cert.clone())
                    .context("Error adding chain certificate")?;
            }
            builder.ca(stack);
        }
        let p12 = builder
            .build2(password)
            .context("Error building PKCS#12")?
            .to_der()
            .context("Error encoding PKCS#12")?;

        let path = self.path(name);
        fs::write(&path, p12).context("Error writing PKCS#12")?;
        Ok(path)
    }

    pub fn request(
        &self,
        source: &str,
        source_password: &str,
        destination: &str,
        label: &str,
        destination_password: &str,
    ) -> ConversionRequest {
        ConversionRequest {
            source: self.path(source),
            source_password: SecretString::from(source_password.to_string()),
            destination: self.path(destination),
            label: label.to_string(),
            destination_password: SecretString::from(destination_password.to_string()),
        }
    }
}

pub fn settings() -> ConversionSettings {
    ConversionSettings {
        kdf_iterations: MIN_KDF_ITERATIONS,
        ..Default::default()
    }
}

pub fn rsa_key() -> Result<PKey<Private>> {
    let rsa = Rsa::generate(2048).context("Error generating RSA key")?;
    PKey::from_rsa(rsa).context("Error converting private key to PKey")
}

pub fn ec_key() -> Result<PKey<Private>> {
    let group =
        EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).context("Error creating EcGroup")?;
    let key = EcKey::generate(&group).context("Error generating private key")?;
    PKey::from_ec_key(key).context("Error converting private key to PKey")
}

/// Builds a certificate for `key`, signed by `issuer` or self-signed.
pub fn certificate(
    key: &PKey<Private>,
    common_name: &str,
    usage: Usage,
    issuer: Option<(&PKey<Private>, &X509)>,
) -> Result<X509> {
    let mut subject_name = X509NameBuilder::new().context("Error creating X509NameBuilder")?;
    subject_name
        .append_entry_by_text("CN", common_name)
        .context("Error adding CN")?;
    subject_name
        .append_entry_by_text("O", "Example")
        .context("Error adding O")?;
    let subject_name = subject_name.build();

    let serial_number = BigNum::from_u32(42).context("Error creating serial number")?;
    let serial_number = Asn1Integer::from_bn(&serial_number)
        .context("Error converting serial number to ASN1Integer")?;

    let mut cert_builder = X509Builder::new().context("Error creating X509Builder")?;
    cert_builder
        .set_version(2)
        .context("Error setting version")?;
    cert_builder
        .set_not_after(
            Asn1Time::days_from_now(1)
                .context("Error creating Asn1Time")?
                .as_ref(),
        )
        .context("Error setting not after")?;
    cert_builder
        .set_not_before(
            Asn1Time::days_from_now(0)
                .context("Error creating Asn1Time")?
                .as_ref(),
        )
        .context("Error setting not before")?;
    cert_builder
        .set_subject_name(&subject_name)
        .context("Error setting subject name")?;
    cert_builder
        .set_pubkey(key)
        .context("Error setting public key")?;
    cert_builder
        .set_serial_number(&serial_number)
        .context("Error setting serial number")?;

    match usage {
        Usage::Absent => {}
        Usage::SignAndEncrypt => cert_builder
            .append_extension(
                extension::KeyUsage::new()
                    .critical()
                    .digital_signature()
                    .key_encipherment()
                    .build()
                    .context("Error building key usage")?,
            )
            .context("Error adding key usage")?,
        Usage::CertificateSigning => cert_builder
            .append_extension(
                extension::KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .context("Error building key usage")?,
            )
            .context("Error adding key usage")?,
    }

    let signing_key = match issuer {
        Some((issuer_key, issuer_cert)) => {
            cert_builder
                .set_issuer_name(issuer_cert.subject_name())
                .context("Error setting issuer name")?;
            issuer_key
        }
        None => {
            cert_builder
                .set_issuer_name(&subject_name)
                .context("Error setting issuer name")?;
            key
        }
    };
    cert_builder
        .sign(signing_key, MessageDigest::sha256())
        .context("Error signing certificate")?;
    Ok(cert_builder.build())
}
