mod common;

use std::fs;

use anyhow::Result;
use common::{certificate, ec_key, rsa_key, settings, TestContext, Usage};
use keyport_keyset::{ErrorLocus, Keyset, KeysetError, RsaComponents};
use keyport_transcode::{
    assembler::{self, AssemblyOptions},
    convert, ConversionReport, ConversionSettings, Converter, Error, KeyUsage, LeafCertificate,
    ParseFailure, PrivateKeyMaterial, State, Warning,
};
use secrecy::SecretString;
use pretty_assertions::assert_eq;

fn assembly_options(overwrite: bool) -> AssemblyOptions {
    AssemblyOptions {
        overwrite,
        kdf_iterations: settings().kdf_iterations,
    }
}

#[test]
fn test_alice_round_trip() -> Result<()> {
    let ctx = TestContext::new()?;
    let key = rsa_key()?;
    let cert = certificate(&key, "alice", Usage::SignAndEncrypt, None)?;
    ctx.write_p12("alice.p12", Some(&key), Some(&cert), &[], "oldpw")?;

    let request = ctx.request("alice.p12", "oldpw", "alice.store", "alice-key", "newpw");
    let report = convert(&request, &settings())?;
    assert_eq!(
        report,
        ConversionReport {
            label: "alice-key".to_string(),
            subject: "CN=alice, O=Example".to_string(),
            chain_len: 0,
            warnings: Vec::new(),
        }
    );
    assert_eq!(ctx.entries()?, vec!["alice.p12", "alice.store"]);

    let keyset = Keyset::open(ctx.path("alice.store"))?;
    assert_eq!(keyset.labels().collect::<Vec<_>>(), vec!["alice-key"]);

    let restored = keyset.get_private_key("alice-key", "newpw")?;
    let rsa = key.rsa()?;
    assert_eq!(restored.components()?, RsaComponents::from_rsa(&rsa)?);
    let restored_cert = keyset
        .get_certificate("alice-key")?
        .expect("Certificate was not stored");
    assert_eq!(restored_cert.der(), cert.to_der()?.as_slice());
    assert_eq!(restored_cert.common_name().as_deref(), Some("alice"));

    assert!(matches!(
        keyset.get_private_key("alice-key", "oldpw"),
        Err(KeysetError::WrongPassword)
    ));
    Ok(())
}

#[test]
fn test_wrong_password() -> Result<()> {
    let ctx = TestContext::new()?;
    let key = rsa_key()?;
    let cert = certificate(&key, "alice", Usage::SignAndEncrypt, None)?;
    ctx.write_p12("alice.p12", Some(&key), Some(&cert), &[], "oldpw")?;

    let request = ctx.request("alice.p12", "not-oldpw", "alice.store", "alice-key", "newpw");
    let settings = settings();
    let mut converter = Converter::new(&request, &settings);
    assert!(matches!(converter.run(), Err(Error::MacInvalid)));
    assert_eq!(converter.state(), State::Aborted);
    assert_eq!(ctx.entries()?, vec!["alice.p12"]);
    Ok(())
}

#[test]
fn test_key_usage_absent() -> Result<()> {
    let ctx = TestContext::new()?;
    let key = rsa_key()?;
    let cert = certificate(&key, "alice", Usage::Absent, None)?;
    ctx.write_p12("alice.p12", Some(&key), Some(&cert), &[], "oldpw")?;

    let request = ctx.request("alice.p12", "oldpw", "alice.store", "alice-key", "newpw");
    let report = convert(&request, &settings())?;
    assert_eq!(report.warnings, vec![Warning::KeyUsageAbsent]);
    assert!(ctx.path("alice.store").exists());
    Ok(())
}

#[test]
fn test_key_usage_incompatible() -> Result<()> {
    let ctx = TestContext::new()?;
    let key = rsa_key()?;
    let cert = certificate(&key, "alice", Usage::CertificateSigning, None)?;
    ctx.write_p12("alice.p12", Some(&key), Some(&cert), &[], "oldpw")?;
    let request = ctx.request("alice.p12", "oldpw", "alice.store", "alice-key", "newpw");

    let strict = ConversionSettings {
        strict_key_usage: true,
        ..settings()
    };
    match convert(&request, &strict) {
        Err(Error::UnsuitableKeyUsage(usage)) => {
            assert_eq!(usage, KeyUsage::KEY_CERT_SIGN | KeyUsage::CRL_SIGN)
        }
        other => panic!("Unexpected result: {:?}", other),
    }
    assert!(!ctx.path("alice.store").exists());

    let report = convert(&request, &settings())?;
    assert_eq!(
        report.warnings,
        vec![Warning::KeyUsageIncompatible(
            KeyUsage::KEY_CERT_SIGN | KeyUsage::CRL_SIGN
        )]
    );
    assert!(ctx.path("alice.store").exists());
    Ok(())
}

#[test]
fn test_no_partial_output_when_certificate_rejected() -> Result<()> {
    let ctx = TestContext::new()?;
    let key = rsa_key()?;
    // The certificate belongs to a different key, so binding fails after the
    // private key was already added.
    let cert = certificate(&rsa_key()?, "mallory", Usage::SignAndEncrypt, None)?;
    let material = PrivateKeyMaterial::extract(&key)?;
    let leaf = LeafCertificate::canonicalize(&cert)?;

    let err = assembler::build(
        &ctx.path("alice.store"),
        "alice-key",
        &SecretString::from("newpw".to_string()),
        &material,
        &leaf,
        &assembly_options(false),
    )
    .unwrap_err();
    assert!(
        matches!(err, Error::CertRejected(KeysetError::CertificateKeyMismatch)),
        "Unexpected error: {:?}",
        err
    );
    assert_eq!(
        err.keyset_error().and_then(KeysetError::locus),
        Some(ErrorLocus::Certificate)
    );
    assert!(ctx.entries()?.is_empty());
    Ok(())
}

#[test]
fn test_existing_destination() -> Result<()> {
    let ctx = TestContext::new()?;
    let key = rsa_key()?;
    let cert = certificate(&key, "alice", Usage::SignAndEncrypt, None)?;
    ctx.write_p12("alice.p12", Some(&key), Some(&cert), &[], "oldpw")?;
    fs::write(ctx.path("alice.store"), b"previous keyset")?;

    let request = ctx.request("alice.p12", "oldpw", "alice.store", "alice-key", "newpw");
    assert!(matches!(
        convert(&request, &settings()),
        Err(Error::CreateFailed(KeysetError::AlreadyExists(_)))
    ));
    assert_eq!(fs::read(ctx.path("alice.store"))?, b"previous keyset");

    let overwrite = ConversionSettings {
        overwrite: true,
        ..settings()
    };
    convert(&request, &overwrite)?;
    let keyset = Keyset::open(ctx.path("alice.store"))?;
    assert_eq!(keyset.len(), 1);
    Ok(())
}

#[test]
fn test_failed_overwrite_keeps_existing() -> Result<()> {
    let ctx = TestContext::new()?;
    let key = rsa_key()?;
    let cert = certificate(&rsa_key()?, "mallory", Usage::SignAndEncrypt, None)?;
    let material = PrivateKeyMaterial::extract(&key)?;
    let leaf = LeafCertificate::canonicalize(&cert)?;
    fs::write(ctx.path("alice.store"), b"previous keyset")?;

    assert!(matches!(
        assembler::build(
            &ctx.path("alice.store"),
            "alice-key",
            &SecretString::from("newpw".to_string()),
            &material,
            &leaf,
            &assembly_options(true),
        ),
        Err(Error::CertRejected(_))
    ));
    assert_eq!(fs::read(ctx.path("alice.store"))?, b"previous keyset");
    assert_eq!(ctx.entries()?, vec!["alice.store"]);
    Ok(())
}

#[test]
fn test_not_rsa() -> Result<()> {
    let ctx = TestContext::new()?;
    let key = ec_key()?;
    let cert = certificate(&key, "alice", Usage::Absent, None)?;
    ctx.write_p12("alice.p12", Some(&key), Some(&cert), &[], "oldpw")?;

    let request = ctx.request("alice.p12", "oldpw", "alice.store", "alice-key", "newpw");
    match convert(&request, &settings()) {
        Err(Error::NotRsa(algorithm)) => assert_eq!(algorithm, "EC"),
        other => panic!("Unexpected result: {:?}", other),
    }
    assert!(!ctx.path("alice.store").exists());
    Ok(())
}

#[test]
fn test_missing_parts() -> Result<()> {
    let ctx = TestContext::new()?;
    let key = rsa_key()?;
    let cert = certificate(&key, "alice", Usage::Absent, None)?;
    ctx.write_p12("key-only.p12", Some(&key), None, &[], "oldpw")?;
    ctx.write_p12("cert-only.p12", None, Some(&cert), &[], "oldpw")?;

    let request = ctx.request("key-only.p12", "oldpw", "alice.store", "alice-key", "newpw");
    assert!(matches!(
        convert(&request, &settings()),
        Err(Error::ParseFailed(ParseFailure::NoCertificate))
    ));
    let request = ctx.request("cert-only.p12", "oldpw", "alice.store", "alice-key", "newpw");
    assert!(matches!(
        convert(&request, &settings()),
        Err(Error::ParseFailed(ParseFailure::NoPrivateKey))
    ));
    assert!(!ctx.path("alice.store").exists());
    Ok(())
}

#[test]
fn test_chain() -> Result<()> {
    let ctx = TestContext::new()?;
    let ca_key = rsa_key()?;
    let ca_cert = certificate(&ca_key, "Example CA", Usage::CertificateSigning, None)?;
    let key = rsa_key()?;
    let cert = certificate(
        &key,
        "alice",
        Usage::SignAndEncrypt,
        Some((&ca_key, &ca_cert)),
    )?;
    ctx.write_p12("alice.p12", Some(&key), Some(&cert), &[ca_cert], "oldpw")?;

    let request = ctx.request("alice.p12", "oldpw", "alice.store", "alice-key", "newpw");
    let report = convert(&request, &settings())?;
    assert_eq!(report.chain_len, 1);
    assert_eq!(report.subject, "CN=alice, O=Example");
    assert!(report.warnings.is_empty());

    let keyset = Keyset::open(ctx.path("alice.store"))?;
    let stored = keyset
        .get_certificate("alice-key")?
        .expect("Certificate was not stored");
    assert_eq!(stored.der(), cert.to_der()?.as_slice());
    Ok(())
}

#[test]
fn test_invalid_label() -> Result<()> {
    let ctx = TestContext::new()?;
    let key = rsa_key()?;
    let cert = certificate(&key, "alice", Usage::SignAndEncrypt, None)?;
    ctx.write_p12("alice.p12", Some(&key), Some(&cert), &[], "oldpw")?;

    let long_label = "k".repeat(65);
    let request = ctx.request("alice.p12", "oldpw", "alice.store", &long_label, "newpw");
    let err = convert(&request, &settings()).unwrap_err();
    assert!(matches!(err, Error::KeyRejected(KeysetError::InvalidLabel(_))));
    assert_eq!(
        err.keyset_error().and_then(KeysetError::locus),
        Some(ErrorLocus::Label)
    );
    assert_eq!(ctx.entries()?, vec!["alice.p12"]);
    Ok(())
}

#[test]
fn test_unreadable_source() -> Result<()> {
    let ctx = TestContext::new()?;
    let request = ctx.request("missing.p12", "oldpw", "alice.store", "alice-key", "newpw");
    assert!(matches!(
        convert(&request, &settings()),
        Err(Error::SourceUnreadable { .. })
    ));

    fs::write(ctx.path("garbage.p12"), b"this is not a PKCS#12 file")?;
    let request = ctx.request("garbage.p12", "oldpw", "alice.store", "alice-key", "newpw");
    assert!(matches!(
        convert(&request, &settings()),
        Err(Error::OpenFailed(_))
    ));
    Ok(())
}
