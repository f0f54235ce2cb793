use std::fmt;
use std::path::PathBuf;

use keyport_keyset::KeysetError;
use thiserror::Error;

use crate::{certificate::KeyUsage, convert::State};

pub type Result<T> = std::result::Result<T, Error>;

/// Why a source container whose MAC verified could not be unpacked.
#[derive(Debug)]
pub enum ParseFailure {
    Contents(openssl::error::ErrorStack),
    NoPrivateKey,
    NoCertificate,
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailure::Contents(stack) => {
                write!(f, "contents could not be decrypted: {}", stack)
            }
            ParseFailure::NoPrivateKey => f.write_str("no private key found"),
            ParseFailure::NoCertificate => f.write_str("no certificate found"),
        }
    }
}

fn locus(error: &KeysetError) -> String {
    match error.locus() {
        Some(locus) => format!(" ({})", locus),
        None => String::new(),
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Error reading source file {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Source is not a usable PKCS#12 container: {0}")]
    OpenFailed(String),
    #[error("PKCS#12 MAC verification failed (wrong password?)")]
    MacInvalid,
    #[error("Error parsing PKCS#12 contents: {0}")]
    ParseFailed(ParseFailure),
    #[error("Private key is not an RSA key but {0}")]
    NotRsa(String),
    #[error("Malformed RSA private key: {0}")]
    MalformedKey(String),
    #[error("Error encoding certificate: {0}")]
    EncodingFailed(String),
    #[error("Certificate key usage {0:?} permits neither signing nor decryption")]
    UnsuitableKeyUsage(KeyUsage),
    #[error("Error creating keyset{}: {0}", locus(.0))]
    CreateFailed(#[source] KeysetError),
    #[error("Keyset rejected the private key{}: {0}", locus(.0))]
    KeyRejected(#[source] KeysetError),
    #[error("Keyset rejected the certificate{}: {0}", locus(.0))]
    CertRejected(#[source] KeysetError),
    #[error("Error writing keyset{}: {0}", locus(.0))]
    PersistFailed(#[source] KeysetError),
    #[error("Conversion already ran and ended in state {0:?}")]
    AlreadyRun(State),
    #[error("Cryptographic error stack: {0}")]
    CryptoStack(#[from] openssl::error::ErrorStack),
}

impl Error {
    /// The keyset library error behind a destination-side failure.
    pub fn keyset_error(&self) -> Option<&KeysetError> {
        match self {
            Error::CreateFailed(e)
            | Error::KeyRejected(e)
            | Error::CertRejected(e)
            | Error::PersistFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// Non-fatal findings recorded during a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
    KeyUsageAbsent,
    KeyUsageIncompatible(KeyUsage),
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::KeyUsageAbsent => {
                f.write_str("certificate has no key usage extension, assuming any usage")
            }
            Warning::KeyUsageIncompatible(usage) => write!(
                f,
                "certificate key usage {:?} permits neither signing nor decryption",
                usage
            ),
        }
    }
}
