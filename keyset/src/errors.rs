use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KeysetError>;

/// The attribute or object an error was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLocus {
    Label,
    Component(&'static str),
    Key,
    Certificate,
    Password,
    Options,
    File,
}

impl fmt::Display for ErrorLocus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorLocus::Label => f.write_str("label"),
            ErrorLocus::Component(name) => write!(f, "key component '{}'", name),
            ErrorLocus::Key => f.write_str("private key"),
            ErrorLocus::Certificate => f.write_str("certificate"),
            ErrorLocus::Password => f.write_str("password"),
            ErrorLocus::Options => f.write_str("keyset options"),
            ErrorLocus::File => f.write_str("keyset file"),
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum KeysetError {
    #[error("Cryptographic error stack: {0}")]
    CryptoStack(#[from] openssl::error::ErrorStack),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_cbor::Error),
    #[error("Keyset {} already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error("Error creating keyset {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Error opening keyset {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Error writing keyset {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid keyset file: {0}")]
    InvalidFormat(String),
    #[error("KDF iteration count {0} is below the minimum of {1}")]
    IterationsTooLow(u32, u32),
    #[error("Invalid label: {0}")]
    InvalidLabel(&'static str),
    #[error("An entry labelled '{0}' already exists")]
    DuplicateLabel(String),
    #[error("No label was set on the key context")]
    LabelNotSet,
    #[error("No key components were set on the key context")]
    ComponentsNotSet,
    #[error("Key component '{0}' is missing")]
    MissingComponent(&'static str),
    #[error("Key component '{0}' is inconsistent with the rest of the key")]
    InconsistentComponent(&'static str),
    #[error("Key failed the RSA consistency check")]
    InconsistentKey,
    #[error("Invalid certificate encoding: {0}")]
    InvalidCertificate(openssl::error::ErrorStack),
    #[error("Certificate does not match any private key in the keyset")]
    CertificateKeyMismatch,
    #[error("Entry '{0}' already has a certificate")]
    CertificateAlreadyPresent(String),
    #[error("No entry labelled '{0}'")]
    NotFound(String),
    #[error("Wrong password or corrupted key entry")]
    WrongPassword,
    #[error("Keyset is not writable")]
    ReadOnly,
}

impl KeysetError {
    pub fn locus(&self) -> Option<ErrorLocus> {
        Some(match self {
            KeysetError::InvalidLabel(_)
            | KeysetError::DuplicateLabel(_)
            | KeysetError::LabelNotSet
            | KeysetError::NotFound(_) => ErrorLocus::Label,
            KeysetError::MissingComponent(name) | KeysetError::InconsistentComponent(name) => {
                ErrorLocus::Component(name)
            }
            KeysetError::ComponentsNotSet | KeysetError::InconsistentKey => ErrorLocus::Key,
            KeysetError::InvalidCertificate(_)
            | KeysetError::CertificateKeyMismatch
            | KeysetError::CertificateAlreadyPresent(_) => ErrorLocus::Certificate,
            KeysetError::WrongPassword => ErrorLocus::Password,
            KeysetError::IterationsTooLow(..) => ErrorLocus::Options,
            KeysetError::AlreadyExists(_)
            | KeysetError::Create { .. }
            | KeysetError::Open { .. }
            | KeysetError::Persist { .. }
            | KeysetError::InvalidFormat(_)
            | KeysetError::ReadOnly => ErrorLocus::File,
            KeysetError::CryptoStack(_) | KeysetError::Serialization(_) => return None,
        })
    }
}
