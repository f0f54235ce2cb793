//! Conversion of password-protected PKCS#12 files into keysets.
//!
//! The pipeline authenticates and unpacks the source container
//! ([`SourceContainer`]), extracts the RSA key parameters
//! ([`PrivateKeyMaterial`]) and the leaf certificate ([`LeafCertificate`]),
//! and writes both into a new keyset ([`assembler::build`]). [`Converter`]
//! sequences these steps and guarantees that a failed conversion leaves no
//! output behind.

pub mod assembler;
pub mod certificate;
pub mod container;
pub mod convert;
mod errors;
mod mac;
pub mod material;

#[cfg(test)]
mod test_utils;

pub use certificate::{KeyUsage, LeafCertificate};
pub use container::SourceContainer;
pub use convert::{
    convert, ConversionReport, ConversionRequest, ConversionSettings, Converter, State,
};
pub use errors::{Error, ParseFailure, Result, Warning};
pub use material::PrivateKeyMaterial;
