use openssl::{
    hash::{hash, MessageDigest},
    pkey::Private,
    rsa::{Rsa, RsaRef},
};

use crate::{
    components::RsaComponents,
    errors::{KeysetError, Result},
};

/// Longest label accepted for a key entry, in characters.
pub const MAX_LABEL_LENGTH: usize = 64;

pub(crate) fn validate_label(label: &str) -> Result<()> {
    if label.is_empty() {
        return Err(KeysetError::InvalidLabel("label is empty"));
    }
    if label.chars().count() > MAX_LABEL_LENGTH {
        return Err(KeysetError::InvalidLabel("label is too long"));
    }
    if label.chars().any(char::is_control) {
        return Err(KeysetError::InvalidLabel("label contains control characters"));
    }
    Ok(())
}

/// SHA-1 over the DER SubjectPublicKeyInfo, used to pair keys with certificates.
pub(crate) fn key_id_for_spki(spki: &[u8]) -> Result<Vec<u8>> {
    Ok(hash(MessageDigest::sha1(), spki)?.to_vec())
}

/// A labelled RSA private key ready to be stored in a keyset.
pub struct KeyContext {
    label: String,
    rsa: Rsa<Private>,
}

impl std::fmt::Debug for KeyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyContext")
            .field("label", &self.label)
            .field("bits", &self.rsa.n().num_bits())
            .finish()
    }
}

impl KeyContext {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub(crate) fn from_parts(label: String, rsa: Rsa<Private>) -> Self {
        KeyContext { label, rsa }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn rsa(&self) -> &RsaRef<Private> {
        &self.rsa
    }

    pub fn components(&self) -> Result<RsaComponents> {
        RsaComponents::from_rsa(&self.rsa)
    }

    pub fn key_id(&self) -> Result<Vec<u8>> {
        key_id_for_spki(&self.rsa.public_key_to_der()?)
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    label: Option<String>,
    rsa: Option<Rsa<Private>>,
}

impl ContextBuilder {
    pub fn set_label(mut self, label: &str) -> Result<Self> {
        validate_label(label)?;
        self.label = Some(label.to_string());
        Ok(self)
    }

    pub fn set_components(mut self, components: &RsaComponents) -> Result<Self> {
        self.rsa = Some(components.to_rsa()?);
        Ok(self)
    }

    pub fn build(self) -> Result<KeyContext> {
        let label = self.label.ok_or(KeysetError::LabelNotSet)?;
        let rsa = self.rsa.ok_or(KeysetError::ComponentsNotSet)?;
        Ok(KeyContext { label, rsa })
    }
}
