use std::cmp::Ordering;

use keyport_keyset::RsaComponents;
use openssl::{
    bn::{BigNum, BigNumContext},
    pkey::{Id, PKeyRef, Private},
};

use crate::errors::{Error, Result};

fn algorithm_name(id: Id) -> String {
    if id == Id::EC {
        "EC".to_string()
    } else if id == Id::DSA {
        "DSA".to_string()
    } else if id == Id::DH {
        "DH".to_string()
    } else {
        format!("key type {}", id.as_raw())
    }
}

/// The RSA private key parameters of the source key, each as a minimal
/// big-endian buffer with its bit length. Buffers are wiped on drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKeyMaterial {
    components: RsaComponents,
}

impl PrivateKeyMaterial {
    pub fn extract(key: &PKeyRef<Private>) -> Result<Self> {
        if key.id() != Id::RSA {
            return Err(Error::NotRsa(algorithm_name(key.id())));
        }
        let rsa = key
            .rsa()
            .map_err(|e| Error::MalformedKey(format!("unable to read RSA key: {}", e)))?;
        let components =
            RsaComponents::from_rsa(&rsa).map_err(|e| Error::MalformedKey(e.to_string()))?;

        let mut ctx = BigNumContext::new()?;
        let p = BigNum::from_slice(components.p.bytes())?;
        let q = BigNum::from_slice(components.q.bytes())?;
        let mut product = BigNum::new()?;
        product.checked_mul(&p, &q, &mut ctx)?;
        if product.ucmp(rsa.n()) != Ordering::Equal {
            return Err(Error::MalformedKey(
                "modulus is not the product of the primes".to_string(),
            ));
        }

        log::trace!("Extracted {}-bit RSA key material", components.n.bits());
        Ok(PrivateKeyMaterial { components })
    }

    pub fn components(&self) -> &RsaComponents {
        &self.components
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> u32 {
        self.components.n.bits()
    }
}
