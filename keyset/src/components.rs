use std::cmp::Ordering;
use std::fmt;

use openssl::{
    bn::{BigNum, BigNumContext, BigNumRef},
    pkey::Private,
    rsa::{Rsa, RsaPrivateKeyBuilder, RsaRef},
};
use zeroize::Zeroizing;

use crate::errors::{KeysetError, Result};

/// A single big-integer key component, stored as a minimal unsigned
/// big-endian buffer together with its bit length.
#[derive(Clone)]
pub struct Component {
    bytes: Zeroizing<Vec<u8>>,
    bits: u32,
}

impl Component {
    pub fn new(bytes: Vec<u8>, bits: u32) -> Self {
        Component {
            bytes: Zeroizing::new(bytes),
            bits,
        }
    }

    pub fn from_bn(bn: &BigNumRef) -> Self {
        Component {
            bytes: Zeroizing::new(bn.to_vec()),
            bits: bn.num_bits() as u32,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn to_bn(&self, name: &'static str) -> Result<BigNum> {
        if self.bytes.is_empty() {
            return Err(KeysetError::MissingComponent(name));
        }
        // No leading zero bytes, and the declared length must be exact
        if self.bytes[0] == 0 || bit_length(&self.bytes) != self.bits {
            return Err(KeysetError::InconsistentComponent(name));
        }
        Ok(BigNum::from_slice(&self.bytes)?)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({} bits)", self.bits)
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits && *self.bytes == *other.bytes
    }
}

impl Eq for Component {}

fn bit_length(bytes: &[u8]) -> u32 {
    match bytes.first() {
        None => 0,
        Some(first) => (bytes.len() as u32 - 1) * 8 + (8 - first.leading_zeros()),
    }
}

/// The full RSA private key: modulus, both exponents, the primes and the
/// three CRT values.
#[derive(Clone, PartialEq, Eq)]
pub struct RsaComponents {
    pub n: Component,
    pub e: Component,
    pub d: Component,
    pub p: Component,
    pub q: Component,
    /// q^-1 mod p
    pub u: Component,
    /// d mod (p-1)
    pub e1: Component,
    /// d mod (q-1)
    pub e2: Component,
}

impl fmt::Debug for RsaComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaComponents")
            .field("n", &self.n)
            .finish_non_exhaustive()
    }
}

fn required(name: &'static str, bn: Option<&BigNumRef>) -> Result<Component> {
    let component = Component::from_bn(bn.ok_or(KeysetError::MissingComponent(name))?);
    if component.is_empty() {
        return Err(KeysetError::MissingComponent(name));
    }
    Ok(component)
}

impl RsaComponents {
    pub fn from_rsa(rsa: &RsaRef<Private>) -> Result<Self> {
        Ok(RsaComponents {
            n: required("n", Some(rsa.n()))?,
            e: required("e", Some(rsa.e()))?,
            d: required("d", Some(rsa.d()))?,
            p: required("p", rsa.p())?,
            q: required("q", rsa.q())?,
            u: required("u", rsa.iqmp())?,
            e1: required("e1", rsa.dmp1())?,
            e2: required("e2", rsa.dmq1())?,
        })
    }

    /// Checks every relation between the components and builds the key.
    pub(crate) fn to_rsa(&self) -> Result<Rsa<Private>> {
        let n = self.n.to_bn("n")?;
        let e = self.e.to_bn("e")?;
        let d = self.d.to_bn("d")?;
        let p = self.p.to_bn("p")?;
        let q = self.q.to_bn("q")?;
        let u = self.u.to_bn("u")?;
        let e1 = self.e1.to_bn("e1")?;
        let e2 = self.e2.to_bn("e2")?;

        let mut ctx = BigNumContext::new()?;
        let one = BigNum::from_u32(1)?;

        let mut product = BigNum::new()?;
        product.checked_mul(&p, &q, &mut ctx)?;
        if product.ucmp(&n) != Ordering::Equal {
            return Err(KeysetError::InconsistentComponent("n"));
        }

        let mut uq = BigNum::new()?;
        uq.mod_mul(&u, &q, &p, &mut ctx)?;
        if uq.ucmp(&one) != Ordering::Equal {
            return Err(KeysetError::InconsistentComponent("u"));
        }

        for (name, prime, exponent) in [("e1", &p, &e1), ("e2", &q, &e2)] {
            let mut order = BigNum::new()?;
            order.checked_sub(prime, &one)?;
            let mut expected = BigNum::new()?;
            expected.nnmod(&d, &order, &mut ctx)?;
            if expected.ucmp(exponent) != Ordering::Equal {
                return Err(KeysetError::InconsistentComponent(name));
            }
        }

        let rsa = RsaPrivateKeyBuilder::new(n, e, d)?
            .set_factors(p, q)?
            .set_crt_params(e1, e2, u)?
            .build();
        if !rsa.check_key()? {
            return Err(KeysetError::InconsistentKey);
        }
        Ok(rsa)
    }
}
