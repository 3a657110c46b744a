use crate::internal::curve::{CurveBN, CurvePoint, Params};
use crate::internal::errors::PreErrors;
use crate::internal::schemes::{Hash, SHA256Hash};

use std::fmt;
use std::sync::Arc;

use openssl::ec::EcKey;
use openssl::ecdsa::EcdsaSig;
use openssl::pkey::Private;
use zeroize::Zeroizing;

/// Public keys are plain curve points, always derived from a secret scalar.
pub type PublicKey = CurvePoint;

/// A nonzero scalar. Never printed; exported only through `to_secret_bytes`.
#[derive(Clone)]
pub struct SecretKey {
    scalar: CurveBN,
}

impl SecretKey {
    pub fn random(params: &Arc<Params>) -> Result<Self, PreErrors> {
        Ok(SecretKey {
            scalar: CurveBN::random(params)?,
        })
    }

    pub fn from_bytes(bytes: &[u8], params: &Arc<Params>) -> Result<Self, PreErrors> {
        Ok(SecretKey {
            scalar: CurveBN::from_bytes(bytes, params)?,
        })
    }

    pub fn to_secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.scalar.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        CurvePoint::mul_gen(&self.scalar, self.scalar.params())
    }

    pub fn params(&self) -> &Arc<Params> {
        self.scalar.params()
    }

    pub(crate) fn scalar(&self) -> &CurveBN {
        &self.scalar
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

pub struct KeyPair {
    pk: PublicKey,
    sk: SecretKey,
}

impl KeyPair {
    pub fn new(params: &Arc<Params>) -> Result<Self, PreErrors> {
        Ok(Self::from_secret_key(SecretKey::random(params)?))
    }

    pub fn from_secret_key(sk: SecretKey) -> Self {
        KeyPair {
            pk: sk.public_key(),
            sk,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.pk
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.sk
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("pk", &self.pk)
            .field("sk", &self.sk)
            .finish()
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Signature {
    r: CurveBN,
    s: CurveBN,
}

impl Signature {
    fn from_ecdsa_sig(other: &EcdsaSig, params: &Arc<Params>) -> Result<Self, PreErrors> {
        Ok(Signature {
            r: CurveBN::from_big_num(other.r(), params)?,
            s: CurveBN::from_big_num(other.s(), params)?,
        })
    }

    pub fn from_bytes(bytes: &[u8], params: &Arc<Params>) -> Result<Self, PreErrors> {
        if bytes.len() != Self::expected_bytes_length(params) {
            return Err(PreErrors::InvalidBytes);
        }
        let (r, s) = bytes.split_at(bytes.len() / 2);
        Ok(Signature {
            r: CurveBN::from_bytes(r, params)?,
            s: CurveBN::from_bytes(s, params)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.r.to_bytes();
        bytes.extend_from_slice(&self.s.to_bytes());
        bytes
    }

    pub fn expected_bytes_length(params: &Arc<Params>) -> usize {
        2 * params.group_order_size_in_bytes()
    }

    pub fn verify_sha2(&self, data: &[u8], verifying_pk: &PublicKey) -> bool {
        self.verify::<SHA256Hash>(data, verifying_pk)
    }

    /// Any failure inside the primitive counts as an invalid signature.
    pub fn verify<H>(&self, data: &[u8], verifying_pk: &PublicKey) -> bool
    where
        H: Hash,
    {
        let mut hash = H::new(b"");
        hash.update(data);
        let digest = hash.finalize();

        let ver_key =
            match EcKey::from_public_key(verifying_pk.params().group(), verifying_pk.point()) {
                Ok(key) => key,
                Err(_) => return false,
            };
        let sig = match (self.r.bn().to_owned(), self.s.bn().to_owned()) {
            (Ok(r), Ok(s)) => match EcdsaSig::from_private_components(r, s) {
                Ok(sig) => sig,
                Err(_) => return false,
            },
            _ => return false,
        };
        sig.verify(&digest, &ver_key).unwrap_or(false)
    }
}

/// ECDSA signing key used to authenticate key fragments.
pub struct Signer {
    key: EcKey<Private>,
    pk: PublicKey,
    params: Arc<Params>,
}

impl Signer {
    pub fn new(params: &Arc<Params>) -> Result<Self, PreErrors> {
        Self::from_secret_key(&SecretKey::random(params)?)
    }

    pub fn from_secret_key(sk: &SecretKey) -> Result<Self, PreErrors> {
        let params = sk.params();
        let pk = sk.public_key();
        let key = EcKey::from_private_components(params.group(), sk.scalar().bn(), pk.point())?;
        key.check_key().map_err(|_| PreErrors::InvalidBytes)?;
        Ok(Signer {
            key,
            pk,
            params: Arc::clone(params),
        })
    }

    pub fn from_secret_bytes(bytes: &[u8], params: &Arc<Params>) -> Result<Self, PreErrors> {
        Self::from_secret_key(&SecretKey::from_bytes(bytes, params)?)
    }

    pub fn to_secret_bytes(&self) -> Result<Zeroizing<Vec<u8>>, PreErrors> {
        let sk = CurveBN::from_big_num(self.key.private_key(), &self.params)?;
        Ok(Zeroizing::new(sk.to_bytes()))
    }

    pub fn sign_sha2(&self, data: &[u8]) -> Result<Signature, PreErrors> {
        self.sign::<SHA256Hash>(data)
    }

    pub fn sign<H>(&self, data: &[u8]) -> Result<Signature, PreErrors>
    where
        H: Hash,
    {
        let mut hash = H::new(b"");
        hash.update(data);
        let digest = hash.finalize();
        let sig = EcdsaSig::sign(&digest, &self.key).map_err(|_| PreErrors::RandomnessFailure)?;
        Signature::from_ecdsa_sig(&sig, &self.params)
    }

    pub fn verifying_key(&self) -> &PublicKey {
        &self.pk
    }

    pub fn params(&self) -> &Arc<Params> {
        &self.params
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Signer {{ verifying_key: {:?} }}", self.pk)
    }
}
