use crate::internal::curve::{CurveBN, Params};
use crate::internal::errors::PreErrors;

use std::sync::Arc;

use blake2::{Blake2b512, Digest};
use chacha20poly1305::{
  aead::{Aead, KeyInit, Payload},
  ChaCha20Poly1305, Nonce,
};
use hkdf::SimpleHkdf;
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroupRef, EcPoint};
use sha2::Sha256;
use sha3::Keccak256;
use zeroize::Zeroizing;

pub const DEM_KEYSIZE: usize = 32;
pub const DEM_NONCE_SIZE: usize = 12;
const DEM_TAG_SIZE: usize = 16;
/// Nonce plus tag: the ciphertext of an empty plaintext.
pub const DEM_MIN_SIZE: usize = DEM_NONCE_SIZE + DEM_TAG_SIZE;
const CUSTOMIZATION_STRING_LENGTH: usize = 64;

pub trait Hash {
  fn new(customization_string: &[u8]) -> Self;
  fn update(&mut self, data: &[u8]);
  fn finalize(self) -> Vec<u8>;
}

// Customization strings are zero padded to a full block.
fn pad_customization(customization_string: &[u8]) -> Vec<u8> {
  let mut padded = customization_string.to_vec();
  if padded.len() < CUSTOMIZATION_STRING_LENGTH {
    padded.resize(CUSTOMIZATION_STRING_LENGTH, 0);
  }
  padded
}

pub struct Blake2bHash {
  digest: Blake2b512,
}

impl Hash for Blake2bHash {
  fn new(customization_string: &[u8]) -> Self {
    let mut hasher = Blake2b512::new();
    Digest::update(&mut hasher, pad_customization(customization_string));

    Self { digest: hasher }
  }

  fn update(&mut self, data: &[u8]) {
    Digest::update(&mut self.digest, data);
  }

  fn finalize(self) -> Vec<u8> {
    self.digest.finalize().to_vec()
  }
}

/// Keccak256 run twice under distinct prefixes, giving a 64 byte digest.
pub struct ExtendedKeccak {
  upper: Keccak256,
  lower: Keccak256,
}

impl Hash for ExtendedKeccak {
  fn new(customization_string: &[u8]) -> Self {
    let padded = pad_customization(customization_string);
    let mut upper = Keccak256::new();
    Digest::update(&mut upper, b"\x00");
    Digest::update(&mut upper, &padded);
    let mut lower = Keccak256::new();
    Digest::update(&mut lower, b"\x01");
    Digest::update(&mut lower, &padded);

    Self { upper, lower }
  }

  fn update(&mut self, data: &[u8]) {
    Digest::update(&mut self.upper, data);
    Digest::update(&mut self.lower, data);
  }

  fn finalize(self) -> Vec<u8> {
    let mut up = self.upper.finalize().to_vec();
    up.extend_from_slice(&self.lower.finalize());
    up
  }
}

pub struct SHA256Hash {
  digest: Sha256,
}

impl Hash for SHA256Hash {
  fn new(customization_string: &[u8]) -> Self {
    let mut hasher = Sha256::new();
    Digest::update(&mut hasher, pad_customization(customization_string));

    Self { digest: hasher }
  }

  fn update(&mut self, data: &[u8]) {
    Digest::update(&mut self.digest, data);
  }

  fn finalize(self) -> Vec<u8> {
    self.digest.finalize().to_vec()
  }
}

pub fn hash_to_curve_blake(bytes: &[u8], params: &Arc<Params>) -> Result<CurveBN, PreErrors> {
  hash_to_curvebn::<Blake2bHash>(bytes, params, None)
}

/// Hashes into `[1, n-1]`, so the result is always a valid nonzero scalar.
pub fn hash_to_curvebn<H>(
  bytes: &[u8],
  params: &Arc<Params>,
  customization_string: Option<&[u8]>,
) -> Result<CurveBN, PreErrors>
where
  H: Hash,
{
  let mut htc_customization = b"hash_to_curvebn".to_vec();
  if let Some(c) = customization_string {
    htc_customization.extend_from_slice(c);
  }
  let mut hash = H::new(&htc_customization);
  hash.update(bytes);

  let digest_bn = BigNum::from_slice(&hash.finalize())?;
  let mut ctx = BigNumContext::new()?;

  let one = BigNum::from_u32(1)?;
  let mut order_minus_one = BigNum::new()?;
  order_minus_one.checked_sub(params.order(), &one)?;

  let mut modulo = BigNum::new()?;
  modulo.checked_rem(&digest_bn, &order_minus_one, &mut ctx)?;

  let mut curve_bn = BigNum::new()?;
  curve_bn.checked_add(&modulo, &one)?;

  CurveBN::from_big_num(&curve_bn, params)
}

pub fn kdf(base_key: &[u8]) -> Result<Zeroizing<Vec<u8>>, PreErrors> {
  kdf_args(base_key, None, None)
}

pub fn kdf_args(
  base_key: &[u8],
  salt: Option<&[u8]>,
  info: Option<&[u8]>,
) -> Result<Zeroizing<Vec<u8>>, PreErrors> {
  let default_salt = [0u8; DEM_KEYSIZE / 8];
  let salt = salt.unwrap_or(&default_salt);
  let info = info.unwrap_or(b"");

  let mut buf = Zeroizing::new(vec![0u8; DEM_KEYSIZE]);
  SimpleHkdf::<Blake2b512>::new(Some(salt), base_key)
    .expand(info, &mut buf)
    .map_err(|_| PreErrors::DerivationError)?;
  Ok(buf)
}

pub fn dem_encrypt(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, PreErrors> {
  let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| PreErrors::EncryptionError)?;

  let mut slice = [0u8; DEM_NONCE_SIZE];
  getrandom::getrandom(&mut slice).map_err(|_| PreErrors::RandomnessFailure)?;
  let nonce = Nonce::from_slice(&slice);
  let payload = Payload {
    msg: plaintext,
    aad,
  };

  let enc_data = cipher
    .encrypt(nonce, payload)
    .map_err(|_| PreErrors::EncryptionError)?;
  let mut ciphertext = Vec::with_capacity(DEM_NONCE_SIZE + enc_data.len());
  ciphertext.extend_from_slice(&slice);
  ciphertext.extend_from_slice(&enc_data);
  Ok(ciphertext)
}

pub fn dem_decrypt(key: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, PreErrors> {
  if ciphertext.len() < DEM_MIN_SIZE {
    return Err(PreErrors::DecryptionError);
  }
  let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| PreErrors::DecryptionError)?;

  let nonce = Nonce::from_slice(&ciphertext[..DEM_NONCE_SIZE]);
  let payload = Payload {
    msg: &ciphertext[DEM_NONCE_SIZE..],
    aad,
  };

  cipher
    .decrypt(nonce, payload)
    .map_err(|_| PreErrors::DecryptionError)
}

/// Try-and-increment hashing to a point. Only for public, fixed inputs:
/// the running time leaks how many candidates were rejected.
pub fn unsafe_hash_to_point<H>(
  data: &[u8],
  label: &[u8],
  group: &EcGroupRef,
  ctx: &mut BigNumContext,
) -> Result<EcPoint, PreErrors>
where
  H: Hash,
{
  let mut to_hash = (label.len() as u32).to_be_bytes().to_vec();
  to_hash.extend_from_slice(label);
  to_hash.extend_from_slice(&(data.len() as u32).to_be_bytes());
  to_hash.extend_from_slice(data);

  let curve_key_size_bytes = ((group.degree() + 7) / 8) as usize;

  for i in 0..u32::MAX {
    let mut hash = H::new(b"");
    hash.update(&to_hash);
    hash.update(&i.to_be_bytes());

    let digest = hash.finalize();
    let digest = &digest[..(curve_key_size_bytes + 1)];

    let mut compressed_point = if digest[0] & 1 == 0 {
      vec![0x02]
    } else {
      vec![0x03]
    };
    compressed_point.extend_from_slice(&digest[1..]);

    if let Ok(point) = EcPoint::from_bytes(group, &compressed_point, ctx) {
      return Ok(point);
    }
  }

  Err(PreErrors::DerivationError)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dem_round_trip_with_aad() {
    let key = [7u8; DEM_KEYSIZE];
    let ct = dem_encrypt(&key, b"payload", b"capsule").unwrap();
    assert_eq!(ct.len(), DEM_MIN_SIZE + 7);
    assert_eq!(dem_decrypt(&key, &ct, b"capsule").unwrap(), b"payload".to_vec());
  }

  #[test]
  fn dem_empty_plaintext() {
    let key = [1u8; DEM_KEYSIZE];
    let ct = dem_encrypt(&key, b"", b"").unwrap();
    assert_eq!(ct.len(), DEM_MIN_SIZE);
    assert_eq!(dem_decrypt(&key, &ct, b"").unwrap(), Vec::<u8>::new());
  }

  #[test]
  fn dem_rejects_wrong_aad_and_truncation() {
    let key = [3u8; DEM_KEYSIZE];
    let ct = dem_encrypt(&key, b"data", b"one").unwrap();
    assert_eq!(
      dem_decrypt(&key, &ct, b"two").unwrap_err(),
      PreErrors::DecryptionError
    );
    assert_eq!(
      dem_decrypt(&key, &ct[..DEM_MIN_SIZE - 1], b"one").unwrap_err(),
      PreErrors::DecryptionError
    );
  }

  #[test]
  fn kdf_is_deterministic() {
    let a = kdf(b"shared point").unwrap();
    let b = kdf(b"shared point").unwrap();
    let c = kdf(b"other point").unwrap();
    assert_eq!(a.len(), DEM_KEYSIZE);
    assert_eq!(*a, *b);
    assert_ne!(*a, *c);
  }

  #[test]
  fn extended_keccak_is_64_bytes() {
    let mut h = ExtendedKeccak::new(b"test");
    h.update(b"data");
    assert_eq!(h.finalize().len(), 64);
  }
}
