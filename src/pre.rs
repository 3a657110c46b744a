pub use crate::internal::capsule::{Capsule, CapsuleFrag, VerifiedCapsuleFrag};
pub use crate::internal::curve::{CurveBN, CurvePoint, Params};
pub use crate::internal::errors::PreErrors;
pub use crate::internal::keys::{KeyPair, PublicKey, SecretKey, Signature, Signer};
pub use crate::internal::kfrag::{KFragMode, KeyFrag, VerifiedKeyFrag};

use crate::internal::kfrag::{non_interactive_d, proxy_message, receiver_message, share_index};
use crate::internal::schemes::{dem_decrypt, dem_encrypt, kdf};
use crate::internal::utils::poly_eval;

use std::sync::Arc;

use openssl::nid::Nid;
use zeroize::Zeroizing;

/// Creates the standard parameters needed to operate with this crate, i.e.
/// the SECP256K1 curve
pub fn new_standard_params() -> Result<Arc<Params>, PreErrors> {
    new_params(Nid::SECP256K1)
}

pub fn new_params(curve_name: Nid) -> Result<Arc<Params>, PreErrors> {
    Ok(Arc::new(Params::new(curve_name)?))
}

/// Encrypts `plaintext` under the delegating public key.
///
/// Returns the capsule, needed by whoever opens the ciphertext, and the
/// ciphertext itself, authenticated together with the capsule bytes.
pub fn encrypt(
    delegating_pk: &PublicKey,
    plaintext: &[u8],
) -> Result<(Capsule, Vec<u8>), PreErrors> {
    let (key, capsule) = encapsulate(delegating_pk)?;
    let ciphertext = dem_encrypt(&key, plaintext, &capsule.to_bytes())?;
    Ok((capsule, ciphertext))
}

/// Opens a ciphertext with the secret key it was encrypted for.
pub fn decrypt_original(
    delegating_sk: &SecretKey,
    capsule: &Capsule,
    ciphertext: &[u8],
) -> Result<Vec<u8>, PreErrors> {
    let key = capsule.open_original(delegating_sk)?;
    dem_decrypt(&key, ciphertext, &capsule.to_bytes())
}

/// Creates a re-encryption key from the delegating secret key to the
/// receiving public key, and splits it in `shares` KFrags, any `threshold`
/// of which suffice.
///
/// `sign_delegating_key` and `sign_receiving_key` select which public keys
/// are bound into the proxy signature of every fragment.
pub fn generate_kfrags(
    delegating_sk: &SecretKey,
    receiving_pk: &PublicKey,
    signer: &Signer,
    threshold: usize,
    shares: usize,
    sign_delegating_key: bool,
    sign_receiving_key: bool,
) -> Result<Vec<VerifiedKeyFrag>, PreErrors> {
    if threshold == 0 || threshold > shares {
        return Err(PreErrors::InvalidKFragThreshold);
    }
    let params = delegating_sk.params();
    if !params.same_curve(receiving_pk.params()) || !params.same_curve(signer.params()) {
        return Err(PreErrors::KeysParametersNotEq);
    }

    let delegating_pk = delegating_sk.public_key();
    let mode = KFragMode::from_flags(sign_delegating_key, sign_receiving_key);

    // The precursor is an ephemeral key whose DH exchange with the receiving
    // key derives `d` and the share indices.
    let precursor_sk = SecretKey::random(params)?;
    let precursor = precursor_sk.public_key();
    let dh_point = receiving_pk * precursor_sk.scalar();

    let d = non_interactive_d(&precursor, receiving_pk, &dh_point)?;

    // f(0) = sk / d; the remaining coefficients are random
    let mut coefficients: Vec<CurveBN> = Vec::with_capacity(threshold);
    coefficients.push(delegating_sk.scalar() * &d.invert()?);
    for _ in 1..threshold {
        coefficients.push(CurveBN::random(params)?);
    }

    let mut ids: Vec<CurveBN> = Vec::with_capacity(shares);
    while ids.len() < shares {
        let id = CurveBN::random(params)?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    let u = CurvePoint::u_point(params);
    let mut kfrags: Vec<VerifiedKeyFrag> = Vec::with_capacity(shares);
    for id in ids {
        let share_x = share_index(&precursor, receiving_pk, &dh_point, &id)?;
        let rk = poly_eval(&coefficients, &share_x)?;
        let commitment = &u * &rk;

        let signature_for_receiver = signer.sign_sha2(&receiver_message(
            &id,
            &delegating_pk,
            receiving_pk,
            &commitment,
            &precursor,
        ))?;

        let signature_for_proxy = signer.sign_sha2(&proxy_message(
            &id,
            &commitment,
            &precursor,
            mode,
            mode.delegating_key_in_signature().then_some(&delegating_pk),
            mode.receiving_key_in_signature().then_some(receiving_pk),
        ))?;

        kfrags.push(VerifiedKeyFrag::from_generated(KeyFrag::new(
            id,
            rk,
            commitment,
            precursor.clone(),
            mode,
            signature_for_proxy,
            signature_for_receiver,
        )));
    }

    Ok(kfrags)
}

/// Performs the re-encryption operation of proxies and produces a capsule
/// fragment, i.e. a CFrag, from a verified KFrag.
pub fn reencrypt(
    capsule: &Capsule,
    kfrag: &VerifiedKeyFrag,
) -> Result<VerifiedCapsuleFrag, PreErrors> {
    let cfrag = CapsuleFrag::reencrypted(capsule, kfrag.kfrag())?;
    Ok(VerifiedCapsuleFrag::from_generated(cfrag))
}

/// Combines at least `threshold` verified CFrags and decrypts the ciphertext
/// with the receiving secret key.
pub fn decrypt_reencrypted(
    receiving_sk: &SecretKey,
    delegating_pk: &PublicKey,
    capsule: &Capsule,
    cfrags: &[VerifiedCapsuleFrag],
    ciphertext: &[u8],
) -> Result<Vec<u8>, PreErrors> {
    let key = capsule.open_reencrypted(receiving_sk, delegating_pk, cfrags)?;
    dem_decrypt(&key, ciphertext, &capsule.to_bytes())
}

fn encapsulate(delegating_pk: &PublicKey) -> Result<(Zeroizing<Vec<u8>>, Capsule), PreErrors> {
    let params = delegating_pk.params();

    let r = SecretKey::random(params)?;
    let u = SecretKey::random(params)?;
    let e = r.public_key();
    let v = u.public_key();

    let h = Capsule::challenge(&e, &v)?;
    let s = u.scalar() + &(r.scalar() * &h);

    let shared_key = delegating_pk * &(r.scalar() + u.scalar());
    let key = kdf(&shared_key.to_secret_bytes())?;

    Ok((key, Capsule::new(e, v, s)))
}
