use crate::internal::curve::{CurveBN, CurvePoint, Params};
use crate::internal::errors::PreErrors;
use crate::internal::keys::{PublicKey, SecretKey, Signature};
use crate::internal::kfrag::{non_interactive_d, receiver_message, share_index, KeyFrag};
use crate::internal::schemes::{hash_to_curvebn, kdf, Blake2bHash, ExtendedKeccak};
use crate::internal::utils::lambda_coeff;

use std::fmt;
use std::sync::Arc;

use zeroize::Zeroizing;

/// The KEM part of a ciphertext. Immutable once created.
#[derive(Clone, PartialEq)]
pub struct Capsule {
    e_point: CurvePoint,
    v_point: CurvePoint,
    sign: CurveBN,
}

impl Capsule {
    pub(crate) fn new(e: CurvePoint, v: CurvePoint, s: CurveBN) -> Self {
        Capsule {
            e_point: e,
            v_point: v,
            sign: s,
        }
    }

    pub fn from_bytes(bytes: &[u8], params: &Arc<Params>) -> Result<Self, PreErrors> {
        if bytes.len() != Self::expected_bytes_length(params) {
            return Err(PreErrors::InvalidBytes);
        }
        let point_size = CurvePoint::expected_bytes_length(params);

        let (e, rest) = bytes.split_at(point_size);
        let (v, s) = rest.split_at(point_size);

        Ok(Capsule {
            e_point: CurvePoint::from_bytes(e, params)?,
            v_point: CurvePoint::from_bytes(v, params)?,
            sign: CurveBN::from_bytes(s, params)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.e_point.to_bytes();
        bytes.extend_from_slice(&self.v_point.to_bytes());
        bytes.extend_from_slice(&self.sign.to_bytes());
        bytes
    }

    pub fn expected_bytes_length(params: &Arc<Params>) -> usize {
        // e_point, v_point: 1 point_size each; sign: 1 bn_size
        CurveBN::expected_bytes_length(params) + CurvePoint::expected_bytes_length(params) * 2
    }

    pub(crate) fn challenge(e: &CurvePoint, v: &CurvePoint) -> Result<CurveBN, PreErrors> {
        let mut to_hash = e.to_bytes();
        to_hash.extend_from_slice(&v.to_bytes());
        hash_to_curvebn::<Blake2bHash>(&to_hash, e.params(), None)
    }

    /// Public consistency check `s·G == V + h(E, V)·E`.
    pub fn verify(&self) -> bool {
        let params = self.e_point.params();
        let h = match Self::challenge(&self.e_point, &self.v_point) {
            Ok(h) => h,
            Err(_) => return false,
        };

        let first = CurvePoint::mul_gen(&self.sign, params);
        let second = &self.v_point + &(&self.e_point * &h);

        first == second
    }

    /// Recovers the symmetric key with the delegating secret key.
    pub(crate) fn open_original(
        &self,
        delegating_sk: &SecretKey,
    ) -> Result<Zeroizing<Vec<u8>>, PreErrors> {
        if !self.verify() {
            return Err(PreErrors::InvalidCapsule);
        }
        let shared_key = &(&self.e_point + &self.v_point) * delegating_sk.scalar();
        kdf(&shared_key.to_secret_bytes())
    }

    /// Recovers the symmetric key by combining capsule fragments at zero.
    ///
    /// Every failure past the capsule check is reported as `DecryptionError`
    /// so the caller learns nothing about which fragment was wrong.
    pub(crate) fn open_reencrypted(
        &self,
        receiving_sk: &SecretKey,
        delegating_pk: &PublicKey,
        cfrags: &[VerifiedCapsuleFrag],
    ) -> Result<Zeroizing<Vec<u8>>, PreErrors> {
        if !self.verify() {
            return Err(PreErrors::InvalidCapsule);
        }
        let first_cfrag = cfrags.first().ok_or(PreErrors::DecryptionError)?;

        let receiving_pk = receiving_sk.public_key();
        let precursor = &first_cfrag.cfrag.precursor;
        let dh_point = precursor * receiving_sk.scalar();

        let mut xs: Vec<CurveBN> = Vec::with_capacity(cfrags.len());
        for (i, verified) in cfrags.iter().enumerate() {
            let cfrag = &verified.cfrag;
            if cfrag.precursor != *precursor {
                return Err(PreErrors::DecryptionError);
            }
            if cfrags[..i]
                .iter()
                .any(|other| other.cfrag.kfrag_id == cfrag.kfrag_id)
            {
                return Err(PreErrors::DecryptionError);
            }
            xs.push(share_index(precursor, &receiving_pk, &dh_point, &cfrag.kfrag_id)?);
        }

        let mut e_prime: Option<CurvePoint> = None;
        let mut v_prime: Option<CurvePoint> = None;
        for (x, verified) in xs.iter().zip(cfrags) {
            let lambda_i = lambda_coeff(x, &xs)?;
            let e_summand = &verified.cfrag.e_i_point * &lambda_i;
            let v_summand = &verified.cfrag.v_i_point * &lambda_i;
            e_prime = Some(match e_prime {
                Some(acc) => &acc + &e_summand,
                None => e_summand,
            });
            v_prime = Some(match v_prime {
                Some(acc) => &acc + &v_summand,
                None => v_summand,
            });
        }
        let (e_prime, v_prime) = match (e_prime, v_prime) {
            (Some(e), Some(v)) => (e, v),
            _ => return Err(PreErrors::DecryptionError),
        };

        let d = non_interactive_d(precursor, &receiving_pk, &dh_point)?;
        let h = Self::challenge(&self.e_point, &self.v_point)?;

        // delegating_pk·(s/d) == h·E' + V'
        let first = delegating_pk * &(&self.sign * &d.invert()?);
        let second = &(&e_prime * &h) + &v_prime;
        if first != second {
            return Err(PreErrors::DecryptionError);
        }

        let shared_key = &(&e_prime + &v_prime) * &d;
        kdf(&shared_key.to_secret_bytes()).map_err(|_| PreErrors::DecryptionError)
    }

    pub fn e(&self) -> &CurvePoint {
        &self.e_point
    }

    pub fn v(&self) -> &CurvePoint {
        &self.v_point
    }

    pub fn sign(&self) -> &CurveBN {
        &self.sign
    }

    pub fn params(&self) -> &Arc<Params> {
        self.e_point.params()
    }
}

impl fmt::Debug for Capsule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Capsule({})", hex::encode(self.to_bytes()))
    }
}

/// Chaum-Pedersen proof that `E1 = rk·E`, `V1 = rk·V` and `U1 = rk·U` use the same `rk`.
#[derive(Clone, PartialEq, Debug)]
pub struct CorrectnessProof {
    e2: CurvePoint,
    v2: CurvePoint,
    u1: CurvePoint,
    u2: CurvePoint,
    z3: CurveBN,
    kfrag_signature: Signature,
}

impl CorrectnessProof {
    fn from_bytes(bytes: &[u8], params: &Arc<Params>) -> Result<Self, PreErrors> {
        if bytes.len() != Self::expected_bytes_length(params) {
            return Err(PreErrors::InvalidBytes);
        }
        let bn_size = CurveBN::expected_bytes_length(params);
        let point_size = CurvePoint::expected_bytes_length(params);

        let (e2, rest) = bytes.split_at(point_size);
        let (v2, rest) = rest.split_at(point_size);
        let (u1, rest) = rest.split_at(point_size);
        let (u2, rest) = rest.split_at(point_size);
        let (z3, kfrag_signature) = rest.split_at(bn_size);

        Ok(CorrectnessProof {
            e2: CurvePoint::from_bytes(e2, params)?,
            v2: CurvePoint::from_bytes(v2, params)?,
            u1: CurvePoint::from_bytes(u1, params)?,
            u2: CurvePoint::from_bytes(u2, params)?,
            z3: CurveBN::from_bytes(z3, params)?,
            kfrag_signature: Signature::from_bytes(kfrag_signature, params)?,
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.e2.to_bytes();
        bytes.extend_from_slice(&self.v2.to_bytes());
        bytes.extend_from_slice(&self.u1.to_bytes());
        bytes.extend_from_slice(&self.u2.to_bytes());
        bytes.extend_from_slice(&self.z3.to_bytes());
        bytes.extend_from_slice(&self.kfrag_signature.to_bytes());

        bytes
    }

    fn expected_bytes_length(params: &Arc<Params>) -> usize {
        let bn_size = CurveBN::expected_bytes_length(params);
        let point_size = CurvePoint::expected_bytes_length(params);

        // e2, v2, u1, u2: 1 point_size each
        // z3: 1 bn_size
        // kfrag_signature: 2 bn_size
        bn_size * 3 + point_size * 4
    }
}

#[allow(clippy::too_many_arguments)]
fn proof_challenge(
    e: &CurvePoint,
    e1: &CurvePoint,
    e2: &CurvePoint,
    v: &CurvePoint,
    v1: &CurvePoint,
    v2: &CurvePoint,
    u: &CurvePoint,
    u1: &CurvePoint,
    u2: &CurvePoint,
) -> Result<CurveBN, PreErrors> {
    let mut to_hash = Vec::new();
    for point in [e, e1, e2, v, v1, v2, u, u1, u2] {
        to_hash.extend_from_slice(&point.to_bytes());
    }
    hash_to_curvebn::<ExtendedKeccak>(&to_hash, e.params(), None)
}

/// An unverified capsule fragment, as received from a proxy.
#[derive(Clone, PartialEq, Debug)]
pub struct CapsuleFrag {
    e_i_point: CurvePoint,
    v_i_point: CurvePoint,
    kfrag_id: CurveBN,
    precursor: CurvePoint,
    proof: CorrectnessProof,
}

impl CapsuleFrag {
    /// Applies one key fragment to a capsule and proves it was done honestly.
    pub(crate) fn reencrypted(capsule: &Capsule, kfrag: &KeyFrag) -> Result<Self, PreErrors> {
        if !capsule.verify() {
            return Err(PreErrors::InvalidCapsule);
        }
        let params = capsule.params();
        let rk = kfrag.re_key_share();

        let e = capsule.e();
        let v = capsule.v();
        let e1 = e * rk;
        let v1 = v * rk;

        let t = CurveBN::random(params)?;
        let u = CurvePoint::u_point(params);
        let u1 = kfrag.commitment().clone();
        let e2 = e * &t;
        let v2 = v * &t;
        let u2 = &u * &t;

        let h = proof_challenge(e, &e1, &e2, v, &v1, &v2, &u, &u1, &u2)?;
        let z3 = &t + &(&h * rk);

        Ok(CapsuleFrag {
            e_i_point: e1,
            v_i_point: v1,
            kfrag_id: kfrag.id().clone(),
            precursor: kfrag.precursor().clone(),
            proof: CorrectnessProof {
                e2,
                v2,
                u1,
                u2,
                z3,
                kfrag_signature: kfrag.signature_for_receiver().clone(),
            },
        })
    }

    pub fn from_bytes(bytes: &[u8], params: &Arc<Params>) -> Result<Self, PreErrors> {
        if bytes.len() != Self::expected_bytes_length(params) {
            return Err(PreErrors::InvalidBytes);
        }
        let bn_size = CurveBN::expected_bytes_length(params);
        let point_size = CurvePoint::expected_bytes_length(params);

        let (e_i, rest) = bytes.split_at(point_size);
        let (v_i, rest) = rest.split_at(point_size);
        let (kfrag_id, rest) = rest.split_at(bn_size);
        let (precursor, proof) = rest.split_at(point_size);

        Ok(CapsuleFrag {
            e_i_point: CurvePoint::from_bytes(e_i, params)?,
            v_i_point: CurvePoint::from_bytes(v_i, params)?,
            kfrag_id: CurveBN::from_bytes(kfrag_id, params)?,
            precursor: CurvePoint::from_bytes(precursor, params)?,
            proof: CorrectnessProof::from_bytes(proof, params)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.e_i_point.to_bytes();
        bytes.extend_from_slice(&self.v_i_point.to_bytes());
        bytes.extend_from_slice(&self.kfrag_id.to_bytes());
        bytes.extend_from_slice(&self.precursor.to_bytes());
        bytes.extend_from_slice(&self.proof.to_bytes());

        bytes
    }

    pub fn expected_bytes_length(params: &Arc<Params>) -> usize {
        let bn_size = CurveBN::expected_bytes_length(params);
        let point_size = CurvePoint::expected_bytes_length(params);

        // e_i_point, v_i_point, precursor: 1 point_size each; kfrag_id: 1 bn_size
        bn_size + point_size * 3 + CorrectnessProof::expected_bytes_length(params)
    }

    /// Checks the fragment against the exact capsule and key triple it was
    /// derived for.
    pub fn verify(
        self,
        capsule: &Capsule,
        verifying_pk: &PublicKey,
        delegating_pk: &PublicKey,
        receiving_pk: &PublicKey,
    ) -> Result<VerifiedCapsuleFrag, PreErrors> {
        let params = capsule.params();
        if !self.e_i_point.params().same_curve(params)
            || !verifying_pk.params().same_curve(params)
            || !delegating_pk.params().same_curve(params)
            || !receiving_pk.params().same_curve(params)
        {
            return Err(PreErrors::KeysParametersNotEq);
        }
        if !capsule.verify() {
            return Err(PreErrors::InvalidCapsule);
        }

        let proof = &self.proof;
        let e = capsule.e();
        let v = capsule.v();
        let u = CurvePoint::u_point(params);
        let e1 = &self.e_i_point;
        let v1 = &self.v_i_point;

        let h = proof_challenge(
            e, e1, &proof.e2, v, v1, &proof.v2, &u, &proof.u1, &proof.u2,
        )?;

        // The fragment was issued by the owner for this receiver
        let message = receiver_message(
            &self.kfrag_id,
            delegating_pk,
            receiving_pk,
            &proof.u1,
            &self.precursor,
        );
        if !proof.kfrag_signature.verify_sha2(&message, verifying_pk) {
            return Err(PreErrors::VerificationFailed);
        }

        // z3·E == E2 + h·E1
        if e * &proof.z3 != &proof.e2 + &(e1 * &h) {
            return Err(PreErrors::VerificationFailed);
        }
        // z3·V == V2 + h·V1
        if v * &proof.z3 != &proof.v2 + &(v1 * &h) {
            return Err(PreErrors::VerificationFailed);
        }
        // z3·U == U2 + h·U1
        if &u * &proof.z3 != &proof.u2 + &(&proof.u1 * &h) {
            return Err(PreErrors::VerificationFailed);
        }

        Ok(VerifiedCapsuleFrag { cfrag: self })
    }

    pub fn kfrag_id(&self) -> &CurveBN {
        &self.kfrag_id
    }

    pub fn precursor(&self) -> &CurvePoint {
        &self.precursor
    }

    pub fn e_i_point(&self) -> &CurvePoint {
        &self.e_i_point
    }

    pub fn v_i_point(&self) -> &CurvePoint {
        &self.v_i_point
    }
}

/// A capsule fragment that was verified, or produced in this process.
#[derive(Clone, PartialEq, Debug)]
pub struct VerifiedCapsuleFrag {
    cfrag: CapsuleFrag,
}

impl VerifiedCapsuleFrag {
    pub(crate) fn from_generated(cfrag: CapsuleFrag) -> Self {
        VerifiedCapsuleFrag { cfrag }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.cfrag.to_bytes()
    }

    pub fn unverify(self) -> CapsuleFrag {
        self.cfrag
    }

    pub fn cfrag(&self) -> &CapsuleFrag {
        &self.cfrag
    }
}
