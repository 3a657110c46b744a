use crate::internal::curve::{CurveBN, CurvePoint, Params};
use crate::internal::errors::PreErrors;
use crate::internal::keys::{PublicKey, Signature};
use crate::internal::schemes::hash_to_curve_blake;
use crate::internal::utils::constant_tag;

use std::fmt;
use std::sync::Arc;

/// Which public keys are bound into the proxy signature of a key fragment.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum KFragMode {
    NoKey = 0,
    DelegatingOnly = 1,
    ReceivingOnly = 2,
    DelegatingAndReceiving = 3,
}

impl KFragMode {
    pub fn from_flags(sign_delegating_key: bool, sign_receiving_key: bool) -> Self {
        match (sign_delegating_key, sign_receiving_key) {
            (true, true) => KFragMode::DelegatingAndReceiving,
            (true, false) => KFragMode::DelegatingOnly,
            (false, true) => KFragMode::ReceivingOnly,
            (false, false) => KFragMode::NoKey,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, PreErrors> {
        match value {
            0 => Ok(KFragMode::NoKey),
            1 => Ok(KFragMode::DelegatingOnly),
            2 => Ok(KFragMode::ReceivingOnly),
            3 => Ok(KFragMode::DelegatingAndReceiving),
            _ => Err(PreErrors::InvalidBytes),
        }
    }

    pub fn delegating_key_in_signature(self) -> bool {
        matches!(
            self,
            KFragMode::DelegatingOnly | KFragMode::DelegatingAndReceiving
        )
    }

    pub fn receiving_key_in_signature(self) -> bool {
        matches!(
            self,
            KFragMode::ReceivingOnly | KFragMode::DelegatingAndReceiving
        )
    }
}

fn dh_transcript(precursor: &CurvePoint, receiving_pk: &PublicKey, dh_point: &CurvePoint) -> Vec<u8> {
    let mut transcript = precursor.to_bytes();
    transcript.extend_from_slice(&receiving_pk.to_bytes());
    transcript.extend_from_slice(&dh_point.to_bytes());
    transcript
}

/// The secret `d` that makes the scheme non-interactive. Both sides of the
/// precursor DH exchange can compute it.
pub(crate) fn non_interactive_d(
    precursor: &CurvePoint,
    receiving_pk: &PublicKey,
    dh_point: &CurvePoint,
) -> Result<CurveBN, PreErrors> {
    let mut to_hash = dh_transcript(precursor, receiving_pk, dh_point);
    to_hash.extend_from_slice(&constant_tag("NON_INTERACTIVE"));
    hash_to_curve_blake(&to_hash, precursor.params())
}

/// The Shamir x coordinate of fragment `id`. Without the receiving secret
/// key nobody can compute it, so the proxies cannot recombine the shares.
pub(crate) fn share_index(
    precursor: &CurvePoint,
    receiving_pk: &PublicKey,
    dh_point: &CurvePoint,
    id: &CurveBN,
) -> Result<CurveBN, PreErrors> {
    let mut to_hash = dh_transcript(precursor, receiving_pk, dh_point);
    to_hash.extend_from_slice(&constant_tag("X_COORDINATE"));
    to_hash.extend_from_slice(&id.to_bytes());
    hash_to_curve_blake(&to_hash, precursor.params())
}

/// Message signed for the proxy: `id ‖ commitment ‖ precursor ‖ mode ‖ [delegating] ‖ [receiving]`.
pub(crate) fn proxy_message(
    id: &CurveBN,
    commitment: &CurvePoint,
    precursor: &CurvePoint,
    mode: KFragMode,
    delegating_pk: Option<&PublicKey>,
    receiving_pk: Option<&PublicKey>,
) -> Vec<u8> {
    let mut message = id.to_bytes();
    message.extend_from_slice(&commitment.to_bytes());
    message.extend_from_slice(&precursor.to_bytes());
    message.push(mode as u8);
    if let Some(pk) = delegating_pk {
        message.extend_from_slice(&pk.to_bytes());
    }
    if let Some(pk) = receiving_pk {
        message.extend_from_slice(&pk.to_bytes());
    }
    message
}

/// Message signed for the receiver: `id ‖ delegating ‖ receiving ‖ commitment ‖ precursor`.
pub(crate) fn receiver_message(
    id: &CurveBN,
    delegating_pk: &PublicKey,
    receiving_pk: &PublicKey,
    commitment: &CurvePoint,
    precursor: &CurvePoint,
) -> Vec<u8> {
    let mut message = id.to_bytes();
    message.extend_from_slice(&delegating_pk.to_bytes());
    message.extend_from_slice(&receiving_pk.to_bytes());
    message.extend_from_slice(&commitment.to_bytes());
    message.extend_from_slice(&precursor.to_bytes());
    message
}

/// An unverified key fragment, as received from the outside.
#[derive(Clone, PartialEq)]
pub struct KeyFrag {
    id: CurveBN,
    re_key_share: CurveBN,
    commitment: CurvePoint,
    precursor: CurvePoint,
    keys_mode_in_signature: KFragMode,
    signature_for_proxy: Signature,
    signature_for_receiver: Signature,
}

impl KeyFrag {
    pub(crate) fn new(
        id: CurveBN,
        re_key_share: CurveBN,
        commitment: CurvePoint,
        precursor: CurvePoint,
        keys_mode_in_signature: KFragMode,
        signature_for_proxy: Signature,
        signature_for_receiver: Signature,
    ) -> Self {
        KeyFrag {
            id,
            re_key_share,
            commitment,
            precursor,
            keys_mode_in_signature,
            signature_for_proxy,
            signature_for_receiver,
        }
    }

    pub fn from_bytes(bytes: &[u8], params: &Arc<Params>) -> Result<Self, PreErrors> {
        if bytes.len() != Self::expected_bytes_length(params) {
            return Err(PreErrors::InvalidBytes);
        }
        let bn_size = CurveBN::expected_bytes_length(params);
        let point_size = CurvePoint::expected_bytes_length(params);
        let signature_size = Signature::expected_bytes_length(params);

        let (id, rest) = bytes.split_at(bn_size);
        let (re_key_share, rest) = rest.split_at(bn_size);
        let (commitment, rest) = rest.split_at(point_size);
        let (precursor, rest) = rest.split_at(point_size);
        let (mode, rest) = rest.split_at(1);
        let (signature_for_proxy, signature_for_receiver) = rest.split_at(signature_size);

        Ok(KeyFrag {
            id: CurveBN::from_bytes(id, params)?,
            re_key_share: CurveBN::from_bytes(re_key_share, params)?,
            commitment: CurvePoint::from_bytes(commitment, params)?,
            precursor: CurvePoint::from_bytes(precursor, params)?,
            keys_mode_in_signature: KFragMode::from_u8(mode[0])?,
            signature_for_proxy: Signature::from_bytes(signature_for_proxy, params)?,
            signature_for_receiver: Signature::from_bytes(signature_for_receiver, params)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.id.to_bytes();
        bytes.extend_from_slice(&self.re_key_share.to_bytes());
        bytes.extend_from_slice(&self.commitment.to_bytes());
        bytes.extend_from_slice(&self.precursor.to_bytes());
        bytes.push(self.keys_mode_in_signature as u8);
        bytes.extend_from_slice(&self.signature_for_proxy.to_bytes());
        bytes.extend_from_slice(&self.signature_for_receiver.to_bytes());

        bytes
    }

    pub fn expected_bytes_length(params: &Arc<Params>) -> usize {
        let bn_size = CurveBN::expected_bytes_length(params);
        let point_size = CurvePoint::expected_bytes_length(params);

        // id, re_key_share: 1 bn_size each
        // commitment, precursor: 1 point_size each
        // keys_mode_in_signature: 1
        // signature_for_proxy, signature_for_receiver: 2 bn_size each
        bn_size * 6 + point_size * 2 + 1
    }

    /// Checks the commitment and the proxy signature. The keys named by the
    /// fragment's mode must be supplied.
    pub fn verify(
        self,
        verifying_pk: &PublicKey,
        delegating_pk: Option<&PublicKey>,
        receiving_pk: Option<&PublicKey>,
    ) -> Result<VerifiedKeyFrag, PreErrors> {
        let params = self.commitment.params();

        if !verifying_pk.params().same_curve(params)
            || delegating_pk.map_or(false, |pk| !pk.params().same_curve(params))
            || receiving_pk.map_or(false, |pk| !pk.params().same_curve(params))
        {
            return Err(PreErrors::KeysParametersNotEq);
        }

        let mode = self.keys_mode_in_signature;
        let delegating_pk = match (mode.delegating_key_in_signature(), delegating_pk) {
            (true, Some(pk)) => Some(pk),
            (true, None) => return Err(PreErrors::VerificationFailed),
            (false, _) => None,
        };
        let receiving_pk = match (mode.receiving_key_in_signature(), receiving_pk) {
            (true, Some(pk)) => Some(pk),
            (true, None) => return Err(PreErrors::VerificationFailed),
            (false, _) => None,
        };

        // Commitment must be share·U
        let commitment_temp = &CurvePoint::u_point(params) * &self.re_key_share;
        if commitment_temp != self.commitment {
            return Err(PreErrors::VerificationFailed);
        }

        let message = proxy_message(
            &self.id,
            &self.commitment,
            &self.precursor,
            mode,
            delegating_pk,
            receiving_pk,
        );
        if !self.signature_for_proxy.verify_sha2(&message, verifying_pk) {
            return Err(PreErrors::VerificationFailed);
        }

        Ok(VerifiedKeyFrag { kfrag: self })
    }

    pub fn id(&self) -> &CurveBN {
        &self.id
    }

    pub fn precursor(&self) -> &CurvePoint {
        &self.precursor
    }

    pub fn commitment(&self) -> &CurvePoint {
        &self.commitment
    }

    pub fn keys_mode_in_signature(&self) -> KFragMode {
        self.keys_mode_in_signature
    }

    pub(crate) fn re_key_share(&self) -> &CurveBN {
        &self.re_key_share
    }

    pub(crate) fn signature_for_receiver(&self) -> &Signature {
        &self.signature_for_receiver
    }
}

// The share is secret material for the proxy; it is not printed.
impl fmt::Debug for KeyFrag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyFrag")
            .field("id", &self.id)
            .field("commitment", &self.commitment)
            .field("precursor", &self.precursor)
            .field("mode", &self.keys_mode_in_signature)
            .finish()
    }
}

/// A key fragment that was verified, or generated in this process.
#[derive(Clone, PartialEq, Debug)]
pub struct VerifiedKeyFrag {
    kfrag: KeyFrag,
}

impl VerifiedKeyFrag {
    pub(crate) fn from_generated(kfrag: KeyFrag) -> Self {
        VerifiedKeyFrag { kfrag }
    }

    /// Restores a fragment from a store this process wrote to and trusts.
    /// Only structural checks are made.
    pub(crate) fn from_verified_bytes(
        bytes: &[u8],
        params: &Arc<Params>,
    ) -> Result<Self, PreErrors> {
        Ok(VerifiedKeyFrag {
            kfrag: KeyFrag::from_bytes(bytes, params)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.kfrag.to_bytes()
    }

    pub fn unverify(self) -> KeyFrag {
        self.kfrag
    }

    pub fn kfrag(&self) -> &KeyFrag {
        &self.kfrag
    }

    pub fn id(&self) -> &CurveBN {
        self.kfrag.id()
    }
}
