use crate::internal::errors::PreErrors;
use crate::internal::schemes::{unsafe_hash_to_point, Blake2bHash};

use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::sync::Arc;

use openssl::bn::{BigNum, BigNumContext, BigNumRef};
use openssl::ec::{EcGroup, EcGroupRef, EcPoint, EcPointRef, PointConversionForm};
use openssl::nid::Nid;
use zeroize::Zeroizing;

const U_POINT_LABEL: &[u8] = b"UmbralProxy/Parameters/u";

/// Curve parameters shared by every scalar and point of one deployment.
///
/// This is the group capability the engine is built on: OpenSSL provides the
/// scalar and point arithmetic, `Params` only pins the curve and the second
/// generator `U` used for fragment commitments.
pub struct Params {
    group: EcGroup,
    g_point: EcPoint,
    order: BigNum,
    u_point: EcPoint,
    field_order_size_in_bytes: usize,
    group_order_size_in_bytes: usize,
}

impl Params {
    pub fn new(curve_name: Nid) -> Result<Self, PreErrors> {
        let mut ctx = BigNumContext::new()?;
        let group = EcGroup::from_curve_name(curve_name)?;
        let g_point = group.generator().to_owned(&group)?;
        let mut order = BigNum::new()?;
        group.order(&mut order, &mut ctx)?;
        let field_order_size_in_bytes = ((group.degree() + 7) / 8) as usize;
        let group_order_size_in_bytes = order.num_bytes() as usize;
        let g_bytes = g_point.to_bytes(&group, PointConversionForm::COMPRESSED, &mut ctx)?;
        let u_point =
            unsafe_hash_to_point::<Blake2bHash>(&g_bytes, U_POINT_LABEL, &group, &mut ctx)?;
        Ok(Params {
            group,
            g_point,
            order,
            u_point,
            field_order_size_in_bytes,
            group_order_size_in_bytes,
        })
    }

    pub fn group(&self) -> &EcGroupRef {
        &self.group
    }

    pub fn g_point(&self) -> &EcPointRef {
        &self.g_point
    }

    pub fn order(&self) -> &BigNumRef {
        &self.order
    }

    pub fn u_point(&self) -> &EcPointRef {
        &self.u_point
    }

    pub fn field_order_size_in_bytes(&self) -> usize {
        self.field_order_size_in_bytes
    }

    pub fn group_order_size_in_bytes(&self) -> usize {
        self.group_order_size_in_bytes
    }

    pub fn curve_name(&self) -> Option<Nid> {
        self.group.curve_name()
    }

    pub fn same_curve(&self, other: &Params) -> bool {
        match (self.curve_name(), other.curve_name()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Params {{ curve: {:?} }}", self.curve_name())
    }
}

// Operator impls cannot return errors; a context allocation failure there is fatal.
fn new_ctx() -> BigNumContext {
    BigNumContext::new().expect("Error in BN context creation")
}

/// A nonzero scalar modulo the group order. The value is cleared on drop.
pub struct CurveBN {
    bn: BigNum,
    params: Arc<Params>,
}

impl CurveBN {
    pub fn from_u32(n: u32, params: &Arc<Params>) -> Result<Self, PreErrors> {
        Ok(CurveBN {
            bn: BigNum::from_u32(n)?,
            params: Arc::clone(params),
        })
    }

    pub fn from_big_num(n: &BigNumRef, params: &Arc<Params>) -> Result<Self, PreErrors> {
        Ok(CurveBN {
            bn: n.to_owned()?,
            params: Arc::clone(params),
        })
    }

    pub fn from_bytes(bytes: &[u8], params: &Arc<Params>) -> Result<Self, PreErrors> {
        if bytes.len() != Self::expected_bytes_length(params) {
            return Err(PreErrors::InvalidBytes);
        }
        let bn = BigNum::from_slice(bytes).map_err(|_| PreErrors::InvalidBytes)?;
        if Self::bn_is_on_curve(&bn, params) {
            Ok(CurveBN {
                bn,
                params: Arc::clone(params),
            })
        } else {
            Err(PreErrors::InvalidBytes)
        }
    }

    pub fn random(params: &Arc<Params>) -> Result<Self, PreErrors> {
        let mut rand = BigNum::new()?;
        loop {
            params
                .order()
                .rand_range(&mut rand)
                .map_err(|_| PreErrors::RandomnessFailure)?;
            if Self::bn_is_on_curve(&rand, params) {
                break;
            }
        }

        Ok(CurveBN {
            bn: rand,
            params: Arc::clone(params),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.bn
            .to_vec_padded(self.params.group_order_size_in_bytes() as i32)
            .expect("Error: BN size too large")
    }

    fn bn_is_on_curve(bn: &BigNumRef, params: &Arc<Params>) -> bool {
        bn.num_bits() > 0 && !bn.is_negative() && bn < params.order()
    }

    pub fn expected_bytes_length(params: &Arc<Params>) -> usize {
        params.group_order_size_in_bytes()
    }

    pub fn is_zero(&self) -> bool {
        self.bn.num_bits() == 0
    }

    pub fn invert(&self) -> Result<Self, PreErrors> {
        let mut res = BigNum::new()?;
        let mut ctx = BigNumContext::new()?;
        res.mod_inverse(&self.bn, self.params.order(), &mut ctx)
            .map_err(|_| PreErrors::DecryptionError)?;

        Ok(CurveBN {
            bn: res,
            params: Arc::clone(&self.params),
        })
    }

    pub fn bn(&self) -> &BigNumRef {
        &self.bn
    }

    pub fn params(&self) -> &Arc<Params> {
        &self.params
    }
}

impl Drop for CurveBN {
    fn drop(&mut self) {
        self.bn.clear();
    }
}

impl PartialEq for CurveBN {
    fn eq(&self, other: &CurveBN) -> bool {
        self.params.same_curve(&other.params) && self.bn == other.bn
    }
}

impl Clone for CurveBN {
    fn clone(&self) -> Self {
        CurveBN {
            bn: self.bn.to_owned().expect("Error in BN cloning"),
            params: Arc::clone(&self.params),
        }
    }
}

impl fmt::Debug for CurveBN {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CurveBN {{ bn: {:?} }}", self.bn)
    }
}

impl Add for &CurveBN {
    type Output = CurveBN;

    fn add(self, other: &CurveBN) -> CurveBN {
        let mut res = BigNum::new().expect("Error in BN creation");
        res.mod_add(&self.bn, &other.bn, self.params.order(), &mut new_ctx())
            .expect("Error in BN addition");

        CurveBN {
            bn: res,
            params: Arc::clone(&self.params),
        }
    }
}

impl Sub for &CurveBN {
    type Output = CurveBN;

    fn sub(self, other: &CurveBN) -> CurveBN {
        let mut res = BigNum::new().expect("Error in BN creation");
        res.mod_sub(&self.bn, &other.bn, self.params.order(), &mut new_ctx())
            .expect("Error in BN subtraction");

        CurveBN {
            bn: res,
            params: Arc::clone(&self.params),
        }
    }
}

impl Mul for &CurveBN {
    type Output = CurveBN;

    fn mul(self, other: &CurveBN) -> CurveBN {
        let mut res = BigNum::new().expect("Error in BN creation");
        res.mod_mul(&self.bn, &other.bn, self.params.order(), &mut new_ctx())
            .expect("Error in BN multiplication");

        CurveBN {
            bn: res,
            params: Arc::clone(&self.params),
        }
    }
}

pub struct CurvePoint {
    point: EcPoint,
    params: Arc<Params>,
}

impl CurvePoint {
    pub fn from_ec_point(p: &EcPointRef, params: &Arc<Params>) -> Result<Self, PreErrors> {
        Ok(CurvePoint {
            point: p.to_owned(params.group())?,
            params: Arc::clone(params),
        })
    }

    /// The second generator `U`.
    pub fn u_point(params: &Arc<Params>) -> Self {
        CurvePoint {
            point: params
                .u_point()
                .to_owned(params.group())
                .expect("Error in Point cloning"),
            params: Arc::clone(params),
        }
    }

    pub fn from_bytes(bytes: &[u8], params: &Arc<Params>) -> Result<Self, PreErrors> {
        if bytes.len() != Self::expected_bytes_length(params) {
            return Err(PreErrors::InvalidBytes);
        }
        let mut ctx = BigNumContext::new()?;
        let point = EcPoint::from_bytes(params.group(), bytes, &mut ctx)
            .map_err(|_| PreErrors::InvalidBytes)?;
        if point.is_infinity(params.group()) {
            return Err(PreErrors::InvalidBytes);
        }
        Ok(CurvePoint {
            point,
            params: Arc::clone(params),
        })
    }

    pub fn mul_gen(other: &CurveBN, params: &Arc<Params>) -> Self {
        let mut res = EcPoint::new(params.group()).expect("Error in Point creation");
        res.mul_generator(params.group(), &other.bn, &new_ctx())
            .expect("Error in Point multiplication");

        CurvePoint {
            point: res,
            params: Arc::clone(params),
        }
    }

    pub fn expected_bytes_length(params: &Arc<Params>) -> usize {
        // compressed form
        1 + params.field_order_size_in_bytes()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.point
            .to_bytes(
                self.params.group(),
                PointConversionForm::COMPRESSED,
                &mut new_ctx(),
            )
            .expect("Error in Point to bytes")
    }

    /// Encoding of a point that is itself key material (a DH shared point).
    pub fn to_secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.to_bytes())
    }

    pub fn point(&self) -> &EcPointRef {
        &self.point
    }

    pub fn params(&self) -> &Arc<Params> {
        &self.params
    }
}

impl PartialEq for CurvePoint {
    fn eq(&self, other: &CurvePoint) -> bool {
        self.params.same_curve(&other.params)
            && self
                .point
                .eq(self.params.group(), &other.point, &mut new_ctx())
                .unwrap_or(false)
    }
}

impl Clone for CurvePoint {
    fn clone(&self) -> Self {
        CurvePoint {
            point: self
                .point
                .to_owned(self.params.group())
                .expect("Error in Point cloning"),
            params: Arc::clone(&self.params),
        }
    }
}

impl fmt::Debug for CurvePoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CurvePoint({})", hex::encode(self.to_bytes()))
    }
}

impl Add for &CurvePoint {
    type Output = CurvePoint;

    fn add(self, other: &CurvePoint) -> CurvePoint {
        let mut res = EcPoint::new(self.params.group()).expect("Error in Point creation");
        res.add(self.params.group(), &self.point, &other.point, &mut new_ctx())
            .expect("Error in Point addition");

        CurvePoint {
            point: res,
            params: Arc::clone(&self.params),
        }
    }
}

impl Mul<&CurveBN> for &CurvePoint {
    type Output = CurvePoint;

    fn mul(self, other: &CurveBN) -> CurvePoint {
        let mut res = EcPoint::new(self.params.group()).expect("Error in Point creation");
        res.mul(self.params.group(), &self.point, &other.bn, &new_ctx())
            .expect("Error in Point multiplication");

        CurvePoint {
            point: res,
            params: Arc::clone(&self.params),
        }
    }
}
