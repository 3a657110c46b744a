use crate::internal::curve::CurveBN;
use crate::internal::errors::PreErrors;

use sha2::{Digest, Sha512};

const TAG_LENGTH: usize = 8;

/// Short domain separation tag for a named constant.
pub fn constant_tag(name: &str) -> Vec<u8> {
  let mut hasher = Sha512::new();
  hasher.update(name);
  hasher.finalize()[..TAG_LENGTH].to_vec()
}

/// Lagrange coefficient at zero for `id_i` among `selected_ids`.
///
/// Fails if any other id equals `id_i`.
pub fn lambda_coeff(id_i: &CurveBN, selected_ids: &[CurveBN]) -> Result<CurveBN, PreErrors> {
  let mut res = CurveBN::from_u32(1, id_i.params())?;

  let mut skipped_self = false;
  for id_j in selected_ids {
    if !skipped_self && id_j == id_i {
      skipped_self = true;
      continue;
    }
    let denominator = id_j - id_i;
    if denominator.is_zero() {
      return Err(PreErrors::DecryptionError);
    }
    res = &(&res * id_j) * &denominator.invert()?;
  }

  Ok(res)
}

/// Horner evaluation of `coeffs[0] + coeffs[1]·x + ...`.
pub fn poly_eval(coeffs: &[CurveBN], x: &CurveBN) -> Result<CurveBN, PreErrors> {
  let (last, rest) = coeffs.split_last().ok_or(PreErrors::InvalidKFragThreshold)?;
  let mut res = last.clone();

  for coeff in rest.iter().rev() {
    res = &(&res * x) + coeff;
  }

  Ok(res)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::internal::curve::Params;

  use openssl::nid::Nid;
  use std::sync::Arc;

  fn params() -> Arc<Params> {
    Arc::new(Params::new(Nid::SECP256K1).unwrap())
  }

  #[test]
  fn poly_eval_test() {
    let params = params();
    let coefficients: Vec<CurveBN> = (0..5)
      .map(|i| CurveBN::from_u32(i + 2, &params).unwrap())
      .collect();
    let x = CurveBN::from_u32(2, &params).unwrap();

    // 2 + 3·2 + 4·4 + 5·8 + 6·16
    let res = poly_eval(&coefficients, &x).unwrap();
    assert_eq!(res, CurveBN::from_u32(160, &params).unwrap());
  }

  #[test]
  fn lagrange_reconstructs_constant_term() {
    let params = params();
    // f(x) = 7 + 3x
    let coefficients = vec![
      CurveBN::from_u32(7, &params).unwrap(),
      CurveBN::from_u32(3, &params).unwrap(),
    ];
    let xs = vec![
      CurveBN::from_u32(4, &params).unwrap(),
      CurveBN::from_u32(9, &params).unwrap(),
    ];
    let mut acc: Option<CurveBN> = None;
    for x in &xs {
      let y = poly_eval(&coefficients, x).unwrap();
      let term = &y * &lambda_coeff(x, &xs).unwrap();
      acc = Some(match acc {
        Some(a) => &a + &term,
        None => term,
      });
    }
    assert_eq!(acc.unwrap(), coefficients[0]);
  }

  #[test]
  fn lagrange_rejects_duplicate_ids() {
    let params = params();
    let x = CurveBN::from_u32(5, &params).unwrap();
    let xs = vec![x.clone(), x.clone()];
    assert_eq!(
      lambda_coeff(&x, &xs).unwrap_err(),
      PreErrors::DecryptionError
    );
  }

  #[test]
  fn constant_tags_differ() {
    assert_eq!(constant_tag("X_COORDINATE").len(), TAG_LENGTH);
    assert_ne!(constant_tag("X_COORDINATE"), constant_tag("NON_INTERACTIVE"));
  }
}
