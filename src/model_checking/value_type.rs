use std::fmt::{Debug, Display};

use num::bigint::BigInt;
use num::rational::BigRational;
use num::traits::{FromPrimitive, Num, One, Signed, ToPrimitive, Zero};
use num::Integer;
use ordered_float::NotNan;

use super::error::SolverError;

/// Number of decimal digits an `f64` can be sharpened to before the scaled
/// fraction stops being an exact integer.
pub const DOUBLE_SHARPEN_DIGITS: u64 = 15;

/// Numeric representation the solvers are instantiated with.
///
/// Only `f64` and `BigRational` implement this trait.
pub trait SolverValue: Num + Signed + Clone + PartialOrd + Debug + Display + 'static {
    /// Whether arithmetic on this type is exact.
    const IS_EXACT: bool;

    fn from_double(value: f64) -> Self;

    fn to_double(&self) -> f64;

    fn from_rational(value: &BigRational) -> Self;

    fn to_rational(&self) -> BigRational;

    /// Kwek-Mehlhorn sharpening: the simplest rational inside the interval of
    /// width `10^-precision` that starts at the value truncated to
    /// `precision` decimal digits.
    fn sharpen(&self, precision: u64) -> Result<BigRational, SolverError>;

    fn max_of(a: Self, b: Self) -> Self {
        if b > a {
            b
        } else {
            a
        }
    }

    fn min_of(a: Self, b: Self) -> Self {
        if b < a {
            b
        } else {
            a
        }
    }
}

impl SolverValue for f64 {
    const IS_EXACT: bool = false;

    fn from_double(value: f64) -> Self {
        value
    }

    fn to_double(&self) -> f64 {
        *self
    }

    fn from_rational(value: &BigRational) -> Self {
        value.to_f64().unwrap_or(f64::NAN)
    }

    fn to_rational(&self) -> BigRational {
        debug_assert!(self.is_finite(), "cannot convert {} to a rational", self);
        BigRational::from_float(*self).unwrap_or_else(BigRational::zero)
    }

    fn sharpen(&self, precision: u64) -> Result<BigRational, SolverError> {
        let value = NotNan::new(*self)
            .map_err(|_| SolverError::PrecisionExceeded { digits: precision })?
            .into_inner();
        if precision > DOUBLE_SHARPEN_DIGITS || !value.is_finite() {
            return Err(SolverError::PrecisionExceeded { digits: precision });
        }
        let integer = value.floor();
        let fraction = value - integer;
        let scaled = (fraction * 10f64.powi(precision as i32)).trunc();
        let truncated = BigInt::from_f64(scaled).ok_or(SolverError::PrecisionExceeded { digits: precision })?;
        let integer = BigInt::from_f64(integer).ok_or(SolverError::PrecisionExceeded { digits: precision })?;
        Ok(sharpen_fraction(precision, truncated) + BigRational::from_integer(integer))
    }
}

impl SolverValue for BigRational {
    const IS_EXACT: bool = true;

    fn from_double(value: f64) -> Self {
        BigRational::from_float(value).unwrap_or_else(BigRational::zero)
    }

    fn to_double(&self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }

    fn from_rational(value: &BigRational) -> Self {
        value.clone()
    }

    fn to_rational(&self) -> BigRational {
        self.clone()
    }

    fn sharpen(&self, precision: u64) -> Result<BigRational, SolverError> {
        let integer = self.floor();
        let fraction = self - &integer;
        let truncated = (fraction * BigRational::from_integer(power_of_ten(precision))).trunc().to_integer();
        Ok(sharpen_fraction(precision, truncated) + integer)
    }
}

fn power_of_ten(exponent: u64) -> BigInt {
    num::pow(BigInt::from(10u32), exponent as usize)
}

/// Simplest rational in `[truncated / 10^p, (truncated + 1) / 10^p]`.
fn sharpen_fraction(precision: u64, truncated: BigInt) -> BigRational {
    let power = power_of_ten(precision);
    let upper = &truncated + BigInt::one();
    let (numerator, denominator) = find_rational(&truncated, &power, &upper, &power);
    BigRational::new(numerator, denominator)
}

/// Simplest fraction in the closed interval `[alpha / beta, gamma / delta]`,
/// found by walking the continued fraction expansions of both endpoints.
fn find_rational(alpha: &BigInt, beta: &BigInt, gamma: &BigInt, delta: &BigInt) -> (BigInt, BigInt) {
    let (alpha_div_beta, alpha_rem_beta) = alpha.div_rem(beta);
    let (gamma_div_delta, gamma_rem_delta) = gamma.div_rem(delta);
    if alpha_div_beta == gamma_div_delta && !alpha_rem_beta.is_zero() {
        let (numerator, denominator) = find_rational(delta, &gamma_rem_delta, beta, &alpha_rem_beta);
        (&alpha_div_beta * &numerator + denominator, numerator)
    } else if alpha_rem_beta.is_zero() {
        (alpha_div_beta, BigInt::one())
    } else {
        (alpha_div_beta + BigInt::one(), BigInt::one())
    }
}

/// Smallest number of decimal digits `p` with `10^-p <= precision`.
pub fn decimal_digits(precision: &BigRational) -> u64 {
    let mut digits = 0u64;
    let mut bound = BigRational::one();
    let ten = BigRational::from_integer(BigInt::from(10u32));
    while &bound > precision && precision.is_positive() {
        bound = bound / &ten;
        digits += 1;
    }
    digits
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn ratio(n: i64, d: i64) -> BigRational {
        BigRational::new(BigInt::from(n), BigInt::from(d))
    }

    #[test]
    fn test_sharpen_recovers_third() {
        let approx = 0.333_333_3f64;
        assert_eq!(approx.sharpen(6).unwrap(), ratio(1, 3));
    }

    #[test]
    fn test_sharpen_keeps_exact_decimal() {
        assert_eq!(0.5f64.sharpen(1).unwrap(), ratio(1, 2));
        assert_eq!(2.0f64.sharpen(3).unwrap(), ratio(2, 1));
    }

    #[test]
    fn test_sharpen_negative_value() {
        assert_eq!((-0.666_666_67f64).sharpen(7).unwrap(), ratio(-2, 3));
    }

    #[test]
    fn test_sharpen_rational() {
        let value = ratio(1_000_001, 3_000_000);
        assert_eq!(value.sharpen(4).unwrap(), ratio(1, 3));
    }

    #[test]
    fn test_double_precision_budget() {
        assert!(matches!(
            0.1f64.sharpen(DOUBLE_SHARPEN_DIGITS + 1),
            Err(SolverError::PrecisionExceeded { .. })
        ));
        assert!(0.1f64.sharpen(DOUBLE_SHARPEN_DIGITS).is_ok());
        assert!(f64::NAN.sharpen(2).is_err());
    }

    #[test]
    fn test_decimal_digits() {
        assert_eq!(decimal_digits(&ratio(1, 1_000_000)), 6);
        assert_eq!(decimal_digits(&ratio(1, 2)), 1);
        assert_eq!(decimal_digits(&ratio(3, 1)), 0);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(<BigRational as SolverValue>::from_double(0.25), ratio(1, 4));
        assert_eq!(ratio(3, 4).to_double(), 0.75);
        assert_eq!(<f64 as SolverValue>::from_rational(&ratio(1, 8)), 0.125);
    }
}
