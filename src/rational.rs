//! Exact rational numbers for widths, heights and costs.
//!
//! All distribution math runs on [`Rational`] (an arbitrary-precision
//! fraction). Floats never enter the pipeline: cost comparisons decide break
//! placement, and a rounding difference between platforms would change the
//! chosen breaks.

use num_bigint::BigInt;
use num_rational::BigRational;

use crate::error::{DistributionError, Result};

/// Arbitrary-precision fraction used for every width, height and cost.
pub type Rational = BigRational;

/// Build a rational from an integer.
pub fn int(n: i64) -> Rational {
    Rational::from_integer(BigInt::from(n))
}

/// Build the reduced fraction `numer / denom`.
///
/// # Panics
/// Panics if `denom` is zero.
pub fn ratio(numer: i64, denom: i64) -> Rational {
    Rational::new(BigInt::from(numer), BigInt::from(denom))
}

/// Parse a rational from text.
///
/// Accepts integers (`"740"`), fractions (`"3/4"`) and exact decimals
/// (`"12.75"`, converted digit-for-digit, never through `f64`).
pub fn parse(text: &str) -> Result<Rational> {
    let invalid = || DistributionError::InvalidRational {
        value: text.to_string(),
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }

    if let Some((numer, denom)) = trimmed.split_once('/') {
        let numer: BigInt = numer.trim().parse().map_err(|_| invalid())?;
        let denom: BigInt = denom.trim().parse().map_err(|_| invalid())?;
        if denom == BigInt::from(0) {
            return Err(invalid());
        }
        return Ok(Rational::new(numer, denom));
    }

    if let Some((whole, frac)) = trimmed.split_once('.') {
        let negative = whole.starts_with('-');
        let whole_digits = whole.strip_prefix(['-', '+']).unwrap_or(whole);
        let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if (whole_digits.is_empty() && frac.is_empty())
            || !all_digits(whole_digits)
            || !all_digits(frac)
        {
            return Err(invalid());
        }
        let numer: BigInt = format!("{whole_digits}{frac}")
            .parse()
            .map_err(|_| invalid())?;
        let denom = num_traits::pow(BigInt::from(10u32), frac.len());
        let value = Rational::new(numer, denom);
        return Ok(if negative { -value } else { value });
    }

    let numer: BigInt = trimmed.parse().map_err(|_| invalid())?;
    Ok(Rational::from_integer(numer))
}

/// Serde codec storing rationals as canonical strings (`"3/4"`, `"740"`).
///
/// Integers are also accepted on input. Use with
/// `#[serde(with = "crate::rational::serde_str")]`, or the `option` / `vec`
/// sub-modules for wrapped values.
pub mod serde_str {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{int, parse, Rational};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(i64),
        Text(String),
    }

    impl Repr {
        fn into_rational<E: de::Error>(self) -> std::result::Result<Rational, E> {
            match self {
                Repr::Int(n) => Ok(int(n)),
                Repr::Text(s) => parse(&s).map_err(E::custom),
            }
        }
    }

    pub fn serialize<S: Serializer>(
        value: &Rational,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Rational, D::Error> {
        Repr::deserialize(deserializer)?.into_rational()
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<Rational>,
            serializer: S,
        ) -> std::result::Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_some(&v.to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> std::result::Result<Option<Rational>, D::Error> {
            Option::<Repr>::deserialize(deserializer)?
                .map(Repr::into_rational)
                .transpose()
        }
    }

    pub mod vec {
        use super::*;

        pub fn serialize<S: Serializer>(
            values: &[Rational],
            serializer: S,
        ) -> std::result::Result<S::Ok, S::Error> {
            serializer.collect_seq(values.iter().map(|v| v.to_string()))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> std::result::Result<Vec<Rational>, D::Error> {
            Vec::<Repr>::deserialize(deserializer)?
                .into_iter()
                .map(Repr::into_rational)
                .collect()
        }
    }
}
