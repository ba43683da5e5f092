use crate::data::model::ReferenceExponent;
use crate::error::{Result, TraceError};

// ---------------------------------------------------------------------------
// Scientific-notation tokenization
// ---------------------------------------------------------------------------

/// Largest point shift `rebase_by` will materialize. f64 spans roughly
/// 1e-324..1e308, so anything further is not a measurement.
const MAX_DECIMAL_SHIFT: u32 = 400;

/// Whether a value token carries an exponent marker at all.
pub fn has_exponent_marker(token: &str) -> bool {
    token.contains(|c| c == 'e' || c == 'E')
}

/// A literal such as `-2.17498915e-03` split into its structural parts.
///
/// The digit slices borrow from the source token; nothing is converted to a
/// float until [`SciLiteral::rebase`] or [`SciLiteral::value`] is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SciLiteral<'a> {
    pub negative: bool,
    pub int_digits: &'a str,
    pub frac_digits: &'a str,
    pub exponent: i32,
}

impl<'a> SciLiteral<'a> {
    /// Tokenize `[+-]D+[.D*](e|E)[+-]D+`.
    pub fn parse(token: &'a str) -> Result<Self> {
        let malformed = |reason: &str| TraceError::MalformedLiteral {
            literal: token.to_string(),
            reason: reason.to_string(),
        };

        let (mantissa, exponent) = token
            .split_once(|c| c == 'e' || c == 'E')
            .ok_or_else(|| malformed("missing exponent marker"))?;

        let (negative, unsigned) = match mantissa.as_bytes().first() {
            Some(b'-') => (true, &mantissa[1..]),
            Some(b'+') => (false, &mantissa[1..]),
            _ => (false, mantissa),
        };

        let (int_digits, frac_digits) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        if int_digits.is_empty() || !all_digits(int_digits) {
            return Err(malformed("mantissa has no integer digits"));
        }
        if !all_digits(frac_digits) {
            return Err(malformed("non-digit in fractional part"));
        }

        let exponent: i32 = exponent
            .parse()
            .map_err(|_| malformed("exponent is not an integer"))?;

        Ok(Self {
            negative,
            int_digits,
            frac_digits,
            exponent,
        })
    }

    /// True when every mantissa digit is zero (`0.00000000e+00`, `-0.0e+00`, ...).
    pub fn is_zero(&self) -> bool {
        self.int_digits.bytes().chain(self.frac_digits.bytes()).all(|b| b == b'0')
    }

    /// The literal's value at its own scale.
    pub fn value(&self) -> Result<f64> {
        if self.is_zero() {
            return Ok(0.0);
        }
        let text = format!("{}.{}e{}", self.int_digits, self.frac_digits_or_zero(), self.exponent);
        let magnitude: f64 = text.parse().map_err(|_| self.malformed("not representable as f64"))?;
        Ok(self.apply_sign(magnitude))
    }

    /// Re-express the literal in units of `10^reference`.
    pub fn rebase(&self, reference: ReferenceExponent) -> Result<f64> {
        self.rebase_by(reference.offset())
    }

    /// Move the decimal point of the mantissa digits by `exponent + offset`
    /// places and parse the result once.
    ///
    /// With a one-digit integer part, `e_diff = exponent + offset` and:
    /// * `e_diff < 0`: `0.` followed by `|e_diff| - 1` zeros and the digits
    /// * `e_diff + 1 < digits`: a point inserted after `e_diff + 1` digits
    /// * otherwise: the digits right-padded with zeros to `e_diff + 1`
    ///
    /// Longer integer parts shift the point by their extra length.
    pub fn rebase_by(&self, offset: i32) -> Result<f64> {
        if self.is_zero() {
            return Ok(0.0);
        }

        let int_shift = i32::try_from(self.int_digits.len() - 1)
            .map_err(|_| self.malformed("integer part too long"))?;
        let e_diff = self
            .exponent
            .checked_add(offset)
            .and_then(|e| e.checked_add(int_shift))
            .ok_or_else(|| self.malformed("exponent out of range"))?;
        if e_diff.unsigned_abs() > MAX_DECIMAL_SHIFT {
            return Err(self.malformed("rebased magnitude outside f64 range"));
        }

        let mut digits = String::with_capacity(self.int_digits.len() + self.frac_digits.len());
        digits.push_str(self.int_digits);
        digits.push_str(self.frac_digits);

        let text = if e_diff < 0 {
            let zeros = (e_diff.unsigned_abs() - 1) as usize;
            format!("0.{}{}", "0".repeat(zeros), digits)
        } else {
            let point = e_diff as usize + 1;
            if point < digits.len() {
                let (head, tail) = digits.split_at(point);
                format!("{head}.{tail}")
            } else {
                let padding = point - digits.len();
                digits.extend(std::iter::repeat('0').take(padding));
                digits
            }
        };

        let magnitude: f64 = text.parse().map_err(|_| self.malformed("rebased digits failed to parse"))?;
        Ok(self.apply_sign(magnitude))
    }

    fn frac_digits_or_zero(&self) -> &str {
        if self.frac_digits.is_empty() {
            "0"
        } else {
            self.frac_digits
        }
    }

    fn apply_sign(&self, magnitude: f64) -> f64 {
        if self.negative {
            -magnitude
        } else {
            magnitude
        }
    }

    fn malformed(&self, reason: &str) -> TraceError {
        let sign = if self.negative { "-" } else { "" };
        TraceError::MalformedLiteral {
            literal: format!("{sign}{}.{}e{}", self.int_digits, self.frac_digits, self.exponent),
            reason: reason.to_string(),
        }
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Convenience entry points used by the reader
// ---------------------------------------------------------------------------

/// Parse a token at its own scale.
pub fn parse_plain(token: &str) -> Result<f64> {
    SciLiteral::parse(token)?.value()
}

/// Parse a token and rebase it onto `reference`.
pub fn parse_rebased(token: &str, reference: ReferenceExponent) -> Result<f64> {
    SciLiteral::parse(token)?.rebase(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        if b == 0.0 {
            return a == 0.0;
        }
        ((a - b) / b).abs() < 1e-12
    }

    #[test]
    fn tokenizes_sign_digits_and_exponent() {
        let lit = SciLiteral::parse("-2.17498915e-03").unwrap();
        assert!(lit.negative);
        assert_eq!(lit.int_digits, "2");
        assert_eq!(lit.frac_digits, "17498915");
        assert_eq!(lit.exponent, -3);

        let lit = SciLiteral::parse("5.00000000e+02").unwrap();
        assert!(!lit.negative);
        assert_eq!(lit.exponent, 2);
    }

    #[test]
    fn rejects_malformed_tokens() {
        for bad in ["abc", "1.2", "e-03", "1.2e", "1.2e-x3", "1.x2e-03", "--1.0e+00"] {
            assert!(
                matches!(SciLiteral::parse(bad), Err(TraceError::MalformedLiteral { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn rebases_onto_reference_scale() {
        let reference = ReferenceExponent::new(-4);
        assert_eq!(parse_rebased("5.00000000e-03", reference).unwrap(), 50.0);
        assert_eq!(parse_rebased("-2.17498915e-03", reference).unwrap(), -21.7498915);
        assert_eq!(parse_rebased("1.50000000e-06", reference).unwrap(), 0.015);
    }

    #[test]
    fn zero_literals_are_exact_for_any_reference() {
        for r in [-20, -4, 0, 7, 20] {
            let reference = ReferenceExponent::new(r);
            let neg = parse_rebased("-0.00000000e+00", reference).unwrap();
            let pos = parse_rebased("0.00000000e+00", reference).unwrap();
            assert_eq!(neg, 0.0);
            assert_eq!(pos, 0.0);
            assert!(neg.is_sign_positive());
        }
    }

    #[test]
    fn matches_float_scaling_across_offsets() {
        let mantissas = ["7.12345678", "-3.00000001", "9.99999999", "1.00000000"];
        for m in mantissas {
            let base: f64 = m.parse().unwrap();
            for e_diff in -20..=20 {
                // split e_diff between the literal's exponent and the offset
                let exponent = e_diff / 2;
                let offset = e_diff - exponent;
                let token = format!("{m}e{exponent:+03}");
                let got = SciLiteral::parse(&token).unwrap().rebase_by(offset).unwrap();
                let want = base * 10f64.powi(e_diff);
                assert!(close(got, want), "{token} offset {offset}: {got} vs {want}");
            }
        }
    }

    #[test]
    fn digit_length_boundaries_do_not_fail() {
        let lit = SciLiteral::parse("4.25000000e+00").unwrap();
        // e_diff = -1: "0." with no padding zeros
        assert_eq!(lit.rebase_by(-1).unwrap(), 0.425);
        // e_diff = len(digits) - 1: exactly integral, no point inserted
        assert_eq!(lit.rebase_by(8).unwrap(), 425000000.0);
        // one past: zero padded
        assert_eq!(lit.rebase_by(9).unwrap(), 4250000000.0);
    }

    #[test]
    fn absurd_exponents_are_rejected_without_padding() {
        let reference = ReferenceExponent::new(-4);
        for bad in ["1.00000000e+300000000", "1.00000000e-2000000000", "-7.5e+401"] {
            assert!(
                matches!(parse_rebased(bad, reference), Err(TraceError::MalformedLiteral { .. })),
                "{bad} should be rejected"
            );
        }
        // still inside the f64 range
        assert_eq!(parse_rebased("1.00000000e+300", ReferenceExponent::new(0)).unwrap(), 1e300);
        assert_eq!(parse_rebased("1.00000000e-300", ReferenceExponent::new(0)).unwrap(), 1e-300);
    }

    #[test]
    fn multi_digit_integer_part_keeps_magnitude() {
        let lit = SciLiteral::parse("12.5e-03").unwrap();
        assert_eq!(lit.rebase_by(4).unwrap(), 125.0);
    }

    #[test]
    fn plain_parse_keeps_own_scale() {
        assert_eq!(parse_plain("5.00000000e-03").unwrap(), 5.0e-3);
        assert_eq!(parse_plain("-1.25E+01").unwrap(), -12.5);
    }
}
