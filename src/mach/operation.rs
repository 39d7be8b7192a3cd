use super::asm::{Arith1, Arith2};

/// ## Numeric semantics
///
/// One home for every arithmetic rule so the generator's constant
/// folding and the machine's execution cannot drift apart. All values
/// are IEEE doubles; division by zero propagates infinities and NaN.
/// Bitwise forms truncate to 64-bit integers first, the way the game's
/// host runtime does.

pub fn arith2(op: Arith2, a: f64, b: f64) -> f64 {
    use Arith2::*;
    match op {
        Add => a + b,
        Sub => a - b,
        Mul => a * b,
        Div => a / b,
        Mod => {
            // IC10 mod is a true modulus: the result takes the sign
            // of the divisor
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r + b
            } else {
                r
            }
        }
        Min => a.min(b),
        Max => a.max(b),
        Atan2 => a.atan2(b),
        And => ((a as i64) & (b as i64)) as f64,
        Or => ((a as i64) | (b as i64)) as f64,
        Xor => ((a as i64) ^ (b as i64)) as f64,
        Nor => !((a as i64) | (b as i64)) as f64,
        Sll => ((a as i64) << ((b as i64) & 63)) as f64,
        Srl => (((a as i64) as u64) >> ((b as i64) & 63)) as f64,
        Sra => ((a as i64) >> ((b as i64) & 63)) as f64,
        Slt => bool_val(a < b),
        Sle => bool_val(a <= b),
        Sgt => bool_val(a > b),
        Sge => bool_val(a >= b),
        Seq => bool_val(a == b),
        Sne => bool_val(a != b),
    }
}

pub fn arith1(op: Arith1, a: f64) -> f64 {
    use Arith1::*;
    match op {
        Abs => a.abs(),
        Ceil => a.ceil(),
        Floor => a.floor(),
        Round => a.round(),
        Trunc => a.trunc(),
        Sqrt => a.sqrt(),
        Exp => a.exp(),
        Log => a.ln(),
        Sin => a.sin(),
        Cos => a.cos(),
        Tan => a.tan(),
        Asin => a.asin(),
        Acos => a.acos(),
        Atan => a.atan(),
        Sgn => {
            if a == 0.0 {
                0.0
            } else {
                a.signum()
            }
        }
        Seqz => bool_val(a == 0.0),
        Snez => bool_val(a != 0.0),
    }
}

fn bool_val(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

pub fn truthy(a: f64) -> bool {
    a != 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparisons_produce_unit_values() {
        assert_eq!(arith2(Arith2::Slt, 1.0, 2.0), 1.0);
        assert_eq!(arith2(Arith2::Sge, 1.0, 2.0), 0.0);
        assert_eq!(arith1(Arith1::Seqz, 0.0), 1.0);
    }

    #[test]
    fn test_division_by_zero_propagates() {
        assert!(arith2(Arith2::Div, 1.0, 0.0).is_infinite());
        assert!(arith2(Arith2::Div, 0.0, 0.0).is_nan());
    }

    #[test]
    fn test_mod_takes_divisor_sign() {
        assert_eq!(arith2(Arith2::Mod, -1.0, 3.0), 2.0);
        assert_eq!(arith2(Arith2::Mod, 7.0, 3.0), 1.0);
    }

    #[test]
    fn test_bitwise_truncates() {
        assert_eq!(arith2(Arith2::And, 6.9, 3.2), 2.0);
        assert_eq!(arith2(Arith2::Sll, 1.0, 4.0), 16.0);
        assert_eq!(arith2(Arith2::Srl, 16.0, 2.0), 4.0);
        assert_eq!(arith2(Arith2::Nor, 0.0, 0.0), -1.0);
    }

    #[test]
    fn test_sgn_of_zero() {
        assert_eq!(arith1(Arith1::Sgn, 0.0), 0.0);
        assert_eq!(arith1(Arith1::Sgn, -4.2), -1.0);
    }
}
