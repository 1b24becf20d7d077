use std::fmt::Display;

use super::decimal::PosDecimal;

// A ratio of two positive decimals, kept unreduced so that the original
// terms (e.g. the "2" and "1" of a 2-for-1 split) survive for display.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct PosDecimalRatio {
    pub numerator: PosDecimal,
    pub denominator: PosDecimal,
}

impl PosDecimalRatio {
    pub fn to_posdecimal(&self) -> PosDecimal {
        self.numerator.div(self.denominator)
    }

    pub fn inverse(&self) -> PosDecimalRatio {
        PosDecimalRatio {
            numerator: self.denominator,
            denominator: self.numerator,
        }
    }

    pub fn is_one(&self) -> bool {
        self.numerator == self.denominator
    }
}

// Auto-implements to_string()
impl Display for PosDecimalRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}/{}}}", self.numerator, self.denominator)
    }
}

#[cfg(test)]
mod tests {
    use crate::pdec;

    use super::PosDecimalRatio;

    #[test]
    fn test_ratio() {
        let r = PosDecimalRatio { numerator: pdec!(2), denominator: pdec!(1) };
        assert_eq!(r.to_posdecimal(), pdec!(2));
        assert_eq!(r.inverse().to_posdecimal(), pdec!(0.5));
        assert!(!r.is_one());
        assert!(PosDecimalRatio { numerator: pdec!(3), denominator: pdec!(3) }
            .is_one());
        assert_eq!(r.to_string(), "{2/1}");
    }
}
