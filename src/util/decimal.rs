use std::{fmt::Display, marker::PhantomData, ops::Deref};

use rust_decimal::Decimal;

use self::constraint::{GreaterEqualZero, Pos};

// These were deprecated as methods on Decimal, so re-implement them.
// The deprecated versions don't do zero checks, which can result in
// weird behaviour with negative zero.
pub fn is_positive(d: &Decimal) -> bool {
    d.is_sign_positive() && !d.is_zero()
}

pub fn is_negative(d: &Decimal) -> bool {
    d.is_sign_negative() && !d.is_zero()
}

pub fn dollar_precision_str(d: &Decimal) -> String {
    format!("{:.2}", d)
}

// Rounds to the smallest currency unit (cents). Only ever applied at the
// display/ledger boundary. Mid-calculation values keep full precision.
pub fn round_to_cent(d: &Decimal) -> Decimal {
    d.round_dp(2)
}

pub trait DecConstraint {
    fn is_ok(d: &Decimal) -> bool;
}

pub mod constraint {
    use rust_decimal::Decimal;

    use super::{is_positive, DecConstraint};

    #[derive(PartialEq, Eq, Clone, Copy, Debug)]
    pub struct GreaterEqualZero(());
    impl DecConstraint for GreaterEqualZero {
        fn is_ok(d: &Decimal) -> bool {
            d.is_sign_positive() || d.is_zero()
        }
    }

    #[derive(PartialEq, Eq, Clone, Copy, Debug)]
    pub struct Pos(());
    impl DecConstraint for Pos {
        fn is_ok(d: &Decimal) -> bool {
            is_positive(d)
        }
    }
}

// A constrained instance of Decimal. This can only be created through
// ::try_from, which will enforce the DecConstraint. This gives a convenient
// and type-safe way to enforce what values any given quantity can contain
// (share counts, prices and cash amounts are never negative here).
//
// PhantomData is size zero, and just keeps the compiler happy about the
// otherwise unused generic parameter.
pub struct ConstrainedDecimal<CONSTRAINT>(Decimal, PhantomData<CONSTRAINT>);

impl<CONSTRAINT: DecConstraint> TryFrom<Decimal> for ConstrainedDecimal<CONSTRAINT> {
    type Error = String;

    fn try_from(d: Decimal) -> Result<Self, Self::Error> {
        if CONSTRAINT::is_ok(&d) {
            Ok(Self(d, PhantomData))
        } else {
            Err(format!(
                "{} does not match constraints of {}",
                d,
                std::any::type_name::<CONSTRAINT>()
            ))
        }
    }
}

impl<CONSTRAINT: DecConstraint> Deref for ConstrainedDecimal<CONSTRAINT> {
    type Target = Decimal;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<CONSTRAINT: DecConstraint> Display for ConstrainedDecimal<CONSTRAINT> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<CONSTRAINT: DecConstraint> std::fmt::Debug for ConstrainedDecimal<CONSTRAINT> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl<CONSTRAINT: DecConstraint> PartialEq for ConstrainedDecimal<CONSTRAINT> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<CONSTRAINT: DecConstraint> Eq for ConstrainedDecimal<CONSTRAINT> {}

impl<CONSTRAINT: DecConstraint> PartialOrd for ConstrainedDecimal<CONSTRAINT> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl<CONSTRAINT: DecConstraint> Ord for ConstrainedDecimal<CONSTRAINT> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl<CONSTRAINT: DecConstraint> Clone for ConstrainedDecimal<CONSTRAINT> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<CONSTRAINT: DecConstraint> Copy for ConstrainedDecimal<CONSTRAINT> {}

impl std::ops::Add for ConstrainedDecimal<GreaterEqualZero> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        // GEZ + GEZ will never violate its own constraint
        GreaterEqualZeroDecimal::try_from(*self + *rhs).unwrap()
    }
}

impl std::ops::AddAssign for ConstrainedDecimal<GreaterEqualZero> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::Mul for ConstrainedDecimal<GreaterEqualZero> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        // GEZ * GEZ will never violate its own constraint
        GreaterEqualZeroDecimal::try_from(*self * *rhs).unwrap()
    }
}

impl From<ConstrainedDecimal<constraint::Pos>>
    for ConstrainedDecimal<GreaterEqualZero>
{
    fn from(value: ConstrainedDecimal<constraint::Pos>) -> Self {
        GreaterEqualZeroDecimal::try_from(*value).unwrap()
    }
}

impl ConstrainedDecimal<GreaterEqualZero> {
    pub fn zero() -> Self {
        Self(Decimal::ZERO, PhantomData)
    }

    pub fn div(self, rhs: ConstrainedDecimal<constraint::Pos>) -> Self {
        // GEZ / Pos will never violate its own constraint, or divide by zero
        GreaterEqualZeroDecimal::try_from(*self / *rhs).unwrap()
    }

    // None if rhs exceeds self. Lets callers floor subtractions at zero
    // (carried basis after cash consideration) without dropping the sign
    // information entirely.
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        GreaterEqualZeroDecimal::try_from(*self - *rhs).ok()
    }

    pub fn sub_or_zero(self, rhs: Self) -> Self {
        self.checked_sub(rhs).unwrap_or_else(Self::zero)
    }
}

impl std::ops::Mul for ConstrainedDecimal<Pos> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        // Pos * Pos will never violate its own constraint
        PosDecimal::try_from(*self * *rhs).unwrap()
    }
}

impl ConstrainedDecimal<Pos> {
    pub fn one() -> Self {
        PosDecimal::try_from(rust_decimal_macros::dec!(1)).unwrap()
    }

    pub fn div(self, rhs: Self) -> Self {
        // Pos / Pos will never violate its own constraint
        PosDecimal::try_from(*self / *rhs).unwrap()
    }
}

// Convenience aliases
pub type GreaterEqualZeroDecimal = ConstrainedDecimal<constraint::GreaterEqualZero>;
pub type PosDecimal = ConstrainedDecimal<constraint::Pos>;

#[macro_export]
macro_rules! pdec {
    ($arg:literal) => {{
        use rust_decimal_macros::dec;
        $crate::util::decimal::PosDecimal::try_from(dec!($arg)).unwrap()
    }};
}

#[macro_export]
macro_rules! gezdec {
    ($arg:literal) => {{
        use rust_decimal_macros::dec;
        $crate::util::decimal::GreaterEqualZeroDecimal::try_from(dec!($arg)).unwrap()
    }};
}
