use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::util::basic::SError;
use crate::util::decimal::{round_to_cent, GreaterEqualZeroDecimal, PosDecimal};

use super::model::action::{
    ActionSpecifics, CashDividendSpecifics, ConversionSpecifics, SplitRatio,
    StockDividendSpecifics,
};
use super::model::adjustment::{AdjustmentKind, DividendInfo, TaxStatus};
use super::model::tx::Security;

// Splits and stock dividends must preserve cost basis exactly, up to the
// precision lost dividing the per-share price (e.g. a 3-for-1 split of a
// $50 lot prices at a repeating decimal). Tolerance is one cent.
pub const BASIS_TOLERANCE: Decimal = dec!(0.01);

/// A lot's open position at the moment an action applies: what the
/// Calculator sees. Always the post-adjustment state of any earlier
/// actions, never the raw transaction if adjustments have stacked.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct LotSnapshot {
    pub shares: PosDecimal,
    pub price: GreaterEqualZeroDecimal,
}

impl LotSnapshot {
    pub fn basis(&self) -> GreaterEqualZeroDecimal {
        GreaterEqualZeroDecimal::from(self.shares) * self.price
    }
}

/// A position to open in another security (merger/spinoff target).
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct NewPosition {
    pub security: Security,
    pub shares: PosDecimal,
    pub cost_basis: GreaterEqualZeroDecimal,
}

/// The computed effect of one action on one lot. Pure data; persistence is
/// the Applier's job.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct AdjustmentOutcome {
    pub adjusted_shares: GreaterEqualZeroDecimal,
    pub adjusted_price: GreaterEqualZeroDecimal,
    // Cash paid out to the holder (dividend or merger consideration),
    // excluding cash-in-lieu.
    pub cash_amount: GreaterEqualZeroDecimal,
    pub cash_in_lieu: Option<GreaterEqualZeroDecimal>,
    pub realized_gain: Option<GreaterEqualZeroDecimal>,
    pub dividend: Option<DividendInfo>,
    pub new_position: Option<NewPosition>,
}

impl AdjustmentOutcome {
    fn unchanged_position(lot: &LotSnapshot) -> AdjustmentOutcome {
        AdjustmentOutcome {
            adjusted_shares: lot.shares.into(),
            adjusted_price: lot.price,
            cash_amount: GreaterEqualZeroDecimal::zero(),
            cash_in_lieu: None,
            realized_gain: None,
            dividend: None,
            new_position: None,
        }
    }
}

// Share quantities and prices keep full precision; amounts actually paid
// out (dividends, merger consideration, cash-in-lieu) settle in cents.
fn to_cash(amount: GreaterEqualZeroDecimal) -> GreaterEqualZeroDecimal {
    // rounding a non-negative value stays non-negative
    GreaterEqualZeroDecimal::try_from(round_to_cent(&amount)).unwrap()
}

pub fn adjustment_kind(specifics: &ActionSpecifics) -> AdjustmentKind {
    match specifics {
        ActionSpecifics::Split(_) => AdjustmentKind::Split,
        ActionSpecifics::CashDividend(_) => AdjustmentKind::CashDividend,
        ActionSpecifics::StockDividend(_) => AdjustmentKind::StockDividend,
        ActionSpecifics::Merger(_) => AdjustmentKind::Merger,
        // The spinoff source row is a pure basis reallocation; the share
        // count does not change.
        ActionSpecifics::Spinoff(_) => AdjustmentKind::BasisOnly,
    }
}

/// Dispatch over the action payload. Exhaustive match, so a new action type
/// cannot be forgotten here without a compile error.
pub fn adjust_lot(
    lot: &LotSnapshot,
    specifics: &ActionSpecifics,
) -> Result<AdjustmentOutcome, SError> {
    match specifics {
        ActionSpecifics::Split(ratio) => split_adjustment(lot, ratio),
        ActionSpecifics::CashDividend(div) => Ok(cash_dividend_adjustment(lot, div)),
        ActionSpecifics::StockDividend(div) => stock_dividend_adjustment(lot, div),
        ActionSpecifics::Merger(conv) => conversion_adjustment(lot, conv, true),
        ActionSpecifics::Spinoff(conv) => conversion_adjustment(lot, conv, false),
    }
}

fn check_basis_invariance(
    what: &str,
    old_basis: GreaterEqualZeroDecimal,
    new_shares: PosDecimal,
    new_price: GreaterEqualZeroDecimal,
) -> Result<(), SError> {
    let new_basis = *new_price * *new_shares;
    let drift = (new_basis - *old_basis).abs();
    if drift > BASIS_TOLERANCE {
        return Err(format!(
            "{what} drifted cost basis by {drift} (from {old_basis} to {new_basis})"
        ));
    }
    Ok(())
}

/// `adjusted_shares = shares * post/pre`, `adjusted_price = price * pre/post`.
/// Cost basis is invariant; that equality is the primary correctness check
/// for this action type. Reverse splits use the same formula.
pub fn split_adjustment(
    lot: &LotSnapshot,
    ratio: &SplitRatio,
) -> Result<AdjustmentOutcome, SError> {
    let adjusted_shares = lot.shares * ratio.pre_to_post_factor();
    let adjusted_price =
        lot.price * GreaterEqualZeroDecimal::from(ratio.post_to_pre_factor());

    check_basis_invariance(
        &format!("{ratio} split"),
        lot.basis(),
        adjusted_shares,
        adjusted_price,
    )?;

    Ok(AdjustmentOutcome {
        adjusted_shares: adjusted_shares.into(),
        adjusted_price,
        ..AdjustmentOutcome::unchanged_position(lot)
    })
}

/// No change to shares or price. `cash = eligible shares * amount per share`.
/// The lot snapshot must already reflect holdings as of the record date;
/// eligibility cutoff selection is the caller's job.
pub fn cash_dividend_adjustment(
    lot: &LotSnapshot,
    div: &CashDividendSpecifics,
) -> AdjustmentOutcome {
    let total = to_cash(
        GreaterEqualZeroDecimal::from(lot.shares)
            * GreaterEqualZeroDecimal::from(div.amount_per_share),
    );
    let tax_status =
        if div.qualified { TaxStatus::Qualified } else { TaxStatus::Ordinary };

    AdjustmentOutcome {
        cash_amount: total,
        dividend: Some(DividendInfo {
            dividend_per_share: div.amount_per_share,
            shares_eligible: lot.shares,
            total_dividend: total,
            tax_status,
        }),
        ..AdjustmentOutcome::unchanged_position(lot)
    }
}

/// An implicit `(1 + shares_per_share)-for-1` split. Any fractional
/// remainder below a whole share is settled as cash-in-lieu at fair market
/// value, rather than silently dropped; without an FMV the fractional
/// shares are kept.
pub fn stock_dividend_adjustment(
    lot: &LotSnapshot,
    div: &StockDividendSpecifics,
) -> Result<AdjustmentOutcome, SError> {
    // 1 + positive is always positive
    let factor =
        PosDecimal::try_from(Decimal::ONE + *div.shares_per_share).unwrap();
    let raw_shares = lot.shares * factor;
    let adjusted_price =
        lot.price * GreaterEqualZeroDecimal::from(PosDecimal::one().div(factor));

    check_basis_invariance(
        "stock dividend",
        lot.basis(),
        raw_shares,
        adjusted_price,
    )?;

    let (adjusted_shares, cash_in_lieu) = match div.fmv_per_share {
        Some(fmv) => {
            let whole = (*raw_shares).floor();
            let frac = *raw_shares - whole;
            if frac.is_zero() {
                ((*raw_shares).try_into().unwrap(), None)
            } else {
                let cil = to_cash(
                    GreaterEqualZeroDecimal::try_from(frac).unwrap()
                        * GreaterEqualZeroDecimal::from(fmv),
                );
                // whole is a floor of a positive value
                (GreaterEqualZeroDecimal::try_from(whole).unwrap(), Some(cil))
            }
        }
        None => (raw_shares.into(), None),
    };

    Ok(AdjustmentOutcome {
        adjusted_shares,
        adjusted_price,
        cash_in_lieu,
        ..AdjustmentOutcome::unchanged_position(lot)
    })
}

/// Merger and spinoff share the same per-lot math: `new shares = shares *
/// exchange_ratio`, cash consideration reduces the carried basis (floored
/// at zero), and cash in excess of basis is realized gain. A merger closes
/// the source lot; a spinoff keeps the source shares while the basis moves
/// to the target position.
pub fn conversion_adjustment(
    lot: &LotSnapshot,
    conv: &ConversionSpecifics,
    close_source: bool,
) -> Result<AdjustmentOutcome, SError> {
    let cash =
        to_cash(GreaterEqualZeroDecimal::from(lot.shares) * conv.cash_per_share);
    let old_basis = lot.basis();
    let carried_basis = old_basis.sub_or_zero(cash);
    let realized_gain = GreaterEqualZeroDecimal::try_from(*cash - *old_basis)
        .ok()
        .map(to_cash)
        .filter(|g| !g.is_zero());

    let raw_new_shares = lot.shares * conv.exchange_ratio;

    let (target_shares, target_basis, cash_in_lieu) = match conv.fmv_per_share {
        Some(fmv) => {
            let whole = (*raw_new_shares).floor();
            let frac = *raw_new_shares - whole;
            if frac.is_zero() {
                (*raw_new_shares, carried_basis, None)
            } else {
                let cil = to_cash(
                    GreaterEqualZeroDecimal::try_from(frac).unwrap()
                        * GreaterEqualZeroDecimal::from(fmv),
                );
                // The carried basis follows the whole shares proportionally;
                // the fractional remainder's sliver is consumed by the
                // cash-in-lieu settlement.
                let whole_basis = GreaterEqualZeroDecimal::try_from(
                    *carried_basis * whole / *raw_new_shares,
                )
                .unwrap();
                (whole, whole_basis, Some(cil))
            }
        }
        None => (*raw_new_shares, carried_basis, None),
    };

    let new_position = match PosDecimal::try_from(target_shares) {
        Ok(shares) => Some(NewPosition {
            security: conv.target.clone(),
            shares,
            cost_basis: target_basis,
        }),
        // Everything went to cash-in-lieu; no target position opens.
        Err(_) => None,
    };

    let (adjusted_shares, adjusted_price) = if close_source {
        (GreaterEqualZeroDecimal::zero(), GreaterEqualZeroDecimal::zero())
    } else {
        // Spinoff: share count intact, basis fully reallocated to the
        // target position.
        (lot.shares.into(), GreaterEqualZeroDecimal::zero())
    };

    Ok(AdjustmentOutcome {
        adjusted_shares,
        adjusted_price,
        cash_amount: cash,
        cash_in_lieu,
        realized_gain,
        dividend: None,
        new_position,
    })
}
