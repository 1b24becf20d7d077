use std::fmt::Display;

use time::{Date, OffsetDateTime};

use crate::util::decimal::{GreaterEqualZeroDecimal, PosDecimal};

use super::action::ActionId;
use super::tx::{Account, Security, TxId};

pub type AdjustmentId = u64;
pub type LotId = u64;

/// A cost-basis lot. Usually a real buy transaction; synthetic for
/// positions opened by a merger or spinoff, which exist only in this
/// engine's ledger.
#[derive(PartialEq, Eq, Clone, Copy, Hash, Debug)]
pub enum LotRef {
    Tx(TxId),
    Synthetic(LotId),
}

impl Display for LotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LotRef::Tx(id) => write!(f, "tx:{}", id),
            LotRef::Synthetic(id) => write!(f, "synth:{}", id),
        }
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum AdjustmentKind {
    Split,
    CashDividend,
    StockDividend,
    Merger,
    // Pure cost-basis reallocation with no change in share count. Used for
    // the source-side row of a spinoff.
    BasisOnly,
}

impl AdjustmentKind {
    pub fn pretty_str(&self) -> &str {
        match self {
            AdjustmentKind::Split => "split",
            AdjustmentKind::CashDividend => "cash_dividend",
            AdjustmentKind::StockDividend => "stock_dividend",
            AdjustmentKind::Merger => "merger",
            AdjustmentKind::BasisOnly => "basis_only",
        }
    }
}

impl Display for AdjustmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pretty_str())
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum TaxStatus {
    Qualified,
    Ordinary,
}

// Fixed to FIFO for this engine, but recorded on every row so the ledger
// stays self-describing if other methods are ever added.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum CostBasisMethod {
    Fifo,
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct DividendInfo {
    pub dividend_per_share: PosDecimal,
    pub shares_eligible: PosDecimal,
    pub total_dividend: GreaterEqualZeroDecimal,
    pub tax_status: TaxStatus,
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ReversalInfo {
    pub reversed_at: OffsetDateTime,
    pub reason: String,
    pub actor: String,
}

/// One row of the append-only adjustment ledger: the effect of one
/// corporate action on one lot. Rows are never deleted; reversal is a
/// status flip plus metadata.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct TransactionAdjustment {
    pub id: AdjustmentId,
    pub lot: LotRef,
    pub action_id: ActionId,
    pub kind: AdjustmentKind,
    // Denormalized from the lot, so the ledger is queryable without
    // joining back to the transaction subsystem.
    pub security: Security,
    pub account: Account,
    // The action's ex date; adjustments are queryable by date range.
    pub effective_date: Date,

    // Snapshot of the lot's open position before this action. The source
    // of truth for reversal and audit.
    pub original_shares: GreaterEqualZeroDecimal,
    pub original_price: GreaterEqualZeroDecimal,
    // Post-adjustment state, consumed by downstream readers and by FIFO
    // replay. Zero shares means the lot was closed/converted.
    pub adjusted_shares: GreaterEqualZeroDecimal,
    pub adjusted_price: GreaterEqualZeroDecimal,

    pub dividend: Option<DividendInfo>,
    pub cash_in_lieu: Option<GreaterEqualZeroDecimal>,
    pub realized_gain: Option<GreaterEqualZeroDecimal>,

    // Zero-based position of this lot in the FIFO queue at the moment the
    // action was applied. Lets reversal/audit replay the exact ordering.
    pub fifo_lot_order: u32,
    pub cost_basis_method: CostBasisMethod,

    pub reversal: Option<ReversalInfo>,
}

impl TransactionAdjustment {
    pub fn is_reversed(&self) -> bool {
        self.reversal.is_some()
    }

    pub fn original_basis(&self) -> GreaterEqualZeroDecimal {
        self.original_shares * self.original_price
    }

    pub fn adjusted_basis(&self) -> GreaterEqualZeroDecimal {
        self.adjusted_shares * self.adjusted_price
    }
}

/// A position opened by a merger or spinoff in the target security.
/// Ledger-only: there is no corresponding Transaction row, which keeps the
/// source transaction table untouched while still giving the target a
/// FIFO-eligible cost basis.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct SyntheticLot {
    pub id: LotId,
    pub action_id: ActionId,
    pub source_lot: LotRef,
    pub security: Security,
    pub account: Account,
    pub shares: PosDecimal,
    pub cost_basis: GreaterEqualZeroDecimal,
    // Carried over from the source lot, preserving the holding period.
    pub acquired_date: Date,
    pub is_reversed: bool,
}

impl SyntheticLot {
    pub fn price_per_share(&self) -> GreaterEqualZeroDecimal {
        self.cost_basis.div(self.shares)
    }
}

#[cfg(test)]
mod tests {
    use crate::{gezdec as gez, pdec};

    use super::{LotRef, SyntheticLot};

    #[test]
    fn test_lot_ref_display() {
        assert_eq!(LotRef::Tx(3).to_string(), "tx:3");
        assert_eq!(LotRef::Synthetic(9).to_string(), "synth:9");
    }

    #[test]
    fn test_synthetic_price() {
        let lot = SyntheticLot {
            id: 1,
            action_id: 1,
            source_lot: LotRef::Tx(1),
            security: "BAR".to_string(),
            account: "acct".to_string(),
            shares: pdec!(5),
            cost_basis: gez!(970),
            acquired_date: crate::util::date::pub_testlib::doy_date(2024, 0),
            is_reversed: false,
        };
        assert_eq!(lot.price_per_share(), gez!(194));
    }
}
