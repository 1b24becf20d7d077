use std::fmt::Display;

use rust_decimal::Decimal;
use time::Date;

use crate::util::decimal::{GreaterEqualZeroDecimal, PosDecimal};

pub type Security = String;
pub type Account = String;
pub type TxId = u64;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum TxAction {
    Buy,
    Sell,
}

impl TxAction {
    fn pretty_str(&self) -> &str {
        match self {
            TxAction::Buy => "Buy",
            TxAction::Sell => "Sell",
        }
    }
}

impl Display for TxAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pretty_str())
    }
}

/// An immutable record of a buy or sell, owned by the external transaction
/// subsystem. This engine only ever reads these. All corporate-action effects
/// are recorded as separate TransactionAdjustment rows referencing the
/// transaction by id, never by editing it.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Transaction {
    pub id: TxId,
    pub security: Security,
    pub account: Account,
    pub action: TxAction,
    pub shares: PosDecimal,
    pub amount_per_share: GreaterEqualZeroDecimal,
    pub commission: GreaterEqualZeroDecimal,
    pub trade_date: Date,
}

impl Transaction {
    // Positive for buys, negative for sells.
    pub fn signed_shares(&self) -> Decimal {
        match self.action {
            TxAction::Buy => *self.shares,
            TxAction::Sell => -*self.shares,
        }
    }

    pub fn total_amount(&self) -> Decimal {
        let share_value = *self.shares * *self.amount_per_share;
        match self.action {
            TxAction::Buy => share_value + *self.commission,
            TxAction::Sell => share_value - *self.commission,
        }
    }
}

impl PartialOrd for Transaction {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// FIFO ordering: trade date ascending, with the transaction id as the
// tie-break for same-day entries. This must stay deterministic; the whole
// adjustment ledger is keyed off positions in this order.
impl Ord for Transaction {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let date_cmp = self.trade_date.cmp(&other.trade_date);
        match date_cmp {
            std::cmp::Ordering::Less | std::cmp::Ordering::Greater => date_cmp,
            std::cmp::Ordering::Equal => self.id.cmp(&other.id),
        }
    }
}
