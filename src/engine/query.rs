use serde::Serialize;
use time::Date;

use super::apply::Engine;
use super::model::action::ActionId;
use super::model::adjustment::{
    TaxStatus, TransactionAdjustment,
};
use super::model::tx::{Account, Security};

/// Ledger query filter. All criteria are conjunctive; a default filter
/// matches every non-reversed row.
#[derive(Default, Clone, Debug)]
pub struct AdjustmentFilter {
    pub security: Option<Security>,
    pub account: Option<Account>,
    pub action_id: Option<ActionId>,
    pub from: Option<Date>,
    pub to: Option<Date>,
    // Reversed rows are audit records; hidden unless asked for.
    pub include_reversed: bool,
}

impl AdjustmentFilter {
    fn matches(&self, adj: &TransactionAdjustment) -> bool {
        if !self.include_reversed && adj.is_reversed() {
            return false;
        }
        if self.security.as_ref().is_some_and(|s| *s != adj.security) {
            return false;
        }
        if self.account.as_ref().is_some_and(|a| *a != adj.account) {
            return false;
        }
        if self.action_id.is_some_and(|id| id != adj.action_id) {
            return false;
        }
        if self.from.is_some_and(|d| adj.effective_date < d) {
            return false;
        }
        if self.to.is_some_and(|d| adj.effective_date > d) {
            return false;
        }
        true
    }
}

#[derive(Serialize, PartialEq, Eq, Clone, Debug)]
pub struct DividendRow {
    pub dividend_per_share: String,
    pub shares_eligible: String,
    pub total_dividend: String,
    pub tax_status: String,
}

#[derive(Serialize, PartialEq, Eq, Clone, Debug)]
pub struct ReversalRow {
    pub reversed_at: String,
    pub reason: String,
    pub actor: String,
}

/// One ledger row rendered for reporting. Quantities and amounts are
/// decimal strings, so no precision is lost crossing a JSON boundary.
#[derive(Serialize, PartialEq, Eq, Clone, Debug)]
pub struct AdjustmentRow {
    pub id: u64,
    pub action_id: ActionId,
    pub lot: String,
    pub kind: String,
    pub security: Security,
    pub account: Account,
    pub effective_date: String,
    pub original_shares: String,
    pub original_price: String,
    pub adjusted_shares: String,
    pub adjusted_price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dividend: Option<DividendRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cash_in_lieu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_gain: Option<String>,
    pub fifo_lot_order: u32,
    pub cost_basis_method: String,
    pub reversed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reversal: Option<ReversalRow>,
}

fn tax_status_str(status: TaxStatus) -> &'static str {
    match status {
        TaxStatus::Qualified => "qualified",
        TaxStatus::Ordinary => "ordinary",
    }
}

impl AdjustmentRow {
    fn from_adjustment(adj: &TransactionAdjustment) -> AdjustmentRow {
        AdjustmentRow {
            id: adj.id,
            action_id: adj.action_id,
            lot: adj.lot.to_string(),
            kind: adj.kind.to_string(),
            security: adj.security.clone(),
            account: adj.account.clone(),
            effective_date: adj.effective_date.to_string(),
            original_shares: adj.original_shares.to_string(),
            original_price: adj.original_price.to_string(),
            adjusted_shares: adj.adjusted_shares.to_string(),
            adjusted_price: adj.adjusted_price.to_string(),
            dividend: adj.dividend.as_ref().map(|div| DividendRow {
                dividend_per_share: div.dividend_per_share.to_string(),
                shares_eligible: div.shares_eligible.to_string(),
                total_dividend: div.total_dividend.to_string(),
                tax_status: tax_status_str(div.tax_status).to_string(),
            }),
            cash_in_lieu: adj.cash_in_lieu.map(|c| c.to_string()),
            realized_gain: adj.realized_gain.map(|g| g.to_string()),
            fifo_lot_order: adj.fifo_lot_order,
            cost_basis_method: "fifo".to_string(),
            reversed: adj.is_reversed(),
            reversal: adj.reversal.as_ref().map(|rev| ReversalRow {
                reversed_at: rev.reversed_at.to_string(),
                reason: rev.reason.clone(),
                actor: rev.actor.clone(),
            }),
        }
    }
}

impl Engine {
    /// Queries the adjustment ledger, sorted by effective date with row id
    /// as the tie-break.
    pub fn adjustments(&self, filter: &AdjustmentFilter) -> Vec<AdjustmentRow> {
        let mut adjs: Vec<TransactionAdjustment> = self
            .store
            .adjustments()
            .into_iter()
            .filter(|adj| filter.matches(adj))
            .collect();
        adjs.sort_by_key(|adj| (adj.effective_date, adj.id));
        adjs.iter().map(AdjustmentRow::from_adjustment).collect()
    }
}
