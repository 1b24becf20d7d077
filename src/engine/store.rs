use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use itertools::Itertools;
use time::Date;

use crate::util::date::now_utc;
use crate::util::decimal::{GreaterEqualZeroDecimal, PosDecimal};

use super::error::EngineError;
use super::lots::{AppliedActionRows, LotAdjust, SyntheticOpen};
use super::model::action::{
    ActionId, ActionSource, ActionSpecifics, ActionStatus, CorporateAction,
};
use super::model::adjustment::{
    AdjustmentId, AdjustmentKind, CostBasisMethod, DividendInfo, LotId, LotRef,
    ReversalInfo, SyntheticLot, TransactionAdjustment,
};
use super::model::tx::{Account, Security, Transaction};

/// Read-only view onto the external transaction subsystem. The engine never
/// writes through this; every corporate-action effect lives in the
/// adjustment ledger instead.
pub trait TransactionSource: Send + Sync {
    /// All buys and sells for one (security, account), sorted in FIFO
    /// order, with trade dates on or before `as_of`.
    fn list_transactions(
        &self,
        security: &str,
        account: &str,
        as_of: Date,
    ) -> Vec<Transaction>;

    /// Every account holding (or having held) the security. Empty means
    /// the instrument is unknown.
    fn accounts(&self, security: &str) -> Vec<Account>;
}

/// In-memory TransactionSource, for embedding and tests.
#[derive(Default)]
pub struct MemoryTransactionSource {
    txs: Mutex<Vec<Transaction>>,
}

impl MemoryTransactionSource {
    pub fn new() -> MemoryTransactionSource {
        MemoryTransactionSource::default()
    }

    pub fn add(&self, tx: Transaction) {
        self.txs.lock().unwrap().push(tx);
    }
}

impl TransactionSource for MemoryTransactionSource {
    fn list_transactions(
        &self,
        security: &str,
        account: &str,
        as_of: Date,
    ) -> Vec<Transaction> {
        let txs = self.txs.lock().unwrap();
        let mut out: Vec<Transaction> = txs
            .iter()
            .filter(|tx| {
                tx.security == security
                    && tx.account == account
                    && tx.trade_date <= as_of
            })
            .cloned()
            .collect();
        out.sort();
        out
    }

    fn accounts(&self, security: &str) -> Vec<Account> {
        let txs = self.txs.lock().unwrap();
        txs.iter()
            .filter(|tx| tx.security == security)
            .map(|tx| tx.account.clone())
            .sorted()
            .dedup()
            .collect()
    }
}

/// Registration payload for a new corporate action. The store assigns the
/// id and the initial pending status.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct NewAction {
    pub security: Security,
    pub specifics: ActionSpecifics,
    pub ex_date: Date,
    pub record_date: Date,
    pub pay_date: Date,
    pub description: String,
    pub source: ActionSource,
}

/// One not-yet-persisted ledger row, produced by the Applier and written by
/// `commit_apply`.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct NewAdjustment {
    pub lot: LotRef,
    pub kind: AdjustmentKind,
    pub security: Security,
    pub account: Account,
    pub effective_date: Date,
    pub original_shares: GreaterEqualZeroDecimal,
    pub original_price: GreaterEqualZeroDecimal,
    pub adjusted_shares: GreaterEqualZeroDecimal,
    pub adjusted_price: GreaterEqualZeroDecimal,
    pub dividend: Option<DividendInfo>,
    pub cash_in_lieu: Option<GreaterEqualZeroDecimal>,
    pub realized_gain: Option<GreaterEqualZeroDecimal>,
    pub fifo_lot_order: u32,
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct NewSyntheticLot {
    pub source_lot: LotRef,
    pub security: Security,
    pub account: Account,
    pub shares: PosDecimal,
    pub cost_basis: GreaterEqualZeroDecimal,
    pub acquired_date: Date,
}

#[derive(Default)]
struct LedgerTables {
    actions: BTreeMap<ActionId, CorporateAction>,
    adjustments: BTreeMap<AdjustmentId, TransactionAdjustment>,
    synthetic_lots: BTreeMap<LotId, SyntheticLot>,
    next_action_id: u64,
    next_adjustment_id: u64,
    next_lot_id: u64,
    // Monotonic application sequence; orders the reversal stack.
    next_apply_seq: u64,
}

impl LedgerTables {
    fn affected_lots(&self, action_id: ActionId) -> Vec<LotRef> {
        let mut lots: Vec<LotRef> = self
            .adjustments
            .values()
            .filter(|adj| adj.action_id == action_id)
            .map(|adj| adj.lot)
            .collect();
        lots.extend(
            self.synthetic_lots
                .values()
                .filter(|lot| lot.action_id == action_id)
                .map(|lot| LotRef::Synthetic(lot.id)),
        );
        lots
    }
}

/// The adjustment ledger: corporate actions, adjustment rows, and synthetic
/// lots, all behind one mutex. Commit methods do their status checks and
/// writes inside a single critical section, so a partially-applied action
/// is never observable.
///
/// Rows are append-only. Reversal marks rows rather than deleting them.
#[derive(Default)]
pub struct LedgerStore {
    tables: Mutex<LedgerTables>,
}

impl LedgerStore {
    pub fn new() -> LedgerStore {
        LedgerStore::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerTables> {
        self.tables.lock().unwrap()
    }

    /// Validates and persists a new action in pending status.
    pub fn insert_action(
        &self,
        new: NewAction,
    ) -> Result<CorporateAction, EngineError> {
        let mut tables = self.lock();
        tables.next_action_id += 1;
        let action = CorporateAction {
            id: tables.next_action_id,
            security: new.security,
            specifics: new.specifics,
            ex_date: new.ex_date,
            record_date: new.record_date,
            pay_date: new.pay_date,
            description: new.description,
            source: new.source,
            status: ActionStatus::Pending,
        };
        action.validate().map_err(EngineError::Validation)?;
        tables.actions.insert(action.id, action.clone());
        Ok(action)
    }

    pub fn action(&self, id: ActionId) -> Option<CorporateAction> {
        self.lock().actions.get(&id).cloned()
    }

    pub fn actions(&self) -> Vec<CorporateAction> {
        self.lock().actions.values().cloned().collect()
    }

    pub fn adjustments(&self) -> Vec<TransactionAdjustment> {
        self.lock().adjustments.values().cloned().collect()
    }

    pub fn rows_for_action(
        &self,
        action_id: ActionId,
    ) -> Vec<TransactionAdjustment> {
        self.lock()
            .adjustments
            .values()
            .filter(|adj| adj.action_id == action_id)
            .cloned()
            .collect()
    }

    pub fn synthetic_lots(&self) -> Vec<SyntheticLot> {
        self.lock().synthetic_lots.values().cloned().collect()
    }

    /// Latest effective date over the security's non-reversed rows. The
    /// high-water mark for action ordering: a new action must cut off
    /// strictly after it.
    pub fn latest_effective_date(&self, security: &str) -> Option<Date> {
        self.lock()
            .adjustments
            .values()
            .filter(|adj| !adj.is_reversed() && adj.security == security)
            .map(|adj| adj.effective_date)
            .max()
    }

    /// The replay inputs for one (security, account): non-reversed applied
    /// rows grouped per action in application order, plus the live
    /// synthetic-lot opens.
    pub fn lot_context(
        &self,
        security: &str,
        account: &str,
    ) -> (Vec<AppliedActionRows>, Vec<SyntheticOpen>) {
        let tables = self.lock();

        let mut per_action: BTreeMap<u64, AppliedActionRows> = BTreeMap::new();
        for adj in tables.adjustments.values() {
            if adj.is_reversed()
                || adj.security != security
                || adj.account != account
            {
                continue;
            }
            // Cash dividends never change lot state. Their snapshots are
            // taken at the record date, so replaying one at the ex date
            // would clobber a sell falling between the two.
            if adj.kind == AdjustmentKind::CashDividend {
                continue;
            }
            let Some(action) = tables.actions.get(&adj.action_id) else {
                continue;
            };
            let Some(seq) = action.applied_seq() else {
                continue;
            };
            per_action
                .entry(seq)
                .or_insert_with(|| AppliedActionRows {
                    action_id: adj.action_id,
                    ex_date: action.ex_date,
                    seq,
                    rows: Vec::new(),
                })
                .rows
                .push(LotAdjust {
                    lot: adj.lot,
                    adjusted_shares: adj.adjusted_shares,
                    adjusted_price: adj.adjusted_price,
                });
        }

        let mut synthetics = Vec::new();
        for lot in tables.synthetic_lots.values() {
            if lot.is_reversed || lot.security != security || lot.account != account
            {
                continue;
            }
            let Some(action) = tables.actions.get(&lot.action_id) else {
                continue;
            };
            synthetics.push(SyntheticOpen {
                lot_id: lot.id,
                effective_date: action.ex_date,
                acquired_date: lot.acquired_date,
                shares: lot.shares,
                price: lot.price_per_share(),
            });
        }

        (per_action.into_values().collect(), synthetics)
    }

    /// Writes every row and synthetic lot of one application, and flips the
    /// action to applied, atomically. On any error nothing is written and
    /// the action stays pending.
    pub fn commit_apply(
        &self,
        action_id: ActionId,
        rows: Vec<NewAdjustment>,
        synthetics: Vec<NewSyntheticLot>,
    ) -> Result<usize, EngineError> {
        let mut tables = self.lock();

        let action = tables
            .actions
            .get(&action_id)
            .ok_or(EngineError::UnknownAction(action_id))?;
        if action.status != ActionStatus::Pending {
            return Err(EngineError::State {
                action: action_id,
                status: action.status.name().to_string(),
                expected: "pending".to_string(),
            });
        }

        // Backstop against double-application. A pending action can have
        // rows here only through a bookkeeping bug; refuse to stack them.
        for row in &rows {
            let dup = tables.adjustments.values().any(|adj| {
                adj.action_id == action_id && adj.lot == row.lot && !adj.is_reversed()
            });
            if dup {
                return Err(EngineError::DuplicateAdjustment {
                    lot: row.lot.to_string(),
                    action: action_id,
                });
            }
        }

        let written = rows.len();
        for row in rows {
            tables.next_adjustment_id += 1;
            let id = tables.next_adjustment_id;
            tables.adjustments.insert(
                id,
                TransactionAdjustment {
                    id,
                    lot: row.lot,
                    action_id,
                    kind: row.kind,
                    security: row.security,
                    account: row.account,
                    effective_date: row.effective_date,
                    original_shares: row.original_shares,
                    original_price: row.original_price,
                    adjusted_shares: row.adjusted_shares,
                    adjusted_price: row.adjusted_price,
                    dividend: row.dividend,
                    cash_in_lieu: row.cash_in_lieu,
                    realized_gain: row.realized_gain,
                    fifo_lot_order: row.fifo_lot_order,
                    cost_basis_method: CostBasisMethod::Fifo,
                    reversal: None,
                },
            );
        }
        for lot in synthetics {
            tables.next_lot_id += 1;
            let id = tables.next_lot_id;
            tables.synthetic_lots.insert(
                id,
                SyntheticLot {
                    id,
                    action_id,
                    source_lot: lot.source_lot,
                    security: lot.security,
                    account: lot.account,
                    shares: lot.shares,
                    cost_basis: lot.cost_basis,
                    acquired_date: lot.acquired_date,
                    is_reversed: false,
                },
            );
        }

        tables.next_apply_seq += 1;
        let seq = tables.next_apply_seq;
        let status = ActionStatus::Applied { applied_at: now_utc(), seq };
        if let Some(action) = tables.actions.get_mut(&action_id) {
            action.status = status;
        }
        Ok(written)
    }

    /// Marks every live row and synthetic lot of one applied action as
    /// reversed, and flips the action status, atomically.
    ///
    /// Reversals run strictly most-recently-applied-first per lot: if a
    /// later non-reversed action has touched any lot this one touched
    /// (including synthetic lots this one created), the reversal is
    /// refused until that action is reversed first.
    pub fn commit_reverse(
        &self,
        action_id: ActionId,
        reason: &str,
        actor: &str,
    ) -> Result<usize, EngineError> {
        let mut tables = self.lock();

        let action = tables
            .actions
            .get(&action_id)
            .ok_or(EngineError::UnknownAction(action_id))?;
        let (applied_at, seq) = match &action.status {
            ActionStatus::Applied { applied_at, seq } => (*applied_at, *seq),
            other => {
                return Err(EngineError::State {
                    action: action_id,
                    status: other.name().to_string(),
                    expected: "applied".to_string(),
                });
            }
        };

        let affected = tables.affected_lots(action_id);
        let mut blocking: Option<(u64, ActionId)> = None;
        for adj in tables.adjustments.values() {
            if adj.is_reversed() || adj.action_id == action_id {
                continue;
            }
            if !affected.contains(&adj.lot) {
                continue;
            }
            let later_seq = tables
                .actions
                .get(&adj.action_id)
                .and_then(|a| a.applied_seq())
                .filter(|s| *s > seq);
            if let Some(s) = later_seq {
                if blocking.map_or(true, |(bs, _)| s < bs) {
                    blocking = Some((s, adj.action_id));
                }
            }
        }
        if let Some((_, blocking_action)) = blocking {
            return Err(EngineError::ReversalOrder {
                action: action_id,
                blocking_action,
            });
        }

        let reversed_at = now_utc();
        let reversal = ReversalInfo {
            reversed_at,
            reason: reason.to_string(),
            actor: actor.to_string(),
        };

        let mut reversed = 0;
        for adj in tables.adjustments.values_mut() {
            if adj.action_id == action_id && !adj.is_reversed() {
                adj.reversal = Some(reversal.clone());
                reversed += 1;
            }
        }
        for lot in tables.synthetic_lots.values_mut() {
            if lot.action_id == action_id {
                lot.is_reversed = true;
            }
        }

        let status = ActionStatus::Reversed {
            applied_at,
            seq,
            reversed_at,
            reversal_reason: reason.to_string(),
        };
        if let Some(action) = tables.actions.get_mut(&action_id) {
            action.status = status;
        }
        Ok(reversed)
    }
}
