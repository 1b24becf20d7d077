use std::collections::HashSet;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::log::WriteHandle;
use crate::util::decimal::dollar_precision_str;

use super::calc::{adjust_lot, adjustment_kind, LotSnapshot};
use super::error::EngineError;
use super::lots::select_open_lots;
use super::model::action::{ActionId, ActionStatus, CorporateAction};
use super::model::tx::Security;
use super::store::{
    LedgerStore, NewAction, NewAdjustment, NewSyntheticLot, TransactionSource,
};

/// The corporate-action engine. Owns the adjustment ledger and a read-only
/// handle onto the transaction subsystem.
///
/// Apply and reverse hold a claim on every security the action touches for
/// their full duration, so two operations on the same security can never
/// interleave. A contended claim fails fast with a Concurrency error rather
/// than queueing; retrying is the caller's decision.
pub struct Engine {
    pub(crate) tx_source: Arc<dyn TransactionSource>,
    pub(crate) store: LedgerStore,
    busy_securities: Mutex<HashSet<Security>>,
}

/// Holds the claimed securities until dropped.
pub(crate) struct SecurityClaim<'a> {
    busy: &'a Mutex<HashSet<Security>>,
    held: Vec<Security>,
}

impl Drop for SecurityClaim<'_> {
    fn drop(&mut self) {
        let mut busy = self.busy.lock().unwrap();
        for sec in &self.held {
            busy.remove(sec);
        }
    }
}

impl Engine {
    pub fn new(tx_source: Arc<dyn TransactionSource>) -> Engine {
        Engine {
            tx_source,
            store: LedgerStore::new(),
            busy_securities: Mutex::new(HashSet::new()),
        }
    }

    /// Validates and persists a new action in pending status. Nothing is
    /// computed against lots until `apply`.
    pub fn register_action(
        &self,
        new: NewAction,
    ) -> Result<CorporateAction, EngineError> {
        let action = self.store.insert_action(new)?;
        tracing::info!(
            "Registered action {} ({}) on {}, ex date {}",
            action.id,
            action.specifics,
            action.security,
            action.ex_date
        );
        Ok(action)
    }

    pub fn action(&self, id: ActionId) -> Result<CorporateAction, EngineError> {
        self.store.action(id).ok_or(EngineError::UnknownAction(id))
    }

    pub fn actions(&self) -> Vec<CorporateAction> {
        self.store.actions()
    }

    /// The FIFO queue of open lots for one (security, account) as of a
    /// date, reflecting all non-reversed adjustments.
    pub fn open_lots(
        &self,
        security: &str,
        account: &str,
        as_of: time::Date,
    ) -> Result<Vec<super::lots::OpenLot>, EngineError> {
        let txs = self.tx_source.list_transactions(security, account, as_of);
        let (applied, synthetics) = self.store.lot_context(security, account);
        select_open_lots(&txs, &applied, &synthetics, as_of)
            .map_err(EngineError::Validation)
    }

    pub(crate) fn claim_securities(
        &self,
        mut secs: Vec<Security>,
    ) -> Result<SecurityClaim<'_>, EngineError> {
        secs.sort();
        secs.dedup();
        let mut busy = self.busy_securities.lock().unwrap();
        for sec in &secs {
            if busy.contains(sec) {
                return Err(EngineError::Concurrency(sec.clone()));
            }
        }
        for sec in &secs {
            busy.insert(sec.clone());
        }
        Ok(SecurityClaim { busy: &self.busy_securities, held: secs })
    }

    pub fn apply(&self, action_id: ActionId) -> Result<usize, EngineError> {
        self.apply_with_notices(action_id, &mut WriteHandle::stderr_write_handle())
    }

    /// Applies a pending action to every eligible open lot, atomically.
    /// Returns the number of adjustment rows written.
    ///
    /// Applying an already-applied action is a no-op returning Ok(0), so
    /// redelivered feed events are harmless. An action matching zero open
    /// lots still transitions to applied (as a no-op) and is reported
    /// through `notices`.
    pub fn apply_with_notices(
        &self,
        action_id: ActionId,
        notices: &mut WriteHandle,
    ) -> Result<usize, EngineError> {
        let action = self
            .store
            .action(action_id)
            .ok_or(EngineError::UnknownAction(action_id))?;
        let mut secs = vec![action.security.clone()];
        if let Some(target) = action.target_security() {
            secs.push(target.clone());
        }
        let _claim = self.claim_securities(secs)?;

        // Re-read under the claim. A concurrent apply of the same action
        // may have committed between the lookup and the claim; the loser
        // must see the applied status, not recompute against it.
        let action = self
            .store
            .action(action_id)
            .ok_or(EngineError::UnknownAction(action_id))?;
        match &action.status {
            ActionStatus::Pending => (),
            ActionStatus::Applied { .. } => {
                tracing::debug!("Action {} already applied; no-op", action_id);
                return Ok(0);
            }
            ActionStatus::Reversed { .. } => {
                return Err(EngineError::State {
                    action: action_id,
                    status: action.status.name().to_string(),
                    expected: "pending".to_string(),
                });
            }
        }

        let cutoff = action.eligibility_cutoff();
        // Ledger rows snapshot absolute post-adjustment state, so replay
        // is only coherent when actions land in effective-date order. A
        // backdated action would replay underneath already-taken
        // snapshots; reverse back to its date and re-register instead.
        if let Some(latest) = self.store.latest_effective_date(&action.security) {
            if cutoff <= latest {
                return Err(EngineError::Validation(format!(
                    "Action {} on {} has eligibility cutoff {}, on or before \
                     the latest applied adjustment ({}); reverse back to that \
                     date and re-register in order",
                    action_id, action.security, cutoff, latest
                )));
            }
        }

        let accounts = self.tx_source.accounts(&action.security);
        if accounts.is_empty() {
            return Err(EngineError::UnknownInstrument(action.security.clone()));
        }
        let kind = adjustment_kind(&action.specifics);
        let mut rows: Vec<NewAdjustment> = Vec::new();
        let mut synthetics: Vec<NewSyntheticLot> = Vec::new();

        for account in accounts {
            let txs =
                self.tx_source.list_transactions(&action.security, &account, cutoff);
            let (applied, synth_opens) =
                self.store.lot_context(&action.security, &account);
            // An over-sold history is a data error in the transaction
            // subsystem, not a calculation failure of this action.
            let open = select_open_lots(&txs, &applied, &synth_opens, cutoff)
                .map_err(EngineError::Validation)?;

            for (order, lot) in open.iter().enumerate() {
                let snapshot = LotSnapshot { shares: lot.shares, price: lot.price };
                let outcome = adjust_lot(&snapshot, &action.specifics)
                    .map_err(EngineError::Calculation)?;
                tracing::debug!(
                    "Action {}: lot {} ({} @ {}) -> {} @ {}",
                    action_id,
                    lot.lot,
                    lot.shares,
                    lot.price,
                    outcome.adjusted_shares,
                    outcome.adjusted_price
                );

                if let Some(cil) = outcome.cash_in_lieu {
                    let _ = writeln!(
                        notices,
                        "Lot {} of {}: fractional shares settled as ${} cash in lieu",
                        lot.lot,
                        action.security,
                        dollar_precision_str(&cil)
                    );
                }
                if let Some(pos) = &outcome.new_position {
                    let _ = writeln!(
                        notices,
                        "Lot {} of {}: opened {} shares of {} (basis ${})",
                        lot.lot,
                        action.security,
                        pos.shares,
                        pos.security,
                        dollar_precision_str(&pos.cost_basis)
                    );
                    synthetics.push(NewSyntheticLot {
                        source_lot: lot.lot,
                        security: pos.security.clone(),
                        account: account.clone(),
                        shares: pos.shares,
                        cost_basis: pos.cost_basis,
                        acquired_date: lot.acquired_date,
                    });
                }

                rows.push(NewAdjustment {
                    lot: lot.lot,
                    kind,
                    security: action.security.clone(),
                    account: account.clone(),
                    effective_date: action.ex_date,
                    original_shares: lot.shares.into(),
                    original_price: lot.price,
                    adjusted_shares: outcome.adjusted_shares,
                    adjusted_price: outcome.adjusted_price,
                    dividend: outcome.dividend,
                    cash_in_lieu: outcome.cash_in_lieu,
                    realized_gain: outcome.realized_gain,
                    fifo_lot_order: order as u32,
                });
            }
        }

        if rows.is_empty() {
            let _ = writeln!(
                notices,
                "Action {} ({}) on {} matched no open lots as of {}; \
                 recorded as an applied no-op",
                action_id, action.specifics, action.security, cutoff
            );
        }

        let written = self.store.commit_apply(action_id, rows, synthetics)?;
        tracing::info!(
            "Applied action {} ({}) on {}: {} adjustment(s)",
            action_id,
            action.specifics,
            action.security,
            written
        );
        Ok(written)
    }
}
