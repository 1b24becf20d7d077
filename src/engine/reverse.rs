use std::collections::BTreeSet;

use super::apply::Engine;
use super::error::EngineError;
use super::lots::select_open_lots;
use super::model::action::{ActionId, ActionStatus};
use super::model::adjustment::LotRef;
use crate::util::date::today_local;

impl Engine {
    /// Reverses an applied action by marking its ledger rows and synthetic
    /// lots reversed, atomically. Rows are never deleted; the reversal is
    /// itself part of the audit trail. Returns the number of rows reversed.
    ///
    /// Reversals run most-recently-applied-first per lot. Reversing further
    /// back requires unwinding the later actions on those lots first.
    pub fn reverse(
        &self,
        action_id: ActionId,
        reason: &str,
        actor: &str,
    ) -> Result<usize, EngineError> {
        let action = self
            .store
            .action(action_id)
            .ok_or(EngineError::UnknownAction(action_id))?;
        if !matches!(action.status, ActionStatus::Applied { .. }) {
            return Err(EngineError::State {
                action: action_id,
                status: action.status.name().to_string(),
                expected: "applied".to_string(),
            });
        }

        let mut secs = vec![action.security.clone()];
        if let Some(target) = action.target_security() {
            secs.push(target.clone());
        }
        let _claim = self.claim_securities(secs)?;

        self.check_reversal_consistency(action_id)?;

        let reversed = self.store.commit_reverse(action_id, reason, actor)?;
        tracing::info!(
            "Reversed action {} ({}) on {}: {} row(s), reason: {}",
            action_id,
            action.specifics,
            action.security,
            reversed,
            reason
        );
        Ok(reversed)
    }

    /// Replays every affected (security, account) with this action's
    /// effects excluded. Sells recorded after the action may have consumed
    /// shares that only existed because of it (e.g. post-split shares);
    /// reversing then would leave an oversold history, so refuse.
    fn check_reversal_consistency(
        &self,
        action_id: ActionId,
    ) -> Result<(), EngineError> {
        let own_synthetics: BTreeSet<u64> = self
            .store
            .synthetic_lots()
            .iter()
            .filter(|lot| lot.action_id == action_id)
            .map(|lot| lot.id)
            .collect();

        let mut pairs: BTreeSet<(String, String)> = self
            .store
            .rows_for_action(action_id)
            .iter()
            .map(|row| (row.security.clone(), row.account.clone()))
            .collect();
        pairs.extend(
            self.store
                .synthetic_lots()
                .iter()
                .filter(|lot| lot.action_id == action_id)
                .map(|lot| (lot.security.clone(), lot.account.clone())),
        );

        let as_of = today_local();
        for (security, account) in pairs {
            let txs = self.tx_source.list_transactions(&security, &account, as_of);
            let (mut applied, mut synthetics) =
                self.store.lot_context(&security, &account);
            applied.retain(|rows| rows.action_id != action_id);
            synthetics.retain(|syn| !own_synthetics.contains(&syn.lot_id));
            // Later sells of converted-away lots would also surface here,
            // as rows referencing lots the reduced replay never opens.
            for rows in &mut applied {
                rows.rows.retain(|row| match row.lot {
                    LotRef::Synthetic(id) => !own_synthetics.contains(&id),
                    LotRef::Tx(_) => true,
                });
            }

            select_open_lots(&txs, &applied, &synthetics, as_of).map_err(|e| {
                EngineError::Validation(format!(
                    "Reversing action {action_id} leaves an inconsistent \
                     history for {security}/{account}: {e}"
                ))
            })?;
        }
        Ok(())
    }
}
