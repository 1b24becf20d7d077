use rust_decimal::Decimal;
use time::Date;

use crate::util::basic::SError;
use crate::util::decimal::{GreaterEqualZeroDecimal, PosDecimal};

use super::model::action::ActionId;
use super::model::adjustment::{LotId, LotRef};
use super::model::tx::{Transaction, TxAction};

/// An open lot in FIFO order, as of some date. Quantity and price reflect
/// every non-reversed adjustment applied on or before that date, never the
/// raw transaction alone.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct OpenLot {
    pub lot: LotRef,
    pub acquired_date: Date,
    pub shares: PosDecimal,
    pub price: GreaterEqualZeroDecimal,
}

impl OpenLot {
    pub fn basis(&self) -> GreaterEqualZeroDecimal {
        GreaterEqualZeroDecimal::from(self.shares) * self.price
    }
}

/// The recorded per-lot effect of one already-applied action, replayed
/// against the queue at the action's ex date.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct LotAdjust {
    pub lot: LotRef,
    pub adjusted_shares: GreaterEqualZeroDecimal,
    pub adjusted_price: GreaterEqualZeroDecimal,
}

/// All non-reversed rows of one applied action, for one (security, account).
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct AppliedActionRows {
    pub action_id: ActionId,
    pub ex_date: Date,
    // Application sequence; orders same-day actions deterministically.
    pub seq: u64,
    pub rows: Vec<LotAdjust>,
}

/// A synthetic lot opened into this security by a merger/spinoff. It enters
/// the queue at the creating action's ex date, but takes its FIFO position
/// from the carried acquisition date.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct SyntheticOpen {
    pub lot_id: LotId,
    pub effective_date: Date,
    pub acquired_date: Date,
    pub shares: PosDecimal,
    pub price: GreaterEqualZeroDecimal,
}

// Queue entries keep a composite tie-break so ordering is total and
// reproducible: acquisition date, then real-before-synthetic, then id.
#[derive(Clone, Debug)]
struct QueueLot {
    lot: LotRef,
    acquired_date: Date,
    shares: Decimal,
    price: GreaterEqualZeroDecimal,
}

impl QueueLot {
    fn sort_key(&self) -> (Date, u8, u64) {
        match self.lot {
            LotRef::Tx(id) => (self.acquired_date, 0, id),
            LotRef::Synthetic(id) => (self.acquired_date, 1, id),
        }
    }
}

enum Event<'a> {
    // entry_date is when the lot becomes consumable: the trade date for
    // real buys, the creating action's effective date for synthetics.
    Acquire { entry_date: Date, lot: QueueLot },
    Sell(&'a Transaction),
    Adjust(&'a AppliedActionRows),
}

impl Event<'_> {
    // (date, class, tie): acquisitions settle into the queue before
    // same-day sells consume, and adjustments replay last on their ex date.
    fn sort_key(&self) -> (Date, u8, u64) {
        match self {
            Event::Acquire { entry_date, lot } => {
                let (_, _, id) = lot.sort_key();
                (*entry_date, 0, id)
            }
            Event::Sell(tx) => (tx.trade_date, 1, tx.id),
            Event::Adjust(rows) => (rows.ex_date, 2, rows.seq),
        }
    }
}

fn insert_in_order(queue: &mut Vec<QueueLot>, lot: QueueLot) {
    let key = lot.sort_key();
    let pos = queue.partition_point(|q| q.sort_key() <= key);
    queue.insert(pos, lot);
}

fn consume_fifo(queue: &mut Vec<QueueLot>, tx: &Transaction) -> Result<(), SError> {
    let mut remaining = *tx.shares;
    while !remaining.is_zero() {
        let Some(front) = queue.first_mut() else {
            return Err(format!(
                "Sell of {} shares of {} on {} exceeds the open position by {}",
                tx.shares, tx.security, tx.trade_date, remaining
            ));
        };
        if front.shares <= remaining {
            remaining -= front.shares;
            queue.remove(0);
        } else {
            front.shares -= remaining;
            remaining = Decimal::ZERO;
        }
    }
    Ok(())
}

fn replay_adjust(queue: &mut Vec<QueueLot>, rows: &AppliedActionRows) {
    for row in &rows.rows {
        let Some(idx) = queue.iter().position(|q| q.lot == row.lot) else {
            // A row for a lot this replay never opened would mean the
            // ledger and the transaction history disagree.
            tracing::warn!(
                "Adjustment for action {} references unknown lot {}",
                rows.action_id,
                row.lot
            );
            continue;
        };
        if row.adjusted_shares.is_zero() {
            // Closed/converted
            queue.remove(idx);
        } else {
            queue[idx].shares = *row.adjusted_shares;
            queue[idx].price = row.adjusted_price;
        }
    }
}

/// Produces the FIFO queue of open lots for one (security, account) as of
/// `as_of`, by pure replay of the transaction history plus the non-reversed
/// adjustment ledger. No mutable running state is kept anywhere; calling
/// this repeatedly on the same inputs yields the same sequence.
///
/// An empty result is a valid terminal state (e.g. a fully-closed
/// position), not an error. An over-sold history is an error.
pub fn select_open_lots(
    txs: &[Transaction],
    applied: &[AppliedActionRows],
    synthetics: &[SyntheticOpen],
    as_of: Date,
) -> Result<Vec<OpenLot>, SError> {
    let mut events: Vec<Event> = Vec::new();

    for tx in txs {
        if tx.trade_date > as_of {
            continue;
        }
        match tx.action {
            TxAction::Buy => events.push(Event::Acquire {
                entry_date: tx.trade_date,
                lot: QueueLot {
                    lot: LotRef::Tx(tx.id),
                    acquired_date: tx.trade_date,
                    shares: *tx.shares,
                    price: tx.amount_per_share,
                },
            }),
            TxAction::Sell => events.push(Event::Sell(tx)),
        }
    }
    // Synthetic lots enter the event stream at their effective date, not
    // their (earlier) acquired date, so sells that predate the conversion
    // can never consume them.
    for syn in synthetics {
        if syn.effective_date > as_of {
            continue;
        }
        events.push(Event::Acquire {
            entry_date: syn.effective_date,
            lot: QueueLot {
                lot: LotRef::Synthetic(syn.lot_id),
                acquired_date: syn.acquired_date,
                shares: *syn.shares,
                price: syn.price,
            },
        });
    }
    for rows in applied {
        if rows.ex_date > as_of {
            continue;
        }
        events.push(Event::Adjust(rows));
    }

    events.sort_by_key(|ev| ev.sort_key());

    let mut queue: Vec<QueueLot> = Vec::new();
    for ev in events {
        match ev {
            Event::Acquire { lot, .. } => insert_in_order(&mut queue, lot),
            Event::Sell(tx) => consume_fifo(&mut queue, tx)?,
            Event::Adjust(rows) => replay_adjust(&mut queue, rows),
        }
    }

    let mut open = Vec::with_capacity(queue.len());
    for q in queue {
        // Replay only ever leaves positive share counts in the queue.
        let shares = PosDecimal::try_from(q.shares)
            .map_err(|e| format!("Lot {} has invalid open shares: {}", q.lot, e))?;
        open.push(OpenLot {
            lot: q.lot,
            acquired_date: q.acquired_date,
            shares,
            price: q.price,
        });
    }
    Ok(open)
}
