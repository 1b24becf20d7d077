use std::sync::Arc;

use corpact::engine::model::action::{
    ActionSpecifics, ConversionSpecifics, StockDividendSpecifics,
};
use corpact::engine::model::adjustment::{AdjustmentKind, LotRef};
use corpact::engine::model::tx::TxAction;
use corpact::engine::query::AdjustmentFilter;
use corpact::engine::store::{MemoryTransactionSource, TransactionSource};
use corpact::engine::testlib::{taction_new, tdiv, ttx, TAction, TTx};
use corpact::engine::{Engine, EngineError};
use corpact::log::WriteHandle;
use corpact::testlib::assert_re;
use corpact::util::date::pub_testlib::doy_date;
use corpact::util::date::set_todays_date_for_test;
use corpact::{gezdec as gez, pdec};

fn day(d: i64) -> time::Date {
    doy_date(2024, d)
}

fn make_engine(txs: Vec<TTx>) -> (Engine, Arc<MemoryTransactionSource>) {
    set_todays_date_for_test(day(60));
    let source = Arc::new(MemoryTransactionSource::new());
    for tx in txs {
        source.add(ttx(tx));
    }
    (Engine::new(source.clone()), source)
}

#[test]
fn test_split_preserves_basis_and_source_txs() {
    let (engine, source) = make_engine(vec![TTx {
        id: 1,
        t_day: 1,
        shares: pdec!(100),
        price: gez!(50),
        ..TTx::default()
    }]);

    let action = engine.register_action(taction_new(TAction::default())).unwrap();
    assert_eq!(engine.apply(action.id).unwrap(), 1);

    let lots = engine.open_lots("FOO", "acct", day(10)).unwrap();
    assert_eq!(lots.len(), 1);
    assert_eq!(lots[0].shares, pdec!(200));
    assert_eq!(lots[0].price, gez!(25));
    assert_eq!(lots[0].basis(), gez!(5000));

    // The transaction subsystem is never written to; the buy still reads
    // exactly as recorded.
    let txs = source.list_transactions("FOO", "acct", day(10));
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].shares, pdec!(100));
    assert_eq!(txs[0].amount_per_share, gez!(50));
}

#[test]
fn test_dividend_on_partially_closed_position() {
    // Lot A is fully consumed by the sell before the record date; only
    // lot B's 30 shares are eligible.
    let (engine, _) = make_engine(vec![
        TTx { id: 1, t_day: 1, shares: pdec!(50), price: gez!(10), ..TTx::default() },
        TTx { id: 2, t_day: 2, shares: pdec!(30), price: gez!(20), ..TTx::default() },
        TTx {
            id: 3,
            t_day: 3,
            act: TxAction::Sell,
            shares: pdec!(50),
            ..TTx::default()
        },
    ]);

    let action = engine
        .register_action(taction_new(TAction {
            specifics: Some(tdiv(pdec!(2), true)),
            ex_day: 5,
            record_day: 6,
            ..TAction::default()
        }))
        .unwrap();
    assert_eq!(engine.apply(action.id).unwrap(), 1);

    let rows = engine.adjustments(&AdjustmentFilter::default());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].lot, "tx:2");
    let div = rows[0].dividend.clone().unwrap();
    assert_eq!(div.shares_eligible, "30");
    assert_eq!(div.total_dividend, "60");
    assert_eq!(div.tax_status, "qualified");
}

#[test]
fn test_redelivered_apply_is_idempotent() {
    let (engine, _) = make_engine(vec![TTx {
        id: 1,
        t_day: 1,
        shares: pdec!(100),
        price: gez!(50),
        ..TTx::default()
    }]);

    let action = engine.register_action(taction_new(TAction::default())).unwrap();
    assert_eq!(engine.apply(action.id).unwrap(), 1);
    // Feed redelivery
    assert_eq!(engine.apply(action.id).unwrap(), 0);
    assert_eq!(engine.apply(action.id).unwrap(), 0);

    assert_eq!(engine.adjustments(&AdjustmentFilter::default()).len(), 1);
    let lots = engine.open_lots("FOO", "acct", day(10)).unwrap();
    assert_eq!(lots[0].shares, pdec!(200));
}

#[test]
fn test_reversal_round_trip_keeps_audit_rows() {
    let (engine, _) = make_engine(vec![TTx {
        id: 1,
        t_day: 1,
        shares: pdec!(100),
        price: gez!(50),
        ..TTx::default()
    }]);

    let action = engine.register_action(taction_new(TAction::default())).unwrap();
    engine.apply(action.id).unwrap();
    assert_eq!(engine.reverse(action.id, "bad ratio from feed", "ops").unwrap(), 1);

    let lots = engine.open_lots("FOO", "acct", day(10)).unwrap();
    assert_eq!(lots[0].shares, pdec!(100));
    assert_eq!(lots[0].price, gez!(50));

    // Hidden from the default view, preserved for audit.
    assert!(engine.adjustments(&AdjustmentFilter::default()).is_empty());
    let rows = engine.adjustments(&AdjustmentFilter {
        include_reversed: true,
        ..AdjustmentFilter::default()
    });
    assert_eq!(rows.len(), 1);
    assert!(rows[0].reversed);
    let rev = rows[0].reversal.clone().unwrap();
    assert_eq!(rev.reason, "bad ratio from feed");
    assert_eq!(rev.actor, "ops");
}

#[test]
fn test_reversal_order_is_enforced_per_lot() {
    let (engine, _) = make_engine(vec![TTx {
        id: 1,
        t_day: 1,
        shares: pdec!(100),
        price: gez!(50),
        ..TTx::default()
    }]);

    let split = engine.register_action(taction_new(TAction::default())).unwrap();
    engine.apply(split.id).unwrap();
    let div = engine
        .register_action(taction_new(TAction {
            specifics: Some(tdiv(pdec!(1), false)),
            ex_day: 7,
            record_day: 8,
            ..TAction::default()
        }))
        .unwrap();
    engine.apply(div.id).unwrap();

    assert_eq!(
        engine.reverse(split.id, "r", "ops").unwrap_err(),
        EngineError::ReversalOrder { action: split.id, blocking_action: div.id }
    );

    engine.reverse(div.id, "r", "ops").unwrap();
    engine.reverse(split.id, "r", "ops").unwrap();
    let lots = engine.open_lots("FOO", "acct", day(20)).unwrap();
    assert_eq!(lots[0].shares, pdec!(100));
    assert_eq!(lots[0].price, gez!(50));
}

#[test]
fn test_merger_with_cash_consideration() {
    let (engine, _) = make_engine(vec![TTx {
        id: 1,
        t_day: 1,
        shares: pdec!(10),
        price: gez!(100),
        ..TTx::default()
    }]);

    let action = engine
        .register_action(taction_new(TAction {
            specifics: Some(ActionSpecifics::Merger(ConversionSpecifics {
                target: "BAR".to_string(),
                exchange_ratio: pdec!(0.5),
                cash_per_share: gez!(3),
                fmv_per_share: None,
            })),
            ..TAction::default()
        }))
        .unwrap();
    assert_eq!(engine.apply(action.id).unwrap(), 1);

    // Source closed out.
    assert!(engine.open_lots("FOO", "acct", day(10)).unwrap().is_empty());
    let rows = engine.adjustments(&AdjustmentFilter::default());
    assert_eq!(rows[0].kind, "merger");
    assert_eq!(rows[0].adjusted_shares, "0");
    assert!(rows[0].realized_gain.is_none());

    // Target opened with the carried basis ($1,000 - $30 cash) and the
    // source lot's acquisition date.
    let bar = engine.open_lots("BAR", "acct", day(10)).unwrap();
    assert_eq!(bar.len(), 1);
    assert!(matches!(bar[0].lot, LotRef::Synthetic(_)));
    assert_eq!(bar[0].shares, pdec!(5));
    assert_eq!(bar[0].basis(), gez!(970));
    assert_eq!(bar[0].acquired_date, day(1));
}

#[test]
fn test_merger_reversal_removes_target_position() {
    let (engine, _) = make_engine(vec![TTx {
        id: 1,
        t_day: 1,
        shares: pdec!(10),
        price: gez!(100),
        ..TTx::default()
    }]);

    let action = engine
        .register_action(taction_new(TAction {
            specifics: Some(ActionSpecifics::Merger(ConversionSpecifics {
                target: "BAR".to_string(),
                exchange_ratio: pdec!(0.5),
                cash_per_share: gez!(0),
                fmv_per_share: None,
            })),
            ..TAction::default()
        }))
        .unwrap();
    engine.apply(action.id).unwrap();
    engine.reverse(action.id, "wrong target", "ops").unwrap();

    assert!(engine.open_lots("BAR", "acct", day(10)).unwrap().is_empty());
    let foo = engine.open_lots("FOO", "acct", day(10)).unwrap();
    assert_eq!(foo.len(), 1);
    assert_eq!(foo[0].shares, pdec!(10));
    assert_eq!(foo[0].price, gez!(100));
}

#[test]
fn test_spinoff_moves_basis_keeps_shares() {
    let (engine, _) = make_engine(vec![TTx {
        id: 1,
        t_day: 1,
        shares: pdec!(10),
        price: gez!(100),
        ..TTx::default()
    }]);

    let action = engine
        .register_action(taction_new(TAction {
            specifics: Some(ActionSpecifics::Spinoff(ConversionSpecifics {
                target: "NEWCO".to_string(),
                exchange_ratio: pdec!(0.2),
                cash_per_share: gez!(0),
                fmv_per_share: None,
            })),
            ..TAction::default()
        }))
        .unwrap();
    assert_eq!(engine.apply(action.id).unwrap(), 1);

    let foo = engine.open_lots("FOO", "acct", day(10)).unwrap();
    assert_eq!(foo.len(), 1);
    assert_eq!(foo[0].shares, pdec!(10));
    assert_eq!(foo[0].basis(), gez!(0));

    let newco = engine.open_lots("NEWCO", "acct", day(10)).unwrap();
    assert_eq!(newco.len(), 1);
    assert_eq!(newco[0].shares, pdec!(2));
    assert_eq!(newco[0].basis(), gez!(1000));

    let rows = engine.adjustments(&AdjustmentFilter::default());
    assert_eq!(rows[0].kind, AdjustmentKind::BasisOnly.to_string());
}

#[test]
fn test_stock_dividend_cash_in_lieu_notice() {
    let (engine, _) = make_engine(vec![TTx {
        id: 1,
        t_day: 1,
        shares: pdec!(30),
        price: gez!(42),
        ..TTx::default()
    }]);

    let action = engine
        .register_action(taction_new(TAction {
            specifics: Some(ActionSpecifics::StockDividend(
                StockDividendSpecifics {
                    shares_per_share: pdec!(0.05),
                    fmv_per_share: Some(pdec!(40)),
                },
            )),
            ..TAction::default()
        }))
        .unwrap();

    let (mut notices, buff) = WriteHandle::string_buff_write_handle();
    assert_eq!(engine.apply_with_notices(action.id, &mut notices).unwrap(), 1);
    assert_re("cash in lieu", buff.borrow().as_str());

    // 31.5 raw shares: 31 kept, the 0.5 settled at FMV $40.
    let lots = engine.open_lots("FOO", "acct", day(10)).unwrap();
    assert_eq!(lots[0].shares, pdec!(31));
    let rows = engine.adjustments(&AdjustmentFilter::default());
    assert_eq!(rows[0].cash_in_lieu.clone().unwrap(), "20");
}

#[test]
fn test_no_eligible_lots_notice() {
    let (engine, _) = make_engine(vec![
        TTx { id: 1, t_day: 1, shares: pdec!(10), price: gez!(5), ..TTx::default() },
        TTx {
            id: 2,
            t_day: 2,
            act: TxAction::Sell,
            shares: pdec!(10),
            ..TTx::default()
        },
    ]);

    let action = engine.register_action(taction_new(TAction::default())).unwrap();
    let (mut notices, buff) = WriteHandle::string_buff_write_handle();
    assert_eq!(engine.apply_with_notices(action.id, &mut notices).unwrap(), 0);
    assert_re("no open lots", buff.borrow().as_str());
    assert_re("no-op", buff.borrow().as_str());
}

#[test]
fn test_actions_apply_across_all_accounts() {
    let (engine, _) = make_engine(vec![
        TTx { id: 1, t_day: 1, shares: pdec!(10), price: gez!(5), ..TTx::default() },
        TTx {
            id: 2,
            t_day: 1,
            shares: pdec!(20),
            price: gez!(5),
            acct: "ira",
            ..TTx::default()
        },
    ]);

    let action = engine
        .register_action(taction_new(TAction {
            specifics: Some(tdiv(pdec!(1), true)),
            ex_day: 5,
            record_day: 5,
            ..TAction::default()
        }))
        .unwrap();
    assert_eq!(engine.apply(action.id).unwrap(), 2);

    let rows = engine.adjustments(&AdjustmentFilter {
        account: Some("ira".to_string()),
        ..AdjustmentFilter::default()
    });
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].dividend.clone().unwrap().total_dividend, "20");
}

#[test]
fn test_stacked_actions_compound_in_order() {
    // 2-for-1 split, then a 1-for-4 reverse split: 100 @ $50 becomes
    // 200 @ $25 becomes 50 @ $100. Basis is invariant throughout.
    let (engine, _) = make_engine(vec![TTx {
        id: 1,
        t_day: 1,
        shares: pdec!(100),
        price: gez!(50),
        ..TTx::default()
    }]);

    let first = engine.register_action(taction_new(TAction::default())).unwrap();
    engine.apply(first.id).unwrap();
    let second = engine
        .register_action(taction_new(TAction {
            specifics: Some(ActionSpecifics::Split(
                corpact::engine::model::action::SplitRatio::parse("1-for-4")
                    .unwrap(),
            )),
            ex_day: 8,
            record_day: 8,
            ..TAction::default()
        }))
        .unwrap();
    engine.apply(second.id).unwrap();

    let lots = engine.open_lots("FOO", "acct", day(10)).unwrap();
    assert_eq!(lots[0].shares, pdec!(50));
    assert_eq!(lots[0].price, gez!(100));
    assert_eq!(lots[0].basis(), gez!(5000));

    // The second action's rows snapshot the post-first-split state.
    let rows = engine.adjustments(&AdjustmentFilter {
        action_id: Some(second.id),
        ..AdjustmentFilter::default()
    });
    assert_eq!(rows[0].original_shares, "200");
    assert_eq!(rows[0].original_price, "25");
}

#[test]
fn test_adjustment_query_by_date_range() {
    let (engine, _) = make_engine(vec![TTx {
        id: 1,
        t_day: 1,
        shares: pdec!(100),
        price: gez!(50),
        ..TTx::default()
    }]);

    // Split effective 2024-01-06, dividend effective 2024-01-08.
    let split = engine.register_action(taction_new(TAction::default())).unwrap();
    engine.apply(split.id).unwrap();
    let div = engine
        .register_action(taction_new(TAction {
            specifics: Some(tdiv(pdec!(1), true)),
            ex_day: 7,
            record_day: 7,
            ..TAction::default()
        }))
        .unwrap();
    engine.apply(div.id).unwrap();

    let from = corpact::util::date::parse_standard_date("2024-01-07").unwrap();
    let rows = engine.adjustments(&AdjustmentFilter {
        from: Some(from),
        ..AdjustmentFilter::default()
    });
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].action_id, div.id);
    assert_eq!(rows[0].effective_date, "2024-01-08");

    let rows = engine.adjustments(&AdjustmentFilter {
        to: Some(corpact::util::date::parse_standard_date("2024-01-07").unwrap()),
        ..AdjustmentFilter::default()
    });
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].action_id, split.id);
}
