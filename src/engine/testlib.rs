use crate::util::date::pub_testlib::doy_date;
use crate::util::decimal::{GreaterEqualZeroDecimal, PosDecimal};
use crate::{gezdec, pdec};

use super::model::action::{
    ActionSource, ActionSpecifics, ActionStatus, CashDividendSpecifics,
    CorporateAction, SplitRatio,
};
use super::model::tx::{Transaction, TxAction};
use super::store::NewAction;

pub const DEFAULT_TEST_SECURITY: &str = "FOO";
pub const DEFAULT_TEST_ACCOUNT: &str = "acct";

/// Test Transaction builder. `t_day` is a day offset into 2024.
pub struct TTx {
    pub id: u64,
    pub sec: &'static str,
    pub acct: &'static str,
    pub act: TxAction,
    pub shares: PosDecimal,
    pub price: GreaterEqualZeroDecimal,
    pub commission: GreaterEqualZeroDecimal,
    pub t_day: i64,
}

impl Default for TTx {
    fn default() -> Self {
        TTx {
            id: 0,
            sec: DEFAULT_TEST_SECURITY,
            acct: DEFAULT_TEST_ACCOUNT,
            act: TxAction::Buy,
            shares: pdec!(1),
            price: gezdec!(0),
            commission: gezdec!(0),
            t_day: 0,
        }
    }
}

pub fn ttx(t: TTx) -> Transaction {
    Transaction {
        id: t.id,
        security: t.sec.to_string(),
        account: t.acct.to_string(),
        action: t.act,
        shares: t.shares,
        amount_per_share: t.price,
        commission: t.commission,
        trade_date: doy_date(2024, t.t_day),
    }
}

/// Test CorporateAction builder. `specifics: None` means a 2-for-1 split.
/// Day fields are offsets into 2024.
pub struct TAction {
    pub id: u64,
    pub sec: &'static str,
    pub specifics: Option<ActionSpecifics>,
    pub ex_day: i64,
    pub record_day: i64,
    pub pay_day: i64,
    pub desc: &'static str,
    pub source: ActionSource,
}

impl Default for TAction {
    fn default() -> Self {
        TAction {
            id: 0,
            sec: DEFAULT_TEST_SECURITY,
            specifics: None,
            ex_day: 5,
            record_day: 5,
            pay_day: 10,
            desc: "",
            source: ActionSource::Manual,
        }
    }
}

fn t_specifics(t: &TAction) -> ActionSpecifics {
    t.specifics.clone().unwrap_or_else(|| {
        ActionSpecifics::Split(SplitRatio::parse("2-for-1").unwrap())
    })
}

pub fn taction(t: TAction) -> CorporateAction {
    CorporateAction {
        id: t.id,
        security: t.sec.to_string(),
        specifics: t_specifics(&t),
        ex_date: doy_date(2024, t.ex_day),
        record_date: doy_date(2024, t.record_day),
        pay_date: doy_date(2024, t.pay_day),
        description: t.desc.to_string(),
        source: t.source,
        status: ActionStatus::Pending,
    }
}

/// Like `taction`, but as a registration payload (the store assigns the id).
pub fn taction_new(t: TAction) -> NewAction {
    NewAction {
        security: t.sec.to_string(),
        specifics: t_specifics(&t),
        ex_date: doy_date(2024, t.ex_day),
        record_date: doy_date(2024, t.record_day),
        pay_date: doy_date(2024, t.pay_day),
        description: t.desc.to_string(),
        source: t.source,
    }
}

pub fn tdiv(amount_per_share: PosDecimal, qualified: bool) -> ActionSpecifics {
    ActionSpecifics::CashDividend(CashDividendSpecifics {
        amount_per_share,
        currency: "USD".to_string(),
        qualified,
    })
}
