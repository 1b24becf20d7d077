use std::fmt::Display;

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use time::{Date, OffsetDateTime};

use crate::util::basic::SError;
use crate::util::decimal::{GreaterEqualZeroDecimal, PosDecimal};
use crate::util::math::PosDecimalRatio;

use super::tx::Security;

pub type ActionId = u64;
pub type Currency = String;

lazy_static! {
    // e.g. "2-for-1", "1-for-10", "3.5-for-1"
    static ref SPLIT_RE: Regex =
        Regex::new(r"^\s*(\d+(?:\.\d+)?)-for-(\d+(?:\.\d+)?)\s*$").unwrap();
}

/// A split expressed as "<post>-for-<pre>". A 2-for-1 split doubles the
/// share count; a 1-for-10 reverse split divides it by ten.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct SplitRatio {
    pub post: PosDecimal,
    pub pre: PosDecimal,
}

impl SplitRatio {
    pub fn parse(s: &str) -> Result<SplitRatio, SError> {
        let caps = SPLIT_RE
            .captures(s)
            .ok_or(format!("Unable to parse \"{s}\" as a split ratio"))?;
        let parse_term = |t: &str| -> Result<PosDecimal, SError> {
            let d = Decimal::from_str_exact(t)
                .map_err(|e| format!("Error parsing split term \"{t}\": {e}"))?;
            PosDecimal::try_from(d)
                .map_err(|_| format!("Split term \"{t}\" must be positive"))
        };
        Ok(SplitRatio {
            post: parse_term(&caps[1])?,
            pre: parse_term(&caps[2])?,
        })
    }

    pub fn ratio(&self) -> PosDecimalRatio {
        PosDecimalRatio { numerator: self.post, denominator: self.pre }
    }

    // Multiplier applied to share quantities.
    pub fn pre_to_post_factor(&self) -> PosDecimal {
        self.ratio().to_posdecimal()
    }

    // Multiplier applied to per-share prices.
    pub fn post_to_pre_factor(&self) -> PosDecimal {
        self.ratio().inverse().to_posdecimal()
    }

    pub fn is_no_op(&self) -> bool {
        self.ratio().is_one()
    }
}

impl Display for SplitRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-for-{}", self.post, self.pre)
    }
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct CashDividendSpecifics {
    pub amount_per_share: PosDecimal,
    pub currency: Currency,
    // Qualified dividends get preferential tax treatment downstream.
    pub qualified: bool,
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct StockDividendSpecifics {
    // Additional shares issued per share held (e.g. 0.05 for a 5% stock
    // dividend). Behaves as an implicit (1 + shares_per_share)-for-1 split.
    pub shares_per_share: PosDecimal,
    // Fair market value used to price the cash-in-lieu settlement of any
    // fractional remainder. If None, fractional shares are kept as-is.
    pub fmv_per_share: Option<PosDecimal>,
}

/// Shared payload for mergers and spinoffs: holdings of the source security
/// convert into `target` at `exchange_ratio` new shares per old share,
/// optionally with cash consideration paid per old share.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ConversionSpecifics {
    pub target: Security,
    pub exchange_ratio: PosDecimal,
    pub cash_per_share: GreaterEqualZeroDecimal,
    pub fmv_per_share: Option<PosDecimal>,
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum ActionSpecifics {
    Split(SplitRatio),
    CashDividend(CashDividendSpecifics),
    StockDividend(StockDividendSpecifics),
    Merger(ConversionSpecifics),
    Spinoff(ConversionSpecifics),
}

impl ActionSpecifics {
    pub fn pretty_str(&self) -> &str {
        match self {
            ActionSpecifics::Split(_) => "split",
            ActionSpecifics::CashDividend(_) => "cash dividend",
            ActionSpecifics::StockDividend(_) => "stock dividend",
            ActionSpecifics::Merger(_) => "merger",
            ActionSpecifics::Spinoff(_) => "spinoff",
        }
    }

    pub fn target_security(&self) -> Option<&Security> {
        match self {
            ActionSpecifics::Merger(conv) | ActionSpecifics::Spinoff(conv) => {
                Some(&conv.target)
            }
            _ => None,
        }
    }
}

impl Display for ActionSpecifics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pretty_str())
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ActionSource {
    Manual,
    Feed,
}

/// Lifecycle of a corporate action. Transitions are pending -> applied
/// (Applier) and applied -> reversed (Reversal Handler). Reversed is
/// terminal; re-applying requires registering a new action.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum ActionStatus {
    Pending,
    Applied {
        applied_at: OffsetDateTime,
        // Monotonic application sequence number, used to order the
        // reversal stack. Wall-clock timestamps alone can tie.
        seq: u64,
    },
    Reversed {
        applied_at: OffsetDateTime,
        seq: u64,
        reversed_at: OffsetDateTime,
        reversal_reason: String,
    },
}

impl ActionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Applied { .. } => "applied",
            ActionStatus::Reversed { .. } => "reversed",
        }
    }
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct CorporateAction {
    pub id: ActionId,
    pub security: Security,
    pub specifics: ActionSpecifics,
    pub ex_date: Date,
    pub record_date: Date,
    pub pay_date: Date,
    pub description: String,
    pub source: ActionSource,
    pub status: ActionStatus,
}

impl CorporateAction {
    /// Payload validation, run before any lot processing. A malformed
    /// action is rejected here and never touches the ledger.
    pub fn validate(&self) -> Result<(), SError> {
        if self.security.is_empty() {
            return Err("Action has no security".to_string());
        }
        match &self.specifics {
            ActionSpecifics::Split(ratio) => {
                if ratio.is_no_op() {
                    return Err(format!(
                        "Split ratio {} of {} is a no-op",
                        ratio, self.security
                    ));
                }
            }
            ActionSpecifics::CashDividend(div) => {
                if div.currency.is_empty() {
                    return Err(format!(
                        "Cash dividend on {} has no currency",
                        self.security
                    ));
                }
            }
            ActionSpecifics::StockDividend(_) => (),
            ActionSpecifics::Merger(conv) | ActionSpecifics::Spinoff(conv) => {
                if conv.target.is_empty() {
                    return Err(format!(
                        "{} of {} has no target security",
                        self.specifics.pretty_str(),
                        self.security
                    ));
                }
                if conv.target == self.security {
                    return Err(format!(
                        "{} of {} targets its own security",
                        self.specifics.pretty_str(),
                        self.security
                    ));
                }
            }
        }
        if self.record_date < self.ex_date {
            return Err(format!(
                "Action on {} has record date {} before ex date {}",
                self.security, self.record_date, self.ex_date
            ));
        }
        Ok(())
    }

    /// The cutoff date for lot eligibility. The ex date is authoritative,
    /// except that cash dividends pay holders of record as of the record
    /// date, so lots bought after it are excluded.
    pub fn eligibility_cutoff(&self) -> Date {
        match &self.specifics {
            ActionSpecifics::CashDividend(_) => self.record_date,
            _ => self.ex_date,
        }
    }

    pub fn target_security(&self) -> Option<&Security> {
        self.specifics.target_security()
    }

    pub fn applied_seq(&self) -> Option<u64> {
        match &self.status {
            ActionStatus::Pending => None,
            ActionStatus::Applied { seq, .. }
            | ActionStatus::Reversed { seq, .. } => Some(*seq),
        }
    }
}
