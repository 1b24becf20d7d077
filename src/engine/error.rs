use thiserror::Error;

use super::model::action::ActionId;
use super::model::tx::Security;

/// The engine's error taxonomy. An action that applies to zero open lots is
/// deliberately not represented here: it is a successful no-op application.
#[derive(Error, PartialEq, Eq, Clone, Debug)]
pub enum EngineError {
    /// Malformed action payload or inconsistent transaction history.
    /// Rejected before any lot processing; nothing is persisted.
    #[error("validation error: {0}")]
    Validation(String),

    /// The action is not in the expected status for the requested
    /// operation. No side effects.
    #[error("action {action} is {status}, expected {expected}")]
    State { action: ActionId, status: String, expected: String },

    #[error("unknown action: {0}")]
    UnknownAction(ActionId),

    /// The instrument has no transaction history at all.
    #[error("unknown instrument: {0}")]
    UnknownInstrument(Security),

    /// A computed quantity or amount came out negative or otherwise
    /// out of range. Fatal for the whole action; nothing is persisted and
    /// the action stays pending.
    #[error("calculation error: {0}")]
    Calculation(String),

    /// Another apply/reverse is in flight for this security. Retryable by
    /// the caller; the engine never retries internally.
    #[error("concurrent operation in flight for {0}")]
    Concurrency(Security),

    /// Reversals must run most-recently-applied-first. The named action
    /// must be reversed before this one.
    #[error("action {action} cannot be reversed before later action {blocking_action}")]
    ReversalOrder { action: ActionId, blocking_action: ActionId },

    /// Store-level backstop against double-application: a non-reversed
    /// adjustment already exists for this (lot, action) pair.
    #[error("adjustment already exists for lot {lot} in action {action}")]
    DuplicateAdjustment { lot: String, action: ActionId },
}
