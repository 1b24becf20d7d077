pub mod apply;
pub mod calc;
pub mod error;
pub mod lots;
pub mod model;
pub mod query;
pub mod reverse;
pub mod store;

pub use self::model::action::*;
pub use self::model::adjustment::*;
pub use self::model::tx::*;

pub use self::apply::Engine;
pub use self::error::EngineError;

#[cfg(any(test, feature = "testlib"))]
pub mod testlib;
