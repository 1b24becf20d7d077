pub mod action;
pub mod adjustment;
pub mod tx;
