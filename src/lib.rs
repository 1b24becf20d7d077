pub mod engine;
pub mod log;
pub mod tracing;
pub mod util;

extern crate lazy_static;

#[cfg(any(test, feature = "testlib"))]
pub mod testlib;
