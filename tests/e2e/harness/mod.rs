//! E2E test harness for dbharness.
//!
//! Builders and expectations here are shared by every scenario file; not all
//! of them are used by each.

#![allow(dead_code)]

pub mod database;
pub mod expectations;
pub mod suite;

pub use database::TestDatabase;
pub use expectations::Expectation;
pub use suite::Suite;
