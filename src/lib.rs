//! Multi-currency wallet ledger with integrated fraud detection.
//!
//! Deposits, withdrawals and transfers commit atomically together with their
//! transaction records. Each operation is screened by synchronous fraud rules,
//! and a periodic scanner re-evaluates committed history. Mutations can be
//! throttled per actor with a sliding-window limiter.

pub mod app;
pub mod config;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
