//! Transaction sentry - nonce consistency and delivery-retry engine
//!
//! Guarantees that (a) every account+chain (or privacy-group) partition is
//! assigned strictly increasing nonces across concurrent submissions,
//! (b) the bookkeeping self-heals when the chain reports a nonce mismatch,
//! and (c) transactions unconfirmed past their retry interval are resent
//! with an escalated gas price up to a caller-defined ceiling.
//!
//! The nonce checker is consumed in-process by the signing service; the
//! retry sessions run inside the `tx-sentry` binary.

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod nonce;
pub mod scheduler;
pub mod sentry;
pub mod types;
