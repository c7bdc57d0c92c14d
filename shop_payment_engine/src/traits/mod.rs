//! # Backend contracts
//!
//! The payment engine never talks to a database directly. Backends implement the traits in this module and the
//! public APIs in [`crate::spe_api`] are written against them, so the same order flow runs on SQLite (tests, single
//! node deployments) and Postgres (replicated deployments).
//!
//! * [`PaymentStore`] is the pool-level handle. It performs single-statement reads and writes, and opens
//!   transactions.
//! * [`StoreTransaction`] is one unit of work. Every state change that must be atomic (an order transition and its
//!   event, a webhook's business effect and its `processed_at` marker, an audit append and the chain tail) happens on
//!   one of these. The `lock_*` methods take a row lock that is held until commit or rollback. Dropping a transaction
//!   without calling [`StoreTransaction::commit`] rolls it back.
//! * [`LeaderLock`] provides named, connection-scoped advisory locks for leader election.
//! * [`Clock`] is the single source of timestamps written by the engine.
mod clock;
mod errors;
mod leader_lock;
mod payment_store;

pub use clock::{Clock, SystemClock};
pub use errors::StoreError;
pub use leader_lock::{LeaderGuard, LeaderLock, NoAdvisoryLocks, NoGuard};
pub use payment_store::{PaymentStore, StoreTransaction};
