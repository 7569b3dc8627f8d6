//! PlayCoin ledger primitives.
//!
//! The crate exposes the accounting state machine behind the PlayCoin token:
//!
//! * [`ledger`]: balances, allowances, reserves and the owner/admin/vault
//!   role model, with every operation applied all-or-nothing.
//! * [`call`]: serializable invocations and atomic batches on top of the
//!   ledger operations.
//! * [`snapshot`]: serializable state views with a SHA-256 state root.
//! * [`config`]: genesis parameters (symbol, decimals, supply, roles).
//! * [`address`]: 20-byte account identifiers.
//!
//! Callers identify themselves explicitly on every mutating operation; the
//! ledger never infers a caller from ambient context.

pub mod address;
pub mod call;
pub mod config;
pub mod events;
pub mod ledger;
pub mod snapshot;

mod error;

pub use address::{Address, AddressError};
pub use call::{Invocation, LedgerCall};
pub use config::LedgerConfig;
pub use error::LedgerError;
pub use events::LedgerEvent;
pub use ledger::{Amount, Ledger, Role};
pub use snapshot::LedgerSnapshot;
