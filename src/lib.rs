//! Payment-gated prediction ledger.
//!
//! A wallet registers once, then pays a fixed fee (native coin or a
//! supported token) to append a prediction record to its own append-only
//! chain, up to a per-wallet cap. The crate is split into:
//!
//! * [`validator`]: pure payload, round, deadline and quota checks.
//! * [`payment`]: the two fee rails behind one [`payment::PaymentRail`] contract.
//! * [`state`]: registry entries, records and the record arena.
//! * [`ledger`]: the host ledger applying mutations all-or-nothing.
//! * [`program`]: the orchestrator turning signed transactions into mutations.
//! * [`transaction`]: instructions and ed25519-signed transactions.
//! * [`store`]: JSON workspace persistence for the CLI.

pub mod address;
pub mod config;
pub mod error;
pub mod ledger;
pub mod payment;
pub mod program;
pub mod state;
pub mod store;
pub mod transaction;
pub mod validator;

pub use address::Address;
pub use error::ProgramError;
pub use ledger::{LedgerError, LedgerState};
pub use program::SweepstakeProgram;
