//! Wire protocol for the crowdfunding program.
//!
//! This crate holds the pieces that must stay bit-exact with the deployed
//! program:
//!
//! * [`state`]: the fixed 282-byte campaign record and its codec.
//! * [`pda`]: program-derived addresses for the record and its vault.
//! * [`instruction`]: the three instruction payloads and their account sets.
//! * [`processor`]: the campaign state machine as the program runs it,
//!   expressed as a list of effects for the host to apply atomically.
//!
//! Everything here is pure: no I/O, no shared state. Executing instructions
//! against real accounts is the host's job.

pub mod instruction;
pub mod pda;
pub mod processor;
pub mod pubkey;
pub mod rent;
pub mod state;

mod error;

pub use error::{CrowdfundError, Rejection};
pub use pubkey::Pubkey;
