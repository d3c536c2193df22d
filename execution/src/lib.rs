//! Arbuz execution layer.
//!
//! This crate contains the deterministic rules of the game engine: the account ledger, the
//! bet catalog, the single-game session state machine, referral settlement, PvP match rules
//! and the daily jackpot clock. The node crate drives them with real time, randomness and
//! a chat transport.
//!
//! ## Determinism requirements
//! - Do not read the wall clock inside execution; timestamps and days are parameters.
//! - Do not draw randomness; throw values are always supplied by the caller.
//!
//! ## Storage invariants
//! Every mutation goes through a [State]. Operations that must change several rows
//! together run against a [Batch] and are applied with a single [State::apply], so a
//! failure part-way leaves nothing behind.
//!
//! ## Minimal settlement (example)
//! ```rust,ignore
//! use arbuz_execution::{catalog, ledger, state::Batch};
//!
//! let bet = catalog::lookup(GameKind::Dice, "even")?;
//! let win = bet.evaluate(&[4]).map(|m| stake.times(m)).unwrap_or(Amount::ZERO);
//! let mut batch = Batch::new(&store);
//! ledger::update(&mut batch, user, |account| ledger::credit(account, win, Currency::Main)).await?;
//! let changes = batch.commit();
//! store.apply(changes).await?;
//! ```

pub mod catalog;
pub mod daily;
pub mod journal;
pub mod ledger;
pub mod pvp;
pub mod referral;
pub mod session;
pub mod state;

#[cfg(test)]
mod settlement_tests;

pub use catalog::{BetSpec, CatalogError, StakeLimits};
pub use ledger::LedgerError;
pub use pvp::PvpError;
pub use session::{Outcome, Session, SessionError};
pub use state::{Batch, State, Status};

#[cfg(any(test, feature = "mocks"))]
pub use state::Memory;
