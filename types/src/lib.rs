//! Common types used throughout arbuz.
//!
//! Everything here is plain data plus its binary encoding; the rules that mutate these
//! types live in `arbuz-execution`.

pub mod account;
pub mod codec;
pub mod game;
pub mod money;
pub mod pvp;
pub mod storage;

pub use account::{Account, ChainPayment, ReferralStats};
pub use game::{ChatKind, Emoji, GameKind, GameRecord, LastGame, SlotSymbol};
pub use money::{Amount, Currency, MainWager, Multiplier, Wager};
pub use pvp::{Match, MatchMode, MatchStatus, Participant, StakeSpec};
pub use storage::{Key, Value};

/// Chat platform user id.
pub type UserId = i64;

/// Chat platform chat id (private chats share the user's id).
pub type ChatId = i64;

/// Chat platform message id.
pub type MessageId = i64;

/// The house account: the bot opponent and the creator of system matches.
pub const SYSTEM_USER: UserId = 0;
