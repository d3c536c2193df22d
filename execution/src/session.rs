//! Single-game session state machine.
//!
//! ```text
//!     [Created] --submit--> [ThrowPending] --value--> [ValueReceived k<N] --submit--> ...
//!         |                                                |
//!         |                                        [ValueReceived k==N]
//!         v                                                v
//!     [Reaped]                                        [Settled]
//! ```
//!
//! The session never performs I/O. The controller reports each submitted throw and each
//! value it learns, and asks the session to settle once it is complete. Time is passed in as
//! milliseconds so the reaper decision is deterministic.

use crate::catalog::BetSpec;
use arbuz_types::{Amount, ChatId, ChatKind, GameKind, MessageId, Multiplier, UserId, Wager};
use thiserror::Error;

/// Sessions older than this are reaped (milliseconds).
pub const DEFAULT_REAP_AFTER_MS: u64 = 30_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Created,
    ThrowPending,
    ValueReceived,
    Settled,
    Reaped,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session already settled")]
    AlreadySettled,
    #[error("session was reaped")]
    Reaped,
    #[error("throw {0} does not belong to this session")]
    UnknownThrow(MessageId),
    #[error("a throw is already pending")]
    ThrowPending,
    #[error("all throws already received")]
    Complete,
    #[error("session is waiting for {remaining} more throws")]
    Incomplete { remaining: usize },
    #[error("value {0} outside the emoji range")]
    InvalidValue(u8),
}

/// What the controller should do after recording a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrowProgress {
    NeedMore,
    Complete,
}

/// Settlement decision for a complete session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub multiplier: Option<Multiplier>,
    pub win: Amount,
}

impl Outcome {
    pub fn is_win(&self) -> bool {
        !self.win.is_zero()
    }
}

#[derive(Clone, Debug)]
pub struct Session {
    pub id: u64,
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    pub wager: Wager,
    pub bet: &'static BetSpec,
    pub throws: Vec<u8>,
    pub pending_message_id: Option<MessageId>,
    pub initiating_message_id: Option<MessageId>,
    /// Milliseconds on the controller's clock.
    pub started_at: u64,
    phase: Phase,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        user_id: UserId,
        chat_id: ChatId,
        chat_kind: ChatKind,
        wager: Wager,
        bet: &'static BetSpec,
        initiating_message_id: Option<MessageId>,
        started_at: u64,
    ) -> Self {
        Self {
            id,
            user_id,
            chat_id,
            chat_kind,
            wager,
            bet,
            throws: Vec::with_capacity(bet.required_throws),
            pending_message_id: None,
            initiating_message_id,
            started_at,
            phase: Phase::Created,
        }
    }

    pub fn game(&self) -> GameKind {
        self.bet.game
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn required_throws(&self) -> usize {
        self.bet.required_throws
    }

    pub fn is_complete(&self) -> bool {
        self.throws.len() >= self.required_throws()
    }

    pub fn is_settled(&self) -> bool {
        self.phase == Phase::Settled
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Settled | Phase::Reaped)
    }

    /// Message to thread replies under; only used in group chats.
    pub fn reply_to(&self) -> Option<MessageId> {
        match self.chat_kind {
            ChatKind::Group => self.initiating_message_id,
            ChatKind::Private => None,
        }
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        match self.phase {
            Phase::Settled => Err(SessionError::AlreadySettled),
            Phase::Reaped => Err(SessionError::Reaped),
            _ => Ok(()),
        }
    }

    /// Records that a throw request went out as `message_id`.
    pub fn throw_submitted(&mut self, message_id: MessageId) -> Result<(), SessionError> {
        self.ensure_live()?;
        if self.phase == Phase::ThrowPending {
            return Err(SessionError::ThrowPending);
        }
        if self.is_complete() {
            return Err(SessionError::Complete);
        }
        self.pending_message_id = Some(message_id);
        self.phase = Phase::ThrowPending;
        Ok(())
    }

    /// Records the value of the pending throw.
    pub fn record_value(
        &mut self,
        message_id: MessageId,
        value: u8,
    ) -> Result<ThrowProgress, SessionError> {
        self.ensure_live()?;
        if self.phase != Phase::ThrowPending || self.pending_message_id != Some(message_id) {
            return Err(SessionError::UnknownThrow(message_id));
        }
        if !self.game().emoji().accepts(value) {
            return Err(SessionError::InvalidValue(value));
        }
        self.throws.push(value);
        self.phase = Phase::ValueReceived;
        Ok(if self.is_complete() {
            ThrowProgress::Complete
        } else {
            ThrowProgress::NeedMore
        })
    }

    /// Marks the session settled and returns the outcome. Succeeds at most once.
    pub fn settle(&mut self) -> Result<Outcome, SessionError> {
        self.ensure_live()?;
        if !self.is_complete() || self.phase == Phase::ThrowPending {
            return Err(SessionError::Incomplete {
                remaining: self.required_throws().saturating_sub(self.throws.len()),
            });
        }
        self.phase = Phase::Settled;
        let multiplier = self.bet.evaluate(&self.throws);
        let win = multiplier
            .map(|m| self.wager.stake.times(m))
            .unwrap_or(Amount::ZERO);
        Ok(Outcome { multiplier, win })
    }

    /// Tears the session down if it has been live for longer than `reap_after_ms`.
    pub fn reap_if_stale(&mut self, now: u64, reap_after_ms: u64) -> bool {
        if self.is_terminal() || now.saturating_sub(self.started_at) <= reap_after_ms {
            return false;
        }
        self.phase = Phase::Reaped;
        true
    }
}
