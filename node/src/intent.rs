//! User intents as JSON lines, and the dispatcher that routes them to the controllers.
//!
//! Each line is one object tagged by `type`, for example
//! `{"type":"place_bet","user":7,"game":"dice","bet":"even","stake":"1.00"}`.
//! Failures are rendered back to the user's chat; the dispatcher itself never stops on
//! them.

use crate::{
    engine::{BetRequest, Engine, GameError, Settlement},
    pvp::{Execution, PvpController},
    render::Renderer,
    scheduler,
    transport::Transport,
};
use arbuz_execution::{ledger, LedgerError, PvpError, State};
use arbuz_types::{
    Amount, ChatId, ChatKind, Currency, GameKind, MessageId, UserId,
};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

fn main_currency() -> Currency {
    Currency::Main
}

fn private_chat() -> ChatKind {
    ChatKind::Private
}

/// A match named by its numeric id or by its invite link.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MatchRef {
    Id(u64),
    Link(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Intent {
    Register {
        user: UserId,
        username: String,
        #[serde(default)]
        referrer: Option<UserId>,
    },
    PlaceBet {
        user: UserId,
        /// Defaults to the user's private chat.
        #[serde(default)]
        chat: Option<ChatId>,
        #[serde(default = "private_chat")]
        chat_kind: ChatKind,
        #[serde(default)]
        message_id: Option<MessageId>,
        game: GameKind,
        bet: String,
        /// Defaults to the user's base bet.
        #[serde(default)]
        stake: Option<Amount>,
        #[serde(default = "main_currency")]
        currency: Currency,
    },
    SpinSlots {
        user: UserId,
        #[serde(default)]
        chat: Option<ChatId>,
        count: usize,
        #[serde(default)]
        stake: Option<Amount>,
        #[serde(default = "main_currency")]
        currency: Currency,
    },
    ReplayLastGame {
        user: UserId,
        #[serde(default)]
        chat: Option<ChatId>,
    },
    SetBaseBet {
        user: UserId,
        amount: Amount,
        #[serde(default = "main_currency")]
        currency: Currency,
    },
    ClaimDaily {
        user: UserId,
    },
    TransferReferral {
        user: UserId,
    },
    Deposit {
        user: UserId,
        tx_hash: String,
        amount: Amount,
    },
    PvpCreate {
        user: UserId,
        game: GameKind,
        stake: Amount,
        seats: u8,
        #[serde(default)]
        auto_start_at: u8,
    },
    PvpCreateTournament {
        user: UserId,
        min: Amount,
        max: Amount,
        seats: u8,
        #[serde(default)]
        auto_start_at: u8,
    },
    PvpJoin {
        user: UserId,
        #[serde(rename = "match_id", alias = "link")]
        target: MatchRef,
        #[serde(default)]
        stake: Option<Amount>,
    },
    PvpCancel {
        user: UserId,
        #[serde(rename = "match_id", alias = "link")]
        target: MatchRef,
    },
    PvpPlayWithBot {
        user: UserId,
        #[serde(rename = "match_id", alias = "link")]
        target: MatchRef,
    },
    ValueEvent {
        message_id: MessageId,
        value: u8,
    },
}

impl Intent {
    /// Chat that failures are reported to, if any.
    pub fn reply_chat(&self) -> Option<ChatId> {
        match self {
            Intent::PlaceBet { user, chat, .. }
            | Intent::SpinSlots { user, chat, .. }
            | Intent::ReplayLastGame { user, chat } => Some(chat.unwrap_or(*user)),
            Intent::Register { user, .. }
            | Intent::SetBaseBet { user, .. }
            | Intent::ClaimDaily { user }
            | Intent::TransferReferral { user }
            | Intent::Deposit { user, .. }
            | Intent::PvpCreate { user, .. }
            | Intent::PvpCreateTournament { user, .. }
            | Intent::PvpJoin { user, .. }
            | Intent::PvpCancel { user, .. }
            | Intent::PvpPlayWithBot { user, .. } => Some(*user),
            Intent::ValueEvent { .. } => None,
        }
    }
}

pub fn parse(line: &str) -> Result<Intent, serde_json::Error> {
    serde_json::from_str(line)
}

#[derive(Debug, Error)]
pub enum IntentError {
    #[error(transparent)]
    Game(#[from] GameError),
    #[error(transparent)]
    Pvp(#[from] PvpError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Work left running after an intent was accepted.
pub enum Pending {
    None,
    Game(JoinHandle<()>),
    Match(Execution),
}

pub struct Dispatcher<S: State, T: Transport> {
    store: Arc<Mutex<S>>,
    transport: Arc<T>,
    renderer: Arc<Renderer>,
    engine: Arc<Engine<S, T>>,
    pvp: Arc<PvpController<S, T>>,
}

impl<S: State + 'static, T: Transport> Dispatcher<S, T> {
    pub fn new(
        store: Arc<Mutex<S>>,
        transport: Arc<T>,
        renderer: Arc<Renderer>,
        engine: Arc<Engine<S, T>>,
        pvp: Arc<PvpController<S, T>>,
    ) -> Self {
        Self {
            store,
            transport,
            renderer,
            engine,
            pvp,
        }
    }

    /// Handles one intent, reporting any failure to the user.
    pub async fn dispatch(&self, intent: Intent) -> Pending {
        let chat = intent.reply_chat();
        match self.handle(intent).await {
            Ok(pending) => pending,
            Err(err) => {
                if let Some(chat) = chat {
                    self.report(chat, &err).await;
                }
                Pending::None
            }
        }
    }

    async fn report(&self, chat: ChatId, err: &IntentError) {
        debug!(chat, ?err, "intent rejected");
        let text = match err {
            IntentError::Game(GameError::SessionTimeout) => self.renderer.session_timeout(),
            err => self.renderer.failure(&err.to_string()),
        };
        self.say(chat, &text).await;
    }

    async fn say(&self, chat: ChatId, text: &str) {
        if let Err(err) = self.transport.send_text(chat, text, None, None).await {
            warn!(chat, ?err, "reply not delivered");
        }
    }

    async fn link_of(&self, target: MatchRef) -> Result<String, IntentError> {
        match target {
            MatchRef::Link(link) => Ok(link),
            MatchRef::Id(id) => Ok(self.pvp.get(id).await?.link),
        }
    }

    async fn base_bet(&self, user: UserId, currency: Currency) -> Result<Amount, IntentError> {
        let store = self.store.lock().await;
        Ok(ledger::account(&*store, user).await?.base_bet(currency))
    }

    /// Reports a game that failed after it started.
    fn watch<R: Send + 'static>(
        &self,
        chat: ChatId,
        completion: JoinHandle<Result<R, GameError>>,
    ) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let renderer = self.renderer.clone();
        tokio::spawn(async move {
            let text = match completion.await {
                Ok(Ok(_)) => return,
                Ok(Err(GameError::SessionTimeout)) => renderer.session_timeout(),
                Ok(Err(err)) => renderer.failure(&err.to_string()),
                Err(err) => {
                    warn!(?err, "game task failed");
                    return;
                }
            };
            if let Err(err) = transport.send_text(chat, &text, None, None).await {
                warn!(chat, ?err, "failure notice not delivered");
            }
        })
    }

    pub async fn handle(&self, intent: Intent) -> Result<Pending, IntentError> {
        match intent {
            Intent::Register {
                user,
                username,
                referrer,
            } => {
                let mut store = self.store.lock().await;
                let (account, created) =
                    ledger::register(&mut *store, user, &username, referrer).await?;
                if created {
                    info!(user, referred_by = ?account.referred_by, "account registered");
                }
                Ok(Pending::None)
            }
            Intent::PlaceBet {
                user,
                chat,
                chat_kind,
                message_id,
                game,
                bet,
                stake,
                currency,
            } => {
                let stake = match stake {
                    Some(stake) => stake,
                    None => self.base_bet(user, currency).await?,
                };
                let chat = chat.unwrap_or(user);
                let started = self
                    .engine
                    .start_game(BetRequest {
                        user,
                        chat,
                        chat_kind,
                        message_id,
                        game,
                        bet,
                        stake,
                        currency,
                    })
                    .await?;
                Ok(Pending::Game(self.watch(chat, started.completion)))
            }
            Intent::SpinSlots {
                user,
                chat,
                count,
                stake,
                currency,
            } => {
                let stake = match stake {
                    Some(stake) => stake,
                    None => self.base_bet(user, currency).await?,
                };
                let chat = chat.unwrap_or(user);
                let engine = self.engine.clone();
                let request = BetRequest {
                    user,
                    chat,
                    chat_kind: ChatKind::Private,
                    message_id: None,
                    game: GameKind::Slots,
                    bet: arbuz_execution::catalog::SLOTS_BET.to_string(),
                    stake,
                    currency,
                };
                let completion: JoinHandle<Result<Vec<Settlement>, GameError>> =
                    tokio::spawn(async move { engine.spin_slots(request, count).await });
                Ok(Pending::Game(self.watch(chat, completion)))
            }
            Intent::ReplayLastGame { user, chat } => {
                let chat = chat.unwrap_or(user);
                let kind = if chat == user {
                    ChatKind::Private
                } else {
                    ChatKind::Group
                };
                let started = self
                    .engine
                    .replay_last_game(user, chat, kind, None)
                    .await?;
                Ok(Pending::Game(self.watch(chat, started.completion)))
            }
            Intent::SetBaseBet {
                user,
                amount,
                currency,
            } => {
                let limits = *self.engine.limits();
                let mut store = self.store.lock().await;
                ledger::update(&mut *store, user, |account| {
                    ledger::set_base_bet(account, amount, currency, &limits)
                })
                .await?;
                Ok(Pending::None)
            }
            Intent::ClaimDaily { user } => {
                let (day, _) = scheduler::day_and_seconds(&chrono::Local::now());
                let amount = {
                    let mut store = self.store.lock().await;
                    ledger::update(&mut *store, user, |account| {
                        ledger::claim_daily_demo(account, day)
                    })
                    .await?
                };
                self.say(user, &self.renderer.daily_bonus(amount)).await;
                Ok(Pending::None)
            }
            Intent::TransferReferral { user } => {
                let amount = {
                    let mut store = self.store.lock().await;
                    ledger::update(&mut *store, user, ledger::transfer_referral_balance).await?
                };
                self.say(user, &self.renderer.referral_transferred(amount))
                    .await;
                Ok(Pending::None)
            }
            Intent::Deposit {
                user,
                tx_hash,
                amount,
            } => {
                {
                    let mut store = self.store.lock().await;
                    let mut batch = arbuz_execution::Batch::new(&*store);
                    ledger::record_chain_payment(&mut batch, &tx_hash, user, amount).await?;
                    let changes = batch.commit();
                    store.apply(changes).await.map_err(LedgerError::Storage)?;
                }
                info!(user, tx_hash, %amount, "deposit credited");
                self.say(user, &self.renderer.deposit(amount)).await;
                Ok(Pending::None)
            }
            Intent::PvpCreate {
                user,
                game,
                stake,
                seats,
                auto_start_at,
            } => {
                let m = self
                    .pvp
                    .create(user, game, stake, seats, auto_start_at)
                    .await?;
                self.say(user, &self.renderer.match_created(&m)).await;
                Ok(Pending::None)
            }
            Intent::PvpCreateTournament {
                user,
                min,
                max,
                seats,
                auto_start_at,
            } => {
                let m = self
                    .pvp
                    .create_tournament(user, min, max, seats, auto_start_at)
                    .await?;
                self.say(user, &self.renderer.match_created(&m)).await;
                Ok(Pending::None)
            }
            Intent::PvpJoin {
                user,
                target,
                stake,
            } => {
                let link = self.link_of(target).await?;
                let joined = self.pvp.join(&link, user, stake).await?;
                Ok(joined.execution.map_or(Pending::None, Pending::Match))
            }
            Intent::PvpCancel { user, target } => {
                let link = self.link_of(target).await?;
                self.pvp.cancel(&link, user).await?;
                Ok(Pending::None)
            }
            Intent::PvpPlayWithBot { user, target } => {
                let link = self.link_of(target).await?;
                let (_, execution) = self.pvp.play_with_bot(&link, user).await?;
                Ok(Pending::Match(execution))
            }
            Intent::ValueEvent { message_id, value } => {
                let delivery = self.engine.on_value_event(message_id, value);
                debug!(message_id, value, ?delivery, "value event");
                Ok(Pending::None)
            }
        }
    }
}
