//! Single-player game controller.
//!
//! A game takes the stake, throws the bet's emoji until the bet has all its values, and
//! settles: win credit, journal row and first-win bonus in one commit, then the referral
//! commission in a second one. Only then is the result rendered and the session released.
//!
//! At most one session per user is in flight. The reaper ([Engine::reap_stale]) tears down
//! sessions that never finished; their stake is not returned.

use crate::{
    metrics::Metrics,
    randomness::{Delivery, Owner, Randomness, RandomnessError, ThrowHandle},
    render::{GameSummary, Renderer},
    scheduler,
    transport::Transport,
};
use arbuz_execution::{
    catalog::{self, SLOTS_BET},
    journal,
    ledger::{self, StakeTaken},
    referral::{settle_referral, Commission},
    session::{Outcome, Session, SessionError, ThrowProgress},
    Batch, CatalogError, LedgerError, StakeLimits, State,
};
use arbuz_types::{
    Account, Amount, ChatId, ChatKind, Currency, GameKind, GameRecord, LastGame, MessageId,
    UserId, Wager, SYSTEM_USER,
};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct GameConfig {
    pub limits: StakeLimits,
    pub throw_pacing: Duration,
    pub await_timeout: Duration,
    pub reap_after: Duration,
    pub referral_bps: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        use crate::defaults::*;
        Self {
            limits: StakeLimits::default(),
            throw_pacing: Duration::from_millis(DEFAULT_THROW_PACING_MS),
            await_timeout: Duration::from_millis(DEFAULT_AWAIT_TIMEOUT_MS),
            reap_after: Duration::from_millis(DEFAULT_REAP_AFTER_MS),
            referral_bps: DEFAULT_REFERRAL_BPS,
        }
    }
}

#[derive(Debug, Error)]
pub enum GameError {
    #[error("a game is already in progress")]
    Busy,
    #[error(transparent)]
    InvalidBet(#[from] CatalogError),
    #[error("insufficient funds (needed={needed}, available={available})")]
    Insufficient { needed: Amount, available: Amount },
    #[error("user {0} is not registered")]
    UnknownAccount(UserId),
    #[error("randomness unavailable: {0}")]
    RandomnessUnavailable(#[source] RandomnessError),
    #[error("the previous game timed out")]
    SessionTimeout,
    #[error("no previous game to replay")]
    NoLastGame,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("ledger error: {0}")]
    Ledger(LedgerError),
    #[error("storage failure")]
    Storage(#[source] anyhow::Error),
}

impl From<LedgerError> for GameError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Insufficient { needed, available } => {
                GameError::Insufficient { needed, available }
            }
            LedgerError::UnknownAccount(user) => GameError::UnknownAccount(user),
            LedgerError::Storage(err) => GameError::Storage(err),
            other => GameError::Ledger(other),
        }
    }
}

/// A request to play one bet.
#[derive(Clone, Debug)]
pub struct BetRequest {
    pub user: UserId,
    pub chat: ChatId,
    pub chat_kind: ChatKind,
    /// The user's message that asked for the game.
    pub message_id: Option<MessageId>,
    pub game: GameKind,
    pub bet: String,
    pub stake: Amount,
    pub currency: Currency,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settlement {
    pub session_id: u64,
    pub game_id: u64,
    pub throws: Vec<u8>,
    pub win: Amount,
    pub balance_after: Amount,
    pub commission: Option<Commission>,
}

/// A game whose stake is taken and whose first throw is out.
pub struct Started {
    pub session_id: u64,
    pub completion: JoinHandle<Result<Settlement, GameError>>,
}

#[derive(Default)]
struct Sessions {
    active: HashMap<UserId, Session>,
    timed_out: HashSet<UserId>,
    last_games: HashMap<UserId, LastGame>,
}

pub struct Engine<S: State, T: Transport> {
    store: Arc<Mutex<S>>,
    transport: Arc<T>,
    randomness: Arc<Randomness<T>>,
    renderer: Arc<Renderer>,
    metrics: Metrics,
    config: GameConfig,
    sessions: std::sync::Mutex<Sessions>,
    next_session: AtomicU64,
    epoch: Instant,
}

impl<S: State + 'static, T: Transport> Engine<S, T> {
    pub fn new(
        store: Arc<Mutex<S>>,
        transport: Arc<T>,
        randomness: Arc<Randomness<T>>,
        renderer: Arc<Renderer>,
        metrics: Metrics,
        config: GameConfig,
    ) -> Self {
        Self {
            store,
            transport,
            randomness,
            renderer,
            metrics,
            config,
            sessions: std::sync::Mutex::new(Sessions::default()),
            next_session: AtomicU64::new(1),
            epoch: Instant::now(),
        }
    }

    /// Registers the house account that plays as the PvP bot.
    pub async fn bootstrap(&self) -> Result<(), GameError> {
        let mut store = self.store.lock().await;
        let (_, created) = ledger::register(&mut *store, SYSTEM_USER, "house", None).await?;
        if created {
            info!("house account registered");
        }
        Ok(())
    }

    pub fn limits(&self) -> &StakeLimits {
        &self.config.limits
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, Sessions> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions().active.len()
    }

    pub fn last_game(&self, user: UserId) -> Option<LastGame> {
        self.sessions().last_games.get(&user).cloned()
    }

    /// Checks the request and reserves the user's session slot.
    fn open(&self, request: &BetRequest, game: GameKind, bet: &str) -> Result<u64, GameError> {
        let mut sessions = self.sessions();
        if sessions.active.contains_key(&request.user) {
            return Err(GameError::Busy);
        }
        let spec = catalog::lookup(game, bet)?;
        self.config.limits.check(request.stake, request.currency)?;

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(
            id,
            request.user,
            request.chat,
            request.chat_kind,
            Wager::new(request.currency, request.stake),
            spec,
            request.message_id,
            self.now_ms(),
        );
        sessions.active.insert(request.user, session);
        self.metrics.active_sessions.set(sessions.active.len() as i64);
        Ok(id)
    }

    /// Replaces a settled slot pull with a fresh session for the next pull.
    fn next_pull(&self, user: UserId, previous: u64) -> Result<u64, GameError> {
        let mut sessions = self.sessions();
        let Some(current) = sessions.active.get(&user).filter(|s| s.id == previous) else {
            return Err(GameError::SessionTimeout);
        };
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(
            id,
            user,
            current.chat_id,
            current.chat_kind,
            current.wager,
            current.bet,
            current.initiating_message_id,
            self.now_ms(),
        );
        sessions.active.insert(user, session);
        Ok(id)
    }

    fn release(&self, user: UserId, session_id: u64) {
        let mut sessions = self.sessions();
        if sessions
            .active
            .get(&user)
            .is_some_and(|session| session.id == session_id)
        {
            sessions.active.remove(&user);
        }
        self.metrics.active_sessions.set(sessions.active.len() as i64);
    }

    async fn take_stake(&self, user: UserId, wager: Wager) -> Result<StakeTaken, GameError> {
        let mut store = self.store.lock().await;
        let taken = ledger::update(&mut *store, user, |account| {
            ledger::apply_wager(account, wager)
        })
        .await?;
        if let Some(main) = wager.main() {
            self.metrics.wagered_micros.inc_by(main.stake().micros());
        }
        debug!(
            user,
            stake = %wager.stake,
            currency = %wager.currency,
            from_locked = %taken.from_locked,
            progress = ?taken.progress,
            "stake taken"
        );
        Ok(taken)
    }

    /// Returns `amount` of a stake whose game could not run. Failures are logged; the caller
    /// has nothing left to fall back to.
    async fn refund(&self, user: UserId, amount: Amount, taken: &StakeTaken) {
        if amount.is_zero() {
            return;
        }
        let currency = taken.wager.currency;
        let mut store = self.store.lock().await;
        match ledger::update(&mut *store, user, |account| {
            ledger::refund_wager(account, amount, taken)
        })
        .await
        {
            Ok(()) => info!(user, %amount, %currency, "stake refunded"),
            Err(err) => error!(user, %amount, %currency, ?err, "stake refund failed"),
        }
    }

    /// Submits the session's next throw and records its value.
    async fn throw(
        &self,
        user: UserId,
        session_id: u64,
    ) -> Result<(ThrowHandle, ThrowProgress), GameError> {
        let (chat, emoji, reply_to) = {
            let sessions = self.sessions();
            let session = sessions
                .active
                .get(&user)
                .filter(|s| s.id == session_id)
                .ok_or(GameError::SessionTimeout)?;
            (session.chat_id, session.game().emoji(), session.reply_to())
        };
        let handle = self
            .randomness
            .submit(chat, emoji, reply_to, Owner::Session(session_id))
            .await
            .map_err(|err| {
                self.metrics.randomness_failures.inc();
                warn!(user, session = session_id, ?err, "throw failed");
                GameError::RandomnessUnavailable(err)
            })?;

        let recorded = {
            let mut sessions = self.sessions();
            match sessions.active.get_mut(&user).filter(|s| s.id == session_id) {
                Some(session) => session
                    .throw_submitted(handle.message_id)
                    .and_then(|_| session.record_value(handle.message_id, handle.value))
                    .map_err(GameError::from),
                None => Err(GameError::SessionTimeout),
            }
        };
        match recorded {
            Ok(progress) => Ok((handle, progress)),
            Err(err) => {
                self.randomness.forget(handle.message_id);
                Err(err)
            }
        }
    }

    /// Drops a session that failed before settlement and returns its stake.
    async fn abort(
        &self,
        user: UserId,
        session_id: u64,
        refund: Amount,
        taken: &StakeTaken,
        err: &GameError,
    ) {
        let live = self
            .sessions()
            .active
            .get(&user)
            .is_some_and(|s| s.id == session_id);
        // A reaped session keeps its stake.
        if !live {
            return;
        }
        warn!(user, session = session_id, ?err, "game aborted");
        self.refund(user, refund, taken).await;
        self.release(user, session_id);
    }

    /// Starts a game and returns once the stake is taken and the first throw is out. The
    /// remaining throws and the settlement run on a spawned task.
    pub async fn start_game(self: &Arc<Self>, request: BetRequest) -> Result<Started, GameError> {
        let user = request.user;
        self.notify_timeout(user, request.chat).await;
        let session_id = self.open(&request, request.game, &request.bet)?;
        let wager = Wager::new(request.currency, request.stake);
        let taken = match self.take_stake(user, wager).await {
            Ok(taken) => taken,
            Err(err) => {
                self.release(user, session_id);
                return Err(err);
            }
        };
        self.metrics.games_started.inc();

        let first = match self.throw(user, session_id).await {
            Ok(first) => first,
            Err(err) => {
                self.abort(user, session_id, request.stake, &taken, &err).await;
                return Err(err);
            }
        };
        info!(
            user,
            session = session_id,
            game = %request.game,
            bet = %request.bet,
            stake = %request.stake,
            currency = %request.currency,
            "game started"
        );
        let engine = self.clone();
        let completion =
            tokio::spawn(async move { engine.drive(user, session_id, taken, first).await });
        Ok(Started {
            session_id,
            completion,
        })
    }

    async fn drive(
        self: Arc<Self>,
        user: UserId,
        session_id: u64,
        taken: StakeTaken,
        first: (ThrowHandle, ThrowProgress),
    ) -> Result<Settlement, GameError> {
        let (handle, mut progress) = first;
        let mut handles = vec![handle];
        while progress == ThrowProgress::NeedMore {
            tokio::time::sleep(self.config.throw_pacing).await;
            match self.throw(user, session_id).await {
                Ok((handle, next)) => {
                    handles.push(handle);
                    progress = next;
                }
                Err(err) => {
                    for handle in &handles {
                        self.randomness.forget(handle.message_id);
                    }
                    self.abort(user, session_id, taken.wager.stake, &taken, &err)
                        .await;
                    return Err(err);
                }
            }
        }
        for handle in handles {
            self.randomness
                .await_final(handle, self.config.await_timeout)
                .await;
        }
        self.settle(user, session_id, true, &taken).await
    }

    /// Plays `pulls` consecutive slot spins for one stake each. The total is taken up front
    /// and every pull settles on its own.
    pub async fn spin_slots(
        self: &Arc<Self>,
        request: BetRequest,
        pulls: usize,
    ) -> Result<Vec<Settlement>, GameError> {
        catalog::check_pulls(pulls)?;
        let user = request.user;
        let total = request
            .stake
            .checked_mul(pulls as u64)
            .ok_or(GameError::Ledger(LedgerError::Overflow))?;
        self.notify_timeout(user, request.chat).await;
        let mut session_id = self.open(&request, GameKind::Slots, SLOTS_BET)?;
        let taken = match self.take_stake(user, Wager::new(request.currency, total)).await {
            Ok(taken) => taken,
            Err(err) => {
                self.release(user, session_id);
                return Err(err);
            }
        };
        self.metrics.games_started.inc_by(pulls as u64);
        info!(user, pulls, stake = %request.stake, currency = %request.currency, "slot series started");

        let mut settlements = Vec::with_capacity(pulls);
        for pull in 0..pulls {
            let unplayed = request
                .stake
                .checked_mul((pulls - pull) as u64)
                .unwrap_or(total);
            if pull > 0 {
                tokio::time::sleep(self.config.throw_pacing).await;
                session_id = self.next_pull(user, session_id)?;
            }
            let (handle, _) = match self.throw(user, session_id).await {
                Ok(thrown) => thrown,
                Err(err) => {
                    self.abort(user, session_id, unplayed, &taken, &err).await;
                    return Err(err);
                }
            };
            self.randomness
                .await_final(handle, self.config.await_timeout)
                .await;
            let last = pull + 1 == pulls;
            match self.settle(user, session_id, last, &taken).await {
                Ok(settlement) => settlements.push(settlement),
                Err(err) => {
                    // The failed pull was refunded by settle; return the ones never played.
                    let rest = request
                        .stake
                        .checked_mul((pulls - pull - 1) as u64)
                        .unwrap_or(Amount::ZERO);
                    self.refund(user, rest, &taken).await;
                    return Err(err);
                }
            }
        }

        let total_win = settlements
            .iter()
            .fold(Amount::ZERO, |acc, s| acc.saturating_add(s.win));
        let text = self
            .renderer
            .slot_series(pulls, total_win, request.currency);
        if let Err(err) = self
            .transport
            .send_text(request.chat, &text, None, None)
            .await
        {
            warn!(user, ?err, "slot series summary not delivered");
        }
        Ok(settlements)
    }

    /// Starts the user's previous bet again.
    pub async fn replay_last_game(
        self: &Arc<Self>,
        user: UserId,
        chat: ChatId,
        chat_kind: ChatKind,
        message_id: Option<MessageId>,
    ) -> Result<Started, GameError> {
        let last = self.last_game(user).ok_or(GameError::NoLastGame)?;
        self.start_game(BetRequest {
            user,
            chat,
            chat_kind,
            message_id,
            game: last.kind,
            bet: last.bet_type,
            stake: last.stake,
            currency: last.currency,
        })
        .await
    }

    /// Settles a complete session. `finish` releases the session slot and remembers the bet
    /// for replay; slot series keep the slot until their last pull.
    async fn settle(
        &self,
        user: UserId,
        session_id: u64,
        finish: bool,
        taken: &StakeTaken,
    ) -> Result<Settlement, GameError> {
        let (session, outcome) = {
            let mut sessions = self.sessions();
            let session = sessions
                .active
                .get_mut(&user)
                .filter(|s| s.id == session_id)
                .ok_or(GameError::SessionTimeout)?;
            let outcome = session.settle()?;
            (session.clone(), outcome)
        };
        let wager = session.wager;

        let (player, game_id) = match self.record(&session, &outcome).await {
            Ok(recorded) => recorded,
            Err(err) => {
                self.metrics.settlement_failures.inc();
                error!(user, session = session_id, ?err, "settlement failed");
                self.refund(user, wager.stake, taken).await;
                self.release(user, session_id);
                return Err(err);
            }
        };
        let commission = self.refer(&player, wager, outcome.win).await;

        self.metrics.games_settled.inc();
        if wager.main().is_some() {
            self.metrics.paid_micros.inc_by(outcome.win.micros());
        }
        let balance_after = player.wagerable(wager.currency);
        info!(
            user,
            session = session_id,
            game_id,
            throws = ?session.throws,
            win = %outcome.win,
            "game settled"
        );

        self.announce(&session, &outcome, balance_after, commission)
            .await;

        {
            let mut sessions = self.sessions();
            sessions.last_games.insert(
                user,
                LastGame {
                    kind: session.game(),
                    bet_type: session.bet.name.to_string(),
                    stake: wager.stake,
                    currency: wager.currency,
                },
            );
        }
        if finish {
            self.release(user, session_id);
        }

        Ok(Settlement {
            session_id,
            game_id,
            throws: session.throws,
            win: outcome.win,
            balance_after,
            commission,
        })
    }

    /// Credits the win and writes the journal row in one commit.
    async fn record(
        &self,
        session: &Session,
        outcome: &Outcome,
    ) -> Result<(Account, u64), GameError> {
        let wager = session.wager;
        let win = outcome.win;
        let (day, _) = scheduler::day_and_seconds(&chrono::Local::now());

        let mut store = self.store.lock().await;
        let mut batch = Batch::new(&*store);
        let (player, bonus) = ledger::update(&mut batch, session.user_id, |account| {
            ledger::credit(account, win, wager.currency)?;
            let mut bonus = None;
            if wager.currency == Currency::Main {
                if win.is_zero() {
                    account.total_lost = account.total_lost.saturating_add(wager.stake);
                } else {
                    bonus = ledger::first_win_bonus(account, day);
                }
            }
            Ok((account.clone(), bonus))
        })
        .await?;
        let record = GameRecord {
            id: 0,
            user_id: session.user_id,
            kind: session.game(),
            bet_type: session.bet.name.to_string(),
            stake: wager.stake,
            result: catalog::result_summary(session.game(), &session.throws),
            win,
            currency: wager.currency,
            timestamp: scheduler::unix_millis(),
        };
        let game_id = journal::append(&mut batch, record)
            .await
            .map_err(GameError::Storage)?;
        let changes = batch.commit();
        store.apply(changes).await.map_err(GameError::Storage)?;

        if let Some(bonus) = bonus {
            info!(user = session.user_id, %bonus, "first win of the day bonus");
        }
        Ok((player, game_id))
    }

    /// Pays the referrer once the player's settlement is durable. Failures cost the
    /// referrer this commission but never the player's game.
    async fn refer(&self, player: &Account, wager: Wager, win: Amount) -> Option<Commission> {
        let main = wager.main()?;
        let mut store = self.store.lock().await;
        let mut batch = Batch::new(&*store);
        match settle_referral(&mut batch, player, main, win, self.config.referral_bps).await {
            Ok(commission) => {
                let changes = batch.commit();
                if let Err(err) = store.apply(changes).await {
                    error!(user = player.user_id, ?err, "referral commit failed");
                    return None;
                }
                if let Some(commission) = commission {
                    self.metrics
                        .referral_micros
                        .inc_by(commission.amount.micros());
                }
                commission
            }
            Err(err) => {
                error!(user = player.user_id, ?err, "referral settlement failed");
                None
            }
        }
    }

    async fn announce(
        &self,
        session: &Session,
        outcome: &Outcome,
        balance_after: Amount,
        commission: Option<Commission>,
    ) {
        let summary = GameSummary {
            game: session.game(),
            bet: session.bet.name,
            throws: &session.throws,
            stake: session.wager.stake,
            currency: session.wager.currency,
            multiplier: outcome.multiplier,
            win: outcome.win,
            balance_after,
        };
        let text = self.renderer.game_result(&summary);
        let reply_to = session.reply_to();
        if let Err(err) = self
            .transport
            .send_text(session.chat_id, &text, None, reply_to)
            .await
        {
            warn!(user = session.user_id, ?err, "result not delivered");
        }
        for (i, sticker) in self
            .renderer
            .stickers(session.game(), &session.throws)
            .iter()
            .enumerate()
        {
            let reply_to = if i == 0 { reply_to } else { None };
            if let Err(err) = self
                .transport
                .send_sticker(session.chat_id, sticker, reply_to)
                .await
            {
                warn!(user = session.user_id, ?err, "sticker not delivered");
            }
        }

        if let Some(commission) = commission.filter(|c| c.notify) {
            let text = self
                .renderer
                .commission(commission.amount, session.user_id);
            if let Err(err) = self
                .transport
                .send_text(commission.referrer, &text, None, None)
                .await
            {
                warn!(referrer = commission.referrer, ?err, "commission notice not delivered");
            }
        }
    }

    /// Tears down sessions that have been in flight longer than the reap threshold.
    pub fn reap_stale(&self) -> usize {
        let now = self.now_ms();
        let threshold = self.config.reap_after.as_millis() as u64;
        let reaped: Vec<(UserId, u64, Option<MessageId>)> = {
            let mut sessions = self.sessions();
            let stale: Vec<_> = sessions
                .active
                .iter_mut()
                .filter_map(|(user, session)| {
                    session
                        .reap_if_stale(now, threshold)
                        .then_some((*user, session.id, session.pending_message_id))
                })
                .collect();
            for (user, _, _) in &stale {
                sessions.active.remove(user);
                sessions.timed_out.insert(*user);
            }
            self.metrics.active_sessions.set(sessions.active.len() as i64);
            stale
        };
        for (user, session_id, pending) in &reaped {
            if let Some(message_id) = pending {
                self.randomness.forget(*message_id);
            }
            warn!(user, session = session_id, "session reaped");
        }
        self.metrics.games_reaped.inc_by(reaped.len() as u64);
        reaped.len()
    }

    /// Whether `user` has a reaped session they have not been told about yet.
    pub fn has_timed_out(&self, user: UserId) -> bool {
        self.sessions().timed_out.contains(&user)
    }

    /// Tells a user once that their previous session was reaped. The new game goes ahead
    /// either way.
    async fn notify_timeout(&self, user: UserId, chat: ChatId) {
        if !self.sessions().timed_out.remove(&user) {
            return;
        }
        let text = self.renderer.session_timeout();
        if let Err(err) = self.transport.send_text(chat, &text, None, None).await {
            warn!(user, chat, ?err, "timeout notice failed");
        }
    }

    pub fn on_value_event(&self, message_id: MessageId, value: u8) -> Delivery {
        self.randomness.on_value_event(message_id, value)
    }
}
