//! PvP match driver.
//!
//! Lobby operations (create, join, cancel, bot fill) are thin wrappers over the match rules
//! in `arbuz_execution::pvp`. Execution throws into the public channel, resolves the winner
//! for the match mode, pays the pot and messages every participant. A throw that fails
//! after the match went active parks the match in review with the pot untouched.

use crate::{
    metrics::Metrics,
    randomness::{Owner, Randomness, RandomnessError, ThrowHandle},
    render::Renderer,
    scheduler::{self, FollowUp},
    transport::Transport,
};
use arbuz_execution::{
    pvp::{self, JoinReceipt, Payout, Round, MAX_ROLL_ATTEMPTS},
    Batch, PvpError, State,
};
use arbuz_types::{
    Amount, ChatId, Emoji, GameKind, Match, MatchMode, MatchStatus, MessageId, UserId,
    SYSTEM_USER,
};
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct PvpConfig {
    /// Public channel the matches are played in.
    pub channel_id: ChatId,
    /// Channel for jackpot and lottery announcements.
    pub announce_channel_id: ChatId,
    pub throw_pacing: Duration,
    pub await_timeout: Duration,
    pub commission_bps: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    Finished {
        winners: Vec<UserId>,
        payout: Payout,
    },
    /// A throw failed mid-match; the pot waits for an operator.
    Review,
}

pub type Execution = JoinHandle<Result<MatchOutcome, PvpError>>;

/// Result of a join. `execution` is set when the join filled the match.
pub struct Joined {
    pub m: Match,
    pub receipt: JoinReceipt,
    pub execution: Option<Execution>,
}

/// Messages posted for one throw, deleted together on a re-roll.
struct Posted {
    handle: ThrowHandle,
    caption: Option<MessageId>,
}

/// Generates the public link of a new match.
pub fn new_link() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("pvp_{}", &id[..12])
}

fn throw_emoji(m: &Match) -> Emoji {
    match m.mode {
        MatchMode::Standard => m.game.emoji(),
        _ => GameKind::Slots.emoji(),
    }
}

pub struct PvpController<S: State, T: Transport> {
    store: Arc<Mutex<S>>,
    transport: Arc<T>,
    randomness: Arc<Randomness<T>>,
    renderer: Arc<Renderer>,
    metrics: Metrics,
    config: PvpConfig,
}

impl<S: State + 'static, T: Transport> PvpController<S, T> {
    pub fn new(
        store: Arc<Mutex<S>>,
        transport: Arc<T>,
        randomness: Arc<Randomness<T>>,
        renderer: Arc<Renderer>,
        metrics: Metrics,
        config: PvpConfig,
    ) -> Self {
        Self {
            store,
            transport,
            randomness,
            renderer,
            metrics,
            config,
        }
    }

    pub async fn get(&self, id: u64) -> Result<Match, PvpError> {
        let store = self.store.lock().await;
        pvp::get(&*store, id).await
    }

    pub async fn get_by_link(&self, link: &str) -> Result<Match, PvpError> {
        let store = self.store.lock().await;
        pvp::get_by_link(&*store, link).await
    }

    async fn save(&self, m: &Match) -> Result<(), PvpError> {
        let mut store = self.store.lock().await;
        pvp::store(&mut *store, m).await
    }

    pub async fn create(
        &self,
        creator: UserId,
        game: GameKind,
        stake: Amount,
        seats: u8,
        auto_start_at: u8,
    ) -> Result<Match, PvpError> {
        let mut store = self.store.lock().await;
        let mut batch = Batch::new(&*store);
        let m = pvp::create_standard(
            &mut batch,
            creator,
            game,
            stake,
            seats,
            auto_start_at,
            new_link(),
            scheduler::unix_millis(),
        )
        .await?;
        let changes = batch.commit();
        store.apply(changes).await?;
        Ok(m)
    }

    pub async fn create_tournament(
        &self,
        creator: UserId,
        min: Amount,
        max: Amount,
        seats: u8,
        auto_start_at: u8,
    ) -> Result<Match, PvpError> {
        let mut store = self.store.lock().await;
        pvp::create_slot_tournament(
            &mut *store,
            creator,
            min,
            max,
            seats,
            auto_start_at,
            new_link(),
            scheduler::unix_millis(),
        )
        .await
    }

    /// Joins the match behind `link`. A join that fills the match starts its execution.
    pub async fn join(
        self: &Arc<Self>,
        link: &str,
        user: UserId,
        stake: Option<Amount>,
    ) -> Result<Joined, PvpError> {
        let (m, receipt) = {
            let mut store = self.store.lock().await;
            let id = pvp::get_by_link(&*store, link).await?.id;
            let mut batch = Batch::new(&*store);
            let joined =
                pvp::join_match(&mut batch, id, user, stake, scheduler::unix_millis()).await?;
            let changes = batch.commit();
            store.apply(changes).await?;
            joined
        };
        info!(match_id = m.id, user, cost = %receipt.cost, ready = receipt.ready, "joined match");
        let execution = receipt.ready.then(|| self.spawn_execute(m.id));
        Ok(Joined {
            m,
            receipt,
            execution,
        })
    }

    /// Fills a seat of a waiting standard match with the house and starts it.
    pub async fn play_with_bot(
        self: &Arc<Self>,
        link: &str,
        requester: UserId,
    ) -> Result<(Match, Execution), PvpError> {
        let m = {
            let mut store = self.store.lock().await;
            let mut m = pvp::get_by_link(&*store, link).await?;
            pvp::add_bot(&mut m, requester, scheduler::unix_millis())?;
            pvp::store(&mut *store, &m).await?;
            m
        };
        info!(match_id = m.id, requester, "house joined match");
        let execution = self.spawn_execute(m.id);
        Ok((m, execution))
    }

    pub async fn cancel(&self, link: &str, user: UserId) -> Result<Match, PvpError> {
        let (m, refunds) = {
            let mut store = self.store.lock().await;
            let id = pvp::get_by_link(&*store, link).await?.id;
            let mut batch = Batch::new(&*store);
            let cancelled =
                pvp::cancel_match(&mut batch, id, user, scheduler::unix_millis()).await?;
            let changes = batch.commit();
            store.apply(changes).await?;
            cancelled
        };
        for (participant, refund) in &refunds {
            let text = self.renderer.match_cancelled(&m, *refund);
            if let Err(err) = self.transport.send_text(*participant, &text, None, None).await {
                warn!(match_id = m.id, participant, ?err, "cancel notice not delivered");
            }
        }
        Ok(m)
    }

    pub fn spawn_execute(self: &Arc<Self>, id: u64) -> Execution {
        let pvp = self.clone();
        tokio::spawn(async move { pvp.execute(id).await })
    }

    /// Plays a ready match to the end.
    pub async fn execute(&self, id: u64) -> Result<MatchOutcome, PvpError> {
        let mut m = {
            let mut store = self.store.lock().await;
            let mut m = pvp::get(&*store, id).await?;
            pvp::begin(&mut m, None)?;
            pvp::store(&mut *store, &m).await?;
            m
        };
        let started = self.renderer.match_started(&m);
        match self
            .transport
            .send_text(self.config.channel_id, &started, None, None)
            .await
        {
            Ok(message_id) => {
                m.channel_message_id = Some(message_id);
                self.save(&m).await?;
            }
            Err(err) => warn!(match_id = id, ?err, "match start not announced"),
        }
        info!(match_id = id, mode = ?m.mode, participants = m.participants.len(), pot = %m.pot, "match started");

        let winners = match self.resolve(&mut m).await {
            Ok(winners) => winners,
            Err(err) => {
                self.metrics.randomness_failures.inc();
                return self.park(m, err).await;
            }
        };
        self.settle(m, winners).await
    }

    async fn resolve(&self, m: &mut Match) -> Result<Vec<UserId>, RandomnessError> {
        match m.mode {
            MatchMode::Standard | MatchMode::SlotTournament => {
                self.roll_highest(m).await.map(|winner| vec![winner])
            }
            MatchMode::Auction100 => self.roll_jackpot(m).await.map(|winner| vec![winner]),
            MatchMode::Auction500 => self.roll_split(m).await,
        }
    }

    async fn throw(&self, m: &Match, user: Option<UserId>) -> Result<Posted, RandomnessError> {
        let handle = self
            .randomness
            .submit(
                self.config.channel_id,
                throw_emoji(m),
                None,
                Owner::Match(m.id),
            )
            .await?;
        let caption = match user {
            Some(user) => {
                let keyboard = self.renderer.throw_keyboard(m, user);
                self.transport
                    .send_text(
                        self.config.channel_id,
                        &self.renderer.match_title(m),
                        Some(keyboard),
                        Some(handle.message_id),
                    )
                    .await
                    .map_err(|err| warn!(match_id = m.id, user, ?err, "throw caption not delivered"))
                    .ok()
            }
            None => None,
        };
        Ok(Posted { handle, caption })
    }

    async fn discard(&self, m: &Match, posted: &[(MessageId, Option<MessageId>)]) {
        for (throw, caption) in posted {
            for message_id in std::iter::once(*throw).chain(*caption) {
                if let Err(err) = self
                    .transport
                    .delete_message(self.config.channel_id, message_id)
                    .await
                {
                    debug!(match_id = m.id, message_id, ?err, "delete failed");
                }
            }
        }
    }

    async fn announce_reroll(&self, m: &Match, attempt: u32) {
        let text = self.renderer.reroll(m, attempt);
        if let Err(err) = self
            .transport
            .send_text(self.config.channel_id, &text, None, None)
            .await
        {
            debug!(match_id = m.id, ?err, "re-roll notice not delivered");
        }
    }

    /// Every participant throws in join order; ties re-roll until the attempts run out.
    async fn roll_highest(&self, m: &mut Match) -> Result<UserId, RandomnessError> {
        let players: Vec<UserId> = m.participants.iter().map(|p| p.user_id).collect();
        let mut attempt = 1;
        loop {
            let mut posted = Vec::with_capacity(players.len());
            for (i, user) in players.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(self.config.throw_pacing).await;
                }
                let throw = self.throw(m, Some(*user)).await?;
                pvp::record_throw(m, *user, throw.handle.value, throw.handle.message_id);
                posted.push((throw.handle.message_id, throw.caption));
                self.randomness
                    .await_final(throw.handle, self.config.await_timeout)
                    .await;
            }

            match pvp::resolve_highest(m) {
                Round::Winner(winner) => return Ok(winner),
                Round::Tie(tied) if attempt >= MAX_ROLL_ATTEMPTS => {
                    warn!(match_id = m.id, ?tied, attempt, "tie unresolved, earliest joiner wins");
                    return Ok(pvp::tie_fallback(m, &tied).unwrap_or(SYSTEM_USER));
                }
                Round::Tie(tied) => {
                    debug!(match_id = m.id, ?tied, attempt, "tie, re-rolling");
                    self.discard(m, &posted).await;
                    pvp::clear_throws(m);
                    attempt += 1;
                    self.announce_reroll(m, attempt).await;
                }
            }
        }
    }

    /// One slot throw names a seat; values without a seat re-roll.
    async fn roll_jackpot(&self, m: &mut Match) -> Result<UserId, RandomnessError> {
        for attempt in 1..=MAX_ROLL_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(self.config.throw_pacing).await;
            }
            let throw = self.throw(m, None).await?;
            let (message_id, value) = (throw.handle.message_id, throw.handle.value);
            self.randomness
                .await_final(throw.handle, self.config.await_timeout)
                .await;
            if let Some(winner) = pvp::jackpot_seat(m, value) {
                pvp::record_throw(m, winner, value, message_id);
                return Ok(winner);
            }
            debug!(match_id = m.id, value, attempt, "no seat, re-rolling");
            self.discard(m, &[(message_id, None)]).await;
            self.announce_reroll(m, attempt + 1).await;
        }
        let winner = pvp::first_joiner(m).unwrap_or(SYSTEM_USER);
        warn!(match_id = m.id, winner, "jackpot unresolved, first joiner wins");
        Ok(winner)
    }

    /// Two slot throws name two ticket positions.
    async fn roll_split(&self, m: &mut Match) -> Result<Vec<UserId>, RandomnessError> {
        let first = self.throw(m, None).await?;
        let first_value = first.handle.value;
        let first_message = first.handle.message_id;
        tokio::time::sleep(self.config.throw_pacing).await;
        let second = match self.throw(m, None).await {
            Ok(second) => second,
            Err(err) => {
                self.randomness.forget(first_message);
                return Err(err);
            }
        };
        let second_value = second.handle.value;
        self.randomness
            .await_final(first.handle, self.config.await_timeout)
            .await;
        self.randomness
            .await_final(second.handle, self.config.await_timeout)
            .await;
        let (a, b) = pvp::resolve_split(m, first_value, second_value)
            .unwrap_or((SYSTEM_USER, SYSTEM_USER));
        debug!(match_id = m.id, first_value, second_value, a, b, "split resolved");
        Ok(vec![a, b])
    }

    async fn park(&self, mut m: Match, err: RandomnessError) -> Result<MatchOutcome, PvpError> {
        error!(match_id = m.id, ?err, "match throw failed, sending to review");
        pvp::review(&mut m, scheduler::unix_millis())?;
        self.save(&m).await?;
        self.metrics.pvp_review.inc();
        let text = self.renderer.match_review(&m);
        if let Err(err) = self
            .transport
            .send_text(self.config.channel_id, &text, None, None)
            .await
        {
            warn!(match_id = m.id, ?err, "review notice not delivered");
        }
        Ok(MatchOutcome::Review)
    }

    async fn settle(&self, mut m: Match, winners: Vec<UserId>) -> Result<MatchOutcome, PvpError> {
        let settled = {
            let mut store = self.store.lock().await;
            let mut batch = Batch::new(&*store);
            let mut staged = m.clone();
            match pvp::settle(
                &mut batch,
                &mut staged,
                winners.clone(),
                self.config.commission_bps,
                scheduler::unix_millis(),
            )
            .await
            {
                Ok(payout) => {
                    let changes = batch.commit();
                    store
                        .apply(changes)
                        .await
                        .map(|_| (staged, payout))
                        .map_err(PvpError::from)
                }
                Err(err) => Err(err),
            }
        };
        let payout = match settled {
            Ok((finished, payout)) => {
                m = finished;
                payout
            }
            Err(err) => {
                self.metrics.settlement_failures.inc();
                error!(match_id = m.id, ?err, "match payout failed, sending to review");
                pvp::review(&mut m, scheduler::unix_millis())?;
                self.save(&m).await?;
                self.metrics.pvp_review.inc();
                return Ok(MatchOutcome::Review);
            }
        };
        self.metrics.pvp_finished.inc();
        info!(
            match_id = m.id,
            ?winners,
            commission = %payout.commission,
            paid = %payout.total_paid(),
            "match finished"
        );

        let text = self.renderer.match_finished(&m, &payout);
        if let Err(err) = self
            .transport
            .send_text(self.config.channel_id, &text, None, m.channel_message_id)
            .await
        {
            warn!(match_id = m.id, ?err, "match result not delivered");
        }
        let mut notified = HashSet::new();
        for p in &m.participants {
            if p.user_id == SYSTEM_USER || !notified.insert(p.user_id) {
                continue;
            }
            let text =
                self.renderer
                    .participant_result(&m, p.user_id, &payout, p.throw_message_id);
            if let Err(err) = self.transport.send_text(p.user_id, &text, None, None).await {
                warn!(match_id = m.id, user = p.user_id, ?err, "result message not delivered");
            }
        }

        if let Some(follow_up) = scheduler::follow_up(m.id) {
            if let Err(err) = self.run_follow_up(follow_up).await {
                warn!(match_id = m.id, ?follow_up, ?err, "follow-up failed");
            }
        }
        Ok(MatchOutcome::Finished { winners, payout })
    }

    async fn announce(&self, text: &str) {
        if let Err(err) = self
            .transport
            .send_text(self.config.announce_channel_id, text, None, None)
            .await
        {
            warn!(?err, "announcement not delivered");
        }
    }

    pub async fn run_follow_up(&self, follow_up: FollowUp) -> Result<(), PvpError> {
        let now = scheduler::unix_millis();
        match follow_up {
            FollowUp::OpenJackpot => {
                let m = {
                    let mut store = self.store.lock().await;
                    pvp::ensure(&mut *store, pvp::new_jackpot(now)).await?
                };
                if m.status == MatchStatus::Waiting {
                    self.announce(&self.renderer.jackpot_open(&m)).await;
                }
            }
            FollowUp::SplitTeaser => {
                self.announce(&self.renderer.split_coming_soon()).await;
            }
            FollowUp::SplitLaunch => {
                let m = {
                    let mut store = self.store.lock().await;
                    pvp::ensure(&mut *store, pvp::new_split(now)).await?
                };
                if m.status == MatchStatus::Waiting {
                    self.announce(&self.renderer.split_live(&m)).await;
                }
            }
        }
        info!(?follow_up, "follow-up done");
        Ok(())
    }

    /// Posts the jackpot reminder if the jackpot is open. Returns whether it was posted.
    pub async fn jackpot_reminder(&self) -> Result<bool, PvpError> {
        let m = {
            let store = self.store.lock().await;
            arbuz_execution::state::load_match(&*store, arbuz_types::pvp::JACKPOT_MATCH_ID)
                .await?
        };
        let Some(m) = m.filter(|m| m.status == MatchStatus::Waiting) else {
            return Ok(false);
        };
        self.announce(&self.renderer.jackpot_reminder(&m)).await;
        Ok(true)
    }

    /// Runs the jackpot with whoever joined. Skipped when it is missing, terminal or empty.
    pub async fn finalize_jackpot(&self) -> Result<Option<MatchOutcome>, PvpError> {
        let id = arbuz_types::pvp::JACKPOT_MATCH_ID;
        {
            let mut store = self.store.lock().await;
            let Some(mut m) = arbuz_execution::state::load_match(&*store, id).await? else {
                return Ok(None);
            };
            if m.status.is_terminal() || m.status == MatchStatus::Active || m.participants.is_empty()
            {
                debug!(match_id = id, status = ?m.status, "jackpot not finalizable");
                return Ok(None);
            }
            if m.status == MatchStatus::Waiting {
                pvp::transition(&mut m, MatchStatus::Ready)?;
                m.started_at = Some(scheduler::unix_millis());
                pvp::store(&mut *store, &m).await?;
            }
        }
        self.execute(id).await.map(Some)
    }
}
