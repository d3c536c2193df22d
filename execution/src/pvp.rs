//! PvP match rules.
//!
//! Everything here is deterministic: the caller supplies links, timestamps and throw
//! values. Mutating helpers work on a `Match` value; the async functions at the bottom load
//! and store matches and move money through the ledger, so running them against a
//! [crate::state::Batch] makes a join or a payout land in one commit.

use crate::ledger::{self, LedgerError};
use crate::state::{load_match, next_id, State};
use arbuz_types::{
    pvp::{
        JACKPOT_MATCH_ID, JACKPOT_SEATS, MAX_PARTICIPANTS, SPLIT_MATCH_ID, SPLIT_TICKETS,
        TICKET_PRICE,
    },
    Amount, Currency, GameKind, Key, Match, MatchMode, MatchStatus, MessageId, Participant,
    StakeSpec, UserId, Value, SYSTEM_USER,
};
use thiserror::Error;
use tracing::{debug, info};

/// Default house commission on every pot.
pub const COMMISSION_BPS: u32 = 1_000;

/// Rolls attempted before a tie or an unmatched slot value falls back to join order.
pub const MAX_ROLL_ATTEMPTS: u32 = 10;

pub const MIN_STANDARD_STAKE: Amount = Amount::from_cents(10);
pub const MIN_SEATS: u8 = 2;
pub const MAX_STANDARD_SEATS: u8 = 4;

/// Largest single ticket purchase in the split lottery.
pub const MAX_TICKET_PURCHASE: Amount = Amount::from_units(5);

/// Purchases above this amount get the edge ticket positions first.
pub const PREFERRED_TICKETS_ABOVE: Amount = Amount::from_cents(50);

pub const JACKPOT_LINK: &str = "pvp_01100100";
pub const SPLIT_LINK: &str = "pvp_5050";

/// Matches whose completion triggers follow-up work.
pub const JACKPOT_TRIGGER_ID: u64 = 99;
pub const SPLIT_TEASER_ID: u64 = 400;
pub const SPLIT_LAUNCH_ID: u64 = 499;

#[derive(Debug, Error)]
pub enum PvpError {
    #[error("match is full")]
    Full,
    #[error("stake {stake} not accepted for this match")]
    WrongStake { stake: Amount },
    #[error("already joined")]
    AlreadyJoined,
    #[error("match is {0:?}")]
    BadStatus(MatchStatus),
    #[error("only the creator can do this")]
    NotCreator,
    #[error("invalid match: {0}")]
    InvalidMode(&'static str),
    #[error("match {0} not found")]
    UnknownMatch(String),
    #[error("insufficient funds (needed={needed}, available={available})")]
    Insufficient { needed: Amount, available: Amount },
    #[error("ledger error: {0}")]
    Ledger(LedgerError),
    #[error("storage failure")]
    Storage(#[from] anyhow::Error),
}

impl From<LedgerError> for PvpError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Insufficient { needed, available } => {
                PvpError::Insufficient { needed, available }
            }
            LedgerError::Storage(err) => PvpError::Storage(err),
            other => PvpError::Ledger(other),
        }
    }
}

/// Result of a successful join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinReceipt {
    /// Amount debited from the joiner.
    pub cost: Amount,
    /// Ticket positions bought (split lottery only).
    pub tickets: Vec<u8>,
    /// The join filled the match and it is now ready to execute.
    pub ready: bool,
}

/// Outcome of one round of highest-throw-wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Round {
    Winner(UserId),
    /// Participants sharing the top value, in join order.
    Tie(Vec<UserId>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payout {
    pub commission: Amount,
    pub prizes: Vec<(UserId, Amount)>,
}

impl Payout {
    pub fn total_paid(&self) -> Amount {
        self.prizes
            .iter()
            .fold(Amount::ZERO, |acc, (_, prize)| acc.saturating_add(*prize))
    }
}

fn blank(
    id: u64,
    creator_id: UserId,
    game: GameKind,
    mode: MatchMode,
    stake: StakeSpec,
    max_participants: u8,
    auto_start_at: u8,
    link: String,
    now: u64,
) -> Match {
    Match {
        id,
        creator_id,
        game,
        mode,
        stake,
        max_participants,
        auto_start_at,
        status: MatchStatus::Waiting,
        participants: Vec::new(),
        pot: Amount::ZERO,
        winners: Vec::new(),
        link,
        channel_message_id: None,
        created_at: now,
        started_at: None,
        finished_at: None,
    }
}

fn check_seats(max_participants: u8, auto_start_at: u8, limit: u8) -> Result<(), PvpError> {
    if !(MIN_SEATS..=limit).contains(&max_participants) {
        return Err(PvpError::InvalidMode("seat count out of range"));
    }
    if auto_start_at > max_participants {
        return Err(PvpError::InvalidMode("auto start beyond seat count"));
    }
    Ok(())
}

/// Fixed-stake, highest-throw-wins match. The creator is enrolled by [create_standard].
#[allow(clippy::too_many_arguments)]
pub fn new_standard(
    id: u64,
    creator: UserId,
    game: GameKind,
    stake: Amount,
    max_participants: u8,
    auto_start_at: u8,
    link: String,
    now: u64,
) -> Result<Match, PvpError> {
    if !matches!(game, GameKind::Dice | GameKind::Bowling | GameKind::Dart) {
        return Err(PvpError::InvalidMode("game not available for pvp"));
    }
    if stake < MIN_STANDARD_STAKE {
        return Err(PvpError::WrongStake { stake });
    }
    check_seats(max_participants, auto_start_at, MAX_STANDARD_SEATS)?;
    Ok(blank(
        id,
        creator,
        game,
        MatchMode::Standard,
        StakeSpec::Fixed(stake),
        max_participants,
        auto_start_at,
        link,
        now,
    ))
}

/// Slot match where each participant picks a stake in `[min, max]`. The creator is not
/// enrolled.
#[allow(clippy::too_many_arguments)]
pub fn new_slot_tournament(
    id: u64,
    creator: UserId,
    min: Amount,
    max: Amount,
    max_participants: u8,
    auto_start_at: u8,
    link: String,
    now: u64,
) -> Result<Match, PvpError> {
    if min < TICKET_PRICE || max < min {
        return Err(PvpError::InvalidMode("stake range"));
    }
    check_seats(max_participants, auto_start_at, MAX_PARTICIPANTS as u8)?;
    Ok(blank(
        id,
        creator,
        GameKind::Slots,
        MatchMode::SlotTournament,
        StakeSpec::Range { min, max },
        max_participants,
        auto_start_at,
        link,
        now,
    ))
}

/// The daily slot jackpot (#100).
pub fn new_jackpot(now: u64) -> Match {
    blank(
        JACKPOT_MATCH_ID,
        SYSTEM_USER,
        GameKind::Dice,
        MatchMode::Auction100,
        StakeSpec::Fixed(TICKET_PRICE),
        JACKPOT_SEATS,
        0,
        JACKPOT_LINK.to_string(),
        now,
    )
}

/// The two-slot split lottery (#500).
pub fn new_split(now: u64) -> Match {
    blank(
        SPLIT_MATCH_ID,
        SYSTEM_USER,
        GameKind::Slots,
        MatchMode::Auction500,
        StakeSpec::Range {
            min: TICKET_PRICE,
            max: MAX_TICKET_PURCHASE,
        },
        SPLIT_TICKETS,
        0,
        SPLIT_LINK.to_string(),
        now,
    )
}

pub fn transition(m: &mut Match, next: MatchStatus) -> Result<(), PvpError> {
    if !m.status.can_transition_to(next) {
        return Err(PvpError::BadStatus(m.status));
    }
    m.status = next;
    Ok(())
}

fn filled(m: &Match) -> usize {
    match m.mode {
        MatchMode::Auction500 => m.sold_tickets(),
        _ => m.participants.len(),
    }
}

fn mark_ready_if_filled(m: &mut Match, now: u64) -> bool {
    if filled(m) >= m.start_threshold() && m.status == MatchStatus::Waiting {
        m.status = MatchStatus::Ready;
        m.started_at = Some(now);
        return true;
    }
    false
}

/// Free ticket positions for a purchase of `count` tickets costing `amount`.
///
/// Large purchases get the edge positions (1..=5, then 124..=128) before the rest; every
/// other purchase takes the lowest free positions. Occupied positions are never returned.
pub fn allocate_tickets(m: &Match, count: usize, amount: Amount) -> Result<Vec<u8>, PvpError> {
    let taken: Vec<u8> = m
        .participants
        .iter()
        .flat_map(|p| p.tickets.iter().copied())
        .collect();
    let free = |position: &u8| !taken.contains(position);

    let ascending = 1..=m.max_participants;
    let order: Vec<u8> = if amount > PREFERRED_TICKETS_ABOVE {
        let top = m.max_participants;
        let edges: Vec<u8> = (1..=5u8)
            .chain(top.saturating_sub(4)..=top)
            .filter(|p| *p >= 1 && *p <= top)
            .collect();
        edges
            .iter()
            .copied()
            .chain(ascending.filter(|p| !edges.contains(p)))
            .collect()
    } else {
        ascending.collect()
    };

    let mut tickets: Vec<u8> = order.into_iter().filter(free).take(count).collect();
    if tickets.len() < count {
        return Err(PvpError::Full);
    }
    tickets.sort_unstable();
    Ok(tickets)
}

/// Adds `user` to the match and returns what they owe.
///
/// `stake` is required for ranged matches and ignored-if-equal for fixed ones. Split
/// lottery purchases may be repeated; every other mode seats a user once.
pub fn join(
    m: &mut Match,
    user: UserId,
    stake: Option<Amount>,
    now: u64,
) -> Result<JoinReceipt, PvpError> {
    if m.status != MatchStatus::Waiting {
        return Err(PvpError::BadStatus(m.status));
    }
    let repeat_purchase = m.mode == MatchMode::Auction500 && m.is_joined(user);
    if m.is_joined(user) && !repeat_purchase {
        return Err(PvpError::AlreadyJoined);
    }
    if filled(m) >= m.max_participants as usize {
        return Err(PvpError::Full);
    }

    let (cost, tickets) = match (m.stake, m.mode) {
        (StakeSpec::Fixed(fixed), _) => match stake {
            Some(stake) if stake != fixed => return Err(PvpError::WrongStake { stake }),
            _ => (fixed, Vec::new()),
        },
        (StakeSpec::Range { min, max }, mode) => {
            let stake = stake.ok_or(PvpError::WrongStake { stake: Amount::ZERO })?;
            if stake < min || stake > max || !stake.is_multiple_of(TICKET_PRICE) {
                return Err(PvpError::WrongStake { stake });
            }
            if mode == MatchMode::Auction500 {
                let count = stake.count_of(TICKET_PRICE) as usize;
                (stake, allocate_tickets(m, count, stake)?)
            } else {
                (stake, Vec::new())
            }
        }
    };

    m.pot = m.pot.checked_add(cost).ok_or(LedgerError::Overflow)?;
    if repeat_purchase {
        if let Some(p) = m.participants.iter_mut().find(|p| p.user_id == user) {
            p.bet_amount = p.bet_amount.saturating_add(cost);
            p.tickets.extend_from_slice(&tickets);
            p.tickets.sort_unstable();
        }
    } else {
        let position = m.participants.len() as u8 + 1;
        let mut participant = Participant::new(user, position, cost);
        participant.tickets = tickets.clone();
        m.participants.push(participant);
    }
    let ready = mark_ready_if_filled(m, now);
    Ok(JoinReceipt {
        cost,
        tickets,
        ready,
    })
}

/// Fills one seat with the house bot (user 0) without a debit and readies the match.
pub fn add_bot(m: &mut Match, requester: UserId, now: u64) -> Result<(), PvpError> {
    if m.status != MatchStatus::Waiting {
        return Err(PvpError::BadStatus(m.status));
    }
    if m.mode != MatchMode::Standard {
        return Err(PvpError::InvalidMode("bot opponents only join standard matches"));
    }
    if !m.is_joined(requester) {
        return Err(PvpError::NotCreator);
    }
    if m.is_joined(SYSTEM_USER) {
        return Err(PvpError::AlreadyJoined);
    }
    if m.participants.len() >= m.max_participants as usize {
        return Err(PvpError::Full);
    }
    let stake = m.stake.nominal();
    let position = m.participants.len() as u8 + 1;
    m.participants
        .push(Participant::new(SYSTEM_USER, position, stake));
    m.pot = m.pot.saturating_add(stake);
    m.status = MatchStatus::Ready;
    m.started_at = Some(now);
    Ok(())
}

/// Cancels the match and returns the refunds owed, in join order.
///
/// The house bot never paid, so it is not refunded.
pub fn cancel(m: &mut Match, user: UserId, now: u64) -> Result<Vec<(UserId, Amount)>, PvpError> {
    if m.creator_id != user {
        return Err(PvpError::NotCreator);
    }
    transition(m, MatchStatus::Cancelled)?;
    m.pot = Amount::ZERO;
    m.finished_at = Some(now);
    Ok(m.participants
        .iter()
        .filter(|p| p.user_id != SYSTEM_USER)
        .map(|p| (p.user_id, p.bet_amount))
        .collect())
}

/// Moves a ready match to active.
pub fn begin(m: &mut Match, channel_message_id: Option<MessageId>) -> Result<(), PvpError> {
    transition(m, MatchStatus::Active)?;
    m.channel_message_id = channel_message_id;
    Ok(())
}

pub fn record_throw(m: &mut Match, user: UserId, value: u8, message_id: MessageId) {
    if let Some(p) = m.participants.iter_mut().find(|p| p.user_id == user) {
        p.throw_value = Some(value);
        p.throw_message_id = Some(message_id);
    }
}

/// Clears every recorded throw ahead of a re-roll.
pub fn clear_throws(m: &mut Match) {
    for p in &mut m.participants {
        p.throw_value = None;
        p.throw_message_id = None;
    }
}

/// Picks the unique highest thrower, if any. Participants without a throw are ignored.
pub fn resolve_highest(m: &Match) -> Round {
    let top = m.participants.iter().filter_map(|p| p.throw_value).max();
    let tied: Vec<UserId> = m
        .participants
        .iter()
        .filter(|p| top.is_some() && p.throw_value == top)
        .map(|p| p.user_id)
        .collect();
    match tied.as_slice() {
        [winner] => Round::Winner(*winner),
        _ => Round::Tie(tied),
    }
}

/// Earliest-joined of `tied`, used once re-rolls are exhausted.
pub fn tie_fallback(m: &Match, tied: &[UserId]) -> Option<UserId> {
    m.participants
        .iter()
        .find(|p| tied.contains(&p.user_id))
        .map(|p| p.user_id)
}

/// Seat named by a jackpot slot value, if the value is a seat number that is taken.
pub fn jackpot_seat(m: &Match, value: u8) -> Option<UserId> {
    if !(1..=JACKPOT_SEATS).contains(&value) {
        return None;
    }
    m.participants
        .iter()
        .find(|p| p.position == value)
        .map(|p| p.user_id)
}

pub fn first_joiner(m: &Match) -> Option<UserId> {
    m.participants.first().map(|p| p.user_id)
}

/// Ticket positions named by the two split-lottery slot values.
pub fn split_positions(first: u8, second: u8) -> (u8, u8) {
    let tickets = SPLIT_TICKETS as u16;
    let p1 = ((first.max(1) as u16 - 1) % tickets) + 1;
    let p2 = match (p1 + second as u16) % tickets {
        0 => tickets,
        p => p,
    };
    (p1 as u8, p2 as u8)
}

pub fn ticket_owner(m: &Match, position: u8) -> Option<UserId> {
    m.participants
        .iter()
        .find(|p| p.tickets.contains(&position))
        .map(|p| p.user_id)
}

fn lowest_ticket(m: &Match, except: Option<u8>) -> Option<(u8, UserId)> {
    m.participants
        .iter()
        .flat_map(|p| p.tickets.iter().map(move |t| (*t, p.user_id)))
        .filter(|(t, _)| Some(*t) != except)
        .min_by_key(|(t, _)| *t)
}

/// Both split-lottery winners. Unsold positions fall back to the lowest sold ticket (for the
/// second winner, the lowest sold ticket other than the first winner's).
pub fn resolve_split(m: &Match, first: u8, second: u8) -> Option<(UserId, UserId)> {
    let (p1, p2) = split_positions(first, second);
    let (p1, winner1) = match ticket_owner(m, p1) {
        Some(owner) => (p1, owner),
        None => lowest_ticket(m, None)?,
    };
    let winner2 = match ticket_owner(m, p2).filter(|_| p2 != p1) {
        Some(owner) => owner,
        None => lowest_ticket(m, Some(p1)).map(|(_, owner)| owner).unwrap_or(winner1),
    };
    Some((winner1, winner2))
}

/// Splits the pot between `winners` after commission. The odd remainder goes to the first.
pub fn payout(pot: Amount, winners: &[UserId], commission_bps: u32) -> Payout {
    let commission = pot.share(commission_bps);
    let prize_pool = pot.saturating_sub(commission);
    if winners.is_empty() {
        return Payout {
            commission,
            prizes: Vec::new(),
        };
    }
    let share = Amount::from_micros(prize_pool.micros() / winners.len() as u64);
    let remainder = prize_pool.saturating_sub(Amount::from_micros(
        share.micros() * winners.len() as u64,
    ));
    let prizes = winners
        .iter()
        .enumerate()
        .map(|(i, winner)| {
            let prize = if i == 0 {
                share.saturating_add(remainder)
            } else {
                share
            };
            (*winner, prize)
        })
        .collect();
    Payout { commission, prizes }
}

pub fn finish(m: &mut Match, winners: Vec<UserId>, now: u64) -> Result<(), PvpError> {
    transition(m, MatchStatus::Finished)?;
    m.winners = winners;
    m.finished_at = Some(now);
    Ok(())
}

/// Parks an active match for manual settlement. The pot is left untouched.
pub fn review(m: &mut Match, now: u64) -> Result<(), PvpError> {
    transition(m, MatchStatus::Review)?;
    m.finished_at = Some(now);
    Ok(())
}

/// Allocates the next regular match id. Reserved ids are never handed out.
pub async fn allocate_id<S: State>(state: &mut S) -> Result<u64, PvpError> {
    loop {
        let id = next_id(state, Key::MatchCounter).await?;
        if id != JACKPOT_MATCH_ID && id != SPLIT_MATCH_ID {
            return Ok(id);
        }
    }
}

pub async fn store<S: State>(state: &mut S, m: &Match) -> Result<(), PvpError> {
    state
        .insert(Key::MatchLink(m.link.clone()), Value::MatchId(m.id))
        .await?;
    state.insert(Key::Match(m.id), Value::Match(m.clone())).await?;
    Ok(())
}

pub async fn get<S: State>(state: &S, id: u64) -> Result<Match, PvpError> {
    load_match(state, id)
        .await?
        .ok_or_else(|| PvpError::UnknownMatch(id.to_string()))
}

pub async fn get_by_link<S: State>(state: &S, link: &str) -> Result<Match, PvpError> {
    match state.get(&Key::MatchLink(link.to_string())).await? {
        Some(Value::MatchId(id)) => get(state, id).await,
        _ => Err(PvpError::UnknownMatch(link.to_string())),
    }
}

/// Creates a standard match and enrolls the creator, debiting their stake.
#[allow(clippy::too_many_arguments)]
pub async fn create_standard<S: State>(
    state: &mut S,
    creator: UserId,
    game: GameKind,
    stake: Amount,
    max_participants: u8,
    auto_start_at: u8,
    link: String,
    now: u64,
) -> Result<Match, PvpError> {
    let id = allocate_id(state).await?;
    let mut m = new_standard(id, creator, game, stake, max_participants, auto_start_at, link, now)?;
    let receipt = join(&mut m, creator, None, now)?;
    ledger::update(state, creator, |account| {
        ledger::debit(account, receipt.cost, Currency::Main)
    })
    .await?;
    store(state, &m).await?;
    info!(match_id = m.id, creator, %stake, "pvp match created");
    Ok(m)
}

/// Creates a slot tournament. Nobody is enrolled yet.
#[allow(clippy::too_many_arguments)]
pub async fn create_slot_tournament<S: State>(
    state: &mut S,
    creator: UserId,
    min: Amount,
    max: Amount,
    max_participants: u8,
    auto_start_at: u8,
    link: String,
    now: u64,
) -> Result<Match, PvpError> {
    let id = allocate_id(state).await?;
    let m = new_slot_tournament(id, creator, min, max, max_participants, auto_start_at, link, now)?;
    store(state, &m).await?;
    info!(match_id = m.id, creator, "slot tournament created");
    Ok(m)
}

/// Stores `m` unless a match with the same id already exists. Returns the stored match.
pub async fn ensure<S: State>(state: &mut S, m: Match) -> Result<Match, PvpError> {
    if let Some(existing) = load_match(state, m.id).await? {
        return Ok(existing);
    }
    store(state, &m).await?;
    info!(match_id = m.id, link = %m.link, "special match opened");
    Ok(m)
}

/// Joins `user` to match `id`, debiting them.
pub async fn join_match<S: State>(
    state: &mut S,
    id: u64,
    user: UserId,
    stake: Option<Amount>,
    now: u64,
) -> Result<(Match, JoinReceipt), PvpError> {
    let mut m = get(state, id).await?;
    let receipt = join(&mut m, user, stake, now)?;
    ledger::update(state, user, |account| {
        ledger::debit(account, receipt.cost, Currency::Main)
    })
    .await?;
    store(state, &m).await?;
    debug!(match_id = id, user, cost = %receipt.cost, ready = receipt.ready, "joined match");
    Ok((m, receipt))
}

/// Cancels match `id` and refunds every paying participant.
pub async fn cancel_match<S: State>(
    state: &mut S,
    id: u64,
    user: UserId,
    now: u64,
) -> Result<(Match, Vec<(UserId, Amount)>), PvpError> {
    let mut m = get(state, id).await?;
    let refunds = cancel(&mut m, user, now)?;
    for (participant, amount) in &refunds {
        let amount = *amount;
        ledger::update(state, *participant, |account| {
            ledger::credit(account, amount, Currency::Main)
        })
        .await?;
    }
    store(state, &m).await?;
    info!(match_id = id, refunds = refunds.len(), "pvp match cancelled");
    Ok((m, refunds))
}

/// Pays the winners of an active match and marks it finished.
pub async fn settle<S: State>(
    state: &mut S,
    m: &mut Match,
    winners: Vec<UserId>,
    commission_bps: u32,
    now: u64,
) -> Result<Payout, PvpError> {
    let payout = payout(m.pot, &winners, commission_bps);
    finish(m, winners, now)?;
    for (winner, prize) in &payout.prizes {
        let prize = *prize;
        ledger::update(state, *winner, |account| {
            ledger::credit(account, prize, Currency::Main)
        })
        .await?;
    }
    store(state, m).await?;
    Ok(payout)
}
