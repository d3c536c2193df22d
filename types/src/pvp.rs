use crate::codec::{read_str, str_encode_size, write_str, MAX_LINK_LENGTH};
use crate::game::GameKind;
use crate::money::Amount;
use crate::{MessageId, UserId};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, ReadRangeExt, Write};
use serde::{Deserialize, Serialize};

/// Price of one ticket in the two-slot split lottery.
pub const TICKET_PRICE: Amount = Amount::from_cents(10);

/// Number of ticket positions in the two-slot split lottery.
pub const SPLIT_TICKETS: u8 = 128;

/// Seats in the daily slot-jackpot match.
pub const JACKPOT_SEATS: u8 = 25;

/// Id of the daily slot-jackpot match.
pub const JACKPOT_MATCH_ID: u64 = 100;

/// Id of the two-slot split lottery.
pub const SPLIT_MATCH_ID: u64 = 500;

/// Upper bound on participants for any match.
pub const MAX_PARTICIPANTS: usize = SPLIT_TICKETS as usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MatchMode {
    /// Fixed stake, one seat per participant, highest throw wins.
    Standard = 0,
    /// Variable stake within bounds, creator not enrolled.
    SlotTournament = 1,
    /// The daily slot jackpot: one slot throw names the winning seat.
    Auction100 = 2,
    /// Ticket lottery settled by two slot throws and split between two winners.
    Auction500 = 3,
}

impl TryFrom<u8> for MatchMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MatchMode::Standard),
            1 => Ok(MatchMode::SlotTournament),
            2 => Ok(MatchMode::Auction100),
            3 => Ok(MatchMode::Auction500),
            other => Err(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MatchStatus {
    Waiting = 0,
    Ready = 1,
    Active = 2,
    Finished = 3,
    Cancelled = 4,
    /// Execution failed after the pot was committed; an operator must settle it.
    Review = 5,
}

impl MatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MatchStatus::Finished | MatchStatus::Cancelled | MatchStatus::Review
        )
    }

    pub fn can_transition_to(&self, next: MatchStatus) -> bool {
        matches!(
            (self, next),
            (MatchStatus::Waiting, MatchStatus::Ready)
                | (MatchStatus::Waiting, MatchStatus::Cancelled)
                | (MatchStatus::Ready, MatchStatus::Active)
                | (MatchStatus::Ready, MatchStatus::Cancelled)
                | (MatchStatus::Active, MatchStatus::Finished)
                | (MatchStatus::Active, MatchStatus::Review)
        )
    }
}

impl TryFrom<u8> for MatchStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MatchStatus::Waiting),
            1 => Ok(MatchStatus::Ready),
            2 => Ok(MatchStatus::Active),
            3 => Ok(MatchStatus::Finished),
            4 => Ok(MatchStatus::Cancelled),
            5 => Ok(MatchStatus::Review),
            other => Err(other),
        }
    }
}

/// What a participant pays to enter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeSpec {
    Fixed(Amount),
    Range { min: Amount, max: Amount },
}

impl StakeSpec {
    /// The stake credited to the pot for a bot or a fixed-stake seat.
    pub fn nominal(&self) -> Amount {
        match self {
            StakeSpec::Fixed(stake) => *stake,
            StakeSpec::Range { min, .. } => *min,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub user_id: UserId,
    /// 1-based join order.
    pub position: u8,
    pub bet_amount: Amount,
    pub throw_value: Option<u8>,
    pub throw_message_id: Option<MessageId>,
    /// Ticket positions owned in the split lottery (empty elsewhere).
    pub tickets: Vec<u8>,
}

impl Participant {
    pub fn new(user_id: UserId, position: u8, bet_amount: Amount) -> Self {
        Self {
            user_id,
            position,
            bet_amount,
            throw_value: None,
            throw_message_id: None,
            tickets: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Match {
    pub id: u64,
    pub creator_id: UserId,
    pub game: GameKind,
    pub mode: MatchMode,
    pub stake: StakeSpec,
    /// Seat count, or ticket count for the split lottery.
    pub max_participants: u8,
    /// Participants needed to become ready (0 = `max_participants`).
    pub auto_start_at: u8,
    pub status: MatchStatus,
    pub participants: Vec<Participant>,
    pub pot: Amount,
    /// One winner, or two for the split lottery.
    pub winners: Vec<UserId>,
    pub link: String,
    pub channel_message_id: Option<MessageId>,
    /// Unix milliseconds.
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
}

impl Match {
    pub fn participant(&self, user: UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user)
    }

    pub fn is_joined(&self, user: UserId) -> bool {
        self.participant(user).is_some()
    }

    pub fn sold_tickets(&self) -> usize {
        self.participants.iter().map(|p| p.tickets.len()).sum()
    }

    /// Participants (or tickets) needed before the match becomes ready.
    pub fn start_threshold(&self) -> usize {
        if self.auto_start_at > 0 {
            self.auto_start_at as usize
        } else {
            self.max_participants as usize
        }
    }

    pub fn winner_id(&self) -> Option<UserId> {
        self.winners.first().copied()
    }

    /// Sum of recorded bets; equals `pot` whenever no bot seat is present.
    pub fn total_bets(&self) -> Amount {
        self.participants
            .iter()
            .fold(Amount::ZERO, |acc, p| acc.saturating_add(p.bet_amount))
    }
}

impl Write for MatchMode {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for MatchMode {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        MatchMode::try_from(u8::read(reader)?).map_err(Error::InvalidEnum)
    }
}

impl EncodeSize for MatchMode {
    fn encode_size(&self) -> usize {
        1
    }
}

impl Write for MatchStatus {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for MatchStatus {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        MatchStatus::try_from(u8::read(reader)?).map_err(Error::InvalidEnum)
    }
}

impl EncodeSize for MatchStatus {
    fn encode_size(&self) -> usize {
        1
    }
}

impl Write for StakeSpec {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            StakeSpec::Fixed(stake) => {
                0u8.write(writer);
                stake.write(writer);
            }
            StakeSpec::Range { min, max } => {
                1u8.write(writer);
                min.write(writer);
                max.write(writer);
            }
        }
    }
}

impl Read for StakeSpec {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        match u8::read(reader)? {
            0 => Ok(StakeSpec::Fixed(Amount::read(reader)?)),
            1 => Ok(StakeSpec::Range {
                min: Amount::read(reader)?,
                max: Amount::read(reader)?,
            }),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for StakeSpec {
    fn encode_size(&self) -> usize {
        1 + match self {
            StakeSpec::Fixed(stake) => stake.encode_size(),
            StakeSpec::Range { min, max } => min.encode_size() + max.encode_size(),
        }
    }
}

impl Write for Participant {
    fn write(&self, writer: &mut impl BufMut) {
        self.user_id.write(writer);
        self.position.write(writer);
        self.bet_amount.write(writer);
        self.throw_value.write(writer);
        self.throw_message_id.write(writer);
        self.tickets.write(writer);
    }
}

impl Read for Participant {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            user_id: UserId::read(reader)?,
            position: u8::read(reader)?,
            bet_amount: Amount::read(reader)?,
            throw_value: Option::<u8>::read(reader)?,
            throw_message_id: Option::<MessageId>::read(reader)?,
            tickets: Vec::<u8>::read_range(reader, 0..=SPLIT_TICKETS as usize)?,
        })
    }
}

impl EncodeSize for Participant {
    fn encode_size(&self) -> usize {
        self.user_id.encode_size()
            + self.position.encode_size()
            + self.bet_amount.encode_size()
            + self.throw_value.encode_size()
            + self.throw_message_id.encode_size()
            + self.tickets.encode_size()
    }
}

impl Write for Match {
    fn write(&self, writer: &mut impl BufMut) {
        self.id.write(writer);
        self.creator_id.write(writer);
        self.game.write(writer);
        self.mode.write(writer);
        self.stake.write(writer);
        self.max_participants.write(writer);
        self.auto_start_at.write(writer);
        self.status.write(writer);
        self.participants.write(writer);
        self.pot.write(writer);
        self.winners.write(writer);
        write_str(&self.link, writer);
        self.channel_message_id.write(writer);
        self.created_at.write(writer);
        self.started_at.write(writer);
        self.finished_at.write(writer);
    }
}

impl Read for Match {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            id: u64::read(reader)?,
            creator_id: UserId::read(reader)?,
            game: GameKind::read(reader)?,
            mode: MatchMode::read(reader)?,
            stake: StakeSpec::read(reader)?,
            max_participants: u8::read(reader)?,
            auto_start_at: u8::read(reader)?,
            status: MatchStatus::read(reader)?,
            participants: Vec::<Participant>::read_range(reader, 0..=MAX_PARTICIPANTS)?,
            pot: Amount::read(reader)?,
            winners: Vec::<UserId>::read_range(reader, 0..=2)?,
            link: read_str(reader, MAX_LINK_LENGTH, "link")?,
            channel_message_id: Option::<MessageId>::read(reader)?,
            created_at: u64::read(reader)?,
            started_at: Option::<u64>::read(reader)?,
            finished_at: Option::<u64>::read(reader)?,
        })
    }
}

impl EncodeSize for Match {
    fn encode_size(&self) -> usize {
        self.id.encode_size()
            + self.creator_id.encode_size()
            + self.game.encode_size()
            + self.mode.encode_size()
            + self.stake.encode_size()
            + self.max_participants.encode_size()
            + self.auto_start_at.encode_size()
            + self.status.encode_size()
            + self.participants.encode_size()
            + self.pot.encode_size()
            + self.winners.encode_size()
            + str_encode_size(&self.link)
            + self.channel_message_id.encode_size()
            + self.created_at.encode_size()
            + self.started_at.encode_size()
            + self.finished_at.encode_size()
    }
}
