//! Keys and values persisted by every `State` backend.

use crate::account::{Account, ChainPayment};
use crate::codec::{read_str, str_encode_size, write_str, MAX_LINK_LENGTH, MAX_TX_HASH_LENGTH};
use crate::game::GameRecord;
use crate::pvp::Match;
use crate::UserId;
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, ReadRangeExt, Write};

/// Most recent game ids remembered per user.
pub const MAX_USER_GAMES: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Ledger row (tag 0)
    Account(UserId),

    // Journal (tags 1-3)
    Game(u64),
    GameCounter,
    UserGames(UserId),

    // PvP (tags 4-6)
    Match(u64),
    MatchCounter,
    MatchLink(String),

    /// Processed chain deposit (tag 7)
    ChainPayment(String),
}

impl Write for Key {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Account(user) => {
                0u8.write(writer);
                user.write(writer);
            }
            Self::Game(id) => {
                1u8.write(writer);
                id.write(writer);
            }
            Self::GameCounter => 2u8.write(writer),
            Self::UserGames(user) => {
                3u8.write(writer);
                user.write(writer);
            }
            Self::Match(id) => {
                4u8.write(writer);
                id.write(writer);
            }
            Self::MatchCounter => 5u8.write(writer),
            Self::MatchLink(link) => {
                6u8.write(writer);
                write_str(link, writer);
            }
            Self::ChainPayment(hash) => {
                7u8.write(writer);
                write_str(hash, writer);
            }
        }
    }
}

impl Read for Key {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let key = match u8::read(reader)? {
            0 => Self::Account(UserId::read(reader)?),
            1 => Self::Game(u64::read(reader)?),
            2 => Self::GameCounter,
            3 => Self::UserGames(UserId::read(reader)?),
            4 => Self::Match(u64::read(reader)?),
            5 => Self::MatchCounter,
            6 => Self::MatchLink(read_str(reader, MAX_LINK_LENGTH, "link")?),
            7 => Self::ChainPayment(read_str(reader, MAX_TX_HASH_LENGTH, "tx_hash")?),
            i => return Err(Error::InvalidEnum(i)),
        };
        Ok(key)
    }
}

impl EncodeSize for Key {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Account(user) | Self::UserGames(user) => user.encode_size(),
            Self::Game(id) | Self::Match(id) => id.encode_size(),
            Self::GameCounter | Self::MatchCounter => 0,
            Self::MatchLink(s) | Self::ChainPayment(s) => str_encode_size(s),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Value {
    Account(Account),
    Game(GameRecord),
    /// Last allocated id for [Key::GameCounter] and [Key::MatchCounter].
    Counter(u64),
    /// Newest-first game ids for [Key::UserGames].
    GameIndex(Vec<u64>),
    Match(Match),
    /// Match id behind a [Key::MatchLink].
    MatchId(u64),
    ChainPayment(ChainPayment),
}

impl Write for Value {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Account(account) => {
                0u8.write(writer);
                account.write(writer);
            }
            Self::Game(record) => {
                1u8.write(writer);
                record.write(writer);
            }
            Self::Counter(value) => {
                2u8.write(writer);
                value.write(writer);
            }
            Self::GameIndex(ids) => {
                3u8.write(writer);
                ids.write(writer);
            }
            Self::Match(m) => {
                4u8.write(writer);
                m.write(writer);
            }
            Self::MatchId(id) => {
                5u8.write(writer);
                id.write(writer);
            }
            Self::ChainPayment(payment) => {
                6u8.write(writer);
                payment.write(writer);
            }
        }
    }
}

impl Read for Value {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value = match u8::read(reader)? {
            0 => Self::Account(Account::read(reader)?),
            1 => Self::Game(GameRecord::read(reader)?),
            2 => Self::Counter(u64::read(reader)?),
            3 => Self::GameIndex(Vec::<u64>::read_range(reader, 0..=MAX_USER_GAMES)?),
            4 => Self::Match(Match::read(reader)?),
            5 => Self::MatchId(u64::read(reader)?),
            6 => Self::ChainPayment(ChainPayment::read(reader)?),
            i => return Err(Error::InvalidEnum(i)),
        };
        Ok(value)
    }
}

impl EncodeSize for Value {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Account(account) => account.encode_size(),
            Self::Game(record) => record.encode_size(),
            Self::Counter(value) | Self::MatchId(value) => value.encode_size(),
            Self::GameIndex(ids) => ids.encode_size(),
            Self::Match(m) => m.encode_size(),
            Self::ChainPayment(payment) => payment.encode_size(),
        }
    }
}
