use crate::codec::{read_str, str_encode_size, write_str, MAX_BET_NAME_LENGTH};
use crate::money::{Amount, Currency};
use crate::UserId;
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Games that resolve through an animated dice-style throw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum GameKind {
    #[serde(rename = "dice")]
    Dice = 0,
    #[serde(rename = "dart")]
    Dart = 1,
    #[serde(rename = "bowling")]
    Bowling = 2,
    #[serde(rename = "football")]
    Football = 3,
    #[serde(rename = "basketball")]
    Basketball = 4,
    #[serde(rename = "slots")]
    Slots = 5,
    /// Two dice summed against seven.
    #[serde(rename = "dice_7")]
    Dice7 = 6,
}

impl GameKind {
    pub const ALL: [GameKind; 7] = [
        GameKind::Dice,
        GameKind::Dart,
        GameKind::Bowling,
        GameKind::Football,
        GameKind::Basketball,
        GameKind::Slots,
        GameKind::Dice7,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameKind::Dice => "dice",
            GameKind::Dart => "dart",
            GameKind::Bowling => "bowling",
            GameKind::Football => "football",
            GameKind::Basketball => "basketball",
            GameKind::Slots => "slots",
            GameKind::Dice7 => "dice_7",
        }
    }

    /// The animated emoji the randomness source is asked to throw.
    pub fn emoji(&self) -> Emoji {
        match self {
            GameKind::Dice | GameKind::Dice7 => Emoji::Dice,
            GameKind::Dart => Emoji::Dart,
            GameKind::Bowling => Emoji::Bowling,
            GameKind::Football => Emoji::Football,
            GameKind::Basketball => Emoji::Basketball,
            GameKind::Slots => Emoji::Slots,
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown game: {s}"))
    }
}

impl TryFrom<u8> for GameKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        GameKind::ALL
            .into_iter()
            .find(|kind| *kind as u8 == value)
            .ok_or(value)
    }
}

impl Write for GameKind {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for GameKind {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let tag = u8::read(reader)?;
        GameKind::try_from(tag).map_err(Error::InvalidEnum)
    }
}

impl EncodeSize for GameKind {
    fn encode_size(&self) -> usize {
        1
    }
}

/// Emoji kinds understood by the randomness source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Emoji {
    Dice,
    Dart,
    Bowling,
    Football,
    Basketball,
    Slots,
}

impl Emoji {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emoji::Dice => "🎲",
            Emoji::Dart => "🎯",
            Emoji::Bowling => "🎳",
            Emoji::Football => "⚽",
            Emoji::Basketball => "🏀",
            Emoji::Slots => "🎰",
        }
    }

    /// Inclusive range of values the source produces for this emoji.
    pub fn value_range(&self) -> (u8, u8) {
        match self {
            Emoji::Dice | Emoji::Dart | Emoji::Bowling => (1, 6),
            Emoji::Football | Emoji::Basketball => (1, 5),
            Emoji::Slots => (1, 64),
        }
    }

    pub fn accepts(&self, value: u8) -> bool {
        let (min, max) = self.value_range();
        (min..=max).contains(&value)
    }
}

impl fmt::Display for Emoji {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
}

/// One reel symbol of the slot machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotSymbol {
    Seven,
    Bar,
    Grape,
    Lemon,
}

impl SlotSymbol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotSymbol::Seven => "7️⃣",
            SlotSymbol::Bar => "BAR",
            SlotSymbol::Grape => "🍇",
            SlotSymbol::Lemon => "🍋",
        }
    }
}

/// Journal row for one settled game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GameRecord {
    pub id: u64,
    pub user_id: UserId,
    pub kind: GameKind,
    pub bet_type: String,
    pub stake: Amount,
    /// Compact outcome: the throw value, or the sum for multi-throw bets.
    pub result: u32,
    pub win: Amount,
    pub currency: Currency,
    /// Unix milliseconds.
    pub timestamp: u64,
}

impl Write for GameRecord {
    fn write(&self, writer: &mut impl BufMut) {
        self.id.write(writer);
        self.user_id.write(writer);
        self.kind.write(writer);
        write_str(&self.bet_type, writer);
        self.stake.write(writer);
        self.result.write(writer);
        self.win.write(writer);
        self.currency.write(writer);
        self.timestamp.write(writer);
    }
}

impl Read for GameRecord {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            id: u64::read(reader)?,
            user_id: UserId::read(reader)?,
            kind: GameKind::read(reader)?,
            bet_type: read_str(reader, MAX_BET_NAME_LENGTH, "bet_type")?,
            stake: Amount::read(reader)?,
            result: u32::read(reader)?,
            win: Amount::read(reader)?,
            currency: Currency::read(reader)?,
            timestamp: u64::read(reader)?,
        })
    }
}

impl EncodeSize for GameRecord {
    fn encode_size(&self) -> usize {
        self.id.encode_size()
            + self.user_id.encode_size()
            + self.kind.encode_size()
            + str_encode_size(&self.bet_type)
            + self.stake.encode_size()
            + self.result.encode_size()
            + self.win.encode_size()
            + self.currency.encode_size()
            + self.timestamp.encode_size()
    }
}

/// The bet a user can repeat with one tap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastGame {
    pub kind: GameKind,
    pub bet_type: String,
    pub stake: Amount,
    pub currency: Currency,
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::Encode;

    #[test]
    fn game_kind_names_round_trip() {
        for kind in GameKind::ALL {
            assert_eq!(kind.as_str().parse::<GameKind>(), Ok(kind));
            assert_eq!(GameKind::try_from(kind as u8), Ok(kind));
        }
        assert!("darts".parse::<GameKind>().is_err());
        assert_eq!(GameKind::try_from(7), Err(7));
    }

    #[test]
    fn game_kind_serde_uses_wire_names() {
        assert_eq!(serde_json::to_string(&GameKind::Dice7).unwrap(), "\"dice_7\"");
        let kind: GameKind = serde_json::from_str("\"basketball\"").unwrap();
        assert_eq!(kind, GameKind::Basketball);
    }

    #[test]
    fn dice_7_throws_regular_dice() {
        assert_eq!(GameKind::Dice7.emoji(), Emoji::Dice);
        assert_eq!(GameKind::Slots.emoji().value_range(), (1, 64));
        assert!(Emoji::Football.accepts(5));
        assert!(!Emoji::Football.accepts(6));
        assert!(!Emoji::Dice.accepts(0));
    }

    #[test]
    fn game_record_codec() {
        let record = GameRecord {
            id: 3,
            user_id: 11,
            kind: GameKind::Dice,
            bet_type: "even".into(),
            stake: Amount::from_units(1),
            result: 4,
            win: Amount::from_cents(190),
            currency: Currency::Main,
            timestamp: 1_700_000_000_000,
        };
        let encoded = record.encode();
        assert_eq!(encoded.len(), record.encode_size());
        assert_eq!(GameRecord::read(&mut &encoded[..]).unwrap(), record);
    }

    #[test]
    fn game_record_rejects_unknown_kind() {
        let record = GameRecord {
            id: 1,
            user_id: 1,
            kind: GameKind::Slots,
            bet_type: "none".into(),
            stake: Amount::from_cents(50),
            result: 0,
            win: Amount::ZERO,
            currency: Currency::Demo,
            timestamp: 0,
        };
        let mut encoded = record.encode().to_vec();
        // The kind tag follows the two u64/i64 fields.
        encoded[16] = 42;
        assert!(matches!(
            GameRecord::read(&mut &encoded[..]),
            Err(Error::InvalidEnum(42))
        ));
    }
}
