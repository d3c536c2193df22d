//! Static table of games, bet types and their win predicates.
//!
//! Values are the raw integers produced by the animated emoji: 1..=6 for dice, dart and
//! bowling, 1..=5 for football and basketball, 1..=64 for slots. Dart encodes the bullseye as
//! 6 and a miss as 1; football counts 3..=5 as goals; basketball counts 4..=5 as hits.

use arbuz_types::{Amount, Currency, GameKind, Multiplier, SlotSymbol};
use thiserror::Error;

use self::Predicate::{AllIn, Pair, SlotTriple, SumAbove, SumBelow, SumEquals};
use arbuz_types::GameKind::{Basketball, Bowling, Dart, Dice, Dice7, Football, Slots};

/// How a bet's throws are judged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Predicate {
    /// Every throw is one of the listed values.
    AllIn(&'static [u8]),
    /// The first two throws are equal.
    Pair,
    /// The throws add up to exactly this total.
    SumEquals(u32),
    SumBelow(u32),
    SumAbove(u32),
    /// The slot reels show three of a kind (payout depends on the symbol).
    SlotTriple,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BetSpec {
    pub game: GameKind,
    pub name: &'static str,
    /// Payout on a win. For slots this is the top (777) multiplier.
    pub multiplier: Multiplier,
    pub required_throws: usize,
    pub predicate: Predicate,
}

impl BetSpec {
    /// Returns the payout multiplier if the throws win this bet.
    ///
    /// Only the first `required_throws` values are considered; fewer values never win.
    pub fn evaluate(&self, throws: &[u8]) -> Option<Multiplier> {
        if throws.len() < self.required_throws {
            return None;
        }
        let throws = &throws[..self.required_throws];
        let sum: u32 = throws.iter().map(|v| *v as u32).sum();
        let won = match self.predicate {
            Predicate::AllIn(values) => throws.iter().all(|v| values.contains(v)),
            Predicate::Pair => throws.len() >= 2 && throws[0] == throws[1],
            Predicate::SumEquals(total) => sum == total,
            Predicate::SumBelow(total) => sum < total,
            Predicate::SumAbove(total) => sum > total,
            Predicate::SlotTriple => return slot_multiplier(throws[0]),
        };
        won.then_some(self.multiplier)
    }
}

const fn bet(
    game: GameKind,
    name: &'static str,
    hundredths: u32,
    required_throws: usize,
    predicate: Predicate,
) -> BetSpec {
    BetSpec {
        game,
        name,
        multiplier: Multiplier::from_hundredths(hundredths),
        required_throws,
        predicate,
    }
}

const EVEN: &[u8] = &[2, 4, 6];
const ODD: &[u8] = &[1, 3, 5];

/// Every bet the engine accepts.
pub const BETS: &[BetSpec] = &[
    bet(Dice, "even", 190, 1, AllIn(EVEN)),
    bet(Dice, "odd", 190, 1, AllIn(ODD)),
    bet(Dice, "exact_1", 555, 1, AllIn(&[1])),
    bet(Dice, "exact_2", 555, 1, AllIn(&[2])),
    bet(Dice, "exact_3", 555, 1, AllIn(&[3])),
    bet(Dice, "exact_4", 555, 1, AllIn(&[4])),
    bet(Dice, "exact_5", 555, 1, AllIn(&[5])),
    bet(Dice, "exact_6", 555, 1, AllIn(&[6])),
    bet(Dice, "pair", 555, 2, Pair),
    bet(Dice, "3_even", 700, 3, AllIn(EVEN)),
    bet(Dice, "3_odd", 700, 3, AllIn(ODD)),
    bet(Dice, "18", 800, 5, SumEquals(18)),
    bet(Dice, "21", 1_100, 5, SumEquals(21)),
    bet(Dice, "111", 10_000, 3, AllIn(&[1])),
    bet(Dice, "333", 10_000, 3, AllIn(&[3])),
    bet(Dice, "666", 10_000, 3, AllIn(&[6])),
    bet(Dice7, "less_7", 240, 2, SumBelow(7)),
    bet(Dice7, "equal_7", 600, 2, SumEquals(7)),
    bet(Dice7, "more_7", 240, 2, SumAbove(7)),
    bet(Dart, "red", 140, 1, AllIn(EVEN)),
    bet(Dart, "white", 200, 1, AllIn(&[3, 5])),
    bet(Dart, "center", 600, 1, AllIn(&[6])),
    bet(Dart, "miss", 600, 1, AllIn(&[1])),
    bet(Dart, "3_red", 700, 3, AllIn(EVEN)),
    bet(Dart, "3_white", 2_100, 3, AllIn(&[3, 5])),
    bet(Dart, "3_center", 10_000, 3, AllIn(&[6])),
    bet(Dart, "3_miss", 10_000, 3, AllIn(&[1])),
    bet(Bowling, "0-3", 190, 1, AllIn(&[1, 2, 3])),
    bet(Bowling, "4-6", 190, 1, AllIn(&[4, 5, 6])),
    bet(Bowling, "strike", 500, 1, AllIn(&[6])),
    bet(Bowling, "miss", 500, 1, AllIn(&[1])),
    bet(Bowling, "2_strike", 3_000, 2, AllIn(&[6])),
    bet(Bowling, "2_miss", 3_000, 2, AllIn(&[1])),
    bet(Bowling, "3_strike", 10_000, 3, AllIn(&[6])),
    bet(Bowling, "3_miss", 10_000, 3, AllIn(&[1])),
    bet(Football, "goal", 140, 1, AllIn(&[3, 4, 5])),
    bet(Football, "miss", 250, 1, AllIn(&[1, 2])),
    bet(Football, "center", 190, 1, AllIn(&[3])),
    bet(Football, "hattrick", 400, 3, AllIn(&[3, 4, 5])),
    bet(Football, "5_goals", 1_100, 5, AllIn(&[3, 4, 5])),
    bet(Football, "10_goals", 10_000, 10, AllIn(&[3, 4, 5])),
    bet(Football, "6_miss", 10_000, 6, AllIn(&[1, 2, 3])),
    bet(Basketball, "hit", 200, 1, AllIn(&[4, 5])),
    bet(Basketball, "miss", 140, 1, AllIn(&[1, 2])),
    bet(Basketball, "clean", 600, 1, AllIn(&[5])),
    bet(Basketball, "stuck", 500, 1, AllIn(&[3])),
    bet(Basketball, "2_hit", 500, 2, AllIn(&[4, 5])),
    bet(Basketball, "3_hit", 1_200, 3, AllIn(&[4, 5])),
    bet(Basketball, "6_hit", 10_000, 6, AllIn(&[4, 5])),
    bet(Basketball, "2_clean", 1_500, 2, AllIn(&[5])),
    bet(Basketball, "3_clean", 7_700, 3, AllIn(&[5])),
    bet(Slots, SLOTS_BET, 2_000, 1, SlotTriple),
];

/// The only bet type slots accept.
pub const SLOTS_BET: &str = "none";

/// Most consecutive slot pulls a single request may ask for.
pub const MAX_SLOT_PULLS: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown bet {bet} for {game}")]
    UnknownBet { game: GameKind, bet: String },
    #[error("stake {stake} outside [{min}, {max}]")]
    StakeOutOfRange {
        stake: Amount,
        min: Amount,
        max: Amount,
    },
    #[error("slot pulls must be 1..={max}, got {count}")]
    PullCount { count: usize, max: usize },
}

pub fn check_pulls(count: usize) -> Result<(), CatalogError> {
    if count == 0 || count > MAX_SLOT_PULLS {
        return Err(CatalogError::PullCount {
            count,
            max: MAX_SLOT_PULLS,
        });
    }
    Ok(())
}

pub fn lookup(game: GameKind, bet: &str) -> Result<&'static BetSpec, CatalogError> {
    BETS.iter()
        .find(|spec| spec.game == game && spec.name == bet)
        .ok_or_else(|| CatalogError::UnknownBet {
            game,
            bet: bet.to_string(),
        })
}

pub fn bets_for(game: GameKind) -> impl Iterator<Item = &'static BetSpec> {
    BETS.iter().filter(move |spec| spec.game == game)
}

/// Stake bounds per currency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StakeLimits {
    pub min_main: Amount,
    pub max_main: Amount,
    pub min_demo: Amount,
    pub max_demo: Amount,
}

impl Default for StakeLimits {
    fn default() -> Self {
        Self {
            min_main: Amount::from_cents(10),
            max_main: Amount::from_units(100),
            min_demo: Amount::from_units(1),
            max_demo: Amount::from_units(100_000),
        }
    }
}

impl StakeLimits {
    pub fn bounds(&self, currency: Currency) -> (Amount, Amount) {
        match currency {
            Currency::Main => (self.min_main, self.max_main),
            Currency::Demo => (self.min_demo, self.max_demo),
        }
    }

    pub fn check(&self, stake: Amount, currency: Currency) -> Result<(), CatalogError> {
        let (min, max) = self.bounds(currency);
        if stake < min || stake > max {
            return Err(CatalogError::StakeOutOfRange { stake, min, max });
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.min_main.is_zero() || self.min_demo.is_zero() {
            return Err("minimum stakes must be greater than zero");
        }
        if self.max_main < self.min_main {
            return Err("max_main must not be below min_main");
        }
        if self.max_demo < self.min_demo {
            return Err("max_demo must not be below min_demo");
        }
        Ok(())
    }
}

const SLOT_REELS: [SlotSymbol; 4] = [
    SlotSymbol::Seven,
    SlotSymbol::Bar,
    SlotSymbol::Grape,
    SlotSymbol::Lemon,
];
const SLOT_MAP: [usize; 4] = [1, 2, 3, 0];

/// Decodes a slot value (1..=64) into its three reels. 64 is always triple seven.
pub fn decode_slots(value: u8) -> Option<[SlotSymbol; 3]> {
    if !(1..=64).contains(&value) {
        return None;
    }
    if value == 64 {
        return Some([SlotSymbol::Seven; 3]);
    }
    let v = (value - 1) as usize;
    let reel = |shift: usize| SLOT_REELS[SLOT_MAP[(v >> shift) & 3]];
    Some([reel(0), reel(2), reel(4)])
}

pub fn three_of_kind(throws: &[u8], symbol: SlotSymbol) -> bool {
    throws
        .first()
        .and_then(|value| decode_slots(*value))
        .is_some_and(|reels| reels == [symbol; 3])
}

/// Payout for a single slot value, if it wins.
pub fn slot_multiplier(value: u8) -> Option<Multiplier> {
    let reels = decode_slots(value)?;
    if reels[0] != reels[1] || reels[1] != reels[2] {
        return None;
    }
    Some(match reels[0] {
        SlotSymbol::Seven => Multiplier::whole(20),
        SlotSymbol::Grape => Multiplier::whole(10),
        SlotSymbol::Lemon => Multiplier::whole(7),
        SlotSymbol::Bar => Multiplier::whole(5),
    })
}

/// Compact result stored in the journal.
pub fn result_summary(game: GameKind, throws: &[u8]) -> u32 {
    match (game, throws.len()) {
        (GameKind::Slots, _) => 0,
        (GameKind::Dice7, _) => throws.iter().take(2).map(|v| *v as u32).sum(),
        (_, 1) => throws[0] as u32,
        _ => throws.iter().map(|v| *v as u32).sum(),
    }
}

/// Name of the sticker that illustrates one throw value.
pub fn sticker_name(game: GameKind, value: u8) -> String {
    match game {
        GameKind::Dice | GameKind::Dice7 => format!("dice_{value}"),
        GameKind::Dart => format!("darts_{value}"),
        GameKind::Bowling if value == 6 => "bowling_strike".to_string(),
        GameKind::Bowling if value <= 1 => "bowling_miss".to_string(),
        GameKind::Bowling => format!("bowling_{value}"),
        GameKind::Football => format!("football_{value}"),
        GameKind::Basketball => format!("basketball_{value}"),
        GameKind::Slots => format!("slots_{value}"),
    }
}
