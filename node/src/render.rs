//! HTML messages the engine sends.

use crate::transport::{Button, Keyboard};
use arbuz_execution::{catalog, pvp::Payout};
use arbuz_types::{
    Amount, Currency, GameKind, Match, MatchMode, MessageId, Multiplier, UserId, SYSTEM_USER,
};
use std::collections::HashMap;
use tracing::warn;

/// Escapes text for the platform's HTML parse mode.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn mention(user: UserId) -> String {
    if user == SYSTEM_USER {
        "🤖 House".to_string()
    } else {
        format!("<a href=\"tg://user?id={user}\">player {user}</a>")
    }
}

/// Everything needed to describe one settled game.
pub struct GameSummary<'a> {
    pub game: GameKind,
    pub bet: &'a str,
    pub throws: &'a [u8],
    pub stake: Amount,
    pub currency: Currency,
    pub multiplier: Option<Multiplier>,
    pub win: Amount,
    pub balance_after: Amount,
}

#[derive(Clone, Debug)]
pub struct Renderer {
    channel_username: String,
    stickers: HashMap<String, String>,
}

impl Renderer {
    pub fn new(channel_username: String, stickers: HashMap<String, String>) -> Self {
        Self {
            channel_username,
            stickers,
        }
    }

    /// Public link to a message in the PvP channel.
    pub fn message_link(&self, message_id: MessageId) -> String {
        format!("https://t.me/{}/{message_id}", self.channel_username)
    }

    /// Sticker ids illustrating each throw, in throw order. Names missing from the sticker
    /// book are skipped.
    pub fn stickers(&self, game: GameKind, throws: &[u8]) -> Vec<String> {
        throws
            .iter()
            .filter_map(|value| {
                let name = catalog::sticker_name(game, *value);
                let id = self.stickers.get(&name).cloned();
                if id.is_none() {
                    warn!(sticker = %name, "sticker missing from sticker book");
                }
                id
            })
            .collect()
    }

    pub fn game_result(&self, summary: &GameSummary<'_>) -> String {
        let emoji = summary.game.emoji();
        let throws = match summary.game {
            GameKind::Slots => summary
                .throws
                .first()
                .and_then(|value| catalog::decode_slots(*value))
                .map(|reels| {
                    reels
                        .iter()
                        .map(|symbol| symbol.as_str())
                        .collect::<Vec<_>>()
                        .join(" | ")
                })
                .unwrap_or_default(),
            _ => summary
                .throws
                .iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        };
        let currency = summary.currency;
        let mut text = format!(
            "{emoji} <b>{game}</b> · {bet}\nResult: <code>{throws}</code>\nStake: {stake}\n",
            game = summary.game,
            bet = escape(summary.bet),
            stake = currency.format(summary.stake),
        );
        match summary.multiplier {
            Some(multiplier) if !summary.win.is_zero() => text.push_str(&format!(
                "✅ Won {} ({multiplier})\n",
                currency.format(summary.win)
            )),
            _ => text.push_str("❌ No win\n"),
        }
        text.push_str(&format!(
            "Balance: {}",
            currency.format(summary.balance_after)
        ));
        text
    }

    pub fn slot_series(&self, pulls: usize, total_win: Amount, currency: Currency) -> String {
        format!(
            "🎰 {pulls} pulls done · total won {}",
            currency.format(total_win)
        )
    }

    pub fn commission(&self, amount: Amount, player: UserId) -> String {
        format!(
            "💸 Referral commission {} from {}",
            Currency::Main.format(amount),
            mention(player)
        )
    }

    pub fn failure(&self, reason: &str) -> String {
        format!("⚠️ {}", escape(reason))
    }

    pub fn daily_bonus(&self, amount: Amount) -> String {
        format!("🎁 Daily bonus: +{}", Currency::Demo.format(amount))
    }

    pub fn referral_transferred(&self, amount: Amount) -> String {
        format!(
            "💸 {} moved from referral earnings to your balance",
            Currency::Main.format(amount)
        )
    }

    pub fn deposit(&self, amount: Amount) -> String {
        format!("✅ Deposit of {} credited", Currency::Main.format(amount))
    }

    pub fn match_created(&self, m: &Match) -> String {
        format!(
            "<b>{}</b> created. Share <code>{}</code> to invite players.",
            self.match_title(m),
            m.link
        )
    }

    pub fn session_timeout(&self) -> String {
        "⏱ Your previous game timed out and was closed. The stake is not refunded.".to_string()
    }

    pub fn match_title(&self, m: &Match) -> String {
        match m.mode {
            MatchMode::Standard => format!("{} PvP #{}", m.game.emoji(), m.id),
            MatchMode::SlotTournament => format!("🎰 Slot tournament #{}", m.id),
            MatchMode::Auction100 => format!("🎰 Jackpot #{}", m.id),
            MatchMode::Auction500 => format!("🎰 50/50 #{}", m.id),
        }
    }

    pub fn match_started(&self, m: &Match) -> String {
        let players = m
            .participants
            .iter()
            .map(|p| format!("{}. {}", p.position, mention(p.user_id)))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "<b>{}</b> starts!\nPot: {}\n{players}",
            self.match_title(m),
            Currency::Main.format(m.pot)
        )
    }

    /// Keyboard under a participant's throw.
    pub fn throw_keyboard(&self, m: &Match, user: UserId) -> Keyboard {
        let mut row = vec![Button::new("👤 Player", format!("tg://user?id={user}"))];
        if let Some(message_id) = m.channel_message_id {
            row.push(Button::new(
                format!("#{}", m.id),
                self.message_link(message_id),
            ));
        }
        vec![row]
    }

    pub fn reroll(&self, m: &Match, attempt: u32) -> String {
        format!("🔁 {} re-roll {attempt}", self.match_title(m))
    }

    pub fn match_finished(&self, m: &Match, payout: &Payout) -> String {
        let winners = payout
            .prizes
            .iter()
            .map(|(user, prize)| format!("🏆 {} wins {}", mention(*user), Currency::Main.format(*prize)))
            .collect::<Vec<_>>()
            .join("\n");
        format!("<b>{}</b> finished\n{winners}", self.match_title(m))
    }

    /// Private message to one participant after the match.
    pub fn participant_result(
        &self,
        m: &Match,
        user: UserId,
        payout: &Payout,
        throw_message: Option<MessageId>,
    ) -> String {
        let prize = payout
            .prizes
            .iter()
            .filter(|(winner, _)| *winner == user)
            .fold(Amount::ZERO, |acc, (_, prize)| acc.saturating_add(*prize));
        let mut text = if prize.is_zero() {
            format!("{}: you lost this one.", self.match_title(m))
        } else {
            format!(
                "{}: you won {}!",
                self.match_title(m),
                Currency::Main.format(prize)
            )
        };
        if let Some(message_id) = throw_message {
            text.push_str(&format!(
                "\n<a href=\"{}\">Your throw</a>",
                self.message_link(message_id)
            ));
        }
        text
    }

    pub fn match_review(&self, m: &Match) -> String {
        format!(
            "⚠️ {} could not be completed and was sent to manual review.",
            self.match_title(m)
        )
    }

    pub fn match_cancelled(&self, m: &Match, refund: Amount) -> String {
        format!(
            "{} was cancelled. Refunded {}.",
            self.match_title(m),
            Currency::Main.format(refund)
        )
    }

    pub fn jackpot_open(&self, m: &Match) -> String {
        format!(
            "🎰 <b>Jackpot #{}</b> is open: {} seats at {}. Link: <code>{}</code>",
            m.id,
            m.max_participants,
            Currency::Main.format(m.stake.nominal()),
            m.link
        )
    }

    pub fn jackpot_reminder(&self, m: &Match) -> String {
        format!(
            "⏰ 10 minutes left to join <b>Jackpot #{}</b> ({}/{} seats taken).",
            m.id,
            m.participants.len(),
            m.max_participants
        )
    }

    pub fn split_coming_soon(&self) -> String {
        "🎟 The 50/50 ticket lottery is coming soon.".to_string()
    }

    pub fn split_live(&self, m: &Match) -> String {
        format!(
            "🎟 <b>50/50 #{}</b> is live now: {} tickets. Link: <code>{}</code>",
            m.id,
            arbuz_types::pvp::SPLIT_TICKETS,
            m.link
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbuz_execution::pvp;

    fn renderer() -> Renderer {
        let stickers = HashMap::from([
            ("dice_4".to_string(), "STICKER_D4".to_string()),
            ("bowling_strike".to_string(), "STICKER_BS".to_string()),
        ]);
        Renderer::new("arbuz_pvp".into(), stickers)
    }

    #[test]
    fn escapes_html() {
        assert_eq!(escape("<b>&\"x\""), "&lt;b&gt;&amp;&quot;x&quot;");
    }

    #[test]
    fn stickers_skip_unknown_names() {
        let r = renderer();
        assert_eq!(r.stickers(GameKind::Dice, &[4, 5, 4]), vec!["STICKER_D4", "STICKER_D4"]);
        assert_eq!(r.stickers(GameKind::Bowling, &[6]), vec!["STICKER_BS"]);
        assert!(r.stickers(GameKind::Slots, &[64]).is_empty());
    }

    #[test]
    fn win_and_loss_texts() {
        let r = renderer();
        let win = r.game_result(&GameSummary {
            game: GameKind::Dice,
            bet: "even",
            throws: &[4],
            stake: Amount::from_units(1),
            currency: Currency::Main,
            multiplier: Some(Multiplier::from_hundredths(190)),
            win: Amount::from_cents(190),
            balance_after: Amount::from_cents(1_090),
        });
        assert!(win.contains("Won $1.90"));
        assert!(win.contains("Balance: $10.90"));

        let loss = r.game_result(&GameSummary {
            game: GameKind::Slots,
            bet: "none",
            throws: &[64],
            stake: Amount::from_units(10),
            currency: Currency::Demo,
            multiplier: None,
            win: Amount::ZERO,
            balance_after: Amount::from_units(90),
        });
        assert!(loss.contains("No win"));
        assert!(loss.contains("7️⃣ | 7️⃣ | 7️⃣"));
        assert!(loss.contains("90.00 AC"));
    }

    #[test]
    fn participant_dm_links_to_throw() {
        let r = renderer();
        let m = pvp::new_jackpot(0);
        let payout = Payout {
            commission: Amount::from_cents(10),
            prizes: vec![(7, Amount::from_cents(90))],
        };
        let won = r.participant_result(&m, 7, &payout, Some(321));
        assert!(won.contains("you won $0.90"));
        assert!(won.contains("https://t.me/arbuz_pvp/321"));
        let lost = r.participant_result(&m, 8, &payout, None);
        assert!(lost.contains("you lost"));
        assert!(!lost.contains("https://"));
    }
}
