//! Referral commissions on settled main-currency games.
//!
//! A referrer earns a share of the stake only when the referred player lost. Demo games
//! never reach this module: the entry point takes a [MainWager].

use crate::ledger::{self, LedgerError};
use crate::state::State;
use arbuz_types::{Account, Amount, MainWager, UserId};
use tracing::debug;

/// Commission credited to a referrer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Commission {
    pub referrer: UserId,
    pub amount: Amount,
    /// Whether the referrer wants a message about it.
    pub notify: bool,
}

/// Credits the player's referrer for a settled game.
///
/// `default_bps` applies to referrers without a partner rate. Returns `None` when the player
/// has no referrer or won. The referral stats are updated regardless of the referrer's
/// notification flag.
pub async fn settle_referral<S: State>(
    state: &mut S,
    player: &Account,
    wager: MainWager,
    win: Amount,
    default_bps: u32,
) -> Result<Option<Commission>, LedgerError> {
    let Some(referrer) = player.referred_by else {
        return Ok(None);
    };
    if !win.is_zero() {
        return Ok(None);
    }
    let stake = wager.stake();
    let commission = ledger::update(state, referrer, |account| {
        let amount = stake.share(account.partner_bps.unwrap_or(default_bps));
        let stats = &mut account.referral;
        stats.total_volume = stats.total_volume.saturating_add(stake);
        stats.total_earned = stats.total_earned.saturating_add(amount);
        stats.balance = stats
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(Commission {
            referrer,
            amount,
            notify: stats.notifications,
        })
    })
    .await?;
    debug!(
        player = player.user_id,
        referrer,
        amount = %commission.amount,
        "referral commission"
    );
    Ok(Some(commission))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{account, register};
    use crate::state::Memory;
    use arbuz_types::{account::DEFAULT_REFERRAL_BPS, Currency, Wager};

    fn main_wager(cents: u64) -> MainWager {
        Wager::new(Currency::Main, Amount::from_cents(cents))
            .main()
            .unwrap()
    }

    async fn setup() -> (Memory, Account) {
        let mut state = Memory::default();
        register(&mut state, 1, "referrer", None).await.unwrap();
        let (player, _) = register(&mut state, 2, "player", Some(1)).await.unwrap();
        (state, player)
    }

    #[tokio::test]
    async fn loss_pays_five_percent() {
        let (mut state, player) = setup().await;
        let commission = settle_referral(
            &mut state,
            &player,
            main_wager(200),
            Amount::ZERO,
            DEFAULT_REFERRAL_BPS,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(commission.referrer, 1);
        assert_eq!(commission.amount, Amount::from_cents(10));
        assert!(commission.notify);

        let referrer = account(&state, 1).await.unwrap();
        assert_eq!(referrer.referral.balance, Amount::from_cents(10));
        assert_eq!(referrer.referral.total_volume, Amount::from_units(2));
        assert_eq!(referrer.referral.total_earned, Amount::from_cents(10));
        assert_eq!(referrer.balance, Amount::ZERO);
    }

    #[tokio::test]
    async fn win_pays_nothing() {
        let (mut state, player) = setup().await;
        let result = settle_referral(
            &mut state,
            &player,
            main_wager(200),
            Amount::from_cents(380),
            DEFAULT_REFERRAL_BPS,
        )
        .await
        .unwrap();
        assert_eq!(result, None);
        let referrer = account(&state, 1).await.unwrap();
        assert_eq!(referrer.referral.total_volume, Amount::ZERO);
    }

    #[tokio::test]
    async fn no_referrer_is_a_noop() {
        let (mut state, _) = setup().await;
        let lone = account(&state, 1).await.unwrap();
        assert_eq!(
            settle_referral(&mut state, &lone, main_wager(100), Amount::ZERO, DEFAULT_REFERRAL_BPS)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn partner_rate_and_muted_notifications() {
        let (mut state, player) = setup().await;
        ledger::update(&mut state, 1, |account| {
            account.partner_bps = Some(1_500);
            account.referral.notifications = false;
            Ok(())
        })
        .await
        .unwrap();
        let commission = settle_referral(
            &mut state,
            &player,
            main_wager(1_000),
            Amount::ZERO,
            DEFAULT_REFERRAL_BPS,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(commission.amount, Amount::from_cents(150));
        assert!(!commission.notify);
        // Muted referrers are still credited.
        assert_eq!(
            account(&state, 1).await.unwrap().referral.balance,
            Amount::from_cents(150)
        );
    }
}
