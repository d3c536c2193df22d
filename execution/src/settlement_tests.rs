//! Settlement tests across ledger, catalog, journal and referral.
//!
//! These replay the engine's settlement order (wager, win credit, journal row, referral)
//! against an in-memory store and check the resulting balances.

#[cfg(test)]
mod tests {
    use crate::catalog::{self, result_summary, SLOTS_BET};
    use crate::journal;
    use crate::ledger::{self, account, register};
    use crate::referral::settle_referral;
    use crate::state::{Batch, Memory, State};
    use arbuz_types::{account::DEFAULT_REFERRAL_BPS, Amount, Currency, GameKind, GameRecord, UserId, Wager};

    async fn seed(state: &mut Memory, user: UserId, referrer: Option<UserId>) {
        register(state, user, "player", referrer).await.unwrap();
    }

    async fn fund(state: &mut Memory, user: UserId, f: impl FnOnce(&mut arbuz_types::Account) + Send) {
        ledger::update(state, user, |account| {
            f(account);
            Ok(())
        })
        .await
        .unwrap();
    }

    /// Runs one game the way the controller settles it and returns the win.
    async fn play(
        state: &mut Memory,
        user: UserId,
        game: GameKind,
        bet: &str,
        stake: Amount,
        currency: Currency,
        throws: &[u8],
    ) -> Amount {
        let wager = Wager::new(currency, stake);
        ledger::update(state, user, |account| ledger::apply_wager(account, wager))
            .await
            .unwrap();

        let spec = catalog::lookup(game, bet).unwrap();
        let win = spec
            .evaluate(throws)
            .map(|m| stake.times(m))
            .unwrap_or(Amount::ZERO);

        let mut batch = Batch::new(&*state);
        let player = ledger::update(&mut batch, user, |account| {
            ledger::credit(account, win, currency)?;
            Ok(account.clone())
        })
        .await
        .unwrap();
        journal::append(
            &mut batch,
            GameRecord {
                id: 0,
                user_id: user,
                kind: game,
                bet_type: bet.to_string(),
                stake,
                result: result_summary(game, throws),
                win,
                currency,
                timestamp: 0,
            },
        )
        .await
        .unwrap();
        let changes = batch.commit();
        state.apply(changes).await.unwrap();

        if let Some(main) = wager.main() {
            settle_referral(state, &player, main, win, DEFAULT_REFERRAL_BPS).await.unwrap();
        }
        win
    }

    #[tokio::test]
    async fn even_bet_win() {
        let mut state = Memory::default();
        seed(&mut state, 1, None).await;
        fund(&mut state, 1, |a| a.balance = Amount::from_units(10)).await;

        let win = play(&mut state, 1, GameKind::Dice, "even", Amount::from_units(1), Currency::Main, &[4]).await;
        assert_eq!(win, Amount::from_cents(190));
        assert_eq!(account(&state, 1).await.unwrap().balance, Amount::from_cents(1_090));

        let rows = journal::recent(&state, 1, 5).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bet_type, "even");
        assert_eq!(rows[0].win, Amount::from_cents(190));
        assert_eq!(rows[0].result, 4);
    }

    #[tokio::test]
    async fn locked_wager_unlocks_then_pays() {
        let mut state = Memory::default();
        seed(&mut state, 1, None).await;
        fund(&mut state, 1, |a| {
            a.locked_balance = Amount::from_units(5);
            a.rollover_requirement = Amount::from_units(10);
        })
        .await;

        play(&mut state, 1, GameKind::Dart, "red", Amount::from_units(2), Currency::Main, &[4]).await;
        let after = account(&state, 1).await.unwrap();
        assert_eq!(after.balance, Amount::from_cents(380));
        assert_eq!(after.locked_balance, Amount::from_units(2));
        assert_eq!(after.rollover_requirement, Amount::from_units(8));
        assert_eq!(after.withdrawable(), Amount::from_cents(380));
    }

    #[tokio::test]
    async fn referral_loss_credits_referrer() {
        let mut state = Memory::default();
        seed(&mut state, 1, None).await;
        seed(&mut state, 2, Some(1)).await;
        fund(&mut state, 2, |a| a.balance = Amount::from_units(5)).await;

        let win = play(&mut state, 2, GameKind::Dart, "center", Amount::from_units(2), Currency::Main, &[3]).await;
        assert_eq!(win, Amount::ZERO);
        assert_eq!(account(&state, 2).await.unwrap().balance, Amount::from_units(3));

        let referrer = account(&state, 1).await.unwrap();
        assert_eq!(referrer.referral.balance, Amount::from_cents(10));
        assert_eq!(referrer.referral.total_volume, Amount::from_units(2));
        assert_eq!(referrer.referral.total_earned, Amount::from_cents(10));
    }

    #[tokio::test]
    async fn demo_games_never_pay_referrers() {
        let mut state = Memory::default();
        seed(&mut state, 1, None).await;
        seed(&mut state, 2, Some(1)).await;
        fund(&mut state, 2, |a| a.demo_balance = Amount::from_units(50)).await;

        play(&mut state, 2, GameKind::Dice, "even", Amount::from_units(10), Currency::Demo, &[3]).await;
        assert_eq!(account(&state, 2).await.unwrap().demo_balance, Amount::from_units(40));
        assert_eq!(account(&state, 1).await.unwrap().referral.total_volume, Amount::ZERO);
    }

    #[tokio::test]
    async fn slots_triple_seven() {
        let mut state = Memory::default();
        seed(&mut state, 1, None).await;
        fund(&mut state, 1, |a| a.balance = Amount::from_units(1)).await;

        let win = play(&mut state, 1, GameKind::Slots, SLOTS_BET, Amount::from_cents(50), Currency::Main, &[64]).await;
        assert_eq!(win, Amount::from_units(10));
        assert_eq!(account(&state, 1).await.unwrap().balance, Amount::from_cents(1_050));
        let row = &journal::recent(&state, 1, 1).await.unwrap()[0];
        assert_eq!((row.kind, row.bet_type.as_str(), row.result), (GameKind::Slots, "none", 0));
    }

    #[tokio::test]
    async fn account_delta_is_win_minus_stake() {
        let mut state = Memory::default();
        seed(&mut state, 1, None).await;
        fund(&mut state, 1, |a| a.balance = Amount::from_units(100)).await;

        let cases: &[(GameKind, &str, &[u8])] = &[
            (GameKind::Bowling, "3_strike", &[6, 6, 6]),
            (GameKind::Football, "goal", &[2]),
            (GameKind::Basketball, "clean", &[5]),
            (GameKind::Dice, "18", &[6, 6, 3, 2, 1]),
            (GameKind::Dice7, "more_7", &[1, 2]),
        ];
        for (game, bet, throws) in cases {
            let before = account(&state, 1).await.unwrap().balance;
            let win = play(&mut state, 1, *game, bet, Amount::from_units(1), Currency::Main, throws).await;
            let after = account(&state, 1).await.unwrap().balance;
            assert_eq!(
                after,
                before.saturating_add(win).saturating_sub(Amount::from_units(1)),
                "{game} {bet}"
            );
        }
        assert_eq!(journal::recent(&state, 1, 10).await.unwrap().len(), cases.len());
    }
}
