//! Account ledger.
//!
//! The free functions taking `&mut Account` are the arithmetic; the async functions load a
//! row from a [State], apply that arithmetic and write it back. Callers that need several
//! rows to change together run the async functions against a [crate::state::Batch] and
//! apply its commit once.
//!
//! Rollover accounting: grants land in `locked_balance` with a wagering requirement of
//! `grant × multiplier`. Every main-currency wager burns requirement and releases the same
//! fraction of the locked funds into `balance`; once the requirement is gone, whatever is
//! still locked is released at once so no dust stays stranded.

use crate::catalog::StakeLimits;
use crate::state::{load_account, State};
use arbuz_types::{
    account::{AccountInvariantError, ChainPayment},
    codec::MAX_USERNAME_LENGTH,
    Account, Amount, Currency, Key, Multiplier, UserId, Value, Wager,
};
use thiserror::Error;

/// Daily demo-currency bonus.
pub const DAILY_DEMO_BONUS: Amount = Amount::from_units(100);

/// Demo-currency bonus for the first main-currency win of a day.
pub const FIRST_WIN_DEMO_BONUS: Amount = Amount::from_units(1_000);

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient funds (needed={needed}, available={available})")]
    Insufficient { needed: Amount, available: Amount },
    #[error("account {0} not found")]
    UnknownAccount(UserId),
    #[error("referral balance is empty")]
    EmptyReferralBalance,
    #[error("base bet {amount} outside [{min}, {max}]")]
    BaseBetOutOfRange {
        amount: Amount,
        min: Amount,
        max: Amount,
    },
    #[error("chain payment {0} already processed")]
    DuplicatePayment(String),
    #[error("daily bonus already claimed")]
    BonusAlreadyClaimed,
    #[error("balance overflow")]
    Overflow,
    #[error("invalid account: {0}")]
    Invariant(#[from] AccountInvariantError),
    #[error("storage failure")]
    Storage(#[from] anyhow::Error),
}

/// Effect of one call to [progress_rollover].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RolloverProgress {
    pub requirement_before: Amount,
    pub requirement_after: Amount,
    pub unlocked: Amount,
}

/// What [apply_wager] took, kept so a game that never settles can be undone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StakeTaken {
    pub wager: Wager,
    pub from_locked: Amount,
    pub progress: RolloverProgress,
}

fn add(a: Amount, b: Amount) -> Result<Amount, LedgerError> {
    a.checked_add(b).ok_or(LedgerError::Overflow)
}

/// Removes `amount` from the spendable bucket of `currency`.
///
/// Generic debits never touch `locked_balance`; only wagers do (see [apply_wager]).
pub fn debit(account: &mut Account, amount: Amount, currency: Currency) -> Result<(), LedgerError> {
    let bucket = match currency {
        Currency::Main => &mut account.balance,
        Currency::Demo => &mut account.demo_balance,
    };
    *bucket = bucket
        .checked_sub(amount)
        .ok_or(LedgerError::Insufficient {
            needed: amount,
            available: *bucket,
        })?;
    Ok(())
}

pub fn credit(account: &mut Account, amount: Amount, currency: Currency) -> Result<(), LedgerError> {
    match currency {
        Currency::Main => account.balance = add(account.balance, amount)?,
        Currency::Demo => account.demo_balance = add(account.demo_balance, amount)?,
    }
    Ok(())
}

/// Takes a stake at game start.
///
/// Main-currency stakes drain `balance` first and `locked_balance` second, then progress
/// the rollover requirement. Demo stakes only debit `demo_balance`.
pub fn apply_wager(account: &mut Account, wager: Wager) -> Result<StakeTaken, LedgerError> {
    let Some(main) = wager.main() else {
        debit(account, wager.stake, Currency::Demo)?;
        return Ok(StakeTaken {
            wager,
            from_locked: Amount::ZERO,
            progress: RolloverProgress::default(),
        });
    };
    let stake = main.stake();
    let available = account.wagerable(Currency::Main);
    if available < stake {
        return Err(LedgerError::Insufficient {
            needed: stake,
            available,
        });
    }

    let locked_before = account.locked_balance;
    let from_balance = stake.min(account.balance);
    let from_locked = stake.saturating_sub(from_balance);
    account.balance = account.balance.saturating_sub(from_balance);
    account.locked_balance = account.locked_balance.saturating_sub(from_locked);

    Ok(StakeTaken {
        wager,
        from_locked,
        progress: progress_from(account, stake, locked_before),
    })
}

/// Returns `amount` of a stake taken by [apply_wager] whose game never settled.
///
/// The refunded share goes back where it came from: the locked part and the funds the wager
/// unlocked are locked again and the burned requirement is restored. Unlocked funds the user
/// has spent since stay spent.
pub fn refund_wager(
    account: &mut Account,
    amount: Amount,
    taken: &StakeTaken,
) -> Result<(), LedgerError> {
    let stake = taken.wager.stake;
    let amount = amount.min(stake);
    let progress = taken.progress;
    if taken.wager.main().is_none() || progress.requirement_before.is_zero() {
        return credit(account, amount, taken.wager.currency);
    }

    let share = |value: Amount| value.mul_div(amount.micros(), stake.micros());
    let relock = add(share(taken.from_locked), share(progress.unlocked))?;
    account.balance = add(account.balance, amount)?;
    let relock = relock.min(account.balance);
    account.balance = account.balance.saturating_sub(relock);
    account.locked_balance = add(account.locked_balance, relock)?;

    let burned = progress
        .requirement_before
        .saturating_sub(progress.requirement_after);
    if !account.locked_balance.is_zero() {
        account.rollover_requirement = add(account.rollover_requirement, share(burned))?;
    }
    Ok(())
}

/// Burns `wagered` off the rollover requirement and unlocks the matching share of locked funds.
pub fn progress_rollover(account: &mut Account, wagered: Amount) -> RolloverProgress {
    let locked_before = account.locked_balance;
    progress_from(account, wagered, locked_before)
}

// The unlocked share is measured against the locked amount held before the wager, and is
// capped by what is still locked after the stake was taken from it.
fn progress_from(account: &mut Account, wagered: Amount, locked_before: Amount) -> RolloverProgress {
    let requirement_before = account.rollover_requirement;
    if requirement_before.is_zero() {
        let unlocked = account.locked_balance;
        release(account, unlocked);
        return RolloverProgress {
            requirement_before,
            requirement_after: Amount::ZERO,
            unlocked,
        };
    }

    let requirement_after = requirement_before.saturating_sub(wagered);
    account.rollover_requirement = requirement_after;

    let unlocked = if requirement_after.is_zero() {
        account.locked_balance
    } else {
        let completed = requirement_before.saturating_sub(requirement_after);
        locked_before
            .mul_div(completed.micros(), requirement_before.micros())
            .min(account.locked_balance)
    };
    release(account, unlocked);

    // Nothing left to unlock: the requirement has nothing to guard.
    if account.locked_balance.is_zero() {
        account.rollover_requirement = Amount::ZERO;
    }

    RolloverProgress {
        requirement_before,
        requirement_after: account.rollover_requirement,
        unlocked,
    }
}

fn release(account: &mut Account, amount: Amount) {
    account.locked_balance = account.locked_balance.saturating_sub(amount);
    account.balance = account.balance.saturating_add(amount);
}

/// Locks a promotional grant behind a wagering requirement of `grant × multiplier`.
pub fn add_rollover_requirement(
    account: &mut Account,
    grant: Amount,
    multiplier: Multiplier,
) -> Result<(), LedgerError> {
    if grant.is_zero() {
        return Ok(());
    }
    account.locked_balance = add(account.locked_balance, grant)?;
    account.rollover_requirement = add(account.rollover_requirement, grant.times(multiplier))?;
    Ok(())
}

/// Folds stray locked funds into `balance` when no requirement guards them.
///
/// Returns true if the row changed.
pub fn normalize(account: &mut Account) -> bool {
    if account.rollover_requirement.is_zero() && !account.locked_balance.is_zero() {
        let locked = account.locked_balance;
        release(account, locked);
        return true;
    }
    false
}

pub fn transfer_referral_balance(account: &mut Account) -> Result<Amount, LedgerError> {
    let amount = account.referral.balance;
    if amount.is_zero() {
        return Err(LedgerError::EmptyReferralBalance);
    }
    account.balance = add(account.balance, amount)?;
    account.referral.balance = Amount::ZERO;
    Ok(amount)
}

pub fn set_base_bet(
    account: &mut Account,
    amount: Amount,
    currency: Currency,
    limits: &StakeLimits,
) -> Result<(), LedgerError> {
    let (min, max) = limits.bounds(currency);
    if amount < min || amount > max {
        return Err(LedgerError::BaseBetOutOfRange { amount, min, max });
    }
    match currency {
        Currency::Main => account.base_bet_main = amount,
        Currency::Demo => account.base_bet_demo = amount,
    }
    Ok(())
}

/// Credits the daily demo bonus once per `day` (days since the epoch, local calendar).
pub fn claim_daily_demo(account: &mut Account, day: u32) -> Result<Amount, LedgerError> {
    if account.daily_demo_day == day {
        return Err(LedgerError::BonusAlreadyClaimed);
    }
    account.demo_balance = add(account.demo_balance, DAILY_DEMO_BONUS)?;
    account.daily_demo_day = day;
    Ok(DAILY_DEMO_BONUS)
}

/// Credits the first-win-of-day demo bonus if `day` has not paid one yet.
pub fn first_win_bonus(account: &mut Account, day: u32) -> Option<Amount> {
    if account.first_win_day == day {
        return None;
    }
    account.demo_balance = account.demo_balance.saturating_add(FIRST_WIN_DEMO_BONUS);
    account.first_win_day = day;
    Some(FIRST_WIN_DEMO_BONUS)
}

/// Loads an account with invariant 2 applied. Missing rows are an error.
pub async fn account<S: State>(state: &S, user: UserId) -> Result<Account, LedgerError> {
    let mut account = load_account(state, user)
        .await?
        .ok_or(LedgerError::UnknownAccount(user))?;
    normalize(&mut account);
    Ok(account)
}

/// Writes the row. Rows that could not be decoded again are refused.
pub async fn store<S: State>(state: &mut S, account: Account) -> Result<(), LedgerError> {
    account.validate_invariants()?;
    state
        .insert(Key::Account(account.user_id), Value::Account(account))
        .await?;
    Ok(())
}

/// Runs `f` against the stored row and writes it back only when `f` succeeds.
pub async fn update<S, T, F>(state: &mut S, user: UserId, f: F) -> Result<T, LedgerError>
where
    S: State,
    F: FnOnce(&mut Account) -> Result<T, LedgerError> + Send,
{
    let mut row = account(state, user).await?;
    let result = f(&mut row)?;
    store(state, row).await?;
    Ok(result)
}

/// Cuts `name` to at most [MAX_USERNAME_LENGTH] bytes on a char boundary.
pub fn clamp_username(name: &str) -> &str {
    if name.len() <= MAX_USERNAME_LENGTH {
        return name;
    }
    let mut end = MAX_USERNAME_LENGTH;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Creates the account if absent. Returns the row and whether it was created.
///
/// `referrer` is honoured only at creation, never for the user themself, and only when the
/// referrer already has an account.
pub async fn register<S: State>(
    state: &mut S,
    user: UserId,
    username: &str,
    referrer: Option<UserId>,
) -> Result<(Account, bool), LedgerError> {
    if let Some(existing) = load_account(state, user).await? {
        return Ok((existing, false));
    }
    let mut row = Account::new(user, clamp_username(username).to_string());
    if let Some(referrer) = referrer.filter(|referrer| *referrer != user) {
        if load_account(state, referrer).await?.is_some() {
            row.referred_by = Some(referrer);
        }
    }
    store(state, row.clone()).await?;
    Ok((row, true))
}

pub async fn is_new_chain_payment<S: State>(state: &S, tx_hash: &str) -> Result<bool, LedgerError> {
    Ok(state
        .get(&Key::ChainPayment(tx_hash.to_string()))
        .await?
        .is_none())
}

/// Credits an on-chain deposit exactly once per transaction hash.
pub async fn record_chain_payment<S: State>(
    state: &mut S,
    tx_hash: &str,
    user: UserId,
    amount: Amount,
) -> Result<(), LedgerError> {
    if !is_new_chain_payment(state, tx_hash).await? {
        return Err(LedgerError::DuplicatePayment(tx_hash.to_string()));
    }
    update(state, user, |account| credit(account, amount, Currency::Main)).await?;
    state
        .insert(
            Key::ChainPayment(tx_hash.to_string()),
            Value::ChainPayment(ChainPayment {
                user_id: user,
                amount,
            }),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Batch, Memory};

    fn funded(balance: u64, locked: u64, requirement: u64) -> Account {
        let mut account = Account::new(1, "u".into());
        account.balance = Amount::from_cents(balance);
        account.locked_balance = Amount::from_cents(locked);
        account.rollover_requirement = Amount::from_cents(requirement);
        account
    }

    #[test]
    fn generic_debit_uses_balance_only() {
        let mut account = funded(100, 500, 1_000);
        assert!(matches!(
            debit(&mut account, Amount::from_cents(200), Currency::Main),
            Err(LedgerError::Insufficient { .. })
        ));
        assert_eq!(account, funded(100, 500, 1_000));

        debit(&mut account, Amount::from_cents(100), Currency::Main).unwrap();
        assert_eq!(account.balance, Amount::ZERO);
        assert_eq!(account.locked_balance, Amount::from_cents(500));
    }

    #[test]
    fn demo_debit_and_credit() {
        let mut account = funded(0, 0, 0);
        credit(&mut account, Amount::from_units(5), Currency::Demo).unwrap();
        assert_eq!(account.demo_balance, Amount::from_units(5));
        assert!(debit(&mut account, Amount::from_units(6), Currency::Demo).is_err());
        debit(&mut account, Amount::from_units(5), Currency::Demo).unwrap();
        assert_eq!(account.demo_balance, Amount::ZERO);
        assert_eq!(account.balance, Amount::ZERO);
    }

    #[test]
    fn credit_rejects_overflow() {
        let mut account = funded(0, 0, 0);
        account.balance = Amount::from_micros(u64::MAX);
        assert!(matches!(
            credit(&mut account, Amount::from_micros(1), Currency::Main),
            Err(LedgerError::Overflow)
        ));
    }

    #[test]
    fn wager_from_locked_unlocks_proportionally() {
        // Grant of 5.00 at x2, nothing in balance, wager 2.00.
        let mut account = funded(0, 500, 1_000);
        let progress = apply_wager(
            &mut account,
            Wager::new(Currency::Main, Amount::from_units(2)),
        )
        .unwrap().progress;
        assert_eq!(progress.requirement_after, Amount::from_units(8));
        assert_eq!(progress.unlocked, Amount::from_units(1));
        assert_eq!(account.balance, Amount::from_units(1));
        assert_eq!(account.locked_balance, Amount::from_units(2));
        assert_eq!(account.rollover_requirement, Amount::from_units(8));

        credit(&mut account, Amount::from_cents(280), Currency::Main).unwrap();
        assert_eq!(account.balance, Amount::from_cents(380));
    }

    #[test]
    fn wager_consumes_balance_before_locked() {
        let mut account = funded(150, 500, 1_000);
        apply_wager(&mut account, Wager::new(Currency::Main, Amount::from_units(2))).unwrap();
        // 1.50 from balance, 0.50 from locked, then 1.00 of the original 5.00 unlocked.
        assert_eq!(account.locked_balance, Amount::from_cents(350));
        assert_eq!(account.balance, Amount::from_units(1));
        assert_eq!(account.rollover_requirement, Amount::from_units(8));
    }

    #[test]
    fn insufficient_wager_leaves_row_untouched() {
        let mut account = funded(100, 50, 100);
        let before = account.clone();
        assert!(matches!(
            apply_wager(&mut account, Wager::new(Currency::Main, Amount::from_units(2))),
            Err(LedgerError::Insufficient { .. })
        ));
        assert_eq!(account, before);
    }

    #[test]
    fn demo_wager_ignores_rollover() {
        let mut account = funded(0, 500, 1_000);
        account.demo_balance = Amount::from_units(10);
        let progress =
            apply_wager(&mut account, Wager::new(Currency::Demo, Amount::from_units(4))).unwrap().progress;
        assert_eq!(progress, RolloverProgress::default());
        assert_eq!(account.demo_balance, Amount::from_units(6));
        assert_eq!(account.rollover_requirement, Amount::from_units(10));
        assert_eq!(account.locked_balance, Amount::from_units(5));
    }

    #[test]
    fn wager_reduces_requirement_by_min_of_stake_and_requirement() {
        let mut account = funded(1_000, 100, 300);
        let progress =
            apply_wager(&mut account, Wager::new(Currency::Main, Amount::from_units(5))).unwrap().progress;
        assert_eq!(progress.requirement_before, Amount::from_units(3));
        assert_eq!(progress.requirement_after, Amount::ZERO);
        assert_eq!(account.locked_balance, Amount::ZERO);
        assert_eq!(account.balance, Amount::from_units(6));
    }

    #[test]
    fn grant_then_full_wagering_releases_grant() {
        let mut account = funded(700, 0, 0);
        add_rollover_requirement(&mut account, Amount::from_units(5), Multiplier::whole(3)).unwrap();
        assert_eq!(account.rollover_requirement, Amount::from_units(15));
        assert_eq!(account.locked_balance, Amount::from_units(5));

        // Wager the requirement in uneven pieces.
        for cents in [100, 333, 567, 500] {
            progress_rollover(&mut account, Amount::from_cents(cents));
        }
        assert_eq!(account.rollover_requirement, Amount::ZERO);
        assert_eq!(account.locked_balance, Amount::ZERO);
        assert_eq!(account.balance, Amount::from_units(12));
    }

    #[test]
    fn progress_without_requirement_folds_locked() {
        let mut account = funded(100, 250, 0);
        let progress = progress_rollover(&mut account, Amount::from_units(1));
        assert_eq!(progress.unlocked, Amount::from_cents(250));
        assert_eq!(account.balance, Amount::from_cents(350));
        assert_eq!(account.locked_balance, Amount::ZERO);

        let mut empty = funded(100, 0, 0);
        assert_eq!(
            progress_rollover(&mut empty, Amount::from_units(1)),
            RolloverProgress::default()
        );
        assert_eq!(empty.balance, Amount::from_units(1));
    }

    #[test]
    fn draining_locked_clears_requirement() {
        let mut account = funded(0, 500, 1_000);
        apply_wager(&mut account, Wager::new(Currency::Main, Amount::from_units(5))).unwrap();
        // Stake took all locked funds; half the requirement remains with nothing to guard.
        assert_eq!(account.locked_balance, Amount::ZERO);
        assert_eq!(account.rollover_requirement, Amount::ZERO);
        assert!(account.validate_invariants().is_ok());
    }

    #[test]
    fn refund_restores_locked_stake_and_requirement() {
        let mut account = funded(0, 500, 1_000);
        let before = account.clone();
        let taken =
            apply_wager(&mut account, Wager::new(Currency::Main, Amount::from_units(2))).unwrap();
        assert_eq!(taken.from_locked, Amount::from_units(2));
        refund_wager(&mut account, Amount::from_units(2), &taken).unwrap();
        assert_eq!(account, before);

        // A stake that drained locked funds and cleared the requirement.
        let taken =
            apply_wager(&mut account, Wager::new(Currency::Main, Amount::from_units(5))).unwrap();
        assert_eq!(account.rollover_requirement, Amount::ZERO);
        refund_wager(&mut account, Amount::from_units(5), &taken).unwrap();
        assert_eq!(account, before);
        assert!(account.validate_invariants().is_ok());
    }

    #[test]
    fn partial_refund_restores_its_share() {
        let mut account = funded(150, 500, 1_000);
        let taken =
            apply_wager(&mut account, Wager::new(Currency::Main, Amount::from_units(2))).unwrap();
        assert_eq!(taken.from_locked, Amount::from_cents(50));
        assert_eq!(taken.progress.unlocked, Amount::from_units(1));

        refund_wager(&mut account, Amount::from_units(1), &taken).unwrap();
        assert_eq!(account.balance, Amount::from_cents(125));
        assert_eq!(account.locked_balance, Amount::from_cents(425));
        assert_eq!(account.rollover_requirement, Amount::from_units(9));
    }

    #[test]
    fn refund_keeps_spent_unlocked_funds_spent() {
        let mut account = funded(0, 500, 1_000);
        let taken =
            apply_wager(&mut account, Wager::new(Currency::Main, Amount::from_units(2))).unwrap();
        debit(&mut account, Amount::from_units(1), Currency::Main).unwrap();
        refund_wager(&mut account, Amount::from_units(2), &taken).unwrap();
        assert_eq!(account.balance, Amount::ZERO);
        assert_eq!(account.locked_balance, Amount::from_units(4));
        assert_eq!(account.rollover_requirement, Amount::from_units(10));
    }

    #[test]
    fn refund_without_requirement_is_a_plain_credit() {
        let mut account = funded(500, 0, 0);
        account.demo_balance = Amount::from_units(3);
        let taken =
            apply_wager(&mut account, Wager::new(Currency::Main, Amount::from_units(2))).unwrap();
        refund_wager(&mut account, Amount::from_units(2), &taken).unwrap();
        assert_eq!(account.balance, Amount::from_units(5));

        let taken =
            apply_wager(&mut account, Wager::new(Currency::Demo, Amount::from_units(1))).unwrap();
        refund_wager(&mut account, Amount::from_units(1), &taken).unwrap();
        assert_eq!(account.demo_balance, Amount::from_units(3));
        assert_eq!(account.balance, Amount::from_units(5));
    }

    #[test]
    fn normalize_folds_unguarded_locked_funds() {
        let mut account = funded(100, 200, 0);
        assert!(normalize(&mut account));
        assert_eq!(account.balance, Amount::from_units(3));
        assert!(!normalize(&mut account));
    }

    #[test]
    fn referral_transfer_moves_whole_bucket() {
        let mut account = funded(100, 0, 0);
        assert!(matches!(
            transfer_referral_balance(&mut account),
            Err(LedgerError::EmptyReferralBalance)
        ));
        account.referral.balance = Amount::from_cents(45);
        assert_eq!(
            transfer_referral_balance(&mut account).unwrap(),
            Amount::from_cents(45)
        );
        assert_eq!(account.balance, Amount::from_cents(145));
        assert_eq!(account.referral.balance, Amount::ZERO);
    }

    #[test]
    fn base_bet_respects_limits() {
        let limits = StakeLimits::default();
        let mut account = funded(0, 0, 0);
        set_base_bet(&mut account, Amount::from_cents(50), Currency::Main, &limits).unwrap();
        assert_eq!(account.base_bet_main, Amount::from_cents(50));
        assert!(matches!(
            set_base_bet(&mut account, Amount::from_cents(5), Currency::Main, &limits),
            Err(LedgerError::BaseBetOutOfRange { .. })
        ));
        set_base_bet(&mut account, Amount::from_units(25), Currency::Demo, &limits).unwrap();
        assert_eq!(account.base_bet(Currency::Demo), Amount::from_units(25));
    }

    #[test]
    fn daily_bonuses_pay_once_per_day() {
        let mut account = funded(0, 0, 0);
        assert_eq!(claim_daily_demo(&mut account, 20_000).unwrap(), DAILY_DEMO_BONUS);
        assert!(matches!(
            claim_daily_demo(&mut account, 20_000),
            Err(LedgerError::BonusAlreadyClaimed)
        ));
        assert!(claim_daily_demo(&mut account, 20_001).is_ok());
        assert_eq!(account.demo_balance, Amount::from_units(200));

        assert_eq!(first_win_bonus(&mut account, 20_001), Some(FIRST_WIN_DEMO_BONUS));
        assert_eq!(first_win_bonus(&mut account, 20_001), None);
        assert_eq!(account.demo_balance, Amount::from_units(1_200));
    }

    #[tokio::test]
    async fn register_sets_referrer_once() {
        let mut state = Memory::default();
        let (referrer, created) = register(&mut state, 10, "ref", None).await.unwrap();
        assert!(created);
        assert_eq!(referrer.referred_by, None);

        let (user, _) = register(&mut state, 11, "user", Some(10)).await.unwrap();
        assert_eq!(user.referred_by, Some(10));

        // A second registration cannot rewrite the referrer.
        let (again, created) = register(&mut state, 11, "user", Some(12)).await.unwrap();
        assert!(!created);
        assert_eq!(again.referred_by, Some(10));

        let (selfish, _) = register(&mut state, 13, "self", Some(13)).await.unwrap();
        assert_eq!(selfish.referred_by, None);

        let (orphan, _) = register(&mut state, 14, "orphan", Some(999)).await.unwrap();
        assert_eq!(orphan.referred_by, None);
    }

    #[tokio::test]
    async fn update_writes_back_only_on_success() {
        let mut state = Memory::default();
        register(&mut state, 1, "u", None).await.unwrap();
        let err = update(&mut state, 1, |account| {
            account.balance = Amount::from_units(99);
            debit(account, Amount::from_units(100), Currency::Main)
        })
        .await;
        assert!(matches!(err, Err(LedgerError::Insufficient { .. })));
        assert_eq!(account(&state, 1).await.unwrap().balance, Amount::ZERO);

        assert!(matches!(
            update(&mut state, 2, |_| Ok(())).await,
            Err(LedgerError::UnknownAccount(2))
        ));
    }

    #[tokio::test]
    async fn chain_payments_are_idempotent() {
        let mut state = Memory::default();
        register(&mut state, 1, "u", None).await.unwrap();
        assert!(is_new_chain_payment(&state, "abc").await.unwrap());

        let mut batch = Batch::new(&state);
        record_chain_payment(&mut batch, "abc", 1, Amount::from_units(5))
            .await
            .unwrap();
        let changes = batch.commit();
        state.apply(changes).await.unwrap();

        assert!(!is_new_chain_payment(&state, "abc").await.unwrap());
        assert!(matches!(
            record_chain_payment(&mut state, "abc", 1, Amount::from_units(5)).await,
            Err(LedgerError::DuplicatePayment(_))
        ));
        assert_eq!(account(&state, 1).await.unwrap().balance, Amount::from_units(5));
    }

    #[test]
    fn usernames_are_clamped_on_char_boundaries() {
        assert_eq!(clamp_username("alice"), "alice");
        let cyrillic = "я".repeat(40);
        let clamped = clamp_username(&cyrillic);
        assert_eq!(clamped.len(), MAX_USERNAME_LENGTH);
        assert_eq!(clamped.chars().count(), 32);
        let mixed = format!("a{}", "я".repeat(40));
        assert_eq!(clamp_username(&mixed).len(), MAX_USERNAME_LENGTH - 1);
    }

    #[tokio::test]
    async fn invalid_rows_are_not_written() {
        let mut state = Memory::default();
        let mut row = Account::new(1, "x".repeat(MAX_USERNAME_LENGTH + 1));
        assert!(matches!(
            store(&mut state, row.clone()).await,
            Err(LedgerError::Invariant(AccountInvariantError::UsernameTooLong { .. }))
        ));
        row.username = "x".into();
        row.rollover_requirement = Amount::from_units(1);
        assert!(matches!(
            store(&mut state, row).await,
            Err(LedgerError::Invariant(_))
        ));
        assert!(matches!(
            account(&state, 1).await,
            Err(LedgerError::UnknownAccount(1))
        ));
    }
}
