use crate::codec::{read_str, str_encode_size, write_str, MAX_USERNAME_LENGTH};
use crate::money::{Amount, Currency};
use crate::UserId;
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use serde::Serialize;
use thiserror::Error as ThisError;

/// Default main-currency base bet for new accounts.
pub const DEFAULT_BASE_BET_MAIN: Amount = Amount::from_units(1);

/// Default demo-currency base bet for new accounts.
pub const DEFAULT_BASE_BET_DEMO: Amount = Amount::from_units(10);

/// Default referral commission for referrers without a partner record (5%).
pub const DEFAULT_REFERRAL_BPS: u32 = 500;

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum AccountInvariantError {
    #[error("username too long (len={len}, max={max})")]
    UsernameTooLong { len: usize, max: usize },
    #[error("account {user} refers itself")]
    SelfReferral { user: UserId },
    #[error("rollover requirement {requirement} outstanding with no locked balance")]
    RequirementWithoutLocked { requirement: Amount },
    #[error("partner percent out of range (got={got} bps)")]
    PartnerPercentOutOfRange { got: u32 },
}

/// Referral earnings and preferences of an account acting as a referrer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReferralStats {
    /// Commission accumulated and not yet transferred to `balance`.
    pub balance: Amount,
    /// Total stake wagered (and lost) by referred users.
    pub total_volume: Amount,
    /// Total commission ever credited.
    pub total_earned: Amount,
    /// Whether the referrer wants a message for each commission.
    pub notifications: bool,
}

/// A user's ledger row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Account {
    pub user_id: UserId,
    pub username: String,

    pub balance: Amount,
    pub locked_balance: Amount,
    pub rollover_requirement: Amount,
    pub demo_balance: Amount,

    pub base_bet_main: Amount,
    pub base_bet_demo: Amount,

    pub referral: ReferralStats,
    pub referred_by: Option<UserId>,
    /// Partner commission override in basis points.
    pub partner_bps: Option<u32>,

    /// Main-currency stake lost over the account's lifetime.
    pub total_lost: Amount,
    /// Day number of the last daily demo bonus (0 = never).
    pub daily_demo_day: u32,
    /// Day number of the last first-win-of-day bonus (0 = never).
    pub first_win_day: u32,
}

impl Account {
    pub fn new(user_id: UserId, username: String) -> Self {
        Self {
            user_id,
            username,
            balance: Amount::ZERO,
            locked_balance: Amount::ZERO,
            rollover_requirement: Amount::ZERO,
            demo_balance: Amount::ZERO,
            base_bet_main: DEFAULT_BASE_BET_MAIN,
            base_bet_demo: DEFAULT_BASE_BET_DEMO,
            referral: ReferralStats {
                notifications: true,
                ..ReferralStats::default()
            },
            referred_by: None,
            partner_bps: None,
            total_lost: Amount::ZERO,
            daily_demo_day: 0,
            first_win_day: 0,
        }
    }

    /// Amount that may leave the platform.
    ///
    /// Locked funds only count once the rollover requirement has been met.
    pub fn withdrawable(&self) -> Amount {
        if !self.rollover_requirement.is_zero() && !self.locked_balance.is_zero() {
            self.balance
        } else {
            self.balance.saturating_add(self.locked_balance)
        }
    }

    /// Funds available for a wager in the given currency.
    pub fn wagerable(&self, currency: Currency) -> Amount {
        match currency {
            Currency::Main => self.balance.saturating_add(self.locked_balance),
            Currency::Demo => self.demo_balance,
        }
    }

    pub fn base_bet(&self, currency: Currency) -> Amount {
        match currency {
            Currency::Main => self.base_bet_main,
            Currency::Demo => self.base_bet_demo,
        }
    }

    /// Commission rate this account earns on referred users' losses.
    pub fn referral_bps(&self) -> u32 {
        self.partner_bps.unwrap_or(DEFAULT_REFERRAL_BPS)
    }

    pub fn validate_invariants(&self) -> Result<(), AccountInvariantError> {
        if self.username.len() > MAX_USERNAME_LENGTH {
            return Err(AccountInvariantError::UsernameTooLong {
                len: self.username.len(),
                max: MAX_USERNAME_LENGTH,
            });
        }
        if self.referred_by == Some(self.user_id) {
            return Err(AccountInvariantError::SelfReferral { user: self.user_id });
        }
        if !self.rollover_requirement.is_zero() && self.locked_balance.is_zero() {
            return Err(AccountInvariantError::RequirementWithoutLocked {
                requirement: self.rollover_requirement,
            });
        }
        if let Some(bps) = self.partner_bps {
            if bps > crate::money::BPS_DENOMINATOR {
                return Err(AccountInvariantError::PartnerPercentOutOfRange { got: bps });
            }
        }
        Ok(())
    }
}

impl Write for Account {
    fn write(&self, writer: &mut impl BufMut) {
        self.user_id.write(writer);
        write_str(&self.username, writer);
        self.balance.write(writer);
        self.locked_balance.write(writer);
        self.rollover_requirement.write(writer);
        self.demo_balance.write(writer);
        self.base_bet_main.write(writer);
        self.base_bet_demo.write(writer);
        self.referral.balance.write(writer);
        self.referral.total_volume.write(writer);
        self.referral.total_earned.write(writer);
        self.referral.notifications.write(writer);
        self.referred_by.write(writer);
        self.partner_bps.write(writer);
        self.total_lost.write(writer);
        self.daily_demo_day.write(writer);
        self.first_win_day.write(writer);
    }
}

impl Read for Account {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            user_id: UserId::read(reader)?,
            username: read_str(reader, MAX_USERNAME_LENGTH, "username")?,
            balance: Amount::read(reader)?,
            locked_balance: Amount::read(reader)?,
            rollover_requirement: Amount::read(reader)?,
            demo_balance: Amount::read(reader)?,
            base_bet_main: Amount::read(reader)?,
            base_bet_demo: Amount::read(reader)?,
            referral: ReferralStats {
                balance: Amount::read(reader)?,
                total_volume: Amount::read(reader)?,
                total_earned: Amount::read(reader)?,
                notifications: bool::read(reader)?,
            },
            referred_by: Option::<UserId>::read(reader)?,
            partner_bps: Option::<u32>::read(reader)?,
            total_lost: Amount::read(reader)?,
            daily_demo_day: u32::read(reader)?,
            first_win_day: u32::read(reader)?,
        })
    }
}

impl EncodeSize for Account {
    fn encode_size(&self) -> usize {
        self.user_id.encode_size()
            + str_encode_size(&self.username)
            + self.balance.encode_size()
            + self.locked_balance.encode_size()
            + self.rollover_requirement.encode_size()
            + self.demo_balance.encode_size()
            + self.base_bet_main.encode_size()
            + self.base_bet_demo.encode_size()
            + self.referral.balance.encode_size()
            + self.referral.total_volume.encode_size()
            + self.referral.total_earned.encode_size()
            + self.referral.notifications.encode_size()
            + self.referred_by.encode_size()
            + self.partner_bps.encode_size()
            + self.total_lost.encode_size()
            + self.daily_demo_day.encode_size()
            + self.first_win_day.encode_size()
    }
}

/// A processed on-chain deposit, recorded so the same transaction is never credited twice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainPayment {
    pub user_id: UserId,
    pub amount: Amount,
}

impl Write for ChainPayment {
    fn write(&self, writer: &mut impl BufMut) {
        self.user_id.write(writer);
        self.amount.write(writer);
    }
}

impl Read for ChainPayment {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            user_id: UserId::read(reader)?,
            amount: Amount::read(reader)?,
        })
    }
}

impl EncodeSize for ChainPayment {
    fn encode_size(&self) -> usize {
        self.user_id.encode_size() + self.amount.encode_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::Encode;

    #[test]
    fn withdrawable_excludes_locked_while_requirement_outstanding() {
        let mut account = Account::new(7, "u".into());
        account.balance = Amount::from_units(3);
        account.locked_balance = Amount::from_units(5);
        account.rollover_requirement = Amount::from_units(10);
        assert_eq!(account.withdrawable(), Amount::from_units(3));

        account.rollover_requirement = Amount::ZERO;
        assert_eq!(account.withdrawable(), Amount::from_units(8));
    }

    #[test]
    fn wagerable_per_currency() {
        let mut account = Account::new(7, "u".into());
        account.balance = Amount::from_units(1);
        account.locked_balance = Amount::from_units(2);
        account.demo_balance = Amount::from_units(50);
        assert_eq!(account.wagerable(Currency::Main), Amount::from_units(3));
        assert_eq!(account.wagerable(Currency::Demo), Amount::from_units(50));
    }

    #[test]
    fn partner_override_replaces_default_rate() {
        let mut account = Account::new(7, "u".into());
        assert_eq!(account.referral_bps(), DEFAULT_REFERRAL_BPS);
        account.partner_bps = Some(800);
        assert_eq!(account.referral_bps(), 800);
    }

    #[test]
    fn invariants_catch_bad_rows() {
        let mut account = Account::new(7, "u".into());
        assert_eq!(account.validate_invariants(), Ok(()));

        account.referred_by = Some(7);
        assert_eq!(
            account.validate_invariants(),
            Err(AccountInvariantError::SelfReferral { user: 7 })
        );
        account.referred_by = Some(8);

        account.rollover_requirement = Amount::from_units(1);
        assert!(matches!(
            account.validate_invariants(),
            Err(AccountInvariantError::RequirementWithoutLocked { .. })
        ));
        account.locked_balance = Amount::from_units(1);
        assert_eq!(account.validate_invariants(), Ok(()));

        account.username = "x".repeat(MAX_USERNAME_LENGTH + 1);
        assert!(matches!(
            account.validate_invariants(),
            Err(AccountInvariantError::UsernameTooLong { .. })
        ));
    }

    #[test]
    fn account_codec_preserves_every_bucket() {
        let mut account = Account::new(42, "arbuz".into());
        account.balance = Amount::from_cents(1_090);
        account.locked_balance = Amount::from_units(2);
        account.rollover_requirement = Amount::from_units(8);
        account.demo_balance = Amount::from_units(1_100);
        account.referral.balance = Amount::from_cents(10);
        account.referral.notifications = false;
        account.referred_by = Some(9);
        account.partner_bps = Some(800);
        account.total_lost = Amount::from_units(2);
        account.daily_demo_day = 20_000;

        let encoded = account.encode();
        assert_eq!(encoded.len(), account.encode_size());
        let decoded = Account::read(&mut &encoded[..]).unwrap();
        assert_eq!(decoded, account);
    }
}
