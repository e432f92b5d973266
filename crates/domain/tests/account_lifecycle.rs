//! Integration tests for the Account aggregate.
//!
//! These tests drive the aggregate through its public operations and check
//! the version, event and state guarantees every mutation must keep.

use common::{AggregateId, Version};
use domain::{
    Account, AccountEvent, AccountHolder, AccountStatus, AggregateRoot, Currency, DomainEvent,
    FixedClock, Money, rules,
};

fn eur(minor_units: i64) -> Money {
    Money::new(minor_units, Currency::new("EUR").unwrap()).unwrap()
}

/// Opens an account and drains its opening event, as a reload would.
fn loaded_account(clock: &FixedClock) -> Account {
    let account = Account::open(
        AggregateId::new(),
        AccountHolder::new("Ada Lovelace").unwrap(),
        Currency::new("EUR").unwrap(),
        clock,
    );
    let json = serde_json::to_value(&account).unwrap();
    serde_json::from_value(json).unwrap()
}

mod account_lifecycle {
    use super::*;

    #[test]
    fn complete_account_lifecycle() {
        let clock = FixedClock::default();
        let mut account = loaded_account(&clock);
        assert_eq!(account.version(), Version::new(1));
        assert_eq!(account.persisted_version(), Version::new(1));

        account.deposit(eur(2_000), &clock).unwrap();
        account.withdraw(eur(500), &clock).unwrap();
        account.freeze("chargeback", &clock).unwrap();
        account.unfreeze(&clock).unwrap();
        account.withdraw(eur(1_500), &clock).unwrap();
        account.close(&clock).unwrap();

        assert_eq!(account.version(), Version::new(7));
        assert_eq!(account.persisted_version(), Version::new(1));
        assert_eq!(account.status(), AccountStatus::Closed);

        let events = account.take_pending_events();
        let types: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                AccountEvent::DEPOSITED,
                AccountEvent::WITHDRAWN,
                AccountEvent::FROZEN,
                AccountEvent::UNFROZEN,
                AccountEvent::WITHDRAWN,
                AccountEvent::CLOSED,
            ]
        );
        assert!(events.iter().all(|e| e.aggregate_id == account.id()));
        assert_eq!(account.persisted_version(), account.version());
    }

    #[test]
    fn event_sequences_match_versions() {
        let clock = FixedClock::default();
        let mut account = loaded_account(&clock);
        for _ in 0..5 {
            account.deposit(eur(1), &clock).unwrap();
        }

        for (i, event) in account.pending_events().iter().enumerate() {
            assert_eq!(event.sequence, Version::new(i as i64 + 2));
            assert_eq!(event.aggregate_type, "Account");
        }
    }
}

mod rule_violations {
    use super::*;

    /// Every rejected operation must leave version, state and pending
    /// events untouched.
    fn assert_rejected(
        account: &mut Account,
        rule: &str,
        op: impl FnOnce(&mut Account) -> Result<(), domain::DomainRuleViolation>,
    ) {
        let before = serde_json::to_value(&*account).unwrap();
        let pending = account.pending_events().len();

        let err = op(account).unwrap_err();

        assert_eq!(err.rule, rule);
        assert_eq!(serde_json::to_value(&*account).unwrap(), before);
        assert_eq!(account.pending_events().len(), pending);
    }

    #[test]
    fn rejected_operations_change_nothing() {
        let clock = FixedClock::default();
        let mut account = loaded_account(&clock);
        account.deposit(eur(100), &clock).unwrap();

        assert_rejected(&mut account, rules::INSUFFICIENT_FUNDS, |a| {
            a.withdraw(eur(101), &clock)
        });
        assert_rejected(&mut account, rules::AMOUNT_MUST_BE_POSITIVE, |a| {
            a.deposit(eur(0), &clock)
        });
        assert_rejected(&mut account, rules::CURRENCY_MISMATCH, |a| {
            a.deposit(Money::new(5, Currency::new("USD").unwrap()).unwrap(), &clock)
        });
        assert_rejected(&mut account, rules::BALANCE_MUST_BE_ZERO, |a| a.close(&clock));
        assert_rejected(&mut account, rules::NOT_FROZEN, |a| a.unfreeze(&clock));
        assert_rejected(&mut account, rules::BALANCE_OVERFLOW, |a| {
            a.deposit(eur(i64::MAX), &clock)
        });
    }

    #[test]
    fn frozen_and_closed_accounts_reject_movements() {
        let clock = FixedClock::default();
        let mut account = loaded_account(&clock);

        account.freeze("review", &clock).unwrap();
        assert_rejected(&mut account, rules::ACCOUNT_FROZEN, |a| a.deposit(eur(1), &clock));
        assert_rejected(&mut account, rules::ACCOUNT_FROZEN, |a| a.close(&clock));

        account.unfreeze(&clock).unwrap();
        account.close(&clock).unwrap();
        assert_rejected(&mut account, rules::ACCOUNT_CLOSED, |a| a.withdraw(eur(1), &clock));
        assert_rejected(&mut account, rules::ACCOUNT_CLOSED, |a| a.unfreeze(&clock));
    }
}

mod serialization {
    use super::*;

    #[test]
    fn events_round_trip_with_type_tag() {
        let clock = FixedClock::default();
        let mut account = loaded_account(&clock);
        account.deposit(eur(42), &clock).unwrap();
        let event = account.take_pending_events().remove(0);

        let json = serde_json::to_value(&event.payload).unwrap();
        assert_eq!(json["type"], "FundsDeposited");

        let decoded: AccountEvent = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, event.payload);
        assert_eq!(decoded.event_type(), AccountEvent::DEPOSITED);
    }
}
