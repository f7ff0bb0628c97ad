//! Integration tests for the wallet ledger.
//!
//! Tests balance management, settlement debits, idempotency and ledger
//! integrity against the in-memory store.

use chrono::{Duration, Utc};
use courtbook::db::{InMemoryStore, PaymentPosting, PaymentRepository, ReservationRepository};
use courtbook::money::Amount;
use courtbook::payments::{PaymentMethod, PaymentPurpose, PaymentRecordStatus};
use courtbook::reservation::{NewParticipant, NewReservation, ParticipantOrigin, PaymentStatus};
use courtbook::wallet::{EntryDirection, EntryType, WalletError, WalletManager, settlement_key};
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

fn manager() -> WalletManager {
    let store = Arc::new(InMemoryStore::new());
    WalletManager::new(store.clone(), store)
}

/// Balance posting for a reservation-level payment
fn posting(account_id: Uuid) -> PaymentPosting {
    PaymentPosting {
        reservation_id: Uuid::new_v4(),
        participant_id: None,
        account_id,
        method: PaymentMethod::Balance,
        purpose: PaymentPurpose::ParticipantShare,
    }
}

/// Generate unique idempotency key
fn unique_key(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[tokio::test]
async fn test_wallet_created_on_first_top_up() {
    let wallets = manager();
    let account = Uuid::new_v4();

    assert!(matches!(
        wallets.balance(account).await,
        Err(WalletError::WalletNotFound(_))
    ));

    let entry = wallets
        .top_up(account, dec!(25.5), unique_key("top_up"))
        .await
        .unwrap();
    assert_eq!(entry.direction, EntryDirection::Credit);
    assert_eq!(entry.balance_after, dec!(25.50));
    assert_eq!(wallets.balance(account).await.unwrap().balance, dec!(25.50));
}

#[tokio::test]
async fn test_settlement_debit_is_idempotent_per_reservation() {
    let wallets = manager();
    let organizer = Uuid::new_v4();
    let reservation = Uuid::new_v4();
    wallets
        .top_up(organizer, dec!(100), unique_key("top_up"))
        .await
        .unwrap();

    let posted = wallets
        .debit_for_settlement(organizer, reservation, dec!(40))
        .await
        .unwrap();
    assert_eq!(posted.payment.purpose, PaymentPurpose::OrganizerResidual);
    assert_eq!(posted.payment.method, PaymentMethod::Balance);
    assert!(posted.participant.is_none());

    let entry = wallets.history(organizer, Some(1)).await.unwrap().remove(0);
    assert_eq!(entry.entry_type, EntryType::SettlementDebit);
    assert_eq!(entry.idempotency_key, settlement_key(reservation));
    assert_eq!(entry.reservation_id, Some(reservation));

    let retry = wallets
        .debit_for_settlement(organizer, reservation, dec!(40))
        .await;
    assert!(matches!(retry, Err(WalletError::DuplicateTransaction(_))));
    assert_eq!(wallets.balance(organizer).await.unwrap().balance, dec!(60.00));
}

#[tokio::test]
async fn test_insufficient_funds_leave_balance_untouched() {
    let wallets = manager();
    let account = Uuid::new_v4();
    wallets
        .top_up(account, dec!(10), unique_key("top_up"))
        .await
        .unwrap();

    let result = wallets
        .pay_share(posting(account), dec!(10.01), None)
        .await;
    assert!(matches!(
        result,
        Err(WalletError::InsufficientBalance { available, required })
            if available == dec!(10.00) && required == dec!(10.01)
    ));
    assert_eq!(wallets.balance(account).await.unwrap().balance, dec!(10.00));
}

#[tokio::test]
async fn test_share_payment_defaults_key_to_participant() {
    let store = Arc::new(InMemoryStore::new());
    let wallets = WalletManager::new(store.clone(), store.clone());
    let account = Uuid::new_v4();
    let reservation = store
        .create_reservation(NewReservation {
            organizer_id: Uuid::new_v4(),
            court_id: Uuid::new_v4(),
            starts_at: Utc::now() + Duration::hours(24),
            total_price: dec!(100),
        })
        .await
        .unwrap();
    let participant = store
        .add_participant(NewParticipant {
            reservation_id: reservation.id,
            account_id: Some(account),
            name: "Ana".to_string(),
            email: None,
            phone: None,
            origin: ParticipantOrigin::Roster,
            amount_due: Some(dec!(20)),
            payment_status: PaymentStatus::Pending,
        })
        .await
        .unwrap();
    wallets
        .top_up(account, dec!(50), unique_key("top_up"))
        .await
        .unwrap();

    let share = PaymentPosting {
        reservation_id: reservation.id,
        participant_id: Some(participant.id),
        account_id: account,
        method: PaymentMethod::Balance,
        purpose: PaymentPurpose::ParticipantShare,
    };
    let posted = wallets
        .pay_share(share.clone(), dec!(20), Some("  ".to_string()))
        .await
        .unwrap();
    assert_eq!(posted.payment.status, PaymentRecordStatus::Paid);
    let paid = posted.participant.unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.amount_paid, dec!(20.00));

    let entry = wallets.history(account, Some(1)).await.unwrap().remove(0);
    assert_eq!(entry.idempotency_key, format!("share:{}", participant.id));
    assert_eq!(entry.amount, dec!(-20.00));

    // Refused before the debit, so the balance and the records stay as they were
    let twice = wallets.pay_share(share, dec!(20), None).await;
    assert!(twice.is_err());
    assert_eq!(wallets.balance(account).await.unwrap().balance, dec!(30.00));
    assert_eq!(store.list_payments(reservation.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_zero_and_negative_amounts_rejected() {
    let wallets = manager();
    let account = Uuid::new_v4();

    for amount in [dec!(0), dec!(-5)] {
        let result = wallets.top_up(account, amount, unique_key("top_up")).await;
        assert!(matches!(result, Err(WalletError::InvalidAmount(_))));
    }
}

#[tokio::test]
async fn test_history_is_newest_first() {
    let wallets = manager();
    let account = Uuid::new_v4();
    wallets
        .top_up(account, dec!(30), unique_key("top_up"))
        .await
        .unwrap();
    wallets
        .pay_share(posting(account), dec!(12), None)
        .await
        .unwrap();

    let history = wallets.history(account, None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].entry_type, EntryType::SharePayment);
    assert_eq!(history[0].balance_after, dec!(18.00));
    assert_eq!(history[1].entry_type, EntryType::TopUp);

    let limited = wallets.history(account, Some(1)).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_never_overdraw() {
    let wallets = manager();
    let account = Uuid::new_v4();
    wallets
        .top_up(account, dec!(50), unique_key("top_up"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let wallets = wallets.clone();
        handles.push(tokio::spawn(async move {
            wallets
                .pay_share(posting(account), dec!(10), None)
                .await
                .is_ok()
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap() {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 5);
    assert_eq!(wallets.balance(account).await.unwrap().balance, Amount::ZERO);
}
