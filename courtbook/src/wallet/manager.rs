//! Wallet manager over the wallet repository.

use super::{
    errors::{WalletError, WalletResult},
    models::{BalanceMovement, EntryType, Wallet, WalletEntry},
};
use crate::db::{PaymentPosting, PostedPayment, PostingRepository, WalletRepository};
use crate::money::{Amount, round_currency};
use crate::payments::{PaymentMethod, PaymentPurpose};
use crate::reservation::AccountId;
use std::sync::Arc;
use uuid::Uuid;

/// Default number of entries returned by [`WalletManager::history`]
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Wallet manager
#[derive(Clone)]
pub struct WalletManager {
    repository: Arc<dyn WalletRepository>,
    postings: Arc<dyn PostingRepository>,
}

impl WalletManager {
    /// Create a new wallet manager
    ///
    /// # Arguments
    ///
    /// * `repository` - Wallet persistence
    /// * `postings` - Debits booked together with their payment record
    pub fn new(
        repository: Arc<dyn WalletRepository>,
        postings: Arc<dyn PostingRepository>,
    ) -> Self {
        Self {
            repository,
            postings,
        }
    }

    /// Current wallet of an account
    ///
    /// # Errors
    ///
    /// * `WalletError::WalletNotFound` - The account never held a balance
    pub async fn balance(&self, account_id: AccountId) -> WalletResult<Wallet> {
        self.repository.get_wallet(account_id).await
    }

    /// Debit the organizer's residual at reservation closure.
    ///
    /// The debit and its `paid` organizer-residual record commit together.
    /// The idempotency key is derived from the reservation, so a retried
    /// closure can never debit twice.
    ///
    /// # Errors
    ///
    /// * `WalletError::InsufficientBalance` - Balance below the residual
    /// * `WalletError::DuplicateTransaction` - This reservation was already debited
    pub async fn debit_for_settlement(
        &self,
        organizer_id: AccountId,
        reservation_id: Uuid,
        amount: Amount,
    ) -> WalletResult<PostedPayment> {
        let movement = BalanceMovement {
            account_id: organizer_id,
            reservation_id: Some(reservation_id),
            amount: Self::positive(amount)?,
            entry_type: EntryType::SettlementDebit,
            idempotency_key: settlement_key(reservation_id),
            description: Some(format!("Residual for reservation {reservation_id}")),
        };
        let posted = self
            .postings
            .post_balance_payment(
                movement,
                PaymentPosting {
                    reservation_id,
                    participant_id: None,
                    account_id: organizer_id,
                    method: PaymentMethod::Balance,
                    purpose: PaymentPurpose::OrganizerResidual,
                },
            )
            .await?;

        log::info!(
            "Debited {} from organizer {} for reservation {}",
            amount,
            organizer_id,
            reservation_id
        );
        Ok(posted)
    }

    /// Pay from the posting account's balance and record the payment.
    ///
    /// A participant named by the posting becomes `paid` in the same
    /// transaction; nothing is debited when that transition is refused.
    ///
    /// # Arguments
    ///
    /// * `posting` - Reservation, participant and purpose the debit pays for
    /// * `amount` - Amount to debit
    /// * `idempotency_key` - Client key; a participant (or reservation) derived key is used when absent
    pub async fn pay_share(
        &self,
        posting: PaymentPosting,
        amount: Amount,
        idempotency_key: Option<String>,
    ) -> WalletResult<PostedPayment> {
        let (default_key, description) = match posting.participant_id {
            Some(id) => (format!("share:{id}"), format!("Share of participant {id}")),
            None => (
                format!("total:{}", posting.reservation_id),
                format!("Total of reservation {}", posting.reservation_id),
            ),
        };
        let idempotency_key = idempotency_key
            .filter(|k| !k.trim().is_empty())
            .unwrap_or(default_key);

        let movement = BalanceMovement {
            account_id: posting.account_id,
            reservation_id: Some(posting.reservation_id),
            amount: Self::positive(amount)?,
            entry_type: EntryType::SharePayment,
            idempotency_key,
            description: Some(description),
        };
        self.postings.post_balance_payment(movement, posting).await
    }

    /// Add money to an account, creating its wallet if needed
    pub async fn top_up(
        &self,
        account_id: AccountId,
        amount: Amount,
        idempotency_key: String,
    ) -> WalletResult<WalletEntry> {
        self.repository
            .credit_wallet(BalanceMovement {
                account_id,
                reservation_id: None,
                amount: Self::positive(amount)?,
                entry_type: EntryType::TopUp,
                idempotency_key,
                description: None,
            })
            .await
    }

    /// Most recent entries of an account, newest first
    pub async fn history(
        &self,
        account_id: AccountId,
        limit: Option<i64>,
    ) -> WalletResult<Vec<WalletEntry>> {
        self.repository
            .wallet_entries(account_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1))
            .await
    }

    fn positive(amount: Amount) -> WalletResult<Amount> {
        let amount = round_currency(amount);
        if amount <= Amount::ZERO {
            return Err(WalletError::InvalidAmount(amount));
        }
        Ok(amount)
    }
}

/// Idempotency key of the organizer debit for a reservation
pub fn settlement_key(reservation_id: Uuid) -> String {
    format!("settlement:{reservation_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use crate::payments::PaymentRecordStatus;
    use crate::wallet::EntryDirection;
    use rust_decimal_macros::dec;

    fn manager() -> WalletManager {
        let store = Arc::new(InMemoryStore::new());
        WalletManager::new(store.clone(), store)
    }

    fn balance_posting(account_id: AccountId) -> PaymentPosting {
        PaymentPosting {
            reservation_id: Uuid::new_v4(),
            participant_id: None,
            account_id,
            method: PaymentMethod::Balance,
            purpose: PaymentPurpose::ParticipantShare,
        }
    }

    #[tokio::test]
    async fn test_settlement_debit_is_keyed_by_reservation() {
        let wallets = manager();
        let organizer = Uuid::new_v4();
        let reservation = Uuid::new_v4();
        wallets
            .top_up(organizer, dec!(100), "top-up-1".to_string())
            .await
            .unwrap();

        let posted = wallets
            .debit_for_settlement(organizer, reservation, dec!(60))
            .await
            .unwrap();
        assert_eq!(posted.payment.purpose, PaymentPurpose::OrganizerResidual);
        assert_eq!(posted.payment.status, PaymentRecordStatus::Paid);
        assert_eq!(posted.payment.amount, dec!(60.00));

        let history = wallets.history(organizer, None).await.unwrap();
        assert_eq!(history[0].direction, EntryDirection::Debit);
        assert_eq!(history[0].balance_after, dec!(40));
        assert_eq!(history[0].idempotency_key, settlement_key(reservation));

        let again = wallets
            .debit_for_settlement(organizer, reservation, dec!(10))
            .await;
        assert!(matches!(again, Err(WalletError::DuplicateTransaction(_))));
        assert_eq!(wallets.balance(organizer).await.unwrap().balance, dec!(40));
    }

    #[tokio::test]
    async fn test_debit_rejects_overdraft_and_non_positive_amounts() {
        let wallets = manager();
        let account = Uuid::new_v4();
        wallets
            .top_up(account, dec!(20), "top-up-1".to_string())
            .await
            .unwrap();

        let overdraft = wallets
            .pay_share(balance_posting(account), dec!(25), None)
            .await;
        assert!(matches!(
            overdraft,
            Err(WalletError::InsufficientBalance { .. })
        ));

        let zero = wallets
            .pay_share(balance_posting(account), dec!(0), None)
            .await;
        assert!(matches!(zero, Err(WalletError::InvalidAmount(_))));

        let history = wallets.history(account, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].entry_type, EntryType::TopUp);
    }
}
