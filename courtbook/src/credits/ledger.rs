//! Credit consumption and housekeeping.

use super::errors::{CreditError, CreditResult};
use super::models::{
    CreditAllocation, CreditConsumption, CreditEntry, CreditSource, NewCreditEntry,
};
use crate::db::{CreditRepository, PaymentPosting, PostedPayment, PostingRepository};
use crate::money::{Amount, round_currency};
use crate::reservation::AccountId;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Plan how `amount` is drawn from `entries`.
///
/// Only entries spendable at `now` are considered, earliest expiration first
/// (ties broken by creation time, then id). Each entry gives
/// `min(remaining, amount - consumed)`. The plan never over-draws and reports
/// any shortfall in [`CreditConsumption::remaining`].
pub fn plan_consumption(
    entries: &[CreditEntry],
    amount: Amount,
    now: DateTime<Utc>,
) -> CreditConsumption {
    let target = round_currency(amount.max(Amount::ZERO));

    let mut candidates: Vec<&CreditEntry> =
        entries.iter().filter(|e| e.is_spendable(now)).collect();
    candidates.sort_by(|a, b| {
        a.expires_at
            .cmp(&b.expires_at)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });

    let mut consumption = CreditConsumption {
        allocations: Vec::new(),
        applied: round_currency(Amount::ZERO),
        remaining: target,
    };

    for entry in candidates {
        if consumption.remaining <= Amount::ZERO {
            break;
        }

        let take = round_currency(entry.remaining_value.min(consumption.remaining));
        let remaining_after = round_currency(entry.remaining_value - take);
        consumption.allocations.push(CreditAllocation {
            entry_id: entry.id,
            amount: take,
            remaining_after,
            exhausted: remaining_after == Amount::ZERO,
        });
        consumption.applied = round_currency(consumption.applied + take);
        consumption.remaining = round_currency(consumption.remaining - take);
    }

    consumption
}

/// Ledger of prepaid credits per account
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn CreditRepository>,
    postings: Arc<dyn PostingRepository>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn CreditRepository>, postings: Arc<dyn PostingRepository>) -> Self {
        Self { store, postings }
    }

    /// Spend up to `amount_due` of the posting account's credits.
    ///
    /// The consumption, its `paid` record and the participant update named
    /// by the posting commit together. No record is written when nothing
    /// applies.
    ///
    /// # Errors
    ///
    /// * `CreditError::InvalidAmount` - `amount_due` is negative
    pub async fn spend(
        &self,
        posting: PaymentPosting,
        amount_due: Amount,
        now: DateTime<Utc>,
    ) -> CreditResult<(CreditConsumption, Option<PostedPayment>)> {
        if amount_due < Amount::ZERO {
            return Err(CreditError::InvalidAmount(amount_due));
        }
        if round_currency(amount_due) == Amount::ZERO {
            return Ok((CreditConsumption::default(), None));
        }

        let account_id = posting.account_id;
        let (consumption, posted) = self
            .postings
            .post_credit_payment(amount_due, now, posting)
            .await?;
        log::debug!(
            "Consumed {} credits for account {} ({} entries, shortfall {})",
            consumption.applied,
            account_id,
            consumption.allocations.len(),
            consumption.remaining
        );
        Ok((consumption, posted))
    }

    /// Grant a new credit entry
    pub async fn grant(
        &self,
        account_id: AccountId,
        value: Amount,
        expires_at: DateTime<Utc>,
        source: CreditSource,
    ) -> CreditResult<CreditEntry> {
        if round_currency(value) <= Amount::ZERO {
            return Err(CreditError::InvalidAmount(value));
        }
        if expires_at <= Utc::now() {
            return Err(CreditError::ExpiredOnGrant);
        }

        let entry = self
            .store
            .grant_credit(NewCreditEntry {
                account_id,
                value,
                source,
                expires_at,
            })
            .await?;
        log::info!(
            "Granted {} {} credit to account {}",
            entry.face_value,
            source,
            account_id
        );
        Ok(entry)
    }

    /// Total spendable value of an account at `now`
    pub async fn available(&self, account_id: AccountId, now: DateTime<Utc>) -> CreditResult<Amount> {
        let entries = self.store.list_credits(account_id).await?;
        Ok(round_currency(
            entries
                .iter()
                .filter(|e| e.is_spendable(now))
                .map(|e| e.remaining_value)
                .sum(),
        ))
    }

    /// Every entry of an account, including used and expired ones
    pub async fn entries(&self, account_id: AccountId) -> CreditResult<Vec<CreditEntry>> {
        Ok(self.store.list_credits(account_id).await?)
    }

    /// Mark active entries past their expiration as expired
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> CreditResult<u64> {
        let expired = self.store.expire_credits(now).await?;
        if expired > 0 {
            log::info!("Expired {expired} credit entries");
        }
        Ok(expired)
    }
}
