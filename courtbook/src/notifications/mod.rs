//! Outbound notification queue.
//!
//! Settlement and payment outcomes are handed to an external notifier
//! through a bounded channel. Enqueueing never blocks and never fails the
//! financial operation that produced the notification; a full or closed
//! queue is logged and the notification is dropped.

use crate::money::Amount;
use crate::reservation::AccountId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Event handed to the notifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettlementNotification {
    /// A reservation was closed out and confirmed
    ReservationConfirmed {
        reservation_id: Uuid,
        organizer_id: AccountId,
        organizer_residual: Amount,
    },

    /// Closing a reservation failed; it stays pending for the next tick
    SettlementFailed {
        reservation_id: Uuid,
        organizer_id: AccountId,
        reason: String,
    },

    /// A participant's payment was confirmed
    PaymentConfirmed {
        reservation_id: Uuid,
        participant_id: Uuid,
        amount: Amount,
    },
}

/// Sending half of the notification queue
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<SettlementNotification>,
}

impl NotificationQueue {
    /// Create a queue and the receiver the notifier drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SettlementNotification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue whose receiver is dropped; every notification is discarded
    pub fn disabled() -> Self {
        let (queue, _receiver) = Self::channel(1);
        queue
    }

    /// Enqueue without waiting. Returns whether the notification was queued.
    pub fn notify(&self, notification: SettlementNotification) -> bool {
        match self.sender.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                log::warn!("Notification queue full, dropping {dropped:?}");
                false
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                log::debug!("Notification queue closed, dropping {dropped:?}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_notifications_are_delivered_in_order() {
        let (queue, mut receiver) = NotificationQueue::channel(4);
        let reservation_id = Uuid::new_v4();

        assert!(queue.notify(SettlementNotification::ReservationConfirmed {
            reservation_id,
            organizer_id: Uuid::new_v4(),
            organizer_residual: dec!(10),
        }));
        assert!(queue.notify(SettlementNotification::PaymentConfirmed {
            reservation_id,
            participant_id: Uuid::new_v4(),
            amount: dec!(5),
        }));

        assert!(matches!(
            receiver.recv().await,
            Some(SettlementNotification::ReservationConfirmed { .. })
        ));
        assert!(matches!(
            receiver.recv().await,
            Some(SettlementNotification::PaymentConfirmed { .. })
        ));
    }

    #[test]
    fn test_full_or_closed_queue_drops_silently() {
        let (queue, _receiver) = NotificationQueue::channel(1);
        let failed = SettlementNotification::SettlementFailed {
            reservation_id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            reason: "insufficient balance".to_string(),
        };

        assert!(queue.notify(failed.clone()));
        assert!(!queue.notify(failed.clone()));
        assert!(!NotificationQueue::disabled().notify(failed));
    }
}
