//! Process-wide wiring of the settlement components.

use crate::credits::CreditLedger;
use crate::db::{
    CreditRepository, PostingRepository, ReservationRepository, SettlementStore, WalletRepository,
};
use crate::invites::InviteAcceptanceCreditConsumer;
use crate::notifications::NotificationQueue;
use crate::payments::{PaymentGateway, PaymentGatewayAdapter, PaymentProcessor};
use crate::security::{DEFAULT_EVENT_CAPACITY, SecurityEventBuffer};
use crate::settlement::{SettlementConfig, SettlementScheduler};
use crate::split::SplitPolicyEngine;
use crate::wallet::WalletManager;
use std::sync::Arc;

/// Settings shared by the components of a context
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Shared secret gateways sign webhooks with
    pub webhook_secret: String,
    pub settlement: SettlementConfig,
    pub security_event_capacity: usize,
}

impl ContextConfig {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            settlement: SettlementConfig::default(),
            security_event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Every settlement component, built over one store and one gateway
#[derive(Clone)]
pub struct SettlementContext {
    pub store: Arc<dyn SettlementStore>,
    pub split: SplitPolicyEngine,
    pub credits: CreditLedger,
    pub wallets: WalletManager,
    pub adapter: Arc<PaymentGatewayAdapter>,
    pub processor: Arc<PaymentProcessor>,
    pub scheduler: Arc<SettlementScheduler>,
    pub invites: Arc<InviteAcceptanceCreditConsumer>,
    pub security: Arc<SecurityEventBuffer>,
    pub notifications: NotificationQueue,
}

impl SettlementContext {
    /// Wire all components over `store` and `gateway`.
    ///
    /// Notifications go to `notifications`; pass
    /// [`NotificationQueue::disabled`] when nothing consumes them.
    pub fn new<S>(
        store: Arc<S>,
        gateway: Arc<dyn PaymentGateway>,
        notifications: NotificationQueue,
        config: ContextConfig,
    ) -> Self
    where
        S: SettlementStore + 'static,
    {
        let reservations: Arc<dyn ReservationRepository> = store.clone();
        let credit_store: Arc<dyn CreditRepository> = store.clone();
        let wallet_store: Arc<dyn WalletRepository> = store.clone();
        let posting_store: Arc<dyn PostingRepository> = store.clone();
        let store: Arc<dyn SettlementStore> = store;

        let security = Arc::new(SecurityEventBuffer::new(config.security_event_capacity));
        let split = SplitPolicyEngine::new(reservations);
        let credits = CreditLedger::new(credit_store, posting_store.clone());
        let wallets = WalletManager::new(wallet_store, posting_store);

        let adapter = Arc::new(PaymentGatewayAdapter::new(
            store.clone(),
            gateway,
            config.webhook_secret,
            notifications.clone(),
            security.clone(),
        ));
        let processor = Arc::new(PaymentProcessor::new(
            store.clone(),
            wallets.clone(),
            credits.clone(),
            adapter.clone(),
            notifications.clone(),
            security.clone(),
        ));
        let scheduler = Arc::new(SettlementScheduler::new(
            store.clone(),
            adapter.clone(),
            wallets.clone(),
            credits.clone(),
            notifications.clone(),
            config.settlement,
        ));
        let invites = Arc::new(InviteAcceptanceCreditConsumer::new(
            store.clone(),
            credits.clone(),
        ));

        Self {
            store,
            split,
            credits,
            wallets,
            adapter,
            processor,
            scheduler,
            invites,
            security,
            notifications,
        }
    }
}
