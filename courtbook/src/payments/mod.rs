//! Payments: gateway calls, webhook reconciliation and payment initiation.
//!
//! Every money movement leaves a [`PaymentRecord`] whose status only moves
//! forward. Gateway-backed records are created `pending` before the call and
//! completed by the gateway's webhook; wallet and credit payments are `paid`
//! as soon as they are recorded.

pub mod adapter;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod processor;
pub mod signature;

pub use adapter::{PaymentGatewayAdapter, PaymentIntent, ReprocessSummary, STALE_PROCESSING_MINUTES};
pub use errors::{
    GatewayError, GatewayResult, PaymentError, PaymentResult, WebhookError, WebhookResult,
};
pub use gateway::{
    ChargeRequest, GatewayConfig, GatewayResponse, HttpPaymentGateway, PaymentGateway,
    map_gateway_status,
};
pub use models::{
    NewPaymentRecord, PaymentMethod, PaymentPurpose, PaymentRecord, PaymentRecordStatus,
    PaymentUpdate, WebhookAck, WebhookEvent, WebhookLogEntry, WebhookPayload, WebhookPayment,
    WebhookStatus,
};
pub use processor::{PaymentOutcome, PaymentProcessor, ProcessPayment};
