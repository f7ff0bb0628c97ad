//! Outbound payment gateway abstraction and its HTTP implementation.

use super::errors::{GatewayError, GatewayResult};
use super::models::{PaymentMethod, PaymentRecordStatus};
use crate::money::Amount;
use crate::reservation::AccountId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Money movement requested from the gateway
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Our payment record id, sent as the gateway's external reference
    pub reference: Uuid,
    pub account_id: Option<AccountId>,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub description: String,
    /// Tokenized card from the client; never logged
    pub card_token: Option<String>,
}

/// Gateway answer to an accepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub external_id: String,
    pub status: PaymentRecordStatus,
}

/// External payment provider
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Name used in webhook routes and logs
    fn name(&self) -> &str;

    /// Collect money immediately (pix or card)
    async fn charge(&self, request: &ChargeRequest) -> GatewayResult<GatewayResponse>;

    /// Hold funds on a card without capturing them
    async fn pre_authorize(&self, request: &ChargeRequest) -> GatewayResult<GatewayResponse>;

    /// Capture `amount` of an authorized hold
    async fn capture(&self, external_id: &str, amount: Amount) -> GatewayResult<GatewayResponse>;

    /// Refund a payment, fully when `amount` is `None`
    async fn refund(
        &self,
        external_id: &str,
        amount: Option<Amount>,
    ) -> GatewayResult<GatewayResponse>;
}

/// Map a gateway payment status to the record status it implies
pub fn map_gateway_status(status: &str) -> Option<PaymentRecordStatus> {
    match status.to_ascii_uppercase().as_str() {
        "PENDING" | "AWAITING_RISK_ANALYSIS" => Some(PaymentRecordStatus::Pending),
        "AUTHORIZED" => Some(PaymentRecordStatus::Authorized),
        "CONFIRMED" | "RECEIVED" | "RECEIVED_IN_CASH" => Some(PaymentRecordStatus::Paid),
        "REFUSED" | "OVERDUE" | "DELETED" | "CANCELLED" => Some(PaymentRecordStatus::Failed),
        "REFUNDED" | "REFUND_REQUESTED" => Some(PaymentRecordStatus::Refunded),
        _ => None,
    }
}

/// HTTP gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "asaas".to_string(),
            base_url: "https://sandbox.asaas.com/api/v3".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentBody<'a> {
    billing_type: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    value: Amount,
    external_reference: String,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credit_card_token: Option<&'a str>,
    authorize_only: bool,
}

#[derive(Debug, Serialize)]
struct ValueBody {
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    value: Option<Amount>,
}

#[derive(Debug, Deserialize)]
struct PaymentReply {
    id: String,
    status: String,
}

/// Gateway reached over its REST API
pub struct HttpPaymentGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn billing_type(method: PaymentMethod) -> GatewayResult<&'static str> {
        match method {
            PaymentMethod::Pix => Ok("PIX"),
            PaymentMethod::Card => Ok("CREDIT_CARD"),
            PaymentMethod::Balance | PaymentMethod::Credits => Err(GatewayError::Rejected(
                format!("method {method} is not handled by the gateway"),
            )),
        }
    }

    fn map_send_error(&self, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::Timeout(self.config.timeout)
        } else {
            GatewayError::from(error)
        }
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> GatewayResult<GatewayResponse> {
        let response = self
            .client
            .post(format!("{}{}", self.config.base_url, path))
            .header("access_token", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{status}: {detail}")));
        }
        if !status.is_success() {
            return Err(GatewayError::Transport(format!("gateway answered {status}")));
        }

        let reply: PaymentReply = response.json().await.map_err(|e| self.map_send_error(e))?;
        let mapped = map_gateway_status(&reply.status).ok_or_else(|| {
            GatewayError::InvalidResponse(format!("unknown payment status {}", reply.status))
        })?;

        Ok(GatewayResponse {
            external_id: reply.id,
            status: mapped,
        })
    }

    async fn create_payment(
        &self,
        request: &ChargeRequest,
        authorize_only: bool,
    ) -> GatewayResult<GatewayResponse> {
        let body = PaymentBody {
            billing_type: Self::billing_type(request.method)?,
            value: request.amount,
            external_reference: request.reference.to_string(),
            description: &request.description,
            customer: request.account_id.map(|id| id.to_string()),
            credit_card_token: request.card_token.as_deref(),
            authorize_only,
        };
        self.post("/payments", &body).await
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn charge(&self, request: &ChargeRequest) -> GatewayResult<GatewayResponse> {
        self.create_payment(request, false).await
    }

    async fn pre_authorize(&self, request: &ChargeRequest) -> GatewayResult<GatewayResponse> {
        if request.method != PaymentMethod::Card {
            return Err(GatewayError::Rejected(
                "only cards can be pre-authorized".to_string(),
            ));
        }
        self.create_payment(request, true).await
    }

    async fn capture(&self, external_id: &str, amount: Amount) -> GatewayResult<GatewayResponse> {
        self.post(
            &format!("/payments/{external_id}/captureAuthorizedPayment"),
            &ValueBody {
                value: Some(amount),
            },
        )
        .await
    }

    async fn refund(
        &self,
        external_id: &str,
        amount: Option<Amount>,
    ) -> GatewayResult<GatewayResponse> {
        self.post(
            &format!("/payments/{external_id}/refund"),
            &ValueBody { value: amount },
        )
        .await
    }
}
