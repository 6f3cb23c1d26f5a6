use async_trait::async_trait;
use serde::Serialize;

use crate::error::PaymentError;

#[derive(Debug, Clone, Serialize)]
pub struct BillingAddress {
    pub email_address: String,
    pub phone_number: String,
    pub first_name: String,
    pub last_name: String,
}

/// Order submitted to the gateway. `id` is our merchant reference.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub id: String,
    pub currency: String,
    pub amount: u32,
    pub description: String,
    pub callback_url: String,
    pub cancellation_url: String,
    pub notification_id: String,
    pub billing_address: BillingAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderResponse {
    pub order_tracking_id: String,
    pub merchant_reference: String,
    /// Hosted checkout page the browser is sent to.
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionStatus {
    /// Free text such as `COMPLETED`, `FAILED`, `INVALID`, `REVERSED`.
    pub status_description: String,
    pub payment_method: Option<String>,
    pub confirmation_code: Option<String>,
}

/// The outbound seam for payment processing. The HTTP implementation is
/// `PesapalClient`; tests substitute their own.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResponse, PaymentError>;

    async fn transaction_status(
        &self,
        order_tracking_id: &str,
    ) -> Result<TransactionStatus, PaymentError>;
}
