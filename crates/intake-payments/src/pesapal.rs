use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::PaymentError;
use crate::gateway::{OrderRequest, OrderResponse, PaymentGateway, TransactionStatus};

pub const DEFAULT_BASE_URL: &str = "https://pay.pesapal.com/v3";

/// Tokens are refreshed this long before the gateway says they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 30;

/// Used when the gateway's expiry date cannot be read. Pesapal tokens live
/// for five minutes.
const FALLBACK_TOKEN_TTL_SECS: i64 = 5 * 60;

#[derive(Debug, Clone)]
pub struct PesapalConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub timeout: Duration,
}

pub struct PesapalClient {
    http: Client,
    config: PesapalConfig,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    #[serde(rename = "expiryDate")]
    expiry_date: Option<String>,
    error: Option<GatewayErrorBody>,
}

#[derive(Debug, Deserialize)]
struct SubmitOrderResponse {
    order_tracking_id: Option<String>,
    merchant_reference: Option<String>,
    redirect_url: Option<String>,
    error: Option<GatewayErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    payment_status_description: Option<String>,
    payment_method: Option<String>,
    confirmation_code: Option<String>,
    error: Option<GatewayErrorBody>,
}

/// Pesapal reports failures as `"error": {..}` on a 200 response; an error
/// object with neither code nor message is treated as absent.
fn check_gateway_error(error: Option<GatewayErrorBody>) -> Result<(), PaymentError> {
    match error {
        Some(GatewayErrorBody {
            code: None,
            message: None,
        })
        | None => Ok(()),
        Some(err) => Err(PaymentError::Gateway {
            code: err.code.unwrap_or_else(|| "unknown".into()),
            message: err.message.unwrap_or_default(),
        }),
    }
}

fn parse_expiry(raw: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| {
            warn!("Unreadable token expiry {:?}, assuming default lifetime", raw);
            now + chrono::Duration::seconds(FALLBACK_TOKEN_TTL_SECS)
        })
}

impl PesapalClient {
    pub fn new(config: PesapalConfig) -> Result<Self, PaymentError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, PaymentError> {
        let response = request.header("Accept", "application/json").send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }

    /// Return a cached bearer token, requesting a new one when it is close
    /// to expiry.
    async fn bearer_token(&self) -> Result<String, PaymentError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.value.clone());
        }

        let request = self.http.post(self.url("Auth/RequestToken")).json(&serde_json::json!({
            "consumer_key": self.config.consumer_key,
            "consumer_secret": self.config.consumer_secret,
        }));
        let body: TokenResponse = Self::send(request).await?;
        check_gateway_error(body.error)?;

        let value = body.token.ok_or(PaymentError::MissingField("token"))?;
        let expires_at = parse_expiry(body.expiry_date.as_deref(), now);
        debug!("Obtained gateway token valid until {}", expires_at);

        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at,
        });
        Ok(value)
    }
}

#[async_trait]
impl PaymentGateway for PesapalClient {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResponse, PaymentError> {
        let token = self.bearer_token().await?;
        let request = self
            .http
            .post(self.url("Transactions/SubmitOrderRequest"))
            .bearer_auth(token)
            .json(order);
        let body: SubmitOrderResponse = Self::send(request).await?;
        check_gateway_error(body.error)?;

        Ok(OrderResponse {
            order_tracking_id: body
                .order_tracking_id
                .ok_or(PaymentError::MissingField("order_tracking_id"))?,
            merchant_reference: body.merchant_reference.unwrap_or_else(|| order.id.clone()),
            redirect_url: body
                .redirect_url
                .ok_or(PaymentError::MissingField("redirect_url"))?,
        })
    }

    async fn transaction_status(
        &self,
        order_tracking_id: &str,
    ) -> Result<TransactionStatus, PaymentError> {
        let token = self.bearer_token().await?;
        let request = self
            .http
            .get(self.url("Transactions/GetTransactionStatus"))
            .query(&[("orderTrackingId", order_tracking_id)])
            .bearer_auth(token);
        let body: StatusResponse = Self::send(request).await?;
        check_gateway_error(body.error)?;

        Ok(TransactionStatus {
            status_description: body.payment_status_description.unwrap_or_default(),
            payment_method: body.payment_method.filter(|m| !m.is_empty()),
            confirmation_code: body.confirmation_code.filter(|c| !c.is_empty()),
        })
    }
}
