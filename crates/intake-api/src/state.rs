use std::sync::Arc;

use anyhow::anyhow;
use tracing::error;

use intake_db::Database;
use intake_payments::PaymentGateway;
use intake_wizard::DraftStore;

use crate::error::ApiResult;
use crate::session::SessionCache;
use crate::storage::DocumentStorage;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    /// Local mirror of each applicant's draft, consulted when no
    /// application row exists yet.
    pub drafts: Box<dyn DraftStore>,
    pub storage: DocumentStorage,
    pub gateway: Arc<dyn PaymentGateway>,
    pub payments: PaymentSettings,
    pub sessions: SessionCache,
}

/// Values the payment handlers need to build gateway orders.
#[derive(Debug, Clone)]
pub struct PaymentSettings {
    /// Public base URL of this service; callback and cancellation URLs hang
    /// off it.
    pub public_url: String,
    /// Registered IPN id. When unset a per-order placeholder is sent.
    pub notification_id: Option<String>,
}

impl AppStateInner {
    pub fn new(
        db: Database,
        jwt_secret: String,
        drafts: Box<dyn DraftStore>,
        storage: DocumentStorage,
        gateway: Arc<dyn PaymentGateway>,
        payments: PaymentSettings,
    ) -> AppState {
        Arc::new(Self {
            db,
            jwt_secret,
            drafts,
            storage,
            gateway,
            payments,
            sessions: SessionCache::default(),
        })
    }
}

/// Run blocking database or store work off the async runtime.
pub async fn run_blocking<F, T>(state: &AppState, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&AppStateInner) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            anyhow!("blocking task failed: {e}")
        })?
}

/// `run_blocking` for handlers: failures become a 500.
pub async fn blocking<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&AppStateInner) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(run_blocking(state, f).await?)
}
