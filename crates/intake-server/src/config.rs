use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use intake_payments::PesapalConfig;
use intake_payments::pesapal::DEFAULT_BASE_URL;

/// Secrets that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "changeme", "secret"];

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub storage_dir: PathBuf,
    pub draft_dir: PathBuf,
    pub public_url: String,
    pub static_dir: Option<PathBuf>,
    pub pesapal: PesapalConfig,
    pub ipn_id: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = var("INTAKE_JWT_SECRET").context("INTAKE_JWT_SECRET must be set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) || jwt_secret.len() < 16 {
            bail!("INTAKE_JWT_SECRET is a placeholder or shorter than 16 characters");
        }

        let host = or("INTAKE_HOST", "0.0.0.0");
        let port: u16 = or("INTAKE_PORT", "3000")
            .parse()
            .context("INTAKE_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {host}:{port}"))?;

        let pesapal = PesapalConfig {
            base_url: or("PESAPAL_API_URL", DEFAULT_BASE_URL),
            consumer_key: var("PESAPAL_CONSUMER_KEY").unwrap_or_default(),
            consumer_secret: var("PESAPAL_CONSUMER_SECRET").unwrap_or_default(),
            timeout: GATEWAY_TIMEOUT,
        };

        Ok(Self {
            addr,
            db_path: PathBuf::from(or("INTAKE_DB_PATH", "intake.db")),
            jwt_secret,
            storage_dir: PathBuf::from(or("INTAKE_STORAGE_DIR", "./uploads")),
            draft_dir: PathBuf::from(or("INTAKE_DRAFT_DIR", "./drafts")),
            public_url: or("INTAKE_PUBLIC_URL", &format!("http://localhost:{port}")),
            static_dir: var("INTAKE_STATIC_DIR").map(PathBuf::from),
            pesapal,
            ipn_id: var("PESAPAL_IPN_ID"),
        })
    }

    /// Payments cannot work without gateway credentials, but the rest of the
    /// service can; the caller only warns.
    pub fn has_gateway_credentials(&self) -> bool {
        !self.pesapal.consumer_key.is_empty() && !self.pesapal.consumer_secret.is_empty()
    }
}
