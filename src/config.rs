use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

/// Whether the integration points at the vendor's sandbox or its
/// production environment. Decided once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    Test,
    Live,
}

impl GatewayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayMode::Test => "test",
            GatewayMode::Live => "live",
        }
    }
}

/// How the shopper reaches the vendor checkout: a full-page redirect or
/// an embedded button that bootstraps a session on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presentation {
    Hosted,
    Embedded,
}

impl Presentation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Presentation::Hosted => "hosted",
            Presentation::Embedded => "embedded",
        }
    }
}

/// Gateway credentials and mode, constructed once and threaded into the
/// vendor client and the services. There is no global settings lookup.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub mode: GatewayMode,
    pub store_id: String,
    pub store_secret: String,
    /// Mode-appropriate vendor base URL (sandbox or production).
    pub base_url: String,
    pub presentation: Presentation,
}

impl GatewaySettings {
    /// Fails fast when the merchant has not finished configuration.
    pub fn require_credentials(&self) -> Result<(), String> {
        if self.store_id.trim().is_empty() || self.store_secret.trim().is_empty() {
            return Err("store id and store secret must be configured".to_string());
        }
        Ok(())
    }

    /// Base URL of the vendor's merchant dashboard for this mode, used
    /// by ops tooling to link out to a transaction.
    pub fn manage_url(&self) -> String {
        format!("{}/manage/", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    /// Public base URL of this service, used to build the success,
    /// cancel, and webhook callback URLs handed to the vendor.
    pub public_base_url: String,
    pub gateway: GatewaySettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present

        let mode = match env::var("GATEWAY_MODE")
            .unwrap_or_else(|_| "test".to_string())
            .as_str()
        {
            "live" => GatewayMode::Live,
            _ => GatewayMode::Test,
        };

        let presentation = match env::var("GATEWAY_CHECKOUT")
            .unwrap_or_else(|_| "hosted".to_string())
            .as_str()
        {
            "embedded" => Presentation::Embedded,
            _ => Presentation::Hosted,
        };

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            public_base_url: env::var("PUBLIC_BASE_URL")?,
            gateway: GatewaySettings {
                mode,
                store_id: env::var("GATEWAY_STORE_ID").unwrap_or_default(),
                store_secret: env::var("GATEWAY_STORE_SECRET").unwrap_or_default(),
                base_url: env::var("GATEWAY_BASE_URL")?,
                presentation,
            },
        })
    }

    pub fn success_url(&self, reference: &str) -> String {
        format!(
            "{}/payments/return?reference={}",
            self.public_base_url.trim_end_matches('/'),
            reference
        )
    }

    pub fn cancel_url(&self, reference: &str) -> String {
        format!(
            "{}/payments/cancelled?reference={}",
            self.public_base_url.trim_end_matches('/'),
            reference
        )
    }

    pub fn webhook_url(&self) -> String {
        format!(
            "{}/webhooks/gateway",
            self.public_base_url.trim_end_matches('/')
        )
    }
}
