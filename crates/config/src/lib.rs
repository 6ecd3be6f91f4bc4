use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// `AppConfig` holds all configuration parameters required by the storefront.
///
/// The configuration is loaded from environment variables (optionally via a `.env` file)
/// or uses default values if the variable is not set. Monetary settings are expressed
/// in minor currency units (kuruş for TRY).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    // --- Application ---
    /// Human readable application name, used in emails and health output.
    pub app_name: String,
    /// Deployment environment ("local", "staging", "production").
    pub app_env: String,
    /// Enables verbose error messages in API responses.
    pub app_debug: bool,
    /// Public base URL of this API, used for links in outgoing emails.
    pub app_url: String,
    /// Base URL of the storefront frontend (payment redirect targets).
    pub frontend_url: String,

    // --- Database settings ---
    /// Database hostname or service name.
    pub db_host: String,
    /// Database port (default: 5432).
    pub db_port: u16,
    /// Database user.
    pub db_user: String,
    /// Database password.
    pub db_password: String,
    /// Database name.
    pub db_name: String,
    /// Maximum number of pooled connections.
    pub db_pool_size: usize,

    // --- Kafka settings ---
    /// Disables the event publisher and job worker when false.
    pub kafka_enabled: bool,
    /// List of Kafka brokers (comma-separated string in env, parsed to Vec<String>).
    pub kafka_brokers: Vec<String>,
    /// Topic carrying domain events and background jobs.
    pub kafka_events_topic: String,
    /// Kafka consumer group ID of the job worker.
    pub kafka_group_id: String,

    // --- HTTP server ---
    /// The port on which the HTTP server will listen.
    pub http_port: u16,

    // --- Shutdown timeout ---
    /// Graceful shutdown timeout (human-friendly format, e.g. "5s", "1m").
    #[serde(deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,

    // --- Shop ---
    pub shop_tax_rate: f64,
    pub shop_free_shipping_threshold: i64,
    pub shop_default_shipping_cost: i64,
    pub shop_currency: String,
    pub shop_order_prefix: String,
    pub shop_order_number_length: usize,

    // --- PayTR ---
    pub paytr_merchant_id: String,
    pub paytr_merchant_key: String,
    pub paytr_merchant_salt: String,
    pub paytr_test_mode: bool,
    /// Token endpoint of the hosted payment page.
    pub paytr_api_url: String,
    /// Prefix the issued token is appended to for the iframe.
    pub paytr_iframe_url: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub paytr_timeout: Duration,

    // --- Cache / jobs ---
    /// Lifetime of catalog cache entries.
    #[serde(deserialize_with = "deserialize_duration")]
    pub cache_ttl: Duration,
    /// Attempts made by the welcome email job before giving up.
    pub mail_max_attempts: u32,
    /// Delay between welcome email attempts.
    #[serde(deserialize_with = "deserialize_duration")]
    pub mail_backoff: Duration,
}

/// Pricing and numbering rules applied at checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct ShopSettings {
    pub tax_rate: f64,
    pub free_shipping_threshold: i64,
    pub default_shipping_cost: i64,
    pub currency: String,
    pub order_prefix: String,
    pub order_number_length: usize,
}

impl Default for ShopSettings {
    fn default() -> Self {
        Self {
            tax_rate: 0.20,
            free_shipping_threshold: 50_000,
            default_shipping_cost: 2_990,
            currency: "TRY".to_string(),
            order_prefix: "ORD".to_string(),
            order_number_length: 8,
        }
    }
}

/// Merchant credentials and endpoints of the PayTR integration.
#[derive(Debug, Clone, PartialEq)]
pub struct PayTrSettings {
    pub merchant_id: String,
    pub merchant_key: String,
    pub merchant_salt: String,
    pub test_mode: bool,
    pub api_url: String,
    pub iframe_url: String,
    pub timeout: Duration,
    pub frontend_url: String,
}

/// Custom deserializer for durations.
/// Accepts human-readable formats like "5s", "1m", etc.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let val = String::deserialize(deserializer)?;
    humantime::parse_duration(&val)
        .map_err(|e| D::Error::custom(format!("Invalid duration '{val}': {e}")))
}

impl AppConfig {
    /// Loads configuration from environment variables (and optionally from `.env` file).
    ///
    /// Fields not set via env will be filled with default values.
    ///
    /// # Errors
    /// Returns an error if environment variables are invalid or missing required values.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            // Application
            .set_default("app_name", "Storefront")?
            .set_default("app_env", "local")?
            .set_default("app_debug", false)?
            .set_default("app_url", "http://localhost:8081")?
            .set_default("frontend_url", "http://localhost:3000")?
            // Database
            .set_default("db_host", "localhost")?
            .set_default("db_port", 5432)?
            .set_default("db_user", "storefront")?
            .set_default("db_password", "securepassword")?
            .set_default("db_name", "storefront")?
            .set_default("db_pool_size", 16)?
            // Kafka
            .set_default("kafka_enabled", true)?
            .set_default("kafka_brokers", vec!["localhost:9092"])?
            .set_default("kafka_events_topic", "storefront.events")?
            .set_default("kafka_group_id", "storefront_jobs")?
            // HTTP
            .set_default("http_port", 8081)?
            // Shutdown
            .set_default("shutdown_timeout", "5s")?
            // Shop
            .set_default("shop_tax_rate", 0.20)?
            .set_default("shop_free_shipping_threshold", 50_000)?
            .set_default("shop_default_shipping_cost", 2_990)?
            .set_default("shop_currency", "TRY")?
            .set_default("shop_order_prefix", "ORD")?
            .set_default("shop_order_number_length", 8)?
            // PayTR
            .set_default("paytr_merchant_id", "")?
            .set_default("paytr_merchant_key", "")?
            .set_default("paytr_merchant_salt", "")?
            .set_default("paytr_test_mode", true)?
            .set_default("paytr_api_url", "https://www.paytr.com/odeme/api/get-token")?
            .set_default("paytr_iframe_url", "https://www.paytr.com/odeme/guvenli/")?
            .set_default("paytr_timeout", "30s")?
            // Cache / jobs
            .set_default("cache_ttl", "1h")?
            .set_default("mail_max_attempts", 3)?
            .set_default("mail_backoff", "60s")?
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("kafka_brokers"),
            )
            .build()?;

        settings
            .try_deserialize()
            .context("Failed to load configuration")
    }

    /// Checkout rules derived from the `shop_*` keys.
    pub fn shop(&self) -> ShopSettings {
        ShopSettings {
            tax_rate: self.shop_tax_rate,
            free_shipping_threshold: self.shop_free_shipping_threshold,
            default_shipping_cost: self.shop_default_shipping_cost,
            currency: self.shop_currency.clone(),
            order_prefix: self.shop_order_prefix.clone(),
            order_number_length: self.shop_order_number_length,
        }
    }

    /// Gateway settings derived from the `paytr_*` keys.
    pub fn paytr(&self) -> PayTrSettings {
        PayTrSettings {
            merchant_id: self.paytr_merchant_id.clone(),
            merchant_key: self.paytr_merchant_key.clone(),
            merchant_salt: self.paytr_merchant_salt.clone(),
            test_mode: self.paytr_test_mode,
            api_url: self.paytr_api_url.clone(),
            iframe_url: self.paytr_iframe_url.clone(),
            timeout: self.paytr_timeout,
            frontend_url: self.frontend_url.clone(),
        }
    }
}
