use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;

const CONFIG_DIR: &str = "config";
const DEFAULT_ENV: &str = "development";

/// Application configuration.
///
/// Loaded from built-in defaults, optional `config/{env}` files and
/// `APP__`-prefixed environment variables, in that order of precedence.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Prefix for generated order numbers (`<PREFIX>-YYYYMMDD-XXXXX`)
    #[serde(default = "default_order_number_prefix")]
    pub order_number_prefix: String,

    /// ISO 4217 currency code for all amounts
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Flat shipping charge in the smallest currency unit
    #[serde(default = "default_shipping_flat_cost")]
    pub shipping_flat_cost: i64,

    /// Subtotal at or above which shipping is free, smallest currency unit
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: i64,

    /// Tax rate in basis points (e.g. 1800 = 18%)
    #[serde(default = "default_tax_rate_bps")]
    pub tax_rate_bps: i64,

    /// Payment gateway API secret; online checkout is disabled when unset
    #[serde(default)]
    pub stripe_secret_key: Option<String>,

    /// Shared secret for verifying inbound webhook signatures
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,

    /// Maximum accepted age of a webhook signature timestamp (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub stripe_webhook_tolerance_secs: u64,

    /// Public base URL used to build gateway success/cancel redirects
    #[serde(default = "default_app_url")]
    pub app_url: String,

    /// API key required on admin endpoints
    #[serde(default)]
    pub admin_api_key: Option<String>,

    /// Email delivery API endpoint; notifications are logged-only when unset
    #[serde(default)]
    pub email_api_url: Option<String>,

    /// Email delivery API key
    #[serde(default)]
    pub email_api_key: Option<String>,

    /// From address for transactional email
    #[serde(default = "default_email_from")]
    pub email_from: String,
}

fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_order_number_prefix() -> String {
    "BAB".to_string()
}
fn default_currency() -> String {
    "INR".to_string()
}
fn default_shipping_flat_cost() -> i64 {
    9900
}
fn default_free_shipping_threshold() -> i64 {
    99900
}
fn default_tax_rate_bps() -> i64 {
    1800
}
fn default_webhook_tolerance_secs() -> u64 {
    300
}
fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_email_from() -> String {
    "orders@example.com".to_string()
}

impl AppConfig {
    /// Minimal constructor used by tests and embedded setups.
    pub fn for_database(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: "127.0.0.1".to_string(),
            port: default_port(),
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            db_max_connections: 1,
            db_min_connections: 1,
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            order_number_prefix: default_order_number_prefix(),
            currency: default_currency(),
            shipping_flat_cost: default_shipping_flat_cost(),
            free_shipping_threshold: default_free_shipping_threshold(),
            tax_rate_bps: default_tax_rate_bps(),
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            app_url: default_app_url(),
            admin_api_key: None,
            email_api_url: None,
            email_api_key: None,
            email_from: default_email_from(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Load configuration for the current `RUN_ENV`/`APP_ENV` profile.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    load_config_from(CONFIG_DIR, &run_env)
}

/// Load configuration from an explicit directory and profile name.
///
/// Sources, in increasing precedence: built-in defaults, `{dir}/default`,
/// `{dir}/{run_env}`, then `APP__`-prefixed environment variables.
pub fn load_config_from(config_dir: &str, run_env: &str) -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080i64)?
        .set_default("environment", run_env)?
        .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
        .add_source(File::with_name(&format!("{}/{}", config_dir, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    config.try_deserialize()
}

/// Initialize the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=info", level);
    let filter = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let registry = tracing_subscriber::registry().with(EnvFilter::new(filter));
    if json {
        let _ = registry.with(fmt::layer().json()).try_init();
    } else {
        let _ = registry.with(fmt::layer()).try_init();
    }
}
