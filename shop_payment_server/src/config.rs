use std::{env, fmt::Display, str::FromStr};

use chrono::Duration;
use log::*;
use rust_decimal::Decimal;
use shop_payment_engine::{
    pricing::{FeeRule, PricingConfig, RoundingMode, TaxRule},
    AuditSettings,
    OrderFlowSettings,
    RetryPolicy,
};
use spg_common::{parse_boolean_flag, Secret};

const DEFAULT_SPG_HOST: &str = "127.0.0.1";
const DEFAULT_SPG_PORT: u16 = 8360;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/shop_payments.db";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 25;
/// Order expiry and webhook retry each hold a lock on a connection of their own.
pub const LEADER_ELECTED_JOBS: u32 = 2;
const DEFAULT_LEADER_POOL_SIZE: u32 = LEADER_ELECTED_JOBS;
const DEFAULT_LEADER_RETRY_SECS: u64 = 15;
const DEFAULT_LOCK_NAMESPACE: &str = "shop";
const DEFAULT_ORDER_PAYMENT_TTL_MINS: i64 = 60;
const DEFAULT_EXPIRY_SWEEP_SECS: u64 = 60;
const DEFAULT_WEBHOOK_RETRY_SWEEP_SECS: u64 = 30;
const DEFAULT_WEBHOOK_RETRY_BASE_SECS: i64 = 30;
const DEFAULT_WEBHOOK_RETRY_MAX_DELAY_SECS: i64 = 3600;
const DEFAULT_WEBHOOK_MAX_ATTEMPTS: i64 = 10;
const DEFAULT_STRIPE_TOLERANCE_SECS: i64 = 300;
const DEFAULT_CURRENCY: &str = "RON";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `sqlite://...` runs a single node without leader election. `postgres://...` supports several replicas.
    pub database_url: Secret<String>,
    pub db_max_connections: u32,
    pub leader: LeaderConfig,
    pub expiry: ExpiryConfig,
    pub webhooks: WebhookConfig,
    pub audit: AuditSettings,
    /// The shop's single currency
    pub currency: String,
    pub pricing: PricingConfig,
}

#[derive(Clone, Debug)]
pub struct LeaderConfig {
    /// Size of the dedicated connection pool that holds advisory locks. Each held lock pins one connection.
    pub pool_size: u32,
    /// How long a replica waits before trying again for a lock held elsewhere
    pub retry_interval: std::time::Duration,
    /// Prefix for every lock name, so that several deployments can share one database server
    pub namespace: String,
}

#[derive(Clone, Debug)]
pub struct ExpiryConfig {
    /// Unpaid orders older than this are cancelled with reason `payment_timeout`
    pub payment_ttl: Duration,
    pub sweep_interval: std::time::Duration,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    /// If false, webhook signatures are not checked at all. **DANGER** Development only.
    pub signature_checks: bool,
    pub stripe_secret: Secret<String>,
    pub stripe_tolerance: Duration,
    pub paypal_secret: Secret<String>,
    pub netopia_secret: Secret<String>,
    pub retry: RetryPolicy,
    pub retry_sweep_interval: std::time::Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SPG_HOST.to_string(),
            port: DEFAULT_SPG_PORT,
            database_url: Secret::from(DEFAULT_DATABASE_URL),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            leader: LeaderConfig::default(),
            expiry: ExpiryConfig::default(),
            webhooks: WebhookConfig::default(),
            audit: AuditSettings::unchained(),
            currency: DEFAULT_CURRENCY.to_string(),
            pricing: PricingConfig::default(),
        }
    }
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_LEADER_POOL_SIZE,
            retry_interval: std::time::Duration::from_secs(DEFAULT_LEADER_RETRY_SECS),
            namespace: DEFAULT_LOCK_NAMESPACE.to_string(),
        }
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            payment_ttl: Duration::minutes(DEFAULT_ORDER_PAYMENT_TTL_MINS),
            sweep_interval: std::time::Duration::from_secs(DEFAULT_EXPIRY_SWEEP_SECS),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            signature_checks: true,
            stripe_secret: Secret::default(),
            stripe_tolerance: Duration::seconds(DEFAULT_STRIPE_TOLERANCE_SECS),
            paypal_secret: Secret::default(),
            netopia_secret: Secret::default(),
            retry: RetryPolicy::default(),
            retry_sweep_interval: std::time::Duration::from_secs(DEFAULT_WEBHOOK_RETRY_SWEEP_SECS),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env_or_default("SPG_HOST", DEFAULT_SPG_HOST.to_string());
        let port = env_or_default("SPG_PORT", DEFAULT_SPG_PORT);
        let database_url = env::var("SPG_DATABASE_URL").map(Secret::new).unwrap_or_else(|_| {
            warn!("🪛️ SPG_DATABASE_URL is not set. Using the local SQLite database at {DEFAULT_DATABASE_URL}.");
            Secret::from(DEFAULT_DATABASE_URL)
        });
        let db_max_connections = env_or_default("SPG_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS);
        let leader = LeaderConfig::from_env_or_default();
        let expiry = ExpiryConfig::from_env_or_default();
        let webhooks = WebhookConfig::from_env_or_default();
        let audit = configure_audit_chain();
        let currency = env_or_default("SPG_CURRENCY", DEFAULT_CURRENCY.to_string()).to_uppercase();
        let pricing = configure_pricing();
        Self { host, port, database_url, db_max_connections, leader, expiry, webhooks, audit, currency, pricing }
    }

    pub fn order_flow_settings(&self) -> OrderFlowSettings {
        OrderFlowSettings::new(&self.currency, self.pricing, self.audit.clone())
    }
}

impl LeaderConfig {
    pub fn from_env_or_default() -> Self {
        let pool_size = leader_pool_size(env_or_default("SPG_LEADER_POOL_SIZE", DEFAULT_LEADER_POOL_SIZE));
        let retry_interval =
            std::time::Duration::from_secs(env_or_default("SPG_LEADER_RETRY_SECS", DEFAULT_LEADER_RETRY_SECS));
        let namespace = env_or_default("SPG_LOCK_NAMESPACE", DEFAULT_LOCK_NAMESPACE.to_string());
        Self { pool_size, retry_interval, namespace }
    }
}

/// A pool smaller than the number of leader-elected jobs would leave a job waiting forever for a connection, so it is
/// raised to the minimum.
fn leader_pool_size(requested: u32) -> u32 {
    if requested < LEADER_ELECTED_JOBS {
        warn!(
            "🪛️ SPG_LEADER_POOL_SIZE is {requested}, but {LEADER_ELECTED_JOBS} jobs each need a connection for their \
             leader lock. Using {LEADER_ELECTED_JOBS} instead."
        );
        LEADER_ELECTED_JOBS
    } else {
        requested
    }
}

impl ExpiryConfig {
    pub fn from_env_or_default() -> Self {
        let payment_ttl = Duration::minutes(env_or_default("SPG_ORDER_PAYMENT_TTL_MINS", DEFAULT_ORDER_PAYMENT_TTL_MINS));
        let sweep_interval =
            std::time::Duration::from_secs(env_or_default("SPG_EXPIRY_SWEEP_SECS", DEFAULT_EXPIRY_SWEEP_SECS));
        Self { payment_ttl, sweep_interval }
    }
}

impl WebhookConfig {
    pub fn from_env_or_default() -> Self {
        let signature_checks = parse_boolean_flag(env::var("SPG_WEBHOOK_SIGNATURE_CHECKS").ok(), true);
        if !signature_checks {
            warn!(
                "🚨️🚨️🚨️ Webhook signature checks are DISABLED. Anyone can mark orders as paid. Never run a \
                 production server like this. 🚨️🚨️🚨️"
            );
        }
        let stripe_secret = env_secret("SPG_STRIPE_WEBHOOK_SECRET", signature_checks);
        let paypal_secret = env_secret("SPG_PAYPAL_WEBHOOK_SECRET", signature_checks);
        let netopia_secret = env_secret("SPG_NETOPIA_WEBHOOK_SECRET", signature_checks);
        let stripe_tolerance =
            Duration::seconds(env_or_default("SPG_STRIPE_TOLERANCE_SECS", DEFAULT_STRIPE_TOLERANCE_SECS));
        let retry = RetryPolicy {
            base_delay: Duration::seconds(env_or_default("SPG_WEBHOOK_RETRY_BASE_SECS", DEFAULT_WEBHOOK_RETRY_BASE_SECS)),
            max_delay: Duration::seconds(env_or_default(
                "SPG_WEBHOOK_RETRY_MAX_DELAY_SECS",
                DEFAULT_WEBHOOK_RETRY_MAX_DELAY_SECS,
            )),
            max_attempts: env_or_default("SPG_WEBHOOK_MAX_ATTEMPTS", DEFAULT_WEBHOOK_MAX_ATTEMPTS),
        };
        let retry_sweep_interval = std::time::Duration::from_secs(env_or_default(
            "SPG_WEBHOOK_RETRY_SWEEP_SECS",
            DEFAULT_WEBHOOK_RETRY_SWEEP_SECS,
        ));
        Self {
            signature_checks,
            stripe_secret,
            stripe_tolerance,
            paypal_secret,
            netopia_secret,
            retry,
            retry_sweep_interval,
        }
    }
}

fn configure_audit_chain() -> AuditSettings {
    let enabled = parse_boolean_flag(env::var("SPG_AUDIT_CHAIN_ENABLED").ok(), true);
    if !enabled {
        warn!("🪛️ Audit chaining is disabled. New audit entries will not be tamper evident.");
        return AuditSettings::unchained();
    }
    let secret = env_secret("SPG_AUDIT_CHAIN_SECRET", true);
    if secret.is_unset() {
        error!(
            "🪛️ SPG_AUDIT_CHAIN_ENABLED is on but SPG_AUDIT_CHAIN_SECRET is not set. Every audited change will fail \
             until a secret is configured."
        );
    }
    AuditSettings::chained(secret)
}

fn configure_pricing() -> PricingConfig {
    let rounding = env_or_default("SPG_ROUNDING_MODE", RoundingMode::HalfUp);
    let fee_value = env_or_default("SPG_FEE_VALUE", Decimal::ZERO);
    let fee = if parse_boolean_flag(env::var("SPG_FEE_ENABLED").ok(), false) {
        match env_or_default("SPG_FEE_TYPE", "flat".to_string()).to_ascii_lowercase().as_str() {
            "percent" | "percentage" => FeeRule::percent(fee_value),
            "flat" => FeeRule::flat(fee_value),
            other => {
                error!("🪛️ {other} is not a valid SPG_FEE_TYPE. Use 'flat' or 'percent'. The fee is disabled.");
                FeeRule::disabled()
            },
        }
    } else {
        FeeRule::disabled()
    };
    let tax = if parse_boolean_flag(env::var("SPG_VAT_ENABLED").ok(), false) {
        TaxRule::vat(env_or_default("SPG_VAT_RATE", Decimal::ZERO))
            .on_shipping(parse_boolean_flag(env::var("SPG_VAT_APPLY_TO_SHIPPING").ok(), false))
            .on_fee(parse_boolean_flag(env::var("SPG_VAT_APPLY_TO_FEE").ok(), false))
    } else {
        TaxRule::disabled()
    };
    info!("🪛️ Pricing: fee {fee:?}, tax {tax:?}, rounding {rounding}");
    PricingConfig::new(fee, tax, rounding)
}

/// Reads and parses `name`, falling back to `default` (with a log message) when it is missing or invalid.
fn env_or_default<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(name) {
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            error!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => {
            info!("🪛️ {name} is not set. Using the default value of {default}.");
            default
        },
    }
}

fn env_secret(name: &str, required: bool) -> Secret<String> {
    let secret = Secret::new(env::var(name).unwrap_or_default());
    if secret.is_unset() && required {
        error!("🪛️ {name} is not set. Requests that need it will be refused.");
    }
    secret
}
