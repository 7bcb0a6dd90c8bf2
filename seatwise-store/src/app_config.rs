use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub payment: PaymentConfig,
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    /// Browsing hold placed when seats are first locked.
    pub seat_hold_seconds: u64,
    /// Longer hold granted when the client enters the payment window.
    pub payment_hold_seconds: u64,
    pub max_seats_per_session: u32,
    /// Fallback sweep cadence for drafts whose locks lapsed unnoticed.
    pub draft_sweep_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    /// HMAC key the gateway signs webhook payloads with.
    pub checksum_key: String,
    /// Accept unsigned payloads; only ever true for local development.
    #[serde(default)]
    pub allow_unsigned: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("SEATWISE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
