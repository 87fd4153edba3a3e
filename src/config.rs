//! Typed startup configuration, assembled once in `main` from environment
//! variables (matching the teacher's literal `std::env::var(...)` idiom,
//! generalized into a single fallible constructor per SPEC_FULL §4.9).

use std::net::SocketAddr;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub relay_url: String,
    pub auth: AuthConfig,
    pub relay_info: RelayInfoConfig,
    pub relay_policy: RelayPolicyConfig,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub required: bool,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RelayInfoConfig {
    pub name: String,
    pub description: String,
    pub pubkey: String,
    pub contact: String,
    pub supported_nips: Vec<u32>,
    pub software: String,
    pub version: String,
    pub limitation: LimitationConfig,
}

#[derive(Debug, Clone)]
pub struct LimitationConfig {
    pub max_message_length: usize,
    pub max_subscriptions: usize,
    pub max_subid_length: usize,
    pub max_content_length: usize,
    pub max_event_tags: usize,
    pub min_pow_difficulty: u32,
    pub created_at_lower_limit: i64,
    pub created_at_upper_limit: i64,
    pub default_limit: u64,
    pub max_limit: u64,
}

#[derive(Debug, Clone)]
pub struct RelayPolicyConfig {
    pub min_prefix_length: usize,
}

impl Default for LimitationConfig {
    fn default() -> Self {
        Self {
            max_message_length: 131_072,
            max_subscriptions: 20,
            max_subid_length: 64,
            max_content_length: 65_536,
            max_event_tags: 2_000,
            min_pow_difficulty: 0,
            created_at_lower_limit: 94_608_000,  // ~3 years, matching typical relay defaults
            created_at_upper_limit: 900,         // 15 minutes into the future
            default_limit: 100,
            max_limit: 500,
        }
    }
}

impl Default for RelayInfoConfig {
    fn default() -> Self {
        Self {
            name: "relay-rs".to_string(),
            description: "A Rust-based Nostr Relay".to_string(),
            pubkey: String::new(),
            contact: String::new(),
            supported_nips: vec![1, 9, 11, 33, 40, 42, 45, 50, 62, 77, 86],
            software: "relay-rs".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            limitation: LimitationConfig::default(),
        }
    }
}

impl Default for RelayPolicyConfig {
    fn default() -> Self {
        Self {
            min_prefix_length: 4,
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Assemble configuration from environment variables, falling back to
    /// the teacher's hard-coded defaults (port 3001, etc.) so the relay
    /// boots with zero configuration in development.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let port = env_or("RELAY_PORT", "3001");
        let bind_addr: SocketAddr = format!("0.0.0.0:{port}")
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                name: "RELAY_PORT".to_string(),
                value: port,
            })?;

        let relay_url = env_or("RELAY_URL", &format!("ws://0.0.0.0:{}/", bind_addr.port()));

        let auth = AuthConfig {
            required: env_or("AUTH_REQUIRED", "false") == "true",
            timeout_seconds: env_parsed("AUTH_TIMEOUT_SECONDS", 30)?,
        };

        let mut relay_info = RelayInfoConfig::default();
        relay_info.name = env_or("RELAY_NAME", &relay_info.name);
        relay_info.description = env_or("RELAY_DESCRIPTION", &relay_info.description);
        relay_info.pubkey = env_or("RELAY_PUBKEY", &relay_info.pubkey);
        relay_info.contact = env_or("RELAY_CONTACT", &relay_info.contact);

        let relay_policy = RelayPolicyConfig {
            min_prefix_length: env_parsed("RELAY_MIN_PREFIX_LENGTH", 4)?,
        };

        Ok(Config {
            database_url,
            bind_addr,
            relay_url,
            auth,
            relay_info,
            relay_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limitation_defaults_match_teacher_scale() {
        let l = LimitationConfig::default();
        assert_eq!(l.max_limit, 500);
        assert_eq!(l.default_limit, 100);
    }

    #[test]
    fn env_parsed_falls_back_to_default_when_unset() {
        std::env::remove_var("RELAY_TEST_UNSET_VALUE");
        let value: u64 = env_parsed("RELAY_TEST_UNSET_VALUE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn env_parsed_rejects_unparseable_value() {
        std::env::set_var("RELAY_TEST_BAD_VALUE", "not-a-number");
        let result: Result<u64, ConfigError> = env_parsed("RELAY_TEST_BAD_VALUE", 1);
        assert!(result.is_err());
        std::env::remove_var("RELAY_TEST_BAD_VALUE");
    }
}
