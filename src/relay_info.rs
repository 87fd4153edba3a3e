//! NIP-11 relay metadata document assembly, generalized from the teacher's
//! hard-coded `serde_json::json!` literal to read from [`crate::config::Config`].

use serde_json::json;

use crate::config::Config;

/// Build the NIP-11 document served on `GET /` with
/// `Accept: application/nostr+json`.
pub fn document(config: &Config) -> serde_json::Value {
    let info = &config.relay_info;
    let limitation = &info.limitation;
    json!({
        "name": info.name,
        "description": info.description,
        "pubkey": info.pubkey,
        "contact": info.contact,
        "supported_nips": info.supported_nips,
        "software": info.software,
        "version": info.version,
        "limitation": {
            "max_message_length": limitation.max_message_length,
            "max_subscriptions": limitation.max_subscriptions,
            "max_subid_length": limitation.max_subid_length,
            "max_content_length": limitation.max_content_length,
            "max_event_tags": limitation.max_event_tags,
            "min_pow_difficulty": limitation.min_pow_difficulty,
            "created_at_lower_limit": limitation.created_at_lower_limit,
            "created_at_upper_limit": limitation.created_at_upper_limit,
            "default_limit": limitation.default_limit,
            "max_limit": limitation.max_limit,
            "auth_required": config.auth.required,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_reflects_config_values() {
        let mut config = Config {
            database_url: "postgres://x".into(),
            bind_addr: "0.0.0.0:3001".parse().unwrap(),
            relay_url: "ws://0.0.0.0:3001/".into(),
            auth: crate::config::AuthConfig {
                required: true,
                timeout_seconds: 30,
            },
            relay_info: crate::config::RelayInfoConfig::default(),
            relay_policy: crate::config::RelayPolicyConfig::default(),
        };
        config.relay_info.name = "test-relay".into();

        let doc = document(&config);
        assert_eq!(doc["name"], "test-relay");
        assert_eq!(doc["limitation"]["auth_required"], true);
        assert!(doc["supported_nips"].as_array().unwrap().contains(&json!(1)));
    }
}
