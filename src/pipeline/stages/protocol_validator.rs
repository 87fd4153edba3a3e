//! Stage 1: parse the raw frame, enforce `max_message_length`, and
//! distinguish escape/literal/format faults (SPEC_FULL §4.1/§4.4).

use async_trait::async_trait;

use crate::codec::parse_client_message;
use crate::error::{CodecError, HaltReason};
use crate::pipeline::{Context, Services, Stage, StageOutcome};

pub struct ProtocolValidator;

#[async_trait]
impl Stage for ProtocolValidator {
    async fn run(&self, ctx: &mut Context<'_>, services: &Services) -> StageOutcome {
        let max_len = services.config.relay_info.limitation.max_message_length;
        if ctx.raw_frame.len() > max_len {
            return StageOutcome::Halt(HaltReason::MaxContentLengthExceeded);
        }

        match parse_client_message(ctx.raw_frame) {
            Ok(message) => {
                ctx.parsed = Some(message);
                StageOutcome::Continue
            }
            Err(CodecError::UnsupportedEscape) => StageOutcome::Halt(HaltReason::UnsupportedEscape),
            Err(CodecError::UnsupportedLiteral) => StageOutcome::Halt(HaltReason::UnsupportedLiteral),
            Err(CodecError::InvalidFormat(reason)) if reason.starts_with("unsupported message type") => {
                StageOutcome::Halt(HaltReason::UnsupportedMessageType)
            }
            Err(CodecError::InvalidFormat(_)) => StageOutcome::Halt(HaltReason::InvalidFormat),
            Err(CodecError::InvalidEvent(_)) => StageOutcome::Halt(HaltReason::InvalidEventHash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::store::MemoryStore;
    use std::sync::Arc;
    use tokio::sync::broadcast;

    fn services() -> Services {
        let (tx, _rx) = broadcast::channel(10);
        Services {
            store: Arc::new(MemoryStore::new()),
            config: Arc::new(crate::config::Config {
                database_url: "x".into(),
                bind_addr: "0.0.0.0:3001".parse().unwrap(),
                relay_url: "ws://0.0.0.0:3001/".into(),
                auth: crate::config::AuthConfig {
                    required: false,
                    timeout_seconds: 30,
                },
                relay_info: crate::config::RelayInfoConfig::default(),
                relay_policy: crate::config::RelayPolicyConfig::default(),
            }),
            broadcast: tx,
        }
    }

    #[tokio::test]
    async fn oversized_frame_halts_before_parsing() {
        let stage = ProtocolValidator;
        let mut state = ConnectionState::new("c".into(), false);
        let huge = "x".repeat(200_000);
        let mut ctx = Context::new(&huge, &mut state);
        let outcome = stage.run(&mut ctx, &services()).await;
        assert!(matches!(outcome, StageOutcome::Halt(HaltReason::MaxContentLengthExceeded)));
    }

    #[tokio::test]
    async fn unknown_token_maps_to_unsupported_message_type() {
        let stage = ProtocolValidator;
        let mut state = ConnectionState::new("c".into(), false);
        let raw = r#"["BOGUS", 1]"#;
        let mut ctx = Context::new(raw, &mut state);
        let outcome = stage.run(&mut ctx, &services()).await;
        assert!(matches!(outcome, StageOutcome::Halt(HaltReason::UnsupportedMessageType)));
    }
}
