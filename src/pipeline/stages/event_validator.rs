//! Stage 4: for `EVENT`/`AUTH` payloads, check the id hash, the Schnorr
//! signature, and `created_at` sanity against the configured drift bounds
//! (SPEC_FULL §4.4).

use async_trait::async_trait;

use crate::codec::ClientMessage;
use crate::error::HaltReason;
use crate::event::Event;
use crate::pipeline::{Context, Services, Stage, StageOutcome};

pub struct EventValidator;

#[async_trait]
impl Stage for EventValidator {
    async fn run(&self, ctx: &mut Context<'_>, services: &Services) -> StageOutcome {
        let event: &Event = match &ctx.parsed {
            Some(ClientMessage::Event(event)) | Some(ClientMessage::Auth(event)) => event.as_ref(),
            _ => return StageOutcome::Continue,
        };

        if !event.hash_matches() {
            return StageOutcome::Halt(HaltReason::InvalidEventHash);
        }

        let limitation = &services.config.relay_info.limitation;
        let now = chrono::Utc::now().timestamp();
        if event.created_at < now - limitation.created_at_lower_limit
            || event.created_at > now + limitation.created_at_upper_limit
        {
            return StageOutcome::Halt(HaltReason::InvalidCreatedAt);
        }

        if event.verify_signature().is_err() {
            return StageOutcome::Halt(HaltReason::InvalidSignature);
        }

        StageOutcome::Continue
    }
}
