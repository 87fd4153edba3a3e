//! Stage 2: when the relay requires auth and this connection hasn't
//! authenticated, reject `EVENT` and `REQ` before they reach the store
//! (SPEC_FULL §4.4/§4.8). `AUTH` itself, and all other message types, pass
//! through unconditionally — `AUTH` is how a connection authenticates.

use async_trait::async_trait;

use crate::codec::{ClientMessage, RelayMessage};
use crate::error::HaltReason;
use crate::pipeline::{Context, Services, Stage, StageOutcome};

pub struct AuthEnforcer;

#[async_trait]
impl Stage for AuthEnforcer {
    async fn run(&self, ctx: &mut Context<'_>, services: &Services) -> StageOutcome {
        if !services.config.auth.required || ctx.state.is_authenticated() {
            return StageOutcome::Continue;
        }

        match &ctx.parsed {
            Some(ClientMessage::Event(event)) => {
                ctx.frames.push(RelayMessage::ok(
                    event.id.clone(),
                    false,
                    HaltReason::AuthRequired.notice_text(),
                ));
                StageOutcome::Halt(HaltReason::Handled)
            }
            Some(ClientMessage::Req { subscription_id, .. }) => {
                ctx.frames.push(RelayMessage::closed(
                    subscription_id.clone(),
                    HaltReason::AuthRequired.notice_text(),
                ));
                StageOutcome::Halt(HaltReason::Handled)
            }
            _ => StageOutcome::Continue,
        }
    }
}
