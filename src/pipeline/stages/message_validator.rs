//! Stage 3: constrain subscription id length and the per-connection
//! subscription count (SPEC_FULL §4.4/§4.9 `max_subid_length`/`max_subscriptions`).
//! Filter non-emptiness is already enforced by the codec (`parse_filters`
//! rejects a `REQ`/`COUNT` with zero filter objects).

use async_trait::async_trait;

use crate::codec::{ClientMessage, RelayMessage};
use crate::error::HaltReason;
use crate::pipeline::{Context, Services, Stage, StageOutcome};

pub struct MessageValidator;

#[async_trait]
impl Stage for MessageValidator {
    async fn run(&self, ctx: &mut Context<'_>, services: &Services) -> StageOutcome {
        let limitation = &services.config.relay_info.limitation;

        let (subscription_id, is_new) = match &ctx.parsed {
            Some(ClientMessage::Req { subscription_id, .. })
            | Some(ClientMessage::Count { subscription_id, .. }) => (
                subscription_id.clone(),
                !ctx.state.subscriptions.contains(subscription_id),
            ),
            Some(ClientMessage::Close(subscription_id)) => (subscription_id.clone(), false),
            _ => return StageOutcome::Continue,
        };

        if subscription_id.len() > limitation.max_subid_length {
            ctx.frames.push(RelayMessage::closed(
                subscription_id,
                HaltReason::SubscriptionIdTooLong.notice_text(),
            ));
            return StageOutcome::Halt(HaltReason::Handled);
        }

        if is_new && ctx.state.subscriptions.len() >= limitation.max_subscriptions {
            ctx.frames.push(RelayMessage::closed(
                subscription_id,
                "restricted: max subscriptions exceeded",
            ));
            return StageOutcome::Halt(HaltReason::Handled);
        }

        StageOutcome::Continue
    }
}
