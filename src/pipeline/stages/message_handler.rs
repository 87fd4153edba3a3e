//! Stage 7: dispatch the final effect for whichever message type survived —
//! live fan-out for an accepted `EVENT`, replay + `EOSE` for `REQ`, a count
//! for `COUNT`, subscription teardown for `CLOSE`, challenge verification
//! for `AUTH` (SPEC_FULL §4.4/§4.8).

use async_trait::async_trait;

use crate::codec::{ClientMessage, RelayMessage};
use crate::error::HaltReason;
use crate::pipeline::{Context, Services, Stage, StageOutcome};
use crate::store::InsertOutcome;

pub struct MessageHandler;

#[async_trait]
impl Stage for MessageHandler {
    async fn run(&self, ctx: &mut Context<'_>, services: &Services) -> StageOutcome {
        match ctx.parsed.take() {
            Some(ClientMessage::Event(event)) => {
                if ctx.store_outcome == Some(InsertOutcome::Accepted) {
                    let _ = services.broadcast.send(*event);
                }
                StageOutcome::Continue
            }
            Some(ClientMessage::Req {
                subscription_id,
                filters,
            }) => match services.store.query_events(&filters).await {
                Ok(events) => {
                    ctx.state.subscriptions.insert(subscription_id.clone(), filters);
                    for event in events {
                        ctx.frames.push(RelayMessage::event(subscription_id.clone(), event));
                    }
                    ctx.frames.push(RelayMessage::eose(subscription_id));
                    StageOutcome::Continue
                }
                Err(_) => {
                    ctx.frames
                        .push(RelayMessage::notice(HaltReason::StoreQueryFailed.notice_text()));
                    StageOutcome::Halt(HaltReason::Handled)
                }
            },
            Some(ClientMessage::Count {
                subscription_id,
                filters,
            }) => match services.store.count_events(&filters).await {
                Ok(count) => {
                    ctx.frames.push(RelayMessage::count(subscription_id, count, None));
                    StageOutcome::Continue
                }
                Err(_) => {
                    ctx.frames
                        .push(RelayMessage::notice(HaltReason::StoreQueryFailed.notice_text()));
                    StageOutcome::Halt(HaltReason::Handled)
                }
            },
            Some(ClientMessage::Close(subscription_id)) => {
                ctx.state.subscriptions.remove(&subscription_id);
                StageOutcome::Continue
            }
            Some(ClientMessage::Auth(event)) => {
                if event.kind != 22242 {
                    ctx.frames.push(RelayMessage::ok(
                        event.id.clone(),
                        false,
                        HaltReason::InvalidAuthKind.notice_text(),
                    ));
                    return StageOutcome::Halt(HaltReason::Handled);
                }
                let challenge_ok = event
                    .tags
                    .iter()
                    .find(|t| t.kind() == Some("challenge"))
                    .and_then(|t| t.data())
                    == Some(ctx.state.challenge.as_str());
                if !challenge_ok {
                    ctx.frames.push(RelayMessage::ok(
                        event.id.clone(),
                        false,
                        HaltReason::ChallengeMismatch.notice_text(),
                    ));
                    return StageOutcome::Halt(HaltReason::Handled);
                }
                let relay_ok = event
                    .tags
                    .iter()
                    .find(|t| t.kind() == Some("relay"))
                    .and_then(|t| t.data())
                    .is_some_and(|url| url.trim_end_matches('/') == services.config.relay_url.trim_end_matches('/'));
                if !relay_ok {
                    ctx.frames.push(RelayMessage::ok(
                        event.id.clone(),
                        false,
                        HaltReason::RelayTagMismatch.notice_text(),
                    ));
                    return StageOutcome::Halt(HaltReason::Handled);
                }
                ctx.state.record_auth(event.pubkey.clone());
                ctx.frames.push(RelayMessage::ok(event.id.clone(), true, ""));
                StageOutcome::Continue
            }
            // NIP-77 negentropy reconciliation is stateful across NEG-OPEN/MSG/CLOSE
            // and is wired at the socket layer (session map keyed by subscription
            // id), not the stage pipeline; nothing to do here.
            Some(ClientMessage::NegOpen { .. })
            | Some(ClientMessage::NegMsg { .. })
            | Some(ClientMessage::NegClose { .. }) => StageOutcome::Continue,
            None => StageOutcome::Continue,
        }
    }
}
