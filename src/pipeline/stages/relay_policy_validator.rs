//! Stage 5: content length, tag count, protected-event gating, proof-of-work
//! difficulty, and filter prefix-minimum length (SPEC_FULL §4.4/§4.8).
//! Deletion author/target rules are enforced atomically inside the store
//! (§4.7), not here, since they must be checked in the same transaction as
//! the insert.

use async_trait::async_trait;

use crate::codec::{ClientMessage, RelayMessage};
use crate::error::HaltReason;
use crate::pipeline::{Context, Services, Stage, StageOutcome};

pub struct RelayPolicyValidator;

/// Number of leading zero bits in `id`'s binary representation, the
/// proof-of-work measure defined by NIP-13.
fn leading_zero_bits(id_hex: &str) -> u32 {
    let mut bits = 0;
    for c in id_hex.chars() {
        let nibble = c.to_digit(16).unwrap_or(0);
        if nibble == 0 {
            bits += 4;
            continue;
        }
        bits += nibble.leading_zeros() - 28;
        break;
    }
    bits
}

#[async_trait]
impl Stage for RelayPolicyValidator {
    async fn run(&self, ctx: &mut Context<'_>, services: &Services) -> StageOutcome {
        let limitation = &services.config.relay_info.limitation;

        match &ctx.parsed {
            Some(ClientMessage::Event(event)) => {
                if event.content.len() > limitation.max_content_length {
                    ctx.frames.push(RelayMessage::ok(
                        event.id.clone(),
                        false,
                        HaltReason::MaxContentLengthExceeded.notice_text(),
                    ));
                    return StageOutcome::Halt(HaltReason::Handled);
                }
                if event.tags.len() > limitation.max_event_tags {
                    ctx.frames.push(RelayMessage::ok(
                        event.id.clone(),
                        false,
                        "restricted: too many tags",
                    ));
                    return StageOutcome::Halt(HaltReason::Handled);
                }
                if limitation.min_pow_difficulty > 0
                    && leading_zero_bits(&event.id) < limitation.min_pow_difficulty
                {
                    ctx.frames.push(RelayMessage::ok(
                        event.id.clone(),
                        false,
                        "pow: insufficient proof of work difficulty",
                    ));
                    return StageOutcome::Halt(HaltReason::Handled);
                }
                if event.is_protected() && !ctx.state.is_authenticated_as(&event.pubkey) {
                    ctx.frames.push(RelayMessage::ok(
                        event.id.clone(),
                        false,
                        HaltReason::ProtectedEvent.notice_text(),
                    ));
                    return StageOutcome::Halt(HaltReason::Handled);
                }
                StageOutcome::Continue
            }
            Some(ClientMessage::Req { subscription_id, filters })
            | Some(ClientMessage::Count { subscription_id, filters }) => {
                let min_prefix = services.config.relay_policy.min_prefix_length;
                let too_short = filters.iter().any(|f| {
                    f.ids
                        .as_ref()
                        .is_some_and(|ids| ids.iter().any(|id| id.len() < min_prefix))
                        || f.authors
                            .as_ref()
                            .is_some_and(|a| a.iter().any(|p| p.len() < min_prefix))
                });
                if too_short {
                    ctx.frames.push(RelayMessage::closed(
                        subscription_id.clone(),
                        HaltReason::FilterPrefixTooShort.notice_text(),
                    ));
                    return StageOutcome::Halt(HaltReason::Handled);
                }
                StageOutcome::Continue
            }
            _ => StageOutcome::Continue,
        }
    }
}
