//! Stage 6: hand `EVENT` payloads to the store's single transactional
//! insert (duplicate/deletion-masking/replaceable-staleness, SPEC_FULL §4.7),
//! and translate the resulting [`InsertOutcome`] into the `OK` frame.
//! `MessageHandler` reads `ctx.store_outcome` to decide whether to fan out.

use async_trait::async_trait;

use crate::codec::{ClientMessage, RelayMessage};
use crate::error::HaltReason;
use crate::pipeline::{Context, Services, Stage, StageOutcome};
use crate::store::InsertOutcome;

pub struct StorePolicy;

#[async_trait]
impl Stage for StorePolicy {
    async fn run(&self, ctx: &mut Context<'_>, services: &Services) -> StageOutcome {
        let event = match &ctx.parsed {
            Some(ClientMessage::Event(event)) => event.as_ref().clone(),
            _ => return StageOutcome::Continue,
        };

        match services.store.insert_event(&event).await {
            Ok(outcome) => {
                let frame = match &outcome {
                    InsertOutcome::Accepted => RelayMessage::ok(event.id.clone(), true, ""),
                    InsertOutcome::Duplicate => {
                        RelayMessage::ok(event.id.clone(), true, HaltReason::Duplicate.notice_text())
                    }
                    InsertOutcome::Stale => RelayMessage::ok(
                        event.id.clone(),
                        false,
                        HaltReason::StaleReplacement.notice_text(),
                    ),
                    InsertOutcome::MaskedByDeletion => RelayMessage::ok(
                        event.id.clone(),
                        false,
                        HaltReason::EventDeleted.notice_text(),
                    ),
                    InsertOutcome::DeletionRejected => RelayMessage::ok(
                        event.id.clone(),
                        false,
                        HaltReason::DeletionCrossAuthor.notice_text(),
                    ),
                };
                let accepted = outcome == InsertOutcome::Accepted;
                ctx.frames.push(frame);
                ctx.store_outcome = Some(outcome);
                if accepted {
                    StageOutcome::Continue
                } else {
                    StageOutcome::Halt(HaltReason::Handled)
                }
            }
            Err(_) => {
                ctx.frames.push(RelayMessage::ok(
                    event.id.clone(),
                    false,
                    HaltReason::StoreWriteFailed.notice_text(),
                ));
                StageOutcome::Halt(HaltReason::Handled)
            }
        }
    }
}
