//! Staged pipeline engine: threads a [`Context`] through an ordered list of
//! [`Stage`]s, each returning continue/halt, grounded in the teacher's
//! `handle_client_message` dispatch generalized into the pack's
//! `WritePolicy`/`QueryPolicy` staged-async-trait shape (SPEC_FULL §4.4).

pub mod stages;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::codec::{ClientMessage, RelayMessage};
use crate::config::Config;
use crate::connection::ConnectionState;
use crate::error::HaltReason;
use crate::event::Event;
use crate::store::{InsertOutcome, Store};

/// Shared, read-mostly dependencies every stage may need: the store, the
/// relay's config, and the live fan-out channel.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    pub broadcast: broadcast::Sender<Event>,
}

/// Mutable state threaded through one pipeline run.
pub struct Context<'a> {
    pub raw_frame: &'a str,
    pub state: &'a mut ConnectionState,
    pub parsed: Option<ClientMessage>,
    pub frames: Vec<RelayMessage>,
    /// Set by `StorePolicy`, read by `MessageHandler`, to decide fan-out.
    pub store_outcome: Option<InsertOutcome>,
}

impl<'a> Context<'a> {
    pub fn new(raw_frame: &'a str, state: &'a mut ConnectionState) -> Self {
        Self {
            raw_frame,
            state,
            parsed: None,
            frames: Vec::new(),
            store_outcome: None,
        }
    }
}

/// What a stage decided after inspecting (and possibly mutating) the context.
pub enum StageOutcome {
    Continue,
    Halt(HaltReason),
}

/// One link in the pipeline. Stages that reject a message push their own
/// frames (an `OK false ...` or `CLOSED ...`) before returning `Halt`; a
/// stage that halts with no queued frames gets a generic `NOTICE` from the
/// engine (see [`Engine::run`]).
#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(&self, ctx: &mut Context<'_>, services: &Services) -> StageOutcome;
}

/// An ordered, configurable stage list plus the finalization logic that
/// turns the last `Halt` into an observable frame.
pub struct Engine {
    stages: Vec<Box<dyn Stage>>,
}

impl Engine {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// The seven default stages, in SPEC_FULL §4.4 order.
    pub fn default_stages() -> Vec<Box<dyn Stage>> {
        vec![
            Box::new(stages::ProtocolValidator),
            Box::new(stages::AuthEnforcer),
            Box::new(stages::MessageValidator),
            Box::new(stages::EventValidator),
            Box::new(stages::RelayPolicyValidator),
            Box::new(stages::StorePolicy),
            Box::new(stages::MessageHandler),
        ]
    }

    pub async fn run(
        &self,
        raw_frame: &str,
        state: &mut ConnectionState,
        services: &Services,
    ) -> Vec<RelayMessage> {
        let mut ctx = Context::new(raw_frame, state);
        for stage in &self.stages {
            match stage.run(&mut ctx, services).await {
                StageOutcome::Continue => continue,
                StageOutcome::Halt(reason) => {
                    if ctx.frames.is_empty() {
                        ctx.frames.push(RelayMessage::notice(reason.notice_text()));
                    }
                    return ctx.frames;
                }
            }
        }
        ctx.frames
    }
}
