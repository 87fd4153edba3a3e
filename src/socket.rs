//! Connection lifecycle: AUTH challenge, heartbeat, the inbound/outbound
//! `tokio::select!` loop, and NIP-77 negentropy session bookkeeping —
//! grounded in the teacher's `handle_socket`/`handle_nip77_*` (SPEC_FULL §4.5/§4.6).

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use negentropy::{Bytes, Negentropy};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::ConnectionState;
use crate::event::Event;
use crate::filter::Filter;
use crate::pipeline::{Engine, Services};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const OUTBOUND_BUFFER: usize = 100;

/// Own the lifecycle of one WebSocket connection end to end.
pub async fn handle_socket(socket: WebSocket, services: Services, engine: &Engine) {
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = services.broadcast.subscribe();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let heartbeat_tx = outbound_tx.clone();
    let mut heartbeat_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            if heartbeat_tx.send(Message::Ping(vec![])).await.is_err() {
                break;
            }
        }
    });

    let challenge = nanoid::nanoid!();
    let mut state = ConnectionState::new(challenge.clone(), services.config.auth.required);
    let auth_frame = crate::codec::RelayMessage::auth(challenge).as_json();
    let _ = outbound_tx.send(Message::Text(auth_frame)).await;

    let mut negentropy_sessions: HashMap<String, Negentropy> = HashMap::new();

    // NIP-42: an `auth_required` connection that hasn't authenticated by this
    // deadline is force-closed (SPEC_FULL §4.5/§5/§7).
    let auth_deadline = tokio::time::sleep(Duration::from_secs(services.config.auth.timeout_seconds));
    tokio::pin!(auth_deadline);

    loop {
        tokio::select! {
            () = &mut auth_deadline, if services.config.auth.required && !state.is_authenticated() => {
                warn!("closing connection: authentication timeout");
                let close = Message::Close(Some(CloseFrame {
                    code: 4000,
                    reason: "auth-required: authentication timeout".into(),
                }));
                let _ = outbound_tx.send(close).await;
                break;
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        state.messages += 1;
                        if let Some(reply) = route_text_frame(&text, &mut state, &services, engine, &mut negentropy_sessions).await {
                            for frame in reply {
                                if outbound_tx.send(Message::Text(frame)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        warn!("websocket error: {err}");
                        break;
                    }
                    _ => {}
                }
            }
            Ok(event) = broadcast_rx.recv() => {
                dispatch_live_event(&event, &state, &outbound_tx).await;
            }
        }
    }

    send_task.abort();
    heartbeat_task.abort();
}

/// Route one inbound text frame to either the negentropy session handler or
/// the pipeline engine, returning the frames to emit.
async fn route_text_frame(
    text: &str,
    state: &mut ConnectionState,
    services: &Services,
    engine: &Engine,
    negentropy_sessions: &mut HashMap<String, Negentropy>,
) -> Option<Vec<String>> {
    let parsed = serde_json::from_str::<serde_json::Value>(text).ok();

    // NIP-86 relay management requests arrive as a bare JSON-RPC object,
    // never the `["TYPE", ...]` envelope the rest of the protocol uses.
    if let Some(request) = parsed.as_ref().filter(|v| v.is_object()) {
        let caller = state.authenticated_pubkeys.iter().next().map(String::as_str);
        let response = crate::admin::handle_rpc(request, services.store.as_ref(), caller).await;
        return Some(vec![response.to_string()]);
    }

    let first_token = parsed
        .and_then(|v| v.as_array().and_then(|a| a.first().cloned()))
        .and_then(|t| t.as_str().map(str::to_string));

    match first_token.as_deref() {
        Some("NEG-OPEN") => handle_neg_open(text, services, negentropy_sessions).await,
        Some("NEG-MSG") => handle_neg_msg(text, negentropy_sessions),
        Some("NEG-CLOSE") => {
            handle_neg_close(text, negentropy_sessions);
            None
        }
        _ => {
            let frames = engine.run(text, state, services).await;
            Some(frames.iter().map(|f| f.as_json()).collect())
        }
    }
}

async fn dispatch_live_event(
    event: &Event,
    state: &ConnectionState,
    outbound_tx: &mpsc::Sender<Message>,
) {
    let matches: Vec<String> = state
        .subscriptions
        .matching(event)
        .cloned()
        .collect();
    for sub_id in matches {
        debug!("dispatching event {} to subscription {sub_id}", event.id);
        let frame = crate::codec::RelayMessage::event(sub_id, event.clone()).as_json();
        if outbound_tx.send(Message::Text(frame)).await.is_err() {
            break;
        }
    }
}

async fn handle_neg_open(
    text: &str,
    services: &Services,
    sessions: &mut HashMap<String, Negentropy>,
) -> Option<Vec<String>> {
    let arr: Vec<serde_json::Value> = serde_json::from_str(text).ok()?;
    if arr.len() < 5 {
        return None;
    }
    let sub_id = arr[1].as_str()?.to_string();
    let filter: Filter = serde_json::from_value(arr[2].clone()).ok()?;
    let initial_message_hex = arr[4].as_str()?;

    let candidates = services.store.query_events(&[filter]).await.ok()?;
    let mut neg = Negentropy::new(32, Some(100_000)).ok()?;
    for event in &candidates {
        if let Ok(bytes) = hex::decode(&event.id) {
            let _ = neg.add_item(0, Bytes::from_slice(&bytes));
        }
    }
    let _ = neg.seal();

    let query_bytes = hex::decode(initial_message_hex).ok()?;
    let response = neg.reconcile(&Bytes::from_slice(&query_bytes)).ok()?;
    sessions.insert(sub_id.clone(), neg);
    Some(vec![serde_json::json!(["NEG-MSG", sub_id, response.to_hex()]).to_string()])
}

fn handle_neg_msg(text: &str, sessions: &mut HashMap<String, Negentropy>) -> Option<Vec<String>> {
    let arr: Vec<serde_json::Value> = serde_json::from_str(text).ok()?;
    if arr.len() < 3 {
        return None;
    }
    let sub_id = arr[1].as_str()?.to_string();
    let msg_hex = arr[2].as_str()?;
    let neg = sessions.get_mut(&sub_id)?;
    let bytes = hex::decode(msg_hex).ok()?;
    let response = neg.reconcile(&Bytes::from_slice(&bytes)).ok()?;
    Some(vec![serde_json::json!(["NEG-MSG", sub_id, response.to_hex()]).to_string()])
}

fn handle_neg_close(text: &str, sessions: &mut HashMap<String, Negentropy>) {
    if let Ok(arr) = serde_json::from_str::<Vec<serde_json::Value>>(text) {
        if let Some(sub_id) = arr.get(1).and_then(|v| v.as_str()) {
            sessions.remove(sub_id);
        }
    }
}
