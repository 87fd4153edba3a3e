//! End-to-end scenarios exercising the pipeline engine, the in-memory store,
//! and per-connection subscription matching together, the way a live
//! connection would see them (SPEC_FULL §8 testable properties).

use std::sync::Arc;

use relay_rs::config::{AuthConfig, Config, RelayInfoConfig, RelayPolicyConfig};
use relay_rs::connection::ConnectionState;
use relay_rs::pipeline::{Engine, Services};
use relay_rs::store::MemoryStore;

use secp256k1::{KeyPair, Message, Secp256k1};

fn services() -> Services {
    let (tx, _rx) = tokio::sync::broadcast::channel(100);
    Services {
        store: Arc::new(MemoryStore::new()),
        config: Arc::new(Config {
            database_url: "postgres://x".into(),
            bind_addr: "0.0.0.0:3001".parse().unwrap(),
            relay_url: "ws://0.0.0.0:3001/".into(),
            auth: AuthConfig {
                required: false,
                timeout_seconds: 30,
            },
            relay_info: RelayInfoConfig::default(),
            relay_policy: RelayPolicyConfig::default(),
        }),
        broadcast: tx,
    }
}

struct Signer {
    secp: Secp256k1<secp256k1::All>,
    keypair: KeyPair,
    pubkey: String,
}

impl Signer {
    fn new() -> Self {
        let secp = Secp256k1::new();
        let keypair = KeyPair::new(&secp, &mut rand::thread_rng());
        let (xonly, _) = keypair.x_only_public_key();
        Self {
            pubkey: hex::encode(xonly.serialize()),
            secp,
            keypair,
        }
    }

    fn event_json(&self, kind: u64, created_at: i64, content: &str, tags: Vec<Vec<&str>>) -> String {
        let tags: Vec<Vec<String>> = tags
            .into_iter()
            .map(|t| t.into_iter().map(String::from).collect())
            .collect();
        let mut event = relay_rs::event::Event {
            id: String::new(),
            pubkey: self.pubkey.clone(),
            created_at,
            kind,
            tags: tags.into_iter().map(relay_rs::event::Tag::new).collect(),
            content: content.to_string(),
            sig: String::new(),
        };
        event.id = event.compute_hash();
        let msg = Message::from_slice(&hex::decode(&event.id).unwrap()).unwrap();
        let sig = self.secp.sign_schnorr(&msg, &self.keypair);
        event.sig = hex::encode(sig.as_ref());
        format!(r#"["EVENT",{}]"#, serde_json::to_string(&event).unwrap())
    }
}

fn now() -> i64 {
    1_700_000_000
}

/// Pull the `id` field back out of an `["EVENT", {...}]` frame produced by
/// [`Signer::event_json`], for use as an `e` tag target in a later frame.
fn event_id(raw_frame: &str) -> String {
    let arr: serde_json::Value = serde_json::from_str(raw_frame).unwrap();
    arr[1]["id"].as_str().unwrap().to_string()
}

/// S1: a freshly submitted, well-formed event is accepted and echoed once.
#[tokio::test]
async fn basic_event_is_accepted() {
    let engine = Engine::new(Engine::default_stages());
    let svc = services();
    let mut state = ConnectionState::new("chal".into(), false);
    let signer = Signer::new();

    let frames = engine
        .run(&signer.event_json(1, now(), "hello world", vec![]), &mut state, &svc)
        .await;

    assert_eq!(frames.len(), 1);
    match &frames[0] {
        relay_rs::codec::RelayMessage::Ok { accepted, .. } => assert!(*accepted),
        other => panic!("unexpected frame: {other:?}"),
    }
}

/// S2: a REQ replays stored events before EOSE, and the subscription stays
/// registered afterward for live fan-out.
#[tokio::test]
async fn req_replays_then_eoses_and_registers_subscription() {
    let engine = Engine::new(Engine::default_stages());
    let svc = services();
    let mut state = ConnectionState::new("chal".into(), false);
    let signer = Signer::new();

    let _ = engine
        .run(&signer.event_json(1, now(), "first", vec![]), &mut state, &svc)
        .await;

    let frames = engine
        .run(
            &format!(r#"["REQ","sub1",{{"kinds":[1]}}]"#),
            &mut state,
            &svc,
        )
        .await;

    assert_eq!(frames.len(), 2, "expected one EVENT replay then EOSE");
    assert!(matches!(frames[0], relay_rs::codec::RelayMessage::Event { .. }));
    assert!(matches!(frames[1], relay_rs::codec::RelayMessage::Eose { .. }));
    assert!(state.subscriptions.contains("sub1"));
}

/// S3: replaceable kinds collapse to the newest `created_at` per pubkey+kind.
#[tokio::test]
async fn replaceable_kind_collapses_to_newest() {
    let engine = Engine::new(Engine::default_stages());
    let svc = services();
    let mut state = ConnectionState::new("chal".into(), false);
    let signer = Signer::new();

    let _ = engine
        .run(&signer.event_json(0, now(), "old metadata", vec![]), &mut state, &svc)
        .await;
    let _ = engine
        .run(&signer.event_json(0, now() + 10, "new metadata", vec![]), &mut state, &svc)
        .await;

    let frames = engine
        .run(r#"["REQ","sub-meta",{"kinds":[0]}]"#, &mut state, &svc)
        .await;

    let events: Vec<&relay_rs::event::Event> = frames
        .iter()
        .filter_map(|f| match f {
            relay_rs::codec::RelayMessage::Event { event, .. } => Some(event.as_ref()),
            _ => None,
        })
        .collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].content, "new metadata");
}

/// S4: parameterized-replaceable kinds collapse per (pubkey, kind, d-tag),
/// leaving distinct d-tags independent of one another.
#[tokio::test]
async fn parameterized_replaceable_collapses_per_d_tag() {
    let engine = Engine::new(Engine::default_stages());
    let svc = services();
    let mut state = ConnectionState::new("chal".into(), false);
    let signer = Signer::new();

    let _ = engine
        .run(
            &signer.event_json(30_000, now(), "list-a v1", vec![vec!["d", "a"]]),
            &mut state,
            &svc,
        )
        .await;
    let _ = engine
        .run(
            &signer.event_json(30_000, now() + 5, "list-a v2", vec![vec!["d", "a"]]),
            &mut state,
            &svc,
        )
        .await;
    let _ = engine
        .run(
            &signer.event_json(30_000, now(), "list-b v1", vec![vec!["d", "b"]]),
            &mut state,
            &svc,
        )
        .await;

    let frames = engine
        .run(r#"["REQ","sub-lists",{"kinds":[30000]}]"#, &mut state, &svc)
        .await;
    let mut contents: Vec<&str> = frames
        .iter()
        .filter_map(|f| match f {
            relay_rs::codec::RelayMessage::Event { event, .. } => Some(event.content.as_str()),
            _ => None,
        })
        .collect();
    contents.sort_unstable();
    assert_eq!(contents, vec!["list-a v2", "list-b v1"]);
}

/// S5: a deletion event from a different pubkey than the target is rejected,
/// and the original event remains queryable.
#[tokio::test]
async fn cross_author_deletion_is_rejected() {
    let engine = Engine::new(Engine::default_stages());
    let svc = services();
    let mut state = ConnectionState::new("chal".into(), false);
    let author = Signer::new();
    let attacker = Signer::new();

    let raw = author.event_json(1, now(), "mine", vec![]);
    let _ = engine.run(&raw, &mut state, &svc).await;
    let target_id = event_id(&raw);

    let deletion = attacker.event_json(5, now() + 1, "", vec![vec!["e", &target_id]]);
    let frames = engine.run(&deletion, &mut state, &svc).await;
    match &frames[0] {
        relay_rs::codec::RelayMessage::Ok { accepted, .. } => assert!(!*accepted),
        other => panic!("unexpected frame: {other:?}"),
    }

    let replay = engine
        .run(r#"["REQ","sub-check",{"kinds":[1]}]"#, &mut state, &svc)
        .await;
    assert!(replay
        .iter()
        .any(|f| matches!(f, relay_rs::codec::RelayMessage::Event { .. })));
}

/// S6: a deletion from the event's own author masks it from future replay.
#[tokio::test]
async fn own_author_deletion_masks_event() {
    let engine = Engine::new(Engine::default_stages());
    let svc = services();
    let mut state = ConnectionState::new("chal".into(), false);
    let author = Signer::new();

    let raw = author.event_json(1, now(), "temporary", vec![]);
    let _ = engine.run(&raw, &mut state, &svc).await;
    let target_id = event_id(&raw);

    let deletion = author.event_json(5, now() + 1, "", vec![vec!["e", &target_id]]);
    let frames = engine.run(&deletion, &mut state, &svc).await;
    match &frames[0] {
        relay_rs::codec::RelayMessage::Ok { accepted, .. } => assert!(*accepted),
        other => panic!("unexpected frame: {other:?}"),
    }

    let replay = engine
        .run(r#"["REQ","sub-check",{"kinds":[1]}]"#, &mut state, &svc)
        .await;
    assert!(!replay
        .iter()
        .any(|f| matches!(f, relay_rs::codec::RelayMessage::Event { .. })));
}

/// S7: two connections subscribed to overlapping filters each see a live
/// event fan out independently through `SubscriptionTable::matching`.
#[tokio::test]
async fn live_event_fans_out_to_matching_subscriptions_only() {
    let svc = services();
    let signer = Signer::new();

    let mut conn_a = ConnectionState::new("chal-a".into(), false);
    conn_a.subscriptions.insert(
        "wants-kind1".into(),
        vec![relay_rs::filter::Filter {
            kinds: Some(vec![1]),
            ..Default::default()
        }],
    );
    let mut conn_b = ConnectionState::new("chal-b".into(), false);
    conn_b.subscriptions.insert(
        "wants-kind2".into(),
        vec![relay_rs::filter::Filter {
            kinds: Some(vec![2]),
            ..Default::default()
        }],
    );

    let event: relay_rs::event::Event =
        serde_json::from_value(serde_json::from_str::<serde_json::Value>(
            &signer.event_json(1, now(), "broadcast me", vec![]),
        )
        .unwrap()[1]
            .clone())
        .unwrap();

    assert_eq!(conn_a.subscriptions.matching(&event).count(), 1);
    assert_eq!(conn_b.subscriptions.matching(&event).count(), 0);
}

/// S8: a protected event is rejected unless the submitter authenticated as
/// its own pubkey first.
#[tokio::test]
async fn protected_event_requires_matching_auth() {
    let engine = Engine::new(Engine::default_stages());
    let svc = services();
    let mut state = ConnectionState::new("chal".into(), false);
    let signer = Signer::new();

    let protected = signer.event_json(1, now(), "secret", vec![vec!["-"]]);
    let frames = engine.run(&protected, &mut state, &svc).await;
    match &frames[0] {
        relay_rs::codec::RelayMessage::Ok { accepted, .. } => assert!(!*accepted),
        other => panic!("unexpected frame: {other:?}"),
    }

    state.record_auth(signer.pubkey.clone());
    let frames = engine.run(&protected, &mut state, &svc).await;
    match &frames[0] {
        relay_rs::codec::RelayMessage::Ok { accepted, .. } => assert!(*accepted),
        other => panic!("unexpected frame: {other:?}"),
    }
}

