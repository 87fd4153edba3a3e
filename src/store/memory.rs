//! In-memory [`super::Store`] fake used by unit and integration tests, so
//! the pipeline and socket layers can be exercised without a live Postgres.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::query;
use super::{InsertOutcome, Store};
use crate::error::StoreError;
use crate::event::{Event, KindClass};
use crate::filter::Filter;

#[derive(Default)]
struct Inner {
    events: HashMap<String, Event>,
    deleted_ids: HashSet<String>,
    deleted_addresses: HashSet<(u64, String, String)>,
    /// pubkey -> (is_admin, allowed). Mirrors the Postgres `users` table.
    users: HashMap<String, (bool, bool)>,
}

/// An in-memory store with the same deletion/replaceable semantics as
/// [`super::PgStore`], minus persistence and full-text search.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-only: grant `pubkey` the admin flag directly, mirroring how a
    /// real deployment provisions its first admin via a manual SQL row
    /// rather than through the NIP-86 surface itself.
    #[cfg(test)]
    pub fn grant_admin(&self, pubkey: &str) {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let entry = inner.users.entry(pubkey.to_string()).or_insert((false, false));
        entry.0 = true;
    }

    fn is_masked(inner: &Inner, event: &Event) -> bool {
        if inner.deleted_ids.contains(&event.id) {
            return true;
        }
        inner
            .deleted_addresses
            .contains(&(event.kind, event.pubkey.clone(), event.d_tag()))
    }

    fn replacement_winner<'a>(inner: &'a Inner, event: &Event) -> Option<&'a Event> {
        let key = event.replacement_key()?;
        inner
            .events
            .values()
            .filter(|candidate| candidate.replacement_key().as_ref() == Some(&key))
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| b.id.cmp(&a.id)) // reverse: lowest id should "win" the max on ties
            })
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_event(&self, event: &Event) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");

        if inner.events.contains_key(&event.id) {
            return Ok(InsertOutcome::Duplicate);
        }

        if event.kind == 5 {
            let k_tags = event.k_tag_kinds();

            for target_id in event.e_tag_targets() {
                if let Some(target) = inner.events.get(target_id) {
                    if target.pubkey != event.pubkey {
                        return Ok(InsertOutcome::DeletionRejected);
                    }
                }
            }
            for (kind, pubkey, _d) in event.a_tag_targets() {
                if pubkey != event.pubkey {
                    return Ok(InsertOutcome::DeletionRejected);
                }
                if !k_tags.is_empty() && !k_tags.contains(&kind) {
                    continue;
                }
            }

            for target_id in event.e_tag_targets() {
                inner.deleted_ids.insert(target_id.to_string());
            }
            for (kind, pubkey, d) in event.a_tag_targets() {
                if !k_tags.is_empty() && !k_tags.contains(&kind) {
                    continue;
                }
                inner.deleted_addresses.insert((kind, pubkey, d));
            }

            inner.events.insert(event.id.clone(), event.clone());
            return Ok(InsertOutcome::Accepted);
        }

        if Self::is_masked(&inner, event) {
            inner.events.insert(event.id.clone(), event.clone());
            return Ok(InsertOutcome::MaskedByDeletion);
        }

        if event.kind_class() == KindClass::Replaceable
            || event.kind_class() == KindClass::ParameterizedReplaceable
        {
            let stale = match Self::replacement_winner(&inner, event) {
                Some(current) => {
                    current.created_at > event.created_at
                        || (current.created_at == event.created_at && current.id < event.id)
                }
                None => false,
            };
            inner.events.insert(event.id.clone(), event.clone());
            return Ok(if stale {
                InsertOutcome::Stale
            } else {
                InsertOutcome::Accepted
            });
        }

        inner.events.insert(event.id.clone(), event.clone());
        Ok(InsertOutcome::Accepted)
    }

    async fn query_events(&self, filters: &[Filter]) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        let candidates: Vec<Event> = inner
            .events
            .values()
            .filter(|e| query::matches_any_with_search_policy(filters, e, self.supports_search()))
            .cloned()
            .collect();
        Ok(query::finish(filters, candidates, |e| {
            Self::is_masked(&inner, e)
        }))
    }

    async fn count_events(&self, filters: &[Filter]) -> Result<u64, StoreError> {
        Ok(self.query_events(filters).await?.len() as u64)
    }

    async fn event_matches_filters(
        &self,
        id: &str,
        filters: &[Filter],
    ) -> Result<bool, StoreError> {
        Ok(self
            .query_events(filters)
            .await?
            .iter()
            .any(|e| e.id == id))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        *inner = Inner::default();
        Ok(())
    }

    async fn is_admin(&self, pubkey: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        Ok(inner.users.get(pubkey).map(|(admin, _)| *admin).unwrap_or(false))
    }

    async fn list_allowed_users(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        Ok(inner
            .users
            .iter()
            .filter(|(_, (_, allowed))| *allowed)
            .map(|(pubkey, _)| pubkey.clone())
            .collect())
    }

    async fn allow_user(&self, pubkey: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let entry = inner.users.entry(pubkey.to_string()).or_insert((false, false));
        entry.1 = true;
        Ok(())
    }

    async fn ban_user(&self, pubkey: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let entry = inner.users.entry(pubkey.to_string()).or_insert((false, false));
        entry.1 = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;
    use secp256k1::{KeyPair, Message, Secp256k1};

    fn signed(kind: u64, created_at: i64, tags: Vec<Tag>, keypair: &KeyPair) -> Event {
        let secp = Secp256k1::new();
        let (xonly, _) = keypair.x_only_public_key();
        let pubkey = hex::encode(xonly.serialize());
        let mut event = Event {
            id: String::new(),
            pubkey,
            created_at,
            kind,
            tags,
            content: String::new(),
            sig: String::new(),
        };
        event.id = event.compute_hash();
        let msg = Message::from_slice(&hex::decode(&event.id).unwrap()).unwrap();
        let sig = secp.sign_schnorr(&msg, keypair);
        event.sig = hex::encode(sig.as_ref());
        event
    }

    fn keypair() -> KeyPair {
        let secp = Secp256k1::new();
        KeyPair::new(&secp, &mut rand::thread_rng())
    }

    #[tokio::test]
    async fn duplicate_insert_detected() {
        let store = MemoryStore::new();
        let kp = keypair();
        let e = signed(1, 100, vec![], &kp);
        assert_eq!(store.insert_event(&e).await.unwrap(), InsertOutcome::Accepted);
        assert_eq!(store.insert_event(&e).await.unwrap(), InsertOutcome::Duplicate);
    }

    #[tokio::test]
    async fn replaceable_collapse_via_query() {
        let store = MemoryStore::new();
        let kp = keypair();
        let older = signed(0, 100, vec![], &kp);
        let newer = signed(0, 200, vec![], &kp);
        assert_eq!(store.insert_event(&older).await.unwrap(), InsertOutcome::Accepted);
        assert_eq!(store.insert_event(&newer).await.unwrap(), InsertOutcome::Accepted);

        let results = store
            .query_events(&[Filter {
                kinds: Some(vec![0]),
                ..Default::default()
            }])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, newer.id);

        // older event is still retrievable by exact id (pure-id bypass).
        let by_id = store
            .query_events(&[Filter {
                ids: Some(vec![older.id.clone()]),
                ..Default::default()
            }])
            .await
            .unwrap();
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].id, older.id);
    }

    #[tokio::test]
    async fn stale_replacement_reported() {
        let store = MemoryStore::new();
        let kp = keypair();
        let newer = signed(0, 200, vec![], &kp);
        let older = signed(0, 100, vec![], &kp);
        store.insert_event(&newer).await.unwrap();
        assert_eq!(store.insert_event(&older).await.unwrap(), InsertOutcome::Stale);
    }

    #[tokio::test]
    async fn own_deletion_masks_event() {
        let store = MemoryStore::new();
        let kp = keypair();
        let target = signed(1, 100, vec![], &kp);
        store.insert_event(&target).await.unwrap();

        let deletion = signed(5, 101, vec![Tag::new(vec!["e".into(), target.id.clone()])], &kp);
        assert_eq!(store.insert_event(&deletion).await.unwrap(), InsertOutcome::Accepted);

        let results = store
            .query_events(&[Filter {
                kinds: Some(vec![1]),
                ..Default::default()
            }])
            .await
            .unwrap();
        assert!(results.is_empty());

        let by_id = store
            .query_events(&[Filter {
                ids: Some(vec![target.id.clone()]),
                ..Default::default()
            }])
            .await
            .unwrap();
        assert_eq!(by_id.len(), 1);
    }

    #[tokio::test]
    async fn cross_author_deletion_rejected() {
        let store = MemoryStore::new();
        let author_a = keypair();
        let author_b = keypair();
        let target = signed(1, 100, vec![], &author_a);
        store.insert_event(&target).await.unwrap();

        let deletion = signed(
            5,
            101,
            vec![Tag::new(vec!["e".into(), target.id.clone()])],
            &author_b,
        );
        assert_eq!(
            store.insert_event(&deletion).await.unwrap(),
            InsertOutcome::DeletionRejected
        );

        let results = store
            .query_events(&[Filter {
                kinds: Some(vec![1]),
                ..Default::default()
            }])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn masked_by_pre_existing_deletion_on_resubmit() {
        let store = MemoryStore::new();
        let kp = keypair();
        let target = signed(1, 100, vec![], &kp);

        let deletion = signed(5, 101, vec![Tag::new(vec!["e".into(), target.id.clone()])], &kp);
        store.insert_event(&deletion).await.unwrap();

        assert_eq!(
            store.insert_event(&target).await.unwrap(),
            InsertOutcome::MaskedByDeletion
        );
    }

    #[tokio::test]
    async fn allow_and_ban_user_tracks_allow_list() {
        let store = MemoryStore::new();
        assert!(store.list_allowed_users().await.unwrap().is_empty());
        store.allow_user("pub1").await.unwrap();
        assert_eq!(store.list_allowed_users().await.unwrap(), vec!["pub1".to_string()]);
        store.ban_user("pub1").await.unwrap();
        assert!(store.list_allowed_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ephemeral_never_returned_by_query() {
        let store = MemoryStore::new();
        let kp = keypair();
        let e = signed(20_000, 100, vec![], &kp);
        store.insert_event(&e).await.unwrap();
        let results = store.query_events(&[Filter::default()]).await.unwrap();
        assert!(results.is_empty());
    }
}
