//! Per-connection subscription book-keeping. Live fan-out is decentralized:
//! each connection holds its own table and matches incoming events against
//! it directly, rather than a server-wide matcher (SPEC_FULL §4.6).

use std::collections::HashMap;

use crate::filter::{any_matches, Filter};

/// A client-chosen subscription identifier (opaque to the relay beyond a
/// max-length check enforced in the pipeline).
pub type SubscriptionId = String;

/// One connection's open subscriptions: `sub_id -> filters`.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    subscriptions: HashMap<SubscriptionId, Vec<Filter>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace (same `sub_id` from the same connection silently
    /// replaces the prior filter set, per SPEC_FULL §3 Subscription lifecycle).
    pub fn insert(&mut self, sub_id: SubscriptionId, filters: Vec<Filter>) {
        self.subscriptions.insert(sub_id, filters);
    }

    pub fn remove(&mut self, sub_id: &str) -> bool {
        self.subscriptions.remove(sub_id).is_some()
    }

    pub fn filters_for(&self, sub_id: &str) -> Option<&[Filter]> {
        self.subscriptions.get(sub_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn contains(&self, sub_id: &str) -> bool {
        self.subscriptions.contains_key(sub_id)
    }

    /// Every `(sub_id, filters)` pair whose filters match `event`, for live
    /// fan-out dispatch. A single event may match several subscriptions.
    pub fn matching<'a>(
        &'a self,
        event: &'a crate::event::Event,
    ) -> impl Iterator<Item = &'a SubscriptionId> + 'a {
        self.subscriptions
            .iter()
            .filter(move |(_, filters)| any_matches(filters, event))
            .map(|(sub_id, _)| sub_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn event(kind: u64) -> Event {
        Event {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            created_at: 100,
            kind,
            tags: vec![],
            content: String::new(),
            sig: "0".repeat(128),
        }
    }

    #[test]
    fn replacing_same_sub_id_overwrites_filters() {
        let mut table = SubscriptionTable::new();
        table.insert("s1".into(), vec![Filter {
            kinds: Some(vec![1]),
            ..Default::default()
        }]);
        table.insert("s1".into(), vec![Filter {
            kinds: Some(vec![2]),
            ..Default::default()
        }]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.filters_for("s1").unwrap()[0].kinds, Some(vec![2]));
    }

    #[test]
    fn matching_finds_subscriptions_with_satisfied_filters() {
        let mut table = SubscriptionTable::new();
        table.insert("s1".into(), vec![Filter {
            kinds: Some(vec![1]),
            ..Default::default()
        }]);
        table.insert("s2".into(), vec![Filter {
            kinds: Some(vec![2]),
            ..Default::default()
        }]);
        let e = event(1);
        let matched: Vec<&String> = table.matching(&e).collect();
        assert_eq!(matched, vec![&"s1".to_string()]);
    }

    #[test]
    fn remove_drops_subscription() {
        let mut table = SubscriptionTable::new();
        table.insert("s1".into(), vec![Filter::default()]);
        assert!(table.remove("s1"));
        assert!(!table.contains("s1"));
        assert!(!table.remove("s1"));
    }
}
