//! Per-socket mutable state: message counter, subscriptions, authenticated
//! pubkeys, and the outstanding NIP-42 challenge (SPEC_FULL §3 ConnectionState).

use std::collections::HashSet;

use crate::subscription::SubscriptionTable;

/// State owned by a single connection's task; never shared across tasks.
#[derive(Debug)]
pub struct ConnectionState {
    pub messages: u64,
    pub subscriptions: SubscriptionTable,
    pub authenticated_pubkeys: HashSet<String>,
    pub challenge: String,
    pub auth_required: bool,
}

impl ConnectionState {
    pub fn new(challenge: String, auth_required: bool) -> Self {
        Self {
            messages: 0,
            subscriptions: SubscriptionTable::new(),
            authenticated_pubkeys: HashSet::new(),
            challenge,
            auth_required,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.authenticated_pubkeys.is_empty()
    }

    pub fn is_authenticated_as(&self, pubkey: &str) -> bool {
        self.authenticated_pubkeys.contains(pubkey)
    }

    pub fn record_auth(&mut self, pubkey: String) {
        self.authenticated_pubkeys.insert(pubkey);
    }
}
