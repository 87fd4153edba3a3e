//! Event identity, canonical serialization, and signature verification.
//!
//! <https://github.com/nostr-protocol/nips/blob/master/01.md>

use secp256k1::schnorr::Signature;
use secp256k1::{Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A single tag: `type` token, optional `data`, and any trailing `info`.
///
/// Stored as the raw array so we never lose extra elements a NIP might add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(pub Vec<String>);

impl Tag {
    pub fn new(values: Vec<String>) -> Self {
        Self(values)
    }

    /// First element: the tag's type token (e.g. `"e"`, `"p"`, `"d"`).
    pub fn kind(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Second element: the tag's primary data value.
    pub fn data(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    /// Remaining elements after `type` and `data`.
    pub fn info(&self) -> &[String] {
        if self.0.len() > 2 {
            &self.0[2..]
        } else {
            &[]
        }
    }

    pub fn as_vec(&self) -> &[String] {
        &self.0
    }

    /// True for a bare `["-"]` protected-event marker tag.
    pub fn is_protected_marker(&self) -> bool {
        self.0.len() == 1 && self.0[0] == "-"
    }
}

/// Which replacement regime a kind falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClass {
    Regular,
    Replaceable,
    Ephemeral,
    ParameterizedReplaceable,
}

/// Classify a kind per SPEC_FULL §3.
pub fn classify_kind(kind: u64) -> KindClass {
    match kind {
        0 | 3 => KindClass::Replaceable,
        10_000..=19_999 => KindClass::Replaceable,
        20_000..=29_999 => KindClass::Ephemeral,
        30_000..=39_999 => KindClass::ParameterizedReplaceable,
        _ => KindClass::Regular,
    }
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u64,
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig: String,
}

/// Errors arising from event identity/signature checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("id is not valid hex")]
    InvalidIdHex,
    #[error("pubkey is not valid hex")]
    InvalidPubkeyHex,
    #[error("signature is not valid hex")]
    InvalidSigHex,
    #[error("recomputed hash does not match id")]
    HashMismatch,
    #[error("signature verification failed")]
    BadSignature,
}

impl Event {
    /// Kind class, per SPEC_FULL §3.
    pub fn kind_class(&self) -> KindClass {
        classify_kind(self.kind)
    }

    /// The exact byte sequence hashed to produce `id`: compact JSON of
    /// `[0, pubkey, created_at, kind, tags, content]`.
    pub fn canonical(&self) -> Vec<u8> {
        let value = Value::Array(vec![
            Value::from(0),
            Value::String(self.pubkey.clone()),
            Value::from(self.created_at),
            Value::from(self.kind),
            serde_json::to_value(&self.tags).unwrap_or(Value::Array(vec![])),
            Value::String(self.content.clone()),
        ]);
        // serde_json's default Value serialization is already compact (no
        // extraneous whitespace), which is what the id hash requires.
        serde_json::to_vec(&value).expect("canonical value is always serializable")
    }

    /// SHA-256 of [`Event::canonical`], lowercase hex.
    pub fn compute_hash(&self) -> String {
        let digest = Sha256::digest(self.canonical());
        hex::encode(digest)
    }

    /// `hash(e) == e.id`.
    pub fn hash_matches(&self) -> bool {
        self.compute_hash() == self.id
    }

    /// Verify `sig` against `pubkey` and `id` using BIP-340 Schnorr.
    pub fn verify_signature(&self) -> Result<(), EventError> {
        let id_bytes = hex::decode(&self.id).map_err(|_| EventError::InvalidIdHex)?;
        let pubkey_bytes = hex::decode(&self.pubkey).map_err(|_| EventError::InvalidPubkeyHex)?;
        let sig_bytes = hex::decode(&self.sig).map_err(|_| EventError::InvalidSigHex)?;

        let msg = Message::from_slice(&id_bytes).map_err(|_| EventError::InvalidIdHex)?;
        let pubkey =
            XOnlyPublicKey::from_slice(&pubkey_bytes).map_err(|_| EventError::InvalidPubkeyHex)?;
        let sig = Signature::from_slice(&sig_bytes).map_err(|_| EventError::InvalidSigHex)?;

        let secp = Secp256k1::verification_only();
        secp.verify_schnorr(&sig, &msg, &pubkey)
            .map_err(|_| EventError::BadSignature)
    }

    /// Full validity check: recomputed hash matches `id`, and the signature verifies.
    pub fn validate(&self) -> Result<(), EventError> {
        if !self.hash_matches() {
            return Err(EventError::HashMismatch);
        }
        self.verify_signature()
    }

    /// The value of the first `d` tag, or empty string if absent. Used as the
    /// addressable-event discriminator for parameterized-replaceable kinds.
    pub fn d_tag(&self) -> String {
        self.tags
            .iter()
            .find(|t| t.kind() == Some("d"))
            .and_then(|t| t.data())
            .unwrap_or("")
            .to_string()
    }

    /// True when this event carries a bare `["-"]` protected marker tag.
    pub fn is_protected(&self) -> bool {
        self.tags.iter().any(Tag::is_protected_marker)
    }

    /// Replacement key for replaceable/parameterized-replaceable collapse.
    /// `None` for regular/ephemeral events (they are never collapsed).
    pub fn replacement_key(&self) -> Option<ReplacementKey> {
        match self.kind_class() {
            KindClass::Replaceable => Some(ReplacementKey::Replaceable {
                pubkey: self.pubkey.clone(),
                kind: self.kind,
            }),
            KindClass::ParameterizedReplaceable => Some(ReplacementKey::Parameterized {
                pubkey: self.pubkey.clone(),
                kind: self.kind,
                d: self.d_tag(),
            }),
            KindClass::Regular | KindClass::Ephemeral => None,
        }
    }

    /// Iterate over `(tag_name, tag_value)` pairs for every tag with at
    /// least one element past the type token — used to populate the
    /// `event_tags` index table.
    pub fn tag_index_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags
            .iter()
            .filter_map(|t| Some((t.kind()?, t.data()?)))
    }

    /// `e`-tag target ids cited by this event (used for NIP-09 deletion).
    pub fn e_tag_targets(&self) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|t| t.kind() == Some("e"))
            .filter_map(Tag::data)
            .collect()
    }

    /// `a`-tag addresses cited by this event, parsed as `(kind, pubkey, d_tag)`.
    pub fn a_tag_targets(&self) -> Vec<(u64, String, String)> {
        self.tags
            .iter()
            .filter(|t| t.kind() == Some("a"))
            .filter_map(Tag::data)
            .filter_map(|addr| {
                let mut parts = addr.splitn(3, ':');
                let kind: u64 = parts.next()?.parse().ok()?;
                let pubkey = parts.next()?.to_string();
                let d = parts.next().unwrap_or("").to_string();
                Some((kind, pubkey, d))
            })
            .collect()
    }

    /// `k`-tag kind restrictions on a deletion event.
    pub fn k_tag_kinds(&self) -> Vec<u64> {
        self.tags
            .iter()
            .filter(|t| t.kind() == Some("k"))
            .filter_map(Tag::data)
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}

/// A collapse key grouping replaceable/parameterized-replaceable events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReplacementKey {
    Replaceable { pubkey: String, kind: u64 },
    Parameterized { pubkey: String, kind: u64, d: String },
}
