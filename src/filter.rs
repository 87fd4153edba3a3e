//! Filter model: a query specification over stored events, and the pure
//! predicate used both for replay query post-filtering and live fan-out.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::{classify_kind, Event, KindClass};

/// A single filter clause. All present fields are ANDed; values within a
/// field are ORed. Absent fields are trivially true.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// `#e`, `#p`, `#d`, ... single-letter tag filters, keyed by the bare letter.
    #[serde(flatten)]
    pub tags: TagFilters,
}

/// Wraps the `#X` tag-filter fields so they (de)serialize as `"#e": [...]`
/// alongside the filter's other top-level fields.
#[derive(Debug, Clone, Default)]
pub struct TagFilters(pub HashMap<char, Vec<String>>);

impl Serialize for TagFilters {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (letter, values) in &self.0 {
            map.serialize_entry(&format!("#{letter}"), values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TagFilters {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw: HashMap<String, Vec<String>> = HashMap::deserialize(deserializer)?;
        let mut tags = HashMap::new();
        for (key, values) in raw {
            if let Some(rest) = key.strip_prefix('#') {
                let mut chars = rest.chars();
                if let (Some(letter), None) = (chars.next(), chars.next()) {
                    tags.insert(letter, values);
                }
            }
        }
        Ok(TagFilters(tags))
    }
}

/// Whether every entry in `candidates` is either a full 64-hex id/pubkey, or
/// a hex prefix of it, and `value` matches at least one by prefix/equality.
fn matches_hex_list(candidates: &[String], value: &str) -> bool {
    candidates.iter().any(|c| {
        if c.len() == 64 {
            c.eq_ignore_ascii_case(value)
        } else {
            value.len() >= c.len() && value[..c.len()].eq_ignore_ascii_case(c)
        }
    })
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no field is set: matches every non-ephemeral event.
    pub fn is_empty(&self) -> bool {
        self.ids.is_none()
            && self.authors.is_none()
            && self.kinds.is_none()
            && self.since.is_none()
            && self.until.is_none()
            && self.search.is_none()
            && self.tags.0.is_empty()
        // `limit` intentionally excluded: a bare `{"limit": N}` still matches
        // every event, it only caps how many are returned.
    }

    /// True when this filter is a pure-id lookup: only `ids` (and optionally
    /// `limit`) are set. Pure-id filters bypass replaceable collapse and
    /// deletion masking per SPEC_FULL §4.3/§4.7.
    pub fn is_pure_id_lookup(&self) -> bool {
        self.ids.is_some()
            && self.authors.is_none()
            && self.kinds.is_none()
            && self.since.is_none()
            && self.until.is_none()
            && self.search.is_none()
            && self.tags.0.is_empty()
    }

    /// Evaluate this filter against an event. Ephemeral events never match
    /// any filter (SPEC_FULL §3/§8 invariant 2) — callers that need to see
    /// ephemeral events (none do, in this core) must bypass `matches`.
    pub fn matches(&self, event: &Event) -> bool {
        if classify_kind(event.kind) == KindClass::Ephemeral {
            return false;
        }

        if let Some(ids) = &self.ids {
            if !matches_hex_list(ids, &event.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !matches_hex_list(authors, &event.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        for (letter, values) in &self.tags.0 {
            let letter_str = letter.to_string();
            let has_match = event.tags.iter().any(|tag| {
                tag.kind() == Some(letter_str.as_str())
                    && tag.data().map(|d| values.iter().any(|v| v == d)).unwrap_or(false)
            });
            if !has_match {
                return false;
            }
        }
        // `search` is a store-side concern (FTS); a bare in-memory predicate
        // cannot evaluate relevance, so live fan-out treats a filter with a
        // `search` clause as matching on its other clauses only. Stores that
        // lack FTS degrade `search` the same way (SPEC_FULL §9).
        true
    }
}

/// OR-combine a set of filters: an event matches the group if it matches any one filter.
pub fn any_matches(filters: &[Filter], event: &Event) -> bool {
    filters.iter().any(|f| f.matches(event))
}
