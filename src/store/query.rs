//! Pure post-processing shared by every [`super::Store`] implementation:
//! multi-filter dedup, replaceable collapse, deletion masking, ordering,
//! and the global-limit rule. SQL-backed stores narrow the candidate set
//! with indexed `WHERE` clauses first; this module applies the semantics
//! that are awkward to express portably in SQL (lexicographic id tie-break,
//! "pure-id lookup skips collapse").

use std::collections::HashMap;

use crate::event::Event;
use crate::filter::Filter;

/// OR-match `event` against `filters`, but treat any filter carrying a
/// `search` clause as unsatisfiable when the store has no FTS capability
/// (SPEC_FULL §4.3: "search filters degrade to empty result sets").
pub fn matches_any_with_search_policy(filters: &[Filter], event: &Event, supports_search: bool) -> bool {
    filters.iter().any(|f| {
        if f.search.is_some() && !supports_search {
            return false;
        }
        f.matches(event)
    })
}

/// Remove duplicate ids, keeping the first occurrence.
pub fn dedup_by_id(events: Vec<Event>) -> Vec<Event> {
    let mut seen = std::collections::HashSet::new();
    events
        .into_iter()
        .filter(|e| seen.insert(e.id.clone()))
        .collect()
}

/// Group by replacement key and keep only the winner in each group
/// (highest `created_at`, ties broken by lowest lexicographic `id`).
/// Events with no replacement key (regular, ephemeral) pass through untouched.
pub fn collapse_replaceable(events: Vec<Event>) -> Vec<Event> {
    let mut singles = Vec::new();
    let mut groups: HashMap<String, Event> = HashMap::new();

    for event in events {
        match event.replacement_key() {
            None => singles.push(event),
            Some(key) => {
                let key = format!("{key:?}");
                match groups.get(&key) {
                    Some(current) if !is_newer(&event, current) => {}
                    _ => {
                        groups.insert(key, event);
                    }
                }
            }
        }
    }

    singles.extend(groups.into_values());
    singles
}

/// `candidate` wins over `current` per SPEC_FULL §4.3's tie-break rule.
fn is_newer(candidate: &Event, current: &Event) -> bool {
    match candidate.created_at.cmp(&current.created_at) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => candidate.id < current.id,
    }
}

/// `created_at DESC, id ASC` — the default replay/query order.
pub fn sort_default(events: &mut [Event]) {
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// The minimum `limit` across all filters that declared one, or `None` if
/// none did (no cap beyond whatever the store itself enforces).
pub fn global_limit(filters: &[Filter]) -> Option<u64> {
    filters.iter().filter_map(|f| f.limit).min()
}

/// Apply deletion masking, replaceable collapse (unless every filter is a
/// pure-id lookup), default ordering, and the global limit, to a candidate
/// set already narrowed by a store's indexed lookup.
pub fn finish(filters: &[Filter], mut candidates: Vec<Event>, is_masked: impl Fn(&Event) -> bool) -> Vec<Event> {
    candidates = dedup_by_id(candidates);

    let skip_collapse_and_mask = filters.iter().all(Filter::is_pure_id_lookup);
    if !skip_collapse_and_mask {
        candidates.retain(|e| !is_masked(e));
        candidates = collapse_replaceable(candidates);
    }

    sort_default(&mut candidates);

    if let Some(limit) = global_limit(filters) {
        candidates.truncate(limit as usize);
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;

    fn ev(id: &str, pubkey: &str, kind: u64, created_at: i64, tags: Vec<Tag>) -> Event {
        Event {
            id: id.to_string(),
            pubkey: pubkey.to_string(),
            created_at,
            kind,
            tags,
            content: String::new(),
            sig: "0".repeat(128),
        }
    }

    #[test]
    fn collapse_keeps_newest_replaceable() {
        let older = ev("b".repeat(64).as_str(), &"p".repeat(64), 0, 100, vec![]);
        let newer = ev("a".repeat(64).as_str(), &"p".repeat(64), 0, 200, vec![]);
        let collapsed = collapse_replaceable(vec![older, newer.clone()]);
        assert_eq!(collapsed, vec![newer]);
    }

    #[test]
    fn collapse_ties_break_on_lowest_id() {
        let id_b = ev("b".repeat(64).as_str(), &"p".repeat(64), 0, 100, vec![]);
        let id_a = ev("a".repeat(64).as_str(), &"p".repeat(64), 0, 100, vec![]);
        let collapsed = collapse_replaceable(vec![id_b, id_a.clone()]);
        assert_eq!(collapsed, vec![id_a]);
    }

    #[test]
    fn parameterized_replaceable_partitioned_by_d_tag() {
        let d1 = ev(
            "a".repeat(64).as_str(),
            &"p".repeat(64),
            30_000,
            100,
            vec![Tag::new(vec!["d".into(), "v1".into()])],
        );
        let d2 = ev(
            "b".repeat(64).as_str(),
            &"p".repeat(64),
            30_000,
            50,
            vec![Tag::new(vec!["d".into(), "v2".into()])],
        );
        let collapsed = collapse_replaceable(vec![d1.clone(), d2.clone()]);
        assert_eq!(collapsed.len(), 2);
    }

    #[test]
    fn regular_events_never_collapse() {
        let a = ev("a".repeat(64).as_str(), &"p".repeat(64), 1, 100, vec![]);
        let b = ev("b".repeat(64).as_str(), &"p".repeat(64), 1, 100, vec![]);
        let collapsed = collapse_replaceable(vec![a.clone(), b.clone()]);
        assert_eq!(collapsed.len(), 2);
    }

    #[test]
    fn global_limit_is_minimum_across_filters() {
        let filters = vec![
            Filter {
                limit: Some(10),
                ..Default::default()
            },
            Filter {
                limit: Some(3),
                ..Default::default()
            },
        ];
        assert_eq!(global_limit(&filters), Some(3));
    }

    #[test]
    fn pure_id_lookup_skips_masking_and_collapse() {
        let masked = ev("a".repeat(64).as_str(), &"p".repeat(64), 0, 100, vec![]);
        let filters = vec![Filter {
            ids: Some(vec!["a".repeat(64)]),
            ..Default::default()
        }];
        let out = finish(&filters, vec![masked.clone()], |_| true);
        assert_eq!(out, vec![masked]);
    }

    #[test]
    fn non_id_filter_applies_masking() {
        let masked = ev("a".repeat(64).as_str(), &"p".repeat(64), 1, 100, vec![]);
        let filters = vec![Filter::default()];
        let out = finish(&filters, vec![masked], |_| true);
        assert!(out.is_empty());
    }

    #[test]
    fn search_filter_degrades_to_empty_without_fts() {
        let e = ev("a".repeat(64).as_str(), &"p".repeat(64), 1, 100, vec![]);
        let filters = vec![Filter {
            search: Some("hello".into()),
            ..Default::default()
        }];
        assert!(!matches_any_with_search_policy(&filters, &e, false));
        assert!(matches_any_with_search_policy(&filters, &e, true));
    }
}
