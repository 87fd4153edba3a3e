//! Event store contract: insert / query / count / match / clear.
//!
//! The pipeline's `StorePolicy` stage and `MessageHandler` stage treat an
//! insert as a single transactional operation (SPEC_FULL §5) that evaluates
//! duplicate detection, deletion masking, and replaceable staleness
//! together; see [`InsertOutcome`].

mod memory;
mod postgres;
pub mod query;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::event::Event;
use crate::filter::Filter;

/// Result of submitting an event for storage, per SPEC_FULL §4.7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Freshly accepted, persisted, and eligible for live fan-out.
    Accepted,
    /// `id` was already stored; not fanned out again.
    Duplicate,
    /// A replaceable/parameterized-replaceable event persisted but older
    /// than the current winner for its replacement key.
    Stale,
    /// Persisted, but masked by a prior deletion citing this event's id or address.
    MaskedByDeletion,
    /// A kind-5 deletion citing at least one target not authored by the
    /// deletion's own pubkey. The whole deletion is rejected and not persisted.
    DeletionRejected,
}

/// The event storage and query contract. Implementations must evaluate
/// deletion masking and replaceable-staleness atomically with the insert
/// (a single Postgres transaction in [`PgStore`]).
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert `event`, applying duplicate/deletion/replaceable rules.
    async fn insert_event(&self, event: &Event) -> Result<InsertOutcome, StoreError>;

    /// Run an indexed query across `filters` (OR-combined), applying
    /// ephemeral exclusion, deletion masking, and replaceable collapse
    /// per SPEC_FULL §4.3, ordered and limited as specified there.
    async fn query_events(&self, filters: &[Filter]) -> Result<Vec<Event>, StoreError>;

    /// Count matches for `filters` without materializing events.
    async fn count_events(&self, filters: &[Filter]) -> Result<u64, StoreError>;

    /// Whether the stored event `id` (if present) currently matches any of
    /// `filters`, honoring the same masking/collapse rules as `query_events`.
    async fn event_matches_filters(
        &self,
        id: &str,
        filters: &[Filter],
    ) -> Result<bool, StoreError>;

    /// Whether the store's full-text index (NIP-50) is available; stores
    /// without FTS degrade `search` filters to an empty result set.
    fn supports_search(&self) -> bool {
        false
    }

    /// Wipe all persisted state. Test-only.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Whether `pubkey` carries the admin flag, used to gate the NIP-86
    /// relay management JSON-RPC surface (SPEC_FULL §6).
    async fn is_admin(&self, pubkey: &str) -> Result<bool, StoreError>;

    /// Pubkeys currently on the allow-list (`whitelist_status = 'ACTIVE'`).
    async fn list_allowed_users(&self) -> Result<Vec<String>, StoreError>;

    /// Add `pubkey` to the allow-list, creating the user record if absent.
    async fn allow_user(&self, pubkey: &str) -> Result<(), StoreError>;

    /// Remove `pubkey` from the allow-list (sets `whitelist_status = 'BANNED'`).
    async fn ban_user(&self, pubkey: &str) -> Result<(), StoreError>;
}
