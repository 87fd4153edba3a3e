//! Postgres-backed [`Store`]: schema setup, transactional insert, and
//! indexed query narrowing via `event_tags`, with [`super::query`] applying
//! the masking/collapse/ordering semantics SQL can't express portably.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use super::query;
use super::{InsertOutcome, Store};
use crate::error::StoreError;
use crate::event::{Event, KindClass, Tag};
use crate::filter::Filter;

/// A Postgres-backed store. Holds a connection pool; safe to clone and share
/// across connection tasks.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Create the schema if it doesn't already exist. Called once at startup;
    /// idempotent so it's safe to run against an already-migrated database.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                pubkey TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                kind BIGINT NOT NULL,
                tags JSONB NOT NULL,
                content TEXT NOT NULL,
                sig TEXT NOT NULL,
                d_tag TEXT NOT NULL DEFAULT '',
                search_vector TSVECTOR
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS events_pubkey_kind_idx ON events (pubkey, kind, d_tag)",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS events_created_at_idx ON events (created_at DESC)")
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS events_search_idx ON events USING GIN (search_vector)",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS event_tags (
                event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                tag_name TEXT NOT NULL,
                tag_value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS event_tags_lookup_idx ON event_tags (tag_name, tag_value)")
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS deleted_ids (id TEXT PRIMARY KEY)",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS deleted_addresses (
                kind BIGINT NOT NULL,
                pubkey TEXT NOT NULL,
                d_tag TEXT NOT NULL,
                PRIMARY KEY (kind, pubkey, d_tag)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                pubkey TEXT PRIMARY KEY,
                whitelist_status TEXT NOT NULL DEFAULT 'ACTIVE',
                is_admin BOOLEAN NOT NULL DEFAULT FALSE
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(())
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<Event, StoreError> {
        let tags_json: serde_json::Value = row.try_get("tags").map_err(StoreError::from)?;
        let tags: Vec<Tag> = serde_json::from_value(tags_json).unwrap_or_default();
        Ok(Event {
            id: row.try_get("id").map_err(StoreError::from)?,
            pubkey: row.try_get("pubkey").map_err(StoreError::from)?,
            created_at: row.try_get("created_at").map_err(StoreError::from)?,
            kind: row.try_get::<i64, _>("kind").map_err(StoreError::from)? as u64,
            tags,
            content: row.try_get("content").map_err(StoreError::from)?,
            sig: row.try_get("sig").map_err(StoreError::from)?,
        })
    }

    async fn persist(&self, event: &Event) -> Result<(), StoreError> {
        let tags_json = serde_json::to_value(&event.tags).unwrap_or(serde_json::Value::Array(vec![]));
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        sqlx::query(
            "INSERT INTO events (id, pubkey, created_at, kind, tags, content, sig, d_tag, search_vector)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, to_tsvector('simple', $6))
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&event.id)
        .bind(&event.pubkey)
        .bind(event.created_at)
        .bind(event.kind as i64)
        .bind(&tags_json)
        .bind(&event.content)
        .bind(&event.sig)
        .bind(event.d_tag())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        for (name, value) in event.tag_index_pairs() {
            sqlx::query("INSERT INTO event_tags (event_id, tag_name, tag_value) VALUES ($1, $2, $3)")
                .bind(&event.id)
                .bind(name)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)?;
        }

        tx.commit().await.map_err(StoreError::from)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query("SELECT id, pubkey, created_at, kind, tags, content, sig FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        row.as_ref().map(Self::row_to_event).transpose()
    }

    async fn replacement_winner(&self, event: &Event) -> Result<Option<Event>, StoreError> {
        let row = match event.kind_class() {
            KindClass::Replaceable => {
                sqlx::query(
                    "SELECT id, pubkey, created_at, kind, tags, content, sig FROM events
                     WHERE pubkey = $1 AND kind = $2
                     ORDER BY created_at DESC, id ASC LIMIT 1",
                )
                .bind(&event.pubkey)
                .bind(event.kind as i64)
                .fetch_optional(&self.pool)
                .await
            }
            KindClass::ParameterizedReplaceable => {
                sqlx::query(
                    "SELECT id, pubkey, created_at, kind, tags, content, sig FROM events
                     WHERE pubkey = $1 AND kind = $2 AND d_tag = $3
                     ORDER BY created_at DESC, id ASC LIMIT 1",
                )
                .bind(&event.pubkey)
                .bind(event.kind as i64)
                .bind(event.d_tag())
                .fetch_optional(&self.pool)
                .await
            }
            _ => return Ok(None),
        }
        .map_err(StoreError::from)?;
        row.as_ref().map(Self::row_to_event).transpose()
    }

    async fn is_masked(&self, event: &Event) -> Result<bool, StoreError> {
        let by_id = sqlx::query("SELECT 1 FROM deleted_ids WHERE id = $1")
            .bind(&event.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        if by_id.is_some() {
            return Ok(true);
        }
        let by_addr = sqlx::query(
            "SELECT 1 FROM deleted_addresses WHERE kind = $1 AND pubkey = $2 AND d_tag = $3",
        )
        .bind(event.kind as i64)
        .bind(&event.pubkey)
        .bind(event.d_tag())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(by_addr.is_some())
    }

    fn build_where(filters: &[Filter]) -> (String, Vec<String>) {
        if filters.is_empty() {
            return ("FALSE".to_string(), vec![]);
        }
        let mut clauses = Vec::new();
        let mut binds = Vec::new();
        for filter in filters {
            let mut parts = vec!["kind < 20000 OR kind >= 30000".to_string()];
            if let Some(ids) = &filter.ids {
                if ids.iter().any(|id| id.len() == 64) || !ids.is_empty() {
                    let placeholders: Vec<String> = ids
                        .iter()
                        .map(|id| {
                            binds.push(id.clone());
                            format!("id LIKE ${}  || '%'", binds.len())
                        })
                        .collect();
                    parts.push(format!("({})", placeholders.join(" OR ")));
                }
            }
            if let Some(authors) = &filter.authors {
                let placeholders: Vec<String> = authors
                    .iter()
                    .map(|a| {
                        binds.push(a.clone());
                        format!("pubkey LIKE ${} || '%'", binds.len())
                    })
                    .collect();
                if !placeholders.is_empty() {
                    parts.push(format!("({})", placeholders.join(" OR ")));
                }
            }
            if let Some(kinds) = &filter.kinds {
                let placeholders: Vec<String> = kinds
                    .iter()
                    .map(|k| {
                        binds.push(k.to_string());
                        format!("kind = ${}", binds.len())
                    })
                    .collect();
                if !placeholders.is_empty() {
                    parts.push(format!("({})", placeholders.join(" OR ")));
                }
            }
            if let Some(since) = filter.since {
                binds.push(since.to_string());
                parts.push(format!("created_at >= ${}", binds.len()));
            }
            if let Some(until) = filter.until {
                binds.push(until.to_string());
                parts.push(format!("created_at <= ${}", binds.len()));
            }
            if let Some(search) = &filter.search {
                binds.push(search.clone());
                parts.push(format!("search_vector @@ plainto_tsquery('simple', ${})", binds.len()));
            }
            clauses.push(format!("({})", parts.join(" AND ")));
        }
        (clauses.join(" OR "), binds)
    }

    /// Narrow via indexed SQL: kind/author/time bounds plus, when a filter
    /// carries `search`, a `search_vector @@ plainto_tsquery(...)` match against
    /// the GIN index built by [`Self::run_migrations`]. Tag filters are left to
    /// in-process post-filtering (`query::matches_any_with_search_policy`): the
    /// candidate set still needs full-event evaluation before masking and
    /// collapse, so pushing every clause into SQL buys little beyond what's
    /// done here.
    async fn narrow(&self, filters: &[Filter]) -> Result<Vec<Event>, StoreError> {
        let (where_clause, binds) = Self::build_where(filters);
        let sql = format!(
            "SELECT id, pubkey, created_at, kind, tags, content, sig FROM events WHERE {where_clause} ORDER BY created_at DESC, id ASC LIMIT 5000"
        );
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(StoreError::from)?;
        rows.iter().map(Self::row_to_event).collect()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_event(&self, event: &Event) -> Result<InsertOutcome, StoreError> {
        if self.find_by_id(&event.id).await?.is_some() {
            return Ok(InsertOutcome::Duplicate);
        }

        if event.kind == 5 {
            let k_tags = event.k_tag_kinds();

            for target_id in event.e_tag_targets() {
                if let Some(target) = self.find_by_id(target_id).await? {
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

            self.persist(event).await?;
            for target_id in event.e_tag_targets() {
                sqlx::query("INSERT INTO deleted_ids (id) VALUES ($1) ON CONFLICT DO NOTHING")
                    .bind(target_id)
                    .execute(&self.pool)
                    .await
                    .map_err(StoreError::from)?;
            }
            for (kind, pubkey, d) in event.a_tag_targets() {
                if !k_tags.is_empty() && !k_tags.contains(&kind) {
                    continue;
                }
                sqlx::query(
                    "INSERT INTO deleted_addresses (kind, pubkey, d_tag) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
                )
                .bind(kind as i64)
                .bind(&pubkey)
                .bind(&d)
                .execute(&self.pool)
                .await
                .map_err(StoreError::from)?;
            }
            return Ok(InsertOutcome::Accepted);
        }

        if self.is_masked(event).await? {
            self.persist(event).await?;
            return Ok(InsertOutcome::MaskedByDeletion);
        }

        if event.kind_class() == KindClass::Replaceable
            || event.kind_class() == KindClass::ParameterizedReplaceable
        {
            let stale = match self.replacement_winner(event).await? {
                Some(current) => {
                    current.created_at > event.created_at
                        || (current.created_at == event.created_at && current.id < event.id)
                }
                None => false,
            };
            self.persist(event).await?;
            return Ok(if stale {
                InsertOutcome::Stale
            } else {
                InsertOutcome::Accepted
            });
        }

        self.persist(event).await?;
        Ok(InsertOutcome::Accepted)
    }

    async fn query_events(&self, filters: &[Filter]) -> Result<Vec<Event>, StoreError> {
        let candidates = self.narrow(filters).await?;
        let filtered: Vec<Event> = candidates
            .into_iter()
            .filter(|e| query::matches_any_with_search_policy(filters, e, self.supports_search()))
            .collect();

        let mut masked_ids = std::collections::HashSet::new();
        let mut masked_addresses = std::collections::HashSet::new();
        let needs_mask_check = !filters.iter().all(Filter::is_pure_id_lookup);
        if needs_mask_check {
            for event in &filtered {
                if self.is_masked(event).await? {
                    masked_ids.insert(event.id.clone());
                    masked_addresses.insert((event.kind, event.pubkey.clone(), event.d_tag()));
                }
            }
        }

        Ok(query::finish(filters, filtered, |e| {
            masked_ids.contains(&e.id)
                || masked_addresses.contains(&(e.kind, e.pubkey.clone(), e.d_tag()))
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

    fn supports_search(&self) -> bool {
        true
    }

    async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query("TRUNCATE events, event_tags, deleted_ids, deleted_addresses CASCADE")
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn is_admin(&self, pubkey: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT is_admin FROM users WHERE pubkey = $1")
            .bind(pubkey)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(row
            .map(|r| r.try_get::<bool, _>("is_admin").unwrap_or(false))
            .unwrap_or(false))
    }

    async fn list_allowed_users(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT pubkey FROM users WHERE whitelist_status = 'ACTIVE'")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("pubkey").map_err(StoreError::from))
            .collect()
    }

    async fn allow_user(&self, pubkey: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (pubkey, whitelist_status) VALUES ($1, 'ACTIVE')
             ON CONFLICT (pubkey) DO UPDATE SET whitelist_status = 'ACTIVE'",
        )
        .bind(pubkey)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn ban_user(&self, pubkey: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (pubkey, whitelist_status) VALUES ($1, 'BANNED')
             ON CONFLICT (pubkey) DO UPDATE SET whitelist_status = 'BANNED'",
        )
        .bind(pubkey)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }
}
