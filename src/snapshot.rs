//! Durable snapshot pipeline: the sink interface, the row shape it receives,
//! and the relational schema the production sink applies.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One durable row of the `world_tiles` table, keyed by `(q, r)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRow {
    pub q: i32,
    pub r: i32,
    pub owner_id: Option<String>,
    pub owner_alliance_tag: Option<String>,
    pub owner_alliance_color: Option<String>,
    pub energy: f64,
    pub integrity: f64,
    pub level: u32,
    pub tile_type: String,
    pub last_update: i64,
}

/// Batch-upserts tile rows into durable storage.
///
/// Upserts are idempotent per `(q, r)`; the snapshot loop is the only
/// expected writer. The production implementation writes Postgres via the
/// schema below; it lives outside this crate.
pub trait SnapshotSink: Send + Sync + 'static {
    fn upsert_tiles(
        &self,
        rows: &[TileRow],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Idempotent DDL for the snapshot table. Safe to run on every startup.
pub const WORLD_TILES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS world_tiles (
    q                    BIGINT NOT NULL,
    r                    BIGINT NOT NULL,
    owner_id             TEXT NULL,
    owner_alliance_tag   TEXT NULL,
    owner_alliance_color TEXT NULL,
    energy               FLOAT8 NOT NULL,
    integrity            FLOAT8 NOT NULL,
    level                INT NOT NULL DEFAULT 1,
    tile_type            TEXT NOT NULL DEFAULT 'normal',
    last_update          BIGINT NOT NULL,
    PRIMARY KEY (q, r)
);

CREATE INDEX IF NOT EXISTS idx_world_tiles_owner ON world_tiles (owner_id);
CREATE INDEX IF NOT EXISTS idx_world_tiles_last_update ON world_tiles (last_update);
"#;

/// Column additions shipped after the initial schema. Each statement is
/// idempotent so mixed-version deploys converge.
pub const WORLD_TILES_EVOLUTION: &str = r#"
ALTER TABLE world_tiles ADD COLUMN IF NOT EXISTS owner_alliance_tag TEXT NULL;
ALTER TABLE world_tiles ADD COLUMN IF NOT EXISTS owner_alliance_color TEXT NULL;
"#;

/// In-memory sink for tests and the dev server: a `(q, r) -> row` map, which
/// makes upsert idempotence directly assertable.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemorySinkState>>,
}

#[derive(Default)]
struct MemorySinkState {
    rows: BTreeMap<(i32, i32), TileRow>,
    batches: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All persisted rows, ordered by `(q, r)`.
    pub fn rows(&self) -> Vec<TileRow> {
        self.inner.lock().expect("sink mutex poisoned").rows.values().cloned().collect()
    }

    /// Number of `upsert_tiles` calls observed.
    pub fn batches(&self) -> usize {
        self.inner.lock().expect("sink mutex poisoned").batches
    }
}

impl SnapshotSink for MemorySink {
    async fn upsert_tiles(&self, rows: &[TileRow]) -> Result<(), StoreError> {
        let mut state = self.inner.lock().expect("sink mutex poisoned");
        state.batches += 1;
        for row in rows {
            state.rows.insert((row.q, row.r), row.clone());
        }
        Ok(())
    }
}
