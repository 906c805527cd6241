//! Abstract key-value surface the engine runs against.
//!
//! The production deployment points this at Redis; tests and the dev server
//! use [`memory::MemoryKv`]. All engine state (tile hashes, player hashes,
//! the derived indices) lives behind this trait, and the engine is the only
//! writer.

pub mod memory;

use std::collections::HashMap;
use std::future::Future;

use crate::error::StoreError;
use crate::hex::Axial;

pub use memory::MemoryKv;

/// Field/value pairs of a hash record.
pub type FieldMap = HashMap<String, String>;

/// Hash, set and sorted-set operations plus a cursor-based set scan.
///
/// Method semantics follow the Redis commands they map to (`HGETALL`,
/// `HSET`, `HDEL`, `HINCRBY`, `HSETNX`, `ZINCRBY`, `ZRANGE WITHSCORES`,
/// `SADD`, `SREM`, `SMEMBERS`, `SSCAN`). The scan cursor is opaque; `"0"`
/// both starts and terminates an iteration, and members added mid-scan may
/// or may not be visited.
pub trait KvStore: Send + Sync + 'static {
    /// Full contents of a hash; empty map if the key is missing.
    fn hash_get_all(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<FieldMap, StoreError>> + Send;

    /// Set each field to the string form of its value; returns fields written.
    fn hash_set(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Delete fields from a hash; returns how many existed.
    fn hash_remove(
        &self,
        key: &str,
        fields: &[String],
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Atomic integer add on a hash field; returns the new value.
    fn hash_incr_by(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Set a field only if absent; returns whether it was written.
    fn hash_set_nx(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Add to a member's score (creating it at `delta`); returns the new score.
    fn zset_incr_by(
        &self,
        key: &str,
        delta: f64,
        member: &str,
    ) -> impl Future<Output = Result<f64, StoreError>> + Send;

    /// Members and scores for the index range `[start, stop]` (inclusive,
    /// negative indices count from the end), score-ascending unless
    /// `reverse`.
    fn zset_range_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        reverse: bool,
    ) -> impl Future<Output = Result<Vec<(String, f64)>, StoreError>> + Send;

    /// Returns how many members were newly added.
    fn set_add(
        &self,
        key: &str,
        members: &[String],
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Returns how many members were removed.
    fn set_remove(
        &self,
        key: &str,
        members: &[String],
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    fn set_members(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// One page of a cursor scan: `(next_cursor, members)`.
    fn set_scan(
        &self,
        key: &str,
        cursor: &str,
        count: usize,
    ) -> impl Future<Output = Result<(String, Vec<String>), StoreError>> + Send;
}

/// Set of every existing tile, enumerated by the sweep loops.
pub const TILES_INDEX: &str = "tiles:index";
/// Set of nexus POIs.
pub const POI_INDEX: &str = "poi:index";
/// Sorted set: member = user id, score = owned-tile count.
pub const LEADERBOARD_TILES: &str = "leaderboard:tiles";
/// Hash: chunk id -> activity counter.
pub const CHUNK_ACTIVITY: &str = "chunk:activity";

pub fn tile_key(coord: Axial) -> String {
    format!("tile:{}:{}", coord.q, coord.r)
}

pub fn player_key(user_id: &str) -> String {
    format!("player:{user_id}")
}

pub fn chunk_tiles_key(cq: i32, cr: i32) -> String {
    format!("chunk:{cq}:{cr}:tiles")
}

pub fn owner_tiles_key(user_id: &str) -> String {
    format!("owner:{user_id}:tiles")
}

/// Set-member / hash-field encoding of a coordinate pair: `"q:r"`.
pub fn coord_member(coord: Axial) -> String {
    format!("{}:{}", coord.q, coord.r)
}

pub fn parse_coord_member(member: &str) -> Option<Axial> {
    let (q, r) = member.split_once(':')?;
    Some(Axial::new(q.parse().ok()?, r.parse().ok()?))
}
