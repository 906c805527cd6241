//! The recharge sweep and the snapshot flush: the two periodic jobs that
//! converge the whole tile keyspace.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use tracing::debug;

use crate::error::{CancelToken, WorldError};
use crate::hex::Axial;
use crate::snapshot::{SnapshotSink, TileRow};
use crate::store::{parse_coord_member, tile_key, KvStore, CHUNK_ACTIVITY, TILES_INDEX};
use crate::world::engine::WorldEngine;
use crate::world::results::TickReport;
use crate::world::state::{round4, Tile};

/// Cached neighbor ownership for one sweep: `owner id` and alliance tag.
type NeighborCache = HashMap<Axial, Option<(String, Option<String>)>>;

impl<S: KvStore, P: SnapshotSink> WorldEngine<S, P> {
    /// Advance every tile to `now`: decay integrity, generate energy while
    /// integrity lasts, apply the alliance adjacency bonus, and credit the
    /// accumulated generation to each owner. Repeating a tick at the same
    /// `now` is a no-op.
    pub async fn recharge_tick(
        &self,
        cancel: &CancelToken,
        now: i64,
    ) -> Result<TickReport, WorldError> {
        let mut report = TickReport::default();
        let mut credits: HashMap<String, f64> = HashMap::new();
        let mut neighbors = NeighborCache::new();

        let mut cursor = "0".to_string();
        loop {
            cancel.bail()?;
            let (next, members) = self
                .store
                .set_scan(TILES_INDEX, &cursor, self.config.scan_count)
                .await?;
            for member in members {
                cancel.bail()?;
                let Some(coord) = parse_coord_member(&member) else {
                    continue;
                };
                report.scanned += 1;
                if let Some((owner, generated)) =
                    self.evolve_tile(coord, now, &mut neighbors).await?
                {
                    report.updated += 1;
                    report.energy_generated += generated;
                    if generated > 0.0 {
                        if let Some(owner) = owner {
                            *credits.entry(owner).or_insert(0.0) += generated;
                        }
                    }
                }
            }
            if next == "0" {
                break;
            }
            cursor = next;
        }

        for (owner, amount) in credits {
            cancel.bail()?;
            let _guard = self.player_locks.acquire(&owner).await;
            let mut player = self.ensure_player(&owner, now).await?;
            player.energy = round4((player.energy + amount).min(self.config.max_player_energy));
            player.last_update = now;
            self.write_player(&player).await?;
            report.owners_credited += 1;
        }

        report.activity_decayed = self.maybe_decay_activity(cancel, now).await?;

        debug!(
            scanned = report.scanned,
            updated = report.updated,
            owners = report.owners_credited,
            generated = report.energy_generated,
            "recharge sweep done"
        );
        Ok(report)
    }

    /// Read-evolve-write one tile under its lock. Returns the owner and the
    /// energy generated, or `None` if the tile was skipped.
    async fn evolve_tile(
        &self,
        coord: Axial,
        now: i64,
        neighbors: &mut NeighborCache,
    ) -> Result<Option<(Option<String>, f64)>, WorldError> {
        let _guard = self.tile_locks.acquire(&coord).await;
        let Some(mut tile) = self.load_tile(coord).await? else {
            // Index entry ahead of the hash; the next sweep settles it.
            return Ok(None);
        };

        let elapsed_ms = (now - tile.last_update).max(0);
        if elapsed_ms == 0 {
            return Ok(None);
        }

        let decay = self.config.integrity_decay_per_minute;
        let integrity_before = tile.integrity;
        let integrity_loss = elapsed_ms as f64 / 60_000.0 * decay;
        let elapsed_s = elapsed_ms as f64 / 1_000.0;

        // Seconds of the window the tile still had integrity left.
        let active_seconds = if decay == 0.0 {
            elapsed_s
        } else {
            elapsed_s.min((integrity_before / decay * 60.0).max(0.0))
        };

        let bonus = if active_seconds > 0.0 {
            self.alliance_bonus(&tile, neighbors).await?
        } else {
            1.0
        };
        let generated = active_seconds * self.config.energy_recharge_per_second * bonus;

        tile.energy = round4((tile.energy + generated).clamp(0.0, self.config.max_tile_energy));
        tile.integrity = round4((integrity_before - integrity_loss).clamp(0.0, 100.0));
        tile.last_update = now;
        self.write_tile(&tile).await?;

        Ok(Some((tile.owner_id, generated)))
    }

    /// 1.05 when an adjacent tile is owned by a *different* player in the
    /// same alliance, else 1.0. Neighbor reads go through the per-sweep
    /// cache.
    async fn alliance_bonus(
        &self,
        tile: &Tile,
        neighbors: &mut NeighborCache,
    ) -> Result<f64, WorldError> {
        let (Some(owner), Some(tag)) = (&tile.owner_id, &tile.owner_alliance_tag) else {
            return Ok(1.0);
        };
        for neighbor in tile.coord.neighbors() {
            let entry = match neighbors.get(&neighbor) {
                Some(cached) => cached.clone(),
                None => {
                    let map = self.store.hash_get_all(&tile_key(neighbor)).await?;
                    let loaded = map.get("owner_id").map(|o| {
                        (o.clone(), map.get("owner_alliance_tag").cloned())
                    });
                    neighbors.insert(neighbor, loaded.clone());
                    loaded
                }
            };
            if let Some((neighbor_owner, neighbor_tag)) = entry {
                if neighbor_owner != *owner && neighbor_tag.as_deref() == Some(tag) {
                    return Ok(self.config.alliance_neighbor_bonus_multiplier);
                }
            }
        }
        Ok(1.0)
    }

    /// Halve every chunk-activity counter once per decay interval, pruning
    /// counters that reach zero. Keeps the activity hash bounded by chunks
    /// that were recently touched.
    async fn maybe_decay_activity(
        &self,
        cancel: &CancelToken,
        now: i64,
    ) -> Result<bool, WorldError> {
        let last = self.last_activity_decay.load(Ordering::Acquire);
        if now.saturating_sub(last) < self.config.activity_decay_interval_ms {
            return Ok(false);
        }
        if self
            .last_activity_decay
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Another sweep beat us to it.
            return Ok(false);
        }
        cancel.bail()?;

        let counters = self.store.hash_get_all(CHUNK_ACTIVITY).await?;
        let mut halved = Vec::new();
        let mut dead = Vec::new();
        for (field, raw) in counters {
            let value = raw.parse::<i64>().unwrap_or(0) / 2;
            if value > 0 {
                halved.push((field, value.to_string()));
            } else {
                dead.push(field);
            }
        }
        if !halved.is_empty() {
            self.store.hash_set(CHUNK_ACTIVITY, halved).await?;
        }
        if !dead.is_empty() {
            self.store.hash_remove(CHUNK_ACTIVITY, &dead).await?;
        }
        Ok(true)
    }

    /// Stream the whole tile index to the snapshot sink in batches.
    /// Returns the number of rows persisted.
    pub async fn snapshot_flush(&self, cancel: &CancelToken) -> Result<usize, WorldError> {
        let mut batch: Vec<TileRow> = Vec::with_capacity(self.config.snapshot_batch_size);
        let mut total = 0usize;

        let mut cursor = "0".to_string();
        loop {
            cancel.bail()?;
            let (next, members) = self
                .store
                .set_scan(TILES_INDEX, &cursor, self.config.scan_count)
                .await?;
            for member in members {
                let Some(coord) = parse_coord_member(&member) else {
                    continue;
                };
                if let Some(tile) = self.load_tile(coord).await? {
                    batch.push(tile.to_row());
                    if batch.len() >= self.config.snapshot_batch_size {
                        cancel.bail()?;
                        self.sink.upsert_tiles(&batch).await?;
                        total += batch.len();
                        batch.clear();
                    }
                }
            }
            if next == "0" {
                break;
            }
            cursor = next;
        }

        if !batch.is_empty() {
            self.sink.upsert_tiles(&batch).await?;
            total += batch.len();
        }
        debug!(total, "snapshot flush done");
        Ok(total)
    }
}
