//! The world engine: business rules for claim/repair/alliance, spatial
//! queries, radar and leaderboard. Owns every key in the store; callers
//! (transport, admin shell) only ever see result records.

use std::sync::atomic::AtomicI64;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::config::WorldConfig;
use crate::error::{CancelToken, WorldError};
use crate::hex::Axial;
use crate::snapshot::SnapshotSink;
use crate::store::{
    chunk_tiles_key, coord_member, owner_tiles_key, parse_coord_member, player_key, tile_key,
    KvStore, CHUNK_ACTIVITY, LEADERBOARD_TILES, POI_INDEX, TILES_INDEX,
};
use crate::world::alliance::{color_for_tag, normalize_tag};
use crate::world::locks::KeyedLocks;
use crate::world::results::{
    ClaimOutcome, ClaimSuccess, Hotspot, LeaderboardEntry, NexusPoint, RadarData, RepairOutcome,
    RepairSuccess,
};
use crate::world::state::{round4, ChunkId, PlayerProfile, Tile, TileKind};

/// Wall-clock milliseconds since the epoch.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct WorldEngine<S, P> {
    pub(crate) store: S,
    pub(crate) sink: P,
    pub(crate) config: WorldConfig,
    pub(crate) tile_locks: KeyedLocks<Axial>,
    pub(crate) player_locks: KeyedLocks<String>,
    /// Wall-clock ms of the last chunk-activity decay pass.
    pub(crate) last_activity_decay: AtomicI64,
}

fn validate_user_id(user_id: &str) -> Result<&str, WorldError> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(WorldError::invalid("user id must be a non-empty string"));
    }
    Ok(trimmed)
}

fn validate_radius(radius: f64, min: u32) -> Result<u32, WorldError> {
    if !radius.is_finite() || radius.fract() != 0.0 || radius < min as f64 {
        return Err(WorldError::invalid(format!(
            "radius must be an integer >= {min}, got {radius}"
        )));
    }
    Ok(radius as u32)
}

impl<S: KvStore, P: SnapshotSink> WorldEngine<S, P> {
    pub fn new(store: S, sink: P, config: WorldConfig) -> Self {
        let shards = config.lock_shards;
        Self {
            store,
            sink,
            config,
            tile_locks: KeyedLocks::new(shards),
            player_locks: KeyedLocks::new(shards),
            last_activity_decay: AtomicI64::new(0),
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Direct store access for harnesses and the transport's session layer.
    pub fn store(&self) -> &S {
        &self.store
    }

    // ---- shared plumbing ------------------------------------------------

    pub(crate) async fn load_tile(&self, coord: Axial) -> Result<Option<Tile>, WorldError> {
        let key = tile_key(coord);
        let map = self.store.hash_get_all(&key).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(Tile::from_fields(coord, &key, &map)?))
    }

    pub(crate) async fn write_tile(&self, tile: &Tile) -> Result<(), WorldError> {
        let key = tile_key(tile.coord);
        self.store.hash_set(&key, tile.to_fields()).await?;
        let absent = tile.absent_fields();
        if !absent.is_empty() {
            self.store.hash_remove(&key, &absent).await?;
        }
        Ok(())
    }

    /// Load or lazily create a player record. Callers must hold the
    /// player's lock; creation and the follow-up read are not atomic.
    pub(crate) async fn ensure_player(
        &self,
        user_id: &str,
        now: i64,
    ) -> Result<PlayerProfile, WorldError> {
        let key = player_key(user_id);
        let created = self.store.hash_set_nx(&key, "user_id", user_id).await?;
        if created {
            let profile = PlayerProfile {
                user_id: user_id.to_string(),
                display_name: user_id.to_string(),
                alliance_tag: None,
                alliance_color: None,
                energy: self.config.initial_player_energy,
                last_update: now,
            };
            self.store.hash_set(&key, profile.to_fields()).await?;
            return Ok(profile);
        }
        let map = self.store.hash_get_all(&key).await?;
        Ok(PlayerProfile::from_fields(user_id, &key, &map)?)
    }

    pub(crate) async fn write_player(&self, profile: &PlayerProfile) -> Result<(), WorldError> {
        let key = player_key(&profile.user_id);
        self.store.hash_set(&key, profile.to_fields()).await?;
        let absent = profile.absent_fields();
        if !absent.is_empty() {
            self.store.hash_remove(&key, &absent).await?;
        }
        Ok(())
    }

    async fn bump_activity(&self, chunk: ChunkId, delta: i64) -> Result<(), WorldError> {
        self.store
            .hash_incr_by(CHUNK_ACTIVITY, &chunk.field(), delta)
            .await?;
        Ok(())
    }

    /// Decrement a player's leaderboard score, clamping at zero.
    async fn leaderboard_forfeit(&self, user_id: &str) -> Result<(), WorldError> {
        let next = self
            .store
            .zset_incr_by(LEADERBOARD_TILES, -1.0, user_id)
            .await?;
        if next < 0.0 {
            self.store
                .zset_incr_by(LEADERBOARD_TILES, -next, user_id)
                .await?;
        }
        Ok(())
    }

    /// Lock the involved players in id order so concurrent claims cannot
    /// deadlock. The tile lock is always taken first.
    async fn lock_players(
        &self,
        ids: &mut Vec<String>,
    ) -> Vec<tokio::sync::OwnedMutexGuard<()>> {
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids.iter() {
            guards.push(self.player_locks.acquire(id).await);
        }
        guards
    }

    // ---- claim ----------------------------------------------------------

    pub async fn claim(
        &self,
        cancel: &CancelToken,
        user_id: &str,
        q: f64,
        r: f64,
    ) -> Result<ClaimOutcome, WorldError> {
        let user_id = validate_user_id(user_id)?;
        let coord = Axial::from_f64(q, r)?;
        cancel.bail()?;

        let now = now_ms();
        let chunk = ChunkId::of(coord, self.config.chunk_size);
        let _tile_guard = self.tile_locks.acquire(&coord).await;

        let existing = self.load_tile(coord).await?;

        // Rule 1: claiming your own tile is a free no-op.
        if let Some(tile) = existing
            .clone()
            .filter(|t| t.owner_id.as_deref() == Some(user_id))
        {
            let _player_guard = self.player_locks.acquire(&user_id.to_string()).await;
            cancel.bail()?;
            let player = self.ensure_player(user_id, now).await?;
            return Ok(ClaimOutcome::Claimed(ClaimSuccess {
                tile,
                chunk,
                created: false,
                captured: false,
                previous_owner: None,
                energy_cost: 0.0,
                energy_after: player.energy,
            }));
        }

        // Rule 2: range gate. First-ever claim bypasses it.
        let owned = self.store.set_members(&owner_tiles_key(user_id)).await?;
        if !owned.is_empty() {
            let nearest = owned
                .iter()
                .filter_map(|m| parse_coord_member(m))
                .map(|c| coord.distance(c))
                .min();
            let max = self.config.max_claim_distance_from_owned;
            if nearest.map_or(true, |d| d > max) {
                return Ok(ClaimOutcome::OutOfRange {
                    max_distance: max,
                    nearest_distance: nearest,
                });
            }
        }

        // Rule 3: cost.
        let previous_owner = existing.as_ref().and_then(|t| t.owner_id.clone());
        let captured = previous_owner.is_some();
        let energy_cost = if captured {
            let level = existing.as_ref().map_or(1, |t| t.level);
            level as f64 * self.config.hostile_claim_cost_multiplier
        } else {
            self.config.free_claim_cost
        };

        let mut ids = vec![user_id.to_string()];
        if let Some(prev) = &previous_owner {
            ids.push(prev.clone());
        }
        let _player_guards = self.lock_players(&mut ids).await;
        cancel.bail()?;

        // Rule 4: spend gate. Nothing is mutated on shortfall.
        let mut player = self.ensure_player(user_id, now).await?;
        if player.energy < energy_cost {
            return Ok(ClaimOutcome::InsufficientEnergy {
                required_energy: energy_cost,
                player_energy: player.energy,
            });
        }

        // Rule 5: commit. Debit first so the result reflects the energy
        // immediately after the spend.
        player.energy = round4(player.energy - energy_cost);
        player.last_update = now;
        self.write_player(&player).await?;

        let created = existing.is_none();
        let tile = match existing {
            None => Tile {
                coord,
                owner_id: Some(user_id.to_string()),
                owner_alliance_tag: player.alliance_tag.clone(),
                owner_alliance_color: player.alliance_color.clone(),
                energy: self.config.initial_tile_energy,
                integrity: self.config.initial_tile_integrity,
                level: self.config.initial_tile_level,
                kind: TileKind::Normal,
                last_update: now,
            },
            Some(mut tile) => {
                tile.owner_id = Some(user_id.to_string());
                tile.owner_alliance_tag = player.alliance_tag.clone();
                tile.owner_alliance_color = player.alliance_color.clone();
                tile.last_update = now;
                tile
            }
        };
        self.write_tile(&tile).await?;

        let member = coord_member(coord);
        self.store.set_add(TILES_INDEX, &[member.clone()]).await?;
        self.store
            .set_add(&chunk_tiles_key(chunk.cq, chunk.cr), &[member.clone()])
            .await?;
        self.store
            .set_add(&owner_tiles_key(user_id), &[member.clone()])
            .await?;

        if let Some(prev) = &previous_owner {
            self.store
                .set_remove(&owner_tiles_key(prev), &[member])
                .await?;
            self.leaderboard_forfeit(prev).await?;
        }
        // Every committed claim gains exactly one tile for the claimer:
        // creation, capture, or an existing unowned tile.
        self.store
            .zset_incr_by(LEADERBOARD_TILES, 1.0, user_id)
            .await?;

        self.bump_activity(chunk, if captured { 3 } else { 1 }).await?;

        debug!(
            user = user_id,
            q = coord.q,
            r = coord.r,
            energy_cost,
            created,
            captured,
            "claim committed"
        );
        Ok(ClaimOutcome::Claimed(ClaimSuccess {
            tile,
            chunk,
            created,
            captured,
            previous_owner,
            energy_cost,
            energy_after: player.energy,
        }))
    }

    // ---- repair ---------------------------------------------------------

    pub async fn repair(
        &self,
        cancel: &CancelToken,
        user_id: &str,
        q: f64,
        r: f64,
    ) -> Result<RepairOutcome, WorldError> {
        let user_id = validate_user_id(user_id)?;
        let coord = Axial::from_f64(q, r)?;
        cancel.bail()?;

        let now = now_ms();
        let chunk = ChunkId::of(coord, self.config.chunk_size);
        let _tile_guard = self.tile_locks.acquire(&coord).await;

        let Some(mut tile) = self.load_tile(coord).await? else {
            return Ok(RepairOutcome::TileNotFound);
        };
        if tile.owner_id.as_deref() != Some(user_id) {
            return Ok(RepairOutcome::NotOwner {
                owner_id: tile.owner_id,
            });
        }

        let _player_guard = self.player_locks.acquire(&user_id.to_string()).await;
        cancel.bail()?;

        let mut player = self.ensure_player(user_id, now).await?;
        let energy_cost = self.config.repair_cost_energy;
        if player.energy < energy_cost {
            return Ok(RepairOutcome::InsufficientEnergy {
                required_energy: energy_cost,
                player_energy: player.energy,
            });
        }

        player.energy = round4(player.energy - energy_cost);
        player.last_update = now;
        self.write_player(&player).await?;

        tile.integrity = round4((tile.integrity + self.config.repair_integrity_gain).min(100.0));
        tile.last_update = now;
        self.write_tile(&tile).await?;
        self.bump_activity(chunk, 2).await?;

        debug!(user = user_id, q = coord.q, r = coord.r, integrity = tile.integrity, "repair");
        Ok(RepairOutcome::Repaired(RepairSuccess {
            tile,
            chunk,
            energy_cost,
            energy_after: player.energy,
        }))
    }

    // ---- nexus registration ---------------------------------------------

    /// Create or upgrade a nexus POI. Nexuses spawn unowned; claims and
    /// captures then follow the normal rules and the tile keeps its kind.
    pub async fn register_nexus(
        &self,
        cancel: &CancelToken,
        q: f64,
        r: f64,
        level: u32,
    ) -> Result<Tile, WorldError> {
        let coord = Axial::from_f64(q, r)?;
        if level < 1 {
            return Err(WorldError::invalid("nexus level must be a positive integer"));
        }
        cancel.bail()?;

        let now = now_ms();
        let chunk = ChunkId::of(coord, self.config.chunk_size);
        let _tile_guard = self.tile_locks.acquire(&coord).await;

        let tile = match self.load_tile(coord).await? {
            Some(mut tile) => {
                tile.kind = TileKind::Nexus;
                tile.level = level;
                tile.last_update = now;
                tile
            }
            None => Tile {
                coord,
                owner_id: None,
                owner_alliance_tag: None,
                owner_alliance_color: None,
                energy: self.config.initial_tile_energy,
                integrity: self.config.initial_tile_integrity,
                level,
                kind: TileKind::Nexus,
                last_update: now,
            },
        };
        self.write_tile(&tile).await?;

        let member = coord_member(coord);
        self.store.set_add(TILES_INDEX, &[member.clone()]).await?;
        self.store
            .set_add(&chunk_tiles_key(chunk.cq, chunk.cr), &[member.clone()])
            .await?;
        self.store.set_add(POI_INDEX, &[member]).await?;

        debug!(q = coord.q, r = coord.r, level, "nexus registered");
        Ok(tile)
    }

    // ---- alliance -------------------------------------------------------

    /// Set or clear a player's alliance tag and propagate the denormalized
    /// tag/color snapshot to every tile they own.
    pub async fn set_alliance_tag(
        &self,
        cancel: &CancelToken,
        user_id: &str,
        tag: Option<&str>,
    ) -> Result<PlayerProfile, WorldError> {
        let user_id = validate_user_id(user_id)?;
        let tag = normalize_tag(tag)?;
        let color = tag.as_deref().map(color_for_tag);
        cancel.bail()?;

        let now = now_ms();
        let profile = {
            let _player_guard = self.player_locks.acquire(&user_id.to_string()).await;
            let mut profile = self.ensure_player(user_id, now).await?;
            profile.alliance_tag = tag.clone();
            profile.alliance_color = color.clone();
            profile.last_update = now;
            self.write_player(&profile).await?;
            profile
        };

        // Refresh the snapshot on owned tiles; only the two alliance fields
        // change, last_update stays put.
        let owned = self.store.set_members(&owner_tiles_key(user_id)).await?;
        for member in owned {
            cancel.bail()?;
            let Some(coord) = parse_coord_member(&member) else {
                continue;
            };
            let _tile_guard = self.tile_locks.acquire(&coord).await;
            let key = tile_key(coord);
            let fields = self.store.hash_get_all(&key).await?;
            if fields.is_empty() || fields.get("owner_id").map(String::as_str) != Some(user_id) {
                // Lost to capture since the set was read.
                continue;
            }
            match (&tag, &color) {
                (Some(tag), Some(color)) => {
                    self.store
                        .hash_set(
                            &key,
                            vec![
                                ("owner_alliance_tag".to_string(), tag.clone()),
                                ("owner_alliance_color".to_string(), color.clone()),
                            ],
                        )
                        .await?;
                }
                _ => {
                    self.store
                        .hash_remove(
                            &key,
                            &[
                                "owner_alliance_tag".to_string(),
                                "owner_alliance_color".to_string(),
                            ],
                        )
                        .await?;
                }
            }
        }

        debug!(user = user_id, tag = ?profile.alliance_tag, "alliance updated");
        Ok(profile)
    }

    // ---- player view ----------------------------------------------------

    /// Current player record; first observation lazily creates it with the
    /// configured starting energy.
    pub async fn get_player(
        &self,
        cancel: &CancelToken,
        user_id: &str,
    ) -> Result<PlayerProfile, WorldError> {
        let user_id = validate_user_id(user_id)?;
        cancel.bail()?;
        let _player_guard = self.player_locks.acquire(&user_id.to_string()).await;
        self.ensure_player(user_id, now_ms()).await
    }

    // ---- spatial queries ------------------------------------------------

    /// Every tile of one chunk, for room subscription sync. Order follows
    /// the chunk set.
    pub async fn get_chunk_tiles(
        &self,
        cancel: &CancelToken,
        cq: f64,
        cr: f64,
    ) -> Result<Vec<Tile>, WorldError> {
        let id = Axial::from_f64(cq, cr)?;
        let chunk = ChunkId { cq: id.q, cr: id.r };
        cancel.bail()?;

        let members = self.store.set_members(&chunk_tiles_key(chunk.cq, chunk.cr)).await?;
        let mut tiles = Vec::with_capacity(members.len());
        for member in members {
            let Some(coord) = parse_coord_member(&member) else {
                continue;
            };
            if let Some(tile) = self.load_tile(coord).await? {
                tiles.push(tile);
            }
        }
        Ok(tiles)
    }


    /// All tiles within `radius` of the center, nearest first (ties by
    /// `(q, r)`). Candidates come from the chunk sets covering the bounding
    /// box.
    pub async fn get_tiles_in_range(
        &self,
        cancel: &CancelToken,
        center_q: f64,
        center_r: f64,
        radius: f64,
    ) -> Result<Vec<Tile>, WorldError> {
        let center = Axial::from_f64(center_q, center_r)?;
        let radius = validate_radius(radius, 0)?;
        cancel.bail()?;

        let cs = self.config.chunk_size;
        let clamp_i32 = |v: i64| v.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        let lo_q = clamp_i32(center.q as i64 - radius as i64).div_euclid(cs);
        let hi_q = clamp_i32(center.q as i64 + radius as i64).div_euclid(cs);
        let lo_r = clamp_i32(center.r as i64 - radius as i64).div_euclid(cs);
        let hi_r = clamp_i32(center.r as i64 + radius as i64).div_euclid(cs);

        let mut hits: Vec<(u32, Tile)> = Vec::new();
        for cq in lo_q..=hi_q {
            for cr in lo_r..=hi_r {
                cancel.bail()?;
                let members = self.store.set_members(&chunk_tiles_key(cq, cr)).await?;
                for member in members {
                    let Some(coord) = parse_coord_member(&member) else {
                        continue;
                    };
                    let distance = center.distance(coord);
                    if distance > radius {
                        continue;
                    }
                    if let Some(tile) = self.load_tile(coord).await? {
                        hits.push((distance, tile));
                    }
                }
            }
        }

        hits.sort_by_key(|(distance, tile)| (*distance, tile.coord.q, tile.coord.r));
        Ok(hits.into_iter().map(|(_, tile)| tile).collect())
    }

    // ---- radar ----------------------------------------------------------

    pub async fn get_radar_summary(
        &self,
        cancel: &CancelToken,
        user_id: &str,
        center_q: f64,
        center_r: f64,
        radius: f64,
    ) -> Result<RadarData, WorldError> {
        let user_id = validate_user_id(user_id)?;
        let center = Axial::from_f64(center_q, center_r)?;
        let radius = validate_radius(radius, 1)?;
        cancel.bail()?;

        // Own bases: set iteration order, stop at the cap.
        let mut player_bases = Vec::new();
        for member in self.store.set_members(&owner_tiles_key(user_id)).await? {
            if player_bases.len() >= self.config.max_radar_base_points {
                break;
            }
            if let Some(coord) = parse_coord_member(&member) {
                if center.distance(coord) <= radius {
                    player_bases.push(coord);
                }
            }
        }

        cancel.bail()?;
        let mut nexus_cores = Vec::new();
        for member in self.store.set_members(POI_INDEX).await? {
            if nexus_cores.len() >= self.config.max_radar_nexus_points {
                break;
            }
            let Some(coord) = parse_coord_member(&member) else {
                continue;
            };
            if center.distance(coord) > radius {
                continue;
            }
            if let Some(tile) = self.load_tile(coord).await? {
                nexus_cores.push(NexusPoint {
                    coord,
                    level: tile.level,
                });
            }
        }

        cancel.bail()?;
        let cs = self.config.chunk_size;
        let reach = radius.saturating_add(cs as u32);
        let mut hotspots: Vec<Hotspot> = Vec::new();
        for (field, raw) in self.store.hash_get_all(CHUNK_ACTIVITY).await? {
            let Some(chunk) = ChunkId::parse_field(&field) else {
                continue;
            };
            let activity = raw.parse::<i64>().unwrap_or(0);
            if activity <= 0 {
                continue;
            }
            let chunk_center = chunk.center(cs);
            if center.distance(chunk_center) <= reach {
                hotspots.push(Hotspot {
                    coord: chunk_center,
                    activity,
                });
            }
        }
        hotspots.sort_by_key(|h| (std::cmp::Reverse(h.activity), h.coord.q, h.coord.r));
        hotspots.truncate(self.config.max_radar_hotspots);

        Ok(RadarData {
            player_bases,
            nexus_cores,
            hotspots,
        })
    }

    // ---- leaderboard ----------------------------------------------------

    /// Top players by owned-tile count. `limit` defaults to the configured
    /// entry count and is clamped to `[1, 100]`.
    pub async fn get_leaderboard(
        &self,
        cancel: &CancelToken,
        limit: Option<i64>,
    ) -> Result<Vec<LeaderboardEntry>, WorldError> {
        let limit = limit
            .unwrap_or(self.config.max_leaderboard_entries)
            .clamp(1, 100);
        cancel.bail()?;

        let ranked = self
            .store
            .zset_range_with_scores(LEADERBOARD_TILES, 0, limit - 1, true)
            .await?;

        let mut entries = Vec::with_capacity(ranked.len());
        for (member, score) in ranked {
            if member.trim().is_empty() || score <= 0.0 {
                continue;
            }
            cancel.bail()?;
            let key = player_key(&member);
            let map = self.store.hash_get_all(&key).await?;
            let entry = if map.is_empty() {
                LeaderboardEntry {
                    user_id: member.clone(),
                    display_name: member,
                    alliance_tag: None,
                    alliance_color: None,
                    score: score.floor() as i64,
                }
            } else {
                let profile = PlayerProfile::from_fields(&member, &key, &map)?;
                LeaderboardEntry {
                    user_id: profile.user_id,
                    display_name: profile.display_name,
                    alliance_tag: profile.alliance_tag,
                    alliance_color: profile.alliance_color,
                    score: score.floor() as i64,
                }
            };
            entries.push(entry);
        }
        Ok(entries)
    }
}
