//! Engine-facing configuration.

use std::env;
use std::str::FromStr;

use tracing::warn;

/// Tunables for the world engine and its background loops.
///
/// Defaults match the live game balance; any field can be overridden through
/// a `HEXHOLD_*` environment variable (see [`WorldConfig::from_env`]).
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Side length of a spatial chunk, in axial units.
    pub chunk_size: i32,
    pub max_tile_energy: f64,
    pub max_player_energy: f64,
    pub initial_tile_energy: f64,
    pub initial_tile_integrity: f64,
    pub initial_tile_level: u32,
    pub initial_player_energy: f64,
    pub energy_recharge_per_second: f64,
    pub integrity_decay_per_minute: f64,
    pub free_claim_cost: f64,
    /// Hostile claim cost is `tile level × this`.
    pub hostile_claim_cost_multiplier: f64,
    pub repair_cost_energy: f64,
    pub repair_integrity_gain: f64,
    pub max_claim_distance_from_owned: u32,
    pub alliance_neighbor_bonus_multiplier: f64,
    pub max_leaderboard_entries: i64,
    pub max_radar_nexus_points: usize,
    pub max_radar_base_points: usize,
    pub max_radar_hotspots: usize,
    pub recharge_interval_ms: u64,
    pub snapshot_interval_ms: u64,
    pub snapshot_batch_size: usize,
    /// How often the recharge sweep halves chunk activity counters.
    pub activity_decay_interval_ms: i64,
    /// Shard count for the keyed lock maps.
    pub lock_shards: usize,
    /// Page size for cursor scans over the tile index.
    pub scan_count: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64,
            max_tile_energy: 100.0,
            max_player_energy: 1000.0,
            initial_tile_energy: 100.0,
            initial_tile_integrity: 100.0,
            initial_tile_level: 1,
            initial_player_energy: 100.0,
            energy_recharge_per_second: 1.0,
            integrity_decay_per_minute: 1.0,
            free_claim_cost: 10.0,
            hostile_claim_cost_multiplier: 50.0,
            repair_cost_energy: 5.0,
            repair_integrity_gain: 20.0,
            max_claim_distance_from_owned: 8,
            alliance_neighbor_bonus_multiplier: 1.05,
            max_leaderboard_entries: 10,
            max_radar_nexus_points: 64,
            max_radar_base_points: 64,
            max_radar_hotspots: 32,
            recharge_interval_ms: 1_000,
            snapshot_interval_ms: 300_000,
            snapshot_batch_size: 1_000,
            activity_decay_interval_ms: 60_000,
            lock_shards: 64,
            scan_count: 512,
        }
    }
}

fn env_override<T: FromStr + Copy>(slot: &mut T, var: &str) {
    if let Ok(raw) = env::var(var) {
        match raw.parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!(var, raw, "ignoring unparsable config override"),
        }
    }
}

impl WorldConfig {
    /// Defaults with `HEXHOLD_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        env_override(&mut cfg.chunk_size, "HEXHOLD_CHUNK_SIZE");
        env_override(&mut cfg.max_tile_energy, "HEXHOLD_MAX_TILE_ENERGY");
        env_override(&mut cfg.max_player_energy, "HEXHOLD_MAX_PLAYER_ENERGY");
        env_override(&mut cfg.initial_tile_energy, "HEXHOLD_INITIAL_TILE_ENERGY");
        env_override(&mut cfg.initial_tile_integrity, "HEXHOLD_INITIAL_TILE_INTEGRITY");
        env_override(&mut cfg.initial_player_energy, "HEXHOLD_INITIAL_PLAYER_ENERGY");
        env_override(
            &mut cfg.energy_recharge_per_second,
            "HEXHOLD_ENERGY_RECHARGE_PER_SECOND",
        );
        env_override(
            &mut cfg.integrity_decay_per_minute,
            "HEXHOLD_INTEGRITY_DECAY_PER_MINUTE",
        );
        env_override(&mut cfg.free_claim_cost, "HEXHOLD_FREE_CLAIM_COST");
        env_override(
            &mut cfg.hostile_claim_cost_multiplier,
            "HEXHOLD_HOSTILE_CLAIM_COST_MULTIPLIER",
        );
        env_override(&mut cfg.repair_cost_energy, "HEXHOLD_REPAIR_COST_ENERGY");
        env_override(&mut cfg.repair_integrity_gain, "HEXHOLD_REPAIR_INTEGRITY_GAIN");
        env_override(
            &mut cfg.max_claim_distance_from_owned,
            "HEXHOLD_MAX_CLAIM_DISTANCE_FROM_OWNED",
        );
        env_override(
            &mut cfg.alliance_neighbor_bonus_multiplier,
            "HEXHOLD_ALLIANCE_NEIGHBOR_BONUS_MULTIPLIER",
        );
        env_override(&mut cfg.recharge_interval_ms, "HEXHOLD_RECHARGE_INTERVAL_MS");
        env_override(&mut cfg.snapshot_interval_ms, "HEXHOLD_SNAPSHOT_INTERVAL_MS");
        env_override(&mut cfg.snapshot_batch_size, "HEXHOLD_SNAPSHOT_BATCH_SIZE");
        env_override(
            &mut cfg.activity_decay_interval_ms,
            "HEXHOLD_ACTIVITY_DECAY_INTERVAL_MS",
        );
        cfg
    }
}
