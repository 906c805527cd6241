//! Result records the engine hands to the transport layer.
//!
//! Rule violations are outcome variants, not errors: the transport turns
//! each variant into a client-facing event and, for successes, fans the new
//! tile state out to the chunk's room.

use serde::{Deserialize, Serialize};

use crate::hex::Axial;
use crate::world::state::{ChunkId, Tile};

/// Successful claim commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSuccess {
    pub tile: Tile,
    /// Chunk whose subscribers need the update.
    pub chunk: ChunkId,
    /// A new tile hash was created.
    pub created: bool,
    /// Ownership transferred from another player.
    pub captured: bool,
    pub previous_owner: Option<String>,
    pub energy_cost: f64,
    /// Claimer's energy immediately after the debit.
    pub energy_after: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClaimOutcome {
    Claimed(ClaimSuccess),
    OutOfRange {
        max_distance: u32,
        /// Minimum hex distance to any owned tile; `None` if none owned.
        nearest_distance: Option<u32>,
    },
    InsufficientEnergy {
        required_energy: f64,
        player_energy: f64,
    },
}

impl ClaimOutcome {
    /// The success payload, if this claim committed.
    pub fn claimed(&self) -> Option<&ClaimSuccess> {
        match self {
            ClaimOutcome::Claimed(success) => Some(success),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairSuccess {
    pub tile: Tile,
    pub chunk: ChunkId,
    pub energy_cost: f64,
    pub energy_after: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RepairOutcome {
    Repaired(RepairSuccess),
    TileNotFound,
    NotOwner { owner_id: Option<String> },
    InsufficientEnergy {
        required_energy: f64,
        player_energy: f64,
    },
}

impl RepairOutcome {
    pub fn repaired(&self) -> Option<&RepairSuccess> {
        match self {
            RepairOutcome::Repaired(success) => Some(success),
            _ => None,
        }
    }
}

/// Nexus POI visible on radar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NexusPoint {
    pub coord: Axial,
    pub level: u32,
}

/// Chunk with recent claim/repair/capture activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotspot {
    /// Chunk center in axial coordinates.
    pub coord: Axial,
    pub activity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarData {
    pub player_bases: Vec<Axial>,
    pub nexus_cores: Vec<NexusPoint>,
    pub hotspots: Vec<Hotspot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub display_name: String,
    pub alliance_tag: Option<String>,
    pub alliance_color: Option<String>,
    /// Owned-tile count, floored to an integer.
    pub score: i64,
}

/// What one recharge sweep did, for logging and fan-out accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub scanned: usize,
    pub updated: usize,
    pub owners_credited: usize,
    pub energy_generated: f64,
    /// Chunk activity counters were decayed during this sweep.
    pub activity_decayed: bool,
}
