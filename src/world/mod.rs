pub mod alliance;
pub mod engine;
pub mod locks;
pub mod results;
pub mod state;

mod tick;

pub use engine::WorldEngine;
pub use results::{
    ClaimOutcome, ClaimSuccess, Hotspot, LeaderboardEntry, NexusPoint, RadarData, RepairOutcome,
    RepairSuccess, TickReport,
};
pub use state::{ChunkId, PlayerProfile, Tile, TileKind};
