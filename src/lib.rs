// Library interface for the world engine, shared by the server binary and
// the integration tests.

pub mod config;
pub mod error;
pub mod hex;
pub mod loops;
pub mod snapshot;
pub mod store;
pub mod world;

// Re-export commonly used types for convenience
pub use config::WorldConfig;
pub use error::{CancelToken, Shutdown, StoreError, WorldError};
pub use hex::Axial;
pub use loops::{FaultSink, LoggingFaultSink, LoopHandles};
pub use snapshot::{MemorySink, SnapshotSink, TileRow};
pub use store::{KvStore, MemoryKv};
pub use world::{
    ClaimOutcome, ClaimSuccess, LeaderboardEntry, PlayerProfile, RadarData, RepairOutcome, Tile,
    TileKind, WorldEngine,
};
