//! End-to-end scenarios driven through the public engine API, with the
//! in-process store standing in for Redis.

use hexhold::store::{tile_key, KvStore, LEADERBOARD_TILES};
use hexhold::{
    Axial, CancelToken, ClaimOutcome, MemoryKv, MemorySink, WorldConfig, WorldEngine,
};

fn engine_with(config: WorldConfig) -> (WorldEngine<MemoryKv, MemorySink>, MemoryKv) {
    let kv = MemoryKv::new();
    (WorldEngine::new(kv.clone(), MemorySink::new(), config), kv)
}

async fn set_tile_fields(kv: &MemoryKv, coord: Axial, fields: &[(&str, &str)]) {
    kv.hash_set(
        &tile_key(coord),
        fields
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect(),
    )
    .await
    .unwrap();
}

async fn player_energy(kv: &MemoryKv, user: &str) -> f64 {
    kv.hash_get_all(&format!("player:{user}"))
        .await
        .unwrap()
        .get("energy")
        .expect("player record")
        .parse()
        .unwrap()
}

#[tokio::test]
async fn free_claim() {
    let (engine, _) = engine_with(WorldConfig::default());
    let cancel = CancelToken::none();

    let outcome = engine.claim(&cancel, "player-a", 2.0, -1.0).await.unwrap();
    let success = outcome.claimed().expect("claim commits");
    assert_eq!(success.energy_cost, 10.0);
    assert_eq!(success.energy_after, 90.0);
    assert!(success.created);
    assert_eq!(success.tile.owner_id.as_deref(), Some("player-a"));
}

#[tokio::test]
async fn hostile_capture_cost_scales_with_level() {
    let mut config = WorldConfig::default();
    config.initial_player_energy = 200.0;
    let (engine, kv) = engine_with(config);
    let cancel = CancelToken::none();

    engine.claim(&cancel, "player-a", 3.0, -1.0).await.unwrap();
    set_tile_fields(&kv, Axial::new(3, -1), &[("level", "3")]).await;

    let outcome = engine.claim(&cancel, "player-b", 3.0, -1.0).await.unwrap();
    let success = outcome.claimed().expect("capture commits");
    assert!(success.captured);
    assert_eq!(success.energy_cost, 150.0);
    assert_eq!(success.energy_after, 50.0);
}

#[tokio::test]
async fn claim_out_of_range_reports_nearest_owned_tile() {
    let mut config = WorldConfig::default();
    config.max_claim_distance_from_owned = 2;
    let (engine, _) = engine_with(config);
    let cancel = CancelToken::none();

    engine.claim(&cancel, "player-a", 0.0, 0.0).await.unwrap();
    let outcome = engine.claim(&cancel, "player-a", 8.0, 0.0).await.unwrap();
    assert_eq!(
        outcome,
        ClaimOutcome::OutOfRange {
            max_distance: 2,
            nearest_distance: Some(8),
        }
    );
}

#[tokio::test]
async fn leaderboard_reflects_capture() {
    let (engine, _) = engine_with(WorldConfig::default());
    let cancel = CancelToken::none();

    engine.claim(&cancel, "player-a", 0.0, 0.0).await.unwrap();
    engine.claim(&cancel, "player-a", 1.0, 0.0).await.unwrap();
    engine.claim(&cancel, "player-b", 2.0, 0.0).await.unwrap();
    engine.claim(&cancel, "player-b", 1.0, 0.0).await.unwrap();

    let entries = engine.get_leaderboard(&cancel, None).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].user_id, "player-b");
    assert_eq!(entries[0].score, 2);
    assert_eq!(entries[1].user_id, "player-a");
    assert_eq!(entries[1].score, 1);
}

#[tokio::test]
async fn allied_neighbors_boost_each_others_generation() {
    let mut config = WorldConfig::default();
    config.initial_player_energy = 500.0;
    let (engine, kv) = engine_with(config);
    let cancel = CancelToken::none();

    engine.claim(&cancel, "player-a", 0.0, 0.0).await.unwrap();
    engine.claim(&cancel, "player-b", 1.0, 0.0).await.unwrap();
    engine.set_alliance_tag(&cancel, "player-a", Some("FOX")).await.unwrap();
    engine.set_alliance_tag(&cancel, "player-b", Some("FOX")).await.unwrap();

    for coord in [Axial::new(0, 0), Axial::new(1, 0)] {
        set_tile_fields(
            &kv,
            coord,
            &[("energy", "0"), ("integrity", "100"), ("last_update", "0")],
        )
        .await;
    }

    engine.recharge_tick(&cancel, 60_000).await.unwrap();

    // 500 initial - 10 claim + 60 s × 1/s × 1.05 bonus = 553, for both.
    assert_eq!(player_energy(&kv, "player-a").await, 553.0);
    assert_eq!(player_energy(&kv, "player-b").await, 553.0);
}

#[tokio::test]
async fn integrity_floor_stops_generation() {
    let (engine, kv) = engine_with(WorldConfig::default());
    let cancel = CancelToken::none();

    engine.claim(&cancel, "player-a", 0.0, 0.0).await.unwrap();
    set_tile_fields(
        &kv,
        Axial::new(0, 0),
        &[("energy", "0"), ("integrity", "1"), ("last_update", "0")],
    )
    .await;

    engine.recharge_tick(&cancel, 60_000).await.unwrap();
    let tile = engine.get_tiles_in_range(&cancel, 0.0, 0.0, 0.0).await.unwrap().remove(0);
    assert_eq!(tile.integrity, 0.0);
    assert_eq!(tile.energy, 60.0);
    let energy_after_first = player_energy(&kv, "player-a").await;

    engine.recharge_tick(&cancel, 180_000).await.unwrap();
    let tile = engine.get_tiles_in_range(&cancel, 0.0, 0.0, 0.0).await.unwrap().remove(0);
    assert_eq!(tile.integrity, 0.0);
    assert_eq!(tile.energy, 60.0);
    assert_eq!(player_energy(&kv, "player-a").await, energy_after_first);
}

#[tokio::test]
async fn snapshot_pipeline_round_trips_the_world() {
    let (engine, _) = engine_with(WorldConfig::default());
    let cancel = CancelToken::none();

    engine.claim(&cancel, "player-a", 0.0, 0.0).await.unwrap();
    engine.register_nexus(&cancel, 2.0, 2.0, 3).await.unwrap();
    engine.set_alliance_tag(&cancel, "player-a", Some("FOX")).await.unwrap();

    let total = engine.snapshot_flush(&cancel).await.unwrap();
    assert_eq!(total, 2);
}

#[tokio::test]
async fn scores_never_go_negative_under_churn() {
    let mut config = WorldConfig::default();
    config.initial_player_energy = 1_000.0;
    let (engine, kv) = engine_with(config);
    let cancel = CancelToken::none();

    engine.claim(&cancel, "player-a", 0.0, 0.0).await.unwrap();
    engine.claim(&cancel, "player-b", 0.0, 0.0).await.unwrap();
    engine.claim(&cancel, "player-a", 0.0, 0.0).await.unwrap();
    engine.claim(&cancel, "player-b", 0.0, 0.0).await.unwrap();

    let scores = kv
        .zset_range_with_scores(LEADERBOARD_TILES, 0, -1, false)
        .await
        .unwrap();
    assert!(scores.iter().all(|(_, score)| *score >= 0.0));
    let total: f64 = scores.iter().map(|(_, score)| score).sum();
    assert_eq!(total, 1.0); // exactly one owned tile in the world
}

#[tokio::test]
async fn energy_and_integrity_stay_bounded() {
    let (engine, kv) = engine_with(WorldConfig::default());
    let cancel = CancelToken::none();

    engine.claim(&cancel, "player-a", 0.0, 0.0).await.unwrap();
    engine.claim(&cancel, "player-a", 1.0, 0.0).await.unwrap();
    engine.register_nexus(&cancel, 0.0, 1.0, 2).await.unwrap();
    // Extremes: a nearly-dead tile and one already at the energy cap.
    set_tile_fields(
        &kv,
        Axial::new(0, 0),
        &[("energy", "99.5"), ("integrity", "0.01"), ("last_update", "0")],
    )
    .await;
    set_tile_fields(
        &kv,
        Axial::new(1, 0),
        &[("energy", "100"), ("integrity", "100"), ("last_update", "0")],
    )
    .await;

    engine.recharge_tick(&cancel, 3_600_000).await.unwrap();
    engine.repair(&cancel, "player-a", 0.0, 0.0).await.unwrap();
    engine.recharge_tick(&cancel, 7_200_000).await.unwrap();

    let tiles = engine.get_tiles_in_range(&cancel, 0.0, 0.0, 4.0).await.unwrap();
    assert_eq!(tiles.len(), 3);
    for tile in tiles {
        assert!((0.0..=100.0).contains(&tile.energy), "energy {}", tile.energy);
        assert!((0.0..=100.0).contains(&tile.integrity), "integrity {}", tile.integrity);
        assert!(tile.level >= 1);
    }
}
