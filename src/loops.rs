//! Background schedulers: the recharge tick and the snapshot flush.
//!
//! Both run as independent cooperative tasks. Failures go to the injected
//! [`FaultSink`] and never stop future runs; cancellation ends a loop after
//! the in-flight run returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::error::{CancelToken, WorldError};
use crate::snapshot::SnapshotSink;
use crate::store::KvStore;
use crate::world::engine::{now_ms, WorldEngine};

/// Receives background-job failures. The engine never retries internally;
/// the sink decides whether to page, count or just log.
pub trait FaultSink: Send + Sync + 'static {
    fn report(&self, job: &'static str, err: &WorldError);
}

/// Default sink: structured log and move on.
pub struct LoggingFaultSink;

impl FaultSink for LoggingFaultSink {
    fn report(&self, job: &'static str, err: &WorldError) {
        error!(job, error = %err, "background job failed");
    }
}

/// Join handles for the two scheduler tasks.
pub struct LoopHandles {
    pub recharge: JoinHandle<()>,
    pub snapshot: JoinHandle<()>,
}

impl LoopHandles {
    /// Wait for both loops to wind down after cancellation.
    pub async fn join(self) {
        let _ = self.recharge.await;
        let _ = self.snapshot.await;
    }
}

/// Start the recharge and snapshot loops for `engine`.
pub fn spawn<S: KvStore, P: SnapshotSink>(
    engine: Arc<WorldEngine<S, P>>,
    faults: Arc<dyn FaultSink>,
    token: CancelToken,
) -> LoopHandles {
    let recharge = {
        let engine = engine.clone();
        let faults = faults.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(engine.config().recharge_interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match engine.recharge_tick(&token, now_ms()).await {
                            Ok(_) => {}
                            Err(WorldError::Cancelled) => break,
                            Err(err) => faults.report("recharge", &err),
                        }
                    }
                }
            }
            info!("recharge loop stopped");
        })
    };

    let snapshot = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(engine.config().snapshot_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The immediate first tick would flush an empty world; skip it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match engine.snapshot_flush(&token).await {
                        Ok(_) => {}
                        Err(WorldError::Cancelled) => break,
                        Err(err) => faults.report("snapshot", &err),
                    }
                }
            }
        }
        info!("snapshot loop stopped");
    });

    LoopHandles { recharge, snapshot }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;
    use crate::error::{Shutdown, StoreError};
    use crate::snapshot::MemorySink;
    use crate::store::{FieldMap, MemoryKv};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<&'static str>>);

    impl FaultSink for RecordingSink {
        fn report(&self, job: &'static str, _err: &WorldError) {
            self.0.lock().unwrap().push(job);
        }
    }

    /// Delegates to `MemoryKv` but fails the first few index scans.
    #[derive(Clone)]
    struct FlakyKv {
        inner: MemoryKv,
        scan_failures: Arc<AtomicUsize>,
    }

    impl KvStore for FlakyKv {
        async fn hash_get_all(&self, key: &str) -> Result<FieldMap, StoreError> {
            self.inner.hash_get_all(key).await
        }
        async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<usize, StoreError> {
            self.inner.hash_set(key, fields).await
        }
        async fn hash_remove(&self, key: &str, fields: &[String]) -> Result<usize, StoreError> {
            self.inner.hash_remove(key, fields).await
        }
        async fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
            self.inner.hash_incr_by(key, field, delta).await
        }
        async fn hash_set_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
            self.inner.hash_set_nx(key, field, value).await
        }
        async fn zset_incr_by(&self, key: &str, delta: f64, member: &str) -> Result<f64, StoreError> {
            self.inner.zset_incr_by(key, delta, member).await
        }
        async fn zset_range_with_scores(
            &self,
            key: &str,
            start: i64,
            stop: i64,
            reverse: bool,
        ) -> Result<Vec<(String, f64)>, StoreError> {
            self.inner.zset_range_with_scores(key, start, stop, reverse).await
        }
        async fn set_add(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
            self.inner.set_add(key, members).await
        }
        async fn set_remove(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
            self.inner.set_remove(key, members).await
        }
        async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
            self.inner.set_members(key).await
        }
        async fn set_scan(
            &self,
            key: &str,
            cursor: &str,
            count: usize,
        ) -> Result<(String, Vec<String>), StoreError> {
            if self.scan_failures.load(Ordering::SeqCst) > 0 {
                self.scan_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Backend("injected scan failure".to_string()));
            }
            self.inner.set_scan(key, cursor, count).await
        }
    }

    #[tokio::test]
    async fn loops_run_and_stop_on_shutdown() {
        let mut config = WorldConfig::default();
        config.recharge_interval_ms = 5;
        config.snapshot_interval_ms = 5;

        let kv = MemoryKv::new();
        let sink = MemorySink::new();
        let engine = Arc::new(WorldEngine::new(kv, sink.clone(), config));
        let cancel = CancelToken::none();
        engine.claim(&cancel, "player-a", 0.0, 0.0).await.unwrap();

        let shutdown = Shutdown::new();
        let handles = spawn(
            engine,
            Arc::new(LoggingFaultSink),
            shutdown.token(),
        );

        tokio::time::sleep(Duration::from_millis(40)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handles.join())
            .await
            .expect("loops must stop after shutdown");

        // The snapshot loop flushed the claimed tile at least once.
        assert!(!sink.rows().is_empty());
    }

    #[tokio::test]
    async fn faults_are_reported_and_loops_keep_running() {
        let mut config = WorldConfig::default();
        config.recharge_interval_ms = 5;
        config.snapshot_interval_ms = 60_000; // keep the snapshot loop quiet

        let kv = FlakyKv {
            inner: MemoryKv::new(),
            scan_failures: Arc::new(AtomicUsize::new(2)),
        };
        let sink = MemorySink::new();
        let engine = Arc::new(WorldEngine::new(kv.clone(), sink, config));
        let cancel = CancelToken::none();
        engine.claim(&cancel, "player-a", 0.0, 0.0).await.unwrap();

        let faults = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let shutdown = Shutdown::new();
        let handles = spawn(engine.clone(), faults.clone(), shutdown.token());

        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handles.join())
            .await
            .expect("loops must stop after shutdown");

        // Both injected failures surfaced, then the loop recovered and
        // swept the world anyway.
        assert_eq!(*faults.0.lock().unwrap(), vec!["recharge", "recharge"]);
        assert_eq!(kv.scan_failures.load(Ordering::SeqCst), 0);
    }
}
