//! Scheduler driving a real engine on a paused clock.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use notesync_common::UserId;
use notesync_replica::{MemoryRecordStore, Replica};
use notesync_snapshot::Entry;
use notesync_storage::MemoryProvider;
use notesync_sync::{
    MemoryMetadataStore, ScheduleConfig, StaticNetwork, SyncConfig, SyncEngine, SyncOutcome,
    SyncScheduler, TriggerOptions,
};

struct Harness {
    provider: Arc<MemoryProvider>,
    replica: Arc<Replica<MemoryRecordStore>>,
    network: Arc<StaticNetwork>,
    engine: Arc<SyncEngine>,
    scheduler: SyncScheduler,
    task: tokio::task::JoinHandle<()>,
}

fn user() -> UserId {
    UserId::new("user-1").unwrap()
}

fn start(periodic_secs: Option<u64>) -> Harness {
    let config = SyncConfig {
        periodic_interval_secs: periodic_secs,
        settle_delay_ms: None,
        ..SyncConfig::default()
    };
    let provider = Arc::new(MemoryProvider::new());
    let replica = Arc::new(Replica::new(MemoryRecordStore::new()));
    let network = Arc::new(StaticNetwork::online());
    let engine = Arc::new(SyncEngine::new(
        user(),
        provider.clone(),
        replica.clone(),
        Arc::new(MemoryMetadataStore::new()),
        network.clone(),
        config.clone(),
    ));

    let (scheduler, handle) = SyncScheduler::new(ScheduleConfig::from(&config));
    let task = tokio::spawn(handle.run(engine.clone()));

    Harness {
        provider,
        replica,
        network,
        engine,
        scheduler,
        task,
    }
}

impl Harness {
    async fn save(&self, key: &str, title: &str) {
        std::thread::sleep(Duration::from_millis(2));
        let now = Utc::now();
        self.replica
            .save_entry(&user(), Entry::new(key, title, "body", now), now)
            .await
            .unwrap();
    }

    async fn stop(self) {
        self.scheduler.shutdown().await;
        self.task.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_saves_triggers_one_sync() {
    let h = start(None);

    for i in 0..4 {
        h.save("e1", &format!("draft {}", i)).await;
        h.scheduler.notify_change().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    assert_eq!(h.provider.metadata_reads(), 0);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.provider.metadata_reads(), 1);
    assert_eq!(h.provider.upload_count(), 1);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_queued_request_runs_before_periodic_sync() {
    let h = start(Some(60));
    h.save("e1", "offline edit").await;
    h.network.set_online(false);

    let outcome = h
        .scheduler
        .request_sync(TriggerOptions::manual())
        .await
        .unwrap();
    assert!(matches!(outcome, SyncOutcome::Queued(_)));

    h.network.set_online(true);
    h.scheduler.notify_online().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.engine.pending_queue_count().await.unwrap(), 0);
    assert_eq!(h.provider.upload_count(), 1);
    assert_eq!(h.provider.metadata_reads(), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.provider.metadata_reads(), 2);
    assert_eq!(h.provider.upload_count(), 1);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_offline_event_updates_state() {
    let h = start(None);
    assert!(h.engine.state().is_online);

    h.network.set_online(false);
    h.scheduler.notify_offline().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!h.engine.state().is_online);

    h.stop().await;
}
