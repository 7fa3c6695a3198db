//! Sync scheduling: periodic timer, debounced local changes, connectivity
//! events and manual requests, all funnelled through one background loop.

use async_trait::async_trait;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use notesync_common::{Error, Result};

use crate::engine::{SyncEngine, SyncOutcome, TriggerOptions};

/// What the scheduler drives.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    async fn sync(&self, options: TriggerOptions) -> Result<SyncOutcome>;

    async fn connectivity_restored(&self) -> Result<Vec<SyncOutcome>>;

    fn connectivity_lost(&self);
}

#[async_trait]
impl SyncTarget for SyncEngine {
    async fn sync(&self, options: TriggerOptions) -> Result<SyncOutcome> {
        self.trigger_sync(options).await
    }

    async fn connectivity_restored(&self) -> Result<Vec<SyncOutcome>> {
        self.on_connectivity_restored().await
    }

    fn connectivity_lost(&self) {
        self.on_connectivity_lost()
    }
}

/// Events consumed by the scheduler loop.
#[derive(Debug)]
pub enum SchedulerEvent {
    /// A record was saved locally. Rearms the debounce timer.
    LocalChange,
    Online,
    Offline,
    Manual(TriggerOptions, oneshot::Sender<Result<SyncOutcome>>),
    Shutdown,
}

/// Timing of automatic triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// `None` disables the periodic timer.
    pub periodic: Option<Duration>,
    pub debounce: Duration,
}

impl From<&crate::config::SyncConfig> for ScheduleConfig {
    fn from(config: &crate::config::SyncConfig) -> Self {
        Self {
            periodic: config.periodic_interval(),
            debounce: config.debounce(),
        }
    }
}

/// Request side of the scheduler. Cheap to clone.
#[derive(Clone)]
pub struct SyncScheduler {
    event_tx: mpsc::Sender<SchedulerEvent>,
}

impl SyncScheduler {
    /// Create a scheduler and the handle that runs its loop.
    pub fn new(config: ScheduleConfig) -> (Self, SyncSchedulerHandle) {
        let (event_tx, event_rx) = mpsc::channel(100);
        (
            Self { event_tx },
            SyncSchedulerHandle { config, event_rx },
        )
    }

    async fn send(&self, event: SchedulerEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| Error::InvalidInput("Scheduler not running".to_string()))
    }

    /// Report a local save.
    pub async fn notify_change(&self) -> Result<()> {
        self.send(SchedulerEvent::LocalChange).await
    }

    pub async fn notify_online(&self) -> Result<()> {
        self.send(SchedulerEvent::Online).await
    }

    pub async fn notify_offline(&self) -> Result<()> {
        self.send(SchedulerEvent::Offline).await
    }

    /// Run a sync through the loop and wait for its outcome.
    pub async fn request_sync(&self, options: TriggerOptions) -> Result<SyncOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SchedulerEvent::Manual(options, reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| Error::InvalidInput("Scheduler stopped before replying".to_string()))?
    }

    pub async fn shutdown(&self) {
        let _ = self.event_tx.send(SchedulerEvent::Shutdown).await;
    }
}

/// Owns the event receiver. Consumed by [`SyncSchedulerHandle::run`].
pub struct SyncSchedulerHandle {
    config: ScheduleConfig,
    event_rx: mpsc::Receiver<SchedulerEvent>,
}

impl SyncSchedulerHandle {
    /// Run until shutdown or until every [`SyncScheduler`] is dropped.
    ///
    /// Events are handled one at a time, so an `Online` event drains the
    /// offline queue before the next timer fires.
    pub async fn run<T>(mut self, target: Arc<T>)
    where
        T: SyncTarget + ?Sized,
    {
        let mut periodic = self.config.periodic.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut debounce_deadline: Option<Instant> = None;

        info!("Sync scheduler started");

        loop {
            tokio::select! {
                event = self.event_rx.recv() => match event {
                    None | Some(SchedulerEvent::Shutdown) => {
                        info!("Sync scheduler shutting down");
                        break;
                    }
                    Some(SchedulerEvent::LocalChange) => {
                        debounce_deadline = Some(Instant::now() + self.config.debounce);
                    }
                    Some(SchedulerEvent::Online) => {
                        debug!("Connectivity restored");
                        match target.connectivity_restored().await {
                            Ok(outcomes) => {
                                for outcome in outcomes {
                                    info!("Reconnect sync: {}", outcome);
                                }
                            }
                            Err(e) => error!("Reconnect sync failed: {}", e),
                        }
                    }
                    Some(SchedulerEvent::Offline) => {
                        debug!("Connectivity lost");
                        target.connectivity_lost();
                    }
                    Some(SchedulerEvent::Manual(options, reply)) => {
                        let result = target.sync(options).await;
                        let _ = reply.send(result);
                    }
                },

                _ = Self::wait_for_tick(&mut periodic) => {
                    debug!("Triggering periodic sync");
                    Self::run_silent(target.as_ref(), "Periodic").await;
                }

                _ = Self::wait_for_deadline(debounce_deadline) => {
                    debounce_deadline = None;
                    debug!("Local changes settled, triggering sync");
                    Self::run_silent(target.as_ref(), "Debounced").await;
                }
            }
        }
    }

    async fn run_silent<T: SyncTarget + ?Sized>(target: &T, label: &str) {
        match target.sync(TriggerOptions::silent()).await {
            Ok(outcome) => info!("{} sync: {}", label, outcome),
            Err(e) => error!("{} sync failed: {}", label, e),
        }
    }

    async fn wait_for_tick(periodic: &mut Option<Interval>) {
        match periodic {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => pending::<()>().await,
        }
    }

    async fn wait_for_deadline(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl SyncTarget for Recorder {
        async fn sync(&self, options: TriggerOptions) -> Result<SyncOutcome> {
            self.record(if options.is_manual { "manual" } else { "silent" });
            Ok(SyncOutcome::UpToDate)
        }

        async fn connectivity_restored(&self) -> Result<Vec<SyncOutcome>> {
            self.record("online");
            Ok(vec![SyncOutcome::UpToDate])
        }

        fn connectivity_lost(&self) {
            self.record("offline");
        }
    }

    fn config(periodic: Option<u64>) -> ScheduleConfig {
        ScheduleConfig {
            periodic: periodic.map(Duration::from_secs),
            debounce: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_manual_request_replies() {
        let (scheduler, handle) = SyncScheduler::new(config(None));
        let recorder = Arc::new(Recorder::default());
        let task = tokio::spawn(handle.run(recorder.clone()));

        let outcome = scheduler.request_sync(TriggerOptions::manual()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::UpToDate);
        assert_eq!(recorder.calls(), vec!["manual"]);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_collapses_bursts() {
        let (scheduler, handle) = SyncScheduler::new(config(None));
        let recorder = Arc::new(Recorder::default());
        let task = tokio::spawn(handle.run(recorder.clone()));

        for _ in 0..5 {
            scheduler.notify_change().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert!(recorder.calls().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(recorder.calls(), vec!["silent"]);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_ticks() {
        let (scheduler, handle) = SyncScheduler::new(config(Some(300)));
        let recorder = Arc::new(Recorder::default());
        let task = tokio::spawn(handle.run(recorder.clone()));

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(recorder.calls().is_empty());

        tokio::time::sleep(Duration::from_secs(302)).await;
        assert_eq!(recorder.calls(), vec!["silent", "silent"]);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_event_runs_before_periodic_tick() {
        let (scheduler, handle) = SyncScheduler::new(config(Some(60)));
        let recorder = Arc::new(Recorder::default());
        let task = tokio::spawn(handle.run(recorder.clone()));

        scheduler.notify_offline().await.unwrap();
        scheduler.notify_online().await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(recorder.calls(), vec!["offline", "online", "silent"]);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_senders_dropped() {
        let (scheduler, handle) = SyncScheduler::new(config(None));
        let task = tokio::spawn(handle.run(Arc::new(Recorder::default())));

        drop(scheduler);
        task.await.unwrap();
    }
}
