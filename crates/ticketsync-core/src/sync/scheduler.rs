//! Background scheduling of sync cycles.
//!
//! At most one cycle runs at a time. Triggers that arrive while a cycle is in
//! flight are folded into a single follow-up cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::engine::{CycleRequest, SyncEngine, SyncError};
use super::transport::SyncTransport;

/// Why a cycle was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The periodic timer fired
    Interval,
    /// Connectivity came back
    Reconnected,
    /// The officer asked for a sync
    Manual,
    /// A record was written locally
    LocalChange,
}

impl Trigger {
    /// Timer and reconnect cycles also pull server changes.
    pub const fn request(self) -> CycleRequest {
        match self {
            Self::Interval | Self::Reconnected => CycleRequest::PULL,
            Self::Manual | Self::LocalChange => CycleRequest::PUSH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new cycle was started
    Started,
    /// Folded into the follow-up of the running cycle
    Coalesced,
    /// Skipped because the device is offline
    Offline,
    /// Skipped because the scheduler was stopped
    Stopped,
}

/// Observable sync state for hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatusSnapshot {
    pub online: bool,
    pub syncing: bool,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    /// Error of the most recent cycle, cleared by the next success
    pub last_error: Option<String>,
    pub unsynced_count: usize,
    pub conflict_count: usize,
    pub failed_count: usize,
}

impl Default for SyncStatusSnapshot {
    fn default() -> Self {
        Self {
            online: true,
            syncing: false,
            last_successful_sync_at: None,
            last_error: None,
            unsynced_count: 0,
            conflict_count: 0,
            failed_count: 0,
        }
    }
}

#[derive(Debug)]
struct SchedulerState {
    stopped: bool,
    online: bool,
    in_flight: bool,
    pending: Option<CycleRequest>,
}

struct Inner<T> {
    engine: SyncEngine<T>,
    state: Mutex<SchedulerState>,
    status: watch::Sender<SyncStatusSnapshot>,
    exchanges: AtomicU64,
    interval: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Runs sync cycles on a timer, on reconnect and on demand.
pub struct SyncScheduler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SyncScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SyncTransport + 'static> SyncScheduler<T> {
    pub fn new(engine: SyncEngine<T>, interval: Duration) -> Self {
        let (status, _) = watch::channel(SyncStatusSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                engine,
                state: Mutex::new(SchedulerState {
                    stopped: false,
                    online: true,
                    in_flight: false,
                    pending: None,
                }),
                status,
                exchanges: AtomicU64::new(0),
                interval: interval.max(Duration::from_millis(1)),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn engine(&self) -> &SyncEngine<T> {
        &self.inner.engine
    }

    /// Start the periodic timer.
    ///
    /// The first tick fires one full interval after start. Calling `start` on a
    /// running scheduler does nothing.
    pub fn start(&self) {
        let mut timer = lock(&self.inner.timer);
        if timer.is_some() {
            return;
        }
        self.inner.state().stopped = false;

        let period = self.inner.interval;
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        *timer = Some(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.trigger(Trigger::Interval);
            }
        }));
        tracing::info!("Sync scheduler started with a {period:?} interval");
    }

    /// Stop the timer and refuse new triggers.
    ///
    /// A cycle already in flight runs to completion; its queued follow-up is
    /// dropped.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.inner.timer).take() {
            handle.abort();
        }
        self.inner.state().stopped = true;
        tracing::info!("Sync scheduler stopped");
    }

    pub fn trigger(&self, trigger: Trigger) -> TriggerOutcome {
        self.inner.trigger(trigger)
    }

    /// Record a connectivity change; coming back online triggers a cycle.
    pub fn set_online(&self, online: bool) -> Option<TriggerOutcome> {
        let was_online = std::mem::replace(&mut self.inner.state().online, online);
        self.inner.status.send_modify(|status| status.online = online);
        if online && !was_online {
            tracing::info!("Connectivity restored");
            Some(self.inner.trigger(Trigger::Reconnected))
        } else {
            None
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatusSnapshot> {
        self.inner.status.subscribe()
    }

    pub fn status(&self) -> SyncStatusSnapshot {
        self.inner.status.borrow().clone()
    }

    /// Number of cycles that reached the server
    pub fn exchanges(&self) -> u64 {
        self.inner.exchanges.load(Ordering::SeqCst)
    }

    /// Re-read counts from the store, e.g. after a local edit.
    pub async fn refresh_status(&self) {
        self.inner.refresh_status().await;
    }
}

impl<T: SyncTransport + 'static> Inner<T> {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        lock(&self.state)
    }

    fn trigger(self: &Arc<Self>, trigger: Trigger) -> TriggerOutcome {
        let request = trigger.request();
        let mut state = self.state();
        if state.stopped {
            return TriggerOutcome::Stopped;
        }
        if !state.online {
            tracing::debug!("Skipping {trigger:?} sync while offline");
            return TriggerOutcome::Offline;
        }
        if state.in_flight {
            state.pending = Some(merge(state.pending, request));
            tracing::debug!("Coalesced {trigger:?} sync into the running cycle");
            return TriggerOutcome::Coalesced;
        }
        state.in_flight = true;
        self.status.send_modify(|status| status.syncing = true);
        drop(state);

        tracing::debug!("Starting sync for {trigger:?}");
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.drive(request).await });
        TriggerOutcome::Started
    }

    async fn drive(self: Arc<Self>, first: CycleRequest) {
        let mut request = first;
        loop {
            let result = self.engine.run_cycle(request).await;
            let follow_up = match &result {
                Ok(report) => {
                    if report.exchanged {
                        self.exchanges.fetch_add(1, Ordering::SeqCst);
                    }
                    report.has_more
                }
                Err(SyncError::Transport(_)) => {
                    self.exchanges.fetch_add(1, Ordering::SeqCst);
                    false
                }
                Err(SyncError::Storage(_)) => false,
            };
            let last_error = result.err().map(|error| {
                tracing::warn!("Sync cycle failed: {error}");
                error.to_string()
            });
            self.status
                .send_modify(|status| status.last_error = last_error);
            self.refresh_status().await;

            let next = {
                let mut state = self.state();
                let runnable = state.online && !state.stopped;
                let next = match state.pending.take() {
                    Some(pending) if runnable => Some(pending),
                    None if follow_up && runnable => Some(CycleRequest::PUSH),
                    _ => None,
                };
                if next.is_none() {
                    state.in_flight = false;
                    self.status.send_modify(|status| status.syncing = false);
                }
                next
            };
            match next {
                Some(next) => request = next,
                None => break,
            }
        }
    }

    async fn refresh_status(&self) {
        let store = self.engine.store();
        let counts = match store.sync_counts().await {
            Ok(counts) => counts,
            Err(error) => {
                tracing::warn!("Failed to read sync counts: {error}");
                return;
            }
        };
        let last_successful = match store.last_successful_sync().await {
            Ok(at) => at,
            Err(error) => {
                tracing::warn!("Failed to read last sync time: {error}");
                return;
            }
        };
        self.status.send_modify(|status| {
            status.unsynced_count = counts.unsynced;
            status.conflict_count = counts.conflicts;
            status.failed_count = counts.failed;
            status.last_successful_sync_at = last_successful;
        });
    }
}

fn merge(pending: Option<CycleRequest>, request: CycleRequest) -> CycleRequest {
    CycleRequest {
        pull_server_updates: request.pull_server_updates
            || pending.is_some_and(|pending| pending.pull_server_updates),
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use tokio::sync::Semaphore;

    use crate::config::SyncSettings;
    use crate::models::{fixtures::payload, SyncStatus, Ticket};
    use crate::services::LocalStore;
    use crate::sync::protocol::{
        ResultStatus, ServerUpdates, SyncRequest, SyncResponse, SyncResults, TicketResult,
    };
    use crate::sync::transport::{TransportError, TransportResult};

    /// Accepts every ticket once a permit is available
    struct Gated {
        permits: Semaphore,
        calls: AtomicU32,
        offline: bool,
    }

    impl Gated {
        fn closed() -> Self {
            Self {
                permits: Semaphore::new(0),
                calls: AtomicU32::new(0),
                offline: false,
            }
        }

        fn open() -> Self {
            Self {
                permits: Semaphore::new(Semaphore::MAX_PERMITS),
                ..Self::closed()
            }
        }

        fn unreachable() -> Self {
            Self {
                offline: true,
                ..Self::open()
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SyncTransport for Gated {
        async fn exchange(&self, request: &SyncRequest) -> TransportResult<SyncResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| TransportError::Connect("gate closed".into()))?;
            if self.offline {
                return Err(TransportError::Connect("network unreachable".into()));
            }
            Ok(SyncResponse {
                sync_timestamp: Utc::now(),
                results: SyncResults {
                    tickets: request
                        .tickets
                        .iter()
                        .map(|change| TicketResult {
                            local_id: change.id.clone(),
                            server_id: Some(format!("srv-{}", change.id)),
                            status: ResultStatus::Success,
                            error: None,
                            error_code: None,
                        })
                        .collect(),
                    photos: Vec::new(),
                },
                server_updates: ServerUpdates::default(),
            })
        }
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            transport_attempts: 1,
            ..SyncSettings::default()
        }
    }

    async fn scheduler_with(
        transport: Gated,
        settings: &SyncSettings,
        tickets: usize,
    ) -> (SyncScheduler<Gated>, LocalStore) {
        let store = LocalStore::open_in_memory().await.unwrap();
        for n in 0..tickets {
            store
                .put(&Ticket::new_offline(payload(&format!("GPS-4000{n:02}"))))
                .await
                .unwrap();
        }
        let engine = SyncEngine::new(store.clone(), transport, settings);
        (
            SyncScheduler::new(engine, Duration::from_secs(3600)),
            store,
        )
    }

    async fn wait_idle(scheduler: &SyncScheduler<Gated>) {
        let mut status = scheduler.subscribe();
        tokio::time::timeout(Duration::from_secs(10), status.wait_for(|s| !s.syncing))
            .await
            .unwrap()
            .unwrap();
    }

    async fn wait_for_calls(scheduler: &SyncScheduler<Gated>, calls: u32) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while scheduler.engine().transport().calls() < calls {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn triggers_during_a_cycle_share_one_exchange() {
        let (scheduler, store) = scheduler_with(Gated::closed(), &settings(), 1).await;

        assert_eq!(scheduler.trigger(Trigger::LocalChange), TriggerOutcome::Started);
        wait_for_calls(&scheduler, 1).await;
        for _ in 0..3 {
            assert_eq!(
                scheduler.trigger(Trigger::LocalChange),
                TriggerOutcome::Coalesced
            );
        }
        scheduler.engine().transport().permits.add_permits(10);
        wait_idle(&scheduler).await;

        assert_eq!(scheduler.exchanges(), 1);
        let tickets: Vec<Ticket> = store.get_all().await.unwrap();
        assert_eq!(tickets[0].sync_status, SyncStatus::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn coalesced_pull_runs_one_follow_up_exchange() {
        let (scheduler, _store) = scheduler_with(Gated::closed(), &settings(), 1).await;

        scheduler.trigger(Trigger::LocalChange);
        wait_for_calls(&scheduler, 1).await;
        scheduler.trigger(Trigger::LocalChange);
        scheduler.trigger(Trigger::Interval);
        scheduler.trigger(Trigger::LocalChange);
        scheduler.engine().transport().permits.add_permits(10);
        wait_idle(&scheduler).await;

        assert_eq!(scheduler.exchanges(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remaining_batches_are_followed_up() {
        let settings = SyncSettings {
            batch_size: 1,
            ..settings()
        };
        let (scheduler, store) = scheduler_with(Gated::open(), &settings, 2).await;

        scheduler.trigger(Trigger::LocalChange);
        wait_idle(&scheduler).await;

        assert_eq!(scheduler.exchanges(), 2);
        assert_eq!(store.sync_counts().await.unwrap().unsynced, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_triggers_wait_for_reconnect() {
        let (scheduler, store) = scheduler_with(Gated::open(), &settings(), 1).await;

        assert_eq!(scheduler.set_online(false), None);
        assert_eq!(scheduler.trigger(Trigger::Manual), TriggerOutcome::Offline);
        assert_eq!(scheduler.exchanges(), 0);
        assert!(!scheduler.status().online);

        assert_eq!(scheduler.set_online(true), Some(TriggerOutcome::Started));
        wait_idle(&scheduler).await;

        assert_eq!(scheduler.exchanges(), 1);
        assert_eq!(store.sync_counts().await.unwrap().unsynced, 0);
        assert_eq!(scheduler.set_online(true), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_lets_the_running_cycle_finish() {
        let (scheduler, store) = scheduler_with(Gated::closed(), &settings(), 1).await;

        scheduler.trigger(Trigger::Manual);
        wait_for_calls(&scheduler, 1).await;
        scheduler.trigger(Trigger::Manual);
        scheduler.stop();
        scheduler.engine().transport().permits.add_permits(10);
        wait_idle(&scheduler).await;

        assert_eq!(scheduler.exchanges(), 1);
        assert_eq!(store.sync_counts().await.unwrap().unsynced, 0);
        assert_eq!(scheduler.trigger(Trigger::Manual), TriggerOutcome::Stopped);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_waits_one_interval_before_syncing() {
        let (scheduler, _store) = scheduler_with(Gated::open(), &settings(), 1).await;
        scheduler.start();
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scheduler.exchanges(), 0);
        scheduler.stop();

        let store = LocalStore::open_in_memory().await.unwrap();
        let engine = SyncEngine::new(store, Gated::open(), &settings());
        let fast = SyncScheduler::new(engine, Duration::from_millis(20));
        fast.start();
        tokio::time::timeout(Duration::from_secs(10), async {
            while fast.exchanges() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        fast.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_reports_counts_and_errors() {
        let (scheduler, _store) = scheduler_with(Gated::unreachable(), &settings(), 2).await;

        scheduler.trigger(Trigger::Manual);
        wait_idle(&scheduler).await;

        let status = scheduler.status();
        assert!(status.last_error.is_some());
        assert_eq!(status.unsynced_count, 2);
        assert_eq!(status.last_successful_sync_at, None);

        let (scheduler, _store) = scheduler_with(Gated::open(), &settings(), 2).await;
        scheduler.trigger(Trigger::Manual);
        wait_idle(&scheduler).await;

        let status = scheduler.status();
        assert_eq!(status.last_error, None);
        assert_eq!(status.unsynced_count, 0);
        assert!(status.last_successful_sync_at.is_some());
    }
}
