//! Periodic synchronization of every configured source
//!
//! A [`Scheduler`] is built once and shared behind an `Arc`. `start` spawns a
//! loop that runs every source immediately and then once per interval. Sources
//! run one after another; a failing source is logged and the next one still
//! runs. Stopping is cooperative: the cancellation token is shared with the
//! pipeline, so an in-flight run finishes the batches it holds, returns
//! [`SyncError::Cancelled`] and leaves its cursor untouched.
//!
//! The state reads `Running` from `start` until stop, whether or not a tick is
//! in progress; `Stopped` is terminal.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Result, SyncError};
use crate::report::RunReport;

/// Anything that can run one import for a source id
#[async_trait]
pub trait SourceRunner: Send + Sync + 'static {
    async fn run_source(&self, source_id: &str) -> Result<RunReport>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Not started; `run_once` leaves it here
    Idle,
    /// Started: from `start` until stop, including the waits between ticks
    Running,
    /// Terminal
    Stopped,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SchedulerState::Idle => 0,
            SchedulerState::Running => 1,
            SchedulerState::Stopped => 2,
        }
    }
}

/// Result of one source within a tick
#[derive(Debug)]
pub struct SourceOutcome {
    pub source_id: String,
    pub result: Result<RunReport>,
}

struct Inner<R> {
    runner: Arc<R>,
    sources: Vec<String>,
    interval: Duration,
    cancel: CancellationToken,
    state: AtomicU8,
    started: AtomicBool,
}

pub struct Scheduler<R: SourceRunner> {
    inner: Arc<Inner<R>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<R: SourceRunner> Scheduler<R> {
    /// `cancel` should be the token the runner's imports observe
    pub fn new(
        runner: Arc<R>,
        sources: Vec<String>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                sources,
                interval,
                cancel,
                state: AtomicU8::new(SchedulerState::Idle.as_u8()),
                started: AtomicBool::new(false),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.state()
    }

    pub fn sources(&self) -> &[String] {
        &self.inner.sources
    }

    /// Spawn the loop: one immediate tick, then one per interval
    pub async fn start(&self) -> Result<()> {
        if self.state() == SchedulerState::Stopped || self.inner.cancel.is_cancelled() {
            return Err(SyncError::SchedulerStopped);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(SyncError::AlreadyRunning);
        }
        self.inner.transition(SchedulerState::Idle, SchedulerState::Running);

        info!(
            sources = ?self.inner.sources,
            interval_secs = self.inner.interval.as_secs(),
            "Starting scheduler"
        );

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run_loop().await });
        *self.handle.lock().await = Some(handle);
        Ok(())
    }

    /// Run every source once, now, on the caller's task
    pub async fn run_once(&self) -> Result<Vec<SourceOutcome>> {
        if self.state() == SchedulerState::Stopped {
            return Err(SyncError::SchedulerStopped);
        }
        Ok(self.inner.tick().await)
    }

    /// Prevent further runs; in-flight work winds down at the next batch boundary
    pub fn stop(&self) {
        if self.inner.set_state(SchedulerState::Stopped) != SchedulerState::Stopped {
            info!("Stopping scheduler");
        }
        self.inner.cancel.cancel();
    }

    /// Stop and wait up to `grace` for the loop to exit
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        self.stop();

        let Some(mut handle) = self.handle.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(joined) => joined.map_err(SyncError::from),
            Err(_) => {
                warn!(grace_secs = grace.as_secs(), "Scheduler did not stop in time, aborting");
                handle.abort();
                Ok(())
            },
        }
    }
}

impl<R: SourceRunner> Inner<R> {
    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns the previous state
    fn set_state(&self, state: SchedulerState) -> SchedulerState {
        SchedulerState::from_u8(self.state.swap(state.as_u8(), Ordering::SeqCst))
    }

    /// Compare-and-swap, so a concurrent stop is never overwritten
    fn transition(&self, from: SchedulerState, to: SchedulerState) {
        let _ = self.state.compare_exchange(
            from.as_u8(),
            to.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    async fn run_loop(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }
            self.tick().await;
        }

        self.set_state(SchedulerState::Stopped);
        info!("Scheduler stopped");
    }

    async fn tick(&self) -> Vec<SourceOutcome> {
        let mut outcomes = Vec::with_capacity(self.sources.len());

        for source_id in &self.sources {
            if self.cancel.is_cancelled() {
                info!(source = %source_id, "Skipping source, scheduler stopping");
                break;
            }

            let result = self.runner.run_source(source_id).await;
            match &result {
                Ok(report) => info!(
                    source = %source_id,
                    up_to_date = report.up_to_date,
                    processed = report.processed,
                    created = report.created,
                    updated = report.updated,
                    errors = report.error_count(),
                    "Source synchronized"
                ),
                Err(e) => error!(source = %source_id, error = %e, "Source synchronization failed"),
            }
            outcomes.push(SourceOutcome {
                source_id: source_id.clone(),
                result,
            });
        }

        outcomes
    }
}
