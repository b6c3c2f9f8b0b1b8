//! Catch-up syncer.
//!
//! Decides when the node is behind its best peer and runs at most one
//! catch-up cycle at a time. A single event loop reacts to control commands
//! and a periodic tick; every trigger runs its cycle on a detached task so the
//! loop itself never waits on the downloader.
//!
//! ## Hysteresis
//!
//! The first check of a cycle tolerates no difference at all, so a node that
//! is even one height behind runs at least one real download. Once a cycle
//! has started it keeps going until the gap is within the stop threshold.
//! The wider start threshold only gates transaction caching, see
//! [`CatchupSyncer::cache_new_tx_enabled`].
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chain::NodeStatusProvider;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::config::SyncerConfig;
use super::downloader::{Downloader, DownloaderError};
use super::states::SyncerStatus;
use crate::types::{PeerError, PeerProvider};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("no peer to sync with: {0}")]
    NoPeer(#[from] PeerError),
    #[error("catch-up download failed: {0}")]
    Download(#[from] DownloaderError),
}

/// Control input of the syncer event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncerCommand {
    Enable(bool),
    PeerConnected(String),
    Stop,
}

/// Sender side of the syncer event loop.
#[derive(Debug, Clone)]
pub struct SyncerHandle {
    commands: mpsc::UnboundedSender<SyncerCommand>,
}

impl SyncerHandle {
    pub fn enable(&self, enabled: bool) {
        self.send(SyncerCommand::Enable(enabled));
    }

    pub fn peer_connected(&self, peer_id: &str) {
        self.send(SyncerCommand::PeerConnected(peer_id.to_string()));
    }

    pub fn stop(&self) {
        self.send(SyncerCommand::Stop);
    }

    fn send(&self, command: SyncerCommand) {
        if self.commands.send(command).is_err() {
            debug!("Catch-up syncer loop already stopped");
        }
    }
}

#[derive(Debug, Default)]
struct SyncerState {
    work_state: SyncerStatus,
    sync_in_flight: bool,
    listeners: Vec<mpsc::UnboundedSender<SyncerStatus>>,
}

/// Releases the in-flight flag when a cycle ends, however it ends.
struct CycleGuard<'a> {
    state: &'a Mutex<SyncerState>,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().sync_in_flight = false;
    }
}

pub struct CatchupSyncer {
    config: SyncerConfig,
    peers: Arc<dyn PeerProvider>,
    node_status: Arc<dyn NodeStatusProvider>,
    downloader: Arc<dyn Downloader>,

    state: Mutex<SyncerState>,
    enabled: AtomicBool,

    /// Best peer height seen by the last cycle. Advisory only.
    current_best_height: AtomicU64,
    last_error: Mutex<Option<SyncError>>,
}

impl CatchupSyncer {
    pub fn new(
        config: SyncerConfig,
        peers: Arc<dyn PeerProvider>,
        node_status: Arc<dyn NodeStatusProvider>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        Self {
            config,
            peers,
            node_status,
            downloader,
            state: Mutex::new(SyncerState::default()),
            enabled: AtomicBool::new(false),
            current_best_height: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncerConfig {
        &self.config
    }

    /// Spawn the event loop. Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> SyncerHandle {
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Arc::clone(self).run(receiver));
        info!(
            interval_ms = self.config.check_interval.as_millis() as u64,
            bootstrap = self.config.bootstrap_node,
            "Catch-up syncer started"
        );
        SyncerHandle { commands }
    }

    async fn run(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<SyncerCommand>) {
        let period = self.config.check_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SyncerCommand::Enable(enabled)) => {
                        info!(enabled, "Catch-up syncer got enable event");
                        self.enabled.store(enabled, Ordering::Release);
                    }
                    Some(SyncerCommand::PeerConnected(peer_id)) => {
                        info!(peer = %peer_id, "New peer connected");
                        self.trigger();
                    }
                    Some(SyncerCommand::Stop) | None => {
                        info!("Catch-up syncer received quit message, quitting");
                        break;
                    }
                },
                _ = ticker.tick() => self.trigger(),
            }
        }

        self.downloader.terminate();
    }

    fn trigger(self: &Arc<Self>) {
        if !self.is_enabled() {
            debug!("Catch-up syncer not enabled");
            return;
        }

        let syncer = Arc::clone(self);
        tokio::spawn(async move {
            // Failures are logged and recorded by the cycle; the next trigger retries.
            let _ = syncer.sync_to_latest().await;
        });
    }

    /// Whether the best peer is at most `max_diff` heights ahead of us.
    ///
    /// Without peer info only a bootstrap node counts as up to date.
    pub fn is_up_to_date(&self, max_diff: u64) -> bool {
        let best = match self.peers.best_peer_info() {
            Ok(best) => best,
            Err(err) => {
                debug!(%err, "Get best peer");
                return self.config.bootstrap_node;
            }
        };

        let our_height = self.node_status.height();
        let up_to_date = best.head_height <= our_height.saturating_add(max_diff);
        debug!(
            peer_height = best.head_height,
            peer_hash = %best.head_hash,
            our_height,
            up_to_date,
            "Checked sync distance"
        );
        up_to_date
    }

    /// Run one catch-up cycle unless one is already in flight.
    ///
    /// A concurrent call returns `Ok(())` without doing anything.
    pub async fn sync_to_latest(&self) -> Result<(), SyncError> {
        let Some(_guard) = self.try_begin_cycle() else {
            trace!("Catch-up syncing task is busy");
            return Ok(());
        };

        let result = self.run_cycle().await;
        match &result {
            Ok(()) => *self.last_error.lock() = None,
            Err(err) => {
                warn!(%err, "Catch-up sync failed");
                *self.last_error.lock() = Some(err.clone());
            }
        }
        result
    }

    fn try_begin_cycle(&self) -> Option<CycleGuard<'_>> {
        let mut state = self.state.lock();
        if state.sync_in_flight {
            return None;
        }
        state.sync_in_flight = true;
        Some(CycleGuard { state: &self.state })
    }

    async fn run_cycle(&self) -> Result<(), SyncError> {
        // No tolerance on the first check.
        let mut max_diff = 0;

        while !self.is_up_to_date(max_diff) {
            self.notify_work_state_changed(SyncerStatus::Started);
            max_diff = self.config.stop_threshold;

            let best = self.peers.best_peer_info()?;
            debug!(
                peer = %best.peer_id,
                peer_height = best.head_height,
                our_height = self.node_status.height(),
                "Catch-up sync with best peer"
            );
            self.current_best_height
                .store(best.head_height, Ordering::Relaxed);

            self.downloader
                .synchronise(
                    &best.peer_id,
                    best.head_hash,
                    best.head_height,
                    self.config.sync_mode,
                )
                .await?;
            debug!(height = best.head_height, "Finished downloader synchronise");
        }

        self.notify_work_state_changed(SyncerStatus::Stopped);
        Ok(())
    }

    /// Whether newly seen transactions should be cached.
    ///
    /// False only while a cycle runs and the node is more than
    /// `start_threshold * cache_threshold_factor` heights behind the best
    /// height that cycle saw.
    pub fn cache_new_tx_enabled(&self) -> bool {
        if self.work_state() == SyncerStatus::Stopped {
            return true;
        }

        let window = self
            .config
            .start_threshold
            .saturating_mul(self.config.cache_threshold_factor);
        self.node_status.height().saturating_add(window) >= self.current_best_height()
    }

    /// Register a status listener. It only hears about actual transitions.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncerStatus> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state.lock().listeners.push(sender);
        receiver
    }

    /// Publish `status` to every listener if it differs from the current one.
    pub fn notify_work_state_changed(&self, status: SyncerStatus) {
        let mut state = self.state.lock();
        if state.work_state == status {
            return;
        }

        state.work_state = status;
        state.listeners.retain(|listener| listener.send(status).is_ok());
        info!(%status, "Catch-up syncer work state changed");
    }

    pub fn work_state(&self) -> SyncerStatus {
        self.state.lock().work_state
    }

    pub fn is_syncing(&self) -> bool {
        self.state.lock().sync_in_flight
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn current_best_height(&self) -> u64 {
        self.current_best_height.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<SyncError> {
        self.last_error.lock().clone()
    }
}
