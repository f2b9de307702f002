//! The inactivity monitor (C4, spec §4.3): a pair of timers layered over the
//! IO transport that send keep-alives on a quiet write side and raise a
//! read-timeout failure on a quiet read side.

use crate::model::{Command, Envelope};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Shared liveness state the monitor's timers and the transport's callers
/// both touch: `record_write`/`record_read` are called on every frame.
pub struct InactivityState {
    epoch: Instant,
    last_write_ms: AtomicI64,
    last_read_ms: AtomicI64,
    write_interval_ms: AtomicI64,
    read_interval_ms: AtomicI64,
    closing: AtomicBool,
    command_id: AtomicU32,
}

impl InactivityState {
    pub fn new() -> Arc<Self> {
        let epoch = Instant::now();
        Arc::new(Self {
            epoch,
            last_write_ms: AtomicI64::new(0),
            last_read_ms: AtomicI64::new(0),
            write_interval_ms: AtomicI64::new(0),
            read_interval_ms: AtomicI64::new(0),
            closing: AtomicBool::new(false),
            command_id: AtomicU32::new(1),
        })
    }

    fn now_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    /// Apply the negotiated inactivity window (spec §4.3): zero on either
    /// side disables that side's timer entirely.
    pub fn set_negotiated(&self, write_interval_ms: i64, read_interval_ms: i64) {
        self.write_interval_ms.store(write_interval_ms, Ordering::SeqCst);
        self.read_interval_ms.store(read_interval_ms, Ordering::SeqCst);
    }

    pub fn record_write(&self) {
        self.last_write_ms.store(self.now_ms(), Ordering::SeqCst);
    }

    /// Any inbound frame, heartbeat included, proves read-liveness.
    pub fn record_read(&self) {
        self.last_read_ms.store(self.now_ms(), Ordering::SeqCst);
    }

    pub fn begin_closing(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    fn next_command_id(&self) -> u32 {
        self.command_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// Handle to the two background timers. `outbound` receives
/// `Envelope { KeepAliveInfo }` whenever the write-check timer finds the
/// write side idle, for the connection layer to forward to a live
/// [`super::IoTransport::send`]. `timed_out` resolves once if the read
/// watchdog fires.
pub struct InactivityMonitor {
    state: Arc<InactivityState>,
    write_task: Option<JoinHandle<()>>,
    read_task: Option<JoinHandle<()>>,
}

impl InactivityMonitor {
    pub fn spawn(state: Arc<InactivityState>, outbound: mpsc::Sender<Envelope>, timed_out: mpsc::Sender<()>) -> Self {
        let write_state = state.clone();
        let write_task = tokio::spawn(write_check_loop(write_state, outbound));

        let read_state = state.clone();
        let read_task = tokio::spawn(async move {
            if read_check_loop(read_state).await {
                let _ = timed_out.send(()).await;
            }
        });

        Self { state, write_task: Some(write_task), read_task: Some(read_task) }
    }

    pub fn state(&self) -> &Arc<InactivityState> {
        &self.state
    }

    pub fn stop(&mut self) {
        self.state.begin_closing();
        if let Some(task) = self.write_task.take() {
            task.abort();
        }
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

impl Drop for InactivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn write_check_loop(state: Arc<InactivityState>, outbound: mpsc::Sender<Envelope>) {
    loop {
        let write_interval = state.write_interval_ms.load(Ordering::SeqCst);
        if write_interval <= 0 {
            // Disabled: re-check periodically in case negotiation lands later.
            tokio::time::sleep(Duration::from_millis(500)).await;
            continue;
        }
        let period = Duration::from_millis((write_interval / 2).max(1) as u64);
        tokio::time::sleep(period).await;
        let write_interval = state.write_interval_ms.load(Ordering::SeqCst);
        if write_interval <= 0 || state.closing.load(Ordering::SeqCst) {
            continue;
        }
        let elapsed = state.now_ms() - state.last_write_ms.load(Ordering::SeqCst);
        if elapsed >= write_interval {
            debug!(elapsed, write_interval, "sending keep-alive, write side idle");
            let command_id = state.next_command_id();
            state.record_write();
            if outbound.send(Envelope { command_id, command: Command::KeepAliveInfo }).await.is_err() {
                return;
            }
        }
    }
}

/// Returns `true` if the read watchdog fired (caller should report a
/// transport failure); the loop otherwise only exits via
/// [`InactivityMonitor::stop`] aborting the task.
async fn read_check_loop(state: Arc<InactivityState>) -> bool {
    loop {
        let read_interval = state.read_interval_ms.load(Ordering::SeqCst);
        if read_interval <= 0 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            continue;
        }
        let period = Duration::from_millis((read_interval / 2).max(1) as u64);
        tokio::time::sleep(period).await;
        let read_interval = state.read_interval_ms.load(Ordering::SeqCst);
        if read_interval <= 0 {
            continue;
        }
        let elapsed = state.now_ms() - state.last_read_ms.load(Ordering::SeqCst);
        if elapsed >= read_interval {
            warn!(elapsed, read_interval, "read watchdog timed out, no frame received");
            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_reads_as_disabled() {
        let state = InactivityState::new();
        state.set_negotiated(0, 0);
        assert_eq!(state.write_interval_ms.load(Ordering::SeqCst), 0);
        assert_eq!(state.read_interval_ms.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn record_read_and_write_advance_timestamps() {
        let state = InactivityState::new();
        let before = state.last_write_ms.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));
        state.record_write();
        let after = state.last_write_ms.load(Ordering::SeqCst);
        assert!(after > before);

        let before = state.last_read_ms.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));
        state.record_read();
        let after = state.last_read_ms.load(Ordering::SeqCst);
        assert!(after > before);
    }

    #[tokio::test(start_paused = true)]
    async fn read_watchdog_fires_after_negotiated_interval_of_silence() {
        let state = InactivityState::new();
        state.set_negotiated(0, 200);
        let fired = tokio::spawn(read_check_loop(state.clone()));
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(fired.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn write_watchdog_emits_keep_alive_when_write_side_idle() {
        let state = InactivityState::new();
        state.set_negotiated(200, 0);
        let (tx, mut rx) = mpsc::channel(4);
        let _task = tokio::spawn(write_check_loop(state.clone(), tx));
        tokio::time::advance(Duration::from_millis(250)).await;
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.command, Command::KeepAliveInfo);
    }

    #[tokio::test(start_paused = true)]
    async fn read_watchdog_stays_quiet_when_reads_keep_arriving() {
        let state = InactivityState::new();
        state.set_negotiated(0, 200);
        let watcher_state = state.clone();
        let watcher = tokio::spawn(async move {
            tokio::time::timeout(Duration::from_millis(500), read_check_loop(watcher_state)).await
        });
        for _ in 0..4 {
            tokio::time::advance(Duration::from_millis(90)).await;
            state.record_read();
        }
        let result = watcher.await.unwrap();
        assert!(result.is_err(), "watchdog should not have fired while reads kept arriving");
    }
}
