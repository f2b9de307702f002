//! The failover transport (C7, spec §4.5): multiplexes a set of candidate
//! broker URIs behind one transport interface, reconnecting with backoff
//! and replaying recoverable session state after a successful reconnect.

use super::io_transport::{IoSender, IoTransport};
use super::stream::AnyStream;
use crate::error::{FailoverError, TransportError};
use crate::model::Envelope;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, info, warn};

/// How to reach one broker: opaque to this module, resolved by whatever
/// implements [`BrokerConnector`] (typically URI parsing plus
/// [`super::socket::connect_tcp`]/[`super::tls::connect_tls`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerUri {
    pub uri: String,
    pub priority: bool,
}

/// Connects one candidate URI to a live command stream. Implemented by the
/// connection layer (C8), which knows how to turn a URI into a socket/TLS
/// transport and wrap it in an [`IoTransport`].
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, uri: &str) -> Result<IoTransport<AnyStream>, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerStatus {
    Available,
    Connecting,
    Connected,
    Failed,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct BrokerState {
    pub uri: String,
    pub status: BrokerStatus,
    pub failure_count: u32,
    pub last_attempt: Option<Instant>,
    pub last_success: Option<Instant>,
    pub last_error: Option<String>,
}

impl BrokerState {
    fn new(uri: String) -> Self {
        Self { uri, status: BrokerStatus::Available, failure_count: 0, last_attempt: None, last_success: None, last_error: None }
    }
}

/// URI options recognized on the `failover:(...)` connection string (spec
/// §4.5, §6).
#[derive(Debug, Clone)]
pub struct FailoverOptions {
    pub randomize: bool,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub backoff_multiplier: f64,
    pub use_exponential_back_off: bool,
    /// Negative means infinite, matching the original option's sign
    /// convention (spec §4.5).
    pub max_reconnect_attempts: i64,
    pub startup_max_reconnect_attempts: i64,
    pub backup: bool,
    pub backup_pool_size: usize,
    pub track_messages: bool,
    pub max_cache_size: usize,
    pub priority_backup: bool,
    pub priority_uris: Vec<String>,
    /// `None` means the default of infinite (spec §4.5, "default infinite").
    pub timeout: Option<Duration>,
}

impl Default for FailoverOptions {
    fn default() -> Self {
        Self {
            randomize: true,
            initial_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_exponential_back_off: true,
            max_reconnect_attempts: -1,
            startup_max_reconnect_attempts: -1,
            backup: false,
            backup_pool_size: 1,
            track_messages: false,
            max_cache_size: 256,
            priority_backup: false,
            priority_uris: Vec::new(),
            timeout: None,
        }
    }
}

/// Delay before the next reconnect sweep, `initialReconnectDelay *
/// backoffMultiplier^n` clamped to `maxReconnectDelay` (spec §4.5). `n` is
/// the zero-based sweep count, not the per-URI attempt count.
pub fn backoff_delay(sweep: u32, options: &FailoverOptions) -> Duration {
    if !options.use_exponential_back_off {
        return options.initial_reconnect_delay.min(options.max_reconnect_delay);
    }
    let factor = options.backoff_multiplier.powi(sweep as i32);
    let millis = (options.initial_reconnect_delay.as_millis() as f64 * factor).min(options.max_reconnect_delay.as_millis() as f64);
    Duration::from_millis(millis.max(0.0) as u64)
}

/// Build the ordered candidate list: primaries (optionally randomized),
/// then backups, priority URIs marked throughout (spec §4.5 step 1).
pub fn build_candidate_list(primaries: &[String], backups: &[String], priority_uris: &[String], randomize: bool) -> Vec<BrokerUri> {
    let mut primaries = primaries.to_vec();
    if randomize {
        primaries.shuffle(&mut rand::thread_rng());
    }
    primaries
        .into_iter()
        .chain(backups.iter().cloned())
        .map(|uri| {
            let priority = priority_uris.iter().any(|p| p == &uri);
            BrokerUri { uri, priority }
        })
        .collect()
}

/// One recoverable command queued for replay after reconnect, in the order
/// the connection layer registered it (spec §4.5, "State replay").
pub type RecoverableCommands = Arc<RwLock<Vec<Envelope>>>;

/// Handle to a running failover transport.
pub struct FailoverTransport {
    connector: Arc<dyn BrokerConnector>,
    options: FailoverOptions,
    uris: Vec<BrokerUri>,
    states: Arc<Mutex<Vec<BrokerState>>>,
    active: Arc<RwLock<Option<IoSender<AnyStream>>>>,
    connected: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    recoverable: RecoverableCommands,
    inbound: mpsc::Receiver<Envelope>,
    reconnect_task: tokio::task::JoinHandle<()>,
    connect_generation: Arc<AtomicU32>,
}

impl FailoverTransport {
    /// Spawn the background reconnect loop and return a handle. `uris` is
    /// the already-built candidate list (see [`build_candidate_list`]);
    /// `recoverable` is shared with the connection layer so it can append
    /// commands to replay as sessions/consumers/producers/transactions come
    /// and go.
    pub fn spawn(connector: Arc<dyn BrokerConnector>, uris: Vec<BrokerUri>, options: FailoverOptions, recoverable: RecoverableCommands) -> Result<Self, FailoverError> {
        if uris.is_empty() {
            return Err(FailoverError::NoCandidates);
        }
        let states = Arc::new(Mutex::new(uris.iter().map(|u| BrokerState::new(u.uri.clone())).collect::<Vec<_>>()));
        let active = Arc::new(RwLock::new(None));
        let connected = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(256);
        let connect_generation = Arc::new(AtomicU32::new(0));

        let loop_connector = connector.clone();
        let loop_uris = uris.clone();
        let loop_options = options.clone();
        let loop_states = states.clone();
        let loop_active = active.clone();
        let loop_connected = connected.clone();
        let loop_closed = closed.clone();
        let loop_recoverable = recoverable.clone();
        let loop_generation = connect_generation.clone();
        let reconnect_task = tokio::spawn(async move {
            reconnect_loop(
                loop_connector,
                loop_uris,
                loop_options,
                loop_states,
                loop_active,
                loop_connected,
                loop_closed,
                loop_recoverable,
                tx,
                loop_generation,
            )
            .await;
        });

        Ok(Self {
            connector,
            options,
            uris,
            states,
            active,
            connected,
            closed,
            recoverable,
            inbound: rx,
            reconnect_task,
            connect_generation,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// A cheaply cloneable send-only handle, for callers that need to hand
    /// out the ability to send without sharing ownership of `recv`, which
    /// takes `&mut self` and so stays with whichever task owns this
    /// `FailoverTransport` value.
    pub fn sender(&self) -> FailoverSender {
        FailoverSender { active: self.active.clone(), closed: self.closed.clone(), timeout: self.options.timeout }
    }

    /// Broker-state snapshot per candidate URI (spec §6, "Observable
    /// state").
    pub async fn broker_states(&self) -> Vec<BrokerState> {
        self.states.lock().await.clone()
    }

    /// Send one envelope through the active transport, blocking while
    /// disconnected up to `options.timeout` (spec §4.5, "Backpressure
    /// during reconnect"). `None` timeout waits indefinitely.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), FailoverError> {
        self.sender().send(envelope).await
    }

    /// Receive the next inbound envelope, forwarded from whichever
    /// transport is currently active, transparently across reconnects.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inbound.recv().await
    }

    /// Append a command to the replay list (spec §4.5, "State replay");
    /// called by the connection layer as sessions/consumers/producers are
    /// created, and removed when they close.
    pub async fn register_recoverable(&self, envelope: Envelope) {
        self.recoverable.write().await.push(envelope);
    }

    /// The shared replay list backing this transport, so the connection
    /// layer can append recoverable commands itself (e.g. from
    /// [`crate::client::connection::ConnectionCore::call`]) without this
    /// transport needing to know which commands are worth replaying.
    pub fn recoverable_handle(&self) -> RecoverableCommands {
        self.recoverable.clone()
    }

    pub async fn close(self) {
        self.closed.store(true, Ordering::SeqCst);
        self.reconnect_task.abort();
    }
}

/// A cheaply cloneable send-only handle to a [`FailoverTransport`], for
/// callers (such as a connection's shared core) that need to send without
/// holding `recv`, which stays with whichever task owns the full transport.
#[derive(Clone)]
pub struct FailoverSender {
    active: Arc<RwLock<Option<IoSender<AnyStream>>>>,
    closed: Arc<AtomicBool>,
    timeout: Option<Duration>,
}

impl FailoverSender {
    pub async fn send(&self, envelope: &Envelope) -> Result<(), FailoverError> {
        let sender = match self.timeout {
            Some(duration) => tokio_timeout(duration, self.wait_for_active()).await.map_err(|_| FailoverError::Timeout(duration))??,
            None => self.wait_for_active().await?,
        };
        sender.send(envelope).await.map_err(|_| FailoverError::Closed)
    }

    async fn wait_for_active(&self) -> Result<IoSender<AnyStream>, FailoverError> {
        loop {
            if let Some(sender) = self.active.read().await.clone() {
                return Ok(sender);
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(FailoverError::Closed);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn reconnect_loop(
    connector: Arc<dyn BrokerConnector>,
    uris: Vec<BrokerUri>,
    options: FailoverOptions,
    states: Arc<Mutex<Vec<BrokerState>>>,
    active: Arc<RwLock<Option<IoSender<AnyStream>>>>,
    connected: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    recoverable: RecoverableCommands,
    inbound_tx: mpsc::Sender<Envelope>,
    generation: Arc<AtomicU32>,
) {
    let mut sweep: u32 = 0;
    let mut total_attempts: u32 = 0;
    let mut ever_connected = false;

    'sweeps: loop {
        if closed.load(Ordering::SeqCst) {
            return;
        }
        for candidate in &uris {
            if closed.load(Ordering::SeqCst) {
                return;
            }
            total_attempts += 1;
            mark_status(&states, &candidate.uri, BrokerStatus::Connecting).await;
            debug!(uri = %candidate.uri, attempt = total_attempts, "attempting broker connect");

            match connector.connect(&candidate.uri).await {
                Ok(transport) => {
                    info!(uri = %candidate.uri, "connected to broker");
                    mark_success(&states, &candidate.uri).await;
                    ever_connected = true;
                    sweep = 0;

                    let my_generation = generation.fetch_add(1, Ordering::SeqCst) + 1;
                    *active.write().await = Some(transport.sender());
                    connected.store(true, Ordering::SeqCst);

                    replay(&active, &recoverable).await;

                    run_until_failed(transport, inbound_tx.clone(), active.clone(), connected.clone(), generation.clone(), my_generation).await;

                    mark_status(&states, &candidate.uri, BrokerStatus::Failed).await;
                    if closed.load(Ordering::SeqCst) {
                        return;
                    }
                    continue 'sweeps;
                }
                Err(err) => {
                    warn!(uri = %candidate.uri, error = %err, "broker connect failed");
                    mark_failure(&states, &candidate.uri, &err.to_string()).await;
                }
            }

            let attempt_limit = if ever_connected { options.max_reconnect_attempts } else { options.startup_max_reconnect_attempts };
            if attempt_limit >= 0 && total_attempts as i64 >= attempt_limit {
                warn!(total_attempts, "failover exhausted configured reconnect attempts");
                mark_all(&states, BrokerStatus::Exhausted).await;
                connected.store(false, Ordering::SeqCst);
                return;
            }
        }

        let delay = backoff_delay(sweep, &options);
        sweep = sweep.saturating_add(1);
        debug!(?delay, sweep, "sleeping before next reconnect sweep");
        tokio::time::sleep(delay).await;
    }
}

/// Resend every registered recoverable command before releasing the
/// connection to application traffic (spec §4.5, "State replay").
async fn replay(active: &Arc<RwLock<Option<IoSender<AnyStream>>>>, recoverable: &RecoverableCommands) {
    let sender = active.read().await.clone();
    let Some(sender) = sender else { return };
    let commands = recoverable.read().await.clone();
    for envelope in &commands {
        if let Err(err) = sender.send(envelope).await {
            warn!(error = %err, "failed to replay recoverable command after reconnect");
            return;
        }
    }
    debug!(count = commands.len(), "replayed recoverable commands after reconnect");
}

/// Forward inbound envelopes from `transport` until its reader fails, then
/// return so the reconnect loop can pick the next candidate. Only clears
/// `active`/`connected` if no newer connection has since taken over
/// (guarded by `generation`, in case a close and fresh connect race).
async fn run_until_failed(
    mut transport: IoTransport<AnyStream>,
    inbound_tx: mpsc::Sender<Envelope>,
    active: Arc<RwLock<Option<IoSender<AnyStream>>>>,
    connected: Arc<AtomicBool>,
    generation: Arc<AtomicU32>,
    my_generation: u32,
) {
    loop {
        match transport.recv().await {
            Some(envelope) => {
                if inbound_tx.send(envelope).await.is_err() {
                    return;
                }
            }
            None => break,
        }
    }
    if generation.load(Ordering::SeqCst) == my_generation {
        *active.write().await = None;
        connected.store(false, Ordering::SeqCst);
    }
}

async fn mark_status(states: &Arc<Mutex<Vec<BrokerState>>>, uri: &str, status: BrokerStatus) {
    let mut states = states.lock().await;
    if let Some(state) = states.iter_mut().find(|s| s.uri == uri) {
        state.status = status;
        state.last_attempt = Some(Instant::now());
    }
}

async fn mark_success(states: &Arc<Mutex<Vec<BrokerState>>>, uri: &str) {
    let mut states = states.lock().await;
    if let Some(state) = states.iter_mut().find(|s| s.uri == uri) {
        state.status = BrokerStatus::Connected;
        state.last_success = Some(Instant::now());
        state.failure_count = 0;
        state.last_error = None;
    }
}

async fn mark_failure(states: &Arc<Mutex<Vec<BrokerState>>>, uri: &str, error: &str) {
    let mut states = states.lock().await;
    if let Some(state) = states.iter_mut().find(|s| s.uri == uri) {
        state.status = BrokerStatus::Failed;
        state.failure_count += 1;
        state.last_error = Some(error.to_string());
    }
}

async fn mark_all(states: &Arc<Mutex<Vec<BrokerState>>>, status: BrokerStatus) {
    let mut states = states.lock().await;
    for state in states.iter_mut() {
        state.status = status;
    }
}
