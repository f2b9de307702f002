//! The connection (C8, spec §4.6): the top-level state machine, owning the
//! transport channel, the response correlator, the inactivity monitor, and
//! the session registry. Sessions/consumers/producers/messages back-reference
//! their owner only by id (spec §9, "cyclic ownership" redesign); lookups
//! go back through this connection's tables.

use crate::client::session::Session;
use crate::codec::{bootstrap_wireformat_info, Negotiator};
use crate::error::{ClientError, ClientResult, TransportError};
use crate::model::{
    Command, ConnectionControl, ConnectionInfo, Envelope, IdCounter, SessionId, SessionInfo,
};
use crate::transport::failover::RecoverableCommands;
use crate::transport::{
    CorrelatedResponse, Correlator, FailoverSender, FailoverTransport, InactivityMonitor, InactivityState, IoSender, IoTransport,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::session::AckMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Started,
    Stopped,
    Closed,
}

/// Either a direct socket-backed command stream or a failover-multiplexed
/// one; both expose the same send/recv surface to the connection. This is
/// the handle used during negotiation and is then consumed into a
/// [`ChannelSender`] (kept by [`ConnectionCore`]) and moved whole into the
/// reader task, which is the sole remaining caller of `recv`.
pub enum Channel {
    Direct(IoTransport<crate::transport::AnyStream>),
    Failover(FailoverTransport),
}

impl Channel {
    async fn send(&self, envelope: &Envelope) -> Result<(), ClientError> {
        match self {
            Channel::Direct(t) => t.send(envelope).await.map_err(ClientError::from),
            Channel::Failover(t) => t.send(envelope).await.map_err(ClientError::from),
        }
    }

    async fn recv(&mut self) -> Option<Envelope> {
        match self {
            Channel::Direct(t) => t.recv().await,
            Channel::Failover(t) => t.recv().await,
        }
    }

    fn set_tight(&self, tight: bool) {
        if let Channel::Direct(t) = self {
            t.set_tight(tight);
        }
    }

    /// A cheaply cloneable, send-only view, independent of whichever task
    /// ends up owning this channel's `recv` half.
    fn sender(&self) -> ChannelSender {
        match self {
            Channel::Direct(t) => ChannelSender::Direct(t.sender()),
            Channel::Failover(t) => ChannelSender::Failover(t.sender()),
        }
    }
}

/// The send-only half of a [`Channel`], shared freely across
/// [`ConnectionCore`]'s callers (sessions, producers, consumers,
/// transactions), while `recv` stays exclusively with the reader task.
#[derive(Clone)]
pub enum ChannelSender {
    Direct(IoSender<crate::transport::AnyStream>),
    Failover(FailoverSender),
}

impl ChannelSender {
    async fn send(&self, envelope: &Envelope) -> Result<(), ClientError> {
        match self {
            ChannelSender::Direct(s) => s.send(envelope).await.map_err(ClientError::from),
            ChannelSender::Failover(s) => s.send(envelope).await.map_err(ClientError::from),
        }
    }

    fn set_tight(&self, tight: bool) {
        if let ChannelSender::Direct(s) = self {
            s.set_tight(tight);
        }
    }
}

/// The shared, upward-only handle sessions hold: enough to assign ids and
/// push commands through the connection's channel, without holding the
/// connection's own session table (spec §9: no cyclic ownership).
pub struct ConnectionCore {
    pub connection_id: crate::model::ConnectionId,
    sender: ChannelSender,
    correlator: Arc<Correlator>,
    session_ids: IdCounter,
    inactivity: Arc<InactivityState>,
    /// `Some` only behind a failover channel (spec §4.5, "State replay");
    /// a direct channel has no reconnect to replay state across.
    recoverable: Option<RecoverableCommands>,
}

impl ConnectionCore {
    fn new(connection_id: crate::model::ConnectionId, sender: ChannelSender, inactivity: Arc<InactivityState>, recoverable: Option<RecoverableCommands>) -> Self {
        Self { connection_id, sender, correlator: Arc::new(Correlator::new()), session_ids: IdCounter::new(), inactivity, recoverable }
    }

    pub fn next_session_id(&self) -> SessionId {
        SessionId { connection_id: self.connection_id.clone(), value: self.session_ids.next() }
    }

    /// Send a command that expects a correlated response, and wait for it.
    /// The slot is registered before the envelope is sent so a very fast
    /// reply can never arrive and be dropped as unmatched (spec §4.4).
    pub async fn call(&self, command: Command) -> ClientResult<CorrelatedResponse> {
        let command_id = self.correlator.next_command_id();
        let envelope = Envelope { command_id, command };
        let pending = self.correlator.register(command_id);
        self.send_envelope(&envelope).await?;
        let response = pending.wait().await?;
        if let CorrelatedResponse::Exception(e) = &response {
            return Err(ClientError::BrokerException { exception_class: e.exception_class.clone(), message: e.message.clone() });
        }
        if let Some(recoverable) = &self.recoverable {
            if is_recoverable_registration(&envelope.command) {
                recoverable.write().await.push(envelope);
            }
        }
        Ok(response)
    }

    /// Send a command that does not expect a response; it still consumes a
    /// fresh command id for tracing (spec §4.4).
    pub async fn cast(&self, command: Command) -> ClientResult<()> {
        let command_id = self.correlator.next_command_id();
        let envelope = Envelope { command_id, command };
        self.send_envelope(&envelope).await
    }

    async fn send_envelope(&self, envelope: &Envelope) -> ClientResult<()> {
        self.sender.send(envelope).await?;
        self.inactivity.record_write();
        Ok(())
    }
}

/// Whether `command` is state a failover reconnect must replay so the
/// broker sees the same connection/session/producer/consumer registration
/// it did before the failure (spec §4.5, "State replay"). Plain application
/// traffic (sends, acks, transaction control) is deliberately excluded:
/// replaying those would duplicate or resurrect already-settled work.
fn is_recoverable_registration(command: &Command) -> bool {
    matches!(
        command,
        Command::ConnectionInfo(_) | Command::SessionInfo(_) | Command::ProducerInfo(_) | Command::ConsumerInfo(_)
    )
}

/// Handle to a logical connection: created, started, stopped/restarted any
/// number of times, then closed once (spec §4.6).
pub struct Connection {
    core: Arc<ConnectionCore>,
    /// The receive half, moved out into the reader task at spawn time. Held
    /// here only for the gap between `handshake` finishing negotiation and
    /// `spawn_reader` taking ownership of it.
    receiver: Mutex<Option<Channel>>,
    state: Mutex<ConnectionState>,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    exception_listener: Mutex<Option<Arc<dyn Fn(ClientError) + Send + Sync>>>,
    monitor: Mutex<Option<InactivityMonitor>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    failed: Arc<AtomicBool>,
}

impl Connection {
    /// Perform wireformat negotiation over an already-connected `channel`
    /// and bring the connection up in the `Created` state, ready for
    /// [`Connection::start`].
    pub async fn handshake(connection_id: crate::model::ConnectionId, mut channel: Channel, client_id: Option<String>) -> ClientResult<Arc<Self>> {
        let inactivity = InactivityState::new();
        let mut negotiator = Negotiator::new();
        let local_info = bootstrap_wireformat_info();
        negotiator.record_sent(local_info.clone());

        let bootstrap_envelope = Envelope { command_id: 0, command: Command::WireformatInfo(local_info) };
        channel.send(&bootstrap_envelope).await?;

        let negotiated = loop {
            match channel.recv().await {
                Some(Envelope { command: Command::WireformatInfo(remote), .. }) => {
                    break negotiator.record_received(remote)?;
                }
                Some(other) => {
                    warn!(tag = ?other.command.tag(), "ignoring non-wireformat command before negotiation completes");
                }
                None => return Err(TransportError::Closed.into()),
            }
        };

        info!(version = negotiated.version, tight = negotiated.tight_encoding_enabled, "wireformat negotiated");
        channel.set_tight(negotiated.tight_encoding_enabled);
        inactivity.set_negotiated(negotiated.max_inactivity_duration_ms, negotiated.max_inactivity_duration_ms);

        let sender = channel.sender();
        let recoverable = match &channel {
            Channel::Failover(transport) => Some(transport.recoverable_handle()),
            Channel::Direct(_) => None,
        };
        let core = Arc::new(ConnectionCore::new(connection_id.clone(), sender, inactivity, recoverable));

        let info = ConnectionInfo { connection_id: connection_id.clone(), client_id, username: None, failover_session_resumed: false };
        core.call(Command::ConnectionInfo(info)).await?;

        let connection = Arc::new(Self {
            core,
            receiver: Mutex::new(Some(channel)),
            state: Mutex::new(ConnectionState::Created),
            sessions: Mutex::new(HashMap::new()),
            exception_listener: Mutex::new(None),
            monitor: Mutex::new(None),
            reader_task: Mutex::new(None),
            failed: Arc::new(AtomicBool::new(false)),
        });

        connection.spawn_reader();
        connection.spawn_inactivity_monitor();
        Ok(connection)
    }

    pub fn set_exception_listener<F>(&self, listener: F)
    where
        F: Fn(ClientError) + Send + Sync + 'static,
    {
        *self.exception_listener.try_lock().expect("exception listener lock") = Some(Arc::new(listener));
    }

    async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    /// Created|Stopped -> Started. Inbound dispatch resumes.
    pub async fn start(&self) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        match *state {
            ConnectionState::Closed => return Err(ClientError::LocalUsage("cannot start a closed connection".into())),
            _ => *state = ConnectionState::Started,
        }
        Ok(())
    }

    /// Started -> Stopped. Inbound dispatch is suppressed while stopped
    /// (spec §4.6); sends remain permitted.
    pub async fn stop(&self) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        if *state == ConnectionState::Closed {
            return Err(ClientError::LocalUsage("cannot stop a closed connection".into()));
        }
        *state = ConnectionState::Stopped;
        Ok(())
    }

    pub async fn create_session(self: &Arc<Self>, ack_mode: AckMode) -> ClientResult<Arc<Session>> {
        let session_id = self.core.next_session_id();
        self.core.call(Command::SessionInfo(SessionInfo { session_id: session_id.clone() })).await?;
        let session = Session::new(self.core.clone(), session_id.clone(), ack_mode);
        self.sessions.lock().await.insert(session_id, session.clone());
        Ok(session)
    }

    pub async fn close_session(&self, session_id: &SessionId) -> ClientResult<()> {
        if let Some(session) = self.sessions.lock().await.remove(session_id) {
            session.close().await?;
        }
        Ok(())
    }

    fn spawn_reader(self: &Arc<Self>) {
        let connection = self.clone();
        let task = tokio::spawn(async move {
            connection.reader_loop().await;
        });
        if let Ok(mut guard) = self.reader_task.try_lock() {
            *guard = Some(task);
        }
    }

    fn spawn_inactivity_monitor(self: &Arc<Self>) {
        let (outbound_tx, mut outbound_rx) = mpsc::channel(16);
        let (timeout_tx, mut timeout_rx) = mpsc::channel(1);
        let monitor = InactivityMonitor::spawn(self.core.inactivity.clone(), outbound_tx, timeout_tx);

        let forward_connection = self.clone();
        tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                if let Err(err) = forward_connection.core.sender.send(&envelope).await {
                    warn!(error = %err, "failed to send keep-alive");
                    return;
                }
                forward_connection.core.inactivity.record_write();
            }
        });

        let watchdog_connection = self.clone();
        tokio::spawn(async move {
            if timeout_rx.recv().await.is_some() {
                watchdog_connection.report_failure(TransportError::ReadTimeout.into()).await;
            }
        });

        if let Ok(mut guard) = self.monitor.try_lock() {
            *guard = Some(monitor);
        }
    }

    /// The reader task's entire lifetime: it takes sole ownership of the
    /// receive half at startup, so `recv` never needs to be shared.
    async fn reader_loop(self: Arc<Self>) {
        let mut channel = match self.receiver.lock().await.take() {
            Some(channel) => channel,
            None => {
                error!("reader loop started without a receive channel");
                return;
            }
        };
        loop {
            match channel.recv().await {
                Some(envelope) => {
                    self.core.inactivity.record_read();
                    self.handle_inbound(envelope).await;
                }
                None => {
                    self.report_failure(TransportError::Closed.into()).await;
                    return;
                }
            }
        }
    }

    async fn handle_inbound(&self, envelope: Envelope) {
        if self.core.correlator.complete(&envelope) {
            return;
        }
        match &envelope.command {
            Command::MessageDispatch(dispatch) => {
                if self.state().await == ConnectionState::Stopped {
                    debug!("dropping inbound dispatch while connection is stopped");
                    return;
                }
                let session_id = dispatch.consumer_id.session_id.clone();
                let session = self.sessions.lock().await.get(&session_id).cloned();
                match session {
                    Some(session) => session.on_dispatch(dispatch.clone()).await,
                    None => warn!(?session_id, "dispatch for unknown session"),
                }
            }
            Command::ConnectionControl(ConnectionControl { close: true, .. }) => {
                info!("broker requested connection close");
                self.report_failure(ClientError::Protocol("broker closed the connection".into())).await;
            }
            Command::KeepAliveInfo => {}
            other => {
                debug!(tag = ?other.tag(), "unhandled inbound command");
            }
        }
    }

    async fn report_failure(&self, error: ClientError) {
        if self.failed.swap(true, Ordering::SeqCst) {
            return;
        }
        error!(error = %error, "connection failed");
        let listener = self.exception_listener.lock().await.clone();
        match listener {
            Some(listener) => listener(error),
            None => error!("no exception listener registered, error logged only"),
        }
    }

    /// Orderly teardown (spec §4.6): stop all sessions, close the
    /// transport, mark the connection terminally closed.
    pub async fn close(&self) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        if *state == ConnectionState::Closed {
            return Ok(());
        }
        *state = ConnectionState::Closed;
        drop(state);

        let sessions: Vec<_> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            let _ = session.close().await;
        }

        self.core.correlator.cancel_all();
        if let Some(mut monitor) = self.monitor.lock().await.take() {
            monitor.stop();
        }
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }
}
