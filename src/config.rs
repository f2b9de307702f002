//! Connection configuration (spec §6): the typed option surface a caller
//! builds up front, and the `connect` entry point that resolves a URI
//! string plus this struct into a live, handshaked [`Connection`].

use crate::client::connection::{Channel, Connection};
use crate::client::redelivery::RedeliveryPolicy;
use crate::error::{ClientError, ClientResult};
use crate::model::ConnectionId;
use crate::transport::failover::{BrokerConnector, FailoverOptions, FailoverTransport};
use crate::transport::socket::SocketOptions;
use crate::uri::{ConnectionUri, UriConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// SSL options (spec §6): named but treated opaquely, the same as the
/// teacher treats options it doesn't interpret itself. `key_store` is
/// accepted for forward compatibility but unused: [`crate::transport::tls`]
/// only builds a CA-trusting connector today, not a client-certificate one.
#[derive(Debug, Clone, Default)]
pub struct SslOptions {
    /// PEM bundle path; the one SSL option this crate actually consumes
    /// (via [`crate::transport::tls::connector_from_ca_bundle`]).
    pub trust_store: Option<String>,
    pub trust_store_password: Option<String>,
    /// Accepted but not yet wired to a client-certificate identity.
    pub key_store: Option<String>,
    pub key_store_password: Option<String>,
}

/// The full typed option surface for one connection (spec §6): transport,
/// wire, connection, redelivery, failover, and ssl groups. Constructed
/// directly or parsed piecemeal out of a URI's query string by
/// [`ConnectionOptions::apply_uri_options`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    // --- transport group ---
    /// `connectTimeout`: how long to wait for the TCP handshake itself.
    pub connect_timeout: Duration,
    /// `soTimeout`: read-side inactivity is actually enforced by the
    /// negotiated C4 inactivity monitor, not a kernel socket timeout; this
    /// field is carried for URI-surface completeness and currently unused.
    pub so_timeout: Option<Duration>,
    /// `soLinger`: accepted but unused; `AnyStream`'s shutdown path relies
    /// on a clean FIN rather than a linger-on-close socket option.
    pub so_linger: Option<Duration>,
    pub tcp_nodelay: bool,
    pub send_buffer_size: Option<usize>,
    pub receive_buffer_size: Option<usize>,

    // --- wire group ---
    /// `tightEncodingEnabled`: the side's own preference; the negotiated
    /// value (spec §4.1) is the AND of both peers' preferences.
    pub tight_encoding_enabled: bool,
    pub cache_enabled: bool,
    pub cache_size: u16,
    pub max_inactivity_duration: Duration,
    pub stack_trace_enabled: bool,

    // --- connection group ---
    pub client_id: Option<String>,
    pub use_async_send: bool,
    pub always_sync_send: bool,
    pub send_acks_async: bool,
    pub use_compression: bool,
    pub message_priority_supported: bool,
    pub producer_window_size: Option<u32>,
    pub dispatch_async: bool,

    pub redelivery_policy: RedeliveryPolicy,
    pub failover: FailoverOptions,
    pub ssl: SslOptions,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            so_timeout: None,
            so_linger: None,
            tcp_nodelay: true,
            send_buffer_size: None,
            receive_buffer_size: None,
            tight_encoding_enabled: false,
            cache_enabled: false,
            cache_size: 1024,
            max_inactivity_duration: Duration::from_secs(30),
            stack_trace_enabled: true,
            client_id: None,
            use_async_send: false,
            always_sync_send: false,
            send_acks_async: false,
            use_compression: false,
            message_priority_supported: false,
            producer_window_size: None,
            dispatch_async: true,
            redelivery_policy: RedeliveryPolicy::default(),
            failover: FailoverOptions::default(),
            ssl: SslOptions::default(),
        }
    }
}

impl ConnectionOptions {
    /// Overlay the recognized transport/connection-group keys found in a
    /// parsed URI's query map (spec §6). Unrecognized keys are ignored, the
    /// same tolerant stance the teacher's option parsing takes.
    pub fn apply_uri_options(&mut self, options: &std::collections::HashMap<String, String>) {
        if let Some(v) = options.get("connectTimeout").and_then(|v| v.parse().ok()) {
            self.connect_timeout = Duration::from_millis(v);
        }
        if let Some(v) = options.get("soTimeout").and_then(|v| v.parse().ok()) {
            self.so_timeout = Some(Duration::from_millis(v));
        }
        if let Some(v) = options.get("soLinger").and_then(|v| v.parse().ok()) {
            self.so_linger = Some(Duration::from_millis(v));
        }
        if let Some(v) = options.get("tcpNoDelay").and_then(|v| v.parse().ok()) {
            self.tcp_nodelay = v;
        }
        if let Some(v) = options.get("sendBufferSize").and_then(|v| v.parse().ok()) {
            self.send_buffer_size = Some(v);
        }
        if let Some(v) = options.get("receiveBufferSize").and_then(|v| v.parse().ok()) {
            self.receive_buffer_size = Some(v);
        }
        if let Some(v) = options.get("tightEncodingEnabled").and_then(|v| v.parse().ok()) {
            self.tight_encoding_enabled = v;
        }
        if let Some(v) = options.get("cacheEnabled").and_then(|v| v.parse().ok()) {
            self.cache_enabled = v;
        }
        if let Some(v) = options.get("cacheSize").and_then(|v| v.parse().ok()) {
            self.cache_size = v;
        }
        if let Some(v) = options.get("maxInactivityDuration").and_then(|v| v.parse().ok()) {
            self.max_inactivity_duration = Duration::from_millis(v);
        }
        if let Some(v) = options.get("stackTraceEnabled").and_then(|v| v.parse().ok()) {
            self.stack_trace_enabled = v;
        }
        if let Some(v) = options.get("clientID") {
            self.client_id = Some(v.clone());
        }
        if let Some(v) = options.get("useAsyncSend").and_then(|v| v.parse().ok()) {
            self.use_async_send = v;
        }
        if let Some(v) = options.get("alwaysSyncSend").and_then(|v| v.parse().ok()) {
            self.always_sync_send = v;
        }
        if let Some(v) = options.get("sendAcksAsync").and_then(|v| v.parse().ok()) {
            self.send_acks_async = v;
        }
        if let Some(v) = options.get("useCompression").and_then(|v| v.parse().ok()) {
            self.use_compression = v;
        }
        if let Some(v) = options.get("messagePrioritySupported").and_then(|v| v.parse().ok()) {
            self.message_priority_supported = v;
        }
        if let Some(v) = options.get("producerWindowSize").and_then(|v| v.parse().ok()) {
            self.producer_window_size = Some(v);
        }
        if let Some(v) = options.get("dispatchAsync").and_then(|v| v.parse().ok()) {
            self.dispatch_async = v;
        }
        if let Some(v) = options.get("trustStore") {
            self.ssl.trust_store = Some(v.clone());
        }
        if let Some(v) = options.get("keyStore") {
            self.ssl.key_store = Some(v.clone());
        }
    }

    fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            nodelay: self.tcp_nodelay,
            send_buffer_size: self.send_buffer_size,
            recv_buffer_size: self.receive_buffer_size,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Parse `uri`, dial it (directly or via failover), perform wireformat
/// negotiation, and return a handshaked connection ready for
/// [`Connection::start`] (spec §4.6, §6). This is the crate's one public
/// "just connect me" entry point.
pub async fn connect(uri: &str, options: ConnectionOptions) -> ClientResult<Arc<Connection>> {
    let mut options = options;
    let parsed = ConnectionUri::parse(uri).map_err(|err| ClientError::LocalUsage(err.to_string()))?;
    match &parsed {
        ConnectionUri::Direct(target) => options.apply_uri_options(&target.options),
        ConnectionUri::Failover { options: outer, .. } => options.apply_uri_options(outer),
    }

    let socket_options = options.socket_options();
    let connector = Arc::new(UriConnector::new(socket_options));
    let connection_id = ConnectionId::generate();

    let channel = if parsed.is_failover() {
        let priority_uris = options.failover.priority_uris.clone();
        let candidates = parsed.candidates(options.failover.randomize, &priority_uris);
        let recoverable = Arc::new(RwLock::new(Vec::new()));
        let transport = FailoverTransport::spawn(connector, candidates, options.failover.clone(), recoverable)
            .map_err(ClientError::from)?;
        Channel::Failover(transport)
    } else {
        let candidates = parsed.candidates(false, &[]);
        let target = candidates.first().expect("a direct uri always yields exactly one candidate");
        let transport = connector.connect(&target.uri).await?;
        Channel::Direct(transport)
    };

    Connection::handshake(connection_id, channel, options.client_id.clone()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_uri_options_overlays_recognized_keys_only() {
        let mut options = ConnectionOptions::default();
        let mut query = std::collections::HashMap::new();
        query.insert("tcpNoDelay".to_string(), "false".to_string());
        query.insert("producerWindowSize".to_string(), "65536".to_string());
        query.insert("somethingUnrecognized".to_string(), "ignored".to_string());
        options.apply_uri_options(&query);
        assert!(!options.tcp_nodelay);
        assert_eq!(options.producer_window_size, Some(65536));
    }

    #[test]
    fn default_redelivery_and_failover_options_match_their_own_defaults() {
        let options = ConnectionOptions::default();
        assert_eq!(options.redelivery_policy, RedeliveryPolicy::default());
        assert!(options.failover.randomize);
    }
}
