//! Connection URI parsing (spec §6): `scheme://host:port?opt=value` for a
//! direct broker, and the failover list form
//! `failover:(uri1,uri2,...)?opt=value`. Resolves into a [`BrokerConnector`]
//! the connection layer can hand to [`crate::transport::failover`] or dial
//! directly, plus the raw option map [`crate::config::ConnectionOptions`]
//! applies on top of its own defaults.

use crate::error::TransportError;
use crate::transport::failover::{BrokerConnector, BrokerUri};
use crate::transport::io_transport::IoTransport;
use crate::transport::socket::{connect_tcp, SocketOptions};
use crate::transport::stream::AnyStream;
use crate::transport::tls::{connect_tls, connector_from_ca_bundle};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UriError {
    #[error("connection uri is empty")]
    Empty,
    #[error("connection uri {0:?} has no scheme")]
    NoScheme(String),
    #[error("unrecognized connection scheme {0:?}")]
    UnknownScheme(String),
    #[error("failover uri {0:?} has no parenthesized broker list")]
    MalformedFailoverList(String),
    #[error("uri {0:?} has no host")]
    NoHost(String),
    #[error("port {0:?} is not a valid number")]
    InvalidPort(String),
}

/// Schemes recognized on a direct (non-failover) broker target (spec §6).
/// `mock` dials plain TCP, the same as `tcp`; it exists as a scheme of its
/// own so test harnesses can select it without special-casing a real one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Ssl,
    Mock,
}

/// One broker target: scheme, host, port, and its own option map. A
/// `failover:(...)` member may carry options overriding the outer ones,
/// e.g. `failover:(ssl://a:61617?trustStore=/a.pem,tcp://b:61616)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerTarget {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub options: HashMap<String, String>,
}

impl BrokerTarget {
    fn to_uri_string(&self) -> String {
        let scheme = match self.scheme {
            Scheme::Tcp => "tcp",
            Scheme::Ssl => "ssl",
            Scheme::Mock => "mock",
        };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// The result of parsing a connection URI (spec §6).
#[derive(Debug, Clone)]
pub enum ConnectionUri {
    Direct(BrokerTarget),
    Failover { targets: Vec<BrokerTarget>, options: HashMap<String, String> },
}

impl ConnectionUri {
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(UriError::Empty);
        }
        if let Some(rest) = uri.strip_prefix("failover:") {
            let (list, query) = split_failover_list(rest)?;
            let options = parse_query(query);
            let targets = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(parse_broker_target)
                .collect::<Result<Vec<_>, _>>()?;
            if targets.is_empty() {
                return Err(UriError::MalformedFailoverList(rest.to_string()));
            }
            return Ok(ConnectionUri::Failover { targets, options });
        }
        parse_broker_target(uri).map(ConnectionUri::Direct)
    }

    /// This URI's broker-candidate list, in the ordering
    /// [`crate::transport::failover::build_candidate_list`] expects: a
    /// direct URI is a single-element primary list with no backups.
    pub fn candidates(&self, randomize: bool, priority_uris: &[String]) -> Vec<BrokerUri> {
        match self {
            ConnectionUri::Direct(target) => {
                crate::transport::failover::build_candidate_list(&[target.to_uri_string()], &[], priority_uris, false)
            }
            ConnectionUri::Failover { targets, .. } => {
                let primaries: Vec<String> = targets.iter().map(BrokerTarget::to_uri_string).collect();
                crate::transport::failover::build_candidate_list(&primaries, &[], priority_uris, randomize)
            }
        }
    }

    pub fn is_failover(&self) -> bool {
        matches!(self, ConnectionUri::Failover { .. })
    }
}

fn split_failover_list(rest: &str) -> Result<(&str, &str), UriError> {
    let rest = rest.trim();
    if !rest.starts_with('(') {
        return Err(UriError::MalformedFailoverList(rest.to_string()));
    }
    let close = rest.find(')').ok_or_else(|| UriError::MalformedFailoverList(rest.to_string()))?;
    let list = &rest[1..close];
    let query = rest[close + 1..].strip_prefix('?').unwrap_or("");
    Ok((list, query))
}

fn parse_broker_target(uri: &str) -> Result<BrokerTarget, UriError> {
    let (scheme_str, rest) = uri.split_once("://").ok_or_else(|| UriError::NoScheme(uri.to_string()))?;
    let scheme = match scheme_str {
        "tcp" => Scheme::Tcp,
        "ssl" => Scheme::Ssl,
        "mock" => Scheme::Mock,
        other => return Err(UriError::UnknownScheme(other.to_string())),
    };
    let (authority, query) = match rest.split_once('?') {
        Some((a, q)) => (a, q),
        None => (rest, ""),
    };
    let (host, port_str) = authority.rsplit_once(':').ok_or_else(|| UriError::NoHost(uri.to_string()))?;
    if host.is_empty() {
        return Err(UriError::NoHost(uri.to_string()));
    }
    let port: u16 = port_str.parse().map_err(|_| UriError::InvalidPort(port_str.to_string()))?;
    Ok(BrokerTarget { scheme, host: host.to_string(), port, options: parse_query(query) })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Dials a [`BrokerTarget`] string by scheme. The one [`BrokerConnector`]
/// implementation every connection strategy (direct or failover) shares:
/// failover just calls it once per candidate in its reconnect loop.
pub struct UriConnector {
    socket_options: SocketOptions,
}

impl UriConnector {
    pub fn new(socket_options: SocketOptions) -> Self {
        Self { socket_options }
    }
}

#[async_trait]
impl BrokerConnector for UriConnector {
    async fn connect(&self, uri: &str) -> Result<IoTransport<AnyStream>, TransportError> {
        let target = parse_broker_target(uri).map_err(|err| TransportError::Connect {
            uri: uri.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()),
        })?;
        let stream = match target.scheme {
            Scheme::Tcp | Scheme::Mock => connect_tcp(&target.host, target.port, &self.socket_options).await?,
            Scheme::Ssl => {
                let trust_store = target.options.get("trustStore").ok_or_else(|| {
                    TransportError::Tls(format!("ssl target {uri:?} has no trustStore option naming a CA bundle path"))
                })?;
                let bundle = std::fs::read(trust_store).map_err(TransportError::Io)?;
                let connector = connector_from_ca_bundle(&bundle)?;
                connect_tls(&target.host, target.port, None, connector, &self.socket_options).await?
            }
        };
        Ok(IoTransport::spawn(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_direct_tcp_uri_with_options() {
        let parsed = ConnectionUri::parse("tcp://broker.example:61616?connectTimeout=5000&tcpNoDelay=true").unwrap();
        let ConnectionUri::Direct(target) = parsed else { panic!("expected a direct uri") };
        assert_eq!(target.scheme, Scheme::Tcp);
        assert_eq!(target.host, "broker.example");
        assert_eq!(target.port, 61616);
        assert_eq!(target.options.get("connectTimeout").map(String::as_str), Some("5000"));
        assert_eq!(target.options.get("tcpNoDelay").map(String::as_str), Some("true"));
    }

    #[test]
    fn parses_a_failover_list_with_per_member_and_outer_options() {
        let parsed = ConnectionUri::parse("failover:(tcp://a:61616,tcp://b:61616?tcpNoDelay=false)?randomize=false").unwrap();
        let ConnectionUri::Failover { targets, options } = parsed else { panic!("expected a failover uri") };
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].host, "a");
        assert_eq!(targets[1].options.get("tcpNoDelay").map(String::as_str), Some("false"));
        assert_eq!(options.get("randomize").map(String::as_str), Some("false"));
    }

    #[test]
    fn rejects_an_unrecognized_scheme() {
        let result = ConnectionUri::parse("amqp://broker:5672");
        assert!(matches!(result, Err(UriError::UnknownScheme(scheme)) if scheme == "amqp"));
    }

    #[test]
    fn rejects_a_uri_with_no_port() {
        let result = ConnectionUri::parse("tcp://broker.example");
        assert!(matches!(result, Err(UriError::NoHost(_))));
    }

    #[test]
    fn direct_uri_candidates_is_a_single_non_randomized_entry() {
        let parsed = ConnectionUri::parse("tcp://broker.example:61616").unwrap();
        let candidates = parsed.candidates(true, &[]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].uri, "tcp://broker.example:61616");
        assert!(!parsed.is_failover());
    }
}
