//! Destinations: queues, topics, and their temporary variants (spec §3, §6).

use super::ids::ConnectionId;
use std::collections::BTreeMap;
use std::fmt;

/// The kind of a simple (non-composite) destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationKind {
    Queue,
    Topic,
    TemporaryQueue,
    TemporaryTopic,
}

impl DestinationKind {
    /// Wire-level tag, per the `queue://`, `topic://`, `temp-queue://`,
    /// `temp-topic://` naming conventions of spec §6.
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Topic => "topic",
            Self::TemporaryQueue => "temp-queue",
            Self::TemporaryTopic => "temp-topic",
        }
    }

    pub const fn is_temporary(self) -> bool {
        matches!(self, Self::TemporaryQueue | Self::TemporaryTopic)
    }

    pub const fn is_topic(self) -> bool { matches!(self, Self::Topic | Self::TemporaryTopic) }
}

/// A single, non-composite destination: kind, physical name, and parsed
/// option parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleDestination {
    pub kind: DestinationKind,
    pub physical_name: String,
    pub options: BTreeMap<String, String>,
}

impl SimpleDestination {
    pub fn new(kind: DestinationKind, physical_name: impl Into<String>) -> Self {
        Self { kind, physical_name: physical_name.into(), options: BTreeMap::new() }
    }

    /// Build a temporary destination owned by `connection_id`. The owning
    /// connection id is embedded in the name so a broker can reject
    /// cross-connection use (spec §3).
    pub fn temporary(kind: DestinationKind, connection_id: &ConnectionId, seq: u64) -> Self {
        debug_assert!(kind.is_temporary());
        Self::new(kind, format!("{}:{}", connection_id, seq))
    }

    /// The connection id embedded in a temporary destination's name, if any.
    pub fn owning_connection(&self) -> Option<&str> {
        if !self.kind.is_temporary() {
            return None;
        }
        self.physical_name.split(':').next()
    }
}

impl fmt::Display for SimpleDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind.scheme(), self.physical_name)
    }
}

/// A destination as carried on the wire and by the public API: either a
/// single destination or a comma-separated composite list (spec §3, §6).
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Simple(SimpleDestination),
    Composite(Vec<SimpleDestination>),
}

impl Destination {
    pub fn simple(kind: DestinationKind, physical_name: impl Into<String>) -> Self {
        Self::Simple(SimpleDestination::new(kind, physical_name))
    }

    /// Parse the comma-separated composite form. A bare name component
    /// defaults to queue, matching the parser-level convention in spec §6
    /// (the core also accepts an already-typed `Destination` without
    /// parsing, via `Destination::simple`/`Destination::Composite`).
    pub fn parse(text: &str) -> Self {
        let parts: Vec<SimpleDestination> = text.split(',').map(parse_simple).collect();
        if parts.len() == 1 {
            Self::Simple(parts.into_iter().next().expect("checked len == 1"))
        } else {
            Self::Composite(parts)
        }
    }

    pub fn is_composite(&self) -> bool { matches!(self, Self::Composite(_)) }

    /// Iterate the simple destinations making up this (possibly composite)
    /// destination.
    pub fn parts(&self) -> Box<dyn Iterator<Item = &SimpleDestination> + '_> {
        match self {
            Self::Simple(d) => Box::new(std::iter::once(d)),
            Self::Composite(parts) => Box::new(parts.iter()),
        }
    }
}

fn parse_simple(part: &str) -> SimpleDestination {
    let part = part.trim();
    if let Some(rest) = part.strip_prefix("temp-queue://") {
        SimpleDestination::new(DestinationKind::TemporaryQueue, rest)
    } else if let Some(rest) = part.strip_prefix("temp-topic://") {
        SimpleDestination::new(DestinationKind::TemporaryTopic, rest)
    } else if let Some(rest) = part.strip_prefix("topic://") {
        SimpleDestination::new(DestinationKind::Topic, rest)
    } else if let Some(rest) = part.strip_prefix("queue://") {
        SimpleDestination::new(DestinationKind::Queue, rest)
    } else {
        // Bare names default to queue at the parser level (spec §6).
        SimpleDestination::new(DestinationKind::Queue, part)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(d) => write!(f, "{d}"),
            Self::Composite(parts) => {
                let rendered: Vec<String> = parts.iter().map(ToString::to_string).collect();
                write!(f, "{}", rendered.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_defaults_to_queue() {
        let dest = Destination::parse("Q.T1");
        match dest {
            Destination::Simple(d) => assert_eq!(d.kind, DestinationKind::Queue),
            Destination::Composite(_) => panic!("expected simple destination"),
        }
    }

    #[test]
    fn composite_destination_splits_on_comma() {
        let dest = Destination::parse("queue://A,topic://B");
        assert!(dest.is_composite());
        assert_eq!(dest.parts().count(), 2);
    }

    #[test]
    fn temporary_destination_embeds_owning_connection() {
        let conn = ConnectionId("ID:abc-1".to_string());
        let dest = SimpleDestination::temporary(DestinationKind::TemporaryQueue, &conn, 1);
        assert_eq!(dest.owning_connection(), Some("ID:abc-1"));
    }
}
