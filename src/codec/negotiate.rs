//! Wireformat negotiation (C5, spec §4.5).
//!
//! Both sides open a connection by exchanging a `WireformatInfo` command
//! encoded in the fixed bootstrap format (loose, no cache, version 1) before
//! either side knows what the peer supports. Once both sides have sent and
//! received their `WireformatInfo`, the negotiated settings — the narrower
//! of the two proposals on every axis — govern every command that follows.

use crate::error::WireformatError;
use crate::model::command::WireformatInfo;

/// The format every connection starts in, before negotiation completes.
/// Loose encoding only; nothing may be assumed about the peer's
/// capabilities yet.
pub const BOOTSTRAP_VERSION: u32 = 1;

pub fn bootstrap_wireformat_info() -> WireformatInfo {
    WireformatInfo {
        version: BOOTSTRAP_VERSION,
        tight_encoding_enabled: false,
        cache_enabled: false,
        cache_size: 0,
        max_inactivity_duration_ms: 30_000,
        max_inactivity_duration_initial_delay_ms: 10_000,
        stack_trace_enabled: false,
        message_compression_enabled: false,
    }
}

/// The settings actually in force on a connection once both peers have
/// exchanged their proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedWireformat {
    pub version: u32,
    pub tight_encoding_enabled: bool,
    pub cache_enabled: bool,
    pub cache_size: u32,
    pub max_inactivity_duration_ms: i64,
    pub max_inactivity_duration_initial_delay_ms: i64,
    pub stack_trace_enabled: bool,
}

/// Negotiate the narrower of `local` (what we offered) and `remote` (what
/// the peer offered): version takes the minimum, boolean capabilities are
/// ANDed, and the inactivity window takes the minimum so neither side waits
/// longer than the other is willing to wait (spec §4.4, §4.5).
pub fn negotiate(local: &WireformatInfo, remote: &WireformatInfo) -> NegotiatedWireformat {
    NegotiatedWireformat {
        version: local.version.min(remote.version),
        tight_encoding_enabled: local.tight_encoding_enabled && remote.tight_encoding_enabled,
        cache_enabled: local.cache_enabled && remote.cache_enabled,
        cache_size: local.cache_size.min(remote.cache_size),
        max_inactivity_duration_ms: min_nonzero(
            local.max_inactivity_duration_ms,
            remote.max_inactivity_duration_ms,
        ),
        max_inactivity_duration_initial_delay_ms: local
            .max_inactivity_duration_initial_delay_ms
            .min(remote.max_inactivity_duration_initial_delay_ms),
        stack_trace_enabled: local.stack_trace_enabled && remote.stack_trace_enabled,
    }
}

/// Zero means "disabled" for the inactivity window (spec §4.4), so the
/// narrower non-zero value only wins when both sides actually want a
/// watchdog; if either side proposes zero, inactivity monitoring is off.
fn min_nonzero(a: i64, b: i64) -> i64 {
    if a == 0 || b == 0 { 0 } else { a.min(b) }
}

/// Tracks whether this side has sent and received its `WireformatInfo`,
/// gating use of any negotiated setting until both have happened.
#[derive(Debug, Default)]
pub struct Negotiator {
    sent: Option<WireformatInfo>,
    received: Option<WireformatInfo>,
    negotiated: Option<NegotiatedWireformat>,
}

impl Negotiator {
    pub fn new() -> Self { Self::default() }

    pub fn record_sent(&mut self, info: WireformatInfo) { self.sent = Some(info); }

    pub fn record_received(&mut self, info: WireformatInfo) -> Result<NegotiatedWireformat, WireformatError> {
        let local = self.sent.as_ref().ok_or(WireformatError::NoNegotiation)?;
        let negotiated = negotiate(local, &info);
        self.received = Some(info);
        self.negotiated = Some(negotiated);
        Ok(negotiated)
    }

    pub fn negotiated(&self) -> Option<NegotiatedWireformat> { self.negotiated }

    pub fn is_complete(&self) -> bool { self.negotiated.is_some() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(version: u32, tight: bool, cache: bool, inactivity_ms: i64) -> WireformatInfo {
        WireformatInfo {
            version,
            tight_encoding_enabled: tight,
            cache_enabled: cache,
            cache_size: if cache { 256 } else { 0 },
            max_inactivity_duration_ms: inactivity_ms,
            max_inactivity_duration_initial_delay_ms: 5_000,
            stack_trace_enabled: false,
            message_compression_enabled: false,
        }
    }

    #[test]
    fn negotiated_version_is_the_minimum_of_both_sides() {
        let negotiated = negotiate(&info(12, true, true, 30_000), &info(9, true, true, 30_000));
        assert_eq!(negotiated.version, 9);
    }

    #[test]
    fn tight_encoding_requires_both_sides_to_want_it() {
        let negotiated = negotiate(&info(12, true, true, 30_000), &info(12, false, true, 30_000));
        assert!(!negotiated.tight_encoding_enabled);
    }

    #[test]
    fn zero_inactivity_from_either_side_disables_the_watchdog() {
        let negotiated = negotiate(&info(12, true, true, 30_000), &info(12, true, true, 0));
        assert_eq!(negotiated.max_inactivity_duration_ms, 0);
    }

    #[test]
    fn negotiator_requires_a_sent_proposal_before_recording_a_received_one() {
        let mut negotiator = Negotiator::new();
        let err = negotiator.record_received(info(12, true, true, 30_000)).unwrap_err();
        assert!(matches!(err, WireformatError::NoNegotiation));
    }

    #[test]
    fn negotiator_completes_once_both_sides_are_recorded() {
        let mut negotiator = Negotiator::new();
        negotiator.record_sent(bootstrap_wireformat_info());
        assert!(!negotiator.is_complete());
        negotiator.record_received(info(12, true, true, 30_000)).unwrap();
        assert!(negotiator.is_complete());
    }
}
