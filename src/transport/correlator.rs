//! The response correlator (C6, spec §4.4): maps outbound command ids to a
//! rendezvous slot, completed either by the matching inbound `Response`/
//! `ExceptionResponse` or by a transport failure/cancellation sweep.

use crate::error::{ClientError, CorrelationError, TransportError};
use crate::model::{Command, CommandIdGenerator, Envelope, ExceptionResponse};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};
use tracing::{debug, trace, warn};

/// What a correlated request eventually resolves to: either the broker's
/// plain acknowledgement or a broker-reported exception.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrelatedResponse {
    Ack,
    Exception(ExceptionResponse),
}

type Slot = oneshot::Sender<Result<CorrelatedResponse, TransportError>>;
type SlotMap = Arc<Mutex<HashMap<u32, Slot>>>;

/// A registered, not-yet-resolved wait for the response to one command id.
/// Holding this value is proof the slot already exists in the correlator's
/// map (spec §4.4: no window between registering and sending where a fast
/// reply could be dropped as unmatched).
pub struct PendingResponse {
    command_id: u32,
    rx: oneshot::Receiver<Result<CorrelatedResponse, TransportError>>,
    slots: SlotMap,
}

impl PendingResponse {
    /// Wait indefinitely for this command id's response.
    pub async fn wait(self) -> Result<CorrelatedResponse, ClientError> {
        match self.rx.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(transport_err)) => Err(CorrelationError::TransportFailed(self.command_id, transport_err).into()),
            Err(_) => Err(CorrelationError::Cancelled(self.command_id).into()),
        }
    }

    /// Wait up to `duration`, removing the slot on timeout so a late reply
    /// is dropped as unmatched instead of resolving a receiver nobody reads.
    pub async fn wait_timeout(self, duration: Duration) -> Result<CorrelatedResponse, ClientError> {
        let PendingResponse { command_id, rx, slots } = self;
        match timeout(duration, rx).await {
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(transport_err))) => Err(CorrelationError::TransportFailed(command_id, transport_err).into()),
            Ok(Err(_)) => Err(CorrelationError::Cancelled(command_id).into()),
            Err(_) => {
                slots.lock().expect("correlator mutex poisoned").remove(&command_id);
                Err(CorrelationError::Timeout(command_id).into())
            }
        }
    }
}

/// Command-id generator plus the id-to-slot map. Ids wrap at `2^31 - 1`
/// (spec §4.4, §3); a slot is removed from the map the moment it completes,
/// so a reissued id after wraparound never collides with a still-live one.
pub struct Correlator {
    ids: CommandIdGenerator,
    slots: SlotMap,
}

impl Correlator {
    pub fn new() -> Self {
        Self { ids: CommandIdGenerator::new(), slots: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Allocate the next command id, wrapping back to 1 past `2^31 - 1`.
    pub fn next_command_id(&self) -> u32 {
        self.ids.next()
    }

    /// Register a rendezvous slot for `command_id`, synchronously, so the
    /// slot exists before the caller sends the matching envelope. `wait`
    /// being an `async fn` would otherwise defer registration to its first
    /// poll, leaving a window where a very fast reply arrives and is
    /// dropped as unmatched (spec §4.4 requires no such window).
    pub fn register(&self, command_id: u32) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().expect("correlator mutex poisoned").insert(command_id, tx);
        PendingResponse { command_id, rx, slots: self.slots.clone() }
    }

    /// Register and wait indefinitely for the response to `command_id`, for
    /// callers that don't need to separate registration from sending (e.g.
    /// tests).
    pub async fn wait(&self, command_id: u32) -> Result<CorrelatedResponse, ClientError> {
        self.register(command_id).wait().await
    }

    /// Register and wait up to `duration` for the response to `command_id`.
    pub async fn wait_timeout(&self, command_id: u32, duration: Duration) -> Result<CorrelatedResponse, ClientError> {
        self.register(command_id).wait_timeout(duration).await
    }

    /// Complete a slot from an inbound envelope. Returns `true` if the
    /// envelope was a correlated response and was routed to a waiter (or
    /// the waiter had already given up, which is not an error).
    pub fn complete(&self, envelope: &Envelope) -> bool {
        let (correlation_id, response) = match &envelope.command {
            Command::Response(r) => (r.correlation_id, CorrelatedResponse::Ack),
            Command::ExceptionResponse(e) => (e.correlation_id, CorrelatedResponse::Exception(e.clone())),
            _ => return false,
        };
        let slot = self.slots.lock().expect("correlator mutex poisoned").remove(&correlation_id);
        match slot {
            Some(tx) => {
                trace!(correlation_id, "delivering correlated response");
                let _ = tx.send(Ok(response));
                true
            }
            None => {
                debug!(correlation_id, "no waiter registered for correlated response, dropping");
                false
            }
        }
    }

    /// Complete every outstanding slot with a transport failure (spec
    /// §4.4). Called once when the reader detects a terminal failure.
    pub fn fail_all(&self, error: &TransportError) {
        let mut slots = self.slots.lock().expect("correlator mutex poisoned");
        if slots.is_empty() {
            return;
        }
        warn!(count = slots.len(), "failing all outstanding correlated waits");
        for (_, tx) in slots.drain() {
            let _ = tx.send(Err(clone_transport_error(error)));
        }
    }

    /// Cancel every outstanding slot, e.g. on connection close. The waiter
    /// sees `CorrelationError::Cancelled` because dropping the sender
    /// without a value closes the receiver.
    pub fn cancel_all(&self) {
        let mut slots = self.slots.lock().expect("correlator mutex poisoned");
        slots.clear();
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

/// `TransportError` doesn't derive `Clone` (it wraps `io::Error`); render
/// it down to a fresh equivalent error carrying the same message instead of
/// threading a clone bound through the whole error hierarchy.
fn clone_transport_error(error: &TransportError) -> TransportError {
    TransportError::Io(std::io::Error::new(std::io::ErrorKind::Other, error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Response;

    #[test]
    fn command_ids_are_distinct_across_successive_allocations() {
        let correlator = Correlator::new();
        let a = correlator.next_command_id();
        let b = correlator.next_command_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn wait_resolves_once_matching_response_arrives() {
        let correlator = Correlator::new();
        let id = correlator.next_command_id();
        let waiter = {
            let correlator = &correlator;
            async move { correlator.wait(id).await }
        };
        let envelope = Envelope { command_id: 999, command: Command::Response(Response { correlation_id: id }) };
        let (result, _) = tokio::join!(waiter, async {
            tokio::task::yield_now().await;
            assert!(correlator.complete(&envelope));
        });
        assert_eq!(result.unwrap(), CorrelatedResponse::Ack);
    }

    #[tokio::test]
    async fn exception_response_is_delivered_as_an_exception_variant() {
        let correlator = Correlator::new();
        let id = correlator.next_command_id();
        let waiter = correlator.wait(id);
        let envelope = Envelope {
            command_id: 1,
            command: Command::ExceptionResponse(ExceptionResponse {
                correlation_id: id,
                exception_class: "javax.jms.JMSException".into(),
                message: "boom".into(),
            }),
        };
        let (result, _) = tokio::join!(waiter, async {
            tokio::task::yield_now().await;
            correlator.complete(&envelope);
        });
        match result.unwrap() {
            CorrelatedResponse::Exception(e) => assert_eq!(e.message, "boom"),
            other => panic!("expected exception, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wait_timeout_expires_and_removes_its_slot() {
        let correlator = Correlator::new();
        let id = correlator.next_command_id();
        let result = correlator.wait_timeout(id, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ClientError::Correlation(CorrelationError::Timeout(_)))));
        assert!(correlator.slots.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fail_all_completes_every_outstanding_waiter_with_a_transport_failure() {
        let correlator = Correlator::new();
        let id_a = correlator.next_command_id();
        let id_b = correlator.next_command_id();
        let waiter_a = correlator.wait(id_a);
        let waiter_b = correlator.wait(id_b);
        let (result_a, result_b, _) = tokio::join!(waiter_a, waiter_b, async {
            tokio::task::yield_now().await;
            correlator.fail_all(&TransportError::Closed);
        });
        assert!(matches!(result_a, Err(ClientError::Correlation(CorrelationError::TransportFailed(_, _)))));
        assert!(matches!(result_b, Err(ClientError::Correlation(CorrelationError::TransportFailed(_, _)))));
    }

    #[tokio::test]
    async fn cancel_all_completes_waiters_as_cancelled() {
        let correlator = Correlator::new();
        let id = correlator.next_command_id();
        let waiter = correlator.wait(id);
        let (result, _) = tokio::join!(waiter, async {
            tokio::task::yield_now().await;
            correlator.cancel_all();
        });
        assert!(matches!(result, Err(ClientError::Correlation(CorrelationError::Cancelled(_)))));
    }

    #[test]
    fn unmatched_response_is_dropped_without_panicking() {
        let correlator = Correlator::new();
        let envelope = Envelope { command_id: 1, command: Command::Response(Response { correlation_id: 404 }) };
        assert!(!correlator.complete(&envelope));
    }
}
