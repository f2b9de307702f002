//! The IO transport (C3, spec §4.3): turns a raw byte stream into a command
//! stream. The stream is split into independent read/write halves so a slow
//! or blocked read can never stall an outbound write and vice versa; a
//! reader task owns the read half exclusively, while the write half is
//! mutex-guarded only to serialize concurrent senders against each other.

use super::stream::AnyStream;
use crate::codec::{decode_envelope, encode_envelope, read_length_prefix, write_frame};
use crate::error::TransportError;
use crate::model::Envelope;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Handle to a running IO transport: send envelopes, receive inbound ones,
/// and observe whether the reader task has detected a terminal failure.
pub struct IoTransport<S = AnyStream>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    writer: Arc<Mutex<WriteHalf<S>>>,
    inbound: mpsc::Receiver<Envelope>,
    tight: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl<S> IoTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Split `stream` and spawn the reader task over its read half. `tight`
    /// starts false (loose bootstrap encoding) and is flipped once
    /// wireformat negotiation completes, via [`IoTransport::set_tight`].
    pub fn spawn(stream: S) -> Self {
        let (read_half, write_half) = split(stream);
        let writer = Arc::new(Mutex::new(write_half));
        let (tx, rx) = mpsc::channel(256);
        let tight = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));

        let reader_tight = tight.clone();
        let reader_failed = failed.clone();
        let reader_task = tokio::spawn(async move {
            if let Err(err) = read_loop(read_half, tx, reader_tight).await {
                warn!(error = %err, "io transport reader failed");
            }
            reader_failed.store(true, Ordering::SeqCst);
        });

        Self { writer, inbound: rx, tight, failed, reader_task }
    }

    pub fn set_tight(&self, tight: bool) { self.tight.store(tight, Ordering::SeqCst); }

    pub fn is_failed(&self) -> bool { self.failed.load(Ordering::SeqCst) }

    /// Marshal and write one envelope. Multiple callers may hold an
    /// `IoTransport` reference and call this concurrently; the write-half
    /// mutex guarantees one frame finishes writing before the next starts,
    /// so frames are never interleaved on the wire. This never contends
    /// with the reader task, which owns the read half exclusively.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let tight = self.tight.load(Ordering::SeqCst);
        let payload = encode_envelope(envelope, tight)?;
        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.extend_from_slice(&envelope.command_id.to_be_bytes());
        write_frame(&mut frame, &payload)?;
        let mut half = self.writer.lock().await;
        half.write_all(&frame).await.map_err(TransportError::Io)?;
        Ok(())
    }

    /// Receive the next decoded inbound envelope, or `None` once the reader
    /// task has exited (transport closed or failed).
    pub async fn recv(&mut self) -> Option<Envelope> { self.inbound.recv().await }

    pub async fn close(self) -> Result<(), TransportError> {
        self.reader_task.abort();
        let mut half = self.writer.lock().await;
        half.shutdown().await.map_err(TransportError::Io)
    }

    /// A cheaply cloneable write-side handle, for callers (e.g. the
    /// failover transport, C7) that need to hold onto the ability to send
    /// without owning the whole transport, whose read half is consumed by a
    /// dedicated forwarding task instead.
    pub fn sender(&self) -> IoSender<S> {
        IoSender { writer: self.writer.clone(), tight: self.tight.clone(), failed: self.failed.clone() }
    }
}

/// The write half of an [`IoTransport`], cloneable and independent of the
/// reader task's ownership of the read half.
pub struct IoSender<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    writer: Arc<Mutex<WriteHalf<S>>>,
    tight: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl<S> Clone for IoSender<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn clone(&self) -> Self {
        Self { writer: self.writer.clone(), tight: self.tight.clone(), failed: self.failed.clone() }
    }
}

impl<S> IoSender<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn set_tight(&self, tight: bool) { self.tight.store(tight, Ordering::SeqCst); }

    pub fn is_failed(&self) -> bool { self.failed.load(Ordering::SeqCst) }

    pub async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let tight = self.tight.load(Ordering::SeqCst);
        let payload = encode_envelope(envelope, tight)?;
        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.extend_from_slice(&envelope.command_id.to_be_bytes());
        write_frame(&mut frame, &payload)?;
        let mut half = self.writer.lock().await;
        half.write_all(&frame).await.map_err(TransportError::Io)?;
        Ok(())
    }
}

/// A frame on this transport's wire is `[4-byte command id][4-byte length][payload]`,
/// the command id sitting outside the codec's own length-prefixed frame
/// (spec §4.1: the id is part of the fixed envelope header, not the
/// per-command body the codec tags and marshals).
async fn read_loop<R>(mut half: ReadHalf<R>, tx: mpsc::Sender<Envelope>, tight: Arc<AtomicBool>) -> Result<(), TransportError>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut header = [0u8; 4];
    loop {
        half.read_exact(&mut header).await.map_err(read_err)?;
        let command_id = u32::from_be_bytes(header);
        half.read_exact(&mut header).await.map_err(read_err)?;
        let length = read_length_prefix(&header)?;
        let mut payload = vec![0u8; length as usize];
        half.read_exact(&mut payload).await.map_err(read_err)?;
        let is_tight = tight.load(Ordering::SeqCst);
        let envelope = decode_envelope(command_id, &payload, is_tight)?;
        debug!(command_id, tag = ?envelope.command.tag(), "decoded inbound envelope");
        if tx.send(envelope).await.is_err() {
            debug!("inbound channel closed, stopping reader loop");
            return Ok(());
        }
    }
}

fn read_err(err: std::io::Error) -> TransportError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::Closed
    } else {
        TransportError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Command;

    #[tokio::test]
    async fn sent_envelope_is_received_with_command_id_preserved() {
        let (client, server) = tokio::io::duplex(4096);
        let mut transport_a = IoTransport::spawn(client);
        let mut transport_b = IoTransport::spawn(server);

        let envelope = Envelope { command_id: 42, command: Command::KeepAliveInfo };
        transport_a.send(&envelope).await.unwrap();

        let received = transport_b.recv().await.unwrap();
        assert_eq!(received, envelope);

        transport_a.close().await.unwrap();
        transport_b.close().await.unwrap();
    }

    #[tokio::test]
    async fn reads_and_writes_do_not_block_each_other() {
        // A write in flight must not stall the reader, and a pending read
        // must not stall a concurrent write: the split halves give each
        // direction its own lock-free or independently-locked path.
        let (client, server) = tokio::io::duplex(4096);
        let mut transport_a = IoTransport::spawn(client);
        let mut transport_b = IoTransport::spawn(server);

        let envelope = Envelope { command_id: 7, command: Command::KeepAliveInfo };
        let send_fut = transport_a.send(&envelope);
        let recv_fut = transport_b.recv();
        let (send_result, received) = tokio::join!(send_fut, recv_fut);
        send_result.unwrap();
        assert_eq!(received.unwrap(), envelope);

        transport_a.close().await.unwrap();
        transport_b.close().await.unwrap();
    }
}
