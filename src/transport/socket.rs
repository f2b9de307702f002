//! The socket transport (C2, spec §4.2): connects a raw byte stream to one
//! broker URI, plain TCP or TLS. Framing and command semantics live a layer
//! up in [`super::io_transport`], which splits the [`AnyStream`] this module
//! produces into independent read/write halves.

use super::stream::AnyStream;
use crate::error::TransportError;
use socket2::Socket;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Socket tuning applied after connect, grounded in the same
/// nodelay/buffer-size knobs the teacher's TCP transport exposes.
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    pub nodelay: bool,
    pub send_buffer_size: Option<usize>,
    pub recv_buffer_size: Option<usize>,
    pub connect_timeout: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            send_buffer_size: None,
            recv_buffer_size: None,
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// Connect a plain TCP socket: `tcp://host:port`.
pub async fn connect_tcp(host: &str, port: u16, options: &SocketOptions) -> Result<AnyStream, TransportError> {
    let addr = format!("{host}:{port}");
    debug!(%addr, "connecting tcp socket");
    let stream = connect_with_timeout(&addr, options).await?;
    debug!(%addr, "tcp socket connected");
    Ok(AnyStream::Plain(stream))
}

pub(crate) async fn connect_with_timeout(addr: &str, options: &SocketOptions) -> Result<TcpStream, TransportError> {
    let stream = timeout(options.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Connect {
            uri: addr.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        })?
        .map_err(|source| TransportError::Connect { uri: addr.to_string(), source })?;

    let std_stream = stream.into_std().map_err(TransportError::Io)?;
    apply_socket_options(&std_stream, options)?;
    TcpStream::from_std(std_stream).map_err(TransportError::Io)
}

/// Tune the socket via a cloned fd/handle: `TCP_NODELAY` and the send/recv
/// buffer sizes are kernel-level socket properties, so tuning a dup applies
/// equally to `std_stream` once converted back to a tokio stream.
pub(crate) fn apply_socket_options(std_stream: &std::net::TcpStream, options: &SocketOptions) -> Result<(), TransportError> {
    let socket = Socket::from(std_stream.try_clone().map_err(TransportError::Io)?);
    socket.set_nodelay(options.nodelay).map_err(TransportError::Io)?;
    if let Some(size) = options.send_buffer_size {
        socket.set_send_buffer_size(size).map_err(TransportError::Io)?;
    }
    if let Some(size) = options.recv_buffer_size {
        socket.set_recv_buffer_size(size).map_err(TransportError::Io)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_and_exchanges_bytes_with_a_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let mut socket = connect_tcp(&addr.ip().to_string(), addr.port(), &SocketOptions::default())
            .await
            .unwrap();
        socket.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        socket.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_timeout_fails_fast_against_an_unroutable_address() {
        let options = SocketOptions { connect_timeout: Duration::from_millis(50), ..Default::default() };
        // TEST-NET-1, reserved for documentation: expected to time out, not
        // connect or error immediately.
        let result = connect_tcp("192.0.2.1", 1, &options).await;
        assert!(result.is_err());
    }
}
