//! Line-framed transport over any async byte stream pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use super::{framing, Transport};
use crate::types::{JsonRpcMessage, TransportError};

/// Grace period a child process gets to exit after its stdin closes.
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(2);

pub type StdioTransport = StreamTransport<tokio::io::Stdin, tokio::io::Stdout>;
pub type ChildTransport = StreamTransport<ChildStdout, ChildStdin>;

/// Newline-delimited JSON over a reader/writer pair.
///
/// Reader and writer sit behind separate locks so one task can block in
/// `receive` while others `send`.
pub struct StreamTransport<R, W> {
    reader: Mutex<BufReader<R>>,
    writer: Mutex<Option<W>>,
    child: Mutex<Option<Child>>,
    connected: AtomicBool,
    max_frame_bytes: usize,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_child(reader, writer, None)
    }

    fn with_child(reader: R, writer: W, child: Option<Child>) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(child),
            connected: AtomicBool::new(true),
            max_frame_bytes: framing::MAX_FRAME_BYTES,
        }
    }

    /// Refuse inbound frames longer than `limit` bytes. A peer that exceeds
    /// it is disconnected, since the stream cannot be resynchronized.
    pub fn with_max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = limit.max(1);
        self
    }

    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::debug!("Stream transport disconnected");
        }
    }
}

impl StdioTransport {
    /// Read from this process's stdin and write to its stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl ChildTransport {
    /// Talk to a spawned process over its piped stdin/stdout.
    ///
    /// The child is reaped on [`Transport::close`].
    pub fn from_child(mut child: Child) -> Result<Self, TransportError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Other("child stdout is not piped".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Other("child stdin is not piped".to_string()))?;
        Ok(Self::with_child(stdout, stdin, Some(child)))
    }
}

#[async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let line = framing::encode_line(message)?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;

        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            self.mark_disconnected();
            return Err(match e.kind() {
                std::io::ErrorKind::BrokenPipe => TransportError::Disconnected,
                _ => TransportError::Io(e),
            });
        }
        Ok(())
    }

    async fn receive(&self) -> Result<JsonRpcMessage, TransportError> {
        let mut reader = self.reader.lock().await;
        let mut buf = Vec::new();
        loop {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }

            buf.clear();
            // One extra byte leaves room for the newline of a frame at the limit.
            let limit = self.max_frame_bytes as u64 + 1;
            let read = match (&mut *reader).take(limit).read_until(b'\n', &mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    self.mark_disconnected();
                    return Err(TransportError::Io(e));
                }
            };

            if read == 0 {
                self.mark_disconnected();
                return Err(TransportError::Disconnected);
            }

            if buf.last() != Some(&b'\n') && buf.len() as u64 >= limit {
                self.mark_disconnected();
                tracing::warn!("Inbound frame exceeds {} bytes", self.max_frame_bytes);
                return Err(TransportError::FrameTooLarge {
                    limit: self.max_frame_bytes,
                });
            }

            if buf.last() != Some(&b'\n') {
                self.mark_disconnected();
                if buf.iter().all(u8::is_ascii_whitespace) {
                    return Err(TransportError::Disconnected);
                }
                tracing::warn!("Stream ended in the middle of a frame ({} bytes)", buf.len());
                return Err(TransportError::Truncated(buf.len()));
            }

            match framing::decode_line(&buf)? {
                Some(message) => return Ok(message),
                None => continue,
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.mark_disconnected();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("Ignoring error while shutting down writer: {e}");
            }
        }

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(CHILD_EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!("Child process exited with {status}"),
                Ok(Err(e)) => tracing::warn!("Failed to wait for child process: {e}"),
                Err(_) => {
                    tracing::warn!("Child process did not exit in time; killing it");
                    if let Err(e) = child.kill().await {
                        tracing::warn!("Failed to kill child process: {e}");
                    }
                }
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JsonRpcRequest, RequestId};

    fn reading(script: &[u8]) -> StreamTransport<tokio_test::io::Mock, tokio::io::Sink> {
        let reader = tokio_test::io::Builder::new().read(script).build();
        StreamTransport::new(reader, tokio::io::sink())
    }

    #[tokio::test]
    async fn receives_messages_and_skips_blank_lines() {
        let transport = reading(
            b"\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n\n{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
        );
        let first = transport.receive().await.unwrap();
        assert_eq!(first.id(), Some(&RequestId::Number(1)));
        let second = transport.receive().await.unwrap();
        assert_eq!(second.method(), Some("notifications/initialized"));
        assert!(matches!(
            transport.receive().await,
            Err(TransportError::Disconnected)
        ));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn partial_frame_at_eof_is_truncated() {
        let transport = reading(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"me");
        assert!(matches!(
            transport.receive().await,
            Err(TransportError::Truncated(_))
        ));
    }

    #[tokio::test]
    async fn frames_split_across_reads_are_reassembled() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"jsonrpc\":\"2.0\",")
            .read(b"\"id\":\"a\",\"method\":\"ping\"}\n")
            .build();
        let transport = StreamTransport::new(reader, tokio::io::sink());
        let msg = transport.receive().await.unwrap();
        assert_eq!(msg.id(), Some(&RequestId::from("a")));
    }

    #[tokio::test]
    async fn oversized_frame_is_refused() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"a-very-long-method-name\"}\n")
            .build();
        let transport =
            StreamTransport::new(reader, tokio::io::sink()).with_max_frame_bytes(40);

        assert!(transport.receive().await.is_ok());
        assert!(matches!(
            transport.receive().await,
            Err(TransportError::FrameTooLarge { limit: 40 })
        ));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn malformed_line_is_decode_error_and_stream_continues() {
        let transport = reading(b"not json\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n");
        let err = transport.receive().await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
        assert!(transport.receive().await.is_ok());
    }

    #[tokio::test]
    async fn send_writes_one_line() {
        let writer = tokio_test::io::Builder::new()
            .write(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .build();
        let transport = StreamTransport::new(tokio::io::empty(), writer);
        let msg = JsonRpcRequest::new(1i64.into(), "ping", None).into();
        transport.send(&msg).await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_sends() {
        let transport = StreamTransport::new(tokio::io::empty(), tokio::io::sink());
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        let msg = JsonRpcRequest::new(1i64.into(), "ping", None).into();
        assert!(matches!(
            transport.send(&msg).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            transport.receive().await,
            Err(TransportError::Closed)
        ));
    }
}
