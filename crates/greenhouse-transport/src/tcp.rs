//! TCP transport implementation
//!
//! Frames are TLVs written back to back on the stream; the TLV header is
//! the only framing. Each connection runs a reader task and a writer task
//! on the two halves of the socket.

use async_trait::async_trait;
use greenhouse_core::tlv::{HEADER_SIZE, TAG_SIZE};
use greenhouse_core::Tlv;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};

/// Maximum frame value size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default channel buffer size for TCP connections
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 1000;

/// TCP configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Largest accepted frame value in bytes
    pub max_frame_size: usize,
    /// Outbound and inbound queue depth
    pub channel_buffer_size: usize,
    /// Keep-alive interval in seconds (0 = disabled)
    pub keepalive_secs: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
            keepalive_secs: 30,
        }
    }
}

// ============================================================================
// FRAMING
// ============================================================================

/// Read one frame.
///
/// Returns `Ok(None)` when the stream closes cleanly before a frame starts.
/// A close in the middle of a frame is an I/O error.
pub async fn read_tlv<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Tlv>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream closed after {} header bytes", filled),
            )
            .into());
        }
        filled += n;
    }

    let tag = u16::from_be_bytes([header[0], header[1]]);
    let len = u32::from_be_bytes([
        header[TAG_SIZE],
        header[TAG_SIZE + 1],
        header[TAG_SIZE + 2],
        header[TAG_SIZE + 3],
    ]) as usize;

    if len > max_frame_size {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }

    let mut value = vec![0u8; len];
    reader.read_exact(&mut value).await?;
    Ok(Some(Tlv::new(tag, value)?))
}

/// Write one frame
pub async fn write_tlv<W>(writer: &mut W, frame: &Tlv) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    Ok(())
}

// ============================================================================
// CONNECTION TASKS
// ============================================================================

fn spawn_connection(stream: TcpStream, config: &TcpConfig) -> (TcpSender, TcpReceiver) {
    if config.keepalive_secs > 0 {
        let socket = socket2::SockRef::from(&stream);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(std::time::Duration::from_secs(config.keepalive_secs));
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            debug!("Failed to enable TCP keepalive: {}", e);
        }
    }
    let _ = stream.set_nodelay(true);

    let connected = Arc::new(Mutex::new(true));
    let shutdown = Arc::new(Notify::new());
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Tlv>(config.channel_buffer_size);
    let (incoming_tx, incoming_rx) = mpsc::channel::<TransportEvent>(config.channel_buffer_size);

    let (reader, writer) = stream.into_split();

    tokio::spawn(run_reader(
        reader,
        incoming_tx,
        config.max_frame_size,
        connected.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(run_writer(
        writer,
        outgoing_rx,
        connected.clone(),
        shutdown.clone(),
    ));

    let sender = TcpSender {
        tx: outgoing_tx,
        connected,
        shutdown,
    };
    let receiver = TcpReceiver { rx: incoming_rx };
    (sender, receiver)
}

async fn run_reader(
    reader: OwnedReadHalf,
    incoming_tx: mpsc::Sender<TransportEvent>,
    max_frame_size: usize,
    connected: Arc<Mutex<bool>>,
    shutdown: Arc<Notify>,
) {
    let mut reader = BufReader::new(reader);

    loop {
        match read_tlv(&mut reader, max_frame_size).await {
            Ok(Some(frame)) => {
                trace!("TCP received frame 0x{:04x} ({} bytes)", frame.tag(), frame.len());
                if incoming_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("TCP connection closed");
                let _ = incoming_tx
                    .send(TransportEvent::Disconnected { reason: None })
                    .await;
                break;
            }
            Err(e) => {
                warn!("TCP read error: {}", e);
                let _ = incoming_tx
                    .send(TransportEvent::Disconnected {
                        reason: Some(e.to_string()),
                    })
                    .await;
                break;
            }
        }
    }

    *connected.lock() = false;
    shutdown.notify_one();
}

async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut outgoing_rx: mpsc::Receiver<Tlv>,
    connected: Arc<Mutex<bool>>,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            biased;

            frame = outgoing_rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write_tlv(&mut writer, &frame).await {
                    error!("TCP write error: {}", e);
                    break;
                }
            }

            _ = shutdown.notified() => {
                // Flush whatever was queued before the close
                while let Ok(frame) = outgoing_rx.try_recv() {
                    if write_tlv(&mut writer, &frame).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    *connected.lock() = false;
    let _ = writer.shutdown().await;
}

// ============================================================================
// SENDER / RECEIVER
// ============================================================================

/// TCP sender for writing frames
pub struct TcpSender {
    tx: mpsc::Sender<Tlv>,
    connected: Arc<Mutex<bool>>,
    shutdown: Arc<Notify>,
}

#[async_trait]
impl TransportSender for TcpSender {
    async fn send(&self, frame: Tlv) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::SendFailed("Channel closed".into()))
    }

    fn try_send(&self, frame: Tlv) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        *self.connected.lock() = false;
        self.shutdown.notify_one();
        Ok(())
    }
}

/// TCP receiver for reading frames
pub struct TcpReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for TcpReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

// ============================================================================
// CLIENT / SERVER
// ============================================================================

/// TCP transport
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            config: TcpConfig::default(),
        }
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self { config }
    }

    /// Connect to a TCP server
    pub async fn connect(&self, addr: &str) -> Result<(TcpSender, TcpReceiver, SocketAddr)> {
        info!("Connecting to TCP: {}", addr);

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let peer = stream.peer_addr()?;

        let (sender, receiver) = spawn_connection(stream, &self.config);

        info!("TCP connected to {}", peer);
        Ok((sender, receiver, peer))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// TCP server for accepting connections
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    /// Bind to an address and create a new TCP server
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    /// Bind with custom configuration
    pub async fn bind_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        info!("TCP server listening on {}", listener.local_addr()?);

        Ok(Self { listener, config })
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    type Sender = TcpSender;
    type Receiver = TcpReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

        info!("TCP connection accepted from {}", peer_addr);

        let (sender, receiver) = spawn_connection(stream, &self.config);
        Ok((sender, receiver, peer_addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) -> Result<()> {
        // TcpListener closes when dropped
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenhouse_core::tag;

    #[tokio::test]
    async fn test_tcp_config_default() {
        let config = TcpConfig::default();
        assert_eq!(config.max_frame_size, 1024 * 1024);
        assert_eq!(config.channel_buffer_size, 1000);
        assert_eq!(config.keepalive_secs, 30);
    }

    #[tokio::test]
    async fn test_read_tlv_clean_close() {
        let mut empty: &[u8] = &[];
        assert!(read_tlv(&mut empty, MAX_FRAME_SIZE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_tlv_close_mid_frame() {
        let frame = Tlv::new(tag::STRING, &b"basil"[..]).unwrap().encode();
        let mut partial: &[u8] = &frame[..frame.len() - 1];
        assert!(matches!(
            read_tlv(&mut partial, MAX_FRAME_SIZE).await,
            Err(TransportError::Io(_))
        ));

        let mut header_only: &[u8] = &frame[..3];
        assert!(matches!(
            read_tlv(&mut header_only, MAX_FRAME_SIZE).await,
            Err(TransportError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_read_tlv_back_to_back() {
        let a = Tlv::new(tag::STRING, &b"basil"[..]).unwrap();
        let b = Tlv::empty(tag::NULL);
        let mut bytes = a.encode().to_vec();
        bytes.extend_from_slice(&b.encode());

        let mut stream: &[u8] = &bytes;
        assert_eq!(read_tlv(&mut stream, MAX_FRAME_SIZE).await.unwrap(), Some(a));
        assert_eq!(read_tlv(&mut stream, MAX_FRAME_SIZE).await.unwrap(), Some(b));
        assert_eq!(read_tlv(&mut stream, MAX_FRAME_SIZE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_tlv_rejects_oversized() {
        let frame = Tlv::new(tag::STRING, vec![b'x'; 64]).unwrap().encode();
        let mut stream: &[u8] = &frame;
        assert!(matches!(
            read_tlv(&mut stream, 32).await,
            Err(TransportError::FrameTooLarge { size: 64, max: 32 })
        ));
    }

    #[tokio::test]
    async fn test_tcp_client_server_connection() {
        let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let accept_handle = tokio::spawn(async move {
            let (sender, mut receiver, _peer) = server.accept().await.unwrap();

            // Echo one frame back
            if let Some(TransportEvent::Frame(frame)) = receiver.recv().await {
                sender.send(frame).await.unwrap();
            }

            (sender, receiver)
        });

        let transport = TcpTransport::new();
        let (client_sender, mut client_receiver, _) =
            transport.connect(&addr.to_string()).await.unwrap();

        let frame = Tlv::new(tag::STRING, &b"hello tcp"[..]).unwrap();
        client_sender.send(frame.clone()).await.unwrap();

        match client_receiver.recv().await {
            Some(TransportEvent::Frame(received)) => assert_eq!(received, frame),
            other => panic!("Expected Frame event, got {:?}", other),
        }

        client_sender.close().await.unwrap();
        let _ = accept_handle.await;
    }
}
