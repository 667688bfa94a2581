//! UDP transport implementation
//!
//! Best-effort datagrams carrying one TLV each. Nothing is retried or
//! reordered; datagrams above the configured size are refused by the sender.

use async_trait::async_trait;
use bytes::Bytes;
use greenhouse_core::{SensorReading, Tlv, SAFE_DATAGRAM_SIZE};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender};

/// UDP configuration
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Buffer size for receiving
    pub recv_buffer_size: usize,
    /// Largest datagram this side will send
    pub max_datagram_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 65536,
            max_datagram_size: SAFE_DATAGRAM_SIZE,
        }
    }
}

/// UDP transport (connectionless)
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    config: UdpConfig,
}

impl UdpTransport {
    /// Bind to a local address
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, UdpConfig::default()).await
    }

    /// Bind with config
    pub async fn bind_with_config(addr: &str, config: UdpConfig) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        info!("UDP bound to {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            config,
        })
    }

    /// Get local address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    /// Create a sender for a specific remote address
    pub fn sender_to(&self, remote: SocketAddr) -> UdpSender {
        UdpSender {
            socket: self.socket.clone(),
            remote,
            max_datagram_size: self.config.max_datagram_size,
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Start receiving datagrams.
    ///
    /// Each datagram must hold exactly one TLV; anything else is reported as
    /// an error event and skipped.
    pub fn start_receiver(&self) -> UdpReceiver {
        let (tx, rx) = mpsc::channel(100);
        let socket = self.socket.clone();
        let buffer_size = self.config.recv_buffer_size;

        tokio::spawn(async move {
            let mut buf = vec![0u8; buffer_size];

            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        trace!("UDP received {} bytes from {}", len, from);
                        let event = match Tlv::decode(&buf[..len]) {
                            Ok(frame) if frame.size() == len => TransportEvent::Frame(frame),
                            Ok(frame) => TransportEvent::Error(format!(
                                "datagram from {} has {} trailing bytes",
                                from,
                                len - frame.size()
                            )),
                            Err(e) => TransportEvent::Error(e.to_string()),
                        };
                        if tx.send((event, from)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("UDP receive error: {}", e);
                        if tx
                            .send((
                                TransportEvent::Error(e.to_string()),
                                SocketAddr::from(([0, 0, 0, 0], 0)),
                            ))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });

        UdpReceiver { rx }
    }

    /// Send raw bytes to a specific address
    pub async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<()> {
        check_size(data.len(), self.config.max_datagram_size)?;
        self.socket
            .send_to(data, target)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    /// Send one sensor reading to `target`
    pub async fn send_reading(&self, reading: &SensorReading, target: SocketAddr) -> Result<()> {
        let data: Bytes = reading.encode()?;
        debug!(
            "Sending reading {}:{} = {} to {}",
            reading.field_node, reading.sensor, reading.value, target
        );
        self.send_to(&data, target).await
    }
}

fn check_size(size: usize, max: usize) -> Result<()> {
    if size > max {
        return Err(TransportError::PayloadTooLarge { size, max });
    }
    Ok(())
}

/// UDP sender (to a specific remote)
pub struct UdpSender {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    max_datagram_size: usize,
    connected: Arc<Mutex<bool>>,
}

impl UdpSender {
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }
}

#[async_trait]
impl TransportSender for UdpSender {
    async fn send(&self, frame: Tlv) -> Result<()> {
        let data = frame.encode();
        check_size(data.len(), self.max_datagram_size)?;
        self.socket
            .send_to(&data, self.remote)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    fn try_send(&self, frame: Tlv) -> Result<()> {
        let data = frame.encode();
        check_size(data.len(), self.max_datagram_size)?;
        self.socket
            .try_send_to(&data, self.remote)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::WouldBlock => TransportError::BufferFull,
                _ => TransportError::SendFailed(e.to_string()),
            })?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        *self.connected.lock() = false;
        Ok(())
    }
}

/// UDP receiver
pub struct UdpReceiver {
    rx: mpsc::Receiver<(TransportEvent, SocketAddr)>,
}

impl UdpReceiver {
    /// Receive the next event with source address
    pub async fn recv_from(&mut self) -> Option<(TransportEvent, SocketAddr)> {
        self.rx.recv().await
    }
}

#[async_trait]
impl TransportReceiver for UdpReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await.map(|(event, _)| event)
    }
}
