//! Hub server: connection handling and sensor data relay
//!
//! The server is transport-agnostic on the control side: it accepts
//! connections from any [`TransportServer`]. Sensor data arrives on a UDP
//! socket and is relayed to the data endpoints of subscribed control panels.
//!
//! # Example
//!
//! ```no_run
//! use greenhouse_hub::{HubConfig, HubServer};
//! use greenhouse_transport::TcpServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = HubServer::new(HubConfig::default());
//! let tcp = TcpServer::bind("127.0.0.1:0").await?;
//! server.serve_on(tcp).await?;
//! # Ok(())
//! # }
//! ```

use dashmap::DashMap;
use greenhouse_core::{
    spawn_sweeper, CryptoChannel, Error as CoreError, Message, MessageId, PendingRequests,
    Registry, Request, RequestMessage, Response, ResponseMessage, SensorReading, StatusCode,
    TimeoutEvent, DEFAULT_HUB_PORT, DEFAULT_SENSOR_PORT,
};
use greenhouse_transport::tcp::MAX_FRAME_SIZE;
use greenhouse_transport::{
    Channel, TcpConfig, TcpServer, TransportEvent, TransportReceiver, TransportSender,
    TransportServer, UdpTransport,
};
use parking_lot::RwLock;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::{HubError, Result};
use crate::handlers::{self, RequestContext};
use crate::hub::CentralHub;
use crate::proxy::{ClientAgent, ConnectionId};

/// Hub configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Control connection listen address
    pub tcp_addr: String,
    /// Sensor datagram listen address
    pub udp_addr: String,
    /// Time a hub-initiated request may stay unanswered
    pub request_ttl_ms: u64,
    /// Period of the pending-request sweep
    pub sweep_interval_ms: u64,
    /// RSA modulus size for the encryption handshake
    pub rsa_bits: usize,
    /// Largest accepted control frame value
    pub max_frame_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            tcp_addr: format!("0.0.0.0:{}", DEFAULT_HUB_PORT),
            udp_addr: format!("0.0.0.0:{}", DEFAULT_SENSOR_PORT),
            request_ttl_ms: 3000,
            sweep_interval_ms: 1000,
            rsa_bits: 2048,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl HubConfig {
    pub fn request_ttl(&self) -> Duration {
        Duration::from_millis(self.request_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.request_ttl_ms == 0 || self.sweep_interval_ms == 0 {
            return Err(HubError::Config(
                "request ttl and sweep interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Hub-side agent of one control connection.
///
/// Hub-initiated requests are tracked until the client answers them.
pub struct ConnectionAgent {
    id: ConnectionId,
    channel: Arc<Channel>,
    pending: Arc<PendingRequests<Request>>,
    ttl: Duration,
}

impl ClientAgent for ConnectionAgent {
    fn push_request(&self, request: Request) -> Result<MessageId> {
        let id = self.channel.next_id();
        self.pending.put(id, request.clone(), self.ttl);
        if let Err(e) = self.channel.send_request(&RequestMessage::new(id, request)) {
            self.pending.pull(id);
            return Err(e.into());
        }
        Ok(id)
    }

    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }
}

/// Greenhouse hub server
#[derive(Clone)]
pub struct HubServer {
    config: HubConfig,
    hub: Arc<CentralHub>,
    /// Open control connections
    connections: Arc<DashMap<ConnectionId, SocketAddr>>,
    running: Arc<RwLock<bool>>,
    shutdown: Arc<Notify>,
}

impl HubServer {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            hub: Arc::new(CentralHub::new()),
            connections: Arc::new(DashMap::new()),
            running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<CentralHub> {
        &self.hub
    }

    /// Bind both sockets from the configuration and serve until stopped
    pub async fn serve(&self) -> Result<()> {
        self.config.validate()?;

        let tcp_config = TcpConfig {
            max_frame_size: self.config.max_frame_size,
            ..Default::default()
        };
        let tcp = TcpServer::bind_with_config(&self.config.tcp_addr, tcp_config).await?;
        let udp = UdpTransport::bind(&self.config.udp_addr).await?;

        futures::future::try_join(self.serve_on(tcp), self.serve_sensor_data(udp)).await?;
        Ok(())
    }

    /// Accept control connections from any transport server
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
        S::Sender: 'static,
        S::Receiver: 'static,
    {
        info!("Hub accepting connections on {:?}", server.local_addr().ok());
        *self.running.write() = true;

        while *self.running.read() {
            tokio::select! {
                accepted = server.accept() => match accepted {
                    Ok((sender, receiver, addr)) => {
                        info!("New connection from {}", addr);
                        self.handle_connection(Arc::new(sender), receiver, addr);
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                },
                _ = self.shutdown.notified() => break,
            }
        }

        server.close().await?;
        Ok(())
    }

    /// Relay sensor datagrams to compatible subscribers
    pub async fn serve_sensor_data(&self, udp: UdpTransport) -> Result<()> {
        info!("Hub relaying sensor data on {}", udp.local_addr()?);
        *self.running.write() = true;
        let mut receiver = udp.start_receiver();

        while *self.running.read() {
            let event = tokio::select! {
                event = receiver.recv_from() => event,
                _ = self.shutdown.notified() => break,
            };

            match event {
                Some((TransportEvent::Frame(frame), from)) => {
                    let reading = match SensorReading::from_tlv(&frame) {
                        Ok(reading) => reading,
                        Err(e) => {
                            debug!("Dropping datagram from {}: {}", from, e);
                            continue;
                        }
                    };

                    let data = frame.encode();
                    for target in self.hub.route_sensor_data(&reading) {
                        if let Err(e) = udp.send_to(&data, target).await {
                            debug!("Relay to {} failed: {}", target, e);
                        }
                    }
                }
                Some((TransportEvent::Error(e), from)) => {
                    debug!("Bad datagram from {}: {}", from, e);
                }
                Some(_) => {}
                None => break,
            }
        }

        Ok(())
    }

    fn handle_connection(
        &self,
        sender: Arc<dyn TransportSender>,
        mut receiver: impl TransportReceiver + 'static,
        addr: SocketAddr,
    ) {
        let hub = Arc::clone(&self.hub);
        let connections = Arc::clone(&self.connections);
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);

        let channel = Arc::new(Channel::with_crypto(
            sender,
            addr,
            CryptoChannel::with_rsa_bits(self.config.rsa_bits),
        ));
        let pending = Arc::new(PendingRequests::new());
        pending.timeouts().add(move |event: &TimeoutEvent<Request>| {
            warn!(
                "'{}' #{} to {} unanswered after {:?}",
                event.request.command(),
                event.id,
                addr,
                event.waited
            );
        });
        let sweep_interval = self.config.sweep_interval();
        spawn_sweeper(&pending, sweep_interval);

        let agent = Arc::new(ConnectionAgent {
            id: ConnectionId::new_v4(),
            channel: Arc::clone(&channel),
            pending: Arc::clone(&pending),
            ttl: self.config.request_ttl(),
        });
        connections.insert(agent.id, addr);

        tokio::spawn(async move {
            let registry = Registry::server();
            let client: Arc<dyn ClientAgent> = agent.clone();

            loop {
                // registered before the flag check so a concurrent stop is not missed
                let stopping = shutdown.notified();
                tokio::pin!(stopping);
                stopping.as_mut().enable();
                if !*running.read() {
                    break;
                }

                let event = tokio::select! {
                    event = receiver.recv() => event,
                    _ = &mut stopping => {
                        info!("Hub stopping, closing {}", addr);
                        break;
                    }
                };

                match event {
                    Some(TransportEvent::Frame(frame)) => {
                        let frame = match channel.open(frame) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!("Closing {}: {}", addr, e);
                                break;
                            }
                        };

                        let keep_open = match registry.decode_message(&frame) {
                            Ok(Message::Request(msg)) => {
                                let ctx = RequestContext {
                                    hub: &hub,
                                    agent: Arc::clone(&client),
                                    channel: &channel,
                                };
                                let reply = handlers::execute(&ctx, &msg).await;
                                match channel.send_response(&reply) {
                                    Ok(()) => !matches!(msg.request, Request::Disconnect),
                                    Err(e) => {
                                        error!("Send error to {}: {}", addr, e);
                                        false
                                    }
                                }
                            }
                            Ok(Message::Response(msg)) => {
                                handle_response(&pending, &msg, addr);
                                true
                            }
                            Err(CoreError::UnknownCommand { id, command }) => {
                                warn!("Unknown command '{}' #{} from {}", command, id, addr);
                                let reply = ResponseMessage::new(
                                    id,
                                    Response::error(
                                        StatusCode::ProtocolError,
                                        format!("unknown command '{}'", command),
                                    ),
                                );
                                channel.send_response(&reply).is_ok()
                            }
                            Err(CoreError::UnknownStatusCode { id, code }) => {
                                warn!(
                                    "Ignoring response #{} with unknown status {} from {}",
                                    id, code, addr
                                );
                                true
                            }
                            Err(e) => {
                                warn!("Malformed frame from {}, closing: {}", addr, e);
                                false
                            }
                        };

                        if !keep_open {
                            break;
                        }
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        info!("Client {} disconnected: {:?}", addr, reason);
                        break;
                    }
                    Some(TransportEvent::Error(e)) => {
                        error!("Transport error from {}: {}", addr, e);
                        break;
                    }
                    Some(TransportEvent::Connected) => {}
                    None => break,
                }
            }

            if let Some(address) = hub.deregister(agent.id) {
                info!("Client {} at {} removed", address, addr);
            }
            connections.remove(&agent.id);
            if let Err(e) = channel.close().await {
                debug!("Close of {} failed: {}", addr, e);
            }

            // Outstanding requests are only reclaimed by the sweep
            drop(client);
            drop(agent);
            while !pending.is_empty() {
                tokio::time::sleep(sweep_interval).await;
            }
        });
    }

    /// Stop accepting connections and relaying data
    pub fn stop(&self) {
        *self.running.write() = false;
        self.shutdown.notify_waiters();
    }

    /// Number of open control connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for HubServer {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// Match a client's answer to a hub-initiated request
fn handle_response(
    pending: &PendingRequests<Request>,
    msg: &ResponseMessage,
    addr: SocketAddr,
) {
    let Some(request) = pending.pull(msg.id) else {
        debug!("Ignoring unexpected response #{} from {}", msg.id, addr);
        return;
    };

    match &msg.response {
        Response::Error {
            status,
            description,
        } => warn!(
            "{} rejected '{}' #{}: {:?} {}",
            addr,
            request.command(),
            msg.id,
            status,
            description
        ),
        response => debug!(
            "{} answered '{}' #{} with {:?}",
            addr,
            request.command(),
            msg.id,
            response.status()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_toml() {
        let config: HubConfig = toml::from_str(
            r#"
            tcp_addr = "127.0.0.1:7000"
            request_ttl_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.tcp_addr, "127.0.0.1:7000");
        assert_eq!(config.request_ttl(), Duration::from_millis(500));
        assert_eq!(config.udp_addr, HubConfig::default().udp_addr);
        assert_eq!(config.rsa_bits, 2048);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let config = HubConfig {
            request_ttl_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(HubError::Config(_))));
    }
}
