//! Client side of one control connection
//!
//! A [`ClientConnection`] owns the receive loop: inbound requests go to the
//! role's [`RequestHandler`], inbound responses complete the call that is
//! waiting for them. Calls are tracked until answered or expired.

use greenhouse_core::{
    spawn_sweeper, Error as CoreError, Message, MessageId, PendingRequests, Registry, Request,
    RequestMessage, Response, ResponseMessage, SecurityState, StatusCode, TimeoutEvent,
    DEFAULT_REQUEST_TTL, SWEEP_INTERVAL,
};
use greenhouse_transport::{Channel, TcpTransport, TransportEvent, TransportReceiver};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, Result};

/// Connection settings shared by both client roles
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Time a request may stay unanswered
    pub request_ttl: Duration,
    /// Period of the pending-request sweep
    pub sweep_interval: Duration,
    /// Negotiate frame encryption before registering
    pub encrypted: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_ttl: DEFAULT_REQUEST_TTL,
            sweep_interval: SWEEP_INTERVAL,
            encrypted: false,
        }
    }
}

/// An outstanding request and the slot its response goes to
pub struct PendingCall {
    pub request: Request,
    reply: oneshot::Sender<Response>,
}

/// Answers requests the hub sends to this client
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &Request, requester: &Requester) -> Response;

    /// The connection closed
    fn on_disconnect(&self) {}
}

/// Sends tracked requests over the connection
pub struct Requester {
    channel: Arc<Channel>,
    pending: Arc<PendingRequests<PendingCall>>,
    ttl: Duration,
}

impl Requester {
    /// Queue a request; the receiver completes when the response arrives and
    /// closes if the request expires
    pub fn send(&self, request: Request) -> Result<(MessageId, oneshot::Receiver<Response>)> {
        let (tx, rx) = oneshot::channel();
        let id = self.channel.next_id();
        self.pending.put(
            id,
            PendingCall {
                request: request.clone(),
                reply: tx,
            },
            self.ttl,
        );

        if let Err(e) = self.channel.send_request(&RequestMessage::new(id, request)) {
            self.pending.pull(id);
            return Err(e.into());
        }
        Ok((id, rx))
    }

    /// Queue a request whose response only needs to be matched, not awaited
    pub fn post(&self, request: Request) -> Result<MessageId> {
        self.send(request).map(|(id, _)| id)
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }
}

pub struct ClientConnection {
    requester: Arc<Requester>,
    connected: Arc<RwLock<bool>>,
    peer: SocketAddr,
    receive_task: JoinHandle<()>,
}

impl ClientConnection {
    /// Connect to a hub and start the receive loop
    pub async fn connect(
        addr: &str,
        config: &ConnectionConfig,
        registry: Registry,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self> {
        info!("Connecting to hub at {}", addr);
        let (sender, receiver, peer) = TcpTransport::new()
            .connect(addr)
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

        let pending = Arc::new(PendingRequests::new());
        pending
            .timeouts()
            .add(move |event: &TimeoutEvent<PendingCall>| {
                warn!(
                    "'{}' #{} to {} unanswered after {:?}",
                    event.request.request.command(),
                    event.id,
                    peer,
                    event.waited
                );
            });
        spawn_sweeper(&pending, config.sweep_interval);

        let requester = Arc::new(Requester {
            channel: Arc::new(Channel::new(Arc::new(sender), peer)),
            pending,
            ttl: config.request_ttl,
        });
        let connected = Arc::new(RwLock::new(true));

        let receive_task = tokio::spawn(run_receiver(
            receiver,
            Arc::clone(&requester),
            registry,
            handler,
            Arc::clone(&connected),
        ));

        let connection = Self {
            requester,
            connected,
            peer,
            receive_task,
        };
        if config.encrypted {
            connection.negotiate_encryption().await?;
        }
        Ok(connection)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.read()
    }

    pub fn requester(&self) -> &Arc<Requester> {
        &self.requester
    }

    pub fn security_state(&self) -> SecurityState {
        self.requester.channel.security_state()
    }

    /// Requests expired without an answer
    pub fn timeouts(&self) -> &greenhouse_core::Broker<TimeoutEvent<PendingCall>> {
        self.requester.pending.timeouts()
    }

    /// Send a request and wait for its response.
    ///
    /// Error responses come back as [`ClientError::Rejected`].
    pub async fn call(&self, request: Request) -> Result<Response> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let (id, rx) = self.requester.send(request)?;
        match rx.await {
            Ok(Response::Error {
                status,
                description,
            }) => Err(ClientError::Rejected {
                status,
                description,
            }),
            Ok(response) => Ok(response),
            Err(_) => Err(ClientError::Timeout(id)),
        }
    }

    /// Switch the connection to symmetric encryption.
    ///
    /// Fetches the hub's public key, shares a fresh secret key under it and
    /// switches to the secret key once the hub accepts.
    pub async fn negotiate_encryption(&self) -> Result<()> {
        let key = match self.call(Request::RequestPublicKey).await? {
            Response::PublicKey { key } => key,
            other => return Err(ClientError::UnexpectedResponse(other.status())),
        };

        let secret_key = self
            .requester
            .channel
            .with_crypto_state(|c| c.adopt_public_key(&key))?;

        match self.call(Request::ShareSecretKey { secret_key }).await? {
            Response::SecretKeyAccepted => {
                self.requester
                    .channel
                    .with_crypto_state(|c| c.confirm_secret_key())?;
                info!("Connection to {} encrypted", self.peer);
                Ok(())
            }
            other => Err(ClientError::UnexpectedResponse(other.status())),
        }
    }

    /// Round trip a heartbeat
    pub async fn heartbeat(&self) -> Result<()> {
        match self.call(Request::Heartbeat).await? {
            Response::Heartbeat => Ok(()),
            other => Err(ClientError::UnexpectedResponse(other.status())),
        }
    }

    /// Tell the hub we are leaving, then close the connection
    pub async fn disconnect(&self) -> Result<()> {
        let result = match self.call(Request::Disconnect).await {
            Ok(Response::Disconnected) => Ok(()),
            Ok(other) => Err(ClientError::UnexpectedResponse(other.status())),
            Err(e) => Err(e),
        };
        self.close().await;
        result
    }

    /// Close without notifying the hub
    pub async fn close(&self) {
        *self.connected.write() = false;
        if let Err(e) = self.requester.channel.close().await {
            debug!("Close of {} failed: {}", self.peer, e);
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.receive_task.abort();
    }
}

async fn run_receiver(
    mut receiver: impl TransportReceiver,
    requester: Arc<Requester>,
    registry: Registry,
    handler: Arc<dyn RequestHandler>,
    connected: Arc<RwLock<bool>>,
) {
    let peer = requester.channel.peer_addr();

    while let Some(event) = receiver.recv().await {
        match event {
            TransportEvent::Frame(frame) => {
                let frame = match requester.channel.open(frame) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Closing connection to {}: {}", peer, e);
                        break;
                    }
                };

                match registry.decode_message(&frame) {
                    Ok(Message::Request(msg)) => {
                        debug!("<- {} #{} {}", peer, msg.id, msg.request.command());
                        let response = handler.handle(&msg.request, &requester);
                        if let Err(e) = requester.channel.send_response(&msg.reply(response)) {
                            error!("Send error to {}: {}", peer, e);
                            break;
                        }
                    }
                    Ok(Message::Response(msg)) => match requester.pending.pull(msg.id) {
                        Some(call) => {
                            // The caller may have stopped waiting
                            let _ = call.reply.send(msg.response);
                        }
                        None => debug!("Ignoring unexpected response #{} from {}", msg.id, peer),
                    },
                    Err(CoreError::UnknownCommand { id, command }) => {
                        warn!("Unknown command '{}' #{} from {}", command, id, peer);
                        let reply = ResponseMessage::new(
                            id,
                            Response::error(
                                StatusCode::ProtocolError,
                                format!("unknown command '{}'", command),
                            ),
                        );
                        if requester.channel.send_response(&reply).is_err() {
                            break;
                        }
                    }
                    Err(CoreError::UnknownStatusCode { id, code }) => {
                        warn!(
                            "Ignoring response #{} with unknown status {} from {}",
                            id, code, peer
                        );
                    }
                    Err(e) => {
                        warn!("Malformed frame from {}, closing: {}", peer, e);
                        break;
                    }
                }
            }
            TransportEvent::Disconnected { reason } => {
                info!("Disconnected from {}: {:?}", peer, reason);
                break;
            }
            TransportEvent::Error(e) => {
                error!("Transport error from {}: {}", peer, e);
                break;
            }
            TransportEvent::Connected => {}
        }
    }

    *connected.write() = false;
    if let Err(e) = requester.channel.close().await {
        debug!("Close of {} failed: {}", peer, e);
    }
    handler.on_disconnect();
}
