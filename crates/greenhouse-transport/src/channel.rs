//! Message-level view of one connection
//!
//! A [`Channel`] hands out message ids, seals outbound frames with the
//! connection's current encryption strategy and queues them on the
//! transport. Sealing and queueing happen under one lock, so frames leave
//! in the order their strategy was chosen.

use greenhouse_core::message::{encode_request, encode_response};
use greenhouse_core::{
    CryptoChannel, IdGenerator, Message, MessageId, Request, RequestMessage, ResponseMessage,
    SecurityState, Tlv,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::trace;

use crate::error::Result;
use crate::traits::TransportSender;

pub struct Channel {
    sender: Arc<dyn TransportSender>,
    peer: SocketAddr,
    ids: IdGenerator,
    crypto: Mutex<CryptoChannel>,
}

impl Channel {
    pub fn new(sender: Arc<dyn TransportSender>, peer: SocketAddr) -> Self {
        Self::with_crypto(sender, peer, CryptoChannel::new())
    }

    pub fn with_crypto(
        sender: Arc<dyn TransportSender>,
        peer: SocketAddr,
        crypto: CryptoChannel,
    ) -> Self {
        Self {
            sender,
            peer,
            ids: IdGenerator::new(),
            crypto: Mutex::new(crypto),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    /// Reserve the id for the next outbound request
    pub fn next_id(&self) -> MessageId {
        self.ids.next_id()
    }

    /// Queue a request under a fresh id
    pub fn push_request(&self, request: Request) -> Result<MessageId> {
        let msg = RequestMessage::new(self.next_id(), request);
        self.send_request(&msg)?;
        Ok(msg.id)
    }

    /// Queue a request whose id was reserved with [`Channel::next_id`]
    pub fn send_request(&self, msg: &RequestMessage) -> Result<()> {
        trace!("-> {} #{} {}", self.peer, msg.id, msg.request.command());
        self.seal_and_queue(encode_request(msg)?)
    }

    pub fn send_response(&self, msg: &ResponseMessage) -> Result<()> {
        trace!("-> {} #{} status {}", self.peer, msg.id, msg.response.status().code());
        self.seal_and_queue(encode_response(msg)?)
    }

    pub fn send_message(&self, msg: &Message) -> Result<()> {
        match msg {
            Message::Request(m) => self.send_request(m),
            Message::Response(m) => self.send_response(m),
        }
    }

    fn seal_and_queue(&self, frame: Tlv) -> Result<()> {
        let crypto = self.crypto.lock();
        let sealed = crypto.seal(frame)?;
        self.sender.try_send(sealed)
    }

    /// Strip the encryption layer from an inbound frame
    pub fn open(&self, frame: Tlv) -> Result<Tlv> {
        Ok(self.crypto.lock().open(frame)?)
    }

    /// Run a handshake step against the connection's encryption state
    pub fn with_crypto_state<T>(&self, f: impl FnOnce(&mut CryptoChannel) -> T) -> T {
        f(&mut self.crypto.lock())
    }

    pub fn security_state(&self) -> SecurityState {
        self.crypto.lock().state()
    }

    /// Flush queued frames and close the transport
    pub async fn close(&self) -> Result<()> {
        self.sender.close().await
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use greenhouse_core::{Registry, Response};

    #[derive(Default)]
    struct QueueSender {
        frames: Mutex<Vec<Tlv>>,
    }

    #[async_trait]
    impl TransportSender for QueueSender {
        async fn send(&self, frame: Tlv) -> Result<()> {
            self.try_send(frame)
        }

        fn try_send(&self, frame: Tlv) -> Result<()> {
            self.frames.lock().push(frame);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn close(&self) -> Result<()> {
            Err(TransportError::NotConnected)
        }
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9))
    }

    #[test]
    fn test_push_request_assigns_increasing_ids() {
        let sender = Arc::new(QueueSender::default());
        let channel = Channel::new(sender.clone(), peer());

        assert_eq!(channel.push_request(Request::Heartbeat).unwrap(), 1);
        assert_eq!(channel.push_request(Request::GetFieldNodePool).unwrap(), 2);

        let frames = sender.frames.lock();
        assert_eq!(frames.len(), 2);
        let decoded = Registry::server().decode_message(&frames[1]).unwrap();
        assert_eq!(decoded.id(), 2);
    }

    #[test]
    fn test_plain_channel_sends_plain_frames() {
        let sender = Arc::new(QueueSender::default());
        let channel = Channel::new(sender.clone(), peer());

        channel
            .send_response(&ResponseMessage::new(4, Response::Heartbeat))
            .unwrap();
        let frame = sender.frames.lock()[0].clone();
        assert_eq!(channel.open(frame.clone()).unwrap(), frame);
        assert_eq!(channel.security_state(), SecurityState::PlainText);
    }
}
