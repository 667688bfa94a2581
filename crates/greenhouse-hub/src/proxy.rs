//! Hub-side view of connected clients

use greenhouse_core::{
    Adl, ClientAddress, DeviceClass, Fnsm, Fnst, MessageId, Request,
};
use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;

/// Identifier of one accepted control connection
pub type ConnectionId = Uuid;

/// The hub's handle on a client connection.
///
/// Pushing must not block: the hub calls it while holding its state lock.
pub trait ClientAgent: Send + Sync {
    /// Queue a hub-initiated request to the client and start tracking it
    fn push_request(&self, request: Request) -> Result<MessageId>;

    fn connection_id(&self) -> ConnectionId;

    fn is_connected(&self) -> bool;
}

/// A registered field node
pub struct FieldNodeProxy {
    pub address: ClientAddress,
    pub agent: Arc<dyn ClientAgent>,
    pub fnst: Fnst,
    pub fnsm: Fnsm,
    pub name: String,
    /// Last ADL pushed to the node
    pub adl: Adl,
}

impl FieldNodeProxy {
    /// Devices whose class appears in `classes`
    pub fn active_devices<'a>(&self, classes: impl IntoIterator<Item = &'a DeviceClass>) -> Adl {
        let classes: BTreeSet<&DeviceClass> = classes.into_iter().collect();
        self.fnst
            .iter()
            .filter(|(_, class)| classes.contains(class))
            .map(|(address, _)| *address)
            .collect()
    }
}

/// A registered control panel
pub struct ControlPanelProxy {
    pub address: ClientAddress,
    pub agent: Arc<dyn ClientAgent>,
    pub compatibility_list: BTreeSet<DeviceClass>,
    /// Where relayed sensor datagrams go, if the panel accepts them
    pub data_endpoint: Option<SocketAddr>,
}

impl ControlPanelProxy {
    pub fn is_compatible(&self, class: &str) -> bool {
        self.compatibility_list.contains(class)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    FieldNode,
    ControlPanel,
}

pub enum ClientProxy {
    FieldNode(FieldNodeProxy),
    ControlPanel(ControlPanelProxy),
}

impl ClientProxy {
    pub fn address(&self) -> ClientAddress {
        match self {
            ClientProxy::FieldNode(p) => p.address,
            ClientProxy::ControlPanel(p) => p.address,
        }
    }

    pub fn kind(&self) -> ClientKind {
        match self {
            ClientProxy::FieldNode(_) => ClientKind::FieldNode,
            ClientProxy::ControlPanel(_) => ClientKind::ControlPanel,
        }
    }

    pub fn agent(&self) -> &Arc<dyn ClientAgent> {
        match self {
            ClientProxy::FieldNode(p) => &p.agent,
            ClientProxy::ControlPanel(p) => &p.agent,
        }
    }

    pub fn as_field_node(&self) -> Option<&FieldNodeProxy> {
        match self {
            ClientProxy::FieldNode(p) => Some(p),
            ClientProxy::ControlPanel(_) => None,
        }
    }

    pub fn as_control_panel(&self) -> Option<&ControlPanelProxy> {
        match self {
            ClientProxy::ControlPanel(p) => Some(p),
            ClientProxy::FieldNode(_) => None,
        }
    }
}

impl fmt::Debug for ClientProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientProxy")
            .field("kind", &self.kind())
            .field("address", &self.address())
            .field("connection", &self.agent().connection_id())
            .finish()
    }
}
