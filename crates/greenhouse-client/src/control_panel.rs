//! Control panel client
//!
//! Discovers field nodes, subscribes to them, receives relayed sensor data
//! and drives actuators through the hub.

use dashmap::DashMap;
use greenhouse_core::{
    ActuatorState, Broker, ClientAddress, DeviceAddress, DeviceClass, FieldNodePool, Fnsm, Fnst,
    Registry, Request, Response, SensorReading, StatusCode,
};
use greenhouse_transport::{TransportEvent, UdpTransport};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connection::{ClientConnection, ConnectionConfig, RequestHandler, Requester};
use crate::error::{ClientError, Result};

/// Control panel configuration
#[derive(Debug, Clone)]
pub struct ControlPanelConfig {
    /// Hub control address
    pub hub_addr: String,
    /// Device classes this panel can display
    pub compatibility_list: BTreeSet<DeviceClass>,
    /// Local address for relayed sensor data; `None` opts out of sensor data
    pub data_bind_addr: Option<String>,
    pub connection: ConnectionConfig,
}

impl Default for ControlPanelConfig {
    fn default() -> Self {
        Self {
            hub_addr: format!("127.0.0.1:{}", greenhouse_core::DEFAULT_HUB_PORT),
            compatibility_list: BTreeSet::new(),
            data_bind_addr: Some("0.0.0.0:0".to_string()),
            connection: ConnectionConfig::default(),
        }
    }
}

/// What the panel knows about a subscribed field node
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNodeInfo {
    pub name: String,
    pub fnst: Fnst,
    pub fnsm: Fnsm,
}

/// Changes observed by a control panel
#[derive(Debug, Clone, PartialEq)]
pub enum ControlPanelEvent {
    SensorData(SensorReading),
    ActuatorState {
        field_node: ClientAddress,
        actuator: DeviceAddress,
        state: ActuatorState,
    },
    FieldNodeUnavailable {
        field_node: ClientAddress,
    },
    Disconnected,
}

struct ControlPanelShared {
    subscriptions: DashMap<ClientAddress, FieldNodeInfo>,
    events: Broker<ControlPanelEvent>,
}

impl RequestHandler for ControlPanelShared {
    fn handle(&self, request: &Request, _requester: &Requester) -> Response {
        match request {
            Request::ActuatorState {
                field_node,
                actuator,
                state,
            } => {
                if let Some(mut info) = self.subscriptions.get_mut(field_node) {
                    info.fnsm.insert(*actuator, *state);
                }
                self.events.notify(&ControlPanelEvent::ActuatorState {
                    field_node: *field_node,
                    actuator: *actuator,
                    state: *state,
                });
                Response::Ok
            }
            Request::FieldNodeUnavailable { field_node } => {
                info!("Field node {} is no longer available", field_node);
                self.subscriptions.remove(field_node);
                self.events.notify(&ControlPanelEvent::FieldNodeUnavailable {
                    field_node: *field_node,
                });
                Response::Ok
            }
            Request::Heartbeat => Response::Heartbeat,
            other => Response::error(
                StatusCode::ProtocolError,
                format!("'{}' is not handled by a control panel", other.command()),
            ),
        }
    }

    fn on_disconnect(&self) {
        self.events.notify(&ControlPanelEvent::Disconnected);
    }
}

/// A registered control panel
pub struct ControlPanel {
    connection: ClientConnection,
    address: ClientAddress,
    shared: Arc<ControlPanelShared>,
    data_task: Option<JoinHandle<()>>,
}

impl ControlPanel {
    pub(crate) async fn connect(config: ControlPanelConfig) -> Result<Self> {
        let shared = Arc::new(ControlPanelShared {
            subscriptions: DashMap::new(),
            events: Broker::new(),
        });

        let connection = ClientConnection::connect(
            &config.hub_addr,
            &config.connection,
            Registry::control_panel(),
            shared.clone(),
        )
        .await?;

        let data = match &config.data_bind_addr {
            Some(addr) => Some(UdpTransport::bind(addr).await?),
            None => None,
        };
        let data_port = match &data {
            Some(udp) => Some(udp.local_addr()?.port()),
            None => None,
        };

        let request = Request::RegisterControlPanel {
            compatibility_list: config.compatibility_list.clone(),
            data_port,
        };
        let address = match connection.call(request).await? {
            Response::ControlPanelRegistered { address } => address,
            other => return Err(ClientError::UnexpectedResponse(other.status())),
        };
        info!(
            "Registered as control panel {} (data port {:?})",
            address, data_port
        );

        let data_task = data.map(|udp| tokio::spawn(run_data_receiver(udp, Arc::clone(&shared))));

        Ok(Self {
            connection,
            address,
            shared,
            data_task,
        })
    }

    pub fn address(&self) -> ClientAddress {
        self.address
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection(&self) -> &ClientConnection {
        &self.connection
    }

    pub fn events(&self) -> &Broker<ControlPanelEvent> {
        &self.shared.events
    }

    /// Field nodes this panel is subscribed to
    pub fn subscriptions(&self) -> Vec<ClientAddress> {
        let mut addresses: Vec<_> = self.shared.subscriptions.iter().map(|e| *e.key()).collect();
        addresses.sort_unstable();
        addresses
    }

    /// Cached view of a subscribed field node
    pub fn field_node(&self, field_node: ClientAddress) -> Option<FieldNodeInfo> {
        self.shared
            .subscriptions
            .get(&field_node)
            .map(|info| info.clone())
    }

    /// Discover registered field nodes
    pub async fn field_node_pool(&self) -> Result<FieldNodePool> {
        match self.connection.call(Request::GetFieldNodePool).await? {
            Response::FieldNodePool { pool } => Ok(pool),
            other => Err(ClientError::UnexpectedResponse(other.status())),
        }
    }

    pub async fn subscribe(&self, field_node: ClientAddress) -> Result<FieldNodeInfo> {
        match self
            .connection
            .call(Request::Subscribe { field_node })
            .await?
        {
            Response::Subscribed {
                field_node,
                fnst,
                fnsm,
                name,
            } => {
                let info = FieldNodeInfo { name, fnst, fnsm };
                self.shared.subscriptions.insert(field_node, info.clone());
                debug!("Subscribed to field node {}", field_node);
                Ok(info)
            }
            other => Err(ClientError::UnexpectedResponse(other.status())),
        }
    }

    pub async fn unsubscribe(&self, field_node: ClientAddress) -> Result<()> {
        match self
            .connection
            .call(Request::Unsubscribe { field_node })
            .await?
        {
            Response::Unsubscribed { field_node } => {
                self.shared.subscriptions.remove(&field_node);
                Ok(())
            }
            other => Err(ClientError::UnexpectedResponse(other.status())),
        }
    }

    /// Ask the hub to drive an actuator on a field node
    pub async fn activate_actuator(
        &self,
        field_node: ClientAddress,
        actuator: DeviceAddress,
        state: ActuatorState,
    ) -> Result<()> {
        let request = Request::ActivateActuator {
            field_node,
            actuator,
            state,
        };
        match self.connection.call(request).await? {
            Response::Ok => Ok(()),
            other => Err(ClientError::UnexpectedResponse(other.status())),
        }
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.connection.heartbeat().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        if let Some(task) = &self.data_task {
            task.abort();
        }
        self.connection.disconnect().await
    }
}

impl Drop for ControlPanel {
    fn drop(&mut self) {
        if let Some(task) = self.data_task.take() {
            task.abort();
        }
    }
}

async fn run_data_receiver(udp: UdpTransport, shared: Arc<ControlPanelShared>) {
    let mut receiver = udp.start_receiver();

    while let Some((event, from)) = receiver.recv_from().await {
        match event {
            TransportEvent::Frame(frame) => match SensorReading::from_tlv(&frame) {
                Ok(reading) if shared.subscriptions.contains_key(&reading.field_node) => {
                    shared.events.notify(&ControlPanelEvent::SensorData(reading));
                }
                Ok(reading) => debug!(
                    "Ignoring reading for unsubscribed field node {}",
                    reading.field_node
                ),
                Err(e) => debug!("Dropping datagram from {}: {}", from, e),
            },
            TransportEvent::Error(e) => debug!("Bad datagram from {}: {}", from, e),
            _ => {}
        }
    }
}
