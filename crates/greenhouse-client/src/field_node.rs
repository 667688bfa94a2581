//! Field node client
//!
//! Registers its devices with the hub, keeps the active device list the hub
//! pushes, drives actuators on request and streams readings of active
//! sensors to the hub's datagram port.

use greenhouse_core::{
    Actuator, ActuatorState, Adl, Broker, ClientAddress, DeviceAddress, Fnsm, Fnst, Registry,
    Request, Response, Sensor, SensorReading, StatusCode, DEFAULT_SENSOR_PORT,
};
use greenhouse_transport::UdpTransport;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{ClientConnection, ConnectionConfig, RequestHandler, Requester};
use crate::error::{ClientError, Result};

/// Field node configuration
#[derive(Debug, Clone)]
pub struct FieldNodeConfig {
    /// Hub control address
    pub hub_addr: String,
    /// Hub sensor datagram address; defaults to the hub's IP on the sensor port
    pub hub_data_addr: Option<SocketAddr>,
    pub name: String,
    /// Period between sensor readings
    pub sensor_interval: Duration,
    pub connection: ConnectionConfig,
}

impl Default for FieldNodeConfig {
    fn default() -> Self {
        Self {
            hub_addr: format!("127.0.0.1:{}", greenhouse_core::DEFAULT_HUB_PORT),
            hub_data_addr: None,
            name: "field node".to_string(),
            sensor_interval: Duration::from_secs(1),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Changes observed by a field node
#[derive(Debug, Clone, PartialEq)]
pub enum FieldNodeEvent {
    AdlChanged(Adl),
    ActuatorChanged {
        actuator: DeviceAddress,
        state: ActuatorState,
    },
    Disconnected,
}

struct FieldNodeShared {
    sensors: BTreeMap<DeviceAddress, Arc<dyn Sensor>>,
    actuators: BTreeMap<DeviceAddress, Arc<dyn Actuator>>,
    adl: RwLock<Adl>,
    fnsm: RwLock<Fnsm>,
    events: Broker<FieldNodeEvent>,
}

impl FieldNodeShared {
    fn fnst(&self) -> Fnst {
        let sensors = self
            .sensors
            .iter()
            .map(|(address, sensor)| (*address, sensor.device_class()));
        let actuators = self
            .actuators
            .iter()
            .map(|(address, actuator)| (*address, actuator.device_class()));
        sensors.chain(actuators).collect()
    }

    fn apply(&self, actuator: DeviceAddress, state: ActuatorState) -> Result<()> {
        let device = self
            .actuators
            .get(&actuator)
            .ok_or_else(|| ClientError::Actuator(format!("no actuator {}", actuator)))?;
        device
            .apply_state(state)
            .map_err(|fault| ClientError::Actuator(fault.to_string()))?;

        self.fnsm.write().insert(actuator, state);
        self.events
            .notify(&FieldNodeEvent::ActuatorChanged { actuator, state });
        Ok(())
    }
}

impl RequestHandler for FieldNodeShared {
    fn handle(&self, request: &Request, requester: &Requester) -> Response {
        match request {
            Request::AdlUpdate { adl } => {
                info!("Active devices now {:?}", adl);
                *self.adl.write() = adl.clone();
                self.events.notify(&FieldNodeEvent::AdlChanged(adl.clone()));
                Response::AdlUpdated
            }
            Request::ApplyActuatorState { actuator, state } => {
                match self.apply(*actuator, *state) {
                    Ok(()) => {
                        let notification = Request::ActuatorNotification {
                            actuator: *actuator,
                            state: *state,
                        };
                        if let Err(e) = requester.post(notification) {
                            warn!("Actuator {} notification failed: {}", actuator, e);
                        }
                        Response::ActuatorActivated {
                            actuator: *actuator,
                            state: *state,
                        }
                    }
                    Err(e) => Response::error(StatusCode::ActuatorError, e.to_string()),
                }
            }
            Request::Heartbeat => Response::Heartbeat,
            other => Response::error(
                StatusCode::ProtocolError,
                format!("'{}' is not handled by a field node", other.command()),
            ),
        }
    }

    fn on_disconnect(&self) {
        self.events.notify(&FieldNodeEvent::Disconnected);
    }
}

/// A registered field node
pub struct FieldNode {
    connection: ClientConnection,
    address: ClientAddress,
    shared: Arc<FieldNodeShared>,
    sensor_task: JoinHandle<()>,
}

impl FieldNode {
    pub(crate) async fn connect(
        config: FieldNodeConfig,
        sensors: BTreeMap<DeviceAddress, Arc<dyn Sensor>>,
        actuators: BTreeMap<DeviceAddress, Arc<dyn Actuator>>,
    ) -> Result<Self> {
        let fnsm: Fnsm = actuators
            .iter()
            .map(|(address, actuator)| (*address, actuator.initial_state()))
            .collect();
        let shared = Arc::new(FieldNodeShared {
            sensors,
            actuators,
            adl: RwLock::new(Adl::new()),
            fnsm: RwLock::new(fnsm.clone()),
            events: Broker::new(),
        });

        let connection = ClientConnection::connect(
            &config.hub_addr,
            &config.connection,
            Registry::field_node(),
            shared.clone(),
        )
        .await?;

        let request = Request::RegisterFieldNode {
            fnst: shared.fnst(),
            fnsm,
            name: config.name.clone(),
        };
        let address = match connection.call(request).await? {
            Response::FieldNodeRegistered { address } => address,
            other => return Err(ClientError::UnexpectedResponse(other.status())),
        };
        info!("Registered '{}' as field node {}", config.name, address);

        let data_addr = config
            .hub_data_addr
            .unwrap_or_else(|| SocketAddr::new(connection.peer_addr().ip(), DEFAULT_SENSOR_PORT));
        let udp = UdpTransport::bind("0.0.0.0:0").await?;
        let sensor_task = tokio::spawn(run_sensor_loop(
            udp,
            data_addr,
            address,
            Arc::clone(&shared),
            config.sensor_interval,
        ));

        Ok(Self {
            connection,
            address,
            shared,
            sensor_task,
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

    /// Devices currently streamed to the hub
    pub fn adl(&self) -> Adl {
        self.shared.adl.read().clone()
    }

    pub fn fnsm(&self) -> Fnsm {
        self.shared.fnsm.read().clone()
    }

    pub fn events(&self) -> &Broker<FieldNodeEvent> {
        &self.shared.events
    }

    /// Change an actuator locally and report it to the hub
    pub async fn set_actuator(&self, actuator: DeviceAddress, state: ActuatorState) -> Result<()> {
        self.shared.apply(actuator, state)?;
        match self
            .connection
            .call(Request::ActuatorNotification { actuator, state })
            .await?
        {
            Response::Ok => Ok(()),
            other => Err(ClientError::UnexpectedResponse(other.status())),
        }
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.connection.heartbeat().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.sensor_task.abort();
        self.connection.disconnect().await
    }
}

impl Drop for FieldNode {
    fn drop(&mut self) {
        self.sensor_task.abort();
    }
}

async fn run_sensor_loop(
    udp: UdpTransport,
    target: SocketAddr,
    field_node: ClientAddress,
    shared: Arc<FieldNodeShared>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let active = shared.adl.read().clone();

        for (address, sensor) in shared
            .sensors
            .iter()
            .filter(|(address, _)| active.contains(*address))
        {
            let reading = SensorReading::new(field_node, *address, sensor.read_value());
            if let Err(e) = udp.send_reading(&reading, target).await {
                debug!("Reading {}:{} not sent: {}", field_node, address, e);
            }
        }
    }
}
