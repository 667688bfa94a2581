//! Central hub state
//!
//! Owns every client proxy and the routing table. All check-then-act
//! sequences (address assignment, subscription changes) run under one lock;
//! events are published after the lock is released.

use greenhouse_core::{
    ActuatorState, Adl, Broker, ClientAddress, DeviceAddress, DeviceClass, FieldNodePool, Fnsm,
    Fnst, Request, SensorReading,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{HubError, Result};
use crate::proxy::{
    ClientAgent, ClientKind, ClientProxy, ConnectionId, ControlPanelProxy, FieldNodeProxy,
};

/// Changes to the hub's client and subscription state
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    ClientRegistered {
        address: ClientAddress,
        kind: ClientKind,
    },
    ClientRemoved {
        address: ClientAddress,
        kind: ClientKind,
    },
    Subscribed {
        control_panel: ClientAddress,
        field_node: ClientAddress,
    },
    Unsubscribed {
        control_panel: ClientAddress,
        field_node: ClientAddress,
    },
    AdlChanged {
        field_node: ClientAddress,
        adl: Adl,
    },
}

/// What a control panel learns about a field node when subscribing
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNodeSnapshot {
    pub fnst: Fnst,
    pub fnsm: Fnsm,
    pub name: String,
}

#[derive(Default)]
struct HubState {
    clients: BTreeMap<ClientAddress, ClientProxy>,
    connections: HashMap<ConnectionId, ClientAddress>,
    /// Field node address to subscribed control panel addresses
    routing: BTreeMap<ClientAddress, BTreeSet<ClientAddress>>,
}

impl HubState {
    /// Smallest address not held by any client
    fn next_address(&self) -> ClientAddress {
        let mut candidate = 0;
        for &address in self.clients.keys() {
            if address != candidate {
                break;
            }
            candidate += 1;
        }
        candidate
    }

    fn ensure_unregistered(&self, connection: ConnectionId) -> Result<()> {
        match self.connections.get(&connection) {
            Some(address) => Err(HubError::Registration(format!(
                "connection already registered as client {}",
                address
            ))),
            None => Ok(()),
        }
    }

    fn insert(&mut self, connection: ConnectionId, proxy: ClientProxy) {
        let address = proxy.address();
        self.connections.insert(connection, address);
        self.clients.insert(address, proxy);
    }

    fn field_node(&self, address: ClientAddress) -> Option<&FieldNodeProxy> {
        self.clients.get(&address).and_then(ClientProxy::as_field_node)
    }

    fn field_node_mut(&mut self, address: ClientAddress) -> Option<&mut FieldNodeProxy> {
        match self.clients.get_mut(&address) {
            Some(ClientProxy::FieldNode(proxy)) => Some(proxy),
            _ => None,
        }
    }

    fn control_panel(&self, address: ClientAddress) -> Option<&ControlPanelProxy> {
        self.clients.get(&address).and_then(ClientProxy::as_control_panel)
    }

    /// ADL of `field_node` given its current subscribers
    fn compute_adl(&self, field_node: ClientAddress) -> Adl {
        let Some(node) = self.field_node(field_node) else {
            return Adl::new();
        };
        let classes: BTreeSet<&DeviceClass> = self
            .routing
            .get(&field_node)
            .into_iter()
            .flatten()
            .filter_map(|panel| self.control_panel(*panel))
            .flat_map(|panel| panel.compatibility_list.iter())
            .collect();
        node.active_devices(classes)
    }

    fn push_to(&self, address: ClientAddress, request: Request) {
        if let Some(proxy) = self.clients.get(&address) {
            if let Err(e) = proxy.agent().push_request(request) {
                warn!("Failed to notify client {}: {}", address, e);
            }
        }
    }
}

/// Addressing, subscriptions and routing for one hub instance
pub struct CentralHub {
    state: Mutex<HubState>,
    events: Broker<HubEvent>,
}

impl CentralHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            events: Broker::new(),
        }
    }

    /// Hub state change notifications
    pub fn events(&self) -> &Broker<HubEvent> {
        &self.events
    }

    fn publish(&self, events: Vec<HubEvent>) {
        for event in &events {
            self.events.notify(event);
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub fn register_field_node(
        &self,
        agent: Arc<dyn ClientAgent>,
        fnst: Fnst,
        fnsm: Fnsm,
        name: String,
    ) -> Result<ClientAddress> {
        let connection = agent.connection_id();
        let address = {
            let mut state = self.state.lock();
            state.ensure_unregistered(connection)?;

            let address = state.next_address();
            info!(
                "Field node '{}' registered as {} ({} devices)",
                name,
                address,
                fnst.len()
            );
            state.insert(
                connection,
                ClientProxy::FieldNode(FieldNodeProxy {
                    address,
                    agent,
                    fnst,
                    fnsm,
                    name,
                    adl: Adl::new(),
                }),
            );
            state.routing.insert(address, BTreeSet::new());
            address
        };

        self.publish(vec![HubEvent::ClientRegistered {
            address,
            kind: ClientKind::FieldNode,
        }]);
        Ok(address)
    }

    pub fn register_control_panel(
        &self,
        agent: Arc<dyn ClientAgent>,
        compatibility_list: BTreeSet<DeviceClass>,
        data_endpoint: Option<SocketAddr>,
    ) -> Result<ClientAddress> {
        let connection = agent.connection_id();
        let address = {
            let mut state = self.state.lock();
            state.ensure_unregistered(connection)?;

            let address = state.next_address();
            info!(
                "Control panel registered as {} (compatible with {:?})",
                address, compatibility_list
            );
            state.insert(
                connection,
                ClientProxy::ControlPanel(ControlPanelProxy {
                    address,
                    agent,
                    compatibility_list,
                    data_endpoint,
                }),
            );
            address
        };

        self.publish(vec![HubEvent::ClientRegistered {
            address,
            kind: ClientKind::ControlPanel,
        }]);
        Ok(address)
    }

    /// Address and kind of the client registered on `connection`
    pub fn client_of(&self, connection: ConnectionId) -> Option<(ClientAddress, ClientKind)> {
        let state = self.state.lock();
        let address = *state.connections.get(&connection)?;
        state.clients.get(&address).map(|p| (address, p.kind()))
    }

    pub fn address_of(&self, connection: ConnectionId) -> Option<ClientAddress> {
        self.state.lock().connections.get(&connection).copied()
    }

    /// Remove the client registered on `connection`, if any.
    ///
    /// Subscribers of a departing field node are told it is gone; field
    /// nodes a departing control panel watched get a fresh ADL.
    pub fn deregister(&self, connection: ConnectionId) -> Option<ClientAddress> {
        let mut events = Vec::new();
        let address = {
            let mut state = self.state.lock();
            let address = state.connections.remove(&connection)?;
            let proxy = state.clients.remove(&address)?;
            let kind = proxy.kind();

            match proxy {
                ClientProxy::FieldNode(node) => {
                    let subscribers = state.routing.remove(&address).unwrap_or_default();
                    info!(
                        "Field node '{}' ({}) left, notifying {} subscribers",
                        node.name,
                        address,
                        subscribers.len()
                    );
                    for panel in subscribers {
                        state.push_to(panel, Request::FieldNodeUnavailable { field_node: address });
                        events.push(HubEvent::Unsubscribed {
                            control_panel: panel,
                            field_node: address,
                        });
                    }
                }
                ClientProxy::ControlPanel(_) => {
                    info!("Control panel {} left", address);
                    let watched: Vec<ClientAddress> = state
                        .routing
                        .iter_mut()
                        .filter_map(|(node, panels)| panels.remove(&address).then_some(*node))
                        .collect();

                    for node in watched {
                        events.push(HubEvent::Unsubscribed {
                            control_panel: address,
                            field_node: node,
                        });
                        let adl = state.compute_adl(node);
                        if let Some(proxy) = state.field_node_mut(node) {
                            if proxy.adl == adl {
                                continue;
                            }
                            proxy.adl = adl.clone();
                        }
                        state.push_to(node, Request::AdlUpdate { adl: adl.clone() });
                        events.push(HubEvent::AdlChanged {
                            field_node: node,
                            adl,
                        });
                    }
                }
            }

            events.push(HubEvent::ClientRemoved { address, kind });
            address
        };

        self.publish(events);
        Some(address)
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe `control_panel` to `field_node`.
    ///
    /// The field node must accept the resulting ADL push; otherwise the
    /// subscription is rolled back and the routing table is left untouched.
    pub fn subscribe(
        &self,
        control_panel: ClientAddress,
        field_node: ClientAddress,
    ) -> Result<FieldNodeSnapshot> {
        let (snapshot, adl) = {
            let mut state = self.state.lock();
            if state.control_panel(control_panel).is_none() {
                return Err(HubError::Subscription(format!(
                    "{} is not a registered control panel",
                    control_panel
                )));
            }
            if state.field_node(field_node).is_none() {
                return Err(HubError::Subscription(format!(
                    "unknown field node {}",
                    field_node
                )));
            }

            let subscribers = state.routing.entry(field_node).or_default();
            if !subscribers.insert(control_panel) {
                return Err(HubError::Subscription(format!(
                    "control panel {} is already subscribed to field node {}",
                    control_panel, field_node
                )));
            }

            let adl = state.compute_adl(field_node);
            let Some(node) = state.field_node_mut(field_node) else {
                return Err(HubError::Subscription(format!(
                    "unknown field node {}",
                    field_node
                )));
            };

            if let Err(e) = node.agent.push_request(Request::AdlUpdate { adl: adl.clone() }) {
                warn!(
                    "ADL push to field node {} failed, rolling back subscription of {}: {}",
                    field_node, control_panel, e
                );
                if let Some(subscribers) = state.routing.get_mut(&field_node) {
                    subscribers.remove(&control_panel);
                }
                return Err(HubError::Subscription(format!(
                    "field node {} could not be updated",
                    field_node
                )));
            }

            node.adl = adl.clone();
            let snapshot = FieldNodeSnapshot {
                fnst: node.fnst.clone(),
                fnsm: node.fnsm.clone(),
                name: node.name.clone(),
            };
            info!(
                "Control panel {} subscribed to field node {}, ADL {:?}",
                control_panel, field_node, adl
            );
            (snapshot, adl)
        };

        self.publish(vec![
            HubEvent::Subscribed {
                control_panel,
                field_node,
            },
            HubEvent::AdlChanged { field_node, adl },
        ]);
        Ok(snapshot)
    }

    /// Remove a subscription, with the same rollback rule as [`CentralHub::subscribe`]
    pub fn unsubscribe(&self, control_panel: ClientAddress, field_node: ClientAddress) -> Result<()> {
        let adl = {
            let mut state = self.state.lock();
            let removed = state
                .routing
                .get_mut(&field_node)
                .map(|subscribers| subscribers.remove(&control_panel))
                .unwrap_or(false);
            if !removed {
                return Err(HubError::Subscription(format!(
                    "control panel {} is not subscribed to field node {}",
                    control_panel, field_node
                )));
            }

            let adl = state.compute_adl(field_node);
            let pushed = match state.field_node_mut(field_node) {
                Some(node) => node
                    .agent
                    .push_request(Request::AdlUpdate { adl: adl.clone() })
                    .map(|_| node.adl = adl.clone()),
                None => Ok(()),
            };

            if let Err(e) = pushed {
                warn!(
                    "ADL push to field node {} failed, keeping subscription of {}: {}",
                    field_node, control_panel, e
                );
                if let Some(subscribers) = state.routing.get_mut(&field_node) {
                    subscribers.insert(control_panel);
                }
                return Err(HubError::Subscription(format!(
                    "field node {} could not be updated",
                    field_node
                )));
            }

            info!(
                "Control panel {} unsubscribed from field node {}",
                control_panel, field_node
            );
            adl
        };

        self.publish(vec![
            HubEvent::Unsubscribed {
                control_panel,
                field_node,
            },
            HubEvent::AdlChanged { field_node, adl },
        ]);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// Data endpoints of the subscribed control panels compatible with the
    /// reading's sensor
    pub fn route_sensor_data(&self, reading: &SensorReading) -> Vec<SocketAddr> {
        let state = self.state.lock();
        let Some(class) = state
            .field_node(reading.field_node)
            .and_then(|node| node.fnst.get(&reading.sensor))
        else {
            debug!(
                "Dropping reading for unknown sensor {}:{}",
                reading.field_node, reading.sensor
            );
            return Vec::new();
        };

        state
            .routing
            .get(&reading.field_node)
            .into_iter()
            .flatten()
            .filter_map(|panel| state.control_panel(*panel))
            .filter(|panel| panel.is_compatible(class))
            .filter_map(|panel| panel.data_endpoint)
            .collect()
    }

    /// Address and name of every registered field node
    pub fn field_node_pool(&self) -> FieldNodePool {
        self.state
            .lock()
            .clients
            .values()
            .filter_map(ClientProxy::as_field_node)
            .map(|node| (node.address, node.name.clone()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Actuators
    // ------------------------------------------------------------------

    /// Forward an actuator command from a control panel to its field node
    pub fn activate_actuator(
        &self,
        field_node: ClientAddress,
        actuator: DeviceAddress,
        state: ActuatorState,
    ) -> Result<()> {
        let hub = self.state.lock();
        let node = hub
            .field_node(field_node)
            .ok_or_else(|| HubError::Actuator(format!("unknown field node {}", field_node)))?;
        if !node.fnsm.contains_key(&actuator) {
            return Err(HubError::Actuator(format!(
                "field node {} has no actuator {}",
                field_node, actuator
            )));
        }

        node.agent
            .push_request(Request::ApplyActuatorState { actuator, state })
            .map_err(|e| {
                HubError::Actuator(format!("field node {} unreachable: {}", field_node, e))
            })?;
        debug!(
            "Forwarded actuator {}:{} -> {}",
            field_node, actuator, state
        );
        Ok(())
    }

    /// Record an actuator change reported by a field node and relay it to
    /// its subscribers
    pub fn actuator_notification(
        &self,
        field_node: ClientAddress,
        actuator: DeviceAddress,
        state: ActuatorState,
    ) -> Result<()> {
        let mut hub = self.state.lock();
        let node = hub
            .field_node_mut(field_node)
            .ok_or_else(|| HubError::Authentication(format!("{} is not a field node", field_node)))?;
        let Some(current) = node.fnsm.get_mut(&actuator) else {
            return Err(HubError::Actuator(format!(
                "field node {} has no actuator {}",
                field_node, actuator
            )));
        };
        *current = state;

        let subscribers: Vec<ClientAddress> = hub
            .routing
            .get(&field_node)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        for panel in subscribers {
            hub.push_to(
                panel,
                Request::ActuatorState {
                    field_node,
                    actuator,
                    state,
                },
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    pub fn addresses(&self) -> Vec<ClientAddress> {
        self.state.lock().clients.keys().copied().collect()
    }

    pub fn adl_of(&self, field_node: ClientAddress) -> Option<Adl> {
        self.state.lock().field_node(field_node).map(|n| n.adl.clone())
    }

    pub fn fnsm_of(&self, field_node: ClientAddress) -> Option<Fnsm> {
        self.state.lock().field_node(field_node).map(|n| n.fnsm.clone())
    }

    pub fn subscribers_of(&self, field_node: ClientAddress) -> Option<BTreeSet<ClientAddress>> {
        self.state.lock().routing.get(&field_node).cloned()
    }

    pub fn routing_snapshot(&self) -> BTreeMap<ClientAddress, BTreeSet<ClientAddress>> {
        self.state.lock().routing.clone()
    }
}

impl Default for CentralHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenhouse_core::MessageId;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct MockAgent {
        id: ConnectionId,
        pushed: Mutex<Vec<Request>>,
        failing: AtomicBool,
        ids: AtomicU32,
    }

    impl MockAgent {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::new_v4(),
                ..Default::default()
            })
        }

        fn pushed(&self) -> Vec<Request> {
            self.pushed.lock().clone()
        }
    }

    impl ClientAgent for MockAgent {
        fn push_request(&self, request: Request) -> Result<MessageId> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(HubError::Protocol("connection lost".into()));
            }
            self.pushed.lock().push(request);
            Ok(self.ids.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn connection_id(&self) -> ConnectionId {
            self.id
        }

        fn is_connected(&self) -> bool {
            !self.failing.load(Ordering::SeqCst)
        }
    }

    fn fnst(entries: &[(DeviceAddress, &str)]) -> Fnst {
        entries.iter().map(|(a, c)| (*a, c.to_string())).collect()
    }

    fn classes(list: &[&str]) -> BTreeSet<DeviceClass> {
        list.iter().map(|c| c.to_string()).collect()
    }

    fn endpoint(port: u16) -> Option<SocketAddr> {
        Some(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    #[test]
    fn test_addresses_are_smallest_unused() {
        let hub = CentralHub::new();
        let agents: Vec<_> = (0..3).map(|_| MockAgent::new()).collect();

        for (i, agent) in agents.iter().enumerate() {
            let address = hub
                .register_field_node(agent.clone(), Fnst::new(), Fnsm::new(), format!("n{}", i))
                .unwrap();
            assert_eq!(address, i as ClientAddress);
        }

        assert_eq!(hub.deregister(agents[1].id), Some(1));

        let panel = MockAgent::new();
        let address = hub
            .register_control_panel(panel, classes(&["A1"]), None)
            .unwrap();
        assert_eq!(address, 1);

        let late = MockAgent::new();
        let address = hub
            .register_field_node(late, Fnst::new(), Fnsm::new(), "late".into())
            .unwrap();
        assert_eq!(address, 3);
        assert_eq!(hub.addresses(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_double_registration_rejected() {
        let hub = CentralHub::new();
        let agent = MockAgent::new();

        hub.register_field_node(agent.clone(), Fnst::new(), Fnsm::new(), "n".into())
            .unwrap();
        let err = hub
            .register_control_panel(agent, BTreeSet::new(), None)
            .unwrap_err();
        assert!(matches!(err, HubError::Registration(_)));
        assert_eq!(hub.client_count(), 1);
    }

    #[test]
    fn test_subscribe_computes_adl() {
        let hub = CentralHub::new();
        let node = MockAgent::new();
        let panel = MockAgent::new();

        let fn_addr = hub
            .register_field_node(node.clone(), fnst(&[(0, "A1")]), Fnsm::new(), "north".into())
            .unwrap();
        let cp_addr = hub
            .register_control_panel(panel, classes(&["A1"]), None)
            .unwrap();
        assert_eq!(fn_addr, 0);

        let snapshot = hub.subscribe(cp_addr, fn_addr).unwrap();
        assert_eq!(snapshot.fnst, fnst(&[(0, "A1")]));
        assert_eq!(snapshot.name, "north");
        assert_eq!(hub.adl_of(fn_addr), Some(Adl::from([0])));
        assert_eq!(
            node.pushed(),
            vec![Request::AdlUpdate {
                adl: Adl::from([0])
            }]
        );
    }

    #[test]
    fn test_adl_is_union_of_subscriber_classes() {
        let hub = CentralHub::new();
        let node = MockAgent::new();
        let fn_addr = hub
            .register_field_node(
                node,
                fnst(&[(0, "A1"), (1, "A2"), (2, "S1")]),
                Fnsm::new(),
                "n".into(),
            )
            .unwrap();
        let p1 = hub
            .register_control_panel(MockAgent::new(), classes(&["A1"]), None)
            .unwrap();
        let p2 = hub
            .register_control_panel(MockAgent::new(), classes(&["S1", "X9"]), None)
            .unwrap();

        hub.subscribe(p1, fn_addr).unwrap();
        hub.subscribe(p2, fn_addr).unwrap();
        assert_eq!(hub.adl_of(fn_addr), Some(Adl::from([0, 2])));

        hub.unsubscribe(p1, fn_addr).unwrap();
        assert_eq!(hub.adl_of(fn_addr), Some(Adl::from([2])));
    }

    #[test]
    fn test_subscribe_rolls_back_when_push_fails() {
        let hub = CentralHub::new();
        let node = MockAgent::new();
        let fn_addr = hub
            .register_field_node(node.clone(), fnst(&[(0, "A1")]), Fnsm::new(), "n".into())
            .unwrap();
        let cp_addr = hub
            .register_control_panel(MockAgent::new(), classes(&["A1"]), None)
            .unwrap();

        let before = hub.routing_snapshot();
        node.failing.store(true, Ordering::SeqCst);

        let err = hub.subscribe(cp_addr, fn_addr).unwrap_err();
        assert!(matches!(err, HubError::Subscription(_)));
        assert_eq!(hub.routing_snapshot(), before);
        assert_eq!(hub.adl_of(fn_addr), Some(Adl::new()));
    }

    #[test]
    fn test_subscription_errors() {
        let hub = CentralHub::new();
        let fn_addr = hub
            .register_field_node(MockAgent::new(), Fnst::new(), Fnsm::new(), "n".into())
            .unwrap();
        let cp_addr = hub
            .register_control_panel(MockAgent::new(), BTreeSet::new(), None)
            .unwrap();

        // unknown field node
        assert!(matches!(
            hub.subscribe(cp_addr, 42),
            Err(HubError::Subscription(_))
        ));
        // a field node is not a control panel
        assert!(matches!(
            hub.subscribe(fn_addr, fn_addr),
            Err(HubError::Subscription(_))
        ));

        hub.subscribe(cp_addr, fn_addr).unwrap();
        assert!(matches!(
            hub.subscribe(cp_addr, fn_addr),
            Err(HubError::Subscription(_))
        ));

        hub.unsubscribe(cp_addr, fn_addr).unwrap();
        assert!(matches!(
            hub.unsubscribe(cp_addr, fn_addr),
            Err(HubError::Subscription(_))
        ));
    }

    #[test]
    fn test_route_sensor_data_to_compatible_subscribers() {
        let hub = CentralHub::new();
        let fn_addr = hub
            .register_field_node(
                MockAgent::new(),
                fnst(&[(0, "A1"), (1, "A2")]),
                Fnsm::new(),
                "n".into(),
            )
            .unwrap();
        let temp = hub
            .register_control_panel(MockAgent::new(), classes(&["A1"]), endpoint(7001))
            .unwrap();
        let humid = hub
            .register_control_panel(MockAgent::new(), classes(&["A2"]), endpoint(7002))
            .unwrap();
        let _idle = hub
            .register_control_panel(MockAgent::new(), classes(&["A1"]), endpoint(7003))
            .unwrap();

        hub.subscribe(temp, fn_addr).unwrap();
        hub.subscribe(humid, fn_addr).unwrap();

        let targets = hub.route_sensor_data(&SensorReading::new(fn_addr, 0, 21.0));
        assert_eq!(targets, vec![endpoint(7001).unwrap()]);

        let targets = hub.route_sensor_data(&SensorReading::new(fn_addr, 9, 1.0));
        assert!(targets.is_empty());
    }

    #[test]
    fn test_field_node_pool() {
        let hub = CentralHub::new();
        hub.register_field_node(MockAgent::new(), Fnst::new(), Fnsm::new(), "north".into())
            .unwrap();
        hub.register_control_panel(MockAgent::new(), BTreeSet::new(), None)
            .unwrap();
        hub.register_field_node(MockAgent::new(), Fnst::new(), Fnsm::new(), "south".into())
            .unwrap();

        let pool = hub.field_node_pool();
        assert_eq!(
            pool,
            FieldNodePool::from([(0, "north".to_string()), (2, "south".to_string())])
        );
    }

    #[test]
    fn test_control_panel_departure_recomputes_adl() {
        let hub = CentralHub::new();
        let node = MockAgent::new();
        let fn_addr = hub
            .register_field_node(node.clone(), fnst(&[(0, "A1"), (1, "A2")]), Fnsm::new(), "n".into())
            .unwrap();
        let keep = MockAgent::new();
        let leave = MockAgent::new();
        let keep_addr = hub
            .register_control_panel(keep, classes(&["A1"]), None)
            .unwrap();
        let leave_addr = hub
            .register_control_panel(leave.clone(), classes(&["A2"]), None)
            .unwrap();
        hub.subscribe(keep_addr, fn_addr).unwrap();
        hub.subscribe(leave_addr, fn_addr).unwrap();
        assert_eq!(hub.adl_of(fn_addr), Some(Adl::from([0, 1])));

        hub.deregister(leave.id);

        assert_eq!(hub.adl_of(fn_addr), Some(Adl::from([0])));
        assert_eq!(hub.subscribers_of(fn_addr), Some(BTreeSet::from([keep_addr])));
        assert_eq!(
            node.pushed().last(),
            Some(&Request::AdlUpdate {
                adl: Adl::from([0])
            })
        );
    }

    #[test]
    fn test_field_node_departure_notifies_subscribers() {
        let hub = CentralHub::new();
        let node = MockAgent::new();
        let panel = MockAgent::new();
        let fn_addr = hub
            .register_field_node(node.clone(), Fnst::new(), Fnsm::new(), "n".into())
            .unwrap();
        let cp_addr = hub
            .register_control_panel(panel.clone(), BTreeSet::new(), None)
            .unwrap();
        hub.subscribe(cp_addr, fn_addr).unwrap();

        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = removed.clone();
        hub.events().add(move |event: &HubEvent| {
            if let HubEvent::ClientRemoved { address, .. } = event {
                sink.lock().push(*address);
            }
        });

        assert_eq!(hub.deregister(node.id), Some(fn_addr));
        assert_eq!(
            panel.pushed(),
            vec![Request::FieldNodeUnavailable { field_node: fn_addr }]
        );
        assert_eq!(hub.subscribers_of(fn_addr), None);
        assert_eq!(*removed.lock(), vec![fn_addr]);
        assert_eq!(hub.deregister(node.id), None);
    }

    #[test]
    fn test_actuator_notification_fans_out() {
        let hub = CentralHub::new();
        let node = MockAgent::new();
        let panel = MockAgent::new();
        let fn_addr = hub
            .register_field_node(
                node,
                fnst(&[(3, "S1")]),
                Fnsm::from([(3, 0)]),
                "n".into(),
            )
            .unwrap();
        let cp_addr = hub
            .register_control_panel(panel.clone(), classes(&["S1"]), None)
            .unwrap();
        hub.subscribe(cp_addr, fn_addr).unwrap();

        hub.actuator_notification(fn_addr, 3, 1).unwrap();
        assert_eq!(hub.fnsm_of(fn_addr), Some(Fnsm::from([(3, 1)])));
        assert_eq!(
            panel.pushed(),
            vec![Request::ActuatorState {
                field_node: fn_addr,
                actuator: 3,
                state: 1
            }]
        );

        assert!(matches!(
            hub.actuator_notification(fn_addr, 4, 1),
            Err(HubError::Actuator(_))
        ));
    }

    #[test]
    fn test_activate_actuator_requires_known_actuator() {
        let hub = CentralHub::new();
        let node = MockAgent::new();
        let fn_addr = hub
            .register_field_node(node.clone(), Fnst::new(), Fnsm::from([(3, 0)]), "n".into())
            .unwrap();

        hub.activate_actuator(fn_addr, 3, 1).unwrap();
        assert_eq!(
            node.pushed(),
            vec![Request::ApplyActuatorState {
                actuator: 3,
                state: 1
            }]
        );
        assert!(matches!(
            hub.activate_actuator(fn_addr, 5, 1),
            Err(HubError::Actuator(_))
        ));
        assert!(matches!(
            hub.activate_actuator(77, 3, 1),
            Err(HubError::Actuator(_))
        ));
    }
}
