//! Common test helpers for the greenhouse crates
//!
//! This crate provides:
//! - A hub on ephemeral ports that shuts down on drop
//! - Condition-based waiting (no hardcoded sleeps)
//! - Scripted sensors and actuators
//! - Event collectors for broker listeners

use greenhouse_client::{ControlPanelBuilder, FieldNodeBuilder};
use greenhouse_core::{Actuator, ActuatorFault, ActuatorState, DeviceClass, Sensor};
use greenhouse_hub::{CentralHub, HubConfig, HubServer};
use greenhouse_transport::{TcpServer, TransportServer, UdpTransport};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// RSA modulus used by test hubs; small keys keep handshakes fast
pub const TEST_RSA_BITS: usize = 1024;

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Wait with notification - more efficient than polling
pub async fn wait_with_notify(notify: &Notify, max_wait: Duration) -> bool {
    timeout(max_wait, notify.notified()).await.is_ok()
}

// ============================================================================
// Test Hub - RAII wrapper with proper cleanup
// ============================================================================

/// A hub on `127.0.0.1` ephemeral ports that stops on drop
pub struct TestHub {
    server: HubServer,
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    handles: Vec<JoinHandle<()>>,
}

impl TestHub {
    /// Start a hub with test defaults
    pub async fn start() -> Self {
        Self::start_with_config(HubConfig {
            rsa_bits: TEST_RSA_BITS,
            ..Default::default()
        })
        .await
    }

    /// Start a hub with a custom configuration; its listen addresses are
    /// replaced by ephemeral ones
    pub async fn start_with_config(config: HubConfig) -> Self {
        let tcp = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let udp = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let tcp_addr = tcp.local_addr().unwrap();
        let udp_addr = udp.local_addr().unwrap();

        let server = HubServer::new(HubConfig {
            tcp_addr: tcp_addr.to_string(),
            udp_addr: udp_addr.to_string(),
            ..config
        });

        let control = server.clone();
        let data = server.clone();
        let handles = vec![
            tokio::spawn(async move {
                if let Err(e) = control.serve_on(tcp).await {
                    tracing::error!("Test hub stopped: {}", e);
                }
            }),
            tokio::spawn(async move {
                if let Err(e) = data.serve_sensor_data(udp).await {
                    tracing::error!("Test hub relay stopped: {}", e);
                }
            }),
        ];

        Self {
            server,
            tcp_addr,
            udp_addr,
            handles,
        }
    }

    /// Control address, as accepted by the client builders
    pub fn addr(&self) -> String {
        self.tcp_addr.to_string()
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    /// Sensor datagram address
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    pub fn server(&self) -> &HubServer {
        &self.server
    }

    pub fn hub(&self) -> &Arc<CentralHub> {
        self.server.hub()
    }

    /// Field node builder pointed at this hub, sampling every 50 ms
    pub fn field_node(&self, name: &str) -> FieldNodeBuilder {
        FieldNodeBuilder::new(&self.addr())
            .name(name)
            .hub_data_addr(self.udp_addr)
            .sensor_interval(Duration::from_millis(50))
    }

    /// Control panel builder pointed at this hub, receiving data on loopback
    pub fn control_panel(&self) -> ControlPanelBuilder {
        ControlPanelBuilder::new(&self.addr()).data_bind_addr("127.0.0.1:0")
    }

    /// Stop the hub explicitly (also happens on drop)
    pub fn stop(&mut self) {
        self.server.stop();
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Scripted Devices
// ============================================================================

/// Sensor returning a settable value
pub struct FixedSensor {
    class: DeviceClass,
    value: Mutex<f64>,
    reads: AtomicU32,
}

impl FixedSensor {
    pub fn new(class: &str, value: f64) -> Arc<Self> {
        Arc::new(Self {
            class: class.to_string(),
            value: Mutex::new(value),
            reads: AtomicU32::new(0),
        })
    }

    pub fn set(&self, value: f64) {
        *self.value.lock() = value;
    }

    /// How often the sensor was read
    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Sensor for FixedSensor {
    fn device_class(&self) -> DeviceClass {
        self.class.clone()
    }

    fn read_value(&self) -> f64 {
        self.reads.fetch_add(1, Ordering::SeqCst);
        *self.value.lock()
    }
}

/// Actuator remembering every applied state
pub struct RecordingActuator {
    class: DeviceClass,
    initial: ActuatorState,
    applied: Mutex<Vec<ActuatorState>>,
    failing: AtomicBool,
}

impl RecordingActuator {
    pub fn new(class: &str, initial: ActuatorState) -> Arc<Self> {
        Arc::new(Self {
            class: class.to_string(),
            initial,
            applied: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        })
    }

    /// Make every following apply fail
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<ActuatorState> {
        self.applied.lock().clone()
    }
}

impl Actuator for RecordingActuator {
    fn device_class(&self) -> DeviceClass {
        self.class.clone()
    }

    fn initial_state(&self) -> ActuatorState {
        self.initial
    }

    fn apply_state(&self, state: ActuatorState) -> Result<(), ActuatorFault> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ActuatorFault(format!("refused state {}", state)));
        }
        self.applied.lock().push(state);
        Ok(())
    }
}

// ============================================================================
// Event Collectors
// ============================================================================

/// Collects events from a broker listener with thread-safe access
pub struct EventCollector<E> {
    events: Arc<Mutex<Vec<E>>>,
    notify: Arc<Notify>,
    count: Arc<AtomicU32>,
}

impl<E: Clone + Send + 'static> EventCollector<E> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            notify: Arc::new(Notify::new()),
            count: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Listener to register with a broker
    pub fn listener(&self) -> impl Fn(&E) + Send + Sync + 'static {
        let events = self.events.clone();
        let notify = self.notify.clone();
        let count = self.count.clone();

        move |event: &E| {
            events.lock().push(event.clone());
            count.fetch_add(1, Ordering::SeqCst);
            notify.notify_waiters();
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait for at least n events
    pub async fn wait_for_count(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.count, n, max_wait).await
    }

    /// Wait for an event matching `predicate`
    pub async fn wait_for_match<P>(&self, predicate: P, max_wait: Duration) -> bool
    where
        P: Fn(&E) -> bool,
    {
        wait_for(
            || async { self.events.lock().iter().any(&predicate) },
            DEFAULT_CHECK_INTERVAL,
            max_wait,
        )
        .await
    }

    pub fn events(&self) -> Vec<E> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.count.store(0, Ordering::SeqCst);
    }
}

impl<E: Clone + Send + 'static> Default for EventCollector<E> {
    fn default() -> Self {
        Self::new()
    }
}
