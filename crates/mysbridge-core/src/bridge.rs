// ── Bridge runtime ──
//
// Owns every gateway, the router, the state reconciler, the bus client and
// the passthrough listeners, and drives their background tasks. All tasks
// share one root cancellation token.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::{BoxFuture, try_join_all};
use mysbridge_proto::{
    ConnectionState, EthernetTransport, Message, RetryError, RetryPolicy, SerialTransport,
    Supervisor, Transport,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{BusMessage, MessageBus, MqttBus};
use crate::config::{BridgeConfig, LinkConfig};
use crate::discovery;
use crate::error::CoreError;
use crate::gateway::{Gateway, aggregate_seen_nodes, format_node_list};
use crate::passthrough::Passthrough;
use crate::reconcile::StateReconciler;
use crate::router::{Router, bindings_from_config};
use crate::topics::{Channel, Topics};

/// How often each connection's liveness is polled.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

/// Time given to the broker to replay retained state before discovery.
const RETAINED_SETTLE: Duration = Duration::from_secs(1);

const BUS_CONNECTION: &str = "MQTT broker";

// ── Link ─────────────────────────────────────────────────────────────

/// One gateway and everything attached to its transport.
struct Link {
    gateway: Arc<Gateway>,
    supervisor: Arc<Supervisor>,
    passthrough: Option<Arc<Passthrough>>,
}

// ── Bridge ───────────────────────────────────────────────────────────

/// The running gateway bridge.
///
/// Cheaply cloneable. [`start`](Self::start) connects everything and spawns
/// the background tasks; [`shutdown`](Self::shutdown) stops them. A bridge
/// runs at most once.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    topics: Topics,
    links: Vec<Link>,
    router: Arc<Router>,
    reconciler: Arc<StateReconciler>,
    bus: Arc<dyn MessageBus>,
    bus_supervisor: Arc<Supervisor>,
    cancel: CancellationToken,
    started: AtomicBool,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Build the bridge with real transports and the MQTT client.
    pub fn new(config: BridgeConfig) -> Result<Self, CoreError> {
        let transports = config
            .gateways
            .iter()
            .map(|gateway| (gateway.name.clone(), build_transport(&gateway.link)))
            .collect();
        let bus: Arc<dyn MessageBus> = Arc::new(MqttBus::new(config.bus.clone()));
        Self::with_links(config, transports, bus)
    }

    /// Build the bridge over caller-supplied transports and bus.
    ///
    /// `transports` is keyed by gateway name and must cover every
    /// configured gateway.
    pub fn with_links(
        config: BridgeConfig,
        transports: HashMap<String, Arc<dyn Transport>>,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Self, CoreError> {
        let mut links = Vec::with_capacity(config.gateways.len());
        for gateway in &config.gateways {
            let transport = transports
                .get(&gateway.name)
                .cloned()
                .ok_or_else(|| CoreError::UnknownGateway {
                    name: gateway.name.clone(),
                })?;
            let supervisor = Supervisor::new(
                format!("gateway '{}' ({})", gateway.name, transport.name()),
                RetryPolicy::default(),
                LIVENESS_INTERVAL,
            );
            links.push(Link {
                gateway: Arc::new(Gateway::new(gateway, transport)),
                supervisor: Arc::new(supervisor),
                passthrough: gateway
                    .passthrough_port
                    .map(|port| Arc::new(Passthrough::new(&gateway.name, port))),
            });
        }

        let topics = Topics::new(&config.adapter.topic_prefix);
        let router = Arc::new(Router::new(bindings_from_config(&config), transports));
        let reconciler = Arc::new(StateReconciler::new(
            Arc::clone(&router),
            Arc::clone(&bus),
            topics.clone(),
        ));

        Ok(Self {
            inner: Arc::new(BridgeInner {
                config,
                topics,
                links,
                router,
                reconciler,
                bus,
                bus_supervisor: Arc::new(Supervisor::new(
                    BUS_CONNECTION,
                    RetryPolicy::default(),
                    LIVENESS_INTERVAL,
                )),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn topics(&self) -> &Topics {
        &self.inner.topics
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.inner.router
    }

    pub fn reconciler(&self) -> &Arc<StateReconciler> {
        &self.inner.reconciler
    }

    pub fn gateway(&self, name: &str) -> Option<&Arc<Gateway>> {
        self.inner
            .links
            .iter()
            .map(|link| &link.gateway)
            .find(|gateway| gateway.name() == name)
    }

    pub fn gateways(&self) -> impl Iterator<Item = &Arc<Gateway>> {
        self.inner.links.iter().map(|link| &link.gateway)
    }

    /// Token that stops the bridge. Cancelling it interrupts a pending
    /// [`start`](Self::start).
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Current state of every managed connection, bus last.
    pub fn connection_states(&self) -> Vec<(String, ConnectionState)> {
        self.inner
            .links
            .iter()
            .map(|link| &link.supervisor)
            .chain(std::iter::once(&self.inner.bus_supervisor))
            .map(|supervisor| (supervisor.name().to_owned(), supervisor.state()))
            .collect()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect everything and start the background tasks.
    ///
    /// Every transport and the bus connect concurrently, each retrying
    /// forever; startup continues once all are up. Returns
    /// [`CoreError::Cancelled`] if the bridge is stopped first.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyRunning);
        }
        let inner = &self.inner;

        // Listener ports are checked before any retry loop starts.
        let mut listeners = Vec::new();
        for link in &inner.links {
            if let Some(passthrough) = &link.passthrough {
                listeners.push((link, Arc::clone(passthrough), passthrough.bind().await?));
            }
        }

        for filter in self.subscriptions() {
            inner.bus.subscribe(&filter).await?;
        }

        self.connect_all().await?;

        let mut handles = inner.task_handles.lock().await;

        // Inbound pumps
        let bus_messages = inner.bus.incoming()?;
        handles.push(tokio::spawn(bus_pump(
            self.clone(),
            bus_messages,
            inner.cancel.child_token(),
        )));
        for link in &inner.links {
            let inbound = link.gateway.transport().receive()?;
            handles.push(tokio::spawn(device_pump(
                self.clone(),
                Arc::clone(&link.gateway),
                link.passthrough.clone(),
                inbound,
                inner.cancel.child_token(),
            )));
        }

        for (link, passthrough, listener) in listeners {
            handles.push(tokio::spawn(passthrough.serve(
                listener,
                Arc::clone(link.gateway.transport()),
                inner.cancel.child_token(),
            )));
        }

        // Liveness monitors
        for link in &inner.links {
            handles.push(spawn_link_monitor(link, inner.cancel.child_token()));
        }
        handles.push(self.spawn_bus_monitor());

        // Let retained state arrive before deciding on initial states.
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return Err(CoreError::Cancelled),
            () = tokio::time::sleep(RETAINED_SETTLE) => {}
        }

        if inner.config.adapter.discovery {
            self.publish_discovery().await?;
        }

        let sync = &inner.config.adapter.sync;
        if sync.enabled && !sync.period.is_zero() {
            info!(period = ?sync.period, "starting state sync");
            handles.push(tokio::spawn(Arc::clone(&inner.reconciler).run_sync(
                sync.period,
                inner.cancel.child_token(),
            )));
        }

        for link in &inner.links {
            if let Err(e) = link.gateway.send_version_request().await {
                error!(gateway = %link.gateway.name(), error = %e, "initial version request failed");
            }
            handles.push(tokio::spawn(
                Arc::clone(&link.gateway).heartbeat(inner.cancel.child_token()),
            ));
        }

        for link in &inner.links {
            self.publish_seen_nodes(&link.gateway).await;
        }

        info!(
            gateways = inner.links.len(),
            entities = inner.router.bindings().len(),
            "bridge started"
        );
        Ok(())
    }

    /// Stop every task and close every connection.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        for link in &self.inner.links {
            if let Err(e) = link.gateway.transport().disconnect().await {
                warn!(gateway = %link.gateway.name(), error = %e, "transport disconnect failed");
            }
        }
        if let Err(e) = self.inner.bus.disconnect().await {
            warn!(error = %e, "bus disconnect failed");
        }
        info!("bridge stopped");
    }

    // ── Startup helpers ──────────────────────────────────────────────

    /// Command topics of write-capable entities and state topics of
    /// readable ones.
    fn subscriptions(&self) -> Vec<String> {
        let topics = &self.inner.topics;
        self.inner
            .router
            .bindings()
            .iter()
            .flat_map(|binding| {
                let command = binding.writable.then(|| topics.command(&binding.key));
                let state = binding.readable.then(|| topics.state(&binding.key));
                command.into_iter().chain(state)
            })
            .collect()
    }

    async fn connect_all(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let cancel = &inner.cancel;
        let mut attempts: Vec<BoxFuture<'_, Result<(), CoreError>>> = Vec::new();

        for link in &inner.links {
            let transport = link.gateway.transport();
            let supervisor = &link.supervisor;
            attempts.push(Box::pin(async move {
                supervisor
                    .establish(cancel, move || transport.connect())
                    .await
                    .map_err(|e| startup_error(supervisor.name(), e))
            }));
        }

        let bus = &inner.bus;
        let supervisor = &inner.bus_supervisor;
        attempts.push(Box::pin(async move {
            supervisor
                .establish(cancel, move || bus.connect())
                .await
                .map_err(|e| startup_error(supervisor.name(), e))
        }));

        try_join_all(attempts).await?;
        Ok(())
    }

    fn spawn_bus_monitor(&self) -> JoinHandle<()> {
        let probe = Arc::clone(&self.inner.bus);
        let bus = Arc::clone(&self.inner.bus);
        self.inner.bus_supervisor.spawn_monitor(
            self.inner.cancel.child_token(),
            move || probe.is_connected(),
            move || {
                let bus = Arc::clone(&bus);
                async move { bus.connect().await }
            },
        )
    }

    // ── Publication ──────────────────────────────────────────────────

    /// Publish discovery configs, then the initial state of entities the
    /// bus holds no state for.
    pub async fn publish_discovery(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let messages =
            discovery::discovery_messages(&inner.topics, &inner.config.adapter, &inner.config.devices)
                .map_err(|e| CoreError::Bus {
                    message: format!("cannot encode discovery payload: {e}"),
                })?;
        for message in &messages {
            inner.bus.publish(&message.topic, &message.payload, true).await?;
        }
        info!(entities = messages.len(), "published discovery");

        for device in &inner.config.devices {
            for entity in &device.entities {
                if let Some(value) = discovery::initial_state(entity) {
                    inner.reconciler.initialize(&device.key(entity), value).await?;
                }
            }
        }
        Ok(())
    }

    /// Publish `gateway`'s seen nodes and the aggregate over all gateways.
    pub async fn publish_seen_nodes(&self, gateway: &Gateway) {
        let inner = &self.inner;
        let own = format_node_list(&gateway.seen_nodes());
        let all = format_node_list(&aggregate_seen_nodes(
            inner.links.iter().map(|link| link.gateway.as_ref()),
        ));

        let topic = inner.topics.gateway_seen_nodes(gateway.name());
        if let Err(e) = inner.bus.publish(&topic, &own, true).await {
            warn!(gateway = %gateway.name(), error = %e, "failed to publish seen nodes");
        }
        if let Err(e) = inner.bus.publish(&inner.topics.seen_nodes(), &all, true).await {
            warn!(error = %e, "failed to publish aggregate seen nodes");
        }
    }

    // ── Message handling ─────────────────────────────────────────────

    /// Handle one message received from `gateway`.
    pub async fn handle_device_message(&self, gateway: &Gateway, message: &Message) {
        let inner = &self.inner;
        debug!(gateway = %gateway.name(), %message, "device RX");

        match gateway.handle_message(message).await {
            Ok(handled) => {
                if !handled.discovered.is_empty() {
                    self.publish_seen_nodes(gateway).await;
                }
            }
            Err(e @ CoreError::NoAvailableIds { .. }) => warn!(error = %e, "node id request left unanswered"),
            Err(e) => error!(gateway = %gateway.name(), error = %e, "failed to answer internal request"),
        }

        for binding in inner.router.dispatch(gateway.name(), message).updated() {
            if let Err(e) = inner.reconciler.apply_device_state(binding, &message.payload).await {
                warn!(entity = %binding.key, error = %e, "failed to publish device state");
            }
        }

        if let Some(binding) = inner.router.requested(gateway.name(), message) {
            if let Err(e) = inner.reconciler.answer_request(binding).await {
                error!(entity = %binding.key, error = %e, "failed to answer device request");
            }
        }
    }

    /// Handle one message received from the bus.
    pub async fn handle_bus_message(&self, message: &BusMessage) {
        let inner = &self.inner;
        let Some((key, channel)) = inner.topics.parse(&message.topic) else {
            debug!(topic = %message.topic, "ignoring unrelated bus message");
            return;
        };

        match channel {
            Channel::Set => match inner.reconciler.handle_command(&key, &message.payload).await {
                Ok(sent) => debug!(entity = %key, message = %sent, "command forwarded"),
                Err(
                    e @ (CoreError::UnknownEntity { .. }
                    | CoreError::ReadOnlyEntity { .. }
                    | CoreError::InvalidPayload { .. }),
                ) => warn!(entity = %key, error = %e, "command rejected"),
                Err(e) => error!(entity = %key, error = %e, "failed to send command"),
            },
            // Live state messages are our own publications coming back.
            Channel::State if message.retained => {
                inner.reconciler.seed(&key, &message.payload);
            }
            Channel::State => {}
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn device_pump(
    bridge: Bridge,
    gateway: Arc<Gateway>,
    passthrough: Option<Arc<Passthrough>>,
    mut inbound: ReceiverStream<Message>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = inbound.next() => {
                let Some(message) = next else { break };
                if let Some(passthrough) = &passthrough {
                    passthrough.broadcast(&message);
                }
                bridge.handle_device_message(&gateway, &message).await;
            }
        }
    }
    debug!(gateway = %gateway.name(), "device pump exiting");
}

async fn bus_pump(bridge: Bridge, mut inbound: ReceiverStream<BusMessage>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = inbound.next() => {
                let Some(message) = next else { break };
                bridge.handle_bus_message(&message).await;
            }
        }
    }
    debug!("bus pump exiting");
}

fn spawn_link_monitor(link: &Link, cancel: CancellationToken) -> JoinHandle<()> {
    let probe = Arc::clone(link.gateway.transport());
    let transport = Arc::clone(link.gateway.transport());
    link.supervisor.spawn_monitor(
        cancel,
        move || probe.is_connected(),
        move || {
            let transport = Arc::clone(&transport);
            async move { transport.connect().await }
        },
    )
}

// ── Helpers ──────────────────────────────────────────────────────────

fn build_transport(link: &LinkConfig) -> Arc<dyn Transport> {
    match link {
        LinkConfig::Ethernet { host, port } => Arc::new(EthernetTransport::new(host, *port)),
        LinkConfig::Serial { device, baud_rate } => {
            Arc::new(SerialTransport::new(device, *baud_rate))
        }
    }
}

fn startup_error<E: std::fmt::Display>(connection: &str, error: RetryError<E>) -> CoreError {
    match error {
        RetryError::Cancelled => CoreError::Cancelled,
        RetryError::Exhausted { .. } => CoreError::Startup {
            connection: connection.to_owned(),
            reason: error.to_string(),
        },
    }
}
