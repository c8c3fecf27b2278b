// ── Gateway ──
//
// One physical sensor network: its transport, the registry of node ids
// observed on it, and the internal-protocol responder (id assignment, time
// sync, version heartbeat). Each gateway owns its own registry lock; no
// lock is ever shared between gateways.

use std::collections::{BTreeSet, HashSet};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mysbridge_proto::{BROADCAST_NODE_ID, InternalType, Message, Transport, UNASSIGNED_NODE_ID};
use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{GatewayConfig, IdAssignment};
use crate::error::CoreError;

/// The gateway itself answers on node 0; version requests go there.
const GATEWAY_NODE_ID: u8 = 0;

// ── NodeRegistry ─────────────────────────────────────────────────────

/// Node ids observed on one gateway, in discovery order.
///
/// Ids `0` and `255` are never entered. Once seen, an id stays seen for
/// the life of the process, unless it was allocated and then released
/// because the `ID_RESPONSE` never went out.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    seen: HashSet<u8>,
    order: Vec<u8>,
    range: RangeInclusive<u8>,
    assignment: IdAssignment,
}

impl NodeRegistry {
    pub fn new(range: RangeInclusive<u8>, assignment: IdAssignment) -> Self {
        Self {
            seen: HashSet::new(),
            order: Vec::new(),
            range,
            assignment,
        }
    }

    /// Mark `node_id` as seen. Returns `true` the first time a live id is
    /// observed.
    pub fn track(&mut self, node_id: u8) -> bool {
        if node_id == UNASSIGNED_NODE_ID || node_id == BROADCAST_NODE_ID {
            return false;
        }
        if self.seen.insert(node_id) {
            self.order.push(node_id);
            true
        } else {
            false
        }
    }

    pub fn is_seen(&self, node_id: u8) -> bool {
        self.seen.contains(&node_id)
    }

    /// Ids in the assignable range that have not been seen, ascending.
    pub fn free_ids(&self) -> Vec<u8> {
        self.range
            .clone()
            .filter(|id| *id != UNASSIGNED_NODE_ID && *id != BROADCAST_NODE_ID)
            .filter(|id| !self.seen.contains(id))
            .collect()
    }

    /// Pick a free id according to the policy and mark it seen.
    pub fn allocate(&mut self) -> Option<u8> {
        let free = self.free_ids();
        let id = match self.assignment {
            IdAssignment::Sequential => free.first().copied(),
            IdAssignment::Random => free.choose(&mut rand::thread_rng()).copied(),
        }?;
        self.track(id);
        Some(id)
    }

    /// Undo an allocation whose response could not be delivered.
    pub fn release(&mut self, node_id: u8) {
        if self.seen.remove(&node_id) {
            self.order.retain(|id| *id != node_id);
        }
    }

    /// Seen ids in discovery order.
    pub fn seen_nodes(&self) -> Vec<u8> {
        self.order.clone()
    }

    pub fn range(&self) -> &RangeInclusive<u8> {
        &self.range
    }
}

// ── Gateway ──────────────────────────────────────────────────────────

/// What [`Gateway::handle_message`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handled {
    /// Ids that became seen while handling the message.
    pub discovered: Vec<u8>,
    /// Id handed out in reply to an `ID_REQUEST`.
    pub assigned: Option<u8>,
}

pub struct Gateway {
    name: String,
    transport: Arc<dyn Transport>,
    registry: Mutex<NodeRegistry>,
    version_request_period: Duration,
}

impl Gateway {
    pub fn new(config: &GatewayConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: config.name.clone(),
            transport,
            registry: Mutex::new(NodeRegistry::new(config.node_ids.clone(), config.assignment)),
            version_request_period: config.version_request_period,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, NodeRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record traffic from `node_id`. Returns `true` on first discovery.
    pub fn track_node(&self, node_id: u8) -> bool {
        let discovered = self.registry().track(node_id);
        if discovered {
            info!(gateway = %self.name, node_id, "discovered node");
        }
        discovered
    }

    /// Snapshot of seen ids in discovery order.
    pub fn seen_nodes(&self) -> Vec<u8> {
        self.registry().seen_nodes()
    }

    /// Allocate a node id and mark it seen in one critical section.
    pub fn assign_node_id(&self) -> Result<u8, CoreError> {
        let mut registry = self.registry();
        registry.allocate().ok_or_else(|| CoreError::NoAvailableIds {
            gateway: self.name.clone(),
            start: *registry.range().start(),
            end: *registry.range().end(),
        })
    }

    /// Track the sender and answer internal protocol requests.
    ///
    /// Non-internal messages only update the registry. An `ID_REQUEST` with
    /// no free id fails with [`CoreError::NoAvailableIds`] and nothing is
    /// sent; the node will ask again.
    pub async fn handle_message(&self, message: &Message) -> Result<Handled, CoreError> {
        let mut handled = Handled::default();
        if self.track_node(message.node_id) {
            handled.discovered.push(message.node_id);
        }

        if !message.is_internal() {
            return Ok(handled);
        }

        match message.internal_type() {
            Some(InternalType::IdRequest) => {
                let id = self.assign_node_id()?;
                let response =
                    Message::internal(message.node_id, InternalType::IdResponse, id.to_string());
                info!(gateway = %self.name, requester = message.node_id, node_id = id, "assigning node id");
                if let Err(e) = self.transport.send(&response).await {
                    // The node never learned the id; it may be handed out again.
                    self.registry().release(id);
                    return Err(e.into());
                }
                handled.discovered.push(id);
                handled.assigned = Some(id);
            }
            Some(InternalType::Time) => {
                let now = chrono::Utc::now().timestamp();
                let response = Message::internal(message.node_id, InternalType::Time, now.to_string());
                debug!(gateway = %self.name, node_id = message.node_id, now, "answering time request");
                self.transport.send(&response).await?;
            }
            _ => {}
        }

        Ok(handled)
    }

    /// Ask the gateway for its version. Doubles as a link heartbeat.
    pub async fn send_version_request(&self) -> Result<(), CoreError> {
        let request = Message::internal(GATEWAY_NODE_ID, InternalType::Version, "");
        self.transport.send(&request).await?;
        debug!(gateway = %self.name, "sent version request");
        Ok(())
    }

    /// Periodic version requests until `cancel` fires. The startup request
    /// is sent by the caller; the first tick here comes one period later.
    pub async fn heartbeat(self: Arc<Self>, cancel: CancellationToken) {
        if self.version_request_period.is_zero() {
            return;
        }
        let mut interval = tokio::time::interval(self.version_request_period);
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.send_version_request().await {
                        warn!(gateway = %self.name, error = %e, "version request failed");
                    }
                }
            }
        }
    }
}

// ── Seen-node helpers ────────────────────────────────────────────────

/// Union of the seen ids of every gateway, ascending, without duplicates.
pub fn aggregate_seen_nodes<'a>(gateways: impl IntoIterator<Item = &'a Gateway>) -> Vec<u8> {
    gateways
        .into_iter()
        .flat_map(Gateway::seen_nodes)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Sorted, comma-joined rendering used for seen-node publication.
pub fn format_node_list(ids: &[u8]) -> String {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
