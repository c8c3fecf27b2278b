// ── State reconciliation ──
//
// Keeps bus-visible entity state consistent with device state. The
// entity-state map holds the last known value per entity, from device
// reports, optimistic commands, and retained bus state. It is shared by
// the command handler, the device pump, and the periodic sync loop under
// one reader/writer lock.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use mysbridge_proto::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::MessageBus;
use crate::error::CoreError;
use crate::model::EntityKey;
use crate::router::{EntityBinding, Router};
use crate::topics::Topics;

/// When a bus command becomes visible as entity state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Consistency {
    /// Publish the commanded value immediately.
    Optimistic,
    /// Publish only what the device reports back.
    #[default]
    Confirmed,
}

impl Consistency {
    pub fn from_optimistic(optimistic: bool) -> Self {
        if optimistic {
            Self::Optimistic
        } else {
            Self::Confirmed
        }
    }
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub sent: usize,
    pub failed: usize,
}

pub struct StateReconciler {
    router: Arc<Router>,
    bus: Arc<dyn MessageBus>,
    topics: Topics,
    states: RwLock<HashMap<EntityKey, String>>,
}

impl StateReconciler {
    pub fn new(router: Arc<Router>, bus: Arc<dyn MessageBus>, topics: Topics) -> Self {
        Self {
            router,
            bus,
            topics,
            states: RwLock::new(HashMap::new()),
        }
    }

    // ── State map ────────────────────────────────────────────────────

    pub fn get(&self, key: &EntityKey) -> Option<String> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn snapshot(&self) -> HashMap<EntityKey, String> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, key: &EntityKey, value: &str) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), value.to_owned());
    }

    /// Take a retained state from the bus as the entity's last known value.
    ///
    /// Empty payloads (cleared retained messages), unknown entities and
    /// payloads the entity would not accept are ignored. Returns whether
    /// the value was stored.
    pub fn seed(&self, key: &EntityKey, payload: &str) -> bool {
        if payload.is_empty() {
            return false;
        }
        let Some(binding) = self.router.binding(key) else {
            return false;
        };
        if !binding.kind.accepts_payload(payload) {
            warn!(entity = %key, payload, "ignoring invalid retained state");
            return false;
        }
        self.store(key, payload);
        debug!(entity = %key, payload, "seeded state from retained message");
        true
    }

    /// Publish `value` as the entity's starting state unless a state is
    /// already known. Returns whether it was published.
    pub async fn initialize(&self, key: &EntityKey, value: &str) -> Result<bool, CoreError> {
        {
            let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
            if states.contains_key(key) {
                debug!(entity = %key, "keeping retained state");
                return Ok(false);
            }
            states.insert(key.clone(), value.to_owned());
        }
        self.publish_state(key, value).await?;
        debug!(entity = %key, value, "published initial state");
        Ok(true)
    }

    // ── Bus → device ─────────────────────────────────────────────────

    /// Apply a bus command to a write-capable entity.
    ///
    /// Optimistic entities publish the value as state before the device
    /// command goes out; confirmed entities wait for the device to echo it.
    pub async fn handle_command(&self, key: &EntityKey, payload: &str) -> Result<Message, CoreError> {
        let binding = self
            .router
            .binding(key)
            .ok_or_else(|| CoreError::UnknownEntity {
                device: key.device.clone(),
                entity: key.entity.clone(),
            })?;

        if !binding.writable {
            return Err(CoreError::ReadOnlyEntity {
                device: key.device.clone(),
                entity: key.entity.clone(),
            });
        }

        if !binding.kind.accepts_payload(payload) {
            return Err(CoreError::InvalidPayload {
                device: key.device.clone(),
                entity: key.entity.clone(),
                kind: binding.kind.to_string(),
                payload: payload.to_owned(),
            });
        }

        match binding.consistency {
            Consistency::Optimistic => {
                self.store(key, payload);
                if let Err(e) = self.publish_state(key, payload).await {
                    warn!(entity = %key, error = %e, "optimistic state publish failed");
                }
            }
            Consistency::Confirmed => {
                debug!(entity = %key, payload, "waiting for device confirmation");
            }
        }

        self.router.send_command(key, payload).await
    }

    // ── Device → bus ─────────────────────────────────────────────────

    /// Record a device-reported value and publish it as entity state.
    pub async fn apply_device_state(&self, binding: &EntityBinding, value: &str) -> Result<(), CoreError> {
        self.store(&binding.key, value);
        self.publish_state(&binding.key, value).await?;
        debug!(entity = %binding.key, value, "device state published");
        Ok(())
    }

    /// Answer a device REQ with the last known value, if there is one.
    pub async fn answer_request(&self, binding: &EntityBinding) -> Result<Option<Message>, CoreError> {
        let Some(value) = self.get(&binding.key) else {
            debug!(entity = %binding.key, "no known state to answer request");
            return Ok(None);
        };
        let reply = Message::set(binding.node_id, binding.child_id, binding.variable, value);
        self.router.send_to_gateway(&binding.gateway, &reply).await?;
        debug!(entity = %binding.key, message = %reply, "answered device request");
        Ok(Some(reply))
    }

    pub async fn publish_state(&self, key: &EntityKey, value: &str) -> Result<(), CoreError> {
        self.bus.publish(&self.topics.state(key), value, true).await
    }

    // ── Periodic sync ────────────────────────────────────────────────

    /// Re-send the last known value of every write-capable entity.
    pub async fn sync_pass(&self) -> SyncReport {
        let pending: Vec<(EntityKey, String)> = {
            let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
            self.router
                .bindings()
                .iter()
                .filter(|b| b.writable)
                .filter_map(|b| states.get(&b.key).map(|v| (b.key.clone(), v.clone())))
                .collect()
        };

        let mut report = SyncReport::default();
        for (key, value) in pending {
            match self.router.send_command(&key, &value).await {
                Ok(_) => report.sent += 1,
                Err(e) => {
                    report.failed += 1;
                    debug!(entity = %key, error = %e, "sync send failed");
                }
            }
        }

        if report.sent + report.failed > 0 {
            info!(sent = report.sent, failed = report.failed, "state sync pass complete");
        }
        report
    }

    /// Run a sync pass now, then every `period` until cancelled.
    pub async fn run_sync(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.sync_pass().await;
                }
            }
        }
    }
}
