//! Single-family residency of models in accelerator memory.
//!
//! At most one [`ModelFamily`] is resident at a time. Requesting a model of a
//! different family evicts everything first. Two scopes govern access:
//!
//! * `state`, a short critical section covering the eviction check, the
//!   eviction itself and the load, held for the whole of [`ResidencyManager::ensure`];
//! * `gate`, a read/write lock where every [`Lease`] holds a read guard while a
//!   model runs. Eviction takes the write side, so it waits for in-flight
//!   inference on the outgoing family to finish.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock as GateLock};
use tracing::{info, warn};

use crate::{
    error::ServiceError,
    model::{Accelerator, Catalog, Handle, ModelFamily},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_bytes: u64,
    pub allocated_bytes: u64,
    pub reserved_bytes: u64,
}

/// Point-in-time view of residency, readable without waiting on a load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidencySnapshot {
    pub current_family: Option<ModelFamily>,
    pub loaded: Vec<String>,
    pub allocated_bytes: u64,
    pub reserved_bytes: u64,
}

#[derive(Default)]
struct ResidencyState {
    current_family: Option<ModelFamily>,
    handles: HashMap<String, Handle>,
    /// High-water mark of resident bytes since the last reclaim.
    reserved_bytes: u64,
}

impl ResidencyState {
    fn allocated_bytes(&self) -> u64 {
        self.handles.values().map(Handle::footprint_bytes).sum()
    }

    fn snapshot(&self) -> ResidencySnapshot {
        let mut loaded: Vec<String> = self.handles.keys().cloned().collect();
        loaded.sort_unstable();
        ResidencySnapshot {
            current_family: self.current_family,
            loaded,
            allocated_bytes: self.allocated_bytes(),
            reserved_bytes: self.reserved_bytes,
        }
    }

    fn needs_eviction(&self, model_id: &str, family: ModelFamily) -> bool {
        match self.current_family {
            None => false,
            Some(current) if current != family => true,
            // unrelated "other" models never share residency
            Some(ModelFamily::Other) => !self.handles.contains_key(model_id),
            Some(_) => false,
        }
    }
}

/// A borrowed resident model. Eviction of its family waits until every lease
/// is dropped.
pub struct Lease {
    model_id: String,
    family: ModelFamily,
    handle: Handle,
    _gate: OwnedRwLockReadGuard<()>,
}

impl Lease {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("model_id", &self.model_id)
            .field("family", &self.family)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Deref for Lease {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.handle
    }
}

pub struct ResidencyManager {
    catalog: Arc<Catalog>,
    accelerator: Arc<dyn Accelerator>,
    state: Mutex<ResidencyState>,
    gate: Arc<GateLock<()>>,
    snapshot: RwLock<ResidencySnapshot>,
}

impl ResidencyManager {
    pub fn new(catalog: Arc<Catalog>, accelerator: Arc<dyn Accelerator>) -> Self {
        Self {
            catalog,
            accelerator,
            state: Mutex::new(ResidencyState::default()),
            gate: Arc::new(GateLock::new(())),
            snapshot: RwLock::new(ResidencySnapshot::default()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn accelerator(&self) -> &dyn Accelerator {
        self.accelerator.as_ref()
    }

    /// Make `model_id` resident and lease it to the caller.
    ///
    /// Switching family evicts every resident handle before loading. A loader
    /// failure leaves nothing recorded for `model_id`.
    pub async fn ensure(&self, model_id: &str) -> Result<Lease, ServiceError> {
        let descriptor = self
            .catalog
            .get(model_id)
            .ok_or_else(|| ServiceError::UnknownModel(model_id.to_string()))?;
        let family = descriptor.family;

        let mut state = self.state.lock().await;

        if state.needs_eviction(model_id, family) {
            info!(
                from = ?state.current_family,
                to = %family,
                model_id,
                "switching model family"
            );
            self.evict(&mut state).await;
        }

        let handle = match state.handles.get(model_id) {
            Some(handle) => handle.clone(),
            None => {
                let started = Instant::now();
                let loader = descriptor.loader.clone();
                let desc = descriptor.clone();
                let loaded = tokio::task::spawn_blocking(move || loader.load(&desc))
                    .await
                    .map_err(|err| ServiceError::load(model_id, format!("loader task failed: {err}")))
                    .and_then(|res| res);

                let handle = match loaded {
                    Ok(handle) => handle,
                    Err(err) => {
                        warn!(model_id, %family, error = %err, "model load failed");
                        self.publish(&state);
                        return Err(match err {
                            err @ ServiceError::ModelLoad { .. } => err,
                            other => ServiceError::load(model_id, other),
                        });
                    }
                };

                state.handles.insert(model_id.to_string(), handle.clone());
                state.current_family = Some(family);
                state.reserved_bytes = state.reserved_bytes.max(state.allocated_bytes());
                info!(
                    model_id,
                    %family,
                    footprint_bytes = handle.footprint_bytes(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "model loaded"
                );
                handle
            }
        };

        self.publish(&state);
        let gate = self.gate.clone().read_owned().await;
        drop(state);

        Ok(Lease {
            model_id: model_id.to_string(),
            family,
            handle,
            _gate: gate,
        })
    }

    /// Free every resident handle. Returns the ids that were evicted.
    pub async fn release(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        let evicted = self.evict(&mut state).await;
        self.publish(&state);
        evicted
    }

    pub fn usage(&self) -> MemoryStats {
        if !self.accelerator.is_available() {
            return MemoryStats::default();
        }
        let snapshot = self.snapshot.read();
        MemoryStats {
            total_bytes: self.accelerator.total_bytes(),
            allocated_bytes: snapshot.allocated_bytes,
            reserved_bytes: snapshot.reserved_bytes,
        }
    }

    pub fn snapshot(&self) -> ResidencySnapshot {
        self.snapshot.read().clone()
    }

    async fn evict(&self, state: &mut ResidencyState) -> Vec<String> {
        if state.handles.is_empty() && state.current_family.is_none() {
            return Vec::new();
        }

        // wait for leases on the outgoing family to drain
        let _exclusive = self.gate.write().await;

        let mut evicted = Vec::with_capacity(state.handles.len());
        for (model_id, handle) in state.handles.drain() {
            handle.teardown();
            evicted.push(model_id);
        }
        evicted.sort_unstable();

        let family = state.current_family.take();
        state.reserved_bytes = 0;
        self.accelerator.reclaim();
        // a cancelled ensure may never reach its own publish
        self.publish(state);
        info!(family = ?family, evicted = ?evicted, "resident models released");
        evicted
    }

    fn publish(&self, state: &ResidencyState) {
        debug_assert!(
            state
                .handles
                .keys()
                .filter_map(|id| self.catalog.get(id))
                .all(|d| Some(d.family) == state.current_family)
        );
        *self.snapshot.write() = state.snapshot();
    }
}
