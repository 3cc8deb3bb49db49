use crate::core::error::{FlowError, Result};
use crate::core::lifecycle::CloseReason;
use crate::core::unit::Unit;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// Resolves a unit id to a live unit.
///
/// This is the only thing the dispatcher needs from whatever owns the graph.
pub trait FlowDirectory: Send + Sync {
    fn get(&self, id: &str) -> Option<Arc<Unit>>;
}

impl FlowDirectory for HashMap<String, Arc<Unit>> {
    fn get(&self, id: &str) -> Option<Arc<Unit>> {
        HashMap::get(self, id).cloned()
    }
}

/// An in-memory directory of live units that can also drive their shutdown.
#[derive(Debug, Default)]
pub struct UnitRegistry {
    units: RwLock<HashMap<String, Arc<Unit>>>,
}

impl UnitRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a unit, refusing ids that are already taken.
    pub fn register(&self, unit: impl Into<Arc<Unit>>) -> Result<Arc<Unit>> {
        let unit = unit.into();
        let mut units = self.units.write().unwrap_or_else(PoisonError::into_inner);
        if units.contains_key(unit.id()) {
            return Err(FlowError::DuplicateUnit(unit.id().to_string()));
        }
        units.insert(unit.id().to_string(), unit.clone());
        Ok(unit)
    }

    /// Takes a unit out of the registry without closing it.
    pub fn remove(&self, id: &str) -> Option<Arc<Unit>> {
        self.units
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// True when `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Number of registered units.
    pub fn len(&self) -> usize {
        self.units.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when no unit is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn snapshot(&self) -> Vec<Arc<Unit>> {
        let mut units: Vec<Arc<Unit>> = self
            .units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        units.sort_by(|a, b| a.id().cmp(b.id()));
        units
    }

    /// Closes every registered unit and waits for all asynchronous handlers.
    ///
    /// Units are closed in id order; their pending closes are awaited
    /// concurrently.
    pub async fn close_all(&self, reason: CloseReason) {
        let closings: Vec<_> = self
            .snapshot()
            .iter()
            .filter_map(|unit| unit.close(reason))
            .collect();
        futures::future::join_all(closings).await;
    }

    /// Like [`close_all`](Self::close_all), but gives up after `timeout` and
    /// reports which units were still closing.
    pub async fn close_all_within(&self, reason: CloseReason, timeout: Duration) -> Result<()> {
        let pending = Arc::new(Mutex::new(BTreeSet::new()));
        let mut closings = Vec::new();

        for unit in self.snapshot() {
            if let Some(closing) = unit.close(reason) {
                let id = unit.id().to_string();
                pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id.clone());
                let pending = pending.clone();
                closings.push(async move {
                    closing.await;
                    pending
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&id);
                });
            }
        }

        match tokio::time::timeout(timeout, futures::future::join_all(closings)).await {
            Ok(_) => Ok(()),
            Err(_) => {
                let stuck: Vec<String> = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .cloned()
                    .collect();
                log::error!("Units still closing after {:?}: {:?}", timeout, stuck);
                Err(FlowError::CloseTimeout(stuck))
            }
        }
    }
}

impl FlowDirectory for UnitRegistry {
    fn get(&self, id: &str) -> Option<Arc<Unit>> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}
