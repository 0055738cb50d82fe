//! Engine Registry
//!
//! Holds the constructed engine instances keyed by identifier and the
//! process-wide engine selection. Resolution never falls back silently to a
//! different engine than the one selected: engines produce different output
//! characteristics, so substitution is a policy decision for the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::{Engine, EngineId};
use crate::core::jobs::JobKind;
use crate::core::{CoreError, CoreResult};

/// Registry of conversion engines plus the active selection.
pub struct EngineRegistry {
    engines: HashMap<EngineId, Arc<dyn Engine>>,
    selected: RwLock<EngineId>,
    /// Set while a batch is running; selection changes are rejected.
    selection_locked: AtomicBool,
}

impl EngineRegistry {
    /// Creates an empty registry with `selected` as the active engine.
    pub fn new(selected: EngineId) -> Self {
        Self {
            engines: HashMap::new(),
            selected: RwLock::new(selected),
            selection_locked: AtomicBool::new(false),
        }
    }

    /// Registers an engine under its own id.
    pub fn register(&mut self, engine: Arc<dyn Engine>) {
        self.engines.insert(engine.id(), engine);
    }

    /// The currently selected engine id
    pub fn selected(&self) -> EngineId {
        *self.selected.read().unwrap()
    }

    /// Changes the active engine.
    ///
    /// Rejected with [`CoreError::SelectionLocked`] while a batch is running
    /// and with [`CoreError::UnknownEngine`] for an unregistered id.
    pub fn set_selected(&self, id: EngineId) -> CoreResult<()> {
        if self.selection_locked.load(Ordering::Acquire) {
            return Err(CoreError::SelectionLocked);
        }
        if !self.engines.contains_key(&id) {
            return Err(CoreError::UnknownEngine(id.to_string()));
        }
        *self.selected.write().unwrap() = id;
        Ok(())
    }

    /// Resolves the selected engine for a job kind.
    ///
    /// Fails with [`CoreError::NoCapableBackend`] when the selected engine
    /// cannot perform `kind`; whether to offer a different engine is the
    /// caller's policy.
    ///
    /// # Panics
    ///
    /// Panics if the selected id has no registered engine; that is a
    /// programming-contract violation, not a runtime condition.
    pub fn resolve(&self, kind: JobKind) -> CoreResult<Arc<dyn Engine>> {
        let selected = self.selected();
        let engine = self
            .engines
            .get(&selected)
            .unwrap_or_else(|| panic!("selected engine {selected} is not registered"));
        if !engine.supports(kind) {
            return Err(CoreError::NoCapableBackend {
                engine: selected,
                kind,
            });
        }
        Ok(Arc::clone(engine))
    }

    /// Marks the selection read-only for the duration of a batch run.
    pub(crate) fn lock_selection(&self) {
        self.selection_locked.store(true, Ordering::Release);
    }

    /// Re-enables selection changes once the executor is idle.
    pub(crate) fn unlock_selection(&self) {
        self.selection_locked.store(false, Ordering::Release);
    }
}
