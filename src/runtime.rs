//! Host runtime services the FFI layer depends on
//!
//! - Reference table: keeps script callables alive while native code holds
//!   trampolines to them
//! - Stack headroom: re-entrant callbacks reserve slots before running
//! - Raise channel: errors from callbacks that cannot unwind into native frames

use crate::config::FfiConfig;
use crate::error::{FfiError, FfiResult};
use crate::logging::log_callback_fault;
use crate::value::{ScriptFn, Value};
use dashmap::DashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Handle into the runtime's reference table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefId(u32);

struct RuntimeState {
    config: FfiConfig,
    references: DashMap<RefId, ScriptFn>,
    next_ref: Cell<u32>,
    used_slots: Cell<usize>,
    depth: Cell<usize>,
    pending: RefCell<Vec<FfiError>>,
}

/// Script runtime handle; clones share state
#[derive(Clone)]
pub struct Runtime {
    state: Rc<RuntimeState>,
}

impl Runtime {
    pub fn new(config: FfiConfig) -> Self {
        Self {
            state: Rc::new(RuntimeState {
                config,
                references: DashMap::with_capacity(16),
                next_ref: Cell::new(1),
                used_slots: Cell::new(0),
                depth: Cell::new(0),
                pending: RefCell::new(Vec::new()),
            }),
        }
    }

    #[inline]
    pub fn config(&self) -> &FfiConfig {
        &self.state.config
    }

    /// Pin a callable; it stays alive until [`unregister`](Self::unregister)
    pub fn register(&self, function: ScriptFn) -> RefId {
        let id = RefId(self.state.next_ref.get());
        self.state.next_ref.set(id.0.wrapping_add(1));
        self.state.references.insert(id, function);
        id
    }

    /// Release a pinned callable; false if `id` was not registered
    pub fn unregister(&self, id: RefId) -> bool {
        self.state.references.remove(&id).is_some()
    }

    pub fn resolve(&self, id: RefId) -> Option<ScriptFn> {
        self.state.references.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of callables currently pinned
    pub fn reference_count(&self) -> usize {
        self.state.references.len()
    }

    /// Reserve `slots` of runtime stack for the lifetime of the guard
    pub fn reserve_stack(&self, slots: usize) -> FfiResult<StackReservation> {
        let used = self.state.used_slots.get();
        let available = self.state.config.callback.stack_limit.saturating_sub(used);
        if slots > available {
            return Err(FfiError::StackOverflow { needed: slots, available });
        }
        self.state.used_slots.set(used + slots);
        Ok(StackReservation {
            runtime: self.clone(),
            slots,
        })
    }

    /// Slots currently held by active reservations
    #[inline]
    pub fn stack_in_use(&self) -> usize {
        self.state.used_slots.get()
    }

    /// Invoke a script callable synchronously
    pub fn call(&self, function: &ScriptFn, args: &[Value]) -> FfiResult<Vec<Value>> {
        let depth = &self.state.depth;
        depth.set(depth.get() + 1);
        let result = function(args);
        depth.set(depth.get() - 1);
        result
    }

    /// Nesting depth of script calls made through [`call`](Self::call)
    #[inline]
    pub fn depth(&self) -> usize {
        self.state.depth.get()
    }

    /// Queue an error for the script side to observe once control returns to it
    pub fn raise(&self, error: FfiError) {
        log_callback_fault(false, &error);
        self.state.pending.borrow_mut().push(error);
    }

    pub fn has_pending_errors(&self) -> bool {
        !self.state.pending.borrow().is_empty()
    }

    /// Drain queued errors, oldest first
    pub fn take_pending_errors(&self) -> Vec<FfiError> {
        std::mem::take(&mut *self.state.pending.borrow_mut())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(FfiConfig::default())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("references", &self.state.references.len())
            .field("stack_in_use", &self.state.used_slots.get())
            .field("pending_errors", &self.state.pending.borrow().len())
            .finish()
    }
}

/// RAII guard returning reserved stack slots on drop
#[must_use]
pub struct StackReservation {
    runtime: Runtime,
    slots: usize,
}

impl StackReservation {
    #[inline]
    pub fn slots(&self) -> usize {
        self.slots
    }
}

impl Drop for StackReservation {
    fn drop(&mut self) {
        let used = &self.runtime.state.used_slots;
        used.set(used.get().saturating_sub(self.slots));
    }
}
