//! The thread-local interpreter stack.
//!
//! A stack of `MainTrace` records with the eager trace fixed at level 0. An
//! optional dynamic level redirects staging (used by `jit`). Pushes are
//! scoped: the returned guard pops on drop and verifies LIFO order; a
//! mismatched pop poisons the stack, and a poisoned stack refuses all
//! further binds.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use jaxel_core::CoreError;

use crate::staging::JaxprBuilder;

#[derive(Debug, Clone)]
pub(crate) enum TraceKind {
    Eval,
    Jvp,
    Jaxpr(Rc<RefCell<JaxprBuilder>>),
    Batch { axis_size: usize },
}

#[derive(Debug, Clone)]
pub(crate) struct MainTrace {
    pub id: u64,
    pub level: usize,
    pub kind: TraceKind,
}

thread_local! {
    static STACK: RefCell<Vec<MainTrace>> = RefCell::new(vec![MainTrace {
        id: 0,
        level: 0,
        kind: TraceKind::Eval,
    }]);
    static DYNAMIC: Cell<Option<usize>> = const { Cell::new(None) };
    static POISONED: Cell<bool> = const { Cell::new(false) };
    static NEXT_ID: Cell<u64> = const { Cell::new(1) };
}

/// Scoped trace registration. Dropping pops the trace; dropping out of LIFO
/// order poisons the stack.
#[derive(Debug)]
pub struct TraceGuard {
    id: u64,
    level: usize,
}

impl TraceGuard {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn level(&self) -> usize {
        self.level
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.pop() {
                Some(top) if top.id == self.id => {}
                _ => POISONED.set(true),
            }
        });
    }
}

fn push_trace(kind: TraceKind) -> TraceGuard {
    let id = NEXT_ID.get();
    NEXT_ID.set(id + 1);
    let level = STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let level = stack.len();
        stack.push(MainTrace { id, level, kind });
        level
    });
    TraceGuard { id, level }
}

/// Push a forward-mode (jvp) trace.
#[must_use]
pub fn push_jvp_trace() -> TraceGuard {
    push_trace(TraceKind::Jvp)
}

/// Push a batching trace carrying the mapped axis size.
#[must_use]
pub fn push_batch_trace(axis_size: usize) -> TraceGuard {
    push_trace(TraceKind::Batch { axis_size })
}

pub(crate) fn push_jaxpr_trace(builder: Rc<RefCell<JaxprBuilder>>) -> TraceGuard {
    push_trace(TraceKind::Jaxpr(builder))
}

/// Scoped dynamic-trace override; restores the previous value on drop.
#[derive(Debug)]
pub struct DynamicGuard {
    previous: Option<usize>,
}

impl Drop for DynamicGuard {
    fn drop(&mut self) {
        DYNAMIC.set(self.previous);
    }
}

#[must_use]
pub(crate) fn set_dynamic(level: usize) -> DynamicGuard {
    let previous = DYNAMIC.get();
    DYNAMIC.set(Some(level));
    DynamicGuard { previous }
}

pub(crate) fn dynamic_level() -> Option<usize> {
    DYNAMIC.get()
}

/// Whether a dynamic (staging) trace is currently in force.
#[must_use]
pub fn in_staging_context() -> bool {
    DYNAMIC.get().is_some()
}

/// Refuse further work once the stack discipline has been violated.
pub(crate) fn check_usable() -> Result<(), CoreError> {
    if POISONED.get() {
        return Err(CoreError::level(
            "interpreter stack poisoned by out-of-order trace pop",
        ));
    }
    Ok(())
}

/// Snapshot the trace at `level`. Fails when no such trace is live, which is
/// how an escaped tracer is caught before any backend dispatch.
pub(crate) fn snapshot_at(level: usize) -> Result<MainTrace, CoreError> {
    check_usable()?;
    STACK.with(|stack| {
        stack.borrow().get(level).cloned().ok_or_else(|| {
            CoreError::level(format!("no live trace at level {level}; tracer escaped its scope"))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::{push_batch_trace, push_jvp_trace, snapshot_at};
    use jaxel_core::CoreError;

    #[test]
    fn guards_restore_the_stack_in_lifo_order() {
        let outer = push_jvp_trace();
        assert_eq!(outer.level(), 1);
        {
            let inner = push_batch_trace(3);
            assert_eq!(inner.level(), 2);
            snapshot_at(2).expect("inner trace is live");
        }
        snapshot_at(1).expect("outer trace is live");
        let err = snapshot_at(2).expect_err("inner trace was popped");
        assert!(matches!(err, CoreError::LevelViolation { .. }));
        drop(outer);
    }

    #[test]
    fn eager_trace_is_always_at_level_zero() {
        snapshot_at(0).expect("eager trace always live");
    }
}
