//! # scope
//! Per-thread annotation bookkeeping. Every public runtime entry point
//! opens a [`ScopedAnnotation`] guard that pushes the API name and origin
//! pc onto a thread-local stack and pops it on drop; the diagnostic
//! reporter snapshots this stack into each violation record so a report
//! names the instrumented call it was raised from even when native
//! backtraces are unhelpful.
use core::cell::RefCell;

use crate::Addr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFrame {
    pub api: &'static str,
    pub pc: Addr,
}

thread_local! {
    static ANNOTATIONS: RefCell<Vec<ScopeFrame>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard for one entry-point invocation. Not `Send`: frames belong to
/// the thread that opened them.
#[derive(Debug)]
pub struct ScopedAnnotation {
    _not_send: core::marker::PhantomData<*const ()>,
}

impl ScopedAnnotation {
    pub fn enter(api: &'static str, pc: Addr) -> Self {
        ANNOTATIONS.with(|stack| stack.borrow_mut().push(ScopeFrame { api, pc }));
        ScopedAnnotation {
            _not_send: core::marker::PhantomData,
        }
    }
}

impl Drop for ScopedAnnotation {
    fn drop(&mut self) {
        ANNOTATIONS.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Snapshot of the calling thread's annotation stack, outermost first.
pub fn current_stack() -> Vec<ScopeFrame> {
    ANNOTATIONS.with(|stack| stack.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::{ScopedAnnotation, current_stack};

    #[test]
    fn test_guard_pushes_and_pops() {
        assert!(current_stack().is_empty());
        {
            let _outer = ScopedAnnotation::enter("notify_mapping", 0x1000);
            let _inner = ScopedAnnotation::enter("check_access", 0x2000);
            let stack = current_stack();
            assert_eq!(stack.len(), 2);
            assert_eq!(stack[0].api, "notify_mapping");
            assert_eq!(stack[1].pc, 0x2000);
        }
        assert!(current_stack().is_empty());
    }
}
