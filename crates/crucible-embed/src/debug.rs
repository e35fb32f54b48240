//! Process-wide manual trigger for reconciliation.
//!
//! Every loaded plugin registers its reprocess signal here for as long as it
//! lives. [`force_reconcile`] pokes all of them, which makes every attached
//! view run a pass after the settle delay.

use crate::context::ReconcileContext;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use tokio::sync::watch;
use tracing::{debug, info};

type Signal = Weak<watch::Sender<u64>>;

static HOOKS: LazyLock<Mutex<Vec<(u64, Signal)>>> = LazyLock::new(|| Mutex::new(Vec::new()));
static NEXT_HOOK: AtomicU64 = AtomicU64::new(1);

/// Registration of one context; unregisters on drop.
#[derive(Debug)]
pub struct DebugHook {
    id: u64,
}

/// Make `ctx` reachable from [`force_reconcile`].
pub fn register(ctx: &ReconcileContext) -> DebugHook {
    let id = NEXT_HOOK.fetch_add(1, Ordering::Relaxed);
    HOOKS
        .lock()
        .push((id, Arc::downgrade(ctx.reprocess_signal())));
    debug!(hook = id, "Registered debug hook");
    DebugHook { id }
}

impl Drop for DebugHook {
    fn drop(&mut self) {
        HOOKS.lock().retain(|(id, _)| *id != self.id);
        debug!(hook = self.id, "Unregistered debug hook");
    }
}

/// Force a reconciliation pass in every attached view of every loaded plugin.
/// Returns the number of views signalled.
pub fn force_reconcile() -> usize {
    let mut hooks = HOOKS.lock();
    hooks.retain(|(_, signal)| signal.strong_count() > 0);

    let views = hooks
        .iter()
        .filter_map(|(_, signal)| signal.upgrade())
        .map(|signal| {
            signal.send_modify(|generation| *generation += 1);
            signal.receiver_count()
        })
        .sum();
    info!(plugins = hooks.len(), views, "Forced reconciliation");
    views
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestHost;

    fn is_registered(hook: &DebugHook) -> bool {
        HOOKS.lock().iter().any(|(id, _)| *id == hook.id)
    }

    #[test]
    fn test_hook_lives_as_long_as_guard() {
        let host = TestHost::new();
        let ctx = host.context();
        let hook = register(&ctx);
        assert!(is_registered(&hook));

        let mut view = ctx.subscribe_reprocess();
        assert!(force_reconcile() >= 1);
        assert!(view.has_changed().unwrap());

        let id = hook.id;
        drop(hook);
        assert!(!HOOKS.lock().iter().any(|(hook, _)| *hook == id));
    }
}
