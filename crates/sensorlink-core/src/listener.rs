// ── Listener fan-out ──
//
// Registries hold listeners behind an ArcSwap so notification iterates a
// snapshot without holding any lock, and registration during a
// notification never blocks or deadlocks. A listener that panics is
// logged and skipped; the remaining listeners still run.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Handle returned on registration, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

type Entries<L> = Vec<(ListenerId, Arc<L>)>;

pub(crate) struct ListenerRegistry<L: ?Sized> {
    next_id: AtomicU64,
    entries: ArcSwap<Entries<L>>,
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub(crate) fn add(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.rcu(|current| {
            let mut next: Entries<L> = current.iter().cloned().collect();
            next.push((id, Arc::clone(&listener)));
            next
        });
        id
    }

    /// Returns whether a listener was removed.
    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let previous = self.entries.rcu(|current| {
            current
                .iter()
                .filter(|(existing, _)| *existing != id)
                .cloned()
                .collect::<Entries<L>>()
        });
        previous.iter().any(|(existing, _)| *existing == id)
    }

    pub(crate) fn clear(&self) {
        self.entries.store(Arc::new(Vec::new()));
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.load().len()
    }

    /// Call `f` on every registered listener. Returns the number of
    /// listeners that panicked.
    pub(crate) fn notify(&self, event: &'static str, f: impl Fn(&L)) -> usize {
        let snapshot = self.entries.load_full();
        snapshot
            .iter()
            .filter(|(id, listener)| !deliver(*id, &**listener, event, &f))
            .count()
    }
}

/// Invoke one listener in isolation. Returns false if it panicked.
pub(crate) fn deliver<L: ?Sized>(
    id: ListenerId,
    listener: &L,
    event: &'static str,
    f: impl Fn(&L),
) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| f(listener))) {
        Ok(()) => true,
        Err(payload) => {
            error!(
                listener = %id,
                event,
                panic = panic_message(&*payload),
                "listener failed, continuing with remaining listeners"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
