//! Change observers and the registry that dispatches to them.
//!
//! Two independent lists: change observers run after a live snapshot has
//! been committed, delete observers run before a tombstone is written (so
//! they can still read the squadron's last live state). Observers run in
//! registration order and the first error stops dispatch and reaches the
//! caller of [`crate::sync::Synchronizer::synchronize`].

mod alerts;

use squadwatch_core::Snapshot;

pub use alerts::{NewSquadronAlert, RemovalAlert, SquadronChangeAlert, WatchConfig};

use crate::Result;
use crate::store::SnapshotStore;

/// Called after a live snapshot was inserted.
pub trait ChangeObserver: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_insert_or_update(&self, snapshot: &Snapshot, store: &SnapshotStore) -> Result<()>;
}

/// Called before a squadron is tombstoned.
pub trait DeleteObserver: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_before_delete(&self, squadron_id: i64, store: &SnapshotStore) -> Result<()>;
}

impl<F> ChangeObserver for F
where
    F: Fn(&Snapshot, &SnapshotStore) -> Result<()> + Send + Sync,
{
    fn on_insert_or_update(&self, snapshot: &Snapshot, store: &SnapshotStore) -> Result<()> {
        self(snapshot, store)
    }
}

impl<F> DeleteObserver for F
where
    F: Fn(i64, &SnapshotStore) -> Result<()> + Send + Sync,
{
    fn on_before_delete(&self, squadron_id: i64, store: &SnapshotStore) -> Result<()> {
        self(squadron_id, store)
    }
}

/// Observers registered at startup, owned by the synchronizer.
#[derive(Default)]
pub struct HookRegistry {
    on_change: Vec<Box<dyn ChangeObserver>>,
    on_before_delete: Vec<Box<dyn DeleteObserver>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_on_change(&mut self, observer: impl ChangeObserver + 'static) {
        tracing::debug!("Registered change observer {}", observer.name());
        self.on_change.push(Box::new(observer));
    }

    pub fn register_on_before_delete(&mut self, observer: impl DeleteObserver + 'static) {
        tracing::debug!("Registered delete observer {}", observer.name());
        self.on_before_delete.push(Box::new(observer));
    }

    pub fn change_observers(&self) -> usize {
        self.on_change.len()
    }

    pub fn delete_observers(&self) -> usize {
        self.on_before_delete.len()
    }

    /// Run every change observer in registration order.
    pub fn notify_change(&self, snapshot: &Snapshot, store: &SnapshotStore) -> Result<()> {
        for observer in &self.on_change {
            tracing::trace!(
                squadron_id = snapshot.squadron_id,
                "Running change observer {}",
                observer.name()
            );
            observer.on_insert_or_update(snapshot, store)?;
        }
        Ok(())
    }

    /// Run every delete observer in registration order.
    pub fn notify_before_delete(&self, squadron_id: i64, store: &SnapshotStore) -> Result<()> {
        for observer in &self.on_before_delete {
            tracing::trace!(squadron_id, "Running delete observer {}", observer.name());
            observer.on_before_delete(squadron_id, store)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::testing::squadron;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_dispatch_in_registration_order() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let snapshot = store.insert_snapshot(&squadron(1), Utc::now()).unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut registry = HookRegistry::new();
        for label in ["first", "second", "third"] {
            let calls = Arc::clone(&calls);
            registry.register_on_change(move |s: &Snapshot, _: &SnapshotStore| -> Result<()> {
                calls.lock().push((label, s.squadron_id));
                Ok(())
            });
        }

        registry.notify_change(&snapshot, &store).unwrap();
        assert_eq!(
            *calls.lock(),
            vec![("first", 1), ("second", 1), ("third", 1)]
        );
    }

    #[test]
    fn test_failing_observer_stops_dispatch() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut registry = HookRegistry::new();
        registry.register_on_before_delete(|id: i64, _: &SnapshotStore| -> Result<()> {
            Err(Error::Hook {
                observer: "broken".to_string(),
                reason: format!("cannot handle {}", id),
            })
        });
        let after = Arc::clone(&calls);
        registry.register_on_before_delete(move |id: i64, _: &SnapshotStore| -> Result<()> {
            after.lock().push(id);
            Ok(())
        });

        let err = registry.notify_before_delete(7, &store).unwrap_err();
        assert!(matches!(err, Error::Hook { .. }));
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_empty_registry() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let registry = HookRegistry::new();
        assert_eq!(registry.change_observers(), 0);
        assert_eq!(registry.delete_observers(), 0);
        registry.notify_before_delete(1, &store).unwrap();
    }
}
