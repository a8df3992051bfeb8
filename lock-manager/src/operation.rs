use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use crate::LockError;

/// The typed sub-keys an `OperationLock` guards per object (spec.md §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Delete,
    Expand,
    Clone,
    SnapshotCreate,
    Restore,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Default)]
struct ObjectLocks {
    held: HashSet<OperationKind>,
}

/// Per-`volume_id` operation lock with the compatibility matrix of
/// spec.md §4.C: `Delete` excludes every other kind on the same object;
/// any two non-`Delete` kinds (including two instances of the same kind)
/// never coexist on the same object either — only different objects run
/// concurrently. `TryAcquire` never blocks.
#[derive(Clone, Default)]
pub struct OperationLock {
    objects: Arc<Mutex<HashMap<String, Arc<Mutex<ObjectLocks>>>>>,
}

pub struct OperationGuard {
    locks: Arc<Mutex<ObjectLocks>>,
    kind: OperationKind,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().expect("not poisoned");
        locks.held.remove(&self.kind);
    }
}

impl OperationLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, volume_id: &str) -> Arc<Mutex<ObjectLocks>> {
        let mut objects = self.objects.lock().expect("not poisoned");
        objects.entry(volume_id.to_string()).or_default().clone()
    }

    pub fn try_acquire(
        &self,
        volume_id: &str,
        kind: OperationKind,
    ) -> Result<OperationGuard, LockError> {
        let entry = self.entry(volume_id);
        let mut locks = entry.lock().expect("not poisoned");

        let conflicts = if kind == OperationKind::Delete {
            !locks.held.is_empty()
        } else {
            locks.held.contains(&OperationKind::Delete) || locks.held.contains(&kind)
        };

        if conflicts {
            return Err(LockError::OperationAlreadyExists {
                kind: kind.to_string(),
                id: volume_id.to_string(),
            });
        }

        locks.held.insert(kind);
        drop(locks);
        Ok(OperationGuard { locks: entry, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_excludes_everything_on_same_object() {
        let lock = OperationLock::new();
        let _expand = lock.try_acquire("v1", OperationKind::Expand).unwrap();
        assert!(lock.try_acquire("v1", OperationKind::Delete).is_err());
    }

    #[test]
    fn clone_and_snapshot_create_are_independent_objects() {
        let lock = OperationLock::new();
        let _c = lock.try_acquire("v1", OperationKind::Clone).unwrap();
        assert!(lock.try_acquire("v2", OperationKind::SnapshotCreate).is_ok());
    }

    #[test]
    fn same_kind_twice_on_same_object_conflicts() {
        let lock = OperationLock::new();
        let _c = lock.try_acquire("v1", OperationKind::Clone).unwrap();
        assert!(lock.try_acquire("v1", OperationKind::Clone).is_err());
    }

    #[test]
    fn release_on_drop_allows_retry() {
        let lock = OperationLock::new();
        {
            let _d = lock.try_acquire("v1", OperationKind::Delete).unwrap();
        }
        assert!(lock.try_acquire("v1", OperationKind::Expand).is_ok());
    }
}
