use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::LockError;

/// A process-wide set of named, non-blocking mutexes keyed by an arbitrary
/// string (`volume_id` or `request_name` for `VolumeLocks`; `snapshot_id`
/// or `request_name` for `SnapshotLocks` — spec.md §4.C).
///
/// Directly grounded on the teacher's `GrpcContext`/`GrpcClientLocked`
/// owned-mutex-guard idiom (`control-plane/agents/core/src/core/grpc.rs`):
/// each key gets its own `tokio::sync::Mutex<()>`, and holding the lock is
/// represented by an `OwnedMutexGuard` rather than a bespoke RAII type.
#[derive(Clone, Default)]
pub struct NamedLocks {
    locks: Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// Held while a `NamedLocks` entry is locked. Dropping it releases the
/// lock — callers are not required to remember to unlock explicitly, which
/// is how spec.md §4.C's "pair `try_acquire` with an unconditional release
/// on every exit path" is actually enforced in Rust.
pub struct NamedLockGuard {
    _guard: OwnedMutexGuard<()>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("not poisoned");
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Non-blocking acquire. Fails fast with `LockError::AlreadyExists` on
    /// contention — the caller converts that to `Aborted` and the CSI
    /// orchestrator retries (spec.md §5).
    pub fn try_acquire(&self, key: &str) -> Result<NamedLockGuard, LockError> {
        let mutex = self.entry(key);
        match mutex.try_lock_owned() {
            Ok(guard) => Ok(NamedLockGuard { _guard: guard }),
            Err(_) => Err(LockError::AlreadyExists { key: key.to_string() }),
        }
    }

    /// Drop the per-key mutex once nobody else references it, so the map
    /// does not grow unbounded over the controller's lifetime. Safe to call
    /// at any time; it is a no-op if the key is currently held or absent.
    pub fn reap(&self, key: &str) {
        let mut locks = self.locks.lock().expect("not poisoned");
        if let Some(mutex) = locks.get(key) {
            if Arc::strong_count(mutex) == 1 {
                locks.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_on_same_key_fails_fast() {
        let locks = NamedLocks::new();
        let _first = locks.try_acquire("pvc-a").unwrap();
        assert!(locks.try_acquire("pvc-a").is_err());
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = NamedLocks::new();
        let _a = locks.try_acquire("pvc-a").unwrap();
        assert!(locks.try_acquire("pvc-b").is_ok());
    }

    #[tokio::test]
    async fn lock_is_released_on_drop() {
        let locks = NamedLocks::new();
        {
            let _guard = locks.try_acquire("pvc-a").unwrap();
        }
        assert!(locks.try_acquire("pvc-a").is_ok());
    }
}
