use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use snafu::Snafu;

/// Errors from the underlying KV store, kept separate from [`crate::JournalError`]
/// because this crate describes an external collaborator's interface
/// (spec.md §1, §6 "Consumed from KV store (RADOS OMAP)") rather than
/// journal logic of its own — the same separation `rbd_client::BackendError`
/// draws from `common::VolumeError`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum KvError {
    #[snafu(display("object '{}' not found", object))]
    ObjectNotFound { object: String },
    #[snafu(display("pool '{}' not found", pool))]
    PoolNotFound { pool: String },
    #[snafu(display("kv store call failed: {}", details))]
    Backend { details: String },
}

/// RADOS OMAP surface named in spec.md §6. Namespace is threaded as an
/// explicit per-call argument rather than bound to a stateful IO context
/// (spec.md §9 rejects global/shared mutable handles), so `set_namespace`
/// has no counterpart here: every call already names its namespace.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_omap(
        &self,
        pool: &str,
        namespace: Option<&str>,
        object: &str,
        keys: &[String],
    ) -> Result<HashMap<String, String>, KvError>;

    async fn set_omap(
        &self,
        pool: &str,
        namespace: Option<&str>,
        object: &str,
        kv: HashMap<String, String>,
    ) -> Result<(), KvError>;

    async fn remove_omap_keys(
        &self,
        pool: &str,
        namespace: Option<&str>,
        object: &str,
        keys: &[String],
    ) -> Result<(), KvError>;
}

fn object_key(pool: &str, namespace: Option<&str>, object: &str) -> String {
    format!("{}/{}/{}", pool, namespace.unwrap_or(""), object)
}

/// In-memory `KvStore` standing in for the two well-known RADOS OMAP
/// objects per pool, so the journal's tests run without a cluster
/// (SPEC_FULL.md Component K).
#[derive(Default)]
pub struct MemKvStore {
    objects: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemKvStore {
    async fn get_omap(
        &self,
        pool: &str,
        namespace: Option<&str>,
        object: &str,
        keys: &[String],
    ) -> Result<HashMap<String, String>, KvError> {
        let objects = self.objects.lock().unwrap();
        let key = object_key(pool, namespace, object);
        let stored = objects.get(&key).ok_or_else(|| KvError::ObjectNotFound { object: object.to_string() })?;
        Ok(stored
            .iter()
            .filter(|(k, _)| keys.is_empty() || keys.iter().any(|wanted| wanted == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn set_omap(
        &self,
        pool: &str,
        namespace: Option<&str>,
        object: &str,
        kv: HashMap<String, String>,
    ) -> Result<(), KvError> {
        let mut objects = self.objects.lock().unwrap();
        let key = object_key(pool, namespace, object);
        objects.entry(key).or_default().extend(kv);
        Ok(())
    }

    async fn remove_omap_keys(
        &self,
        pool: &str,
        namespace: Option<&str>,
        object: &str,
        keys: &[String],
    ) -> Result<(), KvError> {
        let mut objects = self.objects.lock().unwrap();
        let key = object_key(pool, namespace, object);
        if let Some(stored) = objects.get_mut(&key) {
            for k in keys {
                stored.remove(k);
            }
        }
        Ok(())
    }
}
