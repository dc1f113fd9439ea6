// ── Last-known entity state ──
//
// A single `tokio::sync::Mutex` guards the map. Parsing happens before the
// lock is taken and the lock is never held across I/O, so the critical
// section is a map operation. Acquisition is bounded by `lock_timeout`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, trace};

use crate::error::CoreError;
use crate::model::{EntityId, EntitySnapshot};

/// Default bound on lock acquisition.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("unparseable state document for {id}: {message}")]
    Parse { id: String, message: String },

    #[error("store lock not acquired within {timeout:?}")]
    Busy { timeout: Duration },
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Parse { message, .. } => CoreError::Parse { message },
            StoreError::Busy { timeout } => CoreError::StoreBusy {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
        }
    }
}

type Entries = BTreeMap<EntityId, Arc<EntitySnapshot>>;

/// Concurrent cache of one snapshot per entity id.
pub struct EntityStore {
    entities: Mutex<Entries>,
    lock_timeout: Duration,
    /// Bumped on every successful write.
    version: watch::Sender<u64>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl EntityStore {
    pub fn new(lock_timeout: Duration) -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            entities: Mutex::new(BTreeMap::new()),
            lock_timeout,
            version,
        }
    }

    async fn lock(&self) -> Result<MutexGuard<'_, Entries>, StoreError> {
        tokio::time::timeout(self.lock_timeout, self.entities.lock())
            .await
            .map_err(|_| StoreError::Busy {
                timeout: self.lock_timeout,
            })
    }

    /// Parse `raw` and replace the snapshot for `id`.
    ///
    /// A document that fails to parse leaves the previous snapshot in place.
    pub async fn set(&self, id: &EntityId, raw: &str) -> Result<Arc<EntitySnapshot>, StoreError> {
        let snapshot = EntitySnapshot::parse(id, raw).map_err(|e| StoreError::Parse {
            id: id.to_string(),
            message: e.to_string(),
        })?;
        self.insert(snapshot).await
    }

    /// Store an already-built snapshot under its own id.
    pub async fn insert(&self, snapshot: EntitySnapshot) -> Result<Arc<EntitySnapshot>, StoreError> {
        let snapshot = Arc::new(snapshot);
        {
            let mut entities = self.lock().await?;
            entities.insert(snapshot.id.clone(), Arc::clone(&snapshot));
        }
        self.version.send_modify(|v| *v = v.wrapping_add(1));
        trace!(entity_id = %snapshot.id, state = %snapshot.state, "snapshot stored");
        Ok(snapshot)
    }

    /// Current snapshot for `id`. The returned handle never changes under
    /// the caller; later writes install a new `Arc`.
    pub async fn get(&self, id: &EntityId) -> Result<Option<Arc<EntitySnapshot>>, StoreError> {
        let entities = self.lock().await?;
        Ok(entities.get(id).cloned())
    }

    /// Sorted copy of the key set at the instant of the call.
    pub async fn list_ids(&self) -> Result<Vec<EntityId>, StoreError> {
        let entities = self.lock().await?;
        Ok(entities.keys().cloned().collect())
    }

    /// All snapshots, ordered by id.
    pub async fn snapshots(&self) -> Result<Vec<Arc<EntitySnapshot>>, StoreError> {
        let entities = self.lock().await?;
        Ok(entities.values().cloned().collect())
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock().await?.is_empty())
    }

    /// Drop every snapshot, e.g. after the settings were reset.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut entities = self.lock().await?;
        if !entities.is_empty() {
            entities.clear();
            drop(entities);
            self.version.send_modify(|v| *v = v.wrapping_add(1));
            debug!("entity store cleared");
        }
        Ok(())
    }

    /// Version counter receiver; changes on every write.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Read-only handle for renderers.
    pub fn reader(self: &Arc<Self>) -> StoreReader {
        StoreReader {
            store: Arc::clone(self),
            version: self.version.subscribe(),
        }
    }
}

// ── StoreReader ─────────────────────────────────────────────────────

/// Read-only view of an [`EntityStore`].
///
/// Renderers hold one of these and poll at their own cadence, or await
/// [`changed()`](Self::changed) to redraw only after a write.
#[derive(Clone)]
pub struct StoreReader {
    store: Arc<EntityStore>,
    version: watch::Receiver<u64>,
}

impl StoreReader {
    pub async fn get(&self, id: &EntityId) -> Result<Option<Arc<EntitySnapshot>>, StoreError> {
        self.store.get(id).await
    }

    pub async fn list_ids(&self) -> Result<Vec<EntityId>, StoreError> {
        self.store.list_ids().await
    }

    pub async fn snapshots(&self) -> Result<Vec<Arc<EntitySnapshot>>, StoreError> {
        self.store.snapshots().await
    }

    /// Wait for the next write. Returns `false` once the store is gone.
    pub async fn changed(&mut self) -> bool {
        self.version.changed().await.is_ok()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn last_write_wins_without_merging() {
        let store = EntityStore::default();
        let kitchen = id("light.kitchen");

        store
            .set(&kitchen, r#"{"state":"on","attributes":{"brightness":200}}"#)
            .await
            .unwrap();
        store.set(&kitchen, r#"{"state":"off"}"#).await.unwrap();

        let snap = store.get(&kitchen).await.unwrap().unwrap();
        assert_eq!(snap.state, "off");
        assert!(snap.attribute("brightness").is_none());
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn parse_failure_keeps_previous_snapshot() {
        let store = EntityStore::default();
        let gate = id("switch.gate");
        store.set(&gate, r#"{"state":"on"}"#).await.unwrap();
        let version = store.version();

        for raw in ["{garbage", r#"["off"]"#, "null"] {
            let err = store.set(&gate, raw).await.unwrap_err();
            assert!(matches!(err, StoreError::Parse { .. }), "{raw}");
        }
        assert_eq!(store.get(&gate).await.unwrap().unwrap().state, "on");
        assert_eq!(store.version(), version);
    }

    #[tokio::test]
    async fn handles_are_stable_across_writes() {
        let store = EntityStore::default();
        let kitchen = id("light.kitchen");
        store.set(&kitchen, r#"{"state":"on"}"#).await.unwrap();
        let held = store.get(&kitchen).await.unwrap().unwrap();

        store.set(&kitchen, r#"{"state":"off"}"#).await.unwrap();
        assert_eq!(held.state, "on");
    }

    #[tokio::test]
    async fn list_ids_is_sorted() {
        let store = EntityStore::default();
        for raw in ["switch.b", "light.z", "climate.a"] {
            store.set(&id(raw), r#"{"state":"x"}"#).await.unwrap();
        }
        let ids: Vec<String> = store
            .list_ids()
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ids, vec!["climate.a", "light.z", "switch.b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn held_lock_times_out_as_busy() {
        let store = Arc::new(EntityStore::new(Duration::from_millis(50)));
        let guard = store.entities.lock().await;

        let err = store.get(&id("light.kitchen")).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Busy {
                timeout: Duration::from_millis(50)
            }
        );
        drop(guard);
        assert!(store.get(&id("light.kitchen")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reader_observes_writes() {
        let store = Arc::new(EntityStore::default());
        let mut reader = store.reader();
        let kitchen = id("light.kitchen");

        let writer = Arc::clone(&store);
        let k = kitchen.clone();
        tokio::spawn(async move {
            writer.set(&k, r#"{"state":"on"}"#).await.unwrap();
        });

        assert!(reader.changed().await);
        assert_eq!(reader.get(&kitchen).await.unwrap().unwrap().state, "on");
        assert_eq!(reader.version(), 1);
    }

    #[tokio::test]
    async fn concurrent_writers_leave_one_snapshot_per_id() {
        let store = Arc::new(EntityStore::default());
        let mut tasks = Vec::new();
        for n in 0..16 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let doc = format!(r#"{{"state":"{n}"}}"#);
                store.set(&id("sensor.counter"), &doc).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.list_ids().await.unwrap().len(), 1);
        assert_eq!(store.version(), 16);
    }
}
