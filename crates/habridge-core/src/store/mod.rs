// ── Entity cache ──
//
// The store is the only shared mutable state in the core. Writers are the
// protocol session and the command service; renderers read through a
// `StoreReader`.

mod entity_store;

pub use entity_store::{DEFAULT_LOCK_TIMEOUT, EntityStore, StoreError, StoreReader};
