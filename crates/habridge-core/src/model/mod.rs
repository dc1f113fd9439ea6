// ── Domain model ──
//
// Identity types and the immutable snapshots cached by the entity store.

pub mod entity_id;
pub mod snapshot;

pub use entity_id::{Domain, EntityId};
pub use snapshot::{EntitySnapshot, SelectedEntity, decode_selection, encode_selection};
