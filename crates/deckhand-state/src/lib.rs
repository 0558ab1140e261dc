//! deckhand-state: convergence state for Deckhand.
//!
//! Backed by [redb](https://docs.rs/redb). Records what each stage looks
//! like after its last apply: converged resources with their outputs, the
//! apply history, every migration trigger firing, and the deployed
//! pipeline definition.
//!
//! Records are JSON-encoded into `&[u8]` value columns under composite
//! keys (`{stage}/{id}`, `{stage}:{apply_id}`), so per-stage listings are
//! prefix scans. `StateStore` is `Clone + Send + Sync` and can be shared
//! across tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
