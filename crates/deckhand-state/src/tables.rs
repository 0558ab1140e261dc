//! redb table definitions.
//!
//! Every table maps a `&str` key to a JSON-encoded record. Keys are
//! prefixed by stage so one store can hold several stages; apply ids are
//! zero-padded so lexical order matches numeric order.

use redb::TableDefinition;

pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Converged resources keyed by `{stage}/{resource_id}`.
pub const RESOURCES: JsonTable = TableDefinition::new("resources");

/// Apply history keyed by `{stage}:{apply_id:020}`.
pub const APPLIES: JsonTable = TableDefinition::new("applies");

/// Trigger firings keyed by `{stage}/{trigger_id}:{apply_id:020}`.
pub const TRIGGERS: JsonTable = TableDefinition::new("triggers");

/// Deployed pipeline definitions keyed by pipeline name.
pub const PIPELINES: JsonTable = TableDefinition::new("pipelines");
