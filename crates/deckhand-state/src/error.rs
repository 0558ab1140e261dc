//! Failures of the convergence state store.
//!
//! redb and serde_json errors are flattened to strings so callers in the
//! apply engine can match on where a read or write broke without pulling
//! in either crate.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state file: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open state table: {0}")]
    Table(String),

    #[error("cannot read state record: {0}")]
    Read(String),

    #[error("cannot write state record: {0}")]
    Write(String),

    #[error("cannot encode state record: {0}")]
    Serialize(String),

    /// A stored record no longer matches the current record layout.
    #[error("corrupt state record: {0}")]
    Deserialize(String),

    /// Stage names prefix every record key; a name carrying a key
    /// separator would read another stage's records.
    #[error("invalid stage name {0:?}")]
    InvalidStage(String),
}
