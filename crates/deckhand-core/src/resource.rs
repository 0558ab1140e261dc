//! Resource identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a resource in a deployment plan: `{stack}/{logical}`.
///
/// Ids are totally ordered so that plans iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(stack: &str, logical: &str) -> Self {
        Self(format!("{stack}/{logical}"))
    }

    /// Stack that owns this resource.
    pub fn stack(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(stack, _)| stack)
    }

    /// Logical name within the owning stack.
    pub fn logical(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(_, logical)| logical)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_stack_and_logical() {
        let id = ResourceId::new("shopNetwork", "shopVPC");
        assert_eq!(id.as_str(), "shopNetwork/shopVPC");
        assert_eq!(id.stack(), "shopNetwork");
        assert_eq!(id.logical(), "shopVPC");
    }

    #[test]
    fn orders_by_stack_first() {
        let a = ResourceId::new("a", "z");
        let b = ResourceId::new("b", "a");
        assert!(a < b);
    }
}
