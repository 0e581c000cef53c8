//! Identifiers for SHELFLIFE entities.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Action proposal identifier
///
/// Derived from the proposal's natural key so that regenerating the same
/// proposal yields the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Create from a natural key (name-based UUID v5)
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "act_{}", self.0)
    }
}

/// Job execution identifier - monotonically assigned by the execution log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(u64);

impl ExecutionId {
    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Next identifier in sequence
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "exec_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_id_deterministic() {
        let a = ActionId::from_name("2024-03-01|S1|SKU1|B1|MARKDOWN");
        let b = ActionId::from_name("2024-03-01|S1|SKU1|B1|MARKDOWN");
        let c = ActionId::from_name("2024-03-01|S1|SKU1|B1|LIQUIDATE");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.to_string().starts_with("act_"));
    }

    #[test]
    fn test_execution_id_sequence() {
        let id = ExecutionId::from_raw(41);
        assert_eq!(id.next().as_u64(), 42);
        assert_eq!(id.to_string(), "exec_41");
    }
}
