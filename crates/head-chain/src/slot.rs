//! Chain positions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Slot index of a base-chain position. Never decreases along one branch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChainSlot(pub u64);

impl ChainSlot {
    /// Position of the genesis state of every tracked head.
    pub const GENESIS: ChainSlot = ChainSlot(0);

    pub fn get(self) -> u64 {
        self.0
    }

    /// Number of slots from `earlier` to `self`, or `None` if `earlier` is later.
    pub fn since(self, earlier: ChainSlot) -> Option<u64> {
        self.0.checked_sub(earlier.0)
    }
}

impl From<u64> for ChainSlot {
    fn from(n: u64) -> Self {
        ChainSlot(n)
    }
}

impl fmt::Display for ChainSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_is_checked() {
        assert_eq!(ChainSlot(12).since(ChainSlot(10)), Some(2));
        assert_eq!(ChainSlot(10).since(ChainSlot(12)), None);
    }

    #[test]
    fn serializes_as_plain_number() {
        assert_eq!(serde_json::to_string(&ChainSlot(42)).unwrap(), "42");
    }
}
