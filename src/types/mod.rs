#![forbid(unsafe_code)]

//! Identifier newtypes shared by the query model.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of a single node instance, as assigned by the bridge layer.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Relation-type ("role") identifier, as defined by the relation definitions.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct RoleId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u64 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl From<u32> for RoleId {
    fn from(value: u32) -> Self {
        RoleId(value)
    }
}

impl From<RoleId> for u32 {
    fn from(value: RoleId) -> Self {
        value.0
    }
}
