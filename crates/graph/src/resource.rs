use std::fmt;

use serde::Serialize;

/// Identity of a node in the wait-for graph.
///
/// Ids come from one counter per manager, so the ordering is total and stable:
/// it is the tie-break used when choosing a deadlock victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ResourceId {
    Lock(u64),
    Rule(u64),
}

impl ResourceId {
    pub fn is_lock(&self) -> bool {
        matches!(self, ResourceId::Lock(_))
    }

    pub fn is_rule(&self) -> bool {
        matches!(self, ResourceId::Rule(_))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Lock(n) => write!(f, "lock#{}", n),
            ResourceId::Rule(n) => write!(f, "rule#{}", n),
        }
    }
}
