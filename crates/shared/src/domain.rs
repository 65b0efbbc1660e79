use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::record::Record;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Schema-agnostic view of a console resource row. Only the id and the
/// lifecycle phase are interpreted; everything else rides along in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub id: ResourceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ResourceSummary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: ResourceId(id.into()),
            name: None,
            phase: None,
            fields: Map::new(),
        }
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn in_phase(&self, phase: &str) -> bool {
        self.phase
            .as_deref()
            .is_some_and(|current| current.eq_ignore_ascii_case(phase))
    }
}

impl Record for ResourceSummary {
    type Id = ResourceId;

    fn record_id(&self) -> Self::Id {
        self.id.clone()
    }
}
