// Analytics result wrapper. Too little data is a normal outcome, not an error.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Analysis<T> {
    Ready(T),
    #[serde(rename_all = "camelCase")]
    InsufficientData { required: usize, available: usize },
}

impl<T> Analysis<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Analysis::Ready(v) => Some(v),
            Analysis::InsufficientData { .. } => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, Analysis::InsufficientData { .. })
    }
}

/// Whether some inputs were skipped as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "quality", rename_all = "camelCase")]
pub enum DataQuality {
    Complete,
    Partial { skipped: usize },
}

impl DataQuality {
    pub fn from_skipped(skipped: usize) -> Self {
        if skipped == 0 {
            DataQuality::Complete
        } else {
            DataQuality::Partial { skipped }
        }
    }
}
