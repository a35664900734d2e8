//! Dataset splits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named subset of the workflow with its own iteration sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Validate,
    Test,
}

impl Split {
    /// Splits run in every epoch, in order.
    pub const EPOCH: [Split; 2] = [Split::Train, Split::Validate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validate => "validate",
            Self::Test => "test",
        }
    }

    /// Whether the runner reports a loss for this split.
    pub fn has_loss(&self) -> bool {
        !matches!(self, Self::Test)
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
