//! Optimistic concurrency expectations for stream appends.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Expected length of a stream before an append.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Skip version checking.
    Any,
    /// Require the stream to hold exactly this many events.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> BridgeResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(BridgeError::concurrency(format!(
                "expected version {self:?}, actual {actual}"
            )))
        }
    }
}
