use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};

/// One loop level iterating over the half-open range `[low, high)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IterationVar {
    name: String,
    low: i64,
    high: i64,
}

pub type IterVarRef = Arc<IterationVar>;

impl IterationVar {
    /// Creates a loop variable; `low == high` is a zero-trip loop.
    pub fn new(name: impl Into<String>, range: Range<i64>) -> FlowResult<IterVarRef> {
        let name = name.into();
        if range.start > range.end {
            return Err(FlowError::InvalidRange {
                name,
                low: range.start,
                high: range.end,
            });
        }
        Ok(Arc::new(IterationVar {
            name,
            low: range.start,
            high: range.end,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn high(&self) -> i64 {
        self.high
    }

    pub fn range(&self) -> Range<i64> {
        self.low..self.high
    }

    /// Number of iterations.
    pub fn extent(&self) -> u64 {
        self.low.abs_diff(self.high)
    }

    pub fn is_empty(&self) -> bool {
        self.low == self.high
    }
}
