//! Handler priority levels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Priority of an event handler. Higher values run first.
///
/// The conventional range is [`Priority::MIN`]..=[`Priority::MAX`];
/// [`Priority::MEAN`] is the default for new handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    /// Lowest level. Also the initial dispatch floor.
    pub const MIN: Self = Self(0);
    /// Highest conventional level.
    pub const MAX: Self = Self(1000);
    /// Midpoint of the conventional range.
    pub const MEAN: Self = Self((Self::MAX.0 + Self::MIN.0) / 2);

    /// Creates a priority from a raw level.
    pub const fn new(level: i32) -> Self {
        Self(level)
    }

    /// Returns the raw level.
    pub const fn level(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::MEAN
    }
}

impl From<i32> for Priority {
    fn from(level: i32) -> Self {
        Self(level)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
