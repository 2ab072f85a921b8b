//! ContentForge Core Type Definitions
//!
//! Fundamental aliases and small value types shared across modules.

use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Service identifier (provider + capability family, e.g. "openai")
pub type ServiceId = String;

/// Generation result identifier (ULID)
pub type ResultId = String;

/// Provider-assigned job identifier (opaque)
pub type JobId = String;

/// Unix timestamp in seconds
pub type Timestamp = i64;

// =============================================================================
// Dimensions
// =============================================================================

/// Pixel dimensions of an image request or payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Square dimensions of the given edge length
    pub fn square(edge: u32) -> Self {
        Self {
            width: edge,
            height: edge,
        }
    }

    /// Longest edge
    pub fn max_edge(&self) -> u32 {
        self.width.max(self.height)
    }

    /// Wire format used by most providers ("WxH")
    pub fn to_size_string(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Current unix timestamp
pub fn now_timestamp() -> Timestamp {
    chrono::Utc::now().timestamp()
}
