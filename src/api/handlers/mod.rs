//! API route handlers
//!
//! - Liveness and the raw status snapshot
//! - Check listing and dynamic registration
//! - Alerts, recovery attempts and predictions

mod alerts;
mod checks;
mod status;

pub use alerts::*;
pub use checks::*;
pub use status::*;

use serde::Deserialize;
use std::sync::Arc;

use crate::engine::Engine;

/// Default page size for history endpoints
pub const DEFAULT_LIMIT: usize = 50;

/// Hard cap on `?limit=`
pub const MAX_LIMIT: usize = 500;

// ============================================================================
// API State
// ============================================================================

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
}

impl ApiState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

// ============================================================================
// Query types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

impl LimitQuery {
    /// Requested limit, defaulted and capped
    pub fn resolve(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_defaults_and_caps() {
        assert_eq!(LimitQuery { limit: None }.resolve(), DEFAULT_LIMIT);
        assert_eq!(LimitQuery { limit: Some(5) }.resolve(), 5);
        assert_eq!(LimitQuery { limit: Some(100_000) }.resolve(), MAX_LIMIT);
    }
}
