//! Data Transfer Objects
//!
//! Response types for the API endpoints.

use serde::{Deserialize, Serialize};

// ============================================
// HEALTH DTOs
// ============================================

/// Full health status
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status: healthy, degraded
    pub status: String,
    /// Hub dispatch loop status: ok, stopped
    pub hub: String,
    /// Number of connected sessions
    pub sessions: usize,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}
