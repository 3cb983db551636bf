//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::websocket::{Hub, SessionConfig};

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Handle to the broadcast hub
    pub hub: Hub,
    /// Tunables handed to every new session
    pub session_config: Arc<SessionConfig>,
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(hub: Hub, session_config: SessionConfig, config: ServerConfig) -> Self {
        Self {
            hub,
            session_config: Arc::new(session_config),
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get WebSocket session count
    pub fn session_count(&self) -> usize {
        self.hub.session_count()
    }
}
