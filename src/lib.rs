//! # Parley
//!
//! Real-time chat broadcast relay. Clients connect over WebSocket, and every
//! chat message one of them sends is fanned out to all connected clients.
//!
//! ## Features
//!
//! - **Single dispatch loop**: one task owns the session registry, no locks
//! - **Bounded mailboxes**: a slow client never stalls the others
//! - **Heartbeats**: ping/pong liveness with read and write deadlines
//! - **htmx front end**: optional HTML fragment output for the bundled chat page
//!
//! ## Modules
//!
//! - [`websocket`]: Hub, session pumps and transport abstraction
//! - [`api`]: HTTP server with Axum
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parley::api::{serve, AppState};
//! use parley::config::Config;
//! use parley::websocket::Hub;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!
//!     // Start the dispatch loop
//!     let (hub, _dispatch) = Hub::spawn(config.relay.hub_config());
//!
//!     // Serve chat page, WebSocket endpoint and health checks
//!     let state = AppState::new(hub, config.relay.session_config(), config.server.clone());
//!     serve(state, &config.server).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod websocket;

pub use api::{build_router, serve, ApiError, AppState};

pub use config::{Config, ConfigError, LoggingConfig, RelayConfig, ServerConfig};

pub use websocket::{
    accept, websocket_handler, ChatInput, ChatMessage, Hub, HubConfig, HubError, OutboundFormat,
    SessionConfig, SessionError, SessionHandle, SessionId, SlowConsumerPolicy,
};
