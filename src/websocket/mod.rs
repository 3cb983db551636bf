//! WebSocket Broadcast Relay
//!
//! Every chat message a client sends is fanned out to every connected
//! client, the sender included.
//!
//! ## Architecture
//!
//! - **Hub**: single dispatch task owning the set of live sessions
//! - **Session**: per-connection read pump and write pump
//! - **Transport**: split reader/writer abstraction over a connection
//! - **Handler**: WebSocket upgrade entry point
//! - **Messages** / **Render**: inbound and outbound formats
//!
//! ## Data flow
//!
//! ```text
//! transport -> read pump -> hub intake -> dispatch loop -> mailboxes -> write pumps -> transports
//! ```
//!
//! ## Example
//!
//! ```javascript
//! // Browser
//! const ws = new WebSocket('ws://localhost:8080/ws');
//!
//! ws.onopen = () => ws.send(JSON.stringify({chatinput: 'hello'}));
//!
//! ws.onmessage = (event) => {
//!   // Several messages may arrive in one frame, one per line
//!   for (const line of event.data.split('\n')) {
//!     const msg = JSON.parse(line);
//!     console.log(msg.Sender, msg.Message);
//!   }
//! };
//! ```

mod handler;
mod hub;
mod messages;
mod render;
mod session;
mod transport;

pub use handler::websocket_handler;
pub use hub::{
    BroadcastOutcome, Hub, HubConfig, HubError, Mailbox, Registry, SessionId, SlowConsumerPolicy,
};
pub use messages::{ChatInput, ChatMessage, TYPING_SENTINEL};
pub use render::{escape_html, OutboundFormat};
pub use session::{accept, SessionConfig, SessionError, SessionHandle};
pub use transport::{
    memory_transport, Frame, MemoryPeer, MemoryTransport, Transport, TransportError,
    TransportReader, TransportWriter, WsReader, WsWriter,
};
