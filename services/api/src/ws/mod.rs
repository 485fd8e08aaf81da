//! WebSocket Session Bridge
//!
//! Relays a browser client's realtime session to the upstream realtime
//! endpoint. Submodules:
//!
//! - `protocol`: the init frame and error notice exchanged with the client.
//! - `upstream`: endpoint resolution and the resilient upstream connector.
//! - `session`: the per-connection lifecycle, from handshake to teardown.
//! - `pump`: the inbound and outbound relay loops of an active session.

pub mod protocol;
mod pump;
pub mod session;
pub mod upstream;

pub use session::ws_handler;
