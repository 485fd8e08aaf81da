//! Knowledge Voice API Library Crate
//!
//! Configuration, shared state, HTTP routing and the WebSocket bridge of the
//! service. The binaries in `bin/` are thin wrappers around this library.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod recorder;
pub mod retrieval;
pub mod router;
pub mod state;
pub mod ws;
