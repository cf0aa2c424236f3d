//! `docent-gateway`: session actors, the turn loop, capabilities, the
//! research pipeline, and the HTTP/WebSocket surface.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;
