//! Root crate: wires the `pageforge-*` library crates into one process —
//! configuration, the HTTP control surface, and the placeholder adapters
//! for the two collaborators this system doesn't implement. Exposed as a
//! library too so integration tests can build a router against an
//! in-memory store without going through `main`.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod placeholder;
pub mod state;
