//! The web module for the HTTP API and the real-time socket.
//! This file declares the other files in this directory as sub-modules.

pub mod api;
pub mod socket;

pub use api::{AppState, create_router};
