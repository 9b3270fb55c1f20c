// src/lib.rs - Raspberry Pi hardware emulation core
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod event;
pub mod graph;
pub mod model;
pub mod sandbox;
pub mod session;
pub mod shim;
pub mod store;
pub mod tick;
pub mod web;

pub use config::{Config, load_config};
pub use error::{EmuError, EmuResult};
pub use event::{Event, EventBus, EventKind};
pub use graph::SignalGraph;
pub use model::{SharedModel, SystemModel};
pub use session::{Session, SessionManager};
