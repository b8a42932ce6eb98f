//! `BoardSync` server library.
//!
//! Exposes the board core and its WebSocket transport for use in tests and
//! embedding. The core validates task mutations, persists them through a
//! [`store::TaskStore`] and fans canonical snapshots out to everyone viewing
//! the same project, while tracking who is present and who has gone idle.

pub mod board;
pub mod broker;
pub mod clock;
pub mod config;
pub mod machine;
pub mod presence;
pub mod server;
pub mod store;
pub mod sweeper;
