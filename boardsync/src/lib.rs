//! `BoardSync` client library.
//!
//! Keeps a local copy of project boards in step with the server: events are
//! applied as replace-by-id snapshots, optimistic column moves are confirmed
//! or rolled back, and [`connection::BoardConnection`] speaks the wire
//! protocol over a WebSocket.

pub mod board;
pub mod connection;
pub mod reconcile;
