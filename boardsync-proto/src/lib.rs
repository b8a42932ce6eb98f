//! Shared protocol definitions for the `BoardSync` wire format.

pub mod codec;
pub mod event;
pub mod mutation;
pub mod presence;
pub mod task;
pub mod wire;
