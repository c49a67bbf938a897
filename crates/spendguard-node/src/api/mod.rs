//! HTTP and WebSocket handlers.

pub mod dashboard;
pub mod health;
pub mod intake;
pub mod me;
pub mod records;
pub mod sync;
pub mod ws;
